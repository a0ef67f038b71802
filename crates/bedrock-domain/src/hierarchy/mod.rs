//! Resource hierarchy traversal.
//!
//! The walker discovers every ancestor reachable from a resource through
//! cascading edges, nearest first. Each edge's `cascade` governs only that
//! hop: a `none` edge is never traversed, but other paths to the same
//! ancestor still are.
//!
//! # Safety
//!
//! - **Depth Limiting**: discovery aborts with `DepthLimitExceeded` when a
//!   cascading edge would be followed past `max_depth` hops.
//! - **Cycle Detection**: discovered edges are kept in an id-indexed arena and
//!   checked with an iterative three-colour DFS before any ancestor is
//!   returned. A cycle is an integrity error (`CycleDetected`); a diamond
//!   (two paths to one ancestor) is not.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, instrument, warn};

use crate::error::{DomainError, DomainResult};
use crate::model::HierarchyEdge;
use crate::traits::HierarchyReader;

/// An ancestor reached through cascading edges.
#[derive(Debug, Clone, PartialEq)]
pub struct Ancestor {
    pub resource_id: String,
    /// The edge through which this ancestor was first reached.
    pub edge: HierarchyEdge,
    /// Hops from the starting resource (parents are 1).
    pub depth: u32,
}

/// Arena of discovered nodes and cascading edges.
#[derive(Default)]
struct Arena {
    ids: Vec<String>,
    index: HashMap<String, usize>,
    /// child -> parents
    parents: Vec<Vec<usize>>,
}

impl Arena {
    fn intern(&mut self, id: &str) -> (usize, bool) {
        if let Some(&i) = self.index.get(id) {
            return (i, false);
        }
        let i = self.ids.len();
        self.ids.push(id.to_string());
        self.index.insert(id.to_string(), i);
        self.parents.push(Vec::new());
        (i, true)
    }

    /// Returns the node path of the first cycle reachable from `start`.
    fn find_cycle(&self, start: usize) -> Option<Vec<usize>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Colour {
            White,
            Grey,
            Black,
        }

        let mut colour = vec![Colour::White; self.ids.len()];
        // (node, next parent to visit)
        let mut stack = vec![(start, 0usize)];
        colour[start] = Colour::Grey;

        while let Some(top) = stack.last_mut() {
            let (node, next) = *top;
            if let Some(&parent) = self.parents[node].get(next) {
                top.1 += 1;
                match colour[parent] {
                    Colour::White => {
                        colour[parent] = Colour::Grey;
                        stack.push((parent, 0));
                    }
                    Colour::Grey => {
                        let from = stack.iter().position(|(n, _)| *n == parent).unwrap_or(0);
                        let mut path: Vec<usize> = stack[from..].iter().map(|(n, _)| *n).collect();
                        path.push(parent);
                        return Some(path);
                    }
                    Colour::Black => {}
                }
            } else {
                colour[node] = Colour::Black;
                stack.pop();
            }
        }
        None
    }
}

/// Walks ancestor edges of a resource.
pub struct HierarchyWalker<H: ?Sized> {
    reader: Arc<H>,
    max_depth: u32,
}

impl<H: HierarchyReader + ?Sized> HierarchyWalker<H> {
    pub fn new(reader: Arc<H>, max_depth: u32) -> Self {
        Self { reader, max_depth }
    }

    /// Ancestors of `resource_id` reachable through cascading edges,
    /// nearest first. Ties at one depth keep discovery order.
    ///
    /// Each level's parent lookups are issued concurrently.
    ///
    /// # Errors
    ///
    /// `CycleDetected`, `DepthLimitExceeded`, or a store error.
    #[instrument(skip(self), fields(max_depth = self.max_depth))]
    pub async fn ancestors_with_cascade(&self, resource_id: &str) -> DomainResult<Vec<Ancestor>> {
        let mut arena = Arena::default();
        let (start, _) = arena.intern(resource_id);
        let mut ancestors = Vec::new();
        let mut frontier = vec![resource_id.to_string()];
        let mut depth = 0u32;

        while !frontier.is_empty() {
            depth += 1;
            let fetched = try_join_all(
                frontier
                    .iter()
                    .map(|id| self.reader.get_parent_resource_edges(id)),
            )
            .await?;

            let mut next = Vec::new();
            for mut edges in fetched {
                edges.retain(|e| {
                    if !e.cascade.propagates() {
                        debug!(parent = %e.parent_id, child = %e.child_id, "edge does not cascade");
                    }
                    e.cascade.propagates()
                });
                edges.sort_by(|a, b| a.parent_id.cmp(&b.parent_id));

                for edge in edges {
                    if depth > self.max_depth {
                        warn!(resource_id, max_depth = self.max_depth, "hierarchy too deep");
                        return Err(DomainError::DepthLimitExceeded {
                            max_depth: self.max_depth,
                        });
                    }
                    let (child, _) = arena.intern(&edge.child_id);
                    let (parent, is_new) = arena.intern(&edge.parent_id);
                    if !arena.parents[child].contains(&parent) {
                        arena.parents[child].push(parent);
                    }
                    if is_new {
                        next.push(edge.parent_id.clone());
                        ancestors.push(Ancestor {
                            resource_id: edge.parent_id.clone(),
                            edge,
                            depth,
                        });
                    }
                }
            }
            frontier = next;
        }

        if let Some(cycle) = arena.find_cycle(start) {
            let path = cycle
                .iter()
                .map(|&i| arena.ids[i].as_str())
                .collect::<Vec<_>>()
                .join(" -> ");
            warn!(resource_id, %path, "cycle in resource hierarchy");
            return Err(DomainError::CycleDetected { path });
        }

        Ok(ancestors)
    }
}
