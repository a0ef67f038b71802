//! Authorization data model.
//!
//! This module contains:
//! - Scope tree, subjects, roles, permissions and override tiers
//! - Resources, hierarchy edges, collections and policies
//! - Engine input and decision values

mod decision;
mod resource;
mod scope;

pub use decision::*;
pub use resource::*;
pub use scope::*;
