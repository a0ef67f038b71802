//! Tests for the decision pipeline.
//!
//! Organized by component:
//! - Scope visibility and override resolution
//! - Policy ranking and collection membership
//! - End-to-end engine decisions (delegation, caching, cancellation)


mod engine_tests;
mod policy_tests;
