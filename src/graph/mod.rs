//! Resource graph module.
//!
//! This module turns a declarative model into a validated directed acyclic
//! graph of resources with explicit dependency edges.

mod builder;
mod types;

pub use builder::GraphBuilder;
pub use types::{ResourceGraph, ResourceNode};
