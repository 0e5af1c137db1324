// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Stratum
//!
//! A dependency-aware, declarative reconciler for infrastructure stacks.
//!
//! ## Overview
//!
//! Stratum takes a model of typed resources, works out the order in which
//! they must be created, and drives a provider until the recorded state
//! matches the model:
//!
//! - Declare resources and their attributes in a YAML model file
//! - Reference other resources with `${id}` or `${id.attribute}`
//! - Apply only what changed, in dependency order, with bounded concurrency
//! - Keep a locked state record per stack (local file or S3)
//!
//! ## Architecture
//!
//! A run is a pipeline:
//!
//! 1. **Graph**: the model is validated against kind schemas and turned into
//!    a dependency graph
//! 2. **Diff**: the graph is compared with recorded state into a plan
//! 3. **Schedule**: the plan is ordered so prerequisites finish first
//! 4. **Execute**: actions run against a provider, retrying transient errors
//!
//! ## Modules
//!
//! - [`config`]: Model parsing, schemas, and validation
//! - [`graph`]: Resource graph construction
//! - [`state`]: State storage backends (local, S3, memory) and sessions
//! - [`provider`]: Provider trait, HTTP and in-memory providers
//! - [`planner`]: Diff, scheduling, retry, and plan execution
//! - [`reconciler`]: The reconciliation loop
//! - [`report`]: Run reports
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! stack:
//!   name: security-lake
//!   environment: dev
//!
//! kinds:
//!   log_group:
//!     attributes:
//!       name: { type: string, required: true, force_new: true }
//!   delivery_stream:
//!     attributes:
//!       source: { type: string, required: true }
//!
//! resources:
//!   logs:
//!     kind: log_group
//!     attributes:
//!       name: /lake/ingest
//!   stream:
//!     kind: delivery_stream
//!     attributes:
//!       source: ${logs.arn}
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cancel;
pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod planner;
pub mod provider;
pub mod reconciler;
pub mod report;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cancel::CancellationToken;
pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{AttributeHasher, ModelParser, ModelValidator, ResourceModel, SchemaRegistry, StackConfig};
pub use error::{Result, StratumError};
pub use graph::{GraphBuilder, ResourceGraph};
pub use planner::{DiffEngine, Plan, PlanExecutor, PlanScheduler, RetryPolicy, Schedule};
pub use provider::{HttpProvider, InMemoryProvider, ResourceProvider};
pub use reconciler::Reconciler;
pub use report::{RunReport, RunStatus};
pub use state::{LocalStateStore, MemoryStateStore, S3StateStore, StateSession, StateStore};
