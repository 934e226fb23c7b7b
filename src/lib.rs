// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![warn(missing_docs)]                // All public items must be documented
#![warn(dead_code)]                   // Unused code is reported
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![warn(unused_imports)]              // Unused imports are reported
#![warn(unused_variables)]            // Unused variables are reported
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

// Tests unwrap through expect() and panic on unexpected variants.
#![cfg_attr(test, allow(clippy::expect_used, clippy::panic, clippy::unwrap_used))]

// ============================================================================
// Crate Documentation
// ============================================================================

//! # fnrelease
//!
//! A reconciling release engine for serverless functions.
//!
//! ## Overview
//!
//! fnrelease takes the functions a release declares ("want") and the functions
//! already deployed in a project ("have"), and:
//!
//! - Computes a per-region plan of creates, updates, deletes and skips
//! - Refuses transitions the platform cannot apply in place
//! - Applies the plan under bounded concurrency with retry and backoff
//! - Waits on long-running operations and isolates failures per region
//! - Reports per-function results, telemetry and remediation hints
//!
//! ## Architecture
//!
//! 1. **Resource model**: endpoints grouped by region in a [`backend::Backend`]
//! 2. **Planner**: pure diff of want and have into a [`planner::DeploymentPlan`]
//! 3. **Fabricator**: applies the plan through the [`cloud`] collaborators
//! 4. **Reporter**: turns results into a [`reporter::SummaryReport`]
//! 5. **Release driver**: confirms deletions and runs the steps above
//!
//! ## Modules
//!
//! - [`backend`]: Endpoint and backend model, queries
//! - [`config`]: Configuration parsing, validation and endpoint hashing
//! - [`executor`]: Bounded-concurrency retrying task queue
//! - [`planner`]: Diff computation and update legality
//! - [`cloud`]: Control-plane traits, wire types and REST client
//! - [`fabricator`]: Plan application
//! - [`reporter`]: Results and telemetry
//! - [`release`]: Release driver
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! endpoints:
//!   - id: hello
//!     project: my-project
//!     region: us-central1
//!     platform: v2
//!     runtime: nodejs20
//!     entryPoint: hello
//!     httpsTrigger: {}
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod backend;
pub mod cli;
pub mod cloud;
pub mod config;
pub mod error;
pub mod executor;
pub mod fabricator;
pub mod planner;
pub mod release;
pub mod reporter;

// ============================================================================
// Re-exports
// ============================================================================

pub use backend::{Backend, Endpoint, EndpointKey, Platform, Trigger};
pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ConfigValidator, EndpointHasher, ReleaseConfig};
pub use error::{ReleaseError, Result};
pub use executor::Executor;
pub use fabricator::Fabricator;
pub use planner::{create_deployment_plan, DeploymentPlan, PlanOptions};
pub use release::{Confirm, ReleaseDriver, ReleaseOptions, ReleaseOutcome};
pub use reporter::{DeploySummary, Reporter, SummaryReport};
