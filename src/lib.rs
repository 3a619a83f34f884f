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

//! # DriftGuard
//!
//! Detects drift between the desired and live state of infrastructure
//! resources, classifies it against declarative policy, and decides what
//! to do about it.
//!
//! ## Overview
//!
//! A detection run takes every configured resource through four steps:
//!
//! 1. **Collect**: fetch desired and live state as normalized trees
//! 2. **Diff**: compute path-level differences, skipping ignored paths
//! 3. **Classify**: assign a severity tier per entry and decide an action
//! 4. **Coordinate**: dispatch at most one remediation per drift
//!    fingerprint, suppressing repeated sightings
//!
//! ## Modules
//!
//! - [`tree`]: State trees, diff paths and path globs
//! - [`engine`]: Diff computation and policy classification
//! - [`report`]: Drift reports, fingerprints, audit events and report stores
//! - [`collector`]: State collectors
//! - [`remediation`]: Remediation records and the coordinator
//! - [`detector`]: Concurrent detection runs
//! - [`metrics`]: In-process counters
//! - [`config`]: Policy configuration parsing and validation
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: platform
//!   environment: prod
//!
//! environments:
//!   - environment: dev
//!     auto_remediate:
//!       namespaces: ["*"]
//!
//! drift_rules:
//!   ignore:
//!     - "*.last_modified"
//!   critical:
//!     - aws_security_group.ingress
//!
//! resources:
//!   - type: aws_security_group
//!     name: edge
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod collector;
pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod remediation;
pub mod report;
pub mod tree;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ConfigValidator, DriftGuardConfig};
pub use detector::{DriftDetector, RunSummary};
pub use error::{DriftGuardError, Result};
pub use remediation::{RemediationCoordinator, RemediationOutcome};
pub use report::{DriftReport, ResourceIdentity};
