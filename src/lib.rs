//! Reconciling importer for territorial faction data.
//!
//! Reads factions, members, land claims and admin zones exported by other
//! tools and merges them into one faction store without breaking the rules
//! that store already holds:
//!
//! - `validation`: read-only pre-flight conflict report
//! - `reconcile`: moves players out of their old factions, electing new
//!   leaders and disbanding factions that end up empty
//! - `cluster`: groups loose zone chunks into connected zones
//! - `migrate`: the guarded, backed-up pipeline that drives the above
//!
//! The target is reached only through the traits in `storage`; the bundled
//! `SqliteStore` implements all of them.

pub mod cli;
pub mod cluster;
pub mod config;
pub mod error;
pub mod logging;
pub mod migrate;
pub mod model;
pub mod reconcile;
pub mod report;
pub mod source;
pub mod storage;
pub mod util;
pub mod validation;

pub use error::{ErrorCode, MigrationError, Result, StructuredError};
pub use migrate::{Collaborators, ImportOptions, MigrationLocks, MigrationPipeline};
pub use report::{ImportReport, ValidationReport};
