//! Shared utilities for `faction_migrate`.
//!
//! - Timestamp parsing for source records (RFC3339 / dates / epoch)
//! - Unique faction tag generation
//! - Progress indicators (for long-running operations)

pub mod progress;
pub mod tag;
pub mod time;

pub use tag::{generate_unique_tag, is_valid_tag};
pub use time::{SourceTimestamp, parse_flexible_timestamp};
