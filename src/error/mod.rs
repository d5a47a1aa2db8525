//! Error types and handling for `faction_migrate`.
//!
//! # Design
//!
//! - Uses `thiserror` for derive-based error types
//! - Supports `anyhow` integration for collaborator code
//! - Provides recovery hints for user-facing errors
//! - Provides structured JSON output for scripted callers
//!
//! The migration pipeline itself never returns these errors to its caller:
//! every outcome is folded into an `ImportReport`. `MigrationError` is what
//! stores, source adapters, the backup service and the CLI speak.

mod structured;

pub use structured::{ErrorCode, StructuredError};

use std::path::PathBuf;
use thiserror::Error;

/// Primary error type for `faction_migrate` operations.
#[derive(Error, Debug)]
pub enum MigrationError {
    // === Storage Errors ===
    /// Store file not found at the specified path.
    #[error("Store not found at '{path}'")]
    StoreNotFound { path: PathBuf },

    /// `SQLite` database error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Faction with the specified ID was not found.
    #[error("Faction not found: {id}")]
    FactionNotFound { id: String },

    /// A store write was refused.
    #[error("Store write failed for {entity}: {reason}")]
    StoreWrite { entity: String, reason: String },

    /// Zone creation conflicted with existing zone data.
    #[error("Zone conflict for '{name}': {reason}")]
    ZoneConflict { name: String, reason: String },

    // === Source Errors ===
    /// A required source listing is missing.
    #[error("Source listing missing: {path}")]
    SourceMissing { path: PathBuf },

    /// A source listing could not be parsed.
    #[error("Parse error in {file} at line {line}: {reason}")]
    SourceParse {
        file: String,
        line: usize,
        reason: String,
    },

    // === Validation Errors ===
    /// Field validation failed.
    #[error("Validation failed: {field}: {reason}")]
    Validation { field: String, reason: String },

    /// Identifier is not in the accepted format.
    #[error("Invalid identifier: {id}")]
    InvalidId { id: String },

    // === Concurrency Errors ===
    /// Another migration holds the guard.
    #[error("A {kind} migration is already in progress")]
    MigrationInProgress { kind: String },

    // === Backup Errors ===
    /// Snapshot could not be written.
    #[error("Backup failed: {0}")]
    Backup(String),

    // === Configuration Errors ===
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Workspace not initialized.
    #[error("Faction store not initialized: run 'fmig init' first")]
    NotInitialized,

    /// Already initialized.
    #[error("Already initialized at '{path}'")]
    AlreadyInitialized { path: PathBuf },

    // === I/O Errors ===
    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Wrapped anyhow error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MigrationError {
    /// Can the user fix this without code changes?
    #[must_use]
    pub const fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            Self::StoreNotFound { .. }
                | Self::NotInitialized
                | Self::SourceMissing { .. }
                | Self::SourceParse { .. }
                | Self::Validation { .. }
                | Self::InvalidId { .. }
                | Self::MigrationInProgress { .. }
                | Self::AlreadyInitialized { .. }
        )
    }

    /// Human-friendly suggestion for fixing this error.
    #[must_use]
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run: fmig init"),
            Self::StoreNotFound { .. } => Some("Check --db or run: fmig init"),
            Self::AlreadyInitialized { .. } => Some("Use --force to reinitialize"),
            Self::SourceMissing { .. } => {
                Some("Point the command at the source tool's data directory")
            }
            Self::MigrationInProgress { .. } => {
                Some("Wait for the running migration to finish, then run the command again")
            }
            Self::InvalidId { .. } => Some("Identifiers must be UUIDs"),
            _ => None,
        }
    }

    /// Create a validation error for a specific field.
    #[must_use]
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a store write error.
    #[must_use]
    pub fn store_write(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StoreWrite {
            entity: entity.into(),
            reason: reason.into(),
        }
    }
}

/// Result type using `MigrationError`.
pub type Result<T> = std::result::Result<T, MigrationError>;
