//! Structured error output for scripted callers.
//!
//! Provides machine-parseable error information with:
//! - Error codes for categorization
//! - Hints for self-correction
//! - Retryability flags
//! - Context for debugging

use crate::error::MigrationError;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Machine-readable error codes.
///
/// These codes are stable and can be used for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // === Store Errors (exit code 2) ===
    StoreNotFound,
    DatabaseError,
    NotInitialized,
    AlreadyInitialized,
    StoreWriteFailed,

    // === Faction/Zone Errors (exit code 3) ===
    FactionNotFound,
    ZoneConflict,
    InvalidId,

    // === Validation Errors (exit code 4) ===
    ValidationFailed,

    // === Source Errors (exit code 5) ===
    SourceMissing,
    SourceParseError,

    // === Migration Errors (exit code 6) ===
    MigrationInProgress,
    BackupFailed,

    // === Config Errors (exit code 7) ===
    ConfigError,

    // === I/O Errors (exit code 8) ===
    IoError,
    JsonError,
    YamlError,

    // === Internal Errors (exit code 1) ===
    InternalError,
}

impl ErrorCode {
    /// Get the string representation for JSON output.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::StoreNotFound => "STORE_NOT_FOUND",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::AlreadyInitialized => "ALREADY_INITIALIZED",
            Self::StoreWriteFailed => "STORE_WRITE_FAILED",
            Self::FactionNotFound => "FACTION_NOT_FOUND",
            Self::ZoneConflict => "ZONE_CONFLICT",
            Self::InvalidId => "INVALID_ID",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::SourceMissing => "SOURCE_MISSING",
            Self::SourceParseError => "SOURCE_PARSE_ERROR",
            Self::MigrationInProgress => "MIGRATION_IN_PROGRESS",
            Self::BackupFailed => "BACKUP_FAILED",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::YamlError => "YAML_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Whether re-invoking the whole command might succeed.
    ///
    /// Nothing inside the engine retries; this flag is advice for the caller.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::MigrationInProgress | Self::ValidationFailed | Self::SourceParseError
        )
    }

    /// Get the exit code for this error category.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::StoreNotFound
            | Self::DatabaseError
            | Self::NotInitialized
            | Self::AlreadyInitialized
            | Self::StoreWriteFailed => 2,
            Self::FactionNotFound | Self::ZoneConflict | Self::InvalidId => 3,
            Self::ValidationFailed => 4,
            Self::SourceMissing | Self::SourceParseError => 5,
            Self::MigrationInProgress | Self::BackupFailed => 6,
            Self::ConfigError => 7,
            Self::IoError | Self::JsonError | Self::YamlError => 8,
            Self::InternalError => 1,
        }
    }
}

/// Structured error for machine-parseable output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Machine-readable error code
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Optional hint for fixing the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Whether the operation can be retried
    pub retryable: bool,
    /// Additional context data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl StructuredError {
    /// Create a new structured error from a `MigrationError`.
    #[must_use]
    pub fn from_error(err: &MigrationError) -> Self {
        let (code, context) = Self::extract_code_and_context(err);
        Self {
            code,
            message: err.to_string(),
            hint: err.suggestion().map(str::to_string),
            retryable: code.is_retryable(),
            context,
        }
    }

    /// Serialize to JSON value.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "error": {
                "code": self.code.as_str(),
                "message": self.message,
                "hint": self.hint,
                "retryable": self.retryable,
                "context": self.context,
            }
        })
    }

    /// Format for human-readable output.
    #[must_use]
    pub fn to_human(&self, color: bool) -> String {
        let mut output = String::new();

        if color {
            output.push_str("\x1b[31mError:\x1b[0m ");
        } else {
            output.push_str("Error: ");
        }
        output.push_str(&self.message);

        if let Some(hint) = &self.hint {
            output.push('\n');
            if color {
                output.push_str("\x1b[33mHint:\x1b[0m ");
            } else {
                output.push_str("Hint: ");
            }
            output.push_str(hint);
        }

        output
    }

    fn extract_code_and_context(err: &MigrationError) -> (ErrorCode, Option<Value>) {
        match err {
            MigrationError::StoreNotFound { path } => (
                ErrorCode::StoreNotFound,
                Some(json!({"path": path.display().to_string()})),
            ),
            MigrationError::Database(_) => (ErrorCode::DatabaseError, None),
            MigrationError::FactionNotFound { id } => {
                (ErrorCode::FactionNotFound, Some(json!({"id": id})))
            }
            MigrationError::StoreWrite { entity, reason } => (
                ErrorCode::StoreWriteFailed,
                Some(json!({"entity": entity, "reason": reason})),
            ),
            MigrationError::ZoneConflict { name, reason } => (
                ErrorCode::ZoneConflict,
                Some(json!({"zone": name, "reason": reason})),
            ),
            MigrationError::SourceMissing { path } => (
                ErrorCode::SourceMissing,
                Some(json!({"path": path.display().to_string()})),
            ),
            MigrationError::SourceParse { file, line, reason } => (
                ErrorCode::SourceParseError,
                Some(json!({"file": file, "line": line, "reason": reason})),
            ),
            MigrationError::Validation { field, reason } => (
                ErrorCode::ValidationFailed,
                Some(json!({"field": field, "reason": reason})),
            ),
            MigrationError::InvalidId { id } => (ErrorCode::InvalidId, Some(json!({"id": id}))),
            MigrationError::MigrationInProgress { kind } => (
                ErrorCode::MigrationInProgress,
                Some(json!({"kind": kind})),
            ),
            MigrationError::Backup(_) => (ErrorCode::BackupFailed, None),
            MigrationError::Config(_) => (ErrorCode::ConfigError, None),
            MigrationError::NotInitialized => (ErrorCode::NotInitialized, None),
            MigrationError::AlreadyInitialized { path } => (
                ErrorCode::AlreadyInitialized,
                Some(json!({"path": path.display().to_string()})),
            ),
            MigrationError::Io(_) => (ErrorCode::IoError, None),
            MigrationError::Json(_) => (ErrorCode::JsonError, None),
            MigrationError::Yaml(_) => (ErrorCode::YamlError, None),
            MigrationError::Other(_) => (ErrorCode::InternalError, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_as_str() {
        assert_eq!(ErrorCode::MigrationInProgress.as_str(), "MIGRATION_IN_PROGRESS");
        assert_eq!(ErrorCode::SourceMissing.as_str(), "SOURCE_MISSING");
    }

    #[test]
    fn test_error_code_exit_codes() {
        assert_eq!(ErrorCode::InternalError.exit_code(), 1);
        assert_eq!(ErrorCode::DatabaseError.exit_code(), 2);
        assert_eq!(ErrorCode::SourceMissing.exit_code(), 5);
        assert_eq!(ErrorCode::MigrationInProgress.exit_code(), 6);
    }

    #[test]
    fn test_structured_error_to_json() {
        let err = MigrationError::MigrationInProgress {
            kind: "directory".to_string(),
        };
        let structured = StructuredError::from_error(&err);
        let json = structured.to_json();
        assert_eq!(json["error"]["code"], "MIGRATION_IN_PROGRESS");
        assert_eq!(json["error"]["retryable"], true);
        assert_eq!(json["error"]["context"]["kind"], "directory");
    }

    #[test]
    fn test_to_human_output() {
        let structured = StructuredError::from_error(&MigrationError::NotInitialized);
        let human = structured.to_human(false);
        assert!(human.starts_with("Error: Faction store not initialized"));
        assert!(human.contains("Hint: Run: fmig init"));
    }
}
