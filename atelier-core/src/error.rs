//! Error types for atelier operations

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum AtelierError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Search query cannot be empty")]
    EmptyQuery,

    #[error("Search queries must be at most {max} characters")]
    QueryTooLong { max: usize },

    #[error("Use at most {max} tokens for search queries")]
    QueryTooComplex { max: usize },

    #[error("Each search token must be under {max} characters")]
    TokenTooLong { max: usize },

    #[error("Search query must contain at least one non-wildcard term")]
    QueryTooGeneral,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Directory not found: {}", .0.display())]
    DirNotFound(PathBuf),

    #[error("Not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("Database error: {0}")]
    Db(String),

    #[error("FTS repair failed: {0}")]
    FtsRepairFailed(String),

    #[error("Unable to inspect schema: {0}")]
    PragmaFailed(String),

    #[error("{tool} not found in PATH")]
    ToolMissing { tool: &'static str },

    #[error("exiftool error: {0}")]
    Exiftool(String),

    #[error("ffprobe error: {0}")]
    Ffprobe(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Unsupported file type: {}", .0.display())]
    Unsupported(PathBuf),

    #[error("Failed to stat file: {0}")]
    StatFailed(String),

    #[error("Insert failed: {0}")]
    InsertFailed(String),

    #[error("Update failed: {0}")]
    UpdateFailed(String),

    #[error("Scan failed: {0}")]
    ScanFailed(String),

    #[error("Config parse error: {0}")]
    ConfigParse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AtelierError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::InvalidJson(_) => "INVALID_JSON",
            Self::EmptyQuery => "EMPTY_QUERY",
            Self::QueryTooLong { .. } => "QUERY_TOO_LONG",
            Self::QueryTooComplex { .. } => "QUERY_TOO_COMPLEX",
            Self::TokenTooLong { .. } => "TOKEN_TOO_LONG",
            Self::QueryTooGeneral => "QUERY_TOO_GENERAL",
            Self::NotFound(_) => "NOT_FOUND",
            Self::DirNotFound(_) => "DIR_NOT_FOUND",
            Self::NotADirectory(_) => "NOT_A_DIRECTORY",
            Self::Db(_) => "DB_ERROR",
            Self::FtsRepairFailed(_) => "FTS_REPAIR_FAILED",
            Self::PragmaFailed(_) => "PRAGMA_FAILED",
            Self::ToolMissing { .. } => "TOOL_MISSING",
            Self::Exiftool(_) => "EXIFTOOL_ERROR",
            Self::Ffprobe(_) => "FFPROBE_ERROR",
            Self::Parse(_) => "PARSE_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::Unsupported(_) => "UNSUPPORTED",
            Self::StatFailed(_) => "STAT_FAILED",
            Self::InsertFailed(_) => "INSERT_FAILED",
            Self::UpdateFailed(_) => "UPDATE_FAILED",
            Self::ScanFailed(_) => "SCAN_FAILED",
            Self::ConfigParse(_) => "CONFIG_PARSE",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

impl From<rusqlite::Error> for AtelierError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(e, ref msg) = err {
            if e.code == rusqlite::ErrorCode::OperationInterrupted {
                return Self::Timeout(
                    msg.clone()
                        .unwrap_or_else(|| "database operation interrupted (query timeout)".into()),
                );
            }
        }
        Self::Db(err.to_string())
    }
}

/// Metadata completeness tag.
///
/// `Degraded` marks rows written from a failed extraction; for ordering
/// purposes it sits alongside `None` so it never blocks an upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    #[default]
    None,
    Degraded,
    Partial,
    Full,
}

impl Quality {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Degraded => "degraded",
            Self::Partial => "partial",
            Self::Full => "full",
        }
    }

    /// Upgrade to `other` without ever downgrading.
    pub fn bump(&mut self, other: Quality) {
        if other > *self {
            *self = other;
        }
    }

    pub fn parse(s: &str) -> Quality {
        match s {
            "full" => Self::Full,
            "partial" => Self::Partial,
            "degraded" => Self::Degraded,
            _ => Self::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_bump_never_downgrades() {
        let mut q = Quality::Full;
        q.bump(Quality::Partial);
        assert_eq!(q, Quality::Full);

        let mut q = Quality::None;
        q.bump(Quality::Partial);
        assert_eq!(q, Quality::Partial);
        q.bump(Quality::Full);
        assert_eq!(q, Quality::Full);
    }

    #[test]
    fn test_quality_degraded_upgrades_to_partial() {
        let mut q = Quality::Degraded;
        q.bump(Quality::Partial);
        assert_eq!(q, Quality::Partial);
    }

    #[test]
    fn test_error_codes_stable() {
        assert_eq!(AtelierError::EmptyQuery.code(), "EMPTY_QUERY");
        assert_eq!(AtelierError::Db("x".into()).code(), "DB_ERROR");
        assert_eq!(
            AtelierError::ToolMissing { tool: "exiftool" }.code(),
            "TOOL_MISSING"
        );
    }
}
