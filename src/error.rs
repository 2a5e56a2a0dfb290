//! Structured error types for the metrics engine.

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Input validation
    InvalidDuration,
    UnknownUnit,
    UnknownPhase,
    UnknownDefectType,
    UnknownField,
    InvalidFieldValue,

    // Not found
    DefectNotFound,
    DefectNumberConflict,
    LineOutOfRange,

    // Source files
    ReadFailed,
    Undecodable,

    // Internal
    StorageError,
}

/// Domain failures surfaced by the engine.
#[derive(Debug, Error)]
pub enum PspError {
    #[error("invalid duration: {input:?} is not a number")]
    InvalidDuration { input: String },

    #[error("unknown time unit: {unit:?} (expected s, m or h)")]
    UnknownUnit { unit: String },

    #[error("unknown phase: {0:?}")]
    UnknownPhase(String),

    #[error("unknown defect type code: {0}")]
    UnknownDefectType(i64),

    #[error("unknown defect field: {0:?}")]
    UnknownField(String),

    #[error("invalid value for {field}: {value:?}")]
    InvalidValue { field: String, value: String },

    #[error("defect not found: {0}")]
    DefectNotFound(String),

    #[error("defect number {number} is taken by {existing}, cannot store {incoming}")]
    NumberConflict {
        number: i64,
        existing: String,
        incoming: String,
    },

    #[error("failed to read {}: {source}", path.display())]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is not valid UTF-8 text", path.display())]
    Undecodable { path: PathBuf },

    #[error("line {lineno} is out of range for {} ({lines} lines)", path.display())]
    LineOutOfRange {
        path: PathBuf,
        lineno: usize,
        lines: usize,
    },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl PspError {
    pub fn invalid_value(field: &str, value: &str) -> Self {
        PspError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            PspError::InvalidDuration { .. } => ErrorCode::InvalidDuration,
            PspError::UnknownUnit { .. } => ErrorCode::UnknownUnit,
            PspError::UnknownPhase(_) => ErrorCode::UnknownPhase,
            PspError::UnknownDefectType(_) => ErrorCode::UnknownDefectType,
            PspError::UnknownField(_) => ErrorCode::UnknownField,
            PspError::InvalidValue { .. } => ErrorCode::InvalidFieldValue,
            PspError::DefectNotFound(_) => ErrorCode::DefectNotFound,
            PspError::NumberConflict { .. } => ErrorCode::DefectNumberConflict,
            PspError::ReadFailed { .. } => ErrorCode::ReadFailed,
            PspError::Undecodable { .. } => ErrorCode::Undecodable,
            PspError::LineOutOfRange { .. } => ErrorCode::LineOutOfRange,
            PspError::Storage(_) => ErrorCode::StorageError,
        }
    }

    /// Input-validation failures are the caller's fault and safe to retry
    /// with corrected input.
    pub fn is_validation(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::InvalidDuration
                | ErrorCode::UnknownUnit
                | ErrorCode::UnknownPhase
                | ErrorCode::UnknownDefectType
                | ErrorCode::UnknownField
                | ErrorCode::InvalidFieldValue
        )
    }
}

/// Structured error body for JSON output.
#[derive(Debug, Serialize)]
pub struct ErrorReport {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorReport {
    /// Build a report from any error, recovering the domain code when the
    /// chain carries a `PspError`.
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let code = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<PspError>())
            .map(PspError::code)
            .unwrap_or(ErrorCode::StorageError);
        Self {
            code,
            message: format!("{:#}", err),
        }
    }
}

/// Result type for domain operations.
pub type PspResult<T> = std::result::Result<T, PspError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_recovers_domain_code_through_context() {
        let err = anyhow::Error::new(PspError::DefectNotFound("7".into())).context("checking defect");
        let report = ErrorReport::from_anyhow(&err);
        assert_eq!(report.code, ErrorCode::DefectNotFound);
        assert!(report.message.contains("defect not found: 7"));
    }

    #[test]
    fn validation_errors_are_flagged() {
        assert!(PspError::UnknownUnit { unit: "d".into() }.is_validation());
        assert!(!PspError::DefectNotFound("x".into()).is_validation());
    }
}
