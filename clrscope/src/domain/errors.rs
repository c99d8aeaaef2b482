//! Structured error types for clrscope
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! Correlation itself never fails; these cover the replay input and the export
//! output around it.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("Failed to parse trace record on line {line}: {source}")]
    InvalidRecord {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to read trace input: {0}")]
    ReadFailed(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_record_display() {
        let source = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let err = ReplayError::InvalidRecord { line: 12, source };
        assert!(err.to_string().starts_with("Failed to parse trace record on line 12"));
    }

    #[test]
    fn test_io_error_converts() {
        let err: ReplayError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(err.to_string().contains("gone"));
    }
}
