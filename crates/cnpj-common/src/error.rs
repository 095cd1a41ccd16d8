//! Error types shared across the CNPJ loader

use std::path::Path;
use thiserror::Error;

/// Result type alias for CNPJ loader operations
pub type Result<T> = std::result::Result<T, CnpjError>;

/// Main error type for source-file and configuration failures
#[derive(Error, Debug)]
pub enum CnpjError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error on {path}: {source}")]
    FileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed source file {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CnpjError {
    /// Wrap an IO error with the file it happened on
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::FileIo {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    /// Create a parse error for a source file
    pub fn parse(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.as_ref().display().to_string(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_keeps_path() {
        let err = CnpjError::io(
            "/data/K3241.EMPRECSV",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        let msg = err.to_string();
        assert!(msg.contains("/data/K3241.EMPRECSV"));
        assert!(msg.contains("gone"));
    }

    #[test]
    fn test_parse_error_message() {
        let err = CnpjError::parse("a.csv", "unterminated quote");
        assert_eq!(
            err.to_string(),
            "Malformed source file a.csv: unterminated quote"
        );
    }
}
