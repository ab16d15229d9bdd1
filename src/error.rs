//! Error types for geoip-tools.

use std::path::PathBuf;

use thiserror::Error;

use crate::kind::DatabaseKind;

/// Error type for geoip-tools operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A database file could not be opened as a lookup handle
    #[error("cannot load {kind} database from {path:?}: {reason}")]
    CannotLoad {
        kind: DatabaseKind,
        path: PathBuf,
        reason: String,
    },

    /// A configured download URL is malformed or uses an unsupported scheme
    #[error("invalid {kind} database URL {url:?}: {reason}")]
    InvalidUrl {
        kind: DatabaseKind,
        url: String,
        reason: String,
    },

    /// Requested capability combination is not supported
    #[error("invalid capability: {0}")]
    InvalidCapability(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Build a `CannotLoad` error from any displayable cause.
    pub(crate) fn cannot_load(
        kind: DatabaseKind,
        path: impl Into<PathBuf>,
        reason: impl std::fmt::Display,
    ) -> Self {
        Error::CannotLoad {
            kind,
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for geoip-tools operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cannot_load_message() {
        let err = Error::cannot_load(DatabaseKind::City, "/data/GeoLiteCity.dat", "truncated");
        let msg = err.to_string();
        assert!(msg.contains("city"));
        assert!(msg.contains("GeoLiteCity.dat"));
        assert!(msg.contains("truncated"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
