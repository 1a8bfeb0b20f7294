//! Application-wide error types.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a stream could not be brought to the ready state.
///
/// Cloned to every request coalesced on the failing start, so it only
/// carries owned, cheap-to-clone data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StartError {
    #[error("source unreachable: {0}")]
    SourceUnreachable(String),

    #[error("manifest not ready after {0:?}")]
    ReadinessTimeout(Duration),

    #[error("output store unavailable: {0}")]
    Output(String),
}

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Stream {name} failed to start: {source}")]
    Start {
        name: String,
        #[source]
        source: StartError,
    },

    #[error("Unknown stream: {0}")]
    UnknownStream(String),

    #[error("Invalid stream name: {0:?}")]
    InvalidStreamName(String),

    #[error("Stream manager is shutting down")]
    ShuttingDown,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error while {op} ({path}): {source}")]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid sources file: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn start(name: impl Into<String>, source: StartError) -> Self {
        Self::Start {
            name: name.into(),
            source,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    /// The start failure behind this error, if any.
    pub fn start_error(&self) -> Option<&StartError> {
        match self {
            Self::Start { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_error_display() {
        let err = Error::start("cam1", StartError::SourceUnreachable("exit 1".into()));
        assert_eq!(
            err.to_string(),
            "Stream cam1 failed to start: source unreachable: exit 1"
        );
        assert_eq!(
            err.start_error(),
            Some(&StartError::SourceUnreachable("exit 1".into()))
        );
    }

    #[test]
    fn test_io_path_keeps_context() {
        let err = Error::io_path(
            "clearing stream output",
            Path::new("/dev/shm/camrelay/cam1"),
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        let msg = err.to_string();
        assert!(msg.contains("clearing stream output"));
        assert!(msg.contains("/dev/shm/camrelay/cam1"));
        assert!(err.start_error().is_none());
    }
}
