//! Typed error hierarchy for the context engine.
//!
//! Almost every public operation in this crate is best-effort and never
//! surfaces an error to the host. The exceptions are the constructors that
//! open durable storage or parse configuration: those report
//! [`EngineError`] so the host can refuse to start.

use std::path::PathBuf;
use thiserror::Error;

/// Irrecoverable initialization failures.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Data directory {path} cannot be created or opened: {source}")]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not determine home directory for the default data dir")]
    NoHomeDir,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_unavailable_carries_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = EngineError::StorageUnavailable {
            path: PathBuf::from("/nope/ctxwatch"),
            source: io_err,
        };
        match &err {
            EngineError::StorageUnavailable { path, source } => {
                assert_eq!(path, &PathBuf::from("/nope/ctxwatch"));
                assert_eq!(source.kind(), std::io::ErrorKind::PermissionDenied);
            }
            _ => panic!("Expected StorageUnavailable"),
        }
        assert!(err.to_string().contains("/nope/ctxwatch"));
    }

    #[test]
    fn invalid_config_message_is_displayed() {
        let err = EngineError::InvalidConfig("warning_ratio must be below 1.0".into());
        assert!(err.to_string().contains("warning_ratio"));
    }

    #[test]
    fn config_parse_carries_path() {
        let source = toml::from_str::<toml::Table>("[capacity").unwrap_err();
        let err = EngineError::ConfigParse {
            path: PathBuf::from("/etc/ctxwatch.toml"),
            source,
        };
        assert!(err.to_string().contains("/etc/ctxwatch.toml"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn implements_std_error() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&EngineError::NoHomeDir);
    }
}
