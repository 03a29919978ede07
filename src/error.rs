use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Boot-sequence error types.
///
/// Every variant is fatal: the workload must not start. Per-request
/// rejections on the provisioning endpoint use
/// [`ProtocolError`](crate::provision::ProtocolError) instead.
#[derive(Error, Debug)]
pub enum BootError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Configuration source error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Attestation error: {0}")]
    Attestation(String),

    #[error("Storage error at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Decryption error: {0}")]
    Decryption(String),

    #[error("Missing secret: {0}")]
    MissingSecret(&'static str),

    #[error("No secrets received within {0:?}")]
    Timeout(Duration),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Provisioning transport error: {0}")]
    Transport(String),

    #[error("Application launch error: {0}")]
    Launch(String),
}

impl BootError {
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    pub fn decryption<S: Into<String>>(msg: S) -> Self {
        Self::Decryption(msg.into())
    }
}

/// Result type alias using BootError
pub type BootResult<T> = Result<T, BootError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_names_path() {
        let err = BootError::storage(
            "/key/cert.pem",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("/key/cert.pem"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn test_timeout_is_distinct() {
        let err = BootError::Timeout(Duration::from_secs(2));
        assert!(matches!(err, BootError::Timeout(d) if d == Duration::from_secs(2)));
    }
}
