//! Error type shared by key modules, the graph walker, and operator surfaces.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias used throughout the workspace.
pub type KeymodResult<T> = Result<T, KeymodError>;

/// Everything that can go wrong while resolving, wrapping, or unwrapping a mount key.
#[derive(Debug, Error)]
pub enum KeymodError {
    /// Missing or invalid parameter, absent passphrase source, unknown module alias.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O failure tied to a specific key or passphrase file.
    #[error("unable to access {path}: {source}")]
    KeyFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Wrong passphrase, malformed PEM, or an OAEP padding mismatch.
    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("malformed key module blob: {0}")]
    MalformedBlob(String),

    /// The key module does not implement the operation, or the host lacks the capability.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    #[error("failed to parse TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("failed to serialise TOML configuration: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("failed to parse YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl KeymodError {
    /// Attach `path` to an I/O error raised while touching a key or passphrase file.
    pub fn key_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        KeymodError::KeyFile {
            path: path.into(),
            source,
        }
    }

    /// True when the error only reports an absent optional operation.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, KeymodError::Unsupported(_))
    }
}
