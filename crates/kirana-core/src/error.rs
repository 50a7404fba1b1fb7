use thiserror::Error;

/// Top-level error type for the Kirana system.
///
/// Each variant wraps a subsystem-specific error. Subsystem crates define
/// their own error types and implement `From<SubsystemError> for KiranaError`
/// so that the `?` operator works seamlessly across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KiranaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for KiranaError {
    fn from(err: toml::de::Error) -> Self {
        KiranaError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for KiranaError {
    fn from(err: toml::ser::Error) -> Self {
        KiranaError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for KiranaError {
    fn from(err: serde_json::Error) -> Self {
        KiranaError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Kirana operations.
pub type Result<T> = std::result::Result<T, KiranaError>;
