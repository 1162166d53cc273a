use thiserror::Error;

/// Custom error types for SnapVault operations
#[derive(Debug, Error)]
pub enum SnapVaultError {
    /// File storage and I/O errors (the storage directory itself is the
    /// one fatal, non-recoverable case)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Save-file format errors (header lines absent or unparseable)
    #[error("Format error: {0}")]
    Format(String),

    /// Integrity digest verification failures
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Cipher transform failures (encrypt/decrypt, key loading)
    #[error("Cipher error: {0}")]
    Cipher(String),

    /// Schema registry failures (unknown tag, decode mismatch)
    #[error("Schema error: {0}")]
    Schema(String),

    /// Provider capture/restore failures
    #[error("Provider error: {0}")]
    Provider(String),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// A background save was requested while one is still in flight
    #[error("A save is already in flight")]
    SaveInFlight,
}

impl SnapVaultError {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity(msg.into())
    }

    pub fn cipher(msg: impl Into<String>) -> Self {
        Self::Cipher(msg.into())
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

impl From<std::io::Error> for SnapVaultError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
