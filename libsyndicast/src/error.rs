//! Error types for Syndicast

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyndicastError>;

#[derive(Error, Debug)]
pub enum SyndicastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Vault error: {0}")]
    Vault(#[from] VaultError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl SyndicastError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            SyndicastError::InvalidInput(_) => 3,
            SyndicastError::Platform(PlatformError::Auth(_)) => 2,
            SyndicastError::Platform(_) => 1,
            SyndicastError::Config(_) => 1,
            SyndicastError::Database(_) => 1,
            SyndicastError::Vault(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),
}

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: incorrect passphrase or corrupted ciphertext")]
    DecryptionFailed,

    #[error("Credential payload is not valid JSON: {0}")]
    Malformed(String),
}

/// Normalized platform failure, the only error shape the scheduler sees.
///
/// Adapters map every raised condition into one of these variants before it
/// crosses the adapter boundary. `is_retryable` is the single classification
/// the scheduler consults when deciding whether to re-enqueue.
#[derive(Error, Debug, Clone)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Content validation failed: {0}")]
    Validation(String),

    #[error("Platform rejected the request: {0}")]
    Rejected(String),

    #[error("Capability not supported: {0}")]
    NotSupported(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Timed out: {0}")]
    Timeout(String),
}

impl PlatformError {
    /// Whether a publish attempt that failed with this error may be retried.
    ///
    /// Anything not explicitly permanent is treated as retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            PlatformError::Network(_)
            | PlatformError::RateLimit(_)
            | PlatformError::Timeout(_) => true,
            PlatformError::Auth(_)
            | PlatformError::Validation(_)
            | PlatformError::Rejected(_)
            | PlatformError::NotSupported(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_invalid_input() {
        let error = SyndicastError::InvalidInput("Empty content".to_string());
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_auth_error() {
        let error = SyndicastError::Platform(PlatformError::Auth("token revoked".to_string()));
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_other_platform_errors() {
        for e in [
            PlatformError::Validation("too long".to_string()),
            PlatformError::Rejected("policy".to_string()),
            PlatformError::NotSupported("dm".to_string()),
            PlatformError::Network("refused".to_string()),
            PlatformError::RateLimit("429".to_string()),
            PlatformError::Timeout("60s".to_string()),
        ] {
            assert_eq!(SyndicastError::Platform(e).exit_code(), 1);
        }
    }

    #[test]
    fn test_retryable_classification() {
        assert!(PlatformError::Network("conn reset".to_string()).is_retryable());
        assert!(PlatformError::RateLimit("slow down".to_string()).is_retryable());
        assert!(PlatformError::Timeout("media poll".to_string()).is_retryable());

        assert!(!PlatformError::Auth("revoked".to_string()).is_retryable());
        assert!(!PlatformError::Validation("empty".to_string()).is_retryable());
        assert!(!PlatformError::Rejected("policy violation".to_string()).is_retryable());
        assert!(!PlatformError::NotSupported("no DMs".to_string()).is_retryable());
    }

    #[test]
    fn test_error_message_formatting() {
        let error = SyndicastError::Platform(PlatformError::Rejected(
            "duplicate content".to_string(),
        ));
        assert_eq!(
            format!("{}", error),
            "Platform error: Platform rejected the request: duplicate content"
        );
    }

    #[test]
    fn test_error_conversion_from_platform_error() {
        let platform_error = PlatformError::Network("test".to_string());
        let error: SyndicastError = platform_error.into();
        assert!(matches!(error, SyndicastError::Platform(_)));
    }

    #[test]
    fn test_platform_error_clone() {
        // Cloneability is required by the retry logic
        let original = PlatformError::Network("Connection failed".to_string());
        let cloned = original.clone();
        assert_eq!(format!("{}", original), format!("{}", cloned));
    }
}
