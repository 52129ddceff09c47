//! Error types for cryptographic operations

use thiserror::Error;

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Invalid key size
    #[error("Invalid key size: expected {expected}, got {actual}")]
    InvalidKeySize {
        /// Expected key size in bytes
        expected: usize,
        /// Actual key size in bytes
        actual: usize,
    },

    /// Key not found
    #[error("Encryption key not found: {0}")]
    KeyNotFound(String),

    /// Invalid key format
    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    /// Invalid hash or GUID length
    #[error("Invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Expected length in bytes
        expected: usize,
        /// Actual length in bytes
        actual: usize,
    },

    /// Malformed GUID text
    #[error("Invalid GUID: {0}")]
    InvalidGuid(String),

    /// Data could not be decrypted
    #[error("Decryption failed: {0}")]
    Decryption(String),
}
