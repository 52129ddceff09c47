//! Bundle error types

use thiserror::Error;

/// Errors raised while decoding binary bundles
#[derive(Debug, Error)]
pub enum BundleError {
    /// Magic matched no known constant in either byte order
    #[error("invalid bundle format: magic {0:08X} unknown in both byte orders")]
    InvalidMagic(u32),

    /// Structure inconsistent with its header
    #[error("invalid bundle format: {0}")]
    InvalidFormat(String),

    /// Data ends before the declared bundle size
    #[error("bundle truncated: need {needed} bytes, have {available}")]
    Truncated {
        /// Bytes required
        needed: usize,
        /// Bytes present
        available: usize,
    },

    /// Key lookup or decryption failure
    #[error("crypto error: {0}")]
    Crypto(#[from] cryo_crypto::CryptoError),

    /// Binary parsing error
    #[error("binary parsing error: {0}")]
    BinRw(#[from] binrw::Error),
}

impl BundleError {
    /// Whether this error means the bundle data is damaged
    pub fn is_corruption(&self) -> bool {
        !matches!(self, Self::Crypto(_))
    }
}

/// Result type for bundle operations
pub type BundleResult<T> = Result<T, BundleError>;
