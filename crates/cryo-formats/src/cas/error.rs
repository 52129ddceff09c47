//! CAS block error types

use thiserror::Error;

use crate::block::BufferOverflow;

/// Errors raised while decoding CAS block streams
#[derive(Debug, Error)]
pub enum CasError {
    /// Stream structure violated (bad sentinel, size mismatch, bad opcode)
    #[error("corrupt CAS data: {0}")]
    Corrupt(String),

    /// Compression tag not known to this decoder
    #[error("unsupported compression type: 0x{0:02X}")]
    NotSupported(u8),

    /// Feature present in the data but not usable with the current setup
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// Payload codec failure
    #[error("{codec} decompression failed: {reason}")]
    Compression {
        /// Codec name
        codec: &'static str,
        /// Codec error text
        reason: String,
    },

    /// Key lookup or decryption failure
    #[error("crypto error: {0}")]
    Crypto(#[from] cryo_crypto::CryptoError),

    /// Output buffer overflow
    #[error("corrupt CAS data: {0}")]
    Overflow(#[from] BufferOverflow),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CasError {
    /// Whether this error means the data itself is damaged
    pub fn is_corruption(&self) -> bool {
        match self {
            Self::Corrupt(_) | Self::Overflow(_) | Self::Compression { .. } => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::UnexpectedEof,
            _ => false,
        }
    }

    /// Whether this error means the data uses something this build cannot decode
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::NotSupported(_) | Self::UnsupportedFeature(_))
    }
}

/// Result type for CAS operations
pub type CasResult<T> = Result<T, CasError>;
