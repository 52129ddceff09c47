//! DbObject error types

use thiserror::Error;

/// Errors raised while reading or querying DbObject documents
#[derive(Debug, Error)]
pub enum DbObjectError {
    /// Type byte not part of the format
    #[error("unknown DbObject type 0x{0:02X} at offset {1}")]
    UnknownType(u8, usize),

    /// Document ended inside a value
    #[error("DbObject truncated at offset {0}")]
    Truncated(usize),

    /// Container size prefix disagrees with its contents
    #[error("container at offset {offset} declares {declared} bytes, contents span {actual}")]
    SizeMismatch {
        /// Offset of the container's first entry
        offset: usize,
        /// Size from the prefix
        declared: usize,
        /// Bytes actually consumed
        actual: usize,
    },

    /// Variable-length integer does not fit in 64 bits
    #[error("malformed length prefix at offset {0}")]
    BadLength(usize),

    /// Nesting beyond the supported depth
    #[error("DbObject nesting exceeds {0} levels")]
    TooDeep(usize),

    /// Required key absent
    #[error("missing key {0:?}")]
    Missing(String),

    /// Value of an unexpected type
    #[error("key {key:?} holds {found}, expected {expected}")]
    TypeMismatch {
        /// Key or list position
        key: String,
        /// Requested type
        expected: &'static str,
        /// Type found in the document
        found: &'static str,
    },
}

/// Result type for DbObject operations
pub type DbObjectResult<T> = Result<T, DbObjectError>;
