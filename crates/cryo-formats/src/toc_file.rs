//! Signed and obfuscated TOC containers
//!
//! Layout, TOC and initfs files may be wrapped in a 0x22C-byte signature
//! header:
//!
//! | Magic         | Payload |
//! |---------------|---------|
//! | `00 D1 CE 00` | plain, follows the header |
//! | `00 D1 CE 01` | XOR-obfuscated with a 257-byte key stored at 0x128 |
//!
//! Files without either magic are plain documents.

use std::borrow::Cow;

use thiserror::Error;

/// Magic of a signed container
pub const SIGNED_MAGIC: [u8; 4] = [0x00, 0xD1, 0xCE, 0x00];

/// Magic of a signed and obfuscated container
pub const OBFUSCATED_MAGIC: [u8; 4] = [0x00, 0xD1, 0xCE, 0x01];

/// Size of the signature header
pub const HEADER_SIZE: usize = 0x22C;

/// Offset of the obfuscation key in the header
pub const KEY_OFFSET: usize = 0x128;

/// Length of the obfuscation key
pub const KEY_LEN: usize = 257;

const KEY_MASK: u8 = 0x7B;

/// TOC container errors
#[derive(Debug, Error)]
pub enum TocError {
    /// File too short for its signature header
    #[error("signed TOC is {0} bytes, shorter than its 0x22C-byte header")]
    Truncated(usize),
}

/// Result type for TOC container operations
pub type TocResult<T> = Result<T, TocError>;

/// Kind of wrapper around a TOC payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TocContainer {
    /// No header
    Plain,
    /// Signature header, plain payload
    Signed,
    /// Signature header, obfuscated payload
    Obfuscated,
}

impl TocContainer {
    /// Detect the wrapper from the leading bytes
    pub fn detect(data: &[u8]) -> Self {
        match data.get(..4) {
            Some(magic) if magic == SIGNED_MAGIC => Self::Signed,
            Some(magic) if magic == OBFUSCATED_MAGIC => Self::Obfuscated,
            _ => Self::Plain,
        }
    }
}

/// Strip the wrapper, returning the payload
pub fn unwrap_toc(data: &[u8]) -> TocResult<Cow<'_, [u8]>> {
    let container = TocContainer::detect(data);
    if container == TocContainer::Plain {
        return Ok(Cow::Borrowed(data));
    }
    if data.len() < HEADER_SIZE {
        return Err(TocError::Truncated(data.len()));
    }

    let payload = &data[HEADER_SIZE..];
    if container == TocContainer::Signed {
        return Ok(Cow::Borrowed(payload));
    }

    let key = &data[KEY_OFFSET..KEY_OFFSET + KEY_LEN];
    Ok(Cow::Owned(
        payload
            .iter()
            .enumerate()
            .map(|(i, b)| b ^ key[i % KEY_LEN] ^ KEY_MASK)
            .collect(),
    ))
}

/// Wrap a payload; `key` is used for [`TocContainer::Obfuscated`]
pub fn wrap_toc(payload: &[u8], container: TocContainer, key: &[u8; KEY_LEN]) -> Vec<u8> {
    let mut out = match container {
        TocContainer::Plain => return payload.to_vec(),
        TocContainer::Signed => SIGNED_MAGIC.to_vec(),
        TocContainer::Obfuscated => OBFUSCATED_MAGIC.to_vec(),
    };
    out.resize(HEADER_SIZE, 0);

    if container == TocContainer::Obfuscated {
        out[KEY_OFFSET..KEY_OFFSET + KEY_LEN].copy_from_slice(key);
        out.extend(
            payload
                .iter()
                .enumerate()
                .map(|(i, b)| b ^ key[i % KEY_LEN] ^ KEY_MASK),
        );
    } else {
        out.extend_from_slice(payload);
    }
    out
}
