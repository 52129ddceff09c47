//! SHA-1 content hashes addressing CAS payloads

use binrw::{BinRead, BinWrite};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};
use std::fmt;

use crate::error::CryptoError;

/// Content hash (SHA-1 digest) identifying a raw payload in CAS storage
///
/// Equality, hashing and ordering follow the underlying byte sequence. The
/// all-zero hash is a sentinel meaning "no digest available".
#[derive(BinRead, BinWrite, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ContentHash([u8; 20]);

impl ContentHash {
    /// Size of a content hash in bytes
    pub const SIZE: usize = 20;

    /// The "no digest available" sentinel
    pub const ZERO: Self = Self([0u8; 20]);

    /// Create a content hash from raw bytes
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Create a content hash from a slice, failing unless it is exactly 20 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let array: [u8; 20] = bytes.try_into().map_err(|_| CryptoError::InvalidLength {
            expected: Self::SIZE,
            actual: bytes.len(),
        })?;
        Ok(Self(array))
    }

    /// Compute the content hash of some data
    pub fn from_data(data: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(data);
        let result = hasher.finalize();
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&result);
        Self(bytes)
    }

    /// Parse a content hash from a hex string
    pub fn from_hex(hex: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(hex, &mut bytes)?;
        Ok(Self(bytes))
    }

    /// Get raw bytes
    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Whether this is the zero sentinel
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Self::from_hex(&hex).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_content_hash_from_data() {
        let hash = ContentHash::from_data(b"abc");
        assert_eq!(hash.to_hex(), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn test_zero_sentinel() {
        assert!(ContentHash::ZERO.is_zero());
        assert!(ContentHash::default().is_zero());
        assert!(!ContentHash::from_data(b"").is_zero());
    }

    #[test]
    fn test_from_slice_rejects_wrong_length() {
        let err = ContentHash::from_slice(&[0u8; 16]).unwrap_err();
        assert!(matches!(
            err,
            CryptoError::InvalidLength {
                expected: 20,
                actual: 16
            }
        ));
    }

    #[test]
    fn test_serde_hex_round_trip() {
        let hash = ContentHash::from_data(b"serde");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", hash.to_hex()));
        let parsed: ContentHash = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, hash);
    }

    proptest! {
        #[test]
        fn ordering_follows_bytes(a in prop::array::uniform20(any::<u8>()), b in prop::array::uniform20(any::<u8>())) {
            let (ha, hb) = (ContentHash::from_bytes(a), ContentHash::from_bytes(b));
            prop_assert_eq!(ha.cmp(&hb), a.cmp(&b));
            prop_assert_eq!(ha == hb, a == b);
        }

        #[test]
        fn hex_round_trip(bytes in prop::array::uniform20(any::<u8>())) {
            let hash = ContentHash::from_bytes(bytes);
            prop_assert_eq!(ContentHash::from_hex(&hash.to_hex()).unwrap(), hash);
        }
    }
}
