//! 128-bit GUIDs identifying chunks and install chunks

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::CryptoError;

/// A GUID in Microsoft mixed-endian layout
///
/// The first three fields (`u32`, `u16`, `u16`) are stored little-endian in
/// [`Guid::as_bytes`]; the remaining eight bytes are stored as-is. Big-endian
/// platforms write the first three fields byte-swapped, which
/// [`Guid::from_bytes_endian`] undoes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Guid([u8; 16]);

impl Guid {
    /// The nil GUID
    pub const NIL: Self = Self([0u8; 16]);

    /// Create a GUID from its little-endian (on-disk, Windows) byte layout
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Create a GUID from bytes written with the given byte order
    pub fn from_bytes_endian(mut bytes: [u8; 16], big_endian: bool) -> Self {
        if big_endian {
            bytes[0..4].reverse();
            bytes[4..6].reverse();
            bytes[6..8].reverse();
        }
        Self(bytes)
    }

    /// Create a GUID from a fully byte-reversed 16-byte buffer
    pub fn from_reversed(mut bytes: [u8; 16]) -> Self {
        bytes.reverse();
        Self(bytes)
    }

    /// Parse the canonical `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx` form
    pub fn parse(text: &str) -> Result<Self, CryptoError> {
        let hex: String = text
            .trim_matches(|c| c == '{' || c == '}')
            .chars()
            .filter(|c| *c != '-')
            .collect();
        let mut raw = [0u8; 16];
        hex::decode_to_slice(&hex, &mut raw)
            .map_err(|e| CryptoError::InvalidGuid(format!("{text:?}: {e}")))?;
        Ok(Self::from_bytes_endian(raw, true))
    }

    /// Get the little-endian byte layout
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Byte layout as written by a big-endian platform
    pub fn to_bytes_endian(&self, big_endian: bool) -> [u8; 16] {
        let mut bytes = self.0;
        if big_endian {
            bytes[0..4].reverse();
            bytes[4..6].reverse();
            bytes[6..8].reverse();
        }
        bytes
    }

    /// Whether this is the nil GUID
    pub fn is_nil(&self) -> bool {
        self.0 == [0u8; 16]
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.to_bytes_endian(true);
        write!(
            f,
            "{}-{}-{}-{}-{}",
            hex::encode(&b[0..4]),
            hex::encode(&b[4..6]),
            hex::encode(&b[6..8]),
            hex::encode(&b[8..10]),
            hex::encode(&b[10..16])
        )
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({self})")
    }
}

impl Serialize for Guid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Guid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_display_mixed_endian() {
        let guid = Guid::from_bytes([
            0x33, 0x22, 0x11, 0x00, 0x55, 0x44, 0x77, 0x66, 0x88, 0x99, 0xAA, 0xBB, 0xCC, 0xDD,
            0xEE, 0xFF,
        ]);
        assert_eq!(guid.to_string(), "00112233-4455-6677-8899-aabbccddeeff");
    }

    #[test]
    fn test_parse_round_trip() {
        let text = "00112233-4455-6677-8899-aabbccddeeff";
        let guid = Guid::parse(text).unwrap();
        assert_eq!(guid.to_string(), text);
        assert_eq!(guid.as_bytes()[0], 0x33);
    }

    #[test]
    fn test_endian_variants_agree() {
        let guid = Guid::parse("{0a0b0c0d-0e0f-1011-1213-141516171819}").unwrap();
        let be = guid.to_bytes_endian(true);
        assert_eq!(Guid::from_bytes_endian(be, true), guid);
        assert_eq!(Guid::from_bytes_endian(*guid.as_bytes(), false), guid);
    }

    #[test]
    fn test_reversed() {
        let mut raw = *Guid::parse("00112233-4455-6677-8899-aabbccddeeff")
            .unwrap()
            .as_bytes();
        raw.reverse();
        assert_eq!(
            Guid::from_reversed(raw).to_string(),
            "00112233-4455-6677-8899-aabbccddeeff"
        );
    }
}
