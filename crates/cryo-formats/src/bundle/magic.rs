//! Bundle magic values and byte-order probing
//!
//! The first header word is XORed with a per-title salt. Byte order is not
//! recorded anywhere, so the word is tried big-endian first and then
//! little-endian.

use binrw::Endian;

/// Salt used by titles before Frostbite 2017
pub const SALT_PECM: u32 = 0x7065_636D;

/// Salt used by titles from Frostbite 2017 on
pub const SALT_PECN: u32 = 0x7065_636E;

/// Salt used by the one title that differs from the year rule
pub const SALT_ARIE: u32 = 0x6172_6965;

/// Known bundle magics, after salt removal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum BundleMagic {
    /// Standard bundle carrying a SHA-1 table
    Standard = 0xED1C_EDB8,
    /// Bundle written by Kelvin-era titles, without SHA-1s
    Kelvin = 0xC388_9333,
    /// Bundle whose body is AES encrypted
    Encrypted = 0xC3E5_D5C3,
}

impl BundleMagic {
    /// Match a salt-free magic value
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0xED1C_EDB8 => Some(Self::Standard),
            0xC388_9333 => Some(Self::Kelvin),
            0xC3E5_D5C3 => Some(Self::Encrypted),
            _ => None,
        }
    }

    /// Raw magic value
    pub fn value(self) -> u32 {
        self as u32
    }

    /// Whether entries carry SHA-1s in the leading table
    pub fn has_sha1(self) -> bool {
        self == Self::Standard
    }
}

/// Detect magic and byte order from the four magic bytes
pub fn probe_magic(raw: [u8; 4], salt: u32) -> Option<(BundleMagic, Endian)> {
    BundleMagic::from_u32(u32::from_be_bytes(raw) ^ salt)
        .map(|magic| (magic, Endian::Big))
        .or_else(|| {
            BundleMagic::from_u32(u32::from_le_bytes(raw) ^ salt).map(|magic| (magic, Endian::Little))
        })
}

/// Encode a magic for the given byte order
pub fn encode_magic(magic: BundleMagic, salt: u32, endian: Endian) -> [u8; 4] {
    let salted = magic.value() ^ salt;
    match endian {
        Endian::Big => salted.to_be_bytes(),
        Endian::Little => salted.to_le_bytes(),
    }
}
