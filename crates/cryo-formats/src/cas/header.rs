//! Packed 64-bit block header
//!
//! ```text
//! 63      56 55                32 31      24 23    20 19                0
//! +---------+--------------------+----------+--------+-------------------+
//! |  flags  |  decompressed size | comp tag |   7    |  compressed size  |
//! +---------+--------------------+----------+--------+-------------------+
//! ```
//!
//! Written big-endian. Bit 7 of the compression tag marks an obfuscated
//! payload.

use binrw::io::{Read, Seek, Write};
use binrw::{BinRead, BinResult, BinWrite};

use super::compression::CompressionType;
use super::error::{CasError, CasResult};

/// Fixed value of the header's sentinel nibble
pub const BLOCK_SENTINEL: u8 = 7;

/// Size of an encoded header in bytes
pub const BLOCK_HEADER_SIZE: usize = 8;

/// Largest decompressed size a header can describe
pub const MAX_DECOMPRESSED_SIZE: u32 = 0x00FF_FFFF;

/// Largest compressed size a header can describe
pub const MAX_COMPRESSED_SIZE: u32 = 0x000F_FFFF;

/// Tag bit marking an obfuscated payload
pub const OBFUSCATED_BIT: u8 = 0x80;

/// Decoded block header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Codec-specific flags (non-zero selects zstd dictionary mode)
    pub flags: u8,
    /// Bytes this block produces
    pub decompressed_size: u32,
    /// Raw compression tag including the obfuscation bit
    pub tag: u8,
    /// Declared payload size
    pub compressed_size: u32,
}

impl BlockHeader {
    /// Build a header for a payload
    pub fn new(
        compression: CompressionType,
        flags: u8,
        decompressed_size: u32,
        compressed_size: u32,
    ) -> Self {
        Self {
            flags,
            decompressed_size,
            tag: compression.tag(),
            compressed_size,
        }
    }

    /// Decode a packed header, checking the sentinel nibble
    pub fn from_packed(packed: u64) -> CasResult<Self> {
        let sentinel = ((packed >> 20) & 0xF) as u8;
        if sentinel != BLOCK_SENTINEL {
            return Err(CasError::Corrupt(format!(
                "block header sentinel is {sentinel}, expected {BLOCK_SENTINEL} (header {packed:016X})"
            )));
        }

        Ok(Self {
            flags: (packed >> 56) as u8,
            decompressed_size: ((packed >> 32) & u64::from(MAX_DECOMPRESSED_SIZE)) as u32,
            tag: (packed >> 24) as u8,
            compressed_size: (packed & u64::from(MAX_COMPRESSED_SIZE)) as u32,
        })
    }

    /// Encode into the packed form
    pub fn to_packed(&self) -> u64 {
        (u64::from(self.flags) << 56)
            | (u64::from(self.decompressed_size & MAX_DECOMPRESSED_SIZE) << 32)
            | (u64::from(self.tag) << 24)
            | (u64::from(BLOCK_SENTINEL) << 20)
            | u64::from(self.compressed_size & MAX_COMPRESSED_SIZE)
    }

    /// Whether the payload is XOR-obfuscated
    pub fn is_obfuscated(&self) -> bool {
        self.tag & OBFUSCATED_BIT != 0
    }

    /// Compression codec with the obfuscation bit removed
    pub fn compression(&self) -> CasResult<CompressionType> {
        CompressionType::from_tag(self.tag & !OBFUSCATED_BIT)
    }

    /// Number of payload bytes following the header
    ///
    /// Uncompressed blocks store exactly their decompressed size regardless of
    /// the compressed size field.
    pub fn payload_size(&self) -> usize {
        if self.tag & !OBFUSCATED_BIT == CompressionType::None.tag() {
            self.decompressed_size as usize
        } else {
            self.compressed_size as usize
        }
    }
}

impl BinRead for BlockHeader {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        _endian: binrw::Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let pos = reader.stream_position()?;
        let packed = u64::read_options(reader, binrw::Endian::Big, ())?;
        Self::from_packed(packed).map_err(|e| binrw::Error::Custom {
            pos,
            err: Box::new(e),
        })
    }
}

impl BinWrite for BlockHeader {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        _endian: binrw::Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        self.to_packed()
            .write_options(writer, binrw::Endian::Big, ())
    }
}

/// Read a header from any byte reader
pub(crate) fn read_header<R: Read>(reader: &mut R) -> CasResult<BlockHeader> {
    let mut raw = [0u8; BLOCK_HEADER_SIZE];
    reader.read_exact(&mut raw)?;
    BlockHeader::from_packed(u64::from_be_bytes(raw))
}
