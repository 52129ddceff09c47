//! Delta decompression of patched CAS payloads
//!
//! A delta stream is a sequence of 32-bit big-endian instructions (top four
//! bits opcode, low 28 bits operand) that rebuilds a payload from the blocks
//! of a base payload and new blocks carried inline in the delta stream.
//!
//! | Op | Operand | Effect |
//! |----|---------|--------|
//! | 0  | count   | copy `count` base blocks |
//! | 1  | count   | patch one base block with `count` `{offset:u16, skip:u16}` fixes, each splicing in one delta block |
//! | 2  | length  | patch one base block with `{offset:u16, skip:u8, add:u8}` fixes and literal bytes, `length` bytes of delta |
//! | 3  | count   | copy `count` delta blocks |
//! | 4  | count   | drop `count` base blocks |
//!
//! Fix offsets are positions in the base block. Base bytes between fixes and
//! after the last fix are kept.

use std::io::{Cursor, Read};

use super::decompress::{DecodeOptions, read_block, read_block_owned};
use super::error::{CasError, CasResult};
use crate::block::ShiftBuffer;

const OPERAND_MASK: u32 = 0x0FFF_FFFF;

/// One delta instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOp {
    /// Copy whole base blocks
    CopyBase(u32),
    /// Patch one base block with this many block-sized fixes
    LargeFix(u32),
    /// Patch one base block with byte-level fixes spanning this many delta bytes
    SmallFix(u32),
    /// Copy whole delta blocks
    CopyDelta(u32),
    /// Drop whole base blocks
    SkipBase(u32),
}

impl DeltaOp {
    /// Decode a packed instruction word
    pub fn decode(word: u32) -> CasResult<Self> {
        let operand = word & OPERAND_MASK;
        match word >> 28 {
            0 => Ok(Self::CopyBase(operand)),
            1 => Ok(Self::LargeFix(operand)),
            2 => Ok(Self::SmallFix(operand)),
            3 => Ok(Self::CopyDelta(operand)),
            4 => Ok(Self::SkipBase(operand)),
            other => Err(CasError::Corrupt(format!(
                "unknown delta opcode {other} in instruction {word:08X}"
            ))),
        }
    }

    /// Encode into a packed instruction word
    pub fn encode(self) -> u32 {
        let (opcode, operand) = match self {
            Self::CopyBase(n) => (0, n),
            Self::LargeFix(n) => (1, n),
            Self::SmallFix(n) => (2, n),
            Self::CopyDelta(n) => (3, n),
            Self::SkipBase(n) => (4, n),
        };
        (opcode << 28) | (operand & OPERAND_MASK)
    }
}

fn read_u8(reader: &mut impl Read) -> CasResult<u8> {
    let mut raw = [0u8; 1];
    reader.read_exact(&mut raw)?;
    Ok(raw[0])
}

fn read_u16(reader: &mut impl Read) -> CasResult<u16> {
    let mut raw = [0u8; 2];
    reader.read_exact(&mut raw)?;
    Ok(u16::from_be_bytes(raw))
}

fn read_u32(reader: &mut impl Read) -> CasResult<u32> {
    let mut raw = [0u8; 4];
    reader.read_exact(&mut raw)?;
    Ok(u32::from_be_bytes(raw))
}

/// Copy the base bytes in front of a fix at `offset`
fn keep_until(scratch: &mut ShiftBuffer, out: &mut ShiftBuffer, offset: usize) -> CasResult<()> {
    let keep = offset.checked_sub(scratch.shift_amount()).ok_or_else(|| {
        CasError::Corrupt(format!(
            "delta fix at offset {offset} lies before base cursor {}",
            scratch.shift_amount()
        ))
    })?;
    scratch.transfer(out, keep)?;
    Ok(())
}

fn keep_rest(scratch: &mut ShiftBuffer, out: &mut ShiftBuffer) -> CasResult<()> {
    let rest = scratch.remaining();
    scratch.transfer(out, rest)?;
    Ok(())
}

/// Rebuild a payload of `original_size` bytes from a delta stream and its base
///
/// The delta stream is consumed completely; the output must be filled exactly.
pub fn decompress_delta<R: Read>(
    delta: &[u8],
    base: &mut R,
    original_size: usize,
    options: &DecodeOptions<'_>,
) -> CasResult<Vec<u8>> {
    let mut out = ShiftBuffer::with_len(original_size);
    let mut cursor = Cursor::new(delta);
    let delta_len = delta.len() as u64;

    while cursor.position() < delta_len {
        match DeltaOp::decode(read_u32(&mut cursor)?)? {
            DeltaOp::CopyBase(count) => {
                for _ in 0..count {
                    read_block(base, Some(&mut out), options)?;
                }
            }
            DeltaOp::LargeFix(count) => {
                let mut scratch = read_block_owned(base, options)?;
                for _ in 0..count {
                    let offset = read_u16(&mut cursor)?;
                    let skip = read_u16(&mut cursor)?;
                    keep_until(&mut scratch, &mut out, usize::from(offset))?;
                    read_block(&mut cursor, Some(&mut out), options)?;
                    scratch.shift(usize::from(skip))?;
                }
                keep_rest(&mut scratch, &mut out)?;
            }
            DeltaOp::SmallFix(length) => {
                let region_start = cursor.position();
                let region_end = region_start + u64::from(length);
                if region_end > delta_len {
                    return Err(CasError::Corrupt(format!(
                        "small fix region ends at {region_end}, delta has {delta_len} bytes"
                    )));
                }

                let new_block_size = usize::from(read_u16(&mut cursor)?) + 1;
                let out_start = out.shift_amount();
                let mut scratch = read_block_owned(base, options)?;

                while cursor.position() < region_end {
                    let offset = read_u16(&mut cursor)?;
                    let skip = read_u8(&mut cursor)?;
                    let add = usize::from(read_u8(&mut cursor)?);

                    keep_until(&mut scratch, &mut out, usize::from(offset))?;
                    scratch.shift(usize::from(skip))?;
                    cursor.read_exact(out.window_mut(add)?)?;
                    out.shift(add)?;
                }
                keep_rest(&mut scratch, &mut out)?;

                if cursor.position() != region_end {
                    return Err(CasError::Corrupt(format!(
                        "small fix overran its region by {} bytes",
                        cursor.position() - region_end
                    )));
                }
                let produced = out.shift_amount() - out_start;
                if produced != new_block_size {
                    return Err(CasError::Corrupt(format!(
                        "small fix produced {produced} bytes, declared {new_block_size}"
                    )));
                }
            }
            DeltaOp::CopyDelta(count) => {
                for _ in 0..count {
                    read_block(&mut cursor, Some(&mut out), options)?;
                }
            }
            DeltaOp::SkipBase(count) => {
                for _ in 0..count {
                    read_block(base, None, options)?;
                }
            }
        }
    }

    if out.remaining() != 0 {
        return Err(CasError::Corrupt(format!(
            "delta produced {} of {original_size} bytes",
            out.shift_amount()
        )));
    }
    Ok(out.into_vec())
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cas::compression::CompressionType;
    use crate::cas::decompress::encode_block;
    use pretty_assertions::assert_eq;

    fn stored(data: &[u8]) -> Vec<u8> {
        encode_block(data, CompressionType::None).unwrap()
    }

    fn base_stream() -> Vec<u8> {
        let mut base = Vec::new();
        for block in [
            &b"AAAAAAAA"[..],
            b"0123456789",
            b"skipme",
            b"abcdefghij",
            b"tailblock",
        ] {
            base.extend(stored(block));
        }
        base
    }

    struct DeltaWriter(Vec<u8>);

    impl DeltaWriter {
        fn op(mut self, op: DeltaOp) -> Self {
            self.0.extend_from_slice(&op.encode().to_be_bytes());
            self
        }

        fn bytes(mut self, bytes: &[u8]) -> Self {
            self.0.extend_from_slice(bytes);
            self
        }
    }

    fn small_fix_region() -> Vec<u8> {
        // new block size 11 -> stored as 10
        let mut region = 10u16.to_be_bytes().to_vec();
        region.extend_from_slice(&1u16.to_be_bytes());
        region.extend_from_slice(&[2, 3]);
        region.extend_from_slice(b"xyz");
        region
    }

    #[test]
    fn test_all_opcodes() {
        let region = small_fix_region();
        let delta = DeltaWriter(Vec::new())
            .op(DeltaOp::CopyBase(1))
            .op(DeltaOp::LargeFix(1))
            .bytes(&2u16.to_be_bytes())
            .bytes(&3u16.to_be_bytes())
            .bytes(&stored(b"XY"))
            .op(DeltaOp::SkipBase(1))
            .op(DeltaOp::SmallFix(region.len() as u32))
            .bytes(&region)
            .op(DeltaOp::CopyDelta(1))
            .bytes(&stored(b"DELTA"))
            .op(DeltaOp::CopyBase(1))
            .0;

        let expected = b"AAAAAAAA01XY56789axyzdefghijDELTAtailblock";
        let base = base_stream();
        let out =
            decompress_delta(&delta, &mut base.as_slice(), expected.len(), &DecodeOptions::new())
                .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), String::from_utf8(expected.to_vec()).unwrap());
    }

    #[test]
    fn test_small_fix_size_mismatch_is_corrupt() {
        let mut region = small_fix_region();
        region[..2].copy_from_slice(&11u16.to_be_bytes());
        let delta = DeltaWriter(Vec::new())
            .op(DeltaOp::SkipBase(3))
            .op(DeltaOp::SmallFix(region.len() as u32))
            .bytes(&region)
            .0;

        let base = base_stream();
        let err = decompress_delta(&delta, &mut base.as_slice(), 12, &DecodeOptions::new())
            .unwrap_err();
        assert!(matches!(err, CasError::Corrupt(ref msg) if msg.contains("declared 12")), "{err}");
    }

    #[test]
    fn test_unknown_opcode_is_corrupt() {
        let delta = 0x5000_0001u32.to_be_bytes();
        let base = base_stream();
        let err =
            decompress_delta(&delta, &mut base.as_slice(), 0, &DecodeOptions::new()).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_backwards_fix_is_corrupt() {
        let delta = DeltaWriter(Vec::new())
            .op(DeltaOp::CopyBase(1))
            .op(DeltaOp::LargeFix(2))
            .bytes(&4u16.to_be_bytes())
            .bytes(&0u16.to_be_bytes())
            .bytes(&stored(b"-"))
            .bytes(&1u16.to_be_bytes())
            .bytes(&0u16.to_be_bytes())
            .bytes(&stored(b"-"))
            .0;
        let base = base_stream();
        let err =
            decompress_delta(&delta, &mut base.as_slice(), 19, &DecodeOptions::new()).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_short_output_is_corrupt() {
        let delta = DeltaWriter(Vec::new()).op(DeltaOp::CopyBase(1)).0;
        let base = base_stream();
        let err =
            decompress_delta(&delta, &mut base.as_slice(), 9, &DecodeOptions::new()).unwrap_err();
        assert!(err.to_string().contains("8 of 9"), "{err}");
    }

    #[test]
    fn test_op_encoding() {
        assert_eq!(DeltaOp::SkipBase(3).encode(), 0x4000_0003);
        assert_eq!(DeltaOp::decode(0x2000_0010).unwrap(), DeltaOp::SmallFix(0x10));
    }
}
