//! Delta bundles in non-CAS superbundles
//!
//! A patched non-CAS superbundle may store a bundle as a byte-level patch
//! against the same bundle in the base superbundle. The patch rebuilds the
//! binary bundle header only; payload blocks are not part of it.
//!
//! ```text
//! u64 LE  magic = 0x0000000001000000
//! u32 BE  instruction region size
//! u32 BE  size of the data after the bundle (unused)
//! i32 BE  patched bundle size        first word of the region
//! u32 BE  instruction, followed by literal bytes for CopyDelta ...
//! ```
//!
//! The base side starts with its own `u32 BE` bundle size.

use super::error::{BundleError, BundleResult};

/// Magic of a delta bundle, read little-endian
pub const DELTA_BUNDLE_MAGIC: u64 = 0x0000_0000_0100_0000;

const HEADER_SIZE: usize = 16;

/// Bundle-level patch instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleDeltaOp {
    /// Copy N bytes from the base bundle
    CopyBase(u32),
    /// Skip N bytes of the base bundle
    SkipBase(u32),
    /// Copy N literal bytes following the instruction
    CopyDelta(u32),
}

impl BundleDeltaOp {
    /// Decode a packed instruction word
    pub fn decode(word: u32) -> BundleResult<Self> {
        let count = word & 0x0FFF_FFFF;
        match word >> 28 {
            0 => Ok(Self::CopyBase(count)),
            4 => Ok(Self::SkipBase(count)),
            8 => Ok(Self::CopyDelta(count)),
            other => Err(BundleError::InvalidFormat(format!(
                "unknown delta bundle opcode {other}"
            ))),
        }
    }

    /// Encode as a packed instruction word
    pub fn encode(self) -> u32 {
        match self {
            Self::CopyBase(n) => n,
            Self::SkipBase(n) => (4 << 28) | n,
            Self::CopyDelta(n) => (8 << 28) | n,
        }
    }
}

/// Whether `data` starts with the delta bundle magic
pub fn is_delta_bundle(data: &[u8]) -> bool {
    data.get(..8)
        .and_then(|b| b.try_into().ok())
        .is_some_and(|b| u64::from_le_bytes(b) == DELTA_BUNDLE_MAGIC)
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    what: &'static str,
}

impl<'a> Reader<'a> {
    fn take(&mut self, count: usize) -> BundleResult<&'a [u8]> {
        let end = self.pos + count;
        let slice = self.data.get(self.pos..end).ok_or_else(|| {
            BundleError::InvalidFormat(format!(
                "{} bundle ends at {}, need {end} bytes",
                self.what,
                self.data.len()
            ))
        })?;
        self.pos = end;
        Ok(slice)
    }

    fn u32_be(&mut self) -> BundleResult<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

fn base_reader<'r, 'a>(base: &'r mut Option<Reader<'a>>) -> BundleResult<&'r mut Reader<'a>> {
    base.as_mut().ok_or_else(|| {
        BundleError::InvalidFormat("delta bundle references a missing base bundle".to_string())
    })
}

/// Rebuild a patched binary bundle
///
/// `delta` starts at the delta bundle; `base`, when present, starts at the
/// matching base bundle. The result is a complete binary bundle (size field
/// included) ready for [`BinaryBundle::parse`](super::BinaryBundle::parse).
pub fn rebuild_delta_bundle(delta: &[u8], base: Option<&[u8]>) -> BundleResult<Vec<u8>> {
    if !is_delta_bundle(delta) {
        return Err(BundleError::InvalidFormat("delta bundle magic missing".to_string()));
    }

    let mut delta = Reader {
        data: delta,
        pos: 8,
        what: "delta",
    };
    let region_size = delta.u32_be()? as usize;
    delta.u32_be()?;
    let region_end = HEADER_SIZE + region_size;

    let patched_size = delta.u32_be()?;
    let mut base = match base {
        Some(data) => {
            let mut reader = Reader {
                data,
                pos: 0,
                what: "base",
            };
            reader.u32_be()?;
            Some(reader)
        }
        None => None,
    };

    let mut out = Vec::with_capacity(patched_size as usize + 4);
    out.extend_from_slice(&patched_size.to_be_bytes());

    while delta.pos < region_end {
        match BundleDeltaOp::decode(delta.u32_be()?)? {
            BundleDeltaOp::CopyBase(n) => {
                out.extend_from_slice(base_reader(&mut base)?.take(n as usize)?);
            }
            BundleDeltaOp::SkipBase(n) => {
                base_reader(&mut base)?.take(n as usize)?;
            }
            BundleDeltaOp::CopyDelta(n) => out.extend_from_slice(delta.take(n as usize)?),
        }
    }

    if out.len() != patched_size as usize + 4 {
        return Err(BundleError::InvalidFormat(format!(
            "delta bundle produced {} bytes, header declares {patched_size}",
            out.len() - 4
        )));
    }
    Ok(out)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::bundle::{BinaryBundle, BinaryBundleBuilder, SALT_PECM};
    use cryo_crypto::ContentHash;
    use pretty_assertions::assert_eq;

    fn delta_file(ops: &[(BundleDeltaOp, &[u8])], patched_size: u32) -> Vec<u8> {
        let mut region = patched_size.to_be_bytes().to_vec();
        for (op, literal) in ops {
            region.extend_from_slice(&op.encode().to_be_bytes());
            region.extend_from_slice(literal);
        }
        let mut out = DELTA_BUNDLE_MAGIC.to_le_bytes().to_vec();
        out.extend_from_slice(&(region.len() as u32).to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes());
        out.extend(region);
        out
    }

    #[test]
    fn test_ops_round_trip() {
        for op in [
            BundleDeltaOp::CopyBase(12),
            BundleDeltaOp::SkipBase(0x0FFF_FFFF),
            BundleDeltaOp::CopyDelta(1),
        ] {
            assert_eq!(BundleDeltaOp::decode(op.encode()).unwrap(), op);
        }
        assert!(BundleDeltaOp::decode(0x1000_0000).is_err());
    }

    #[test]
    fn test_patch_bundle_against_base() {
        let base = BinaryBundleBuilder::new(SALT_PECM)
            .add_ebx("a", ContentHash::from_data(b"a"), 10)
            .build(None)
            .unwrap();
        let patched = BinaryBundleBuilder::new(SALT_PECM)
            .add_ebx("b", ContentHash::from_data(b"b"), 10)
            .build(None)
            .unwrap();

        // keep everything up to the sha1, replace it, keep the rest
        let sha1_at = 36;
        let ops = [
            (BundleDeltaOp::CopyBase(sha1_at as u32 - 4), &[][..]),
            (BundleDeltaOp::SkipBase(20), &[][..]),
            (BundleDeltaOp::CopyDelta(20), &patched[sha1_at..sha1_at + 20]),
            (BundleDeltaOp::CopyBase(8), &[][..]),
            (BundleDeltaOp::SkipBase(1), &[][..]),
            (BundleDeltaOp::CopyDelta(1), &b"b"[..]),
            (BundleDeltaOp::CopyBase(1), &[][..]),
        ];
        let delta = delta_file(&ops, patched.len() as u32 - 4);

        let rebuilt = rebuild_delta_bundle(&delta, Some(&base)).unwrap();
        assert_eq!(rebuilt, patched);

        let bundle = BinaryBundle::parse(&rebuilt, SALT_PECM, None).unwrap();
        assert_eq!(bundle.ebx[0].name, "b");
    }

    #[test]
    fn test_literal_only_needs_no_base() {
        let delta = delta_file(&[(BundleDeltaOp::CopyDelta(3), &b"xyz"[..])], 3);
        assert_eq!(rebuild_delta_bundle(&delta, None).unwrap(), b"\0\0\0\x03xyz");
    }

    #[test]
    fn test_missing_base_and_size_mismatch() {
        let delta = delta_file(&[(BundleDeltaOp::CopyBase(3), &[][..])], 3);
        assert!(matches!(
            rebuild_delta_bundle(&delta, None),
            Err(BundleError::InvalidFormat(_))
        ));

        let delta = delta_file(&[(BundleDeltaOp::CopyDelta(2), &b"xy"[..])], 3);
        assert!(rebuild_delta_bundle(&delta, None).is_err());
        assert!(rebuild_delta_bundle(b"not a delta", None).is_err());
    }
}
