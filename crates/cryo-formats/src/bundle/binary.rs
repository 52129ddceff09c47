//! Fixed-layout binary bundle
//!
//! ```text
//! u32 BE  size              bytes after this field
//! u32     magic ^ salt
//! u32     total_count       ebx + res + chunk
//! u32     ebx_count
//! u32     res_count
//! u32     chunk_count
//! u32     strings_offset    relative to the magic, absolute when encrypted
//! u32     meta_offset       unused
//! u32     meta_size         unused
//! [20]    sha1 * total_count          standard magic only
//! {u32 name, u32 original_size} * ebx_count
//! {u32 name, u32 original_size} * res_count
//! u32 LE  res_type * res_count
//! [16]    res_meta * res_count
//! u64 LE  res_rid * res_count
//! {guid, u32 logical_offset, u32 logical_size} * chunk_count
//! strings
//! ```
//!
//! Fields after `size` use the byte order detected from the magic, except
//! resource types and RIDs, which are always little-endian.

use binrw::io::Cursor;
use binrw::{BinRead, Endian};
use cryo_crypto::{ContentHash, CryptoError, Guid, Padding, decrypt_cbc};

use super::error::{BundleError, BundleResult};
use super::magic::{BundleMagic, probe_magic};

/// Bytes from the start of the magic to the end of the fixed header
pub(crate) const HEADER_BODY_SIZE: usize = 0x20;

/// Offset of the first table, counted from the size field
pub(crate) const TABLES_OFFSET: usize = 4 + HEADER_BODY_SIZE;

/// EBX record of a bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleEbx {
    /// Asset name
    pub name: String,
    /// Content hash (zero when the bundle carries none)
    pub sha1: ContentHash,
    /// Decompressed size
    pub original_size: u32,
}

/// Resource record of a bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleRes {
    /// Resource name
    pub name: String,
    /// Content hash (zero when the bundle carries none)
    pub sha1: ContentHash,
    /// Decompressed size
    pub original_size: u32,
    /// Resource type tag
    pub res_type: u32,
    /// Type-specific metadata
    pub res_meta: [u8; 16],
    /// Resource id
    pub res_rid: u64,
}

/// Chunk record of a bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleChunk {
    /// Chunk id
    pub id: Guid,
    /// Content hash (zero when the bundle carries none)
    pub sha1: ContentHash,
    /// Logical offset of this piece within the whole chunk
    pub logical_offset: u32,
    /// Logical size of this piece
    pub logical_size: u32,
}

/// Decoded binary bundle
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryBundle {
    /// Magic found in the header
    pub magic: BundleMagic,
    /// Byte order of the header and tables
    pub endian: Endian,
    /// EBX records in table order
    pub ebx: Vec<BundleEbx>,
    /// Resource records in table order
    pub res: Vec<BundleRes>,
    /// Chunk records in table order
    pub chunks: Vec<BundleChunk>,
}

fn read_cstring(data: &[u8], offset: usize) -> BundleResult<String> {
    let tail = data.get(offset..).ok_or_else(|| {
        BundleError::InvalidFormat(format!("string offset {offset} outside bundle"))
    })?;
    let len = tail
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| BundleError::InvalidFormat(format!("unterminated string at {offset}")))?;
    Ok(String::from_utf8_lossy(&tail[..len]).into_owned())
}

/// Total byte length (size field included) of the bundle at the start of `data`
pub fn bundle_len(data: &[u8]) -> BundleResult<usize> {
    let raw: [u8; 4] = data
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or(BundleError::Truncated {
            needed: 4,
            available: data.len(),
        })?;
    Ok(4 + u32::from_be_bytes(raw) as usize)
}

struct Header {
    total_count: u32,
    ebx_count: u32,
    res_count: u32,
    chunk_count: u32,
    strings_offset: u32,
}

impl BinaryBundle {
    /// Parse the bundle at the start of `data`
    ///
    /// `salt` is the title's magic salt; `key` is the bundle encryption key,
    /// needed only for encrypted bundles. Bytes after the declared size are
    /// ignored, see [`bundle_len`].
    pub fn parse(data: &[u8], salt: u32, key: Option<&[u8]>) -> BundleResult<Self> {
        let total = bundle_len(data)?;
        if data.len() < total || total < TABLES_OFFSET {
            return Err(BundleError::Truncated {
                needed: total.max(TABLES_OFFSET),
                available: data.len(),
            });
        }

        let raw_magic: [u8; 4] = [data[4], data[5], data[6], data[7]];
        let (magic, endian) = probe_magic(raw_magic, salt)
            .ok_or_else(|| BundleError::InvalidMagic(u32::from_be_bytes(raw_magic)))?;

        let mut cursor = Cursor::new(&data[8..TABLES_OFFSET]);
        let mut next = || u32::read_options(&mut cursor, endian, ());
        let header = Header {
            total_count: next()?,
            ebx_count: next()?,
            res_count: next()?,
            chunk_count: next()?,
            strings_offset: next()?,
        };

        if magic == BundleMagic::Encrypted {
            let key = key.ok_or_else(|| {
                CryptoError::KeyNotFound(cryo_crypto::BUNDLE_ENCRYPTION_KEY.to_string())
            })?;
            let mut decrypted = data[..total].to_vec();
            decrypt_cbc(key, &mut decrypted[TABLES_OFFSET..], Padding::None)?;
            Self::parse_tables(&decrypted, magic, endian, &header)
        } else {
            Self::parse_tables(&data[..total], magic, endian, &header)
        }
    }

    fn parse_tables(
        data: &[u8],
        magic: BundleMagic,
        endian: Endian,
        header: &Header,
    ) -> BundleResult<Self> {
        let entry_count = u64::from(header.ebx_count)
            + u64::from(header.res_count)
            + u64::from(header.chunk_count);
        // every record takes at least 8 bytes
        if entry_count * 8 > data.len() as u64 {
            return Err(BundleError::InvalidFormat(format!(
                "{entry_count} entries cannot fit in {} bytes",
                data.len()
            )));
        }
        if magic.has_sha1() && u64::from(header.total_count) < entry_count {
            return Err(BundleError::InvalidFormat(format!(
                "sha1 table holds {} hashes for {entry_count} entries",
                header.total_count
            )));
        }

        let strings_base = if magic == BundleMagic::Encrypted { 0 } else { 4 };
        let strings = strings_base + header.strings_offset as usize;

        let mut cursor = Cursor::new(data);
        cursor.set_position(TABLES_OFFSET as u64);

        let sha1s = if magic.has_sha1() {
            (0..header.total_count)
                .map(|_| ContentHash::read_options(&mut cursor, endian, ()))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            Vec::new()
        };
        let mut hashes = sha1s.into_iter();
        let mut next_hash = || hashes.next().unwrap_or(ContentHash::ZERO);

        let mut ebx = Vec::with_capacity(header.ebx_count as usize);
        for _ in 0..header.ebx_count {
            let name_offset = u32::read_options(&mut cursor, endian, ())?;
            let original_size = u32::read_options(&mut cursor, endian, ())?;
            ebx.push(BundleEbx {
                name: read_cstring(data, strings + name_offset as usize)?,
                sha1: next_hash(),
                original_size,
            });
        }

        let res_count = header.res_count as usize;
        let mut res_names = Vec::with_capacity(res_count);
        for _ in 0..res_count {
            let name_offset = u32::read_options(&mut cursor, endian, ())?;
            let original_size = u32::read_options(&mut cursor, endian, ())?;
            res_names.push((name_offset, original_size));
        }
        let res_types = (0..res_count)
            .map(|_| u32::read_options(&mut cursor, Endian::Little, ()))
            .collect::<Result<Vec<_>, _>>()?;
        let res_metas = (0..res_count)
            .map(|_| <[u8; 16]>::read_options(&mut cursor, endian, ()))
            .collect::<Result<Vec<_>, _>>()?;
        let res_rids = (0..res_count)
            .map(|_| u64::read_options(&mut cursor, Endian::Little, ()))
            .collect::<Result<Vec<_>, _>>()?;

        let mut res = Vec::with_capacity(res_count);
        for (i, (name_offset, original_size)) in res_names.into_iter().enumerate() {
            res.push(BundleRes {
                name: read_cstring(data, strings + name_offset as usize)?,
                sha1: next_hash(),
                original_size,
                res_type: res_types[i],
                res_meta: res_metas[i],
                res_rid: res_rids[i],
            });
        }

        let mut chunks = Vec::with_capacity(header.chunk_count as usize);
        for _ in 0..header.chunk_count {
            let raw_id = <[u8; 16]>::read_options(&mut cursor, endian, ())?;
            let logical_offset = u32::read_options(&mut cursor, endian, ())?;
            let logical_size = u32::read_options(&mut cursor, endian, ())?;
            chunks.push(BundleChunk {
                id: Guid::from_bytes_endian(raw_id, endian == Endian::Big),
                sha1: next_hash(),
                logical_offset,
                logical_size,
            });
        }

        Ok(Self {
            magic,
            endian,
            ebx,
            res,
            chunks,
        })
    }

    /// Number of entries of all kinds
    pub fn entry_count(&self) -> usize {
        self.ebx.len() + self.res.len() + self.chunks.len()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::bundle::builder::BinaryBundleBuilder;
    use crate::bundle::magic::{SALT_PECM, SALT_PECN};

    fn sample_builder() -> BinaryBundleBuilder {
        BinaryBundleBuilder::new(SALT_PECN)
            .add_ebx("levels/mp_subway", ContentHash::from_data(b"ebx"), 1200)
            .add_res(
                "levels/mp_subway/terrain",
                ContentHash::from_data(b"res"),
                4096,
                0x5C4954A6,
                [7u8; 16],
                0x0123_4567_89AB_CDEF,
            )
            .add_chunk(
                Guid::parse("00112233-4455-6677-8899-aabbccddeeff").unwrap(),
                ContentHash::from_data(b"chunk"),
                0x10000,
                0x2345,
            )
    }

    #[test]
    fn test_standard_big_endian() {
        let data = sample_builder().build(None).unwrap();
        let bundle = BinaryBundle::parse(&data, SALT_PECN, None).unwrap();

        assert_eq!(bundle.magic, BundleMagic::Standard);
        assert_eq!(bundle.endian, Endian::Big);
        assert_eq!(bundle.ebx[0].name, "levels/mp_subway");
        assert_eq!(bundle.ebx[0].sha1, ContentHash::from_data(b"ebx"));
        assert_eq!(bundle.res[0].res_rid, 0x0123_4567_89AB_CDEF);
        assert_eq!(bundle.res[0].res_meta, [7u8; 16]);
        assert_eq!(bundle.res[0].sha1, ContentHash::from_data(b"res"));
        assert_eq!(
            bundle.chunks[0].id.to_string(),
            "00112233-4455-6677-8899-aabbccddeeff"
        );
        assert_eq!(bundle.chunks[0].logical_size, 0x2345);
        assert_eq!(bundle.chunks[0].sha1, ContentHash::from_data(b"chunk"));
    }

    #[test]
    fn test_little_endian_detected() {
        let data = sample_builder()
            .with_endian(Endian::Little)
            .build(None)
            .unwrap();
        let bundle = BinaryBundle::parse(&data, SALT_PECN, None).unwrap();
        assert_eq!(bundle.endian, Endian::Little);
        assert_eq!(bundle.res[0].res_type, 0x5C4954A6);
        assert_eq!(bundle.chunks[0].logical_offset, 0x10000);
    }

    #[test]
    fn test_res_type_and_rid_are_little_endian() {
        let data = sample_builder().build(None).unwrap();
        let contains = |needle: &[u8]| data.windows(needle.len()).any(|w| w == needle);
        assert!(contains(&0x5C4954A6u32.to_le_bytes()));
        assert!(!contains(&0x5C4954A6u32.to_be_bytes()));
        assert!(contains(&0x0123_4567_89AB_CDEFu64.to_le_bytes()));

        // hand-patched big-endian bundle with a little-endian RID
        let mut patched = data.clone();
        let at = patched
            .windows(8)
            .position(|w| w == 0x0123_4567_89AB_CDEFu64.to_le_bytes())
            .unwrap();
        patched[at..at + 8].copy_from_slice(&42u64.to_le_bytes());
        let bundle = BinaryBundle::parse(&patched, SALT_PECN, None).unwrap();
        assert_eq!(bundle.endian, Endian::Big);
        assert_eq!(bundle.res[0].res_rid, 42);
        assert_eq!(bundle.res[0].res_type, 0x5C4954A6);
    }

    #[test]
    fn test_unknown_magic_rejected() {
        let data = sample_builder().build(None).unwrap();
        assert!(matches!(
            BinaryBundle::parse(&data, SALT_PECM, None),
            Err(BundleError::InvalidMagic(_))
        ));
    }

    #[test]
    fn test_encrypted_bundle() {
        let key = *b"bundle-key-16byt";
        let data = sample_builder()
            .with_magic(BundleMagic::Encrypted)
            .build(Some(&key))
            .unwrap();

        assert!(matches!(
            BinaryBundle::parse(&data, SALT_PECN, None),
            Err(BundleError::Crypto(CryptoError::KeyNotFound(_)))
        ));

        let bundle = BinaryBundle::parse(&data, SALT_PECN, Some(&key)).unwrap();
        assert_eq!(bundle.magic, BundleMagic::Encrypted);
        assert_eq!(bundle.res[0].name, "levels/mp_subway/terrain");
        // encrypted bundles carry no hashes
        assert!(bundle.ebx[0].sha1.is_zero());
    }

    #[test]
    fn test_trailing_bytes_ignored_and_truncation_detected() {
        let mut data = sample_builder().build(None).unwrap();
        let len = bundle_len(&data).unwrap();
        assert_eq!(len, data.len());

        data.extend_from_slice(b"payload data");
        assert_eq!(BinaryBundle::parse(&data, SALT_PECN, None).unwrap().entry_count(), 3);

        assert!(matches!(
            BinaryBundle::parse(&data[..len - 1], SALT_PECN, None),
            Err(BundleError::Truncated { .. })
        ));
    }
}
