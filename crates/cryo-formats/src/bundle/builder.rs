//! Binary bundle builder
//!
//! Produces the layout read by [`BinaryBundle::parse`](super::BinaryBundle::parse).
//! Used to build superbundles and CAS bundle payloads for tests and tools.

use binrw::io::Cursor;
use binrw::{BinWrite, Endian};
use cryo_crypto::{ContentHash, CryptoError, Guid, Padding, encrypt_cbc};

use super::binary::{BundleChunk, BundleEbx, BundleRes, TABLES_OFFSET};
use super::error::BundleResult;
use super::magic::{BundleMagic, encode_magic};

/// Builder for binary bundles
#[derive(Debug, Clone)]
pub struct BinaryBundleBuilder {
    salt: u32,
    magic: BundleMagic,
    endian: Endian,
    ebx: Vec<BundleEbx>,
    res: Vec<BundleRes>,
    chunks: Vec<BundleChunk>,
}

impl BinaryBundleBuilder {
    /// Start a big-endian standard bundle
    pub fn new(salt: u32) -> Self {
        Self {
            salt,
            magic: BundleMagic::Standard,
            endian: Endian::Big,
            ebx: Vec::new(),
            res: Vec::new(),
            chunks: Vec::new(),
        }
    }

    /// Set the magic
    #[must_use]
    pub fn with_magic(mut self, magic: BundleMagic) -> Self {
        self.magic = magic;
        self
    }

    /// Set the byte order
    #[must_use]
    pub fn with_endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        self
    }

    /// Append an EBX record
    #[must_use]
    pub fn add_ebx(mut self, name: &str, sha1: ContentHash, original_size: u32) -> Self {
        self.ebx.push(BundleEbx {
            name: name.to_string(),
            sha1,
            original_size,
        });
        self
    }

    /// Append a resource record
    #[must_use]
    pub fn add_res(
        mut self,
        name: &str,
        sha1: ContentHash,
        original_size: u32,
        res_type: u32,
        res_meta: [u8; 16],
        res_rid: u64,
    ) -> Self {
        self.res.push(BundleRes {
            name: name.to_string(),
            sha1,
            original_size,
            res_type,
            res_meta,
            res_rid,
        });
        self
    }

    /// Append a chunk record
    #[must_use]
    pub fn add_chunk(
        mut self,
        id: Guid,
        sha1: ContentHash,
        logical_offset: u32,
        logical_size: u32,
    ) -> Self {
        self.chunks.push(BundleChunk {
            id,
            sha1,
            logical_offset,
            logical_size,
        });
        self
    }

    /// Encode the bundle
    ///
    /// `key` is required for [`BundleMagic::Encrypted`] and ignored otherwise.
    pub fn build(&self, key: Option<&[u8]>) -> BundleResult<Vec<u8>> {
        let endian = self.endian;
        let entry_count = self.ebx.len() + self.res.len() + self.chunks.len();

        // tables, written after the header
        let mut tables = Cursor::new(Vec::new());
        if self.magic.has_sha1() {
            let hashes = self
                .ebx
                .iter()
                .map(|e| e.sha1)
                .chain(self.res.iter().map(|r| r.sha1))
                .chain(self.chunks.iter().map(|c| c.sha1));
            for hash in hashes {
                hash.write_options(&mut tables, endian, ())?;
            }
        }

        let mut strings = Vec::new();
        let mut intern = |name: &str| {
            let offset = strings.len() as u32;
            strings.extend_from_slice(name.as_bytes());
            strings.push(0);
            offset
        };

        for ebx in &self.ebx {
            intern(&ebx.name).write_options(&mut tables, endian, ())?;
            ebx.original_size.write_options(&mut tables, endian, ())?;
        }
        for res in &self.res {
            intern(&res.name).write_options(&mut tables, endian, ())?;
            res.original_size.write_options(&mut tables, endian, ())?;
        }
        for res in &self.res {
            res.res_type.write_options(&mut tables, Endian::Little, ())?;
        }
        for res in &self.res {
            res.res_meta.write_options(&mut tables, endian, ())?;
        }
        for res in &self.res {
            res.res_rid.write_options(&mut tables, Endian::Little, ())?;
        }
        for chunk in &self.chunks {
            chunk
                .id
                .to_bytes_endian(endian == Endian::Big)
                .write_options(&mut tables, endian, ())?;
            chunk.logical_offset.write_options(&mut tables, endian, ())?;
            chunk.logical_size.write_options(&mut tables, endian, ())?;
        }

        let mut body = tables.into_inner();
        let strings_pos = TABLES_OFFSET + body.len();
        body.extend_from_slice(&strings);

        // encrypted bundles count from the size field
        let strings_base = if self.magic == BundleMagic::Encrypted { 0 } else { 4 };
        let strings_offset = (strings_pos - strings_base) as u32;

        let mut out = Cursor::new(Vec::with_capacity(TABLES_OFFSET + body.len()));
        ((TABLES_OFFSET - 4 + body.len()) as u32).write_options(&mut out, Endian::Big, ())?;
        encode_magic(self.magic, self.salt, endian).write_options(&mut out, endian, ())?;
        for field in [
            entry_count as u32,
            self.ebx.len() as u32,
            self.res.len() as u32,
            self.chunks.len() as u32,
            strings_offset,
            0,
            0,
        ] {
            field.write_options(&mut out, endian, ())?;
        }
        let mut out = out.into_inner();

        if self.magic == BundleMagic::Encrypted {
            let key = key.ok_or_else(|| {
                CryptoError::KeyNotFound(cryo_crypto::BUNDLE_ENCRYPTION_KEY.to_string())
            })?;
            body = encrypt_cbc(key, &body, Padding::None)?;
        }
        out.extend_from_slice(&body);
        Ok(out)
    }
}
