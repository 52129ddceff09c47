//! `cas.cat` catalog files
//!
//! Each install chunk has a catalog per layer mapping content hashes to
//! their place in the chunk's `cas_XX.cas` archives. All fields are
//! little-endian.
//!
//! ```text
//! [16]  "NyanNyanNyanNyan"
//! counted layout only:
//!   u32 resource_count, u32 encrypted_count, u32 patch_count, [12] reserved
//! resource  {sha1[20], offset, size, logical_offset, archive_index}
//! encrypted {resource fields, key_id cstring}
//! patch     {sha1[20], base_sha1[20], delta_sha1[20]}
//! ```
//!
//! The legacy layout has no counts; resource records run to the end of the
//! file.

use binrw::io::Cursor;
use binrw::{BinRead, BinWrite, NullString};
use cryo_crypto::ContentHash;
use thiserror::Error;

/// Catalog magic
pub const CATALOG_MAGIC: [u8; 16] = *b"NyanNyanNyanNyan";

const RESOURCE_RECORD_SIZE: usize = 36;
const COUNTED_HEADER_SIZE: usize = 16 + 12 + 12;

/// Catalog errors
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Magic missing
    #[error("invalid catalog magic: {0}")]
    InvalidMagic(String),

    /// Counts exceed the file
    #[error("catalog truncated: header declares {declared} records")]
    Truncated {
        /// Records declared
        declared: u64,
    },

    /// Binary parsing error
    #[error("binary parsing error: {0}")]
    BinRw(#[from] binrw::Error),
}

/// Result type for catalog operations
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Header layout of a title's catalogs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CatalogLayout {
    /// Only resource records, no counts
    Legacy,
    /// Record counts for all three kinds
    #[default]
    Counted,
}

/// Plain resource record
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct CatResourceEntry {
    /// Content hash
    pub sha1: ContentHash,
    /// Offset in the archive
    pub offset: u32,
    /// Stored size
    pub size: u32,
    /// Offset of this piece within a split payload
    pub logical_offset: u32,
    /// Index of the `cas_XX.cas` archive
    pub archive_index: u32,
}

/// Encrypted resource record
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct CatEncryptedEntry {
    /// Location fields
    pub entry: CatResourceEntry,
    /// Name of the decryption key
    #[br(map = |s: NullString| s.to_string())]
    #[bw(map = |s: &String| NullString::from(s.as_str()))]
    pub key_id: String,
}

/// Patch record: `sha1` is `delta_sha1` applied to `base_sha1`
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct CatPatchEntry {
    /// Hash of the patched payload
    pub sha1: ContentHash,
    /// Hash of the base payload
    pub base_sha1: ContentHash,
    /// Hash of the delta stream
    pub delta_sha1: ContentHash,
}

/// Decoded catalog
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    /// Plain records
    pub resources: Vec<CatResourceEntry>,
    /// Encrypted records
    pub encrypted: Vec<CatEncryptedEntry>,
    /// Patch records
    pub patches: Vec<CatPatchEntry>,
}

impl Catalog {
    /// Parse a catalog file
    pub fn parse(data: &[u8], layout: CatalogLayout) -> CatalogResult<Self> {
        if data.len() < 16 || data[..16] != CATALOG_MAGIC {
            return Err(CatalogError::InvalidMagic(hex::encode(
                &data[..data.len().min(16)],
            )));
        }

        let mut cursor = Cursor::new(data);
        cursor.set_position(16);

        match layout {
            CatalogLayout::Legacy => {
                let body = data.len() - 16;
                let count = body / RESOURCE_RECORD_SIZE;
                if body % RESOURCE_RECORD_SIZE != 0 {
                    return Err(CatalogError::Truncated {
                        declared: count as u64 + 1,
                    });
                }
                let resources = (0..count)
                    .map(|_| CatResourceEntry::read(&mut cursor))
                    .collect::<Result<_, _>>()?;
                Ok(Self {
                    resources,
                    ..Self::default()
                })
            }
            CatalogLayout::Counted => {
                let resource_count = u32::read_le(&mut cursor)?;
                let encrypted_count = u32::read_le(&mut cursor)?;
                let patch_count = u32::read_le(&mut cursor)?;
                cursor.set_position(COUNTED_HEADER_SIZE as u64);

                // reject absurd counts before allocating
                let minimum = u64::from(resource_count) * RESOURCE_RECORD_SIZE as u64
                    + u64::from(encrypted_count) * (RESOURCE_RECORD_SIZE as u64 + 1)
                    + u64::from(patch_count) * 60;
                if minimum > (data.len().saturating_sub(COUNTED_HEADER_SIZE)) as u64 {
                    return Err(CatalogError::Truncated {
                        declared: u64::from(resource_count)
                            + u64::from(encrypted_count)
                            + u64::from(patch_count),
                    });
                }

                let resources = (0..resource_count)
                    .map(|_| CatResourceEntry::read(&mut cursor))
                    .collect::<Result<_, _>>()?;
                let encrypted = (0..encrypted_count)
                    .map(|_| CatEncryptedEntry::read(&mut cursor))
                    .collect::<Result<_, _>>()?;
                let patches = (0..patch_count)
                    .map(|_| CatPatchEntry::read(&mut cursor))
                    .collect::<Result<_, _>>()?;
                Ok(Self {
                    resources,
                    encrypted,
                    patches,
                })
            }
        }
    }
}

/// Builder for catalog files
#[derive(Debug, Clone, Default)]
pub struct CatalogBuilder {
    layout: CatalogLayout,
    catalog: Catalog,
}

impl CatalogBuilder {
    /// Start an empty catalog
    pub fn new(layout: CatalogLayout) -> Self {
        Self {
            layout,
            catalog: Catalog::default(),
        }
    }

    /// Add a plain record
    #[must_use]
    pub fn resource(
        mut self,
        sha1: ContentHash,
        archive_index: u32,
        offset: u32,
        size: u32,
    ) -> Self {
        self.catalog.resources.push(CatResourceEntry {
            sha1,
            offset,
            size,
            logical_offset: 0,
            archive_index,
        });
        self
    }

    /// Add an encrypted record
    #[must_use]
    pub fn encrypted(
        mut self,
        sha1: ContentHash,
        archive_index: u32,
        offset: u32,
        size: u32,
        key_id: &str,
    ) -> Self {
        self.catalog.encrypted.push(CatEncryptedEntry {
            entry: CatResourceEntry {
                sha1,
                offset,
                size,
                logical_offset: 0,
                archive_index,
            },
            key_id: key_id.to_string(),
        });
        self
    }

    /// Add a patch record
    #[must_use]
    pub fn patch(mut self, sha1: ContentHash, base_sha1: ContentHash, delta_sha1: ContentHash) -> Self {
        self.catalog.patches.push(CatPatchEntry {
            sha1,
            base_sha1,
            delta_sha1,
        });
        self
    }

    /// Encode the catalog
    ///
    /// The legacy layout has no room for encrypted or patch records; they
    /// are dropped.
    pub fn build(&self) -> CatalogResult<Vec<u8>> {
        let mut out = Cursor::new(Vec::new());
        CATALOG_MAGIC.write_le(&mut out)?;

        if self.layout == CatalogLayout::Counted {
            for count in [
                self.catalog.resources.len(),
                self.catalog.encrypted.len(),
                self.catalog.patches.len(),
            ] {
                (count as u32).write_le(&mut out)?;
            }
            [0u8; 12].write_le(&mut out)?;
        }

        for entry in &self.catalog.resources {
            entry.write(&mut out)?;
        }
        if self.layout == CatalogLayout::Counted {
            for entry in &self.catalog.encrypted {
                entry.write(&mut out)?;
            }
            for entry in &self.catalog.patches {
                entry.write(&mut out)?;
            }
        }
        Ok(out.into_inner())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn hash(tag: &str) -> ContentHash {
        ContentHash::from_data(tag.as_bytes())
    }

    #[test]
    fn test_counted_catalog() {
        let data = CatalogBuilder::new(CatalogLayout::Counted)
            .resource(hash("a"), 1, 0x100, 0x40)
            .encrypted(hash("b"), 2, 0x200, 0x21, "ExtraKey")
            .patch(hash("c"), hash("a"), hash("d"))
            .build()
            .unwrap();

        let catalog = Catalog::parse(&data, CatalogLayout::Counted).unwrap();
        assert_eq!(catalog.resources.len(), 1);
        assert_eq!(catalog.resources[0].archive_index, 1);
        assert_eq!(catalog.resources[0].offset, 0x100);
        assert_eq!(catalog.encrypted[0].key_id, "ExtraKey");
        assert_eq!(catalog.encrypted[0].entry.size, 0x21);
        assert_eq!(catalog.patches[0].base_sha1, hash("a"));
        assert_eq!(catalog.patches[0].delta_sha1, hash("d"));
    }

    #[test]
    fn test_record_layout_is_little_endian() {
        let data = CatalogBuilder::new(CatalogLayout::Legacy)
            .resource(hash("a"), 3, 0x0102_0304, 5)
            .build()
            .unwrap();
        assert_eq!(data.len(), 16 + RESOURCE_RECORD_SIZE);
        assert_eq!(&data[36..40], &[4, 3, 2, 1]);
        assert_eq!(&data[48..52], &[3, 0, 0, 0]);
    }

    #[test]
    fn test_legacy_catalog() {
        let data = CatalogBuilder::new(CatalogLayout::Legacy)
            .resource(hash("a"), 0, 0, 10)
            .resource(hash("b"), 0, 10, 10)
            .build()
            .unwrap();
        let catalog = Catalog::parse(&data, CatalogLayout::Legacy).unwrap();
        assert_eq!(catalog.resources.len(), 2);
        assert!(catalog.patches.is_empty());

        assert!(matches!(
            Catalog::parse(&data[..data.len() - 1], CatalogLayout::Legacy),
            Err(CatalogError::Truncated { .. })
        ));
    }

    #[test]
    fn test_bad_magic_and_counts() {
        assert!(matches!(
            Catalog::parse(b"MeowMeowMeowMeow", CatalogLayout::Counted),
            Err(CatalogError::InvalidMagic(_))
        ));

        let mut data = CatalogBuilder::new(CatalogLayout::Counted).build().unwrap();
        data[16..20].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            Catalog::parse(&data, CatalogLayout::Counted),
            Err(CatalogError::Truncated { .. })
        ));
    }
}
