//! Physical locations of payloads
//!
//! A payload is either a block stream in a CAS archive, a block stream at a
//! known offset of a superbundle or TOC data file, or a patched payload that
//! only exists as a delta stream applied to a base stream.

use cryo_crypto::{CAS_OBFUSCATION_KEY, KeyStore, Padding, decrypt_cbc};
use cryo_formats::cas::{DecodeOptions, decompress_delta, decompress_slice};

use crate::archive::{CasFileId, MappedFile};
use crate::config::GameProfile;
use crate::layout::FileSystem;
use crate::{Result, StorageError};

/// Byte range of a stored payload in a CAS archive
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CasLocation {
    /// Archive holding the payload
    pub file: CasFileId,
    /// Offset in the archive
    pub offset: u32,
    /// Stored size
    pub size: u32,
    /// Offset of this piece within a split payload
    pub logical_offset: u32,
    /// Decryption key name for encrypted entries
    pub key_id: Option<String>,
}

impl CasLocation {
    /// Plain location
    pub const fn new(file: CasFileId, offset: u32, size: u32) -> Self {
        Self {
            file,
            offset,
            size,
            logical_offset: 0,
            key_id: None,
        }
    }

    /// Set the logical offset
    #[must_use]
    pub const fn with_logical_offset(mut self, logical_offset: u32) -> Self {
        self.logical_offset = logical_offset;
        self
    }

    /// Mark as encrypted with the named key
    #[must_use]
    pub fn with_key(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }

    /// Bytes occupied in the archive; encrypted spans are padded to AES blocks
    pub fn stored_len(&self) -> u64 {
        let size = u64::from(self.size);
        if self.key_id.is_some() {
            size + (size & 15)
        } else {
            size
        }
    }
}

/// Where a payload's bytes come from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceLocation {
    /// Block stream in a CAS archive
    Cas(CasLocation),
    /// Block stream inside a superbundle or TOC data file
    Path {
        /// Logical file path, e.g. `native_data/win32/ui.sb`
        path: String,
        /// Offset of the block stream
        offset: u64,
        /// Stored size
        size: u32,
        /// Offset of this piece within a split payload
        logical_offset: u32,
    },
    /// Delta stream applied to a base stream
    Patch {
        /// Base stream; absent when the delta only adds data
        base: Option<CasLocation>,
        /// Delta instruction stream
        delta: CasLocation,
    },
}

impl ResourceLocation {
    /// Offset within a split payload
    pub fn logical_offset(&self) -> u32 {
        match self {
            Self::Cas(cas) => cas.logical_offset,
            Self::Path { logical_offset, .. } => *logical_offset,
            Self::Patch { delta, .. } => delta.logical_offset,
        }
    }

    /// Whether the payload lives in the patch layer
    pub fn is_patch(&self) -> bool {
        match self {
            Self::Cas(cas) => cas.file.is_patch,
            Self::Path { path, .. } => path.starts_with("native_patch/"),
            Self::Patch { .. } => true,
        }
    }
}

/// Everything needed to turn a [`ResourceLocation`] into bytes
#[derive(Debug, Clone, Copy)]
pub struct ReadContext<'a> {
    fs: &'a FileSystem,
    keys: &'a KeyStore,
    options: DecodeOptions<'a>,
}

impl<'a> ReadContext<'a> {
    /// Context for a title
    pub fn new(
        fs: &'a FileSystem,
        keys: &'a KeyStore,
        profile: &GameProfile,
        zstd_dictionary: Option<&'a [u8]>,
    ) -> Self {
        let mut options = DecodeOptions::new().with_zstd_dictionary(zstd_dictionary);
        if profile.cas_obfuscation {
            options = options.with_obfuscation(keys.get(CAS_OBFUSCATION_KEY));
        }
        Self { fs, keys, options }
    }

    /// Block decoding options of the title
    pub fn options(&self) -> &DecodeOptions<'a> {
        &self.options
    }

    fn open_cas(&self, file: CasFileId) -> Result<MappedFile> {
        let logical = self.fs.cas_file_path(file)?;
        let path = self
            .fs
            .resolve_path(&logical)
            .ok_or(StorageError::NotFound(logical))?;
        MappedFile::open(path)
    }

    fn open_path(&self, logical: &str) -> Result<MappedFile> {
        let path = self
            .fs
            .resolve_path(logical)
            .ok_or_else(|| StorageError::NotFound(logical.to_string()))?;
        MappedFile::open(path)
    }

    /// Stored bytes of a CAS location, decrypted if needed
    pub fn read_cas(&self, location: &CasLocation) -> Result<Vec<u8>> {
        let archive = self.open_cas(location.file)?;
        let mut data = archive
            .slice(u64::from(location.offset), location.stored_len())?
            .to_vec();
        if let Some(key_id) = &location.key_id {
            let key = self.keys.require(key_id)?;
            let len = decrypt_cbc(key, &mut data, Padding::Pkcs7)?;
            data.truncate(len);
        }
        Ok(data)
    }

    /// Stored bytes of a location without decompressing
    ///
    /// For patched payloads this is the delta stream.
    pub fn read_raw(&self, location: &ResourceLocation) -> Result<Vec<u8>> {
        match location {
            ResourceLocation::Cas(cas) => self.read_cas(cas),
            ResourceLocation::Path {
                path, offset, size, ..
            } => Ok(self.open_path(path)?.slice(*offset, u64::from(*size))?.to_vec()),
            ResourceLocation::Patch { delta, .. } => self.read_cas(delta),
        }
    }

    /// Decompressed bytes of a location
    pub fn decompress(&self, location: &ResourceLocation, original_size: usize) -> Result<Vec<u8>> {
        match location {
            ResourceLocation::Patch { base, delta } => {
                let delta = self.read_cas(delta)?;
                let base = base.as_ref().map(|b| self.read_cas(b)).transpose()?;
                let mut base_reader = base.as_deref().unwrap_or_default();
                Ok(decompress_delta(
                    &delta,
                    &mut base_reader,
                    original_size,
                    &self.options,
                )?)
            }
            other => {
                let stored = self.read_raw(other)?;
                Ok(decompress_slice(&stored, original_size, &self.options)?)
            }
        }
    }
}
