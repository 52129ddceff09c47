//! Archive files and scoped superbundle handles
//!
//! Archives are memory-mapped read-only. Bundle loaders walk one superbundle
//! data file at a time; [`SuperBundleFiles`] keeps exactly one mapping open
//! per active (layer, superbundle) pair and drops it on every transition.

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapOptions};
use tracing::trace;

use crate::layout::{FileSystem, Layer};
use crate::{Result, StorageError};

/// Identity of a `cas_XX.cas` archive
///
/// Ordering is by layer, then install chunk, then archive index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CasFileId {
    /// Archive lives in the patch layer
    pub is_patch: bool,
    /// Persistent index of the owning install chunk
    pub install_chunk_index: u32,
    /// Archive number within the install chunk
    pub cas_index: u32,
}

impl CasFileId {
    /// Create an archive identity
    pub const fn new(is_patch: bool, install_chunk_index: u32, cas_index: u32) -> Self {
        Self {
            is_patch,
            install_chunk_index,
            cas_index,
        }
    }

    /// Decode a narrow locator word
    ///
    /// Bits 0..8 hold the archive index, bit 8 the patch flag and bits 16..24
    /// the install chunk. Other bits are reserved.
    pub const fn from_locator(word: u32) -> Self {
        Self {
            is_patch: (word >> 8) & 1 != 0,
            install_chunk_index: (word >> 16) & 0xFF,
            cas_index: word & 0xFF,
        }
    }

    /// Decode a wide locator: narrow layout minus the archive index, then the
    /// full archive index
    pub const fn from_wide_locator(first: u32, cas_index: u32) -> Self {
        Self {
            is_patch: (first >> 8) & 1 != 0,
            install_chunk_index: (first >> 16) & 0xFF,
            cas_index,
        }
    }

    /// Encode as a narrow locator word
    pub const fn to_locator(self) -> u32 {
        ((self.install_chunk_index & 0xFF) << 16) | ((self.is_patch as u32) << 8) | (self.cas_index & 0xFF)
    }
}

impl fmt::Display for CasFileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:cas_{:02}",
            Layer::from_patch(self.is_patch).prefix(),
            self.install_chunk_index,
            self.cas_index
        )
    }
}

/// Read-only memory-mapped file
pub struct MappedFile {
    path: PathBuf,
    // empty files cannot be mapped
    mmap: Option<Mmap>,
}

impl MappedFile {
    /// Map the file at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let size = file.metadata()?.len();

        let mmap = if size == 0 {
            None
        } else {
            #[allow(unsafe_code)]
            let mmap = unsafe {
                MmapOptions::new().map(&file).map_err(|e| {
                    StorageError::Io(std::io::Error::new(
                        e.kind(),
                        format!("failed to map {}: {e}", path.display()),
                    ))
                })?
            };
            Some(mmap)
        };

        trace!(path = %path.display(), size, "mapped file");
        Ok(Self { path, mmap })
    }

    /// File contents
    pub fn data(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or(&[])
    }

    /// File size
    pub fn len(&self) -> u64 {
        self.data().len() as u64
    }

    /// Whether the file is empty
    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }

    /// Path the file was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bounds-checked sub-slice
    pub fn slice(&self, offset: u64, len: u64) -> Result<&[u8]> {
        let size = self.len();
        offset
            .checked_add(len)
            .filter(|end| *end <= size)
            .map(|end| &self.data()[offset as usize..end as usize])
            .ok_or_else(|| StorageError::OutOfBounds {
                path: self.path.display().to_string(),
                offset,
                len,
                size,
            })
    }

    /// Everything from `offset` to the end of the file
    pub fn tail(&self, offset: u64) -> Result<&[u8]> {
        let len = self.len().saturating_sub(offset);
        self.slice(offset, len)
    }
}

impl fmt::Debug for MappedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedFile")
            .field("path", &self.path)
            .field("len", &self.len())
            .finish()
    }
}

/// Map a logical path, `Ok(None)` when no layer has it
pub fn open_logical(fs: &FileSystem, name: &str) -> Result<Option<MappedFile>> {
    fs.resolve_path(name).map(MappedFile::open).transpose()
}

/// The superbundle data file currently in use by a loader
///
/// Opening a different (layer, superbundle) pair closes the previous file
/// first. Borrowing the mapping ties every slice to this handle, so nothing
/// can be read from a file after it was closed.
pub struct SuperBundleFiles<'fs> {
    fs: &'fs FileSystem,
    extension: &'static str,
    current: Option<(Layer, String, Option<MappedFile>)>,
}

impl<'fs> SuperBundleFiles<'fs> {
    /// Handles for `.sb` files
    pub fn new(fs: &'fs FileSystem) -> Self {
        Self::with_extension(fs, "sb")
    }

    /// Handles for files with another extension, e.g. `toc` for inline bundles
    pub fn with_extension(fs: &'fs FileSystem, extension: &'static str) -> Self {
        Self {
            fs,
            extension,
            current: None,
        }
    }

    /// Make the data file of `name` in `layer` current
    ///
    /// Returns `Ok(None)` when the layer has no such file.
    pub fn open(&mut self, layer: Layer, name: &str) -> Result<Option<&MappedFile>> {
        let same = matches!(&self.current, Some((l, n, _)) if *l == layer && n.eq_ignore_ascii_case(name));
        if !same {
            self.close();
            let logical = format!("{}/{name}.{}", layer.prefix(), self.extension);
            let file = open_logical(self.fs, &logical)?;
            trace!(layer = ?layer, superbundle = name, found = file.is_some(), "opened superbundle file");
            self.current = Some((layer, name.to_string(), file));
        }
        Ok(self.current.as_ref().and_then(|(_, _, file)| file.as_ref()))
    }

    /// Drop the current file, if any
    pub fn close(&mut self) {
        if let Some((layer, name, _)) = self.current.take() {
            trace!(layer = ?layer, superbundle = %name, "closed superbundle file");
        }
    }
}

impl Drop for SuperBundleFiles<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_locators() {
        let id = CasFileId::from_locator(0x0003_0105);
        assert_eq!(id, CasFileId::new(true, 3, 5));
        assert_eq!(id.to_locator(), 0x0003_0105);

        // reserved bits are ignored
        assert_eq!(CasFileId::from_locator(0xFF03_0005), CasFileId::new(false, 3, 5));
        assert_eq!(
            CasFileId::from_wide_locator(0x0002_0100, 300),
            CasFileId::new(true, 2, 300)
        );
        assert_eq!(id.to_string(), "native_patch:3:cas_05");
    }

    #[test]
    fn test_location_order() {
        let mut ids = [
            CasFileId::new(true, 0, 0),
            CasFileId::new(false, 2, 1),
            CasFileId::new(false, 1, 9),
        ];
        ids.sort();
        assert_eq!(ids[0], CasFileId::new(false, 1, 9));
        assert!(ids[2].is_patch);
    }

    #[test]
    fn test_mapped_file_bounds() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cas_01.cas");
        std::fs::write(&path, b"0123456789").unwrap();

        let file = MappedFile::open(&path).unwrap();
        assert_eq!(file.len(), 10);
        assert_eq!(file.slice(2, 3).unwrap(), b"234");
        assert_eq!(file.tail(8).unwrap(), b"89");
        assert!(matches!(
            file.slice(8, 3),
            Err(StorageError::OutOfBounds { size: 10, .. })
        ));
        assert!(file.slice(u64::MAX, 2).is_err());

        let empty = dir.path().join("empty.cas");
        std::fs::write(&empty, b"").unwrap();
        let file = MappedFile::open(&empty).unwrap();
        assert!(file.is_empty());
        assert_eq!(file.slice(0, 0).unwrap(), b"");
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            MappedFile::open("/nonexistent/cas_99.cas"),
            Err(StorageError::Io(_))
        ));
    }
}
