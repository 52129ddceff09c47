//! Synthetic game installations for integration tests

#![allow(clippy::unwrap_used, dead_code)]

use std::fs;
use std::path::Path;

use cryo_formats::cas::{CompressionType, encode_stream};
use cryo_formats::dbobject::{DbDict, DbValue, DbWriter};
use tempfile::TempDir;

/// Temporary game directory
pub struct Installation {
    dir: TempDir,
}

impl Installation {
    /// Data layer listing `superbundles`, with an initfs holding `initfs_files`
    pub fn new(superbundles: &[&str], initfs_files: &[(&str, &[u8])]) -> Self {
        let install = Self {
            dir: TempDir::new().unwrap(),
        };
        install.document("Data", "layout.toc", &DbValue::Dict(layout(superbundles)));
        install.document("Data", "initfs_Win32", &initfs(initfs_files));
        install
    }

    /// Patch layer listing `superbundles`
    pub fn with_patch(self, superbundles: &[&str]) -> Self {
        self.document("Patch", "layout.toc", &DbValue::Dict(layout(superbundles)));
        self
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, layer: &str, relative: &str, bytes: &[u8]) {
        let path = self.dir.path().join(layer).join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, bytes).unwrap();
    }

    pub fn document(&self, layer: &str, relative: &str, value: &DbValue) {
        self.write(layer, relative, &DbWriter::write_document(value));
    }
}

pub fn layout(superbundles: &[&str]) -> DbDict {
    DbDict::new()
        .with(
            "superBundles",
            DbValue::List(
                superbundles
                    .iter()
                    .map(|name| DbValue::Dict(DbDict::new().with("name", *name)))
                    .collect(),
            ),
        )
        .with("fs", DbValue::List(vec!["initfs_Win32".into()]))
}

pub fn initfs(files: &[(&str, &[u8])]) -> DbValue {
    DbValue::List(
        files
            .iter()
            .map(|(name, payload)| {
                DbValue::Dict(DbDict::new().with(
                    "$file",
                    DbDict::new().with("name", *name).with("payload", payload.to_vec()),
                ))
            })
            .collect(),
    )
}

/// Uncompressed block stream of `data`
pub fn stream(data: &[u8], block_size: usize) -> Vec<u8> {
    encode_stream(data, block_size, CompressionType::None).unwrap()
}

/// Appends payloads to an archive and remembers where they went
#[derive(Default)]
pub struct Archive {
    pub bytes: Vec<u8>,
}

impl Archive {
    /// Append `stored`, returning `(offset, size)`
    pub fn push(&mut self, stored: &[u8]) -> (u32, u32) {
        let offset = self.bytes.len() as u32;
        self.bytes.extend_from_slice(stored);
        (offset, stored.len() as u32)
    }
}

/// TOC entry of a bundle stored at `offset` in the `.sb` file
pub fn bundle_entry(name: &str, offset: usize, size: usize) -> DbValue {
    DbValue::Dict(
        DbDict::new()
            .with("id", name)
            .with("offset", offset as i64)
            .with("size", size as i64),
    )
}
