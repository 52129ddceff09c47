//! Synthetic installations for unit tests

#![allow(clippy::unwrap_used)]

use std::fs;
use std::path::{Path, PathBuf};

use cryo_crypto::KeyStore;
use cryo_formats::dbobject::{DbDict, DbValue, DbWriter};
use parking_lot::Mutex;
use tempfile::TempDir;

use crate::assets::AssetCatalog;
use crate::config::GameProfile;
use crate::file_info::ReadContext;
use crate::layout::{FileSystem, LAYOUT_FILE};
use crate::loaders::LoadContext;
use crate::resources::ResourceManager;

/// Game directory with `Data` and optionally `Patch` layers
pub(crate) struct GameDir {
    dir: TempDir,
}

impl GameDir {
    /// Base layer listing `superbundles`, no install manifest
    pub fn new(superbundles: &[&str]) -> Self {
        Self::with_layout(layout(superbundles))
    }

    /// Base layer with a custom layout
    pub fn with_layout(layout: DbDict) -> Self {
        let game = Self {
            dir: TempDir::new().unwrap(),
        };
        game.write_document("Data", LAYOUT_FILE, &DbValue::Dict(layout));
        game.write_document("Data", "initfs_Win32", &DbValue::List(Vec::new()));
        game
    }

    /// Add a patch layer with its own layout
    pub fn add_patch(&self, superbundles: &[&str]) {
        self.write_document("Patch", LAYOUT_FILE, &DbValue::Dict(layout(superbundles)));
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn layer(&self, layer: &str) -> PathBuf {
        self.dir.path().join(layer)
    }

    /// Write raw bytes below a layer, creating directories
    pub fn write(&self, layer: &str, relative: &str, bytes: &[u8]) {
        let path = self.layer(layer).join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, bytes).unwrap();
    }

    pub fn write_document(&self, layer: &str, relative: &str, value: &DbValue) {
        self.write(layer, relative, &DbWriter::write_document(value));
    }

    pub fn open(&self, profile: &GameProfile) -> FileSystem {
        FileSystem::open(self.root(), profile, &KeyStore::new()).unwrap()
    }
}

/// Layout document listing `superbundles`
pub(crate) fn layout(superbundles: &[&str]) -> DbDict {
    DbDict::new()
        .with(
            "superBundles",
            DbValue::List(
                superbundles
                    .iter()
                    .map(|n| DbValue::Dict(DbDict::new().with("name", *n)))
                    .collect(),
            ),
        )
        .with("fs", DbValue::List(vec!["initfs_Win32".into()]))
}

/// Opened installation plus the shared state loaders write into
pub(crate) struct Harness {
    pub fs: FileSystem,
    pub keys: KeyStore,
    pub profile: GameProfile,
    pub resources: Mutex<ResourceManager>,
    pub catalog: Mutex<AssetCatalog>,
}

impl Harness {
    /// Open `game` and load its catalogs
    pub fn new(game: &GameDir, profile: GameProfile) -> Self {
        let fs = game.open(&profile);
        let mut resources = ResourceManager::new();
        resources
            .load_install_chunks(&fs, profile.catalog_header.into())
            .unwrap();
        Self {
            fs,
            keys: KeyStore::new(),
            profile,
            resources: Mutex::new(resources),
            catalog: Mutex::new(AssetCatalog::new()),
        }
    }

    pub fn context(&self) -> LoadContext<'_> {
        let read = ReadContext::new(&self.fs, &self.keys, &self.profile, None);
        LoadContext::new(
            read,
            &self.fs,
            &self.keys,
            &self.profile,
            &self.resources,
            &self.catalog,
        )
    }
}
