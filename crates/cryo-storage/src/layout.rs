//! Data sources, layouts and the in-memory initfs
//!
//! A title's files are spread over one or more data directories. When there
//! is more than one, the first is the patch layer and the rest form the
//! base layer. Logical paths may carry a `native_data/` or `native_patch/`
//! prefix restricting the search to one layer; unprefixed paths search the
//! patch layer first.
//!
//! # Features
//!
//! - `layout.toc` loading from both layers with superbundle merging
//! - Install manifest parsing into an [`InstallTopology`]
//! - initfs loading, including the encrypted variant
//! - Game platform and bundle format detection
//! - CAS archive path resolution by locator or flat CAS file index

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use cryo_crypto::{INIT_FS_KEY, KeyStore, Padding, decrypt_cbc};
use cryo_formats::dbobject::{DbDict, DbValue, read_dict, read_document};
use cryo_formats::unwrap_toc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::archive::CasFileId;
use crate::config::GameProfile;
use crate::install_chunk::{InstallChunkInfo, InstallTopology};
use crate::{Result, StorageError};

/// Marker file of a package directory found by sub-directory sources
pub const PACKAGE_MANIFEST: &str = "package.mft";

/// Layout file name in every layer
pub const LAYOUT_FILE: &str = "layout.toc";

/// Presence of this file selects the Kelvin bundle format
pub const KELVIN_TOC: &str = "kelvin.toc";

const NATIVE_DATA: &str = "native_data/";
const NATIVE_PATCH: &str = "native_patch/";

/// Installation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Layer {
    /// Shipped data
    Base,
    /// Patch overlay
    Patch,
}

impl Layer {
    /// Layer for an `is_patch` flag
    pub const fn from_patch(is_patch: bool) -> Self {
        if is_patch { Self::Patch } else { Self::Base }
    }

    /// Whether this is the patch layer
    pub const fn is_patch(self) -> bool {
        matches!(self, Self::Patch)
    }

    /// Logical path prefix of the layer
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Base => "native_data",
            Self::Patch => "native_patch",
        }
    }
}

/// Target platform of an installation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GamePlatform {
    /// Windows
    Win32,
    /// Linux
    Linux,
    /// Xbox 360
    Xenon,
    /// PlayStation 4
    Gen4a,
    /// PlayStation 3
    Ps3,
    /// Xbox One
    Gen4b,
    /// Switch
    Nx,
}

impl GamePlatform {
    /// Parse a platform name as used by initfs files and install manifests
    pub fn parse(name: &str) -> Result<Self> {
        Ok(match name {
            "Win32" => Self::Win32,
            "Linux" => Self::Linux,
            "Xenon" => Self::Xenon,
            "Gen4a" => Self::Gen4a,
            "Ps3" => Self::Ps3,
            "Gen4b" => Self::Gen4b,
            "Nx" => Self::Nx,
            other => {
                return Err(StorageError::UnsupportedFeature(format!(
                    "game platform {other:?}"
                )));
            }
        })
    }

    /// Whether bundle tables of this platform are big-endian
    pub const fn is_big_endian(self) -> bool {
        matches!(self, Self::Xenon | Self::Ps3)
    }
}

/// Bundle storage generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleFormat {
    /// DbObject TOC and superbundle files
    #[default]
    Dynamic2018,
    /// Binary TOC with Huffman names
    Manifest2019,
    /// Layout-level superbundle manifest
    SuperBundleManifest,
    /// Single `kelvin.toc` with reversed name fragments
    Kelvin,
}

impl BundleFormat {
    /// Value used by install manifest settings
    pub fn from_value(value: i64) -> Result<Self> {
        Ok(match value {
            0 => Self::Dynamic2018,
            1 => Self::Manifest2019,
            2 => Self::SuperBundleManifest,
            3 => Self::Kelvin,
            other => {
                return Err(StorageError::UnsupportedFeature(format!(
                    "bundle format {other}"
                )));
            }
        })
    }
}

/// Merged view of an installation's data directories
#[derive(Debug)]
pub struct FileSystem {
    base_path: PathBuf,
    paths: Vec<PathBuf>,
    topology: InstallTopology,
    cas_files: Vec<String>,
    memory_fs: HashMap<String, Vec<u8>>,
    platform: Option<GamePlatform>,
    bundle_format: BundleFormat,
    base: u32,
    head: u32,
    manifest: Option<DbDict>,
}

impl FileSystem {
    /// Open the installation at `base_path`
    ///
    /// `keys` must hold `InitFsKey` when the initfs is encrypted.
    pub fn open(base_path: impl AsRef<Path>, profile: &GameProfile, keys: &KeyStore) -> Result<Self> {
        let base_path = base_path.as_ref();
        if !base_path.is_dir() {
            return Err(StorageError::NotFound(base_path.display().to_string()));
        }

        let mut fs = Self {
            base_path: base_path.to_path_buf(),
            paths: Vec::new(),
            topology: InstallTopology::default(),
            cas_files: Vec::new(),
            memory_fs: HashMap::new(),
            platform: None,
            bundle_format: BundleFormat::default(),
            base: 0,
            head: 0,
            manifest: None,
        };

        for source in &profile.sources {
            fs.add_source(&source.path, source.sub_dirs)?;
        }
        if fs.paths.is_empty() {
            return Err(StorageError::Layout(format!(
                "no data sources of profile {} exist below {}",
                profile.name,
                base_path.display()
            )));
        }
        debug!(sources = ?fs.paths, "data sources");

        fs.process_layouts(keys)?;
        if let Some(format) = profile.bundle_format {
            fs.bundle_format = format;
        }

        info!(
            superbundles = fs.topology.superbundles().len(),
            install_chunks = fs.topology.chunks().len(),
            format = ?fs.bundle_format,
            platform = ?fs.platform,
            "opened game file system"
        );
        Ok(fs)
    }

    fn add_source(&mut self, path: &str, sub_dirs: bool) -> Result<()> {
        let full = self.base_path.join(path);
        if !full.is_dir() {
            return Ok(());
        }
        if !sub_dirs {
            self.paths.push(PathBuf::from(path));
            return Ok(());
        }

        let mut found = Vec::new();
        let mut pending = vec![full];
        while let Some(dir) = pending.pop() {
            for entry in fs::read_dir(&dir)? {
                let sub = entry?.path();
                if !sub.is_dir() {
                    continue;
                }
                pending.push(sub.clone());
                let Ok(relative) = sub.strip_prefix(&self.base_path) else {
                    continue;
                };
                if relative.to_string_lossy().to_ascii_lowercase().contains("patch") {
                    continue;
                }
                if sub.join(PACKAGE_MANIFEST).is_file() {
                    found.push(relative.join("Data"));
                }
            }
        }
        found.sort();
        self.paths.extend(found);
        Ok(())
    }

    /// Resolve a logical path, searching the patch layer first
    ///
    /// `native_data/` and `native_patch/` prefixes restrict the search to
    /// one layer. Returns `None` when no layer has the file.
    pub fn resolve_path(&self, name: &str) -> Option<PathBuf> {
        let (range, rest) = if let Some(rest) = name.strip_prefix(NATIVE_PATCH) {
            if self.paths.len() == 1 {
                return None;
            }
            (0..1, rest)
        } else if let Some(rest) = name.strip_prefix(NATIVE_DATA) {
            (usize::from(self.paths.len() > 1)..self.paths.len(), rest)
        } else {
            (0..self.paths.len(), name)
        };
        self.probe(range, rest.trim_matches('/'))
    }

    /// Resolve `name` within one layer
    pub fn resolve_layer_path(&self, layer: Layer, name: &str) -> Option<PathBuf> {
        let range = match layer {
            Layer::Patch if self.paths.len() == 1 => return None,
            Layer::Patch => 0..1,
            Layer::Base => usize::from(self.paths.len() > 1)..self.paths.len(),
        };
        self.probe(range, name)
    }

    fn probe(&self, range: std::ops::Range<usize>, name: &str) -> Option<PathBuf> {
        self.paths[range]
            .iter()
            .map(|dir| self.base_path.join(dir).join(name))
            .find(|path| path.exists())
    }

    /// Whether a separate patch layer exists
    pub fn has_patch_layer(&self) -> bool {
        self.paths.len() > 1
    }

    /// Data directories relative to the game root, patch layer first
    pub fn sources(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Game root
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Install chunks and superbundles
    pub fn topology(&self) -> &InstallTopology {
        &self.topology
    }

    /// Detected platform, `Win32` if nothing named one
    pub fn platform(&self) -> GamePlatform {
        self.platform.unwrap_or(GamePlatform::Win32)
    }

    /// Bundle format used by the superbundles
    pub fn bundle_format(&self) -> BundleFormat {
        self.bundle_format
    }

    /// Base build number from the active layout
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Head build number from the active layout
    pub fn head(&self) -> u32 {
        self.head
    }

    /// Layout-level superbundle manifest, if the title has one
    pub fn manifest(&self) -> Option<&DbDict> {
        self.manifest.as_ref()
    }

    /// File from the initfs
    pub fn memory_file(&self, name: &str) -> Option<&[u8]> {
        self.memory_fs.get(name).map(Vec::as_slice)
    }

    /// Number of initfs files
    pub fn memory_file_count(&self) -> usize {
        self.memory_fs.len()
    }

    /// Logical path of the archive a locator points at
    pub fn cas_file_path(&self, id: CasFileId) -> Result<String> {
        let chunk = self.topology.chunk(id.install_chunk_index).ok_or_else(|| {
            StorageError::Invariant(format!(
                "no install chunk with persistent index {}",
                id.install_chunk_index
            ))
        })?;
        Ok(format!(
            "{}/{}/cas_{:02}.cas",
            Layer::from_patch(id.is_patch).prefix(),
            chunk.install_bundle,
            id.cas_index
        ))
    }

    /// Logical path of a flat CAS file index from the install manifest
    pub fn cas_file_by_index(&self, index: usize) -> Option<&str> {
        self.cas_files
            .get(index)
            .map(String::as_str)
            .filter(|path| !path.is_empty())
    }

    fn process_layouts(&mut self, keys: &KeyStore) -> Result<()> {
        let base_path = self
            .resolve_layer_path(Layer::Base, LAYOUT_FILE)
            .ok_or_else(|| StorageError::Layout("base layout.toc not found".to_string()))?;
        let base_layout = read_dict_file(&base_path)?;

        if self.resolve_path(KELVIN_TOC).is_some() {
            self.bundle_format = BundleFormat::Kelvin;
        }

        for sb in base_layout.require::<&[DbValue]>("superBundles")? {
            let name: &str = sb.to::<&DbDict>("superBundles")?.require("name")?;
            self.topology.add_superbundle(name);
        }

        let patch_layout = match self.resolve_layer_path(Layer::Patch, LAYOUT_FILE) {
            Some(path) => Some(read_dict_file(&path)?),
            None => None,
        };
        if let Some(patch) = &patch_layout {
            for sb in patch.require::<&[DbValue]>("superBundles")? {
                let name: &str = sb.to::<&DbDict>("superBundles")?.require("name")?;
                self.topology.add_superbundle(name);
            }
        }

        let active = patch_layout.as_ref().unwrap_or(&base_layout);
        self.base = active.get_or("base", 0u32)?;
        self.head = active.get_or("head", 0u32)?;

        match active.opt::<&DbDict>("installManifest")? {
            Some(manifest) => self.process_install_manifest(manifest)?,
            None => self.topology.add_implicit_chunk(),
        }

        if let Some(manifest) = active.opt::<&DbDict>("manifest")? {
            self.manifest = Some(manifest.clone());
            self.bundle_format = BundleFormat::SuperBundleManifest;
        }

        let initfs = active
            .require::<&[DbValue]>("fs")?
            .first()
            .ok_or_else(|| StorageError::Layout("layout names no initfs".to_string()))?
            .to::<&str>("fs")?
            .to_string();
        self.load_initfs(&initfs, keys)
    }

    fn process_install_manifest(&mut self, manifest: &DbDict) -> Result<()> {
        if let Some(platform) = manifest.opt::<&str>("platform")? {
            if !platform.is_empty() {
                self.platform = Some(GamePlatform::parse(platform)?);
            }
        }

        for value in manifest.require::<&[DbValue]>("installChunks")? {
            let dict = value.to::<&DbDict>("installChunks")?;
            if dict.get_or("testDLC", false)? {
                continue;
            }

            let mut chunk = InstallChunkInfo {
                id: dict.require("id")?,
                name: dict.require::<&str>("name")?.to_string(),
                install_bundle: dict.require::<&str>("installBundle")?.to_string(),
                always_installed: dict.get_or("alwaysInstalled", false)?,
                persistent_index: dict.get_or("persistentIndex", self.topology.chunks().len() as u32)?,
                ..InstallChunkInfo::default()
            };

            for sb in dict.opt::<&[DbValue]>("superbundles")?.unwrap_or(&[]) {
                chunk.superbundles.push(sb.to::<&str>("superbundles")?.to_string());
            }
            for required in dict.opt::<&[DbValue]>("requiredChunks")?.unwrap_or(&[]) {
                chunk.required_chunks.push(required.to("requiredChunks")?);
            }
            for file in dict.opt::<&[DbValue]>("files")?.unwrap_or(&[]) {
                let file = file.to::<&DbDict>("files")?;
                let id: u32 = file.require("id")?;
                let path = file
                    .require::<&str>("path")?
                    .trim_matches('/')
                    .replace("native_data/Data", "native_data")
                    .replace("native_data/Patch", "native_patch");
                let id = id as usize;
                if self.cas_files.len() <= id {
                    self.cas_files.resize(id + 1, String::new());
                }
                self.cas_files[id] = path;
            }
            for key in ["splitSuperbundles", "splitTocs"] {
                for split in dict.opt::<&[DbValue]>(key)?.unwrap_or(&[]) {
                    let name: &str = split.to::<&DbDict>(key)?.require("superbundle")?;
                    chunk.split_superbundles.push(name.to_string());
                }
            }

            let index = chunk.persistent_index;
            if !self.topology.add_chunk(chunk) {
                return Err(StorageError::Layout(format!(
                    "persistent index {index} used by two install chunks"
                )));
            }
        }

        if let Some(settings) = manifest.opt::<&DbDict>("settings")? {
            if let Some(format) = settings.opt::<i64>("bundleFormat")? {
                self.bundle_format = BundleFormat::from_value(format)?;
            }
        }
        Ok(())
    }

    fn load_initfs(&mut self, name: &str, keys: &KeyStore) -> Result<()> {
        if self.platform.is_none() {
            let platform = name.strip_prefix("initfs_").unwrap_or(name);
            self.platform = Some(GamePlatform::parse(platform)?);
        }

        let path = self
            .resolve_path(name)
            .ok_or_else(|| StorageError::Layout(format!("initfs {name} not found")))?;
        let raw = fs::read(&path)?;
        let payload = unwrap_toc(&raw)?;

        let document = match read_document(&payload)? {
            DbValue::Dict(dict) => {
                let encrypted: &[u8] = dict.require("encrypted")?;
                let key = keys.require(INIT_FS_KEY)?;
                let mut plain = encrypted.to_vec();
                let len = decrypt_cbc(key, &mut plain, Padding::Pkcs7)?;
                read_document(&plain[..len])?
            }
            other => other,
        };

        let files = document
            .as_list()
            .ok_or_else(|| StorageError::Layout(format!("initfs {name} is not a list")))?;
        for stub in files {
            let file = stub.to::<&DbDict>("initfs")?.require::<&DbDict>("$file")?;
            let file_name: &str = file.require("name")?;
            let payload: &[u8] = file.require("payload")?;
            self.memory_fs
                .entry(file_name.to_string())
                .or_insert_with(|| payload.to_vec());
        }
        debug!(initfs = name, files = self.memory_fs.len(), "loaded initfs");
        Ok(())
    }
}

/// Read a possibly signed DbObject dict file
pub(crate) fn read_dict_file(path: &Path) -> Result<DbDict> {
    let raw = fs::read(path)?;
    Ok(read_dict(&unwrap_toc(&raw)?)?)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::DataSource;
    use cryo_crypto::{Guid, encrypt_cbc};
    use cryo_formats::dbobject::DbWriter;
    use tempfile::TempDir;

    fn superbundles(names: &[&str]) -> DbValue {
        DbValue::List(
            names
                .iter()
                .map(|n| DbValue::Dict(DbDict::new().with("name", *n)))
                .collect(),
        )
    }

    fn initfs(files: &[(&str, &[u8])]) -> DbValue {
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

    fn write(dir: &Path, name: &str, value: &DbValue) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(name), DbWriter::write_document(value)).unwrap();
    }

    fn layout(sbs: &[&str]) -> DbDict {
        DbDict::new()
            .with("superBundles", superbundles(sbs))
            .with("fs", DbValue::List(vec!["initfs_Win32".into()]))
            .with("base", 100)
            .with("head", 200)
    }

    #[test]
    fn test_layers_and_implicit_chunk() {
        let dir = TempDir::new().unwrap();
        let data = dir.path().join("Data");
        let patch = dir.path().join("Patch");
        write(&data, LAYOUT_FILE, &DbValue::Dict(layout(&["win32/a"])));
        write(&data, "initfs_Win32", &initfs(&[("Scripts/x.txt", b"hi")]));
        write(&patch, LAYOUT_FILE, &DbValue::Dict(layout(&["Win32/A", "win32/b"])));
        fs::write(data.join("only_base.bin"), b"x").unwrap();

        let fs = FileSystem::open(dir.path(), &GameProfile::new("t", 2016), &KeyStore::new()).unwrap();

        assert!(fs.has_patch_layer());
        assert_eq!(fs.topology().superbundles().len(), 2);
        assert_eq!(fs.topology().chunks().len(), 1);
        assert_eq!(fs.bundle_format(), BundleFormat::Dynamic2018);
        assert_eq!(fs.platform(), GamePlatform::Win32);
        assert_eq!(fs.head(), 200);
        assert_eq!(fs.memory_file("Scripts/x.txt"), Some(&b"hi"[..]));

        assert!(fs.resolve_path("only_base.bin").is_some());
        assert!(fs.resolve_path("native_data/only_base.bin").is_some());
        assert!(fs.resolve_path("native_patch/only_base.bin").is_none());
        assert!(fs.resolve_layer_path(Layer::Patch, LAYOUT_FILE).unwrap().starts_with(&patch));
        assert!(fs.resolve_path("missing.toc").is_none());

        let id = CasFileId {
            is_patch: true,
            install_chunk_index: 0,
            cas_index: 3,
        };
        assert!(fs.cas_file_path(id).unwrap().starts_with("native_patch/"));
    }

    #[test]
    fn test_install_manifest() {
        let dir = TempDir::new().unwrap();
        let data = dir.path().join("Data");
        let chunk = |id: u8, name: &str, index: i32| {
            DbDict::new()
                .with("id", Guid::from_bytes([id; 16]))
                .with("name", name)
                .with("installBundle", format!("Win32/{name}"))
                .with("alwaysInstalled", true)
                .with("persistentIndex", index)
                .with("superbundles", DbValue::List(vec!["win32/a".into()]))
                .with(
                    "files",
                    DbValue::List(vec![DbValue::Dict(
                        DbDict::new().with("id", 2).with("path", "/native_data/Data/Win32/x/cas_01.cas"),
                    )]),
                )
        };
        let manifest = DbDict::new()
            .with("platform", "Gen4a")
            .with(
                "installChunks",
                DbValue::List(vec![
                    DbValue::Dict(chunk(1, "main", 5)),
                    DbValue::Dict(chunk(2, "test", 6).with("testDLC", true)),
                    DbValue::Dict(chunk(3, "dlc", 9).with(
                        "splitSuperbundles",
                        DbValue::List(vec![DbValue::Dict(DbDict::new().with("superbundle", "win32/split"))]),
                    )),
                ]),
            )
            .with("settings", DbDict::new().with("bundleFormat", 1i64));
        write(&data, LAYOUT_FILE, &DbValue::Dict(layout(&["win32/a"]).with("installManifest", manifest)));
        write(&data, "initfs_Win32", &initfs(&[]));

        let profile = GameProfile::new("t", 2019).with_sources(vec![DataSource::new("Data")]);
        let fs = FileSystem::open(dir.path(), &profile, &KeyStore::new()).unwrap();

        assert!(!fs.has_patch_layer());
        assert_eq!(fs.platform(), GamePlatform::Gen4a);
        assert_eq!(fs.bundle_format(), BundleFormat::Manifest2019);
        assert_eq!(fs.topology().chunks().len(), 2);
        assert_eq!(fs.topology().chunk(9).unwrap().name, "dlc");
        assert!(fs.topology().superbundle("win32/split").is_some());
        assert_eq!(fs.cas_file_by_index(2), Some("native_data/Win32/x/cas_01.cas"));
        assert_eq!(fs.cas_file_by_index(0), None);

        let id = CasFileId {
            is_patch: false,
            install_chunk_index: 5,
            cas_index: 12,
        };
        assert_eq!(fs.cas_file_path(id).unwrap(), "native_data/Win32/main/cas_12.cas");
        assert!(matches!(
            fs.cas_file_path(CasFileId { install_chunk_index: 0, ..id }),
            Err(StorageError::Invariant(_))
        ));
    }

    #[test]
    fn test_encrypted_initfs_and_kelvin() {
        let dir = TempDir::new().unwrap();
        let data = dir.path().join("Data");
        let key = [0x24u8; 16];
        let inner = DbWriter::write_document(&initfs(&[("Scripts/CasEncrypt.yaml", b"k")]));
        let blob = encrypt_cbc(&key, &inner, Padding::Pkcs7).unwrap();
        write(&data, LAYOUT_FILE, &DbValue::Dict(layout(&["win32/a"])));
        write(&data, "initfs_Win32", &DbValue::Dict(DbDict::new().with("encrypted", blob)));
        fs::write(data.join(KELVIN_TOC), b"").unwrap();

        let profile = GameProfile::new("t", 2020).with_sources(vec![DataSource::new("Data")]);
        assert!(matches!(
            FileSystem::open(dir.path(), &profile, &KeyStore::new()),
            Err(StorageError::Crypto(_))
        ));

        let mut keys = KeyStore::new();
        keys.add(INIT_FS_KEY, key.to_vec());
        let fs = FileSystem::open(dir.path(), &profile, &keys).unwrap();
        assert_eq!(fs.bundle_format(), BundleFormat::Kelvin);
        assert_eq!(fs.memory_file("Scripts/CasEncrypt.yaml"), Some(&b"k"[..]));
    }

    #[test]
    fn test_sub_dir_sources() {
        let dir = TempDir::new().unwrap();
        for package in ["Packages/a", "Packages/b", "Packages/Patch/c"] {
            let root = dir.path().join(package);
            fs::create_dir_all(&root).unwrap();
            fs::write(root.join(PACKAGE_MANIFEST), b"").unwrap();
        }
        let data = dir.path().join("Data");
        write(&data, LAYOUT_FILE, &DbValue::Dict(layout(&[])));
        write(&data, "initfs_Win32", &initfs(&[]));

        let profile = GameProfile::new("t", 2021).with_sources(vec![
            DataSource {
                path: "Packages".to_string(),
                sub_dirs: true,
            },
            DataSource::new("Data"),
        ]);
        let fs = FileSystem::open(dir.path(), &profile, &KeyStore::new()).unwrap();
        assert_eq!(
            fs.sources(),
            &[
                PathBuf::from("Packages/a/Data"),
                PathBuf::from("Packages/b/Data"),
                PathBuf::from("Data")
            ]
        );
    }

    #[test]
    fn test_missing_layout_and_platform() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("Data")).unwrap();
        assert!(matches!(
            FileSystem::open(dir.path(), &GameProfile::new("t", 2016), &KeyStore::new()),
            Err(StorageError::Layout(_))
        ));
        assert!(GamePlatform::parse("Dreamcast").unwrap_err().is_unsupported());
        assert!(BundleFormat::from_value(9).is_err());
    }
}
