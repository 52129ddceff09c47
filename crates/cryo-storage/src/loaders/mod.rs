//! Bundle format loaders
//!
//! One loader per table-of-contents style. The format is chosen once per
//! installation by [`FileSystem::bundle_format`] and every superbundle of the
//! topology is handed to the same loader.
//!
//! # Features
//!
//! - **DbObject** (`Dynamic2018`): self-describing TOC documents, CAS or
//!   inline superbundles, delta bundles
//! - **Manifest2019**: binary TOCs with Huffman-compressed names and
//!   per-entry CAS locators
//! - **Kelvin**: reversed name fragments and bundles spanning several files
//!
//! A bundle that fails to decode is reported as a [`SkippedUnit`] and its
//! siblings keep loading. Invariant violations abort the load.

use parking_lot::Mutex;
use std::fs;

use cryo_crypto::{BUNDLE_ENCRYPTION_KEY, ContentHash, KeyStore};
use cryo_formats::bundle::BinaryBundle;
use cryo_formats::toc_file::unwrap_toc;
use tracing::warn;

use crate::assets::{
    AssetCatalog, AssetInfo, BundleId, ChunkEntry, EbxEntry, ResEntry, SuperBundleId,
};
use crate::config::GameProfile;
use crate::file_info::{ReadContext, ResourceLocation};
use crate::install_chunk::{InstallChunkType, SuperBundleInfo};
use crate::layout::{BundleFormat, FileSystem, Layer};
use crate::resources::ResourceManager;
use crate::session::SkippedUnit;
use crate::{Result, StorageError};

pub mod dbobject;
pub mod kelvin;
pub mod manifest2019;

pub use dbobject::DbObjectLoader;
pub use kelvin::KelvinLoader;
pub use manifest2019::Manifest2019Loader;

/// Decodes the bundles of one superbundle into the asset catalog
pub trait AssetLoader: Send + Sync {
    /// Format handled by this loader
    fn format(&self) -> BundleFormat;

    /// Load every bundle and superbundle chunk of `superbundle`
    ///
    /// Per-bundle failures land in the returned outcome; an `Err` means the
    /// whole superbundle could not be read.
    fn load_superbundle(
        &self,
        ctx: &LoadContext<'_>,
        superbundle: &SuperBundleInfo,
    ) -> Result<SuperBundleLoad>;
}

/// Loader for a bundle format
pub fn loader_for(format: BundleFormat) -> Result<Box<dyn AssetLoader>> {
    match format {
        BundleFormat::Dynamic2018 => Ok(Box::new(DbObjectLoader)),
        BundleFormat::Manifest2019 => Ok(Box::new(Manifest2019Loader)),
        BundleFormat::Kelvin => Ok(Box::new(KelvinLoader)),
        BundleFormat::SuperBundleManifest => Err(StorageError::UnsupportedFeature(
            "superbundle manifest bundles".to_string(),
        )),
    }
}

/// Bundles decoded from one superbundle
#[derive(Debug, Default)]
pub struct SuperBundleLoad {
    /// Bundles added to the catalog
    pub bundles: usize,
    /// Superbundle chunks added to the catalog
    pub chunks: usize,
    /// Bundles that failed to decode
    pub skipped: Vec<SkippedUnit>,
}

impl SuperBundleLoad {
    /// Count a decoded bundle or record its failure
    ///
    /// Invariant violations are returned so the whole load stops.
    pub(crate) fn finish_bundle(
        &mut self,
        superbundle: &str,
        bundle: &str,
        result: Result<()>,
    ) -> Result<()> {
        match result {
            Ok(()) => {
                self.bundles += 1;
                Ok(())
            }
            Err(error @ StorageError::Invariant(_)) => Err(error),
            Err(error) => {
                warn!(superbundle, bundle, error = %error, "skipping bundle");
                self.skipped.push(SkippedUnit {
                    superbundle: superbundle.to_string(),
                    bundle: Some(bundle.to_string()),
                    error,
                });
                Ok(())
            }
        }
    }
}

/// Stored size and locations of one bundle entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredEntry {
    /// Stored size
    pub size: u64,
    /// Where the stored bytes live
    pub locations: Vec<ResourceLocation>,
}

impl StoredEntry {
    /// Entry with a single location
    pub fn at(size: u64, location: ResourceLocation) -> Self {
        Self {
            size,
            locations: vec![location],
        }
    }
}

/// Shared state of a running load
///
/// The resource manager and the asset catalog sit behind mutexes so
/// several superbundles can be decoded at once; every write goes through
/// the lock.
pub struct LoadContext<'a> {
    /// Resolved installation
    pub fs: &'a FileSystem,
    /// Decryption keys
    pub keys: &'a KeyStore,
    /// Title profile
    pub profile: &'a GameProfile,
    /// Payload reader
    pub read: ReadContext<'a>,
    resources: &'a Mutex<ResourceManager>,
    catalog: &'a Mutex<AssetCatalog>,
}

impl<'a> LoadContext<'a> {
    /// Create a context over shared session state
    pub fn new(
        read: ReadContext<'a>,
        fs: &'a FileSystem,
        keys: &'a KeyStore,
        profile: &'a GameProfile,
        resources: &'a Mutex<ResourceManager>,
        catalog: &'a Mutex<AssetCatalog>,
    ) -> Self {
        Self {
            fs,
            keys,
            profile,
            read,
            resources,
            catalog,
        }
    }

    /// Parse a binary bundle with the title's salt and bundle key
    pub fn parse_bundle(&self, data: &[u8]) -> Result<BinaryBundle> {
        Ok(BinaryBundle::parse(
            data,
            self.profile.salt(),
            self.keys.get(BUNDLE_ENCRYPTION_KEY),
        )?)
    }

    /// Largest catalog size of `sha1`
    pub fn resource_size(&self, sha1: &ContentHash) -> Option<u32> {
        self.resources.lock().get_size(sha1)
    }

    /// Catalog locations of `sha1`
    ///
    /// The first request claims the hash. Later requests get nothing, so an
    /// asset merged under the same identity keeps its first locations.
    pub fn file_infos(&self, sha1: &ContentHash) -> Vec<ResourceLocation> {
        self.resources.lock().get_file_infos(sha1).unwrap_or_default()
    }

    /// Patched locations of `sha1` built from its delta and base hashes
    pub fn patch_file_infos(
        &self,
        sha1: &ContentHash,
        delta_sha1: &ContentHash,
        base_sha1: &ContentHash,
    ) -> Result<Vec<ResourceLocation>> {
        Ok(self
            .resources
            .lock()
            .get_patch_file_infos(sha1, delta_sha1, base_sha1)?
            .unwrap_or_default())
    }

    /// Register a superbundle
    pub fn add_superbundle(&self, name: &str) -> SuperBundleId {
        self.catalog.lock().add_superbundle(name)
    }

    /// Register a bundle
    pub fn add_bundle(&self, name: &str, superbundle: SuperBundleId) -> BundleId {
        self.catalog.lock().add_bundle(name, superbundle)
    }

    /// Add a chunk owned by a superbundle
    pub fn add_superbundle_chunk(&self, entry: ChunkEntry, superbundle: SuperBundleId) {
        self.catalog.lock().add_superbundle_chunk(entry, superbundle);
    }

    /// Add every entry of a decoded bundle
    ///
    /// `stored` holds one item per entry in EBX, resource, chunk order.
    pub fn add_binary_bundle(
        &self,
        name: &str,
        bundle: BundleId,
        parsed: BinaryBundle,
        stored: Vec<StoredEntry>,
    ) -> Result<()> {
        if stored.len() != parsed.entry_count() {
            return Err(StorageError::corrupt(
                name,
                format!(
                    "{} stored entries for {} bundle entries",
                    stored.len(),
                    parsed.entry_count()
                ),
            ));
        }

        let mut stored = stored.into_iter();
        let mut catalog = self.catalog.lock();
        for (ebx, data) in parsed.ebx.into_iter().zip(stored.by_ref()) {
            let asset = AssetInfo::new(ebx.sha1, data.size, u64::from(ebx.original_size))
                .with_locations(data.locations);
            catalog.add_ebx(EbxEntry::new(ebx.name, asset), bundle);
        }
        for (res, data) in parsed.res.into_iter().zip(stored.by_ref()) {
            let asset = AssetInfo::new(res.sha1, data.size, u64::from(res.original_size))
                .with_locations(data.locations);
            catalog.add_res(
                ResEntry::new(res.name, res.res_type, res.res_rid, res.res_meta.to_vec(), asset),
                bundle,
            );
        }
        for (chunk, data) in parsed.chunks.into_iter().zip(stored) {
            let asset = AssetInfo::new(chunk.sha1, data.size, u64::from(chunk_stream_size(
                chunk.logical_offset,
                chunk.logical_size,
            )))
            .with_locations(data.locations);
            catalog.add_chunk(
                ChunkEntry::new(chunk.id, chunk.logical_offset, chunk.logical_size, asset),
                bundle,
            );
        }
        Ok(())
    }

    /// Add an EBX entry
    pub fn add_ebx(&self, entry: EbxEntry, bundle: BundleId) {
        self.catalog.lock().add_ebx(entry, bundle);
    }

    /// Add a resource entry
    pub fn add_res(&self, entry: ResEntry, bundle: BundleId) {
        self.catalog.lock().add_res(entry, bundle);
    }

    /// Add a chunk entry
    pub fn add_chunk(&self, entry: ChunkEntry, bundle: BundleId) {
        self.catalog.lock().add_chunk(entry, bundle);
    }
}

/// Decompressed bytes a bundle chunk's block stream produces
///
/// The low 16 bits of the logical offset are the start of the piece within
/// its first block.
pub fn chunk_stream_size(logical_offset: u32, logical_size: u32) -> u32 {
    (logical_offset & 0xFFFF) | logical_size
}

/// A TOC file to load for a superbundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TocSource {
    /// File name without extension, relative to the layer root
    pub name: String,
    /// Layer the TOC was found in
    pub layer: Layer,
}

/// Superbundle file name of a split install chunk
///
/// `win32/levels/mp_subway` in install bundle `win32/dlc1` becomes
/// `win32/dlc1/levels/mp_subway`.
pub(crate) fn split_name(install_bundle: &str, superbundle: &str) -> String {
    match superbundle.find('/') {
        Some(slash) => format!("{install_bundle}{}", &superbundle[slash..]),
        None => format!("{install_bundle}/{superbundle}"),
    }
}

/// Find the TOC of `name`, preferring the patch layer
pub(crate) fn find_toc(fs: &FileSystem, name: &str) -> Option<TocSource> {
    let file = format!("{name}.toc");
    [Layer::Patch, Layer::Base]
        .into_iter()
        .find(|layer| fs.resolve_layer_path(*layer, &file).is_some())
        .map(|layer| TocSource {
            name: name.to_string(),
            layer,
        })
}

/// TOC files contributed by the install chunks of a superbundle
///
/// Default contributions use the superbundle's own TOC, split
/// contributions a TOC under the install chunk's bundle directory.
pub(crate) fn toc_sources(fs: &FileSystem, superbundle: &SuperBundleInfo) -> Vec<TocSource> {
    let mut names = Vec::new();
    for (persistent_index, kind) in &superbundle.install_chunks {
        if kind.contains(InstallChunkType::DEFAULT) {
            names.push(superbundle.name.clone());
        }
        if kind.contains(InstallChunkType::SPLIT) {
            if let Some(chunk) = fs.topology().chunk(*persistent_index) {
                names.push(split_name(&chunk.install_bundle, &superbundle.name));
            }
        }
    }

    let mut sources: Vec<TocSource> = Vec::new();
    for name in names {
        if sources.iter().any(|s| s.name.eq_ignore_ascii_case(&name)) {
            continue;
        }
        if let Some(source) = find_toc(fs, &name) {
            sources.push(source);
        }
    }
    sources
}

/// Read and unwrap a TOC file, `Ok(None)` when the layer lacks it
pub(crate) fn read_toc(fs: &FileSystem, layer: Layer, name: &str) -> Result<Option<Vec<u8>>> {
    let Some(path) = fs.resolve_layer_path(layer, &format!("{name}.toc")) else {
        return Ok(None);
    };
    let raw = fs::read(path)?;
    Ok(Some(unwrap_toc(&raw)?.into_owned()))
}
