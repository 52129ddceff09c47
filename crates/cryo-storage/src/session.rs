//! Load session
//!
//! A [`LoadSession`] owns everything one installation needs: the merged file
//! system, the key store, the catalog index and the asset catalog. Nothing
//! is shared between sessions, so several installations can be open at once.

use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use binrw::{BinRead, Endian};
use cryo_crypto::KeyStore;
use cryo_formats::CasError;
use cryo_formats::cas::{BlockHeader, decompress_slice};
use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::assets::{AssetCatalog, AssetInfo};
use crate::config::{GameProfile, StorageConfig};
use crate::file_info::{ReadContext, ResourceLocation};
use crate::install_chunk::SuperBundleInfo;
use crate::layout::FileSystem;
use crate::loaders::{AssetLoader, LoadContext, SuperBundleLoad, loader_for};
use crate::resources::{ResourceManager, SkippedCatalog};
use crate::{Result, StorageError};

/// initfs file holding the title's key script
pub const KEY_SCRIPT_FILE: &str = "Scripts/CasEncrypt.yaml";

/// initfs file holding the zstd dictionary for EBX blocks
pub const EBX_DICTIONARY_FILE: &str = "Dictionaries/ebx.dict";

/// A superbundle or bundle left out of the catalog
#[derive(Debug)]
pub struct SkippedUnit {
    /// Superbundle name
    pub superbundle: String,
    /// Bundle name; `None` when the whole superbundle failed
    pub bundle: Option<String>,
    /// Why it was skipped
    pub error: StorageError,
}

/// Outcome of [`LoadSession::load`]
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Superbundles processed
    pub superbundles: usize,
    /// Bundles added to the catalog
    pub bundles: usize,
    /// Superbundle chunks added to the catalog
    pub chunks: usize,
    /// Catalog files read
    pub catalogs: usize,
    /// Patch records resolved
    pub patches: usize,
    /// Bundles and superbundles that failed to decode
    pub skipped: Vec<SkippedUnit>,
    /// Catalogs that failed to decode
    pub skipped_catalogs: Vec<SkippedCatalog>,
}

impl LoadReport {
    fn add(&mut self, superbundle: &SuperBundleInfo, result: Result<SuperBundleLoad>) -> Result<()> {
        self.superbundles += 1;
        match result {
            Ok(outcome) => {
                self.bundles += outcome.bundles;
                self.chunks += outcome.chunks;
                self.skipped.extend(outcome.skipped);
                Ok(())
            }
            Err(error @ StorageError::Invariant(_)) => Err(error),
            Err(error) => {
                warn!(superbundle = %superbundle.name, %error, "skipping superbundle");
                self.skipped.push(SkippedUnit {
                    superbundle: superbundle.name.clone(),
                    bundle: None,
                    error,
                });
                Ok(())
            }
        }
    }
}

/// An opened game installation
pub struct LoadSession {
    fs: FileSystem,
    keys: KeyStore,
    profile: GameProfile,
    dictionary: Option<Vec<u8>>,
    load_threads: usize,
    resources: ResourceManager,
    catalog: AssetCatalog,
}

impl LoadSession {
    /// Open the installation described by `config`
    ///
    /// Reads the key script, the layouts and the initfs. Catalogs and
    /// bundles are read by [`load`](Self::load).
    pub fn open(config: StorageConfig) -> Result<Self> {
        let mut keys = KeyStore::new();
        if let Some(script) = &config.key_script {
            let added = keys.load_script(&std::fs::read_to_string(script)?)?;
            debug!(script = %script.display(), keys = added, "loaded key script");
        }

        let fs = FileSystem::open(&config.game_path, &config.profile, &keys)?;

        if let Some(script) = fs.memory_file(KEY_SCRIPT_FILE) {
            let script = String::from_utf8_lossy(script);
            let added = keys.load_script(&script)?;
            debug!(keys = added, "loaded initfs key script");
        }
        let dictionary = fs.memory_file(EBX_DICTIONARY_FILE).map(<[u8]>::to_vec);

        Ok(Self {
            fs,
            keys,
            profile: config.profile,
            dictionary,
            load_threads: config.load_threads.max(1),
            resources: ResourceManager::new(),
            catalog: AssetCatalog::new(),
        })
    }

    /// Read every catalog and superbundle into a fresh asset catalog
    ///
    /// Corrupt or unsupported catalogs, superbundles and bundles are listed
    /// in the report and left out. Invariant violations end the load.
    pub fn load(&mut self) -> Result<LoadReport> {
        let mut resources = ResourceManager::new();
        let catalogs = resources.load_install_chunks(&self.fs, self.profile.catalog_header.into())?;
        let loader = loader_for(self.fs.bundle_format())?;

        let resources = Mutex::new(resources);
        let catalog = Mutex::new(AssetCatalog::new());
        let mut report = LoadReport {
            catalogs: catalogs.catalogs,
            patches: catalogs.patches,
            skipped_catalogs: catalogs.skipped,
            ..LoadReport::default()
        };

        let ctx = LoadContext::new(
            self.read_context(),
            &self.fs,
            &self.keys,
            &self.profile,
            &resources,
            &catalog,
        );
        let result = self.load_superbundles(loader.as_ref(), &ctx, &mut report);

        self.resources = resources.into_inner();
        self.catalog = catalog.into_inner();
        result?;

        info!(
            format = ?loader.format(),
            superbundles = report.superbundles,
            bundles = report.bundles,
            chunks = report.chunks,
            ebx = self.catalog.ebx_count(),
            res = self.catalog.res_count(),
            skipped = report.skipped.len(),
            "loaded assets"
        );
        Ok(report)
    }

    fn load_superbundles(
        &self,
        loader: &dyn AssetLoader,
        ctx: &LoadContext<'_>,
        report: &mut LoadReport,
    ) -> Result<()> {
        let superbundles = self.fs.topology().superbundles();
        if self.load_threads == 1 {
            for superbundle in superbundles {
                report.add(superbundle, loader.load_superbundle(ctx, superbundle))?;
            }
            return Ok(());
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.load_threads)
            .build()
            .map_err(|e| StorageError::Config(format!("cannot start load threads: {e}")))?;
        let abort = AtomicBool::new(false);
        let results: Vec<Result<SuperBundleLoad>> = pool.install(|| {
            superbundles
                .par_iter()
                .map(|superbundle| {
                    if abort.load(Ordering::Relaxed) {
                        return Ok(SuperBundleLoad::default());
                    }
                    let result = loader.load_superbundle(ctx, superbundle);
                    if matches!(result, Err(StorageError::Invariant(_))) {
                        abort.store(true, Ordering::Relaxed);
                    }
                    result
                })
                .collect()
        });

        for (superbundle, result) in superbundles.iter().zip(results) {
            report.add(superbundle, result)?;
        }
        Ok(())
    }

    /// Context for turning locations into bytes
    pub fn read_context(&self) -> ReadContext<'_> {
        ReadContext::new(&self.fs, &self.keys, &self.profile, self.dictionary.as_deref())
    }

    /// Decompressed bytes of an asset, read from its first location
    ///
    /// Assets without a known decompressed size (superbundle chunks) are
    /// sized from their block headers.
    pub fn read_asset(&self, asset: &AssetInfo) -> Result<Vec<u8>> {
        let location = asset
            .locations
            .first()
            .ok_or_else(|| StorageError::NotFound(format!("no location for {}", asset.sha1)))?;
        let read = self.read_context();
        if asset.original_size > 0 {
            return read.decompress(location, asset.original_size as usize);
        }

        if let ResourceLocation::Patch { .. } = location {
            return Err(StorageError::Invariant(format!(
                "patched payload {} has no decompressed size",
                asset.sha1
            )));
        }
        let stored = read.read_raw(location)?;
        let size = stream_output_size(&stored)?;
        Ok(decompress_slice(&stored, size, read.options())?)
    }

    /// Name of a bundle by its name hash
    ///
    /// Looks in the profile's shared names first, then in the loaded bundles.
    pub fn bundle_name(&self, hash: i32) -> Option<&str> {
        self.profile
            .shared_bundle_names
            .get(&hash)
            .map(String::as_str)
            .or_else(|| {
                self.catalog
                    .bundle_by_hash(hash)
                    .and_then(|id| self.catalog.bundle(id))
                    .map(|bundle| bundle.name.as_str())
            })
    }

    /// Assets loaded by the last [`load`](Self::load)
    pub fn assets(&self) -> &AssetCatalog {
        &self.catalog
    }

    /// Catalog index loaded by the last [`load`](Self::load)
    pub fn resources(&self) -> &ResourceManager {
        &self.resources
    }

    /// Merged file system
    pub fn fs(&self) -> &FileSystem {
        &self.fs
    }

    /// Keys from the key script and the initfs
    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    /// Title profile
    pub fn profile(&self) -> &GameProfile {
        &self.profile
    }

    /// Game installation root
    pub fn base_path(&self) -> &Path {
        self.fs.base_path()
    }
}

/// Decompressed size of a block stream, from its headers alone
fn stream_output_size(stored: &[u8]) -> Result<usize> {
    let mut cursor = Cursor::new(stored);
    let mut total = 0usize;
    while (cursor.position() as usize) < stored.len() {
        let header = BlockHeader::from_packed(u64::read_options(&mut cursor, Endian::Big, ())?)?;
        total += header.decompressed_size as usize;
        cursor.set_position(cursor.position() + header.payload_size() as u64);
    }
    if cursor.position() as usize != stored.len() {
        return Err(StorageError::Cas(CasError::Corrupt(format!(
            "last block ends at {}, stream is {} bytes",
            cursor.position(),
            stored.len()
        ))));
    }
    Ok(total)
}
