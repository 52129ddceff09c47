//! Catalog loading and patch resolution
//!
//! The resource manager maps content hashes to every known location of the
//! payload. Catalogs are merged per install chunk: all base-layer catalogs
//! first, then all patch-layer catalogs, and only then the patch records,
//! which need both the delta stream (patch layer) and the base stream (base
//! layer) to be known.
//!
//! A hash's location list is handed out once. The first bundle asking for a
//! hash claims it; later requests get `None` and rely on the asset catalog,
//! which already holds the locations under the asset's identity.

use std::collections::HashMap;
use std::fs;

use cryo_crypto::ContentHash;
use cryo_formats::catalog::{CatPatchEntry, Catalog, CatalogLayout};
use tracing::{debug, info, warn};

use crate::archive::CasFileId;
use crate::file_info::{CasLocation, ResourceLocation};
use crate::install_chunk::InstallChunkInfo;
use crate::layout::{FileSystem, Layer};
use crate::{Result, StorageError};

/// Catalog file name inside an install bundle directory
pub const CATALOG_FILE: &str = "cas.cat";

#[derive(Debug, Default)]
struct ResourceEntry {
    locations: Vec<ResourceLocation>,
    claimed: bool,
}

/// Entries of one catalog file, kept until its patch records are resolved
#[derive(Debug, Default)]
pub struct LayerCatalog {
    entries: HashMap<ContentHash, Vec<CasLocation>>,
    patches: Vec<CatPatchEntry>,
}

impl LayerCatalog {
    /// Locations this catalog declares for `sha1`
    pub fn locations(&self, sha1: &ContentHash) -> Option<&[CasLocation]> {
        self.entries.get(sha1).map(Vec::as_slice)
    }

    /// Patch records awaiting resolution
    pub fn patches(&self) -> &[CatPatchEntry] {
        &self.patches
    }

    /// Number of distinct hashes
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog declared nothing
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.patches.is_empty()
    }
}

/// Catalog that could not be used
#[derive(Debug)]
pub struct SkippedCatalog {
    /// Install bundle of the catalog
    pub install_bundle: String,
    /// Layer of the catalog
    pub layer: Layer,
    /// Why it was skipped
    pub error: StorageError,
}

/// Outcome of [`ResourceManager::load_install_chunks`]
#[derive(Debug, Default)]
pub struct CatalogReport {
    /// Catalog files read
    pub catalogs: usize,
    /// Patch records resolved
    pub patches: usize,
    /// Catalogs skipped as corrupt
    pub skipped: Vec<SkippedCatalog>,
}

/// Content hash to location index built from `cas.cat` files
#[derive(Debug, Default)]
pub struct ResourceManager {
    entries: HashMap<ContentHash, ResourceEntry>,
    sizes: HashMap<ContentHash, u32>,
}

impl ResourceManager {
    /// Create an empty manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct hashes
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no catalog has been loaded
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any location is known for `sha1`
    pub fn contains(&self, sha1: &ContentHash) -> bool {
        self.entries.contains_key(sha1)
    }

    /// Known locations of `sha1` without claiming them
    pub fn locations(&self, sha1: &ContentHash) -> Option<&[ResourceLocation]> {
        self.entries.get(sha1).map(|e| e.locations.as_slice())
    }

    /// Largest size any catalog declared for `sha1`
    pub fn get_size(&self, sha1: &ContentHash) -> Option<u32> {
        self.sizes.get(sha1).copied()
    }

    fn push(&mut self, sha1: ContentHash, location: ResourceLocation) {
        self.entries.entry(sha1).or_default().locations.push(location);
    }

    fn record(&mut self, layer_catalog: &mut LayerCatalog, sha1: ContentHash, location: CasLocation) {
        let size = self.sizes.entry(sha1).or_insert(location.size);
        *size = (*size).max(location.size);
        layer_catalog
            .entries
            .entry(sha1)
            .or_default()
            .push(location.clone());
        self.push(sha1, ResourceLocation::Cas(location));
    }

    /// Merge a parsed catalog of one install chunk and layer
    ///
    /// Plain and encrypted records are added right away; patch records are
    /// returned in the [`LayerCatalog`] for [`Self::resolve_patches`].
    pub fn add_catalog(&mut self, catalog: &Catalog, layer: Layer, install_chunk: u32) -> LayerCatalog {
        let mut layer_catalog = LayerCatalog::default();
        let file = |archive_index: u32| CasFileId::new(layer.is_patch(), install_chunk, archive_index);

        for entry in &catalog.resources {
            let location = CasLocation::new(file(entry.archive_index), entry.offset, entry.size)
                .with_logical_offset(entry.logical_offset);
            self.record(&mut layer_catalog, entry.sha1, location);
        }
        for encrypted in &catalog.encrypted {
            let entry = &encrypted.entry;
            let location = CasLocation::new(file(entry.archive_index), entry.offset, entry.size)
                .with_logical_offset(entry.logical_offset)
                .with_key(encrypted.key_id.clone());
            self.record(&mut layer_catalog, entry.sha1, location);
        }
        layer_catalog.patches.clone_from(&catalog.patches);
        layer_catalog
    }

    /// Turn patch records into patched locations
    ///
    /// The delta hash must have exactly one location in `delta_layer`. The
    /// base hash is looked up in `base_layer`, then among all loaded
    /// entries; it may be missing. When it has several locations the lowest
    /// (layer, install chunk, archive, offset) is used.
    pub fn resolve_patches(
        &mut self,
        patches: &[CatPatchEntry],
        delta_layer: &LayerCatalog,
        base_layer: Option<&LayerCatalog>,
    ) -> Result<usize> {
        for patch in patches {
            let delta = match delta_layer.locations(&patch.delta_sha1) {
                Some([single]) => single.clone(),
                Some(many) => {
                    return Err(StorageError::Invariant(format!(
                        "delta {} of {} has {} locations",
                        patch.delta_sha1,
                        patch.sha1,
                        many.len()
                    )));
                }
                None => {
                    return Err(StorageError::Invariant(format!(
                        "delta {} of {} is not loaded",
                        patch.delta_sha1, patch.sha1
                    )));
                }
            };

            let base = base_layer
                .and_then(|layer| layer.locations(&patch.base_sha1))
                .and_then(|locations| locations.iter().min().cloned())
                .or_else(|| self.lowest_cas_location(&patch.base_sha1));

            self.push(patch.sha1, ResourceLocation::Patch { base, delta });
        }
        Ok(patches.len())
    }

    fn lowest_cas_location(&self, sha1: &ContentHash) -> Option<CasLocation> {
        self.entries
            .get(sha1)?
            .locations
            .iter()
            .filter_map(|location| match location {
                ResourceLocation::Cas(cas) => Some(cas),
                _ => None,
            })
            .min()
            .cloned()
    }

    /// Read the catalog of `chunk` in `layer`
    ///
    /// Returns `Ok(None)` when the layer has no catalog for the chunk.
    pub fn load_catalog(
        &mut self,
        fs: &FileSystem,
        chunk: &InstallChunkInfo,
        layer: Layer,
        layout: CatalogLayout,
    ) -> Result<Option<LayerCatalog>> {
        let name = if chunk.install_bundle.is_empty() {
            CATALOG_FILE.to_string()
        } else {
            format!("{}/{CATALOG_FILE}", chunk.install_bundle)
        };
        let Some(path) = fs.resolve_layer_path(layer, &name) else {
            return Ok(None);
        };

        let data = fs::read(&path)?;
        let catalog = Catalog::parse(&data, layout)?;
        let loaded = self.add_catalog(&catalog, layer, chunk.persistent_index);
        debug!(
            install_bundle = %chunk.install_bundle,
            layer = ?layer,
            resources = catalog.resources.len(),
            encrypted = catalog.encrypted.len(),
            patches = catalog.patches.len(),
            "loaded catalog"
        );
        Ok(Some(loaded))
    }

    /// Load every install chunk's catalogs and resolve their patch records
    ///
    /// A corrupt catalog is skipped and reported; the patch records of a
    /// chunk whose base catalog is corrupt are skipped with it. Broken patch
    /// records are invariant violations and end the load.
    pub fn load_install_chunks(&mut self, fs: &FileSystem, layout: CatalogLayout) -> Result<CatalogReport> {
        let mut report = CatalogReport::default();
        let chunks = fs.topology().chunks();

        let mut base = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            base.push(self.load_layer(fs, chunk, Layer::Base, layout, &mut report)?);
        }
        let mut patch = Vec::with_capacity(chunks.len());
        if fs.has_patch_layer() {
            for chunk in chunks {
                patch.push(self.load_layer(fs, chunk, Layer::Patch, layout, &mut report)?);
            }
        }

        for (index, patch_catalog) in patch.iter().enumerate() {
            let LayerState::Loaded(delta_layer) = patch_catalog else {
                continue;
            };
            if delta_layer.patches.is_empty() {
                continue;
            }
            let base_layer = match &base[index] {
                LayerState::Loaded(catalog) => Some(catalog),
                LayerState::Absent => None,
                LayerState::Corrupt => {
                    warn!(
                        install_bundle = %chunks[index].install_bundle,
                        patches = delta_layer.patches.len(),
                        "skipping patch records of chunk with corrupt base catalog"
                    );
                    continue;
                }
            };
            report.patches += self.resolve_patches(&delta_layer.patches, delta_layer, base_layer)?;
        }

        info!(
            hashes = self.entries.len(),
            catalogs = report.catalogs,
            patches = report.patches,
            skipped = report.skipped.len(),
            "loaded install chunk catalogs"
        );
        Ok(report)
    }

    fn load_layer(
        &mut self,
        fs: &FileSystem,
        chunk: &InstallChunkInfo,
        layer: Layer,
        layout: CatalogLayout,
        report: &mut CatalogReport,
    ) -> Result<LayerState> {
        match self.load_catalog(fs, chunk, layer, layout) {
            Ok(Some(catalog)) => {
                report.catalogs += 1;
                Ok(LayerState::Loaded(catalog))
            }
            Ok(None) => Ok(LayerState::Absent),
            Err(error) if error.is_corruption() => {
                warn!(install_bundle = %chunk.install_bundle, layer = ?layer, %error, "skipping corrupt catalog");
                report.skipped.push(SkippedCatalog {
                    install_bundle: chunk.install_bundle.clone(),
                    layer,
                    error,
                });
                Ok(LayerState::Corrupt)
            }
            Err(error) => Err(error),
        }
    }

    /// Claim the locations of `sha1`
    ///
    /// Returns `None` for unknown hashes and for hashes already claimed.
    pub fn get_file_infos(&mut self, sha1: &ContentHash) -> Option<Vec<ResourceLocation>> {
        let entry = self.entries.get_mut(sha1)?;
        if entry.claimed {
            return None;
        }
        entry.claimed = true;
        Some(entry.locations.clone())
    }

    /// Claim patched locations of `sha1` built from a delta and a base hash
    ///
    /// Used by bundles that name the delta and base hashes themselves. Every
    /// delta location is paired with the lowest base location.
    pub fn get_patch_file_infos(
        &mut self,
        sha1: &ContentHash,
        delta_sha1: &ContentHash,
        base_sha1: &ContentHash,
    ) -> Result<Option<Vec<ResourceLocation>>> {
        if self.entries.get(sha1).is_some_and(|e| e.claimed) {
            return Ok(None);
        }

        let deltas: Vec<CasLocation> = self
            .entries
            .get(delta_sha1)
            .map(|e| {
                e.locations
                    .iter()
                    .filter_map(|l| match l {
                        ResourceLocation::Cas(cas) => Some(cas.clone()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        if deltas.is_empty() {
            return Err(StorageError::Invariant(format!(
                "delta {delta_sha1} of {sha1} is not loaded"
            )));
        }
        let base = self.lowest_cas_location(base_sha1);

        let entry = self.entries.entry(*sha1).or_default();
        entry.claimed = true;
        entry.locations.extend(deltas.into_iter().map(|delta| ResourceLocation::Patch {
            base: base.clone(),
            delta,
        }));
        Ok(Some(entry.locations.clone()))
    }
}

#[derive(Debug)]
enum LayerState {
    Loaded(LayerCatalog),
    Absent,
    Corrupt,
}
