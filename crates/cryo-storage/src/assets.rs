//! Asset directory
//!
//! The catalog holds one entry per asset identity: EBX and resources by
//! case-insensitive name, chunks by GUID. Every bundle that lists an asset
//! adds its locations and its bundle id to that single entry.

use std::collections::{BTreeSet, HashMap};

use cryo_crypto::{ContentHash, Guid, hash_string};

use crate::file_info::ResourceLocation;

/// Index of a bundle in an [`AssetCatalog`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BundleId(pub u32);

/// Index of a superbundle in an [`AssetCatalog`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SuperBundleId(pub u32);

/// Data shared by every asset kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetInfo {
    /// Content hash, zero when the bundle gave none
    pub sha1: ContentHash,
    /// Stored size
    pub size: u64,
    /// Decompressed size
    pub original_size: u64,
    /// Known locations, in discovery order
    pub locations: Vec<ResourceLocation>,
    /// Bundles listing the asset
    pub bundles: BTreeSet<BundleId>,
}

impl AssetInfo {
    /// Asset data with no locations yet
    pub fn new(sha1: ContentHash, size: u64, original_size: u64) -> Self {
        Self {
            sha1,
            size,
            original_size,
            ..Self::default()
        }
    }

    /// Add locations
    #[must_use]
    pub fn with_locations(mut self, locations: impl IntoIterator<Item = ResourceLocation>) -> Self {
        self.locations.extend(locations);
        self
    }

    fn merge(&mut self, other: Self) {
        if self.sha1.is_zero() {
            self.sha1 = other.sha1;
        }
        self.size = self.size.max(other.size);
        self.original_size = self.original_size.max(other.original_size);
        for location in other.locations {
            if !self.locations.contains(&location) {
                self.locations.push(location);
            }
        }
        self.bundles.extend(other.bundles);
    }
}

/// EBX asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EbxEntry {
    /// Asset name
    pub name: String,
    /// Payload data
    pub asset: AssetInfo,
}

impl EbxEntry {
    /// Create an entry
    pub fn new(name: impl Into<String>, asset: AssetInfo) -> Self {
        Self {
            name: name.into(),
            asset,
        }
    }
}

/// Resource asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResEntry {
    /// Resource name
    pub name: String,
    /// Resource type hash
    pub res_type: u32,
    /// Resource id
    pub res_rid: u64,
    /// Type-specific metadata
    pub res_meta: Vec<u8>,
    /// Payload data
    pub asset: AssetInfo,
}

impl ResEntry {
    /// Create an entry
    pub fn new(name: impl Into<String>, res_type: u32, res_rid: u64, res_meta: Vec<u8>, asset: AssetInfo) -> Self {
        Self {
            name: name.into(),
            res_type,
            res_rid,
            res_meta,
            asset,
        }
    }
}

/// Chunk asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkEntry {
    /// Chunk GUID
    pub id: Guid,
    /// Offset of the first stored byte within the whole chunk
    pub logical_offset: u32,
    /// Bytes of the chunk a bundle uses
    pub logical_size: u32,
    /// Payload data
    pub asset: AssetInfo,
    /// Superbundles owning the chunk directly
    pub superbundles: BTreeSet<SuperBundleId>,
}

impl ChunkEntry {
    /// Create an entry
    pub fn new(id: Guid, logical_offset: u32, logical_size: u32, asset: AssetInfo) -> Self {
        Self {
            id,
            logical_offset,
            logical_size,
            asset,
            superbundles: BTreeSet::new(),
        }
    }
}

/// A bundle and the superbundle it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleEntry {
    /// Bundle name
    pub name: String,
    /// Owning superbundle
    pub superbundle: SuperBundleId,
}

/// Assets of a loaded installation
#[derive(Debug, Default)]
pub struct AssetCatalog {
    superbundles: Vec<String>,
    superbundle_ids: HashMap<String, SuperBundleId>,
    bundles: Vec<BundleEntry>,
    bundle_ids: HashMap<String, BundleId>,
    ebx: HashMap<String, EbxEntry>,
    res: HashMap<String, ResEntry>,
    res_rids: HashMap<u64, String>,
    chunks: HashMap<Guid, ChunkEntry>,
}

fn key(name: &str) -> String {
    name.to_ascii_lowercase()
}

impl AssetCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a superbundle, returning the existing id for a known name
    pub fn add_superbundle(&mut self, name: &str) -> SuperBundleId {
        if let Some(id) = self.superbundle_ids.get(&key(name)) {
            return *id;
        }
        let id = SuperBundleId(self.superbundles.len() as u32);
        self.superbundles.push(name.to_string());
        self.superbundle_ids.insert(key(name), id);
        id
    }

    /// Register a bundle, returning the existing id for a known name
    pub fn add_bundle(&mut self, name: &str, superbundle: SuperBundleId) -> BundleId {
        if let Some(id) = self.bundle_ids.get(&key(name)) {
            return *id;
        }
        let id = BundleId(self.bundles.len() as u32);
        self.bundles.push(BundleEntry {
            name: name.to_string(),
            superbundle,
        });
        self.bundle_ids.insert(key(name), id);
        id
    }

    /// Add or merge an EBX entry listed by `bundle`
    pub fn add_ebx(&mut self, mut entry: EbxEntry, bundle: BundleId) {
        entry.asset.bundles.insert(bundle);
        match self.ebx.get_mut(&key(&entry.name)) {
            Some(existing) => existing.asset.merge(entry.asset),
            None => {
                self.ebx.insert(key(&entry.name), entry);
            }
        }
    }

    /// Add or merge a resource entry listed by `bundle`
    pub fn add_res(&mut self, mut entry: ResEntry, bundle: BundleId) {
        entry.asset.bundles.insert(bundle);
        let name = key(&entry.name);
        match self.res.get_mut(&name) {
            Some(existing) => {
                if existing.res_rid == 0 {
                    existing.res_rid = entry.res_rid;
                }
                if existing.res_meta.iter().all(|b| *b == 0) {
                    existing.res_meta = entry.res_meta;
                }
                existing.asset.merge(entry.asset);
                if existing.res_rid != 0 {
                    self.res_rids.insert(existing.res_rid, name);
                }
            }
            None => {
                if entry.res_rid != 0 {
                    self.res_rids.insert(entry.res_rid, name.clone());
                }
                self.res.insert(name, entry);
            }
        }
    }

    /// Add or merge a chunk entry listed by `bundle`
    pub fn add_chunk(&mut self, mut entry: ChunkEntry, bundle: BundleId) {
        entry.asset.bundles.insert(bundle);
        self.merge_chunk(entry);
    }

    /// Add or merge a chunk owned by a superbundle rather than a bundle
    pub fn add_superbundle_chunk(&mut self, mut entry: ChunkEntry, superbundle: SuperBundleId) {
        entry.superbundles.insert(superbundle);
        self.merge_chunk(entry);
    }

    fn merge_chunk(&mut self, entry: ChunkEntry) {
        match self.chunks.get_mut(&entry.id) {
            Some(existing) => {
                existing.logical_offset = existing.logical_offset.max(entry.logical_offset);
                existing.logical_size = existing.logical_size.max(entry.logical_size);
                existing.superbundles.extend(entry.superbundles);
                existing.asset.merge(entry.asset);
            }
            None => {
                self.chunks.insert(entry.id, entry);
            }
        }
    }

    /// EBX entry by name, ignoring case
    pub fn ebx(&self, name: &str) -> Option<&EbxEntry> {
        self.ebx.get(&key(name))
    }

    /// Resource entry by name, ignoring case
    pub fn res(&self, name: &str) -> Option<&ResEntry> {
        self.res.get(&key(name))
    }

    /// Resource entry by resource id
    pub fn res_by_rid(&self, rid: u64) -> Option<&ResEntry> {
        self.res_rids.get(&rid).and_then(|name| self.res.get(name))
    }

    /// Chunk entry by GUID
    pub fn chunk(&self, id: Guid) -> Option<&ChunkEntry> {
        self.chunks.get(&id)
    }

    /// Bundle by id
    pub fn bundle(&self, id: BundleId) -> Option<&BundleEntry> {
        self.bundles.get(id.0 as usize)
    }

    /// Bundle id by name, ignoring case
    pub fn bundle_id(&self, name: &str) -> Option<BundleId> {
        self.bundle_ids.get(&key(name)).copied()
    }

    /// Bundle whose lowercase name hashes to `hash`
    pub fn bundle_by_hash(&self, hash: i32) -> Option<BundleId> {
        self.bundles
            .iter()
            .position(|b| hash_string(&b.name, true) == hash)
            .map(|i| BundleId(i as u32))
    }

    /// Superbundle name by id
    pub fn superbundle(&self, id: SuperBundleId) -> Option<&str> {
        self.superbundles.get(id.0 as usize).map(String::as_str)
    }

    /// Superbundle id by name, ignoring case
    pub fn superbundle_id(&self, name: &str) -> Option<SuperBundleId> {
        self.superbundle_ids.get(&key(name)).copied()
    }

    /// All bundles with their ids
    pub fn bundles(&self) -> impl Iterator<Item = (BundleId, &BundleEntry)> {
        self.bundles
            .iter()
            .enumerate()
            .map(|(i, b)| (BundleId(i as u32), b))
    }

    /// Bundles of a superbundle
    pub fn superbundle_bundles(&self, superbundle: SuperBundleId) -> impl Iterator<Item = BundleId> + '_ {
        self.bundles()
            .filter(move |(_, b)| b.superbundle == superbundle)
            .map(|(id, _)| id)
    }

    /// All EBX entries
    pub fn ebx_entries(&self) -> impl Iterator<Item = &EbxEntry> {
        self.ebx.values()
    }

    /// All resource entries
    pub fn res_entries(&self) -> impl Iterator<Item = &ResEntry> {
        self.res.values()
    }

    /// All chunk entries
    pub fn chunk_entries(&self) -> impl Iterator<Item = &ChunkEntry> {
        self.chunks.values()
    }

    /// EBX entries listed by `bundle`
    pub fn bundle_ebx(&self, bundle: BundleId) -> impl Iterator<Item = &EbxEntry> {
        self.ebx.values().filter(move |e| e.asset.bundles.contains(&bundle))
    }

    /// Resource entries listed by `bundle`
    pub fn bundle_res(&self, bundle: BundleId) -> impl Iterator<Item = &ResEntry> {
        self.res.values().filter(move |e| e.asset.bundles.contains(&bundle))
    }

    /// Chunk entries listed by `bundle`
    pub fn bundle_chunks(&self, bundle: BundleId) -> impl Iterator<Item = &ChunkEntry> {
        self.chunks.values().filter(move |e| e.asset.bundles.contains(&bundle))
    }

    /// Number of superbundles
    pub fn superbundle_count(&self) -> usize {
        self.superbundles.len()
    }

    /// Number of bundles
    pub fn bundle_count(&self) -> usize {
        self.bundles.len()
    }

    /// Number of EBX entries
    pub fn ebx_count(&self) -> usize {
        self.ebx.len()
    }

    /// Number of resource entries
    pub fn res_count(&self) -> usize {
        self.res.len()
    }

    /// Number of chunk entries
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::archive::CasFileId;
    use crate::file_info::CasLocation;
    use proptest::prelude::*;

    fn location(offset: u32) -> ResourceLocation {
        ResourceLocation::Cas(CasLocation::new(CasFileId::new(false, 0, 1), offset, 16))
    }

    fn asset(offset: u32) -> AssetInfo {
        AssetInfo::new(ContentHash::from_data(b"x"), 16, 64).with_locations([location(offset)])
    }

    #[test]
    fn test_bundles_are_idempotent() {
        let mut catalog = AssetCatalog::new();
        let sb = catalog.add_superbundle("win32/levels/mp_subway");
        assert_eq!(catalog.add_superbundle("Win32/Levels/MP_Subway"), sb);

        let a = catalog.add_bundle("win32/levels/mp_subway/mp_subway", sb);
        let b = catalog.add_bundle("win32/ui", sb);
        assert_eq!(catalog.add_bundle("WIN32/UI", sb), b);
        assert_ne!(a, b);
        assert_eq!(catalog.bundle_count(), 2);
        assert_eq!(catalog.superbundle_bundles(sb).count(), 2);
        assert_eq!(catalog.bundle_by_hash(hash_string("win32/ui", true)), Some(b));
    }

    #[test]
    fn test_ebx_merges_by_name() {
        let mut catalog = AssetCatalog::new();
        let sb = catalog.add_superbundle("sb");
        let a = catalog.add_bundle("a", sb);
        let b = catalog.add_bundle("b", sb);

        catalog.add_ebx(EbxEntry::new("UI/Hud", asset(0)), a);
        catalog.add_ebx(EbxEntry::new("ui/hud", asset(0)), b);
        catalog.add_ebx(EbxEntry::new("ui/hud", asset(32)), b);

        assert_eq!(catalog.ebx_count(), 1);
        let entry = catalog.ebx("UI/HUD").unwrap();
        assert_eq!(entry.asset.bundles.len(), 2);
        assert_eq!(entry.asset.locations.len(), 2);
        assert_eq!(catalog.bundle_ebx(a).count(), 1);
    }

    #[test]
    fn test_res_lookup_by_rid() {
        let mut catalog = AssetCatalog::new();
        let sb = catalog.add_superbundle("sb");
        let a = catalog.add_bundle("a", sb);
        catalog.add_res(ResEntry::new("tex/a", 0x5C4954A6, 0, vec![0; 16], asset(0)), a);
        catalog.add_res(ResEntry::new("tex/a", 0x5C4954A6, 77, vec![1; 16], asset(0)), a);

        let entry = catalog.res_by_rid(77).unwrap();
        assert_eq!(entry.name, "tex/a");
        assert_eq!(entry.res_meta, vec![1; 16]);
        assert_eq!(catalog.res_count(), 1);
    }

    #[test]
    fn test_superbundle_chunks() {
        let mut catalog = AssetCatalog::new();
        let sb = catalog.add_superbundle("sb");
        let bundle = catalog.add_bundle("a", sb);
        let id = Guid::from_bytes([7; 16]);

        catalog.add_superbundle_chunk(ChunkEntry::new(id, 0, 0, asset(0)), sb);
        catalog.add_chunk(ChunkEntry::new(id, 0x10000, 0x200, asset(64)), bundle);

        let chunk = catalog.chunk(id).unwrap();
        assert!(chunk.superbundles.contains(&sb));
        assert!(chunk.asset.bundles.contains(&bundle));
        assert_eq!(chunk.logical_offset, 0x10000);
        assert_eq!(chunk.asset.locations.len(), 2);
        assert_eq!(catalog.chunk_count(), 1);
    }

    proptest! {
        #[test]
        fn prop_one_entry_per_identity(calls in prop::collection::vec((0u8..3, 0u8..6, 0u32..4), 0..64)) {
            let mut catalog = AssetCatalog::new();
            let sb = catalog.add_superbundle("sb");
            let bundles: Vec<BundleId> = (0..4).map(|i| catalog.add_bundle(&format!("b{i}"), sb)).collect();
            let mut expected: HashMap<(u8, u8), BTreeSet<BundleId>> = HashMap::new();

            for (kind, identity, bundle) in &calls {
                let bundle = bundles[*bundle as usize];
                expected.entry((*kind, *identity)).or_default().insert(bundle);
                let info = asset(u32::from(*identity));
                match kind {
                    0 => catalog.add_ebx(EbxEntry::new(format!("ebx{identity}"), info), bundle),
                    1 => catalog.add_res(ResEntry::new(format!("res{identity}"), 1, 0, vec![], info), bundle),
                    _ => catalog.add_chunk(ChunkEntry::new(Guid::from_bytes([*identity; 16]), 0, 0, info), bundle),
                }
            }

            let count = |kind: u8| expected.keys().filter(|(k, _)| *k == kind).count();
            prop_assert_eq!(catalog.ebx_count(), count(0));
            prop_assert_eq!(catalog.res_count(), count(1));
            prop_assert_eq!(catalog.chunk_count(), count(2));

            for ((kind, identity), bundles) in &expected {
                let actual = match kind {
                    0 => &catalog.ebx(&format!("EBX{identity}")).unwrap().asset.bundles,
                    1 => &catalog.res(&format!("res{identity}")).unwrap().asset.bundles,
                    _ => &catalog.chunk(Guid::from_bytes([*identity; 16])).unwrap().asset.bundles,
                };
                prop_assert_eq!(actual, bundles);
            }
        }
    }
}
