//! Install chunk and superbundle topology
//!
//! Install chunks are the patch-distributable packages of a title. Each one
//! owns a set of CAS archives under its install bundle directory and takes
//! part in superbundles either fully (`Default`) or through split TOCs
//! (`Split`). Catalog and archive locators name install chunks by their
//! persistent index, which is independent of manifest order.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::BitOr;

use cryo_crypto::Guid;

/// How an install chunk takes part in a superbundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct InstallChunkType(u8);

impl InstallChunkType {
    /// Not part of the superbundle
    pub const NONE: Self = Self(0);
    /// Bundles live in the superbundle's own TOC
    pub const DEFAULT: Self = Self(1);
    /// Bundles live in a TOC under the install bundle
    pub const SPLIT: Self = Self(2);

    /// Whether every bit of `other` is set
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Raw flag bits
    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for InstallChunkType {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// One install chunk from the install manifest
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallChunkInfo {
    /// Install chunk GUID
    pub id: Guid,
    /// Display name
    pub name: String,
    /// Directory holding this chunk's `cas.cat` and archives
    pub install_bundle: String,
    /// Shipped with every installation
    pub always_installed: bool,
    /// Stable index used by catalogs and locators
    pub persistent_index: u32,
    /// Superbundles this chunk contributes to directly
    pub superbundles: Vec<String>,
    /// Superbundles this chunk contributes split TOCs to
    pub split_superbundles: Vec<String>,
    /// Install chunks this one depends on
    pub required_chunks: Vec<Guid>,
}

/// A superbundle and the install chunks contributing to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperBundleInfo {
    /// Superbundle name, e.g. `win32/levels/mp_subway`
    pub name: String,
    /// Contribution per install chunk persistent index
    pub install_chunks: BTreeMap<u32, InstallChunkType>,
}

impl SuperBundleInfo {
    /// Superbundle without contributions
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            install_chunks: BTreeMap::new(),
        }
    }

    fn mark(&mut self, persistent_index: u32, kind: InstallChunkType) {
        let entry = self.install_chunks.entry(persistent_index).or_default();
        *entry = *entry | kind;
    }
}

/// Install chunks and superbundles of an installation
#[derive(Debug, Clone, Default)]
pub struct InstallTopology {
    chunks: Vec<InstallChunkInfo>,
    persistent: HashMap<u32, usize>,
    superbundles: Vec<SuperBundleInfo>,
}

impl InstallTopology {
    /// Topology with the given superbundles and no install chunks
    pub fn new<I, S>(superbundles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut topology = Self::default();
        for name in superbundles {
            topology.add_superbundle(name);
        }
        topology
    }

    /// Add a superbundle unless one with the same name (any case) exists
    pub fn add_superbundle(&mut self, name: impl Into<String>) {
        let name = name.into();
        if self.superbundle(&name).is_none() {
            self.superbundles.push(SuperBundleInfo::new(name));
        }
    }

    /// Single install chunk holding every superbundle, for titles without an
    /// install manifest
    pub fn add_implicit_chunk(&mut self) {
        let mut chunk = InstallChunkInfo::default();
        for sb in &mut self.superbundles {
            chunk.superbundles.push(sb.name.clone());
            sb.mark(0, InstallChunkType::DEFAULT);
        }
        self.persistent.insert(0, self.chunks.len());
        self.chunks.push(chunk);
    }

    /// Register an install chunk and its superbundle contributions
    ///
    /// Superbundles the layout does not list are added. Returns `false` when
    /// the persistent index is already taken.
    pub fn add_chunk(&mut self, chunk: InstallChunkInfo) -> bool {
        if self.persistent.contains_key(&chunk.persistent_index) {
            return false;
        }
        let index = chunk.persistent_index;

        for (names, kind) in [
            (&chunk.superbundles, InstallChunkType::DEFAULT),
            (&chunk.split_superbundles, InstallChunkType::SPLIT),
        ] {
            for name in names {
                self.add_superbundle(name.as_str());
                if let Some(sb) = self.superbundle_mut(name) {
                    sb.mark(index, kind);
                }
            }
        }

        self.persistent.insert(index, self.chunks.len());
        self.chunks.push(chunk);
        true
    }

    /// Install chunks in manifest order
    pub fn chunks(&self) -> &[InstallChunkInfo] {
        &self.chunks
    }

    /// Superbundles in layout order
    pub fn superbundles(&self) -> &[SuperBundleInfo] {
        &self.superbundles
    }

    /// Install chunk by persistent index
    pub fn chunk(&self, persistent_index: u32) -> Option<&InstallChunkInfo> {
        self.persistent
            .get(&persistent_index)
            .and_then(|&i| self.chunks.get(i))
    }

    /// Install chunk by GUID
    pub fn chunk_by_id(&self, id: Guid) -> Option<&InstallChunkInfo> {
        self.chunks.iter().find(|c| c.id == id)
    }

    /// Superbundle by name, ignoring case
    pub fn superbundle(&self, name: &str) -> Option<&SuperBundleInfo> {
        self.superbundles
            .iter()
            .find(|sb| sb.name.eq_ignore_ascii_case(name))
    }

    fn superbundle_mut(&mut self, name: &str) -> Option<&mut SuperBundleInfo> {
        self.superbundles
            .iter_mut()
            .find(|sb| sb.name.eq_ignore_ascii_case(name))
    }

    /// Whether `chunk` depends on `required`, directly or through other chunks
    pub fn requires_install_chunk(&self, chunk: &InstallChunkInfo, required: Guid) -> bool {
        let mut seen = HashSet::new();
        let mut pending: Vec<Guid> = chunk.required_chunks.clone();

        while let Some(id) = pending.pop() {
            if id == required {
                return true;
            }
            if !seen.insert(id) {
                continue;
            }
            if let Some(next) = self.chunk_by_id(id) {
                pending.extend(next.required_chunks.iter().copied());
            }
        }
        false
    }
}
