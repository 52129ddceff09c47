//! Game profiles and storage configuration

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use cryo_formats::CatalogLayout;
use cryo_formats::bundle::{SALT_ARIE, SALT_PECM, SALT_PECN};
use serde::{Deserialize, Serialize};

use crate::layout::BundleFormat;
use crate::{Result, StorageError};

/// A data directory relative to the game root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSource {
    /// Path relative to the game root, e.g. `Patch` or `Data`
    pub path: String,

    /// Search below `path` for `package.mft` folders instead of using it directly
    #[serde(default)]
    pub sub_dirs: bool,
}

impl DataSource {
    /// Source used as-is
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            sub_dirs: false,
        }
    }
}

/// Salt XORed into binary bundle magics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleSalt {
    /// Titles before 2017
    Pecm,
    /// Titles from 2017 on
    Pecn,
    /// The one title using its own salt
    Arie,
}

impl BundleSalt {
    /// Salt value
    pub const fn value(self) -> u32 {
        match self {
            Self::Pecm => SALT_PECM,
            Self::Pecn => SALT_PECN,
            Self::Arie => SALT_ARIE,
        }
    }
}

/// Catalog header layout as written in profiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogHeader {
    /// No record counts
    Legacy,
    /// Resource, encrypted and patch counts
    #[default]
    Counted,
}

impl From<CatalogHeader> for CatalogLayout {
    fn from(header: CatalogHeader) -> Self {
        match header {
            CatalogHeader::Legacy => Self::Legacy,
            CatalogHeader::Counted => Self::Counted,
        }
    }
}

/// Per-title settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameProfile {
    /// Profile name
    pub name: String,

    /// Frostbite release year
    pub frostbite_year: u32,

    /// Data directories, patch layer first
    pub sources: Vec<DataSource>,

    /// Whether CAS blocks of this title may be obfuscated
    #[serde(default)]
    pub cas_obfuscation: bool,

    /// Catalog header layout
    #[serde(default)]
    pub catalog_header: CatalogHeader,

    /// Force a bundle format instead of detecting it
    #[serde(default)]
    pub bundle_format: Option<BundleFormat>,

    /// Force a bundle salt instead of deriving it from the year
    #[serde(default)]
    pub bundle_salt: Option<BundleSalt>,

    /// Bundle names shared between titles, keyed by name hash
    #[serde(default)]
    pub shared_bundle_names: HashMap<i32, String>,
}

impl GameProfile {
    /// Profile with the usual `Patch` + `Data` sources
    pub fn new(name: impl Into<String>, frostbite_year: u32) -> Self {
        Self {
            name: name.into(),
            frostbite_year,
            sources: vec![DataSource::new("Patch"), DataSource::new("Data")],
            cas_obfuscation: false,
            catalog_header: CatalogHeader::default(),
            bundle_format: None,
            bundle_salt: None,
            shared_bundle_names: HashMap::new(),
        }
    }

    /// Parse a profile from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| StorageError::Config(format!("invalid profile: {e}")))
    }

    /// Load a profile from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// Bundle magic salt for this title
    pub fn salt(&self) -> u32 {
        self.bundle_salt
            .unwrap_or(if self.frostbite_year >= 2017 {
                BundleSalt::Pecn
            } else {
                BundleSalt::Pecm
            })
            .value()
    }

    /// Set the data sources
    #[must_use]
    pub fn with_sources(mut self, sources: Vec<DataSource>) -> Self {
        self.sources = sources;
        self
    }

    /// Allow or forbid obfuscated CAS blocks
    #[must_use]
    pub const fn with_cas_obfuscation(mut self, enabled: bool) -> Self {
        self.cas_obfuscation = enabled;
        self
    }

    /// Set the catalog header layout
    #[must_use]
    pub const fn with_catalog_header(mut self, header: CatalogHeader) -> Self {
        self.catalog_header = header;
        self
    }

    /// Force a bundle format
    #[must_use]
    pub const fn with_bundle_format(mut self, format: BundleFormat) -> Self {
        self.bundle_format = Some(format);
        self
    }

    /// Force a bundle salt
    #[must_use]
    pub const fn with_bundle_salt(mut self, salt: BundleSalt) -> Self {
        self.bundle_salt = Some(salt);
        self
    }
}

/// Configuration of a load session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Game installation root
    pub game_path: PathBuf,

    /// Title profile
    pub profile: GameProfile,

    /// Key script registering named keys
    #[serde(default)]
    pub key_script: Option<PathBuf>,

    /// Superbundles decoded in parallel
    #[serde(default = "default_load_threads")]
    pub load_threads: usize,
}

const fn default_load_threads() -> usize {
    1
}

impl StorageConfig {
    /// Create a configuration for the game at `game_path`
    pub fn new<P: AsRef<Path>>(game_path: P, profile: GameProfile) -> Self {
        Self {
            game_path: game_path.as_ref().to_path_buf(),
            profile,
            key_script: None,
            load_threads: default_load_threads(),
        }
    }

    /// Parse a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| StorageError::Config(format!("invalid storage config: {e}")))
    }

    /// Set the key script
    #[must_use]
    pub fn with_key_script<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.key_script = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the superbundle parallelism (at least 1)
    #[must_use]
    pub fn with_load_threads(mut self, threads: usize) -> Self {
        self.load_threads = threads.max(1);
        self
    }

    /// Replace the profile
    #[must_use]
    pub fn with_profile(mut self, profile: GameProfile) -> Self {
        self.profile = profile;
        self
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_from_json_defaults() {
        let profile = GameProfile::from_json(
            r#"{
                "name": "bf1",
                "frostbite_year": 2016,
                "sources": [{"path": "Patch"}, {"path": "Data"}]
            }"#,
        )
        .unwrap();

        assert!(!profile.cas_obfuscation);
        assert_eq!(profile.catalog_header, CatalogHeader::Counted);
        assert_eq!(profile.bundle_format, None);
        assert_eq!(profile.salt(), SALT_PECM);
        assert!(!profile.sources[0].sub_dirs);
    }

    #[test]
    fn test_salt_rule() {
        assert_eq!(GameProfile::new("a", 2017).salt(), SALT_PECN);
        assert_eq!(
            GameProfile::new("a", 2019)
                .with_bundle_salt(BundleSalt::Arie)
                .salt(),
            SALT_ARIE
        );
    }

    #[test]
    fn test_profile_serde_round_trip() {
        let mut profile = GameProfile::new("swbf2", 2017)
            .with_bundle_format(BundleFormat::Manifest2019)
            .with_catalog_header(CatalogHeader::Legacy);
        profile.shared_bundle_names.insert(-5, "win32/shared".to_string());

        let json = serde_json::to_string(&profile).unwrap();
        assert_eq!(GameProfile::from_json(&json).unwrap(), profile);
    }

    #[test]
    fn test_storage_config_builders() {
        let config = StorageConfig::new("/games/bf1", GameProfile::new("bf1", 2016))
            .with_key_script("/keys/bf1.yaml")
            .with_load_threads(0);
        assert_eq!(config.load_threads, 1);
        assert_eq!(config.key_script.as_deref(), Some(Path::new("/keys/bf1.yaml")));

        let json = serde_json::to_string(&config).unwrap();
        let back = StorageConfig::from_json(&json).unwrap();
        assert_eq!(back.game_path, config.game_path);
    }

    #[test]
    fn test_invalid_profile() {
        assert!(matches!(
            GameProfile::from_json("{\"name\": 1}"),
            Err(StorageError::Config(_))
        ));
    }
}
