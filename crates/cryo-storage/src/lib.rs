//! Frostbite game installation reader
//!
//! This crate ties the container formats of `cryo-formats` to an installed
//! game: it merges the data and patch layers, loads the `cas.cat` catalogs
//! of every install chunk, decodes every superbundle's bundles and builds an
//! asset catalog that maps EBX names, resource names and chunk GUIDs to the
//! bytes stored in CAS archives.
//!
//! # Load Pipeline
//!
//! - **Layout**: `layout.toc` from both layers, the install manifest and
//!   the initfs ([`layout::FileSystem`])
//! - **Catalogs**: base catalogs first, then patch catalogs, then patch
//!   records ([`resources::ResourceManager`])
//! - **Bundles**: one loader per bundle format ([`loaders`]), optionally
//!   several superbundles at a time
//! - **Assets**: merged per identity into [`assets::AssetCatalog`]
//!
//! # Example
//!
//! ```rust,no_run
//! use cryo_storage::{GameProfile, LoadSession, StorageConfig};
//!
//! # fn example() -> cryo_storage::Result<()> {
//! let profile = GameProfile::new("bf1", 2016);
//! let config = StorageConfig::new("/games/Battlefield 1", profile).with_load_threads(4);
//!
//! let mut session = LoadSession::open(config)?;
//! let report = session.load()?;
//! println!("{} bundles, {} skipped", report.bundles, report.skipped.len());
//!
//! if let Some(entry) = session.assets().ebx("ui/static/hud") {
//!     let bytes = session.read_asset(&entry.asset)?;
//!     println!("{} bytes", bytes.len());
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![allow(clippy::must_use_candidate)]

use thiserror::Error;

// Profiles and session configuration
pub mod config;

// Data sources, layouts, initfs and install manifest
pub mod layout;

// Install chunk and superbundle topology
pub mod install_chunk;

// Archive files and scoped superbundle handles
pub mod archive;

// Physical locations of payloads
pub mod file_info;

// Catalog loading and patch resolution
pub mod resources;

// Asset directory
pub mod assets;

// Bundle format loaders
pub mod loaders;

// Load session
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use archive::CasFileId;
pub use assets::{AssetCatalog, BundleId, SuperBundleId};
pub use config::{DataSource, GameProfile, StorageConfig};
pub use file_info::{CasLocation, ResourceLocation};
pub use layout::{BundleFormat, FileSystem, GamePlatform, Layer};
pub use resources::ResourceManager;
pub use session::{LoadReport, LoadSession, SkippedUnit};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur while loading a game installation.
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Layout or install manifest is unusable.
    #[error("Layout error: {0}")]
    Layout(String),

    /// Required file missing from every layer.
    #[error("File not found: {0}")]
    NotFound(String),

    /// Read past the end of a file.
    #[error("Read of {len} bytes at {offset} exceeds {path} ({size} bytes)")]
    OutOfBounds {
        /// File being read
        path: String,
        /// Requested offset
        offset: u64,
        /// Requested length
        len: u64,
        /// File size
        size: u64,
    },

    /// Bundle data does not match its description.
    #[error("Corrupt bundle {bundle}: {reason}")]
    CorruptBundle {
        /// Bundle name
        bundle: String,
        /// What was wrong
        reason: String,
    },

    /// Data uses something this crate cannot handle.
    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// Internal consistency check failed.
    #[error("Invariant violated: {0}")]
    Invariant(String),

    /// CAS block error.
    #[error(transparent)]
    Cas(#[from] cryo_formats::CasError),

    /// DbObject document error.
    #[error("DbObject error: {0}")]
    DbObject(#[from] cryo_formats::DbObjectError),

    /// Binary bundle error.
    #[error("Bundle error: {0}")]
    Bundle(#[from] cryo_formats::BundleError),

    /// Catalog error.
    #[error("Catalog error: {0}")]
    Catalog(#[from] cryo_formats::CatalogError),

    /// TOC container error.
    #[error("TOC error: {0}")]
    Toc(#[from] cryo_formats::TocError),

    /// Huffman name table error.
    #[error("Huffman error: {0}")]
    Huffman(#[from] cryo_formats::HuffmanError),

    /// Key or decryption error.
    #[error("Crypto error: {0}")]
    Crypto(#[from] cryo_crypto::CryptoError),

    /// Binary parsing error.
    #[error("Binary parsing error: {0}")]
    BinRw(#[from] binrw::Error),
}

impl StorageError {
    /// Whether the data itself is damaged
    pub fn is_corruption(&self) -> bool {
        match self {
            Self::CorruptBundle { .. }
            | Self::OutOfBounds { .. }
            | Self::DbObject(_)
            | Self::Catalog(_)
            | Self::Toc(_)
            | Self::Huffman(_)
            | Self::BinRw(_) => true,
            Self::Cas(e) => e.is_corruption(),
            Self::Bundle(e) => e.is_corruption(),
            _ => false,
        }
    }

    /// Whether the data needs a feature this crate does not provide
    pub fn is_unsupported(&self) -> bool {
        match self {
            Self::UnsupportedFeature(_) => true,
            Self::Cas(e) => e.is_unsupported(),
            _ => false,
        }
    }

    /// Wrap a decoding failure as a corrupt bundle
    pub(crate) fn corrupt(bundle: &str, reason: impl std::fmt::Display) -> Self {
        Self::CorruptBundle {
            bundle: bundle.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Version information for the storage system.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(StorageError::corrupt("win32/a", "cursor mismatch").is_corruption());
        assert!(StorageError::UnsupportedFeature("x".into()).is_unsupported());
        assert!(StorageError::Cas(cryo_formats::CasError::NotSupported(0x42)).is_unsupported());
        assert!(StorageError::Cas(cryo_formats::CasError::Corrupt("x".into())).is_corruption());
        assert!(!StorageError::Invariant("x".into()).is_corruption());
        assert!(!StorageError::Invariant("x".into()).is_unsupported());
    }

    #[test]
    fn test_corrupt_bundle_message() {
        let err = StorageError::corrupt("win32/ui", "ends at 10, declared 12");
        assert_eq!(
            err.to_string(),
            "Corrupt bundle win32/ui: ends at 10, declared 12"
        );
    }
}
