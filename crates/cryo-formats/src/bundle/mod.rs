//! Binary bundles
//!
//! A bundle lists the EBX, resource and chunk entries loaded together. Every
//! generation after Dynamic2018 CAS bundles stores this list in one fixed
//! binary layout, found inline in superbundles, in CAS archives or in split
//! TOC data files.
//!
//! # Features
//!
//! - Magic and byte-order probing with per-title salts
//! - Standard, Kelvin and encrypted variants
//! - Delta bundle reconstruction for patched non-CAS superbundles
//! - Builder producing the same layout

mod binary;
mod builder;
mod delta;
mod error;
mod magic;

pub use binary::{BinaryBundle, BundleChunk, BundleEbx, BundleRes, bundle_len};
pub use builder::BinaryBundleBuilder;
pub use delta::{BundleDeltaOp, DELTA_BUNDLE_MAGIC, is_delta_bundle, rebuild_delta_bundle};
pub use error::{BundleError, BundleResult};
pub use magic::{BundleMagic, SALT_ARIE, SALT_PECM, SALT_PECN, encode_magic, probe_magic};
