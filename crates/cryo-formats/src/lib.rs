//! Binary formats of Frostbite asset archives
//!
//! This crate provides symmetric (parser and builder) implementations of the
//! containers that locate and carry asset bytes in a Frostbite installation.
//! Every parser works on byte slices or readers and never touches the file
//! system; resolving files is left to `cryo-storage`.
//!
//! # Supported Formats
//!
//! - **CAS blocks**: block-framed payloads with zlib, zstd, LZ4 and Oodle
//!   codecs, XOR obfuscation and delta patching
//! - **DbObject**: self-describing documents used by layouts, manifests,
//!   the initfs and Dynamic2018 TOCs
//! - **TOC containers**: signed and obfuscated wrappers around TOC files
//! - **Binary bundles**: fixed-layout EBX/resource/chunk tables, including
//!   encrypted and delta-patched variants
//! - **Huffman names**: compressed bundle name tables of Manifest2019 TOCs
//! - **Catalogs**: `cas.cat` content hash to archive location tables
//!
//! # Example
//!
//! ```
//! use cryo_formats::cas::{CompressionType, DecodeOptions, decompress_slice, encode_stream};
//!
//! let payload = b"frostbite".repeat(100);
//! let encoded = encode_stream(&payload, 256, CompressionType::None).unwrap();
//! let decoded = decompress_slice(&encoded, payload.len(), &DecodeOptions::new()).unwrap();
//! assert_eq!(decoded, payload);
//! ```

#![warn(missing_docs)]

pub mod block;
pub mod bundle;
pub mod cas;
pub mod catalog;
pub mod dbobject;
pub mod huffman;
pub mod toc_file;

pub use block::{BufferOverflow, ShiftBuffer};
pub use bundle::{BinaryBundle, BundleError};
pub use cas::{CasError, CompressionType, DecodeOptions};
pub use catalog::{Catalog, CatalogError, CatalogLayout};
pub use dbobject::{DbDict, DbObjectError, DbValue};
pub use huffman::{HuffmanDecoder, HuffmanError};
pub use toc_file::{TocError, unwrap_toc};
