//! Cryptographic primitives for Frostbite asset archives
//!
//! This crate provides the small value types and cryptographic operations used
//! throughout the archive pipeline.
//!
//! # Components
//!
//! - **Hashing**: SHA-1 content hashes addressing CAS payloads, djb-style
//!   name hashes used to key bundles
//! - **Identity**: 128-bit GUIDs identifying chunks and install chunks
//! - **Encryption**: AES-128-CBC for encrypted CAS entries, bundles and the
//!   initfs; XOR obfuscation for CAS blocks on titles that use it
//! - **Key Management**: named key storage fed from key scripts
//!
//! # Examples
//!
//! ## Content Hash Generation
//!
//! ```
//! use cryo_crypto::ContentHash;
//!
//! let hash = ContentHash::from_data(b"Hello, World!");
//! assert_eq!(hash.to_hex(), "0a0a9f2a6772942557ab5355d76af442f8f65e01");
//! ```
//!
//! ## Key Scripts
//!
//! ```
//! use cryo_crypto::KeyStore;
//!
//! let script = "key: 00112233445566778899AABBCCDDEEFF\nkeyid: BundleEncryptionKey\n";
//! let store = KeyStore::from_script(script).unwrap();
//! assert!(store.contains("BundleEncryptionKey"));
//! ```

#![warn(missing_docs)]

pub mod block_cipher;
pub mod content_hash;
pub mod error;
pub mod guid;
pub mod keys;
pub mod name_hash;
pub mod obfuscation;

pub use error::CryptoError;

// Re-export commonly used types
pub use block_cipher::{Padding, decrypt_cbc, encrypt_cbc};
pub use content_hash::ContentHash;
pub use guid::Guid;
pub use keys::{BUNDLE_ENCRYPTION_KEY, CAS_OBFUSCATION_KEY, INIT_FS_KEY, KeyStore};
pub use name_hash::hash_string;
pub use obfuscation::{OBFUSCATION_KEY_PERIOD, deobfuscate};
