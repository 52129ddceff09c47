//! Named encryption key management
//!
//! Keys are identified by name (for example `BundleEncryptionKey`) or by the
//! key id string carried in encrypted catalog entries.

use std::collections::HashMap;
use std::fmt;

use crate::error::CryptoError;

/// Key used to XOR-obfuscate CAS blocks
pub const CAS_OBFUSCATION_KEY: &str = "CasObfuscationKey";

/// Key used for encrypted binary bundles and Kelvin TOCs
pub const BUNDLE_ENCRYPTION_KEY: &str = "BundleEncryptionKey";

/// Key used for an encrypted initfs
pub const INIT_FS_KEY: &str = "InitFsKey";

/// Store for named encryption keys
#[derive(Clone, Default)]
pub struct KeyStore {
    keys: HashMap<String, Vec<u8>>,
}

impl KeyStore {
    /// Create an empty key store
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a key script
    ///
    /// The script format pairs a `key:` line holding hex bytes with one or
    /// more following `keyid:` lines naming it:
    ///
    /// ```text
    /// key: 00112233445566778899AABBCCDDEEFF
    /// keyid: 9B0D5D4A
    /// ```
    pub fn from_script(script: &str) -> Result<Self, CryptoError> {
        let mut store = Self::new();
        store.load_script(script)?;
        Ok(store)
    }

    /// Add the keys of a key script to this store
    pub fn load_script(&mut self, script: &str) -> Result<usize, CryptoError> {
        let mut current: Option<Vec<u8>> = None;
        let mut added = 0;

        for line in script.lines() {
            let line = line.trim();
            if let Some(id) = line.strip_prefix("keyid:") {
                let key = current.as_ref().ok_or_else(|| {
                    CryptoError::InvalidKeyFormat(format!(
                        "keyid {} appears before any key",
                        id.trim()
                    ))
                })?;
                self.keys.insert(id.trim().to_string(), key.clone());
                added += 1;
            } else if let Some(hex_key) = line.strip_prefix("key:") {
                let bytes = hex::decode(hex_key.trim())
                    .map_err(|e| CryptoError::InvalidKeyFormat(format!("invalid hex: {e}")))?;
                current = Some(bytes);
            }
        }

        Ok(added)
    }

    /// Get a key by name
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.keys.get(name).map(Vec::as_slice)
    }

    /// Get a key by name, failing if it is absent
    pub fn require(&self, name: &str) -> Result<&[u8], CryptoError> {
        self.get(name)
            .ok_or_else(|| CryptoError::KeyNotFound(name.to_string()))
    }

    /// Whether a key with this name exists
    pub fn contains(&self, name: &str) -> bool {
        self.keys.contains_key(name)
    }

    /// Add a key to the store
    pub fn add(&mut self, name: impl Into<String>, key: impl Into<Vec<u8>>) {
        self.keys.insert(name.into(), key.into());
    }

    /// Add a key from a hex string
    pub fn add_hex(&mut self, name: impl Into<String>, hex_key: &str) -> Result<(), CryptoError> {
        let bytes = hex::decode(hex_key.trim())
            .map_err(|e| CryptoError::InvalidKeyFormat(format!("invalid hex: {e}")))?;
        self.keys.insert(name.into(), bytes);
        Ok(())
    }

    /// Remove a key from the store
    pub fn remove(&mut self, name: &str) -> Option<Vec<u8>> {
        self.keys.remove(name)
    }

    /// Get the number of keys in the store
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // key material stays out of logs
        let mut names: Vec<&String> = self.keys.keys().collect();
        names.sort();
        f.debug_struct("KeyStore").field("keys", &names).finish()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_script_assigns_key_to_following_ids() {
        let script = "\
# keys
key: 000102030405060708090A0B0C0D0E0F
keyid: first
keyid: second
key: FFFF
keyid: third
";
        let store = KeyStore::from_script(script).unwrap();
        assert_eq!(store.len(), 3);
        assert_eq!(store.get("first"), store.get("second"));
        assert_eq!(store.get("first").unwrap()[15], 0x0F);
        assert_eq!(store.get("third"), Some(&[0xFF, 0xFF][..]));
    }

    #[test]
    fn test_keyid_before_key_fails() {
        assert!(KeyStore::from_script("keyid: orphan").is_err());
    }

    #[test]
    fn test_require_missing() {
        let store = KeyStore::new();
        assert!(matches!(
            store.require(BUNDLE_ENCRYPTION_KEY),
            Err(CryptoError::KeyNotFound(name)) if name == BUNDLE_ENCRYPTION_KEY
        ));
    }

    #[test]
    fn test_debug_hides_material() {
        let mut store = KeyStore::new();
        store.add_hex(INIT_FS_KEY, "DEADBEEF").unwrap();
        let debug = format!("{store:?}");
        assert!(debug.contains(INIT_FS_KEY));
        assert!(!debug.to_lowercase().contains("deadbeef"));
    }
}
