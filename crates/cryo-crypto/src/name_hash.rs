//! Name hashing used to key bundles and shared bundle tables
//!
//! Frostbite hashes names with a djb2 variant that XORs each character in
//! after multiplying by 33.

/// Initial hash value
const HASH_SEED: u32 = 5381;

/// Multiplier applied before each character is mixed in
const HASH_PRIME: u32 = 33;

/// Hash a name, optionally lowercasing it first
pub fn hash_string(name: &str, lowercase: bool) -> i32 {
    let hash = name.chars().fold(HASH_SEED, |hash, c| {
        let c = if lowercase { c.to_ascii_lowercase() } else { c };
        hash.wrapping_mul(HASH_PRIME) ^ u32::from(c)
    });
    hash as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_seed() {
        assert_eq!(hash_string("", false), 5381);
    }

    #[test]
    fn test_known_value() {
        // (5381 * 33) ^ 'a' = 177573 ^ 97
        assert_eq!(hash_string("a", false), 177_573 ^ 97);
    }

    #[test]
    fn test_lowercase_folds_case() {
        assert_eq!(
            hash_string("Win32/Levels/MP_Subway", true),
            hash_string("win32/levels/mp_subway", false)
        );
        assert_ne!(
            hash_string("Win32/Levels/MP_Subway", false),
            hash_string("win32/levels/mp_subway", false)
        );
    }
}
