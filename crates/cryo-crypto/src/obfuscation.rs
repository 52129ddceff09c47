//! XOR obfuscation applied to CAS block payloads by some titles

use crate::error::CryptoError;

/// Length of the repeating obfuscation key
pub const OBFUSCATION_KEY_PERIOD: usize = 0x4000;

/// Remove XOR obfuscation from a block payload in place
///
/// Byte `i` is XORed with `key[i % OBFUSCATION_KEY_PERIOD]`. The key must
/// cover the full period.
pub fn deobfuscate(data: &mut [u8], key: &[u8]) -> Result<(), CryptoError> {
    if key.len() < OBFUSCATION_KEY_PERIOD {
        return Err(CryptoError::InvalidKeySize {
            expected: OBFUSCATION_KEY_PERIOD,
            actual: key.len(),
        });
    }

    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i & (OBFUSCATION_KEY_PERIOD - 1)];
    }
    Ok(())
}
