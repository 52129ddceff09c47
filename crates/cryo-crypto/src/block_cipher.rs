//! AES-128-CBC as used for encrypted CAS entries, bundles and the initfs
//!
//! Frostbite uses the key itself as the initialization vector. With
//! [`Padding::None`] only the 16-byte aligned prefix is transformed and any
//! trailing partial block is passed through untouched.

use aes::Aes128;
use cipher::block_padding::{NoPadding, Pkcs7};
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use crate::error::CryptoError;

type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes128CbcEnc = cbc::Encryptor<Aes128>;

/// AES block size in bytes
pub const BLOCK_SIZE: usize = 16;

/// Padding mode for CBC operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    /// No padding, trailing partial block left as-is
    None,
    /// PKCS#7 padding
    Pkcs7,
}

fn check_key(key: &[u8]) -> Result<(), CryptoError> {
    if key.len() == BLOCK_SIZE {
        Ok(())
    } else {
        Err(CryptoError::InvalidKeySize {
            expected: BLOCK_SIZE,
            actual: key.len(),
        })
    }
}

/// Decrypt `data` in place, returning the plaintext length
///
/// With [`Padding::Pkcs7`] the returned length excludes the padding; with
/// [`Padding::None`] it is always `data.len()`.
pub fn decrypt_cbc(key: &[u8], data: &mut [u8], padding: Padding) -> Result<usize, CryptoError> {
    check_key(key)?;
    let cipher = Aes128CbcDec::new_from_slices(key, key)
        .map_err(|e| CryptoError::Decryption(format!("cipher init failed: {e}")))?;

    match padding {
        Padding::None => {
            let aligned = data.len() - data.len() % BLOCK_SIZE;
            cipher
                .decrypt_padded_mut::<NoPadding>(&mut data[..aligned])
                .map_err(|e| CryptoError::Decryption(format!("unpad failed: {e}")))?;
            Ok(data.len())
        }
        Padding::Pkcs7 => {
            if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
                return Err(CryptoError::Decryption(format!(
                    "PKCS#7 ciphertext length {} is not a positive multiple of {BLOCK_SIZE}",
                    data.len()
                )));
            }
            let plain = cipher
                .decrypt_padded_mut::<Pkcs7>(data)
                .map_err(|e| CryptoError::Decryption(format!("invalid padding: {e}")))?;
            Ok(plain.len())
        }
    }
}

/// Encrypt `data` into a new buffer
///
/// The inverse of [`decrypt_cbc`], used when building encrypted fixtures.
pub fn encrypt_cbc(key: &[u8], data: &[u8], padding: Padding) -> Result<Vec<u8>, CryptoError> {
    check_key(key)?;
    let cipher = Aes128CbcEnc::new_from_slices(key, key)
        .map_err(|e| CryptoError::Decryption(format!("cipher init failed: {e}")))?;

    match padding {
        Padding::None => {
            let mut out = data.to_vec();
            let aligned = out.len() - out.len() % BLOCK_SIZE;
            cipher
                .encrypt_padded_mut::<NoPadding>(&mut out[..aligned], aligned)
                .map_err(|e| CryptoError::Decryption(format!("pad failed: {e}")))?;
            Ok(out)
        }
        Padding::Pkcs7 => {
            let padded_len = (data.len() / BLOCK_SIZE + 1) * BLOCK_SIZE;
            let mut out = vec![0u8; padded_len];
            out[..data.len()].copy_from_slice(data);
            let written = cipher
                .encrypt_padded_mut::<Pkcs7>(&mut out, data.len())
                .map_err(|e| CryptoError::Decryption(format!("pad failed: {e}")))?
                .len();
            out.truncate(written);
            Ok(out)
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    const KEY: [u8; 16] = *b"0123456789abcdef";

    #[test]
    fn test_pkcs7_round_trip() {
        let data = b"encrypted catalog entry payload";
        let mut encrypted = encrypt_cbc(&KEY, data, Padding::Pkcs7).unwrap();
        assert_eq!(encrypted.len() % BLOCK_SIZE, 0);
        assert_ne!(&encrypted[..data.len()], data);

        let len = decrypt_cbc(&KEY, &mut encrypted, Padding::Pkcs7).unwrap();
        assert_eq!(&encrypted[..len], data);
    }

    #[test]
    fn test_no_padding_leaves_tail() {
        let data: Vec<u8> = (0u8..40).collect();
        let mut encrypted = encrypt_cbc(&KEY, &data, Padding::None).unwrap();
        assert_eq!(encrypted.len(), 40);
        assert_eq!(&encrypted[32..], &data[32..]);

        let len = decrypt_cbc(&KEY, &mut encrypted, Padding::None).unwrap();
        assert_eq!(len, 40);
        assert_eq!(encrypted, data);
    }

    #[test]
    fn test_rejects_bad_key_size() {
        let mut data = [0u8; 16];
        assert!(matches!(
            decrypt_cbc(&[0u8; 8], &mut data, Padding::None),
            Err(CryptoError::InvalidKeySize {
                expected: 16,
                actual: 8
            })
        ));
    }

    #[test]
    fn test_pkcs7_rejects_unaligned() {
        let mut data = [0u8; 15];
        assert!(decrypt_cbc(&KEY, &mut data, Padding::Pkcs7).is_err());
    }
}
