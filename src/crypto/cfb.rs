//! OpenPGP CFB mode over the supported block ciphers.
//!
//! Both encrypted data packets use plain CFB with an all-zero IV; the legacy
//! symmetrically encrypted packet additionally resynchronises after the
//! random prefix, which callers do by building a fresh cipher from the last
//! block of ciphertext (see [`resync_iv`]).

use crate::crypto::SymmetricAlgorithm;
use crate::error::{PgpError, Result};
use aes::{Aes128, Aes192, Aes256};
use cast5::Cast5;
use cfb_mode::cipher::{InvalidLength, KeyIvInit};
use cfb_mode::{BufDecryptor, BufEncryptor};

/// Streaming CFB encryptor
pub enum CfbEncryptor {
    /// CAST5
    Cast5(BufEncryptor<Cast5>),
    /// AES-128
    Aes128(BufEncryptor<Aes128>),
    /// AES-192
    Aes192(BufEncryptor<Aes192>),
    /// AES-256
    Aes256(BufEncryptor<Aes256>),
}

/// Streaming CFB decryptor
pub enum CfbDecryptor {
    /// CAST5
    Cast5(BufDecryptor<Cast5>),
    /// AES-128
    Aes128(BufDecryptor<Aes128>),
    /// AES-192
    Aes192(BufDecryptor<Aes192>),
    /// AES-256
    Aes256(BufDecryptor<Aes256>),
}

fn check_lengths(algorithm: SymmetricAlgorithm, key: &[u8], iv: &[u8]) -> Result<()> {
    if key.len() != algorithm.key_size() {
        return Err(PgpError::crypto(format!(
            "{} requires a {}-byte key, got {}",
            algorithm,
            algorithm.key_size(),
            key.len()
        )));
    }
    if iv.len() != algorithm.block_size() {
        return Err(PgpError::crypto(format!(
            "{} requires a {}-byte IV, got {}",
            algorithm,
            algorithm.block_size(),
            iv.len()
        )));
    }
    Ok(())
}

impl CfbEncryptor {
    /// Create a new encryptor with an explicit IV
    pub fn new(algorithm: SymmetricAlgorithm, key: &[u8], iv: &[u8]) -> Result<Self> {
        check_lengths(algorithm, key, iv)?;
        let invalid = |_: InvalidLength| PgpError::crypto(format!("Invalid {algorithm} key or IV"));
        Ok(match algorithm {
            SymmetricAlgorithm::Cast5 => {
                Self::Cast5(BufEncryptor::new_from_slices(key, iv).map_err(invalid)?)
            }
            SymmetricAlgorithm::Aes128 => {
                Self::Aes128(BufEncryptor::new_from_slices(key, iv).map_err(invalid)?)
            }
            SymmetricAlgorithm::Aes192 => {
                Self::Aes192(BufEncryptor::new_from_slices(key, iv).map_err(invalid)?)
            }
            SymmetricAlgorithm::Aes256 => {
                Self::Aes256(BufEncryptor::new_from_slices(key, iv).map_err(invalid)?)
            }
        })
    }

    /// Create a new encryptor with the all-zero IV used by data packets
    pub fn zero_iv(algorithm: SymmetricAlgorithm, key: &[u8]) -> Result<Self> {
        Self::new(algorithm, key, &vec![0u8; algorithm.block_size()])
    }

    /// Encrypt a chunk in place
    pub fn encrypt(&mut self, data: &mut [u8]) {
        match self {
            Self::Cast5(cipher) => cipher.encrypt(data),
            Self::Aes128(cipher) => cipher.encrypt(data),
            Self::Aes192(cipher) => cipher.encrypt(data),
            Self::Aes256(cipher) => cipher.encrypt(data),
        }
    }
}

impl CfbDecryptor {
    /// Create a new decryptor with an explicit IV
    pub fn new(algorithm: SymmetricAlgorithm, key: &[u8], iv: &[u8]) -> Result<Self> {
        check_lengths(algorithm, key, iv)?;
        let invalid = |_: InvalidLength| PgpError::crypto(format!("Invalid {algorithm} key or IV"));
        Ok(match algorithm {
            SymmetricAlgorithm::Cast5 => {
                Self::Cast5(BufDecryptor::new_from_slices(key, iv).map_err(invalid)?)
            }
            SymmetricAlgorithm::Aes128 => {
                Self::Aes128(BufDecryptor::new_from_slices(key, iv).map_err(invalid)?)
            }
            SymmetricAlgorithm::Aes192 => {
                Self::Aes192(BufDecryptor::new_from_slices(key, iv).map_err(invalid)?)
            }
            SymmetricAlgorithm::Aes256 => {
                Self::Aes256(BufDecryptor::new_from_slices(key, iv).map_err(invalid)?)
            }
        })
    }

    /// Create a new decryptor with the all-zero IV used by data packets
    pub fn zero_iv(algorithm: SymmetricAlgorithm, key: &[u8]) -> Result<Self> {
        Self::new(algorithm, key, &vec![0u8; algorithm.block_size()])
    }

    /// Decrypt a chunk in place
    pub fn decrypt(&mut self, data: &mut [u8]) {
        match self {
            Self::Cast5(cipher) => cipher.decrypt(data),
            Self::Aes128(cipher) => cipher.decrypt(data),
            Self::Aes192(cipher) => cipher.decrypt(data),
            Self::Aes256(cipher) => cipher.decrypt(data),
        }
    }
}

/// IV for the resynchronisation step: the last block of the encrypted prefix.
///
/// `prefix_ciphertext` is the `block_size + 2` bytes that encrypt the random
/// prefix and its two check bytes.
pub fn resync_iv(prefix_ciphertext: &[u8]) -> &[u8] {
    &prefix_ciphertext[2..]
}
