//! String-to-key specifiers and passphrase handling.
//!
//! Supports the RFC 4880 simple, salted and iterated+salted specifiers and the
//! RFC 9580 Argon2 specifier. GnuPG's private extension (type 101, used for
//! secret keys stored elsewhere) is recognised so such keys can be skipped.

use crate::crypto::HashAlgorithm;
use crate::error::{PgpError, Result};
use crate::packet::ByteCursor;
use crate::validation::Validator;
use argon2::{Algorithm, Argon2, Params, Version};
use rand::{CryptoRng, RngCore};
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use zeroize::{Zeroize, Zeroizing};

/// Iteration count octet used when protecting new keys (524288 octets hashed)
pub const DEFAULT_ITERATION_COUNT: u8 = 0x90;

/// Argon2 passes used when protecting new keys
pub const DEFAULT_ARGON2_PASSES: u8 = 3;

/// Argon2 lanes used when protecting new keys
pub const DEFAULT_ARGON2_PARALLELISM: u8 = 4;

/// Argon2 memory exponent used when protecting new keys (2^16 KiB = 64 MiB)
pub const DEFAULT_ARGON2_MEMORY_EXPONENT: u8 = 16;

/// Passphrase for key protection
#[derive(Clone)]
pub struct Passphrase(String);

impl Passphrase {
    /// Create a new passphrase from a string
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self(passphrase.into())
    }

    /// Get passphrase as bytes
    pub(crate) fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Check if passphrase is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Passphrase {
    fn from(passphrase: &str) -> Self {
        Self::new(passphrase)
    }
}

impl std::fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Passphrase(..)")
    }
}

impl Drop for Passphrase {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// A string-to-key specifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StringToKey {
    /// Type 0: hash of the passphrase
    Simple {
        /// Hash algorithm
        hash: HashAlgorithm,
    },
    /// Type 1: hash of salt and passphrase
    Salted {
        /// Hash algorithm
        hash: HashAlgorithm,
        /// Eight octets of salt
        salt: [u8; 8],
    },
    /// Type 3: salt and passphrase hashed repeatedly
    IteratedSalted {
        /// Hash algorithm
        hash: HashAlgorithm,
        /// Eight octets of salt
        salt: [u8; 8],
        /// Coded octet count
        count: u8,
    },
    /// Type 4: Argon2id
    Argon2 {
        /// Sixteen octets of salt
        salt: [u8; 16],
        /// Number of passes
        passes: u8,
        /// Degree of parallelism
        parallelism: u8,
        /// Memory size exponent, in KiB
        memory_exponent: u8,
    },
    /// Type 101: GnuPG extension, the secret material is not present
    GnuExtension {
        /// Extension mode (1 = no secret, 2 = on smartcard)
        mode: u8,
    },
}

impl StringToKey {
    /// Iterated+salted SHA-256 with a fresh salt
    pub fn iterated<R: CryptoRng + RngCore>(rng: &mut R) -> Self {
        let mut salt = [0u8; 8];
        rng.fill_bytes(&mut salt);
        Self::IteratedSalted {
            hash: HashAlgorithm::Sha256,
            salt,
            count: DEFAULT_ITERATION_COUNT,
        }
    }

    /// Argon2 with default cost parameters and a fresh salt
    pub fn argon2<R: CryptoRng + RngCore>(rng: &mut R) -> Self {
        Self::argon2_with(
            rng,
            DEFAULT_ARGON2_PASSES,
            DEFAULT_ARGON2_PARALLELISM,
            DEFAULT_ARGON2_MEMORY_EXPONENT,
        )
    }

    /// Argon2 with explicit cost parameters and a fresh salt
    pub fn argon2_with<R: CryptoRng + RngCore>(
        rng: &mut R,
        passes: u8,
        parallelism: u8,
        memory_exponent: u8,
    ) -> Self {
        let mut salt = [0u8; 16];
        rng.fill_bytes(&mut salt);
        Self::Argon2 {
            salt,
            passes,
            parallelism,
            memory_exponent,
        }
    }

    /// Parse a specifier from a key packet
    pub fn parse(cursor: &mut ByteCursor<'_>) -> Result<Self> {
        let kind = cursor.read_u8()?;
        match kind {
            0 => Ok(Self::Simple {
                hash: read_hash(cursor)?,
            }),
            1 => Ok(Self::Salted {
                hash: read_hash(cursor)?,
                salt: cursor.read_array()?,
            }),
            3 => Ok(Self::IteratedSalted {
                hash: read_hash(cursor)?,
                salt: cursor.read_array()?,
                count: cursor.read_u8()?,
            }),
            4 => Ok(Self::Argon2 {
                salt: cursor.read_array()?,
                passes: cursor.read_u8()?,
                parallelism: cursor.read_u8()?,
                memory_exponent: cursor.read_u8()?,
            }),
            101 => {
                // Hash octet, "GNU", mode
                let _hash = cursor.read_u8()?;
                if cursor.take(3)? != b"GNU" {
                    return Err(PgpError::key("Unknown private S2K extension"));
                }
                Ok(Self::GnuExtension {
                    mode: cursor.read_u8()?,
                })
            }
            other => Err(PgpError::key(format!("Unsupported S2K type {other}"))),
        }
    }

    /// Serialize the specifier
    pub fn write(&self, out: &mut Vec<u8>) {
        match self {
            Self::Simple { hash } => out.extend_from_slice(&[0, hash.to_u8()]),
            Self::Salted { hash, salt } => {
                out.extend_from_slice(&[1, hash.to_u8()]);
                out.extend_from_slice(salt);
            }
            Self::IteratedSalted { hash, salt, count } => {
                out.extend_from_slice(&[3, hash.to_u8()]);
                out.extend_from_slice(salt);
                out.push(*count);
            }
            Self::Argon2 {
                salt,
                passes,
                parallelism,
                memory_exponent,
            } => {
                out.push(4);
                out.extend_from_slice(salt);
                out.extend_from_slice(&[*passes, *parallelism, *memory_exponent]);
            }
            Self::GnuExtension { mode } => {
                out.extend_from_slice(&[101, 0]);
                out.extend_from_slice(b"GNU");
                out.push(*mode);
            }
        }
    }

    /// Returns true when the specifier carries no usable secret
    pub fn is_stub(&self) -> bool {
        matches!(self, Self::GnuExtension { .. })
    }

    /// Derives `key_len` bytes of key material from a passphrase
    pub fn derive_key(&self, passphrase: &Passphrase, key_len: usize) -> Result<Zeroizing<Vec<u8>>> {
        let pass = passphrase.as_bytes();
        match self {
            Self::Simple { hash } => Ok(derive_hashed(*hash, &[], pass, 0, key_len)),
            Self::Salted { hash, salt } => Ok(derive_hashed(*hash, salt, pass, 0, key_len)),
            Self::IteratedSalted { hash, salt, count } => Ok(derive_hashed(
                *hash,
                salt,
                pass,
                decode_count(*count),
                key_len,
            )),
            Self::Argon2 {
                salt,
                passes,
                parallelism,
                memory_exponent,
            } => derive_argon2(salt, *passes, *parallelism, *memory_exponent, pass, key_len),
            Self::GnuExtension { .. } => Err(PgpError::key(
                "Secret key material is not stored in this key ring",
            )),
        }
    }
}

fn read_hash(cursor: &mut ByteCursor<'_>) -> Result<HashAlgorithm> {
    let id = cursor.read_u8()?;
    HashAlgorithm::from_u8(id).ok_or_else(|| PgpError::key(format!("Unsupported S2K hash {id}")))
}

/// Expands the coded iteration count octet into an octet count
pub fn decode_count(coded: u8) -> usize {
    (16 + (coded as usize & 15)) << ((coded >> 4) as usize + 6)
}

/// Smallest coded count whose octet count is at least `octets`
pub fn encode_count(octets: usize) -> u8 {
    (0..=255u8)
        .find(|&coded| decode_count(coded) >= octets)
        .unwrap_or(255)
}

fn derive_hashed(
    hash: HashAlgorithm,
    salt: &[u8],
    passphrase: &[u8],
    count: usize,
    key_len: usize,
) -> Zeroizing<Vec<u8>> {
    match hash {
        HashAlgorithm::Sha1 => hash_rounds::<Sha1>(salt, passphrase, count, key_len),
        HashAlgorithm::Sha224 => hash_rounds::<Sha224>(salt, passphrase, count, key_len),
        HashAlgorithm::Sha256 => hash_rounds::<Sha256>(salt, passphrase, count, key_len),
        HashAlgorithm::Sha384 => hash_rounds::<Sha384>(salt, passphrase, count, key_len),
        HashAlgorithm::Sha512 => hash_rounds::<Sha512>(salt, passphrase, count, key_len),
    }
}

/// Runs as many hash contexts as needed for `key_len`, context `i` preloaded with `i` zero octets.
///
/// Each context hashes `salt || passphrase` repeated until `count` octets
/// (never fewer than one full copy) have been processed.
fn hash_rounds<D: Digest>(
    salt: &[u8],
    passphrase: &[u8],
    count: usize,
    key_len: usize,
) -> Zeroizing<Vec<u8>> {
    let mut unit = Zeroizing::new(Vec::with_capacity(salt.len() + passphrase.len()));
    unit.extend_from_slice(salt);
    unit.extend_from_slice(passphrase);
    let total = count.max(unit.len());

    // Repeat the unit into a larger block so long counts hash in big updates
    let mut block = Zeroizing::new(Vec::new());
    if !unit.is_empty() {
        let copies = (4096 / unit.len()).max(1);
        for _ in 0..copies {
            block.extend_from_slice(&unit);
        }
    }

    let mut key = Zeroizing::new(Vec::with_capacity(key_len));
    let mut preload = 0usize;
    while key.len() < key_len {
        let mut hasher = D::new();
        hasher.update(vec![0u8; preload]);
        let mut remaining = total;
        while remaining > 0 {
            let take = remaining.min(block.len());
            hasher.update(&block[..take]);
            remaining -= take;
        }
        let digest = hasher.finalize();
        let take = (key_len - key.len()).min(digest.len());
        key.extend_from_slice(&digest[..take]);
        preload += 1;
    }
    key
}

fn derive_argon2(
    salt: &[u8],
    passes: u8,
    parallelism: u8,
    memory_exponent: u8,
    passphrase: &[u8],
    key_len: usize,
) -> Result<Zeroizing<Vec<u8>>> {
    Validator::validate_argon2_memory(memory_exponent)?;
    let params = Params::new(
        1u32 << memory_exponent,
        passes as u32,
        parallelism as u32,
        Some(key_len),
    )
    .map_err(|e| PgpError::key(format!("Invalid Argon2 parameters: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new(vec![0u8; key_len]);
    argon2
        .hash_password_into(passphrase, salt, &mut key)
        .map_err(|e| PgpError::crypto(format!("Argon2 derivation failed: {e}")))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_count_coding() {
        assert_eq!(decode_count(0), 1024);
        assert_eq!(decode_count(0x60), 65536);
        assert_eq!(decode_count(255), 65_011_712);
        assert_eq!(encode_count(65536), 0x60);
        assert!(decode_count(encode_count(100_000)) >= 100_000);
    }

    #[test]
    fn test_simple_s2k_is_plain_hash() {
        let s2k = StringToKey::Simple {
            hash: HashAlgorithm::Sha256,
        };
        let key = s2k.derive_key(&Passphrase::new("abc"), 32).unwrap();
        assert_eq!(key.as_slice(), Sha256::digest(b"abc").as_slice());
    }

    #[test]
    fn test_long_keys_use_preloaded_contexts() {
        let s2k = StringToKey::Simple {
            hash: HashAlgorithm::Sha1,
        };
        let key = s2k.derive_key(&Passphrase::new("abc"), 32).unwrap();
        assert_eq!(&key[..20], Sha1::digest(b"abc").as_slice());

        let mut second = Sha1::new();
        second.update([0u8]);
        second.update(b"abc");
        assert_eq!(&key[20..], &second.finalize()[..12]);
    }

    #[test]
    fn test_iterated_matches_manual_repetition() {
        let salt = [1, 2, 3, 4, 5, 6, 7, 8];
        let s2k = StringToKey::IteratedSalted {
            hash: HashAlgorithm::Sha1,
            salt,
            count: 0,
        };
        let key = s2k.derive_key(&Passphrase::new("Megazord55"), 16).unwrap();

        let mut unit = salt.to_vec();
        unit.extend_from_slice(b"Megazord55");
        let stream: Vec<u8> = unit.iter().copied().cycle().take(1024).collect();
        assert_eq!(&key[..], &Sha1::digest(&stream)[..16]);
    }

    #[test]
    fn test_specifier_round_trip() {
        let mut rng = OsRng;
        for s2k in [
            StringToKey::iterated(&mut rng),
            StringToKey::argon2(&mut rng),
            StringToKey::Salted {
                hash: HashAlgorithm::Sha512,
                salt: [9; 8],
            },
            StringToKey::GnuExtension { mode: 1 },
        ] {
            let mut bytes = Vec::new();
            s2k.write(&mut bytes);
            let mut cursor = ByteCursor::new(&bytes);
            assert_eq!(StringToKey::parse(&mut cursor).unwrap(), s2k);
            assert!(cursor.is_empty());
        }
    }

    #[test]
    fn test_argon2_derivation() {
        let s2k = StringToKey::Argon2 {
            salt: [7; 16],
            passes: 1,
            parallelism: 1,
            memory_exponent: 10,
        };
        let first = s2k.derive_key(&Passphrase::new("secret"), 32).unwrap();
        let second = s2k.derive_key(&Passphrase::new("secret"), 32).unwrap();
        let other = s2k.derive_key(&Passphrase::new("Secret"), 32).unwrap();
        assert_eq!(first, second);
        assert_ne!(first, other);
    }

    #[test]
    fn test_stub_has_no_key() {
        let s2k = StringToKey::GnuExtension { mode: 1 };
        assert!(s2k.is_stub());
        assert!(matches!(
            s2k.derive_key(&Passphrase::new("x"), 16),
            Err(PgpError::Key(_))
        ));
    }
}
