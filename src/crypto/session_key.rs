//! Session keys and their public-key encryption.
//!
//! A session key travels as `algorithm || key || checksum`, where the
//! checksum is the sum of the key octets modulo 65536. RSA recipients receive
//! it PKCS#1 v1.5 encrypted. ML-KEM-1024 recipients receive an encapsulation
//! plus the framed session key wrapped with AES-256-GCM under a key derived
//! from the shared secret with HKDF-SHA3-256.

use crate::crypto::keys::{PrivateKey, PublicKey};
use crate::crypto::{secure_random_bytes, PublicKeyAlgorithm, SymmetricAlgorithm};
use crate::error::{PgpError, Result};
use crate::packet::{checksum16, write_mpi, write_u16_prefixed, ByteCursor};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use hkdf::Hkdf;
use pqcrypto_mlkem::mlkem1024;
use pqcrypto_traits::kem::{Ciphertext as _, SharedSecret as _};
use rand::{CryptoRng, RngCore};
use rsa::traits::PublicKeyParts;
use rsa::Pkcs1v15Encrypt;
use sha3::Sha3_256;
use std::fmt;
use zeroize::Zeroizing;

/// HKDF info string for wrapping session keys to ML-KEM-1024 recipients
const MLKEM_KDF_INFO: &[u8] = b"pgp-envelope ML-KEM-1024 session key";

/// Fixed nonce; every wrapping key comes from a fresh encapsulation
const MLKEM_WRAP_NONCE: [u8; 12] = [0u8; 12];

/// A symmetric session key
#[derive(Clone)]
pub struct SessionKey {
    algorithm: SymmetricAlgorithm,
    key: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKey")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl SessionKey {
    /// Generates a random session key
    pub fn generate<R: CryptoRng + RngCore>(algorithm: SymmetricAlgorithm, rng: &mut R) -> Self {
        Self {
            algorithm,
            key: Zeroizing::new(secure_random_bytes(rng, algorithm.key_size())),
        }
    }

    /// Wraps existing key bytes
    pub fn from_bytes(algorithm: SymmetricAlgorithm, key: &[u8]) -> Result<Self> {
        if key.len() != algorithm.key_size() {
            return Err(PgpError::crypto(format!(
                "{} session key must be {} bytes, got {}",
                algorithm,
                algorithm.key_size(),
                key.len()
            )));
        }
        Ok(Self {
            algorithm,
            key: Zeroizing::new(key.to_vec()),
        })
    }

    /// Returns the symmetric algorithm
    pub fn algorithm(&self) -> SymmetricAlgorithm {
        self.algorithm
    }

    /// Returns the raw key
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Two-octet checksum of the key
    pub fn checksum(&self) -> u16 {
        checksum16(&self.key)
    }

    /// `algorithm || key || checksum`
    fn encode(&self) -> Zeroizing<Vec<u8>> {
        let mut framed = Zeroizing::new(Vec::with_capacity(self.key.len() + 3));
        framed.push(self.algorithm.to_u8());
        framed.extend_from_slice(&self.key);
        framed.extend_from_slice(&self.checksum().to_be_bytes());
        framed
    }

    fn decode(framed: &[u8]) -> Result<Self> {
        let Some((&algorithm_id, rest)) = framed.split_first() else {
            return Err(PgpError::crypto("Empty session key"));
        };
        let algorithm = SymmetricAlgorithm::from_u8(algorithm_id).ok_or_else(|| {
            PgpError::unsupported(format!("Unsupported symmetric algorithm {algorithm_id}"))
        })?;
        if rest.len() != algorithm.key_size() + 2 {
            return Err(PgpError::crypto(format!(
                "Session key for {} has wrong length {}",
                algorithm,
                rest.len()
            )));
        }

        let (key, checksum) = rest.split_at(algorithm.key_size());
        if checksum16(key).to_be_bytes() != checksum {
            return Err(PgpError::crypto("Session key checksum mismatch"));
        }
        Self::from_bytes(algorithm, key)
    }

    /// Encrypts the session key to a recipient
    pub fn encrypt_for<R: CryptoRng + RngCore>(
        &self,
        recipient: &PublicKey,
        rng: &mut R,
    ) -> Result<EncryptedSessionKey> {
        if !recipient.is_encryption_capable() {
            return Err(PgpError::key(format!(
                "Key {} cannot be used for encryption",
                recipient.key_id()
            )));
        }
        let framed = self.encode();

        match recipient.algorithm() {
            PublicKeyAlgorithm::RsaEncryptSign | PublicKeyAlgorithm::RsaEncrypt => {
                let public = recipient.as_rsa()?;
                let ciphertext = public
                    .encrypt(rng, Pkcs1v15Encrypt, &framed)
                    .map_err(|e| PgpError::crypto(format!("RSA encryption failed: {e}")))?;
                Ok(EncryptedSessionKey::Rsa { ciphertext })
            }
            PublicKeyAlgorithm::MlKem1024 => {
                let public = recipient.as_mlkem1024()?;
                let (shared_secret, ciphertext) = mlkem1024::encapsulate(&public);
                let cipher = wrapping_cipher(
                    shared_secret.as_bytes(),
                    recipient.fingerprint().as_bytes(),
                )?;
                let wrapped = cipher
                    .encrypt(Nonce::from_slice(&MLKEM_WRAP_NONCE), framed.as_slice())
                    .map_err(|_| PgpError::crypto("Failed to wrap session key"))?;
                Ok(EncryptedSessionKey::MlKem1024 {
                    ciphertext: ciphertext.as_bytes().to_vec(),
                    wrapped,
                })
            }
            other => Err(PgpError::key(format!(
                "Encryption to {other} keys is not supported"
            ))),
        }
    }
}

/// AES-256-GCM keyed from an ML-KEM shared secret
fn wrapping_cipher(shared_secret: &[u8], salt: &[u8]) -> Result<Aes256Gcm> {
    let hkdf = Hkdf::<Sha3_256>::new(Some(salt), shared_secret);
    let mut kek = Zeroizing::new([0u8; 32]);
    hkdf.expand(MLKEM_KDF_INFO, &mut kek[..])
        .map_err(|_| PgpError::crypto("HKDF expansion failed"))?;
    Ok(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&kek[..])))
}

/// Algorithm-specific fields of a PKESK packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncryptedSessionKey {
    /// RSA: one MPI holding `m^e mod n`
    Rsa {
        /// Ciphertext magnitude bytes
        ciphertext: Vec<u8>,
    },
    /// ML-KEM-1024: encapsulation and wrapped session key
    MlKem1024 {
        /// KEM ciphertext
        ciphertext: Vec<u8>,
        /// AES-256-GCM wrapped `algorithm || key || checksum`
        wrapped: Vec<u8>,
    },
    /// Fields for an algorithm this crate cannot decrypt
    Opaque(Vec<u8>),
}

impl EncryptedSessionKey {
    /// Parse the algorithm-specific fields
    pub fn parse(algorithm: PublicKeyAlgorithm, cursor: &mut ByteCursor<'_>) -> Result<Self> {
        match algorithm {
            PublicKeyAlgorithm::RsaEncryptSign | PublicKeyAlgorithm::RsaEncrypt => Ok(Self::Rsa {
                ciphertext: cursor.read_mpi()?.to_vec(),
            }),
            PublicKeyAlgorithm::MlKem1024 => {
                let ciphertext = cursor.read_u16_prefixed()?.to_vec();
                let wrapped = cursor.read_u8_prefixed()?.to_vec();
                Ok(Self::MlKem1024 {
                    ciphertext,
                    wrapped,
                })
            }
            _ => Ok(Self::Opaque(cursor.rest().to_vec())),
        }
    }

    /// Serialize the algorithm-specific fields
    pub fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            Self::Rsa { ciphertext } => write_mpi(out, ciphertext),
            Self::MlKem1024 {
                ciphertext,
                wrapped,
            } => {
                write_u16_prefixed(out, ciphertext)?;
                let len = u8::try_from(wrapped.len())
                    .map_err(|_| PgpError::crypto("Wrapped session key too long"))?;
                out.push(len);
                out.extend_from_slice(wrapped);
            }
            Self::Opaque(raw) => out.extend_from_slice(raw),
        }
        Ok(())
    }

    /// Recovers the session key with an unlocked private key
    pub fn decrypt(&self, private_key: &PrivateKey) -> Result<SessionKey> {
        let framed = match self {
            Self::Rsa { ciphertext } => {
                let rsa = private_key.as_rsa().ok_or_else(|| {
                    PgpError::key(format!("{} is not an RSA key", private_key.key_id()))
                })?;
                // MPIs drop leading zeros; PKCS#1 expects the full modulus width
                let width = rsa.size();
                if ciphertext.len() > width {
                    return Err(PgpError::crypto("RSA ciphertext longer than modulus"));
                }
                let mut padded = vec![0u8; width - ciphertext.len()];
                padded.extend_from_slice(ciphertext);
                Zeroizing::new(
                    rsa.decrypt(Pkcs1v15Encrypt, &padded)
                        .map_err(|e| PgpError::crypto(format!("RSA decryption failed: {e}")))?,
                )
            }
            Self::MlKem1024 {
                ciphertext,
                wrapped,
            } => {
                let secret = private_key.as_mlkem1024()?.ok_or_else(|| {
                    PgpError::key(format!("{} is not an ML-KEM-1024 key", private_key.key_id()))
                })?;
                let ciphertext = mlkem1024::Ciphertext::from_bytes(ciphertext)
                    .map_err(|_| PgpError::crypto("Invalid ML-KEM-1024 ciphertext"))?;
                let shared_secret = mlkem1024::decapsulate(&ciphertext, &secret);
                let cipher = wrapping_cipher(
                    shared_secret.as_bytes(),
                    private_key.public_key().fingerprint().as_bytes(),
                )?;
                Zeroizing::new(
                    cipher
                        .decrypt(Nonce::from_slice(&MLKEM_WRAP_NONCE), wrapped.as_slice())
                        .map_err(|_| PgpError::crypto("Failed to unwrap session key"))?,
                )
            }
            Self::Opaque(_) => {
                return Err(PgpError::key(format!(
                    "Cannot decrypt session keys for {}",
                    private_key.algorithm()
                )))
            }
        };
        SessionKey::decode(&framed)
    }
}
