//! Cryptographic glue for the OpenPGP envelope.
//!
//! The primitives themselves come from external crates; this module maps the
//! OpenPGP algorithm identifiers onto them:
//!
//! - **RSA** (PKCS#1 v1.5) and **ML-KEM-1024** (private-use id 100) for session keys
//! - **CAST5** and **AES** in OpenPGP CFB mode for bulk data
//! - **SHA-1** for the modification detection code and v4 fingerprints
//! - **S2K** (iterated+salted, Argon2) with CFB or AES-GCM for secret key protection

use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;
use subtle::ConstantTimeEq;

pub mod cfb;
pub mod keys;
pub mod s2k;
pub mod session_key;

pub use cfb::{CfbDecryptor, CfbEncryptor};
pub use keys::{
    KeyPair, PrivateKey, ProtectionMode, PublicKey, PublicKeyMaterial, SecretKey,
    SecretKeyProtection,
};
pub use s2k::{Passphrase, StringToKey};
pub use session_key::{EncryptedSessionKey, SessionKey};

/// Public-key algorithm identifiers (RFC 4880 §9.1, RFC 9580 §9.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PublicKeyAlgorithm {
    /// RSA (Encrypt or Sign)
    RsaEncryptSign,
    /// RSA Encrypt-Only
    RsaEncrypt,
    /// RSA Sign-Only
    RsaSign,
    /// Elgamal (Encrypt-Only)
    ElGamal,
    /// DSA
    Dsa,
    /// ECDH
    Ecdh,
    /// ECDSA
    Ecdsa,
    /// EdDSA (legacy)
    EdDsaLegacy,
    /// X25519
    X25519,
    /// Ed25519
    Ed25519,
    /// ML-KEM-1024 in the private/experimental range
    MlKem1024,
    /// Anything else
    Other(u8),
}

impl PublicKeyAlgorithm {
    /// Convert byte value to algorithm
    pub fn from_u8(id: u8) -> Self {
        match id {
            1 => Self::RsaEncryptSign,
            2 => Self::RsaEncrypt,
            3 => Self::RsaSign,
            16 => Self::ElGamal,
            17 => Self::Dsa,
            18 => Self::Ecdh,
            19 => Self::Ecdsa,
            22 => Self::EdDsaLegacy,
            25 => Self::X25519,
            27 => Self::Ed25519,
            100 => Self::MlKem1024,
            other => Self::Other(other),
        }
    }

    /// Convert algorithm to byte value
    pub fn to_u8(self) -> u8 {
        match self {
            Self::RsaEncryptSign => 1,
            Self::RsaEncrypt => 2,
            Self::RsaSign => 3,
            Self::ElGamal => 16,
            Self::Dsa => 17,
            Self::Ecdh => 18,
            Self::Ecdsa => 19,
            Self::EdDsaLegacy => 22,
            Self::X25519 => 25,
            Self::Ed25519 => 27,
            Self::MlKem1024 => 100,
            Self::Other(id) => id,
        }
    }

    /// Returns the algorithm name as a string
    pub fn name(&self) -> &'static str {
        match self {
            Self::RsaEncryptSign => "RSA",
            Self::RsaEncrypt => "RSA (encrypt-only)",
            Self::RsaSign => "RSA (sign-only)",
            Self::ElGamal => "Elgamal",
            Self::Dsa => "DSA",
            Self::Ecdh => "ECDH",
            Self::Ecdsa => "ECDSA",
            Self::EdDsaLegacy => "EdDSA",
            Self::X25519 => "X25519",
            Self::Ed25519 => "Ed25519",
            Self::MlKem1024 => "ML-KEM-1024",
            Self::Other(_) => "unknown",
        }
    }

    /// Usage permitted by the algorithm itself, before key flags narrow it
    pub fn default_usage(&self) -> KeyUsage {
        match self {
            Self::RsaEncryptSign => KeyUsage::all(),
            Self::RsaEncrypt | Self::ElGamal | Self::Ecdh | Self::X25519 | Self::MlKem1024 => {
                KeyUsage::encrypt_only()
            }
            Self::RsaSign | Self::Dsa | Self::Ecdsa | Self::EdDsaLegacy | Self::Ed25519 => {
                KeyUsage::sign_only()
            }
            Self::Other(_) => KeyUsage::none(),
        }
    }

    /// Returns true if this crate can encrypt session keys to the algorithm
    pub fn is_supported_for_encryption(&self) -> bool {
        matches!(
            self,
            Self::RsaEncryptSign | Self::RsaEncrypt | Self::MlKem1024
        )
    }

    /// Returns true for the RSA family
    pub fn is_rsa(&self) -> bool {
        matches!(self, Self::RsaEncryptSign | Self::RsaEncrypt | Self::RsaSign)
    }
}

impl fmt::Display for PublicKeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(id) => write!(f, "unknown({id})"),
            known => write!(f, "{}", known.name()),
        }
    }
}

/// Symmetric cipher identifiers the pipeline can run (RFC 4880 §9.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymmetricAlgorithm {
    /// CAST5 (128-bit key, 64-bit block)
    Cast5,
    /// AES with 128-bit key
    Aes128,
    /// AES with 192-bit key
    Aes192,
    /// AES with 256-bit key
    Aes256,
}

impl SymmetricAlgorithm {
    /// Convert byte value to algorithm
    pub fn from_u8(id: u8) -> Option<Self> {
        match id {
            3 => Some(Self::Cast5),
            7 => Some(Self::Aes128),
            8 => Some(Self::Aes192),
            9 => Some(Self::Aes256),
            _ => None,
        }
    }

    /// Convert algorithm to byte value
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Cast5 => 3,
            Self::Aes128 => 7,
            Self::Aes192 => 8,
            Self::Aes256 => 9,
        }
    }

    /// Cipher block size in bytes
    pub fn block_size(&self) -> usize {
        match self {
            Self::Cast5 => 8,
            Self::Aes128 | Self::Aes192 | Self::Aes256 => 16,
        }
    }

    /// Key size in bytes
    pub fn key_size(&self) -> usize {
        match self {
            Self::Cast5 | Self::Aes128 => 16,
            Self::Aes192 => 24,
            Self::Aes256 => 32,
        }
    }

    /// Returns the algorithm name as a string
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cast5 => "CAST5",
            Self::Aes128 => "AES-128",
            Self::Aes192 => "AES-192",
            Self::Aes256 => "AES-256",
        }
    }
}

impl fmt::Display for SymmetricAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Hash algorithm identifiers usable in S2K specifiers (RFC 4880 §9.4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    /// SHA-1
    Sha1,
    /// SHA2-256
    Sha256,
    /// SHA2-384
    Sha384,
    /// SHA2-512
    Sha512,
    /// SHA2-224
    Sha224,
}

impl HashAlgorithm {
    /// Convert byte value to algorithm
    pub fn from_u8(id: u8) -> Option<Self> {
        match id {
            2 => Some(Self::Sha1),
            8 => Some(Self::Sha256),
            9 => Some(Self::Sha384),
            10 => Some(Self::Sha512),
            11 => Some(Self::Sha224),
            _ => None,
        }
    }

    /// Convert algorithm to byte value
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Sha1 => 2,
            Self::Sha256 => 8,
            Self::Sha384 => 9,
            Self::Sha512 => 10,
            Self::Sha224 => 11,
        }
    }
}

/// Compression algorithm identifiers (RFC 4880 §9.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    /// No compression packet is emitted
    #[default]
    Uncompressed,
    /// Raw DEFLATE (RFC 1951)
    Zip,
    /// ZLIB (RFC 1950)
    Zlib,
    /// BZip2, recognised on input but not supported
    Bzip2,
}

impl CompressionAlgorithm {
    /// Convert byte value to algorithm
    pub fn from_u8(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::Uncompressed),
            1 => Some(Self::Zip),
            2 => Some(Self::Zlib),
            3 => Some(Self::Bzip2),
            _ => None,
        }
    }

    /// Convert algorithm to byte value
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Uncompressed => 0,
            Self::Zip => 1,
            Self::Zlib => 2,
            Self::Bzip2 => 3,
        }
    }
}

/// AEAD algorithm identifiers (RFC 9580 §9.6)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AeadAlgorithm {
    /// EAX mode
    Eax,
    /// OCB mode
    Ocb,
    /// GCM mode
    Gcm,
}

impl AeadAlgorithm {
    /// Convert byte value to algorithm
    pub fn from_u8(id: u8) -> Option<Self> {
        match id {
            1 => Some(Self::Eax),
            2 => Some(Self::Ocb),
            3 => Some(Self::Gcm),
            _ => None,
        }
    }

    /// Convert algorithm to byte value
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Eax => 1,
            Self::Ocb => 2,
            Self::Gcm => 3,
        }
    }

    /// Nonce size in bytes
    pub fn nonce_size(&self) -> usize {
        match self {
            Self::Eax => 16,
            Self::Ocb => 15,
            Self::Gcm => 12,
        }
    }
}

/// Key usage flags indicating how a key may be used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyUsage {
    /// Key may be used for encryption
    pub encrypt: bool,
    /// Key may be used for digital signatures
    pub sign: bool,
    /// Key may be used to certify other keys
    pub certify: bool,
    /// Key may be used for authentication
    pub authenticate: bool,
}

impl KeyUsage {
    /// Creates a new KeyUsage with all permissions disabled
    pub fn none() -> Self {
        Self {
            encrypt: false,
            sign: false,
            certify: false,
            authenticate: false,
        }
    }

    /// Creates a new KeyUsage for encryption only
    pub fn encrypt_only() -> Self {
        Self {
            encrypt: true,
            ..Self::none()
        }
    }

    /// Creates a new KeyUsage for signing only
    pub fn sign_only() -> Self {
        Self {
            sign: true,
            certify: true,
            ..Self::none()
        }
    }

    /// Creates a new KeyUsage with all permissions enabled
    pub fn all() -> Self {
        Self {
            encrypt: true,
            sign: true,
            certify: true,
            authenticate: true,
        }
    }

    /// Decodes the first octet of a key flags subpacket (RFC 4880 §5.2.3.21)
    pub fn from_flags(flags: u8) -> Self {
        Self {
            certify: flags & 0x01 != 0,
            sign: flags & 0x02 != 0,
            encrypt: flags & 0x0C != 0,
            authenticate: flags & 0x20 != 0,
        }
    }

    /// Encodes as the first octet of a key flags subpacket
    pub fn to_flags(&self) -> u8 {
        let mut flags = 0;
        if self.certify {
            flags |= 0x01;
        }
        if self.sign {
            flags |= 0x02;
        }
        if self.encrypt {
            flags |= 0x0C;
        }
        if self.authenticate {
            flags |= 0x20;
        }
        flags
    }

    /// Intersection of two usage sets
    pub fn restrict(&self, other: KeyUsage) -> Self {
        Self {
            encrypt: self.encrypt && other.encrypt,
            sign: self.sign && other.sign,
            certify: self.certify && other.certify,
            authenticate: self.authenticate && other.authenticate,
        }
    }
}

/// 64-bit key identifier: the low-order bits of a v4 fingerprint
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId(u64);

impl KeyId {
    /// Wildcard id used by anonymous recipients
    pub const WILDCARD: KeyId = KeyId(0);

    /// Wraps a raw 64-bit id
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Reads an id from its 8-byte big-endian wire form
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }

    /// The 8-byte wire form
    pub fn to_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Raw value
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Returns true for the all-zero wildcard id
    pub fn is_wildcard(&self) -> bool {
        self.0 == 0
    }

    /// Constant-time comparison of key IDs
    pub fn matches(&self, other: &KeyId) -> bool {
        self.to_bytes().ct_eq(&other.to_bytes()).into()
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyId({:016X})", self.0)
    }
}

/// v4 fingerprint: SHA-1 over the public key packet body
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 20]);

impl Fingerprint {
    /// Computes the v4 fingerprint of a public key packet body
    pub fn v4(public_body: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update([0x99]);
        hasher.update((public_body.len() as u16).to_be_bytes());
        hasher.update(public_body);
        Self(hasher.finalize().into())
    }

    /// Raw fingerprint bytes
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// The key id is the low 64 bits of the fingerprint
    pub fn key_id(&self) -> KeyId {
        let mut id = [0u8; 8];
        id.copy_from_slice(&self.0[12..20]);
        KeyId::from_bytes(id)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

/// Secure random number generation for cryptographic operations
pub fn secure_random_bytes<R: CryptoRng + RngCore>(rng: &mut R, len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rng.fill_bytes(&mut bytes);
    bytes
}

/// Current time as an OpenPGP 32-bit timestamp
pub fn now_timestamp() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs().min(u32::MAX as u64) as u32)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_key_algorithm_ids() {
        for id in 0..=255u8 {
            assert_eq!(PublicKeyAlgorithm::from_u8(id).to_u8(), id);
        }
        assert!(PublicKeyAlgorithm::RsaEncryptSign.is_supported_for_encryption());
        assert!(PublicKeyAlgorithm::MlKem1024.is_supported_for_encryption());
        assert!(!PublicKeyAlgorithm::RsaSign.is_supported_for_encryption());
        assert!(!PublicKeyAlgorithm::ElGamal.is_supported_for_encryption());
    }

    #[test]
    fn test_symmetric_algorithm_sizes() {
        assert_eq!(SymmetricAlgorithm::Cast5.block_size(), 8);
        assert_eq!(SymmetricAlgorithm::Cast5.key_size(), 16);
        assert_eq!(SymmetricAlgorithm::Aes256.block_size(), 16);
        assert_eq!(SymmetricAlgorithm::Aes256.key_size(), 32);
        assert_eq!(SymmetricAlgorithm::from_u8(9), Some(SymmetricAlgorithm::Aes256));
        assert_eq!(SymmetricAlgorithm::from_u8(2), None);
    }

    #[test]
    fn test_key_usage_flags() {
        let usage = KeyUsage::from_flags(0x0C);
        assert!(usage.encrypt);
        assert!(!usage.sign);

        let usage = KeyUsage::from_flags(0x03);
        assert!(!usage.encrypt);
        assert!(usage.sign && usage.certify);

        assert_eq!(KeyUsage::from_flags(KeyUsage::all().to_flags()), KeyUsage::all());
        assert_eq!(
            KeyUsage::all().restrict(KeyUsage::encrypt_only()),
            KeyUsage::encrypt_only()
        );
    }

    #[test]
    fn test_key_id_display_and_match() {
        let id = KeyId::new(0xBEF7_DD82_295A_CA5C);
        assert_eq!(id.to_string(), "BEF7DD82295ACA5C");
        assert!(id.matches(&KeyId::from_bytes(id.to_bytes())));
        assert!(!id.matches(&KeyId::WILDCARD));
        assert!(KeyId::WILDCARD.is_wildcard());
    }

    #[test]
    fn test_fingerprint_key_id_is_low_bits() {
        let fingerprint = Fingerprint::v4(b"\x04example body");
        let bytes = fingerprint.as_bytes();
        assert_eq!(
            fingerprint.key_id().to_bytes().as_slice(),
            &bytes[12..20]
        );
        assert_eq!(fingerprint.to_string().len(), 40);
    }
}
