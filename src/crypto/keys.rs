//! Key material: public keys, secret key packets and unlocked private keys.
//!
//! Only version 4 keys are handled. RSA keys interoperate with other OpenPGP
//! implementations; ML-KEM-1024 keys use the private/experimental algorithm
//! id 100 with their raw encodings stored as two-octet length-prefixed fields.

use crate::armor::{self, ArmorType};
use crate::crypto::cfb::{CfbDecryptor, CfbEncryptor};
use crate::crypto::s2k::{Passphrase, StringToKey};
use crate::crypto::{
    now_timestamp, secure_random_bytes, AeadAlgorithm, Fingerprint, KeyId, KeyUsage,
    PublicKeyAlgorithm, SymmetricAlgorithm,
};
use crate::error::{PgpError, Result};
use crate::packet::{self, checksum16, write_mpi, write_u16_prefixed, ByteCursor, Tag};
use crate::validation::Validator;
use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm};
use hkdf::Hkdf;
use pqcrypto_mlkem::mlkem1024;
use pqcrypto_traits::kem::{PublicKey as _, SecretKey as _};
use rand::{CryptoRng, RngCore};
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};
use sha2::Sha256;
use std::fmt;
use subtle::ConstantTimeEq;
use tracing::debug;
use zeroize::Zeroizing;

type Aes192Gcm = AesGcm<aes::Aes192, U12>;

/// Algorithm-specific public key fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKeyMaterial {
    /// RSA modulus and public exponent
    Rsa {
        /// Modulus
        n: BigUint,
        /// Public exponent
        e: BigUint,
    },
    /// Encoded ML-KEM-1024 encapsulation key
    MlKem1024(Vec<u8>),
    /// Fields of an algorithm this crate carries but does not use
    Opaque(Vec<u8>),
}

impl PublicKeyMaterial {
    fn parse(algorithm: PublicKeyAlgorithm, cursor: &mut ByteCursor<'_>) -> Result<Self> {
        let start = cursor.clone();

        match algorithm {
            PublicKeyAlgorithm::RsaEncryptSign
            | PublicKeyAlgorithm::RsaEncrypt
            | PublicKeyAlgorithm::RsaSign => {
                let n = BigUint::from_bytes_be(cursor.read_mpi()?);
                let e = BigUint::from_bytes_be(cursor.read_mpi()?);
                return Ok(Self::Rsa { n, e });
            }
            PublicKeyAlgorithm::MlKem1024 => {
                let key = cursor.read_u16_prefixed()?;
                if key.len() != mlkem1024::public_key_bytes() {
                    return Err(PgpError::key(format!(
                        "ML-KEM-1024 public key must be {} bytes, got {}",
                        mlkem1024::public_key_bytes(),
                        key.len()
                    )));
                }
                return Ok(Self::MlKem1024(key.to_vec()));
            }
            PublicKeyAlgorithm::Dsa => skip_mpis(cursor, 4)?,
            PublicKeyAlgorithm::ElGamal => skip_mpis(cursor, 3)?,
            PublicKeyAlgorithm::Ecdsa | PublicKeyAlgorithm::EdDsaLegacy => {
                cursor.read_u8_prefixed()?;
                skip_mpis(cursor, 1)?;
            }
            PublicKeyAlgorithm::Ecdh => {
                cursor.read_u8_prefixed()?;
                skip_mpis(cursor, 1)?;
                cursor.read_u8_prefixed()?;
            }
            PublicKeyAlgorithm::X25519 | PublicKeyAlgorithm::Ed25519 => {
                cursor.take(32)?;
            }
            PublicKeyAlgorithm::Other(_) => {
                cursor.rest();
            }
        }

        let consumed = cursor.position() - start.position();
        let mut start = start;
        Ok(Self::Opaque(start.take(consumed)?.to_vec()))
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            Self::Rsa { n, e } => {
                write_mpi(out, &n.to_bytes_be());
                write_mpi(out, &e.to_bytes_be());
            }
            Self::MlKem1024(key) => write_u16_prefixed(out, key)?,
            Self::Opaque(raw) => out.extend_from_slice(raw),
        }
        Ok(())
    }
}

fn skip_mpis(cursor: &mut ByteCursor<'_>, count: usize) -> Result<()> {
    for _ in 0..count {
        cursor.read_mpi()?;
    }
    Ok(())
}

/// A version 4 public key or subkey
#[derive(Clone)]
pub struct PublicKey {
    created: u32,
    algorithm: PublicKeyAlgorithm,
    material: PublicKeyMaterial,
    fingerprint: Fingerprint,
    usage: KeyUsage,
    is_subkey: bool,
    user_ids: Vec<String>,
    body: Vec<u8>,
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("key_id", &self.key_id())
            .field("algorithm", &self.algorithm)
            .field("created", &self.created)
            .field("usage", &self.usage)
            .field("is_subkey", &self.is_subkey)
            .finish()
    }
}

impl PublicKey {
    fn from_parts(
        created: u32,
        algorithm: PublicKeyAlgorithm,
        material: PublicKeyMaterial,
        is_subkey: bool,
    ) -> Result<Self> {
        let mut body = vec![4];
        body.extend_from_slice(&created.to_be_bytes());
        body.push(algorithm.to_u8());
        material.write(&mut body)?;

        Ok(Self {
            created,
            algorithm,
            material,
            fingerprint: Fingerprint::v4(&body),
            usage: algorithm.default_usage(),
            is_subkey,
            user_ids: Vec::new(),
            body,
        })
    }

    /// Parses the public fields at the front of a key packet body, returning the key and bytes consumed
    pub(crate) fn parse_prefix(body: &[u8], is_subkey: bool) -> Result<(Self, usize)> {
        let mut cursor = ByteCursor::new(body);
        let version = cursor.read_u8()?;
        if version != 4 {
            return Err(PgpError::key(format!("Unsupported key version {version}")));
        }
        let created = cursor.read_u32()?;
        let algorithm = PublicKeyAlgorithm::from_u8(cursor.read_u8()?);
        let material = PublicKeyMaterial::parse(algorithm, &mut cursor)?;
        let consumed = cursor.position();

        let body = body[..consumed].to_vec();
        Ok((
            Self {
                created,
                algorithm,
                material,
                fingerprint: Fingerprint::v4(&body),
                usage: algorithm.default_usage(),
                is_subkey,
                user_ids: Vec::new(),
                body,
            },
            consumed,
        ))
    }

    /// Parse a public key or public subkey packet body
    pub fn from_packet_body(body: &[u8], is_subkey: bool) -> Result<Self> {
        let (key, consumed) = Self::parse_prefix(body, is_subkey)?;
        if consumed != body.len() {
            return Err(PgpError::parse(format!(
                "{} trailing bytes in public key packet",
                body.len() - consumed
            )));
        }
        Ok(key)
    }

    /// Returns the key ID
    pub fn key_id(&self) -> KeyId {
        self.fingerprint.key_id()
    }

    /// Returns the v4 fingerprint
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Returns the algorithm
    pub fn algorithm(&self) -> PublicKeyAlgorithm {
        self.algorithm
    }

    /// Returns the creation timestamp
    pub fn created(&self) -> u32 {
        self.created
    }

    /// Returns the key usage
    pub fn usage(&self) -> KeyUsage {
        self.usage
    }

    /// Returns true for subkeys
    pub fn is_subkey(&self) -> bool {
        self.is_subkey
    }

    /// User IDs attached to the primary key this entry belongs to
    pub fn user_ids(&self) -> &[String] {
        &self.user_ids
    }

    /// Algorithm-specific key fields
    pub fn material(&self) -> &PublicKeyMaterial {
        &self.material
    }

    /// Check if this key can receive encrypted session keys
    pub fn is_encryption_capable(&self) -> bool {
        self.usage.encrypt && self.algorithm.is_supported_for_encryption()
    }

    /// Serialized public key packet body
    pub fn to_packet_body(&self) -> &[u8] {
        &self.body
    }

    /// Narrows usage with the key flags of a self-signature
    pub(crate) fn apply_key_flags(&mut self, flags: KeyUsage) {
        self.usage = self.algorithm.default_usage().restrict(flags);
    }

    pub(crate) fn add_user_id(&mut self, user_id: String) {
        self.user_ids.push(user_id);
    }

    /// Reconstructs the RSA public key
    pub(crate) fn as_rsa(&self) -> Result<RsaPublicKey> {
        match &self.material {
            PublicKeyMaterial::Rsa { n, e } => RsaPublicKey::new(n.clone(), e.clone())
                .map_err(|e| PgpError::key(format!("Invalid RSA public key: {e}"))),
            _ => Err(PgpError::key(format!("{} is not an RSA key", self.key_id()))),
        }
    }

    /// Reconstructs the ML-KEM-1024 public key
    pub(crate) fn as_mlkem1024(&self) -> Result<mlkem1024::PublicKey> {
        match &self.material {
            PublicKeyMaterial::MlKem1024(bytes) => mlkem1024::PublicKey::from_bytes(bytes)
                .map_err(|_| PgpError::key("Invalid ML-KEM-1024 public key")),
            _ => Err(PgpError::key(format!(
                "{} is not an ML-KEM-1024 key",
                self.key_id()
            ))),
        }
    }

    fn packet_tag(&self, secret: bool) -> Tag {
        match (secret, self.is_subkey) {
            (false, false) => Tag::PublicKey,
            (false, true) => Tag::PublicSubkey,
            (true, false) => Tag::SecretKey,
            (true, true) => Tag::SecretSubkey,
        }
    }

    /// Serializes the key packet followed by its user ID packets
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        packet::write_packet(&mut out, self.packet_tag(false), &self.body)?;
        for user_id in &self.user_ids {
            packet::write_packet(&mut out, Tag::UserId, user_id.as_bytes())?;
        }
        Ok(out)
    }

    /// Serializes as an armored public key block
    pub fn to_armored(&self) -> Result<String> {
        Ok(armor::encode(ArmorType::PublicKey, &self.to_bytes()?))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PublicKey(ID: {}, Algorithm: {}, Encrypt: {})",
            self.key_id(),
            self.algorithm,
            self.is_encryption_capable()
        )
    }
}

/// How the secret fields of a secret key packet are protected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretKeyProtection {
    /// Usage octet 0: plaintext fields followed by a two-octet checksum
    Unprotected,
    /// Usage octets 254 (SHA-1 check) and 255 (two-octet checksum): CFB encryption
    Cfb {
        /// True for usage 254
        sha1_check: bool,
        /// Cipher protecting the fields
        cipher: SymmetricAlgorithm,
        /// Passphrase derivation
        s2k: StringToKey,
        /// CFB initialisation vector
        iv: Vec<u8>,
    },
    /// Usage octet 253: AEAD encryption
    Aead {
        /// Cipher protecting the fields
        cipher: SymmetricAlgorithm,
        /// AEAD mode
        aead: AeadAlgorithm,
        /// Passphrase derivation
        s2k: StringToKey,
        /// AEAD nonce
        nonce: Vec<u8>,
    },
    /// Protection this crate cannot undo (legacy cipher usage, unknown S2K, stub keys)
    Unsupported {
        /// Raw usage octet
        usage: u8,
        /// Reason the key cannot be unlocked
        reason: String,
    },
}

/// Protection applied when exporting a generated key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtectionMode {
    /// No passphrase
    Unprotected,
    /// AES-256 CFB with an iterated+salted SHA-256 S2K and SHA-1 check
    #[default]
    Cfb,
    /// AES-256-GCM with an Argon2 S2K
    Aead,
}

/// A secret key or subkey packet, still locked
#[derive(Clone)]
pub struct SecretKey {
    public: PublicKey,
    protection: SecretKeyProtection,
    data: Vec<u8>,
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretKey")
            .field("public", &self.public)
            .field("protection", &self.protection)
            .field("secret_size", &self.data.len())
            .finish()
    }
}

fn unsupported_protection(usage: u8, reason: impl Into<String>) -> SecretKeyProtection {
    SecretKeyProtection::Unsupported {
        usage,
        reason: reason.into(),
    }
}

impl SecretKey {
    /// Parse a secret key or secret subkey packet body
    pub fn from_packet_body(body: &[u8], is_subkey: bool) -> Result<Self> {
        let (public, consumed) = PublicKey::parse_prefix(body, is_subkey)?;
        let mut cursor = ByteCursor::new(&body[consumed..]);

        if let PublicKeyAlgorithm::Other(id) = public.algorithm() {
            return Ok(Self {
                public,
                protection: unsupported_protection(0, format!("unknown algorithm {id}")),
                data: Vec::new(),
            });
        }

        let usage = cursor.read_u8()?;
        let protection = match usage {
            0 => SecretKeyProtection::Unprotected,
            253..=255 => {
                let cipher_id = cursor.read_u8()?;
                let aead_id = if usage == 253 {
                    Some(cursor.read_u8()?)
                } else {
                    None
                };
                let s2k = match StringToKey::parse(&mut cursor) {
                    Ok(s2k) => s2k,
                    Err(PgpError::Key(reason)) => {
                        return Ok(Self::locked_forever(public, usage, reason))
                    }
                    Err(err) => return Err(err),
                };
                if s2k.is_stub() {
                    return Ok(Self::locked_forever(public, usage, "secret key is a stub"));
                }
                let Some(cipher) = SymmetricAlgorithm::from_u8(cipher_id) else {
                    return Ok(Self::locked_forever(
                        public,
                        usage,
                        format!("unsupported protection cipher {cipher_id}"),
                    ));
                };
                match aead_id {
                    None => SecretKeyProtection::Cfb {
                        sha1_check: usage == 254,
                        cipher,
                        s2k,
                        iv: cursor.take(cipher.block_size())?.to_vec(),
                    },
                    Some(aead_id) => {
                        let Some(aead) = AeadAlgorithm::from_u8(aead_id) else {
                            return Ok(Self::locked_forever(
                                public,
                                usage,
                                format!("unsupported AEAD mode {aead_id}"),
                            ));
                        };
                        SecretKeyProtection::Aead {
                            cipher,
                            aead,
                            s2k,
                            nonce: cursor.take(aead.nonce_size())?.to_vec(),
                        }
                    }
                }
            }
            other => unsupported_protection(other, "legacy cipher protection"),
        };

        Ok(Self {
            public,
            protection,
            data: cursor.rest().to_vec(),
        })
    }

    fn locked_forever(public: PublicKey, usage: u8, reason: impl Into<String>) -> Self {
        Self {
            public,
            protection: unsupported_protection(usage, reason),
            data: Vec::new(),
        }
    }

    /// Returns the public part
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub(crate) fn public_key_mut(&mut self) -> &mut PublicKey {
        &mut self.public
    }

    /// Returns the key ID
    pub fn key_id(&self) -> KeyId {
        self.public.key_id()
    }

    /// Returns the protection parameters
    pub fn protection(&self) -> &SecretKeyProtection {
        &self.protection
    }

    /// Check whether a passphrase is needed to unlock the key
    pub fn is_protected(&self) -> bool {
        !matches!(self.protection, SecretKeyProtection::Unprotected)
    }

    fn packet_type_octet(&self) -> u8 {
        0xC0 | self.public.packet_tag(true).to_u8()
    }

    /// Unlocks the secret fields with a passphrase
    pub fn unlock(&self, passphrase: &Passphrase) -> Result<PrivateKey> {
        let wrong = || PgpError::WrongPassphrase {
            key_id: self.key_id(),
        };

        let fields = match &self.protection {
            SecretKeyProtection::Unprotected => {
                let (fields, sum) = split_tail(&self.data, 2)?;
                if checksum16(fields).to_be_bytes() != sum {
                    return Err(PgpError::key(format!(
                        "Checksum mismatch in unprotected key {}",
                        self.key_id()
                    )));
                }
                return PrivateKey::from_secret_fields(self.public.clone(), fields);
            }
            SecretKeyProtection::Cfb {
                sha1_check,
                cipher,
                s2k,
                iv,
            } => {
                let kek = s2k.derive_key(passphrase, cipher.key_size())?;
                let mut plain = Zeroizing::new(self.data.clone());
                CfbDecryptor::new(*cipher, &kek, iv)?.decrypt(&mut plain);

                let check_len = if *sha1_check { 20 } else { 2 };
                let (fields, check) = split_tail(&plain, check_len).map_err(|_| wrong())?;
                let ok: bool = if *sha1_check {
                    Sha1::digest(fields).as_slice().ct_eq(check).into()
                } else {
                    checksum16(fields).to_be_bytes()[..].ct_eq(check).into()
                };
                if !ok {
                    return Err(wrong());
                }
                Zeroizing::new(fields.to_vec())
            }
            SecretKeyProtection::Aead {
                cipher,
                aead,
                s2k,
                nonce,
            } => {
                if *aead != AeadAlgorithm::Gcm {
                    return Err(PgpError::key(format!(
                        "AEAD mode {} is not supported for key {}",
                        aead.to_u8(),
                        self.key_id()
                    )));
                }
                let ikm = s2k.derive_key(passphrase, cipher.key_size())?;
                let kek = self.aead_kek(&ikm, *cipher, *aead)?;
                let aad = self.aead_associated_data();
                gcm_open(*cipher, &kek, nonce, &aad, &self.data).map_err(|_| wrong())?
            }
            SecretKeyProtection::Unsupported { reason, .. } => {
                return Err(PgpError::key(format!(
                    "Cannot unlock key {}: {}",
                    self.key_id(),
                    reason
                )));
            }
        };

        // A checksum collision under a wrong passphrase leaves garbage fields
        PrivateKey::from_secret_fields(self.public.clone(), &fields).map_err(|_| wrong())
    }

    fn aead_kek(
        &self,
        ikm: &[u8],
        cipher: SymmetricAlgorithm,
        aead: AeadAlgorithm,
    ) -> Result<Zeroizing<Vec<u8>>> {
        let info = [self.packet_type_octet(), 4, cipher.to_u8(), aead.to_u8()];
        let hkdf = Hkdf::<Sha256>::new(None, ikm);
        let mut kek = Zeroizing::new(vec![0u8; cipher.key_size()]);
        hkdf.expand(&info, &mut kek)
            .map_err(|_| PgpError::crypto("HKDF expansion failed"))?;
        Ok(kek)
    }

    fn aead_associated_data(&self) -> Vec<u8> {
        let mut aad = vec![self.packet_type_octet()];
        aad.extend_from_slice(self.public.to_packet_body());
        aad
    }

    /// Builds a protected secret key packet from an unlocked key
    pub fn protect<R: CryptoRng + RngCore>(
        private: &PrivateKey,
        passphrase: &Passphrase,
        mode: ProtectionMode,
        rng: &mut R,
    ) -> Result<Self> {
        if mode != ProtectionMode::Unprotected && passphrase.is_empty() {
            return Err(PgpError::invalid_input("Passphrase cannot be empty"));
        }

        let fields = private.secret_fields()?;
        let cipher = SymmetricAlgorithm::Aes256;
        let mut key = Self {
            public: private.public.clone(),
            protection: SecretKeyProtection::Unprotected,
            data: Vec::new(),
        };

        match mode {
            ProtectionMode::Unprotected => {
                key.data = fields.to_vec();
                key.data.extend_from_slice(&checksum16(&fields).to_be_bytes());
            }
            ProtectionMode::Cfb => {
                let s2k = StringToKey::iterated(rng);
                let iv = secure_random_bytes(rng, cipher.block_size());
                let kek = s2k.derive_key(passphrase, cipher.key_size())?;

                let mut data = fields.to_vec();
                data.extend_from_slice(&Sha1::digest(&fields));
                CfbEncryptor::new(cipher, &kek, &iv)?.encrypt(&mut data);

                key.data = data;
                key.protection = SecretKeyProtection::Cfb {
                    sha1_check: true,
                    cipher,
                    s2k,
                    iv,
                };
            }
            ProtectionMode::Aead => {
                let aead = AeadAlgorithm::Gcm;
                let s2k = StringToKey::argon2(rng);
                let nonce = secure_random_bytes(rng, aead.nonce_size());
                let ikm = s2k.derive_key(passphrase, cipher.key_size())?;
                let kek = key.aead_kek(&ikm, cipher, aead)?;
                let aad = key.aead_associated_data();

                key.data = gcm_seal(cipher, &kek, &nonce, &aad, &fields)?;
                key.protection = SecretKeyProtection::Aead {
                    cipher,
                    aead,
                    s2k,
                    nonce,
                };
            }
        }

        debug!(
            "Protected secret key {} with {:?}",
            key.key_id(),
            mode
        );
        Ok(key)
    }

    /// Serialized secret key packet body
    pub fn to_packet_body(&self) -> Vec<u8> {
        let mut body = self.public.to_packet_body().to_vec();
        match &self.protection {
            SecretKeyProtection::Unprotected => body.push(0),
            SecretKeyProtection::Cfb {
                sha1_check,
                cipher,
                s2k,
                iv,
            } => {
                body.push(if *sha1_check { 254 } else { 255 });
                body.push(cipher.to_u8());
                s2k.write(&mut body);
                body.extend_from_slice(iv);
            }
            SecretKeyProtection::Aead {
                cipher,
                aead,
                s2k,
                nonce,
            } => {
                body.extend_from_slice(&[253, cipher.to_u8(), aead.to_u8()]);
                s2k.write(&mut body);
                body.extend_from_slice(nonce);
            }
            SecretKeyProtection::Unsupported { usage, .. } => body.push(*usage),
        }
        body.extend_from_slice(&self.data);
        body
    }

    /// Serializes the secret key packet followed by its user ID packets
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        packet::write_packet(&mut out, self.public.packet_tag(true), &self.to_packet_body())?;
        for user_id in self.public.user_ids() {
            packet::write_packet(&mut out, Tag::UserId, user_id.as_bytes())?;
        }
        Ok(out)
    }
}

fn split_tail(data: &[u8], tail: usize) -> Result<(&[u8], &[u8])> {
    if data.len() < tail {
        return Err(PgpError::parse("Secret key data too short"));
    }
    Ok(data.split_at(data.len() - tail))
}

fn gcm_cipher_error(_: aes_gcm::aead::Error) -> PgpError {
    PgpError::crypto("AES-GCM operation failed")
}

fn seal_with<C: Aead + KeyInit>(key: &[u8], nonce: &[u8], aad: &[u8], msg: &[u8]) -> Result<Vec<u8>> {
    let cipher = C::new_from_slice(key).map_err(|_| PgpError::crypto("Invalid AES-GCM key"))?;
    cipher
        .encrypt(aes_gcm::aead::Nonce::<C>::from_slice(nonce), Payload { msg, aad })
        .map_err(gcm_cipher_error)
}

fn open_with<C: Aead + KeyInit>(key: &[u8], nonce: &[u8], aad: &[u8], msg: &[u8]) -> Result<Vec<u8>> {
    let cipher = C::new_from_slice(key).map_err(|_| PgpError::crypto("Invalid AES-GCM key"))?;
    cipher
        .decrypt(aes_gcm::aead::Nonce::<C>::from_slice(nonce), Payload { msg, aad })
        .map_err(gcm_cipher_error)
}

fn gcm_seal(
    cipher: SymmetricAlgorithm,
    key: &[u8],
    nonce: &[u8],
    aad: &[u8],
    msg: &[u8],
) -> Result<Vec<u8>> {
    if nonce.len() != AeadAlgorithm::Gcm.nonce_size() {
        return Err(PgpError::crypto("AES-GCM nonce must be 12 bytes"));
    }
    match cipher {
        SymmetricAlgorithm::Aes128 => seal_with::<Aes128Gcm>(key, nonce, aad, msg),
        SymmetricAlgorithm::Aes192 => seal_with::<Aes192Gcm>(key, nonce, aad, msg),
        SymmetricAlgorithm::Aes256 => seal_with::<Aes256Gcm>(key, nonce, aad, msg),
        SymmetricAlgorithm::Cast5 => Err(PgpError::key("GCM requires a 128-bit block cipher")),
    }
}

fn gcm_open(
    cipher: SymmetricAlgorithm,
    key: &[u8],
    nonce: &[u8],
    aad: &[u8],
    msg: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    if nonce.len() != AeadAlgorithm::Gcm.nonce_size() {
        return Err(PgpError::crypto("AES-GCM nonce must be 12 bytes"));
    }
    let plain = match cipher {
        SymmetricAlgorithm::Aes128 => open_with::<Aes128Gcm>(key, nonce, aad, msg),
        SymmetricAlgorithm::Aes192 => open_with::<Aes192Gcm>(key, nonce, aad, msg),
        SymmetricAlgorithm::Aes256 => open_with::<Aes256Gcm>(key, nonce, aad, msg),
        SymmetricAlgorithm::Cast5 => Err(PgpError::key("GCM requires a 128-bit block cipher")),
    }?;
    Ok(Zeroizing::new(plain))
}

/// Unlocked secret key material
enum PrivateKeyMaterial {
    Rsa(RsaPrivateKey),
    MlKem1024(Zeroizing<Vec<u8>>),
}

/// An unlocked private key
pub struct PrivateKey {
    public: PublicKey,
    material: PrivateKeyMaterial,
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("key_id", &self.key_id())
            .field("algorithm", &self.public.algorithm())
            .finish_non_exhaustive()
    }
}

impl PrivateKey {
    fn from_secret_fields(public: PublicKey, fields: &[u8]) -> Result<Self> {
        let mut cursor = ByteCursor::new(fields);
        let material = match public.material() {
            PublicKeyMaterial::Rsa { n, e } => {
                let d = BigUint::from_bytes_be(cursor.read_mpi()?);
                let p = BigUint::from_bytes_be(cursor.read_mpi()?);
                let q = BigUint::from_bytes_be(cursor.read_mpi()?);
                let _u = cursor.read_mpi()?;
                let key = RsaPrivateKey::from_components(n.clone(), e.clone(), d, vec![p, q])
                    .map_err(|e| PgpError::key(format!("Invalid RSA secret key: {e}")))?;
                key.validate()
                    .map_err(|e| PgpError::key(format!("Invalid RSA secret key: {e}")))?;
                PrivateKeyMaterial::Rsa(key)
            }
            PublicKeyMaterial::MlKem1024(_) => {
                let secret = cursor.read_u16_prefixed()?;
                mlkem1024::SecretKey::from_bytes(secret)
                    .map_err(|_| PgpError::key("Invalid ML-KEM-1024 secret key"))?;
                PrivateKeyMaterial::MlKem1024(Zeroizing::new(secret.to_vec()))
            }
            PublicKeyMaterial::Opaque(_) => {
                return Err(PgpError::key(format!(
                    "Secret keys for {} are not supported",
                    public.algorithm()
                )));
            }
        };

        Ok(Self { public, material })
    }

    /// Serializes the algorithm-specific secret fields
    fn secret_fields(&self) -> Result<Zeroizing<Vec<u8>>> {
        let mut out = Zeroizing::new(Vec::new());
        match &self.material {
            PrivateKeyMaterial::Rsa(key) => {
                let primes = key.primes();
                if primes.len() != 2 {
                    return Err(PgpError::key("Multi-prime RSA keys cannot be exported"));
                }
                // OpenPGP requires p < q
                let (p, q) = if primes[0] < primes[1] {
                    (&primes[0], &primes[1])
                } else {
                    (&primes[1], &primes[0])
                };
                // u = p^-1 mod q, q prime
                let u = p.modpow(&(q.clone() - BigUint::from(2u8)), q);
                write_mpi(&mut out, &key.d().to_bytes_be());
                write_mpi(&mut out, &p.to_bytes_be());
                write_mpi(&mut out, &q.to_bytes_be());
                write_mpi(&mut out, &u.to_bytes_be());
            }
            PrivateKeyMaterial::MlKem1024(secret) => write_u16_prefixed(&mut out, secret)?,
        }
        Ok(out)
    }

    /// Returns the public part
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Returns the key ID
    pub fn key_id(&self) -> KeyId {
        self.public.key_id()
    }

    /// Returns the algorithm
    pub fn algorithm(&self) -> PublicKeyAlgorithm {
        self.public.algorithm()
    }

    pub(crate) fn as_rsa(&self) -> Option<&RsaPrivateKey> {
        match &self.material {
            PrivateKeyMaterial::Rsa(key) => Some(key),
            _ => None,
        }
    }

    pub(crate) fn as_mlkem1024(&self) -> Result<Option<mlkem1024::SecretKey>> {
        match &self.material {
            PrivateKeyMaterial::MlKem1024(secret) => mlkem1024::SecretKey::from_bytes(secret)
                .map(Some)
                .map_err(|_| PgpError::key("Invalid ML-KEM-1024 secret key")),
            _ => Ok(None),
        }
    }
}

impl fmt::Display for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PrivateKey(ID: {}, Algorithm: {})",
            self.key_id(),
            self.algorithm()
        )
    }
}

/// A freshly generated key with both halves available
pub struct KeyPair {
    private: PrivateKey,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", self.public_key())
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    /// Generates an RSA (encrypt or sign) key pair
    pub fn generate_rsa<R: CryptoRng + RngCore>(rng: &mut R, bits: usize) -> Result<Self> {
        Validator::validate_rsa_bits(bits)?;
        let key = RsaPrivateKey::new(rng, bits)
            .map_err(|e| PgpError::crypto(format!("RSA key generation failed: {e}")))?;

        let material = PublicKeyMaterial::Rsa {
            n: key.n().clone(),
            e: key.e().clone(),
        };
        let public = PublicKey::from_parts(
            now_timestamp(),
            PublicKeyAlgorithm::RsaEncryptSign,
            material,
            false,
        )?;
        debug!("Generated {}-bit RSA key {}", bits, public.key_id());

        Ok(Self {
            private: PrivateKey {
                public,
                material: PrivateKeyMaterial::Rsa(key),
            },
        })
    }

    /// Generates an ML-KEM-1024 key pair
    pub fn generate_mlkem1024<R: CryptoRng + RngCore>(_rng: &mut R) -> Result<Self> {
        // pqcrypto draws from the system generator itself
        let (public_key, secret_key) = mlkem1024::keypair();

        let public = PublicKey::from_parts(
            now_timestamp(),
            PublicKeyAlgorithm::MlKem1024,
            PublicKeyMaterial::MlKem1024(public_key.as_bytes().to_vec()),
            false,
        )?;
        debug!("Generated ML-KEM-1024 key {}", public.key_id());

        Ok(Self {
            private: PrivateKey {
                public,
                material: PrivateKeyMaterial::MlKem1024(Zeroizing::new(
                    secret_key.as_bytes().to_vec(),
                )),
            },
        })
    }

    /// Attaches a user ID
    pub fn with_user_id(mut self, user_id: &str) -> Result<Self> {
        Validator::validate_user_id(user_id)?;
        self.private.public.add_user_id(user_id.to_string());
        Ok(self)
    }

    /// Get the public key
    pub fn public_key(&self) -> &PublicKey {
        &self.private.public
    }

    /// Get the private key
    pub fn private_key(&self) -> &PrivateKey {
        &self.private
    }

    /// Get the key ID
    pub fn key_id(&self) -> KeyId {
        self.private.key_id()
    }

    /// Transferable public key: key packet and user IDs
    pub fn export_public(&self) -> Result<Vec<u8>> {
        self.public_key().to_bytes()
    }

    /// Armored transferable public key
    pub fn export_public_armored(&self) -> Result<String> {
        self.public_key().to_armored()
    }

    /// Transferable secret key protected with `passphrase`
    pub fn export_secret<R: CryptoRng + RngCore>(
        &self,
        passphrase: &Passphrase,
        mode: ProtectionMode,
        rng: &mut R,
    ) -> Result<Vec<u8>> {
        SecretKey::protect(&self.private, passphrase, mode, rng)?.to_bytes()
    }

    /// Armored transferable secret key protected with `passphrase`
    pub fn export_secret_armored<R: CryptoRng + RngCore>(
        &self,
        passphrase: &Passphrase,
        mode: ProtectionMode,
        rng: &mut R,
    ) -> Result<String> {
        let bytes = self.export_secret(passphrase, mode, rng)?;
        Ok(armor::encode(ArmorType::PrivateKey, &bytes))
    }
}

impl fmt::Display for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPair({})", self.public_key())
    }
}
