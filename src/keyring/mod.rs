//! Key ring loading and key resolution.
//!
//! A [`KeyRing`] is the ordered list of keys found in one armored or binary
//! container: primary keys and subkeys, public or secret. Nothing is
//! deduplicated, and lookups return the first usable match in ring order.
//!
//! Signatures are not verified. The key flags subpacket of a self-signature
//! only narrows what the preceding key may be used for.

use crate::armor::{self, ArmorType};
use crate::crypto::{KeyId, Passphrase, PrivateKey, PublicKey, SecretKey};
use crate::error::{PgpError, Result};
use crate::packet::signature::SignatureInfo;
use crate::packet::{PacketBody, PacketHeader, Tag};
use crate::validation::Validator;
use std::fmt;
use tracing::{debug, warn};

/// One entry of a key ring
#[derive(Debug, Clone)]
pub enum KeyMaterial {
    /// Public key or public subkey
    Public(PublicKey),
    /// Secret key or secret subkey, still locked
    Secret(SecretKey),
}

impl KeyMaterial {
    /// Returns the key ID
    pub fn key_id(&self) -> KeyId {
        self.public_key().key_id()
    }

    /// Returns the public part of the entry
    pub fn public_key(&self) -> &PublicKey {
        match self {
            Self::Public(key) => key,
            Self::Secret(key) => key.public_key(),
        }
    }

    /// Returns the secret key, if this is a secret entry
    pub fn secret_key(&self) -> Option<&SecretKey> {
        match self {
            Self::Public(_) => None,
            Self::Secret(key) => Some(key),
        }
    }

    /// Check if this entry carries secret material
    pub fn is_secret(&self) -> bool {
        matches!(self, Self::Secret(_))
    }

    fn public_key_mut(&mut self) -> &mut PublicKey {
        match self {
            Self::Public(key) => key,
            Self::Secret(key) => key.public_key_mut(),
        }
    }
}

/// Ordered collection of keys loaded from one container
#[derive(Debug, Clone, Default)]
pub struct KeyRing {
    entries: Vec<KeyMaterial>,
}

impl KeyRing {
    /// Create a new empty key ring
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a key ring, detecting ASCII armor automatically.
    ///
    /// Fails with [`PgpError::Parse`] when the data is not a key ring at all.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Validator::validate_keyring_bytes(data)?;

        if armor::is_armored(data) {
            let armored = armor::decode(data)?;
            match armored.kind {
                ArmorType::PublicKey | ArmorType::PrivateKey => {}
                other => {
                    return Err(PgpError::parse(format!(
                        "Armored block '{other}' is not a key ring"
                    )))
                }
            }
            return Self::from_packets(&armored.data);
        }

        Self::from_packets(data)
    }

    /// Loads a secret key ring, keeping every secret key entry.
    ///
    /// Public entries are dropped; a container without secret keys is a parse error.
    pub fn load_secret(data: &[u8]) -> Result<Self> {
        let ring = Self::from_bytes(data)?;
        let entries: Vec<KeyMaterial> = ring
            .entries
            .into_iter()
            .filter(KeyMaterial::is_secret)
            .collect();

        if entries.is_empty() {
            return Err(PgpError::parse("Key ring contains no secret keys"));
        }
        debug!("Loaded secret key ring with {} keys", entries.len());
        Ok(Self { entries })
    }

    fn from_packets(mut data: &[u8]) -> Result<Self> {
        let mut ring = Self::new();
        // Index of the current primary key and of the key the next signature refers to
        let mut primary: Option<usize> = None;
        let mut current: Option<usize> = None;
        let mut saw_key = false;

        while let Some(header) = PacketHeader::read(&mut data)? {
            let body = PacketBody::new(&mut data, &header).read_to_vec()?;

            match header.tag {
                Tag::PublicKey | Tag::SecretKey | Tag::PublicSubkey | Tag::SecretSubkey => {
                    saw_key = true;
                    let is_subkey = matches!(header.tag, Tag::PublicSubkey | Tag::SecretSubkey);
                    match parse_key(header.tag, &body, is_subkey) {
                        Ok(mut entry) => {
                            if is_subkey {
                                let owner_ids = primary
                                    .map(|idx| ring.entries[idx].public_key().user_ids().to_vec())
                                    .unwrap_or_default();
                                for user_id in owner_ids {
                                    entry.public_key_mut().add_user_id(user_id);
                                }
                            }
                            ring.entries.push(entry);
                            Validator::validate_keyring_size(ring.entries.len())?;
                            let idx = ring.entries.len() - 1;
                            if !is_subkey {
                                primary = Some(idx);
                            }
                            current = Some(idx);
                        }
                        Err(PgpError::Key(reason)) => {
                            warn!("Skipping unusable key packet: {}", reason);
                            if !is_subkey {
                                primary = None;
                            }
                            current = None;
                        }
                        Err(err) => return Err(err),
                    }
                }
                Tag::UserId => {
                    if let Some(idx) = primary {
                        let user_id = String::from_utf8_lossy(&body).into_owned();
                        ring.entries[idx].public_key_mut().add_user_id(user_id);
                    }
                }
                Tag::Signature => {
                    if let Some(idx) = current {
                        apply_signature(&mut ring.entries[idx], &body);
                    }
                }
                Tag::Marker | Tag::Trust | Tag::UserAttribute | Tag::Other(_) if saw_key => {}
                Tag::Marker => {}
                other => {
                    return Err(PgpError::parse(format!(
                        "Unexpected packet {other:?} in key ring"
                    )))
                }
            }

            if !saw_key && !matches!(header.tag, Tag::Marker) {
                return Err(PgpError::parse("Key ring does not start with a key packet"));
            }
        }

        if !saw_key {
            return Err(PgpError::parse("No key packets found"));
        }
        Ok(ring)
    }

    /// Returns the first entry with this key ID
    pub fn find(&self, key_id: KeyId) -> Option<&KeyMaterial> {
        self.entries.iter().find(|entry| entry.key_id().matches(&key_id))
    }

    /// Iterates over all entries in ring order
    pub fn iter(&self) -> impl Iterator<Item = &KeyMaterial> {
        self.entries.iter()
    }

    /// Iterates over the public part of every entry
    pub fn public_keys(&self) -> impl Iterator<Item = &PublicKey> {
        self.entries.iter().map(KeyMaterial::public_key)
    }

    /// Iterates over the secret entries
    pub fn secret_keys(&self) -> impl Iterator<Item = &SecretKey> {
        self.entries.iter().filter_map(KeyMaterial::secret_key)
    }

    /// Returns the first key eligible for encryption
    pub fn encryption_key(&self) -> Option<&PublicKey> {
        self.public_keys().find(|key| key.is_encryption_capable())
    }

    /// Unlocks the secret key with this key ID.
    ///
    /// Returns `Ok(None)` when no secret entry has the identifier and
    /// [`PgpError::WrongPassphrase`] when one does but the passphrase does not
    /// unlock it. Entries sharing an identifier are tried in order. The
    /// wildcard identifier tries every secret key.
    pub fn resolve_private_key(&self, key_id: KeyId, passphrase: &str) -> Result<Option<PrivateKey>> {
        self.resolve_with(key_id, &Passphrase::new(passphrase))
    }

    pub(crate) fn resolve_with(
        &self,
        key_id: KeyId,
        passphrase: &Passphrase,
    ) -> Result<Option<PrivateKey>> {
        let mut failure: Option<PgpError> = None;

        let candidates = self
            .secret_keys()
            .filter(|secret| key_id.is_wildcard() || secret.key_id().matches(&key_id));

        for secret in candidates {
            match secret.unlock(passphrase) {
                Ok(private_key) => {
                    debug!("Unlocked secret key {}", secret.key_id());
                    return Ok(Some(private_key));
                }
                Err(err @ PgpError::WrongPassphrase { .. }) => {
                    debug!("Passphrase does not unlock {}", secret.key_id());
                    if !matches!(failure, Some(PgpError::WrongPassphrase { .. })) {
                        failure = Some(err);
                    }
                }
                Err(err) => {
                    debug!("Cannot unlock {}: {}", secret.key_id(), err);
                    failure.get_or_insert(err);
                }
            }
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the ring has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for KeyRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "KeyRing ({} keys)", self.entries.len())?;
        for entry in &self.entries {
            let marker = if entry.is_secret() { "sec" } else { "pub" };
            writeln!(f, "  {} {}", marker, entry.public_key())?;
        }
        Ok(())
    }
}

fn parse_key(tag: Tag, body: &[u8], is_subkey: bool) -> Result<KeyMaterial> {
    match tag {
        Tag::SecretKey | Tag::SecretSubkey => {
            SecretKey::from_packet_body(body, is_subkey).map(KeyMaterial::Secret)
        }
        _ => PublicKey::from_packet_body(body, is_subkey).map(KeyMaterial::Public),
    }
}

fn apply_signature(entry: &mut KeyMaterial, body: &[u8]) {
    let info = match SignatureInfo::from_bytes(body) {
        Ok(info) => info,
        Err(err) => {
            debug!("Ignoring unreadable signature: {}", err);
            return;
        }
    };
    let Some(flags) = info.key_flags else {
        return;
    };

    let key = entry.public_key_mut();
    let binds = if key.is_subkey() {
        info.is_subkey_binding()
    } else {
        info.is_primary_key_binding()
    };
    if binds {
        key.apply_key_flags(flags);
    }
}

/// Loads a public key ring and returns its first key eligible for encryption
pub fn load_public_key(data: &[u8]) -> Result<PublicKey> {
    let ring = KeyRing::from_bytes(data)?;
    ring.encryption_key().cloned().ok_or_else(|| {
        PgpError::key_not_found(format!(
            "No encryption-capable key among {} keys in the ring",
            ring.len()
        ))
    })
}
