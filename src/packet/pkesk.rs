//! Public-key encrypted session key packet (tag 1, version 3).

use crate::crypto::{EncryptedSessionKey, KeyId, PublicKeyAlgorithm};
use crate::error::{PgpError, Result};
use crate::packet::ByteCursor;

/// A version 3 PKESK packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyEncryptedSessionKey {
    /// Recipient key id, or the wildcard for anonymous recipients
    pub key_id: KeyId,
    /// Public-key algorithm of the recipient key
    pub algorithm: PublicKeyAlgorithm,
    /// Algorithm-specific encrypted session key
    pub encrypted_key: EncryptedSessionKey,
}

impl PublicKeyEncryptedSessionKey {
    /// Parse from packet body bytes
    pub fn from_bytes(body: &[u8]) -> Result<Self> {
        let mut cursor = ByteCursor::new(body);
        let version = cursor.read_u8()?;
        if version != 3 {
            return Err(PgpError::unsupported(format!(
                "Unsupported PKESK version {version}"
            )));
        }
        let key_id = KeyId::from_bytes(cursor.read_array()?);
        let algorithm = PublicKeyAlgorithm::from_u8(cursor.read_u8()?);
        let encrypted_key = EncryptedSessionKey::parse(algorithm, &mut cursor)?;
        if !cursor.is_empty() {
            return Err(PgpError::parse(format!(
                "{} trailing bytes after encrypted session key",
                cursor.remaining()
            )));
        }

        Ok(Self {
            key_id,
            algorithm,
            encrypted_key,
        })
    }

    /// Serialize to packet body bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = vec![3];
        bytes.extend_from_slice(&self.key_id.to_bytes());
        bytes.push(self.algorithm.to_u8());
        self.encrypted_key.write(&mut bytes)?;
        Ok(bytes)
    }
}
