//! Minimal reading of signature packets (tag 2).
//!
//! Signatures are never verified. Key rings only need the signature type and
//! the key flags subpacket of self-signatures to decide what a key may be used
//! for.

use crate::crypto::KeyUsage;
use crate::error::{PgpError, Result};
use crate::packet::ByteCursor;

/// Subpacket type carrying key flags
const KEY_FLAGS_SUBPACKET: u8 = 27;

/// The parts of a signature packet that narrow key usage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureInfo {
    /// Signature packet version
    pub version: u8,
    /// Signature type octet
    pub signature_type: u8,
    /// Usage from a hashed key flags subpacket, if present
    pub key_flags: Option<KeyUsage>,
}

impl SignatureInfo {
    /// Parse from packet body bytes
    pub fn from_bytes(body: &[u8]) -> Result<Self> {
        let mut cursor = ByteCursor::new(body);
        let version = cursor.read_u8()?;
        match version {
            3 => {
                // Hashed material length is always 5; the type comes first
                let _hashed_len = cursor.read_u8()?;
                let signature_type = cursor.read_u8()?;
                Ok(Self {
                    version,
                    signature_type,
                    key_flags: None,
                })
            }
            4 => {
                let signature_type = cursor.read_u8()?;
                let _pk_algorithm = cursor.read_u8()?;
                let _hash_algorithm = cursor.read_u8()?;
                let hashed = cursor.read_u16_prefixed()?;
                Ok(Self {
                    version,
                    signature_type,
                    key_flags: find_key_flags(hashed)?,
                })
            }
            _ => {
                let signature_type = cursor.read_u8()?;
                Ok(Self {
                    version,
                    signature_type,
                    key_flags: None,
                })
            }
        }
    }

    /// Certification of a user ID by the primary key (types 0x10-0x13) or a direct key signature
    pub fn is_primary_key_binding(&self) -> bool {
        matches!(self.signature_type, 0x10..=0x13 | 0x1F)
    }

    /// Subkey binding signature
    pub fn is_subkey_binding(&self) -> bool {
        self.signature_type == 0x18
    }
}

/// Walks a subpacket area and returns the first key flags subpacket
fn find_key_flags(area: &[u8]) -> Result<Option<KeyUsage>> {
    let mut cursor = ByteCursor::new(area);
    while !cursor.is_empty() {
        let first = cursor.read_u8()?;
        let length = match first {
            0..=191 => first as usize,
            192..=254 => ((first as usize - 192) << 8) + cursor.read_u8()? as usize + 192,
            255 => cursor.read_u32()? as usize,
        };
        if length == 0 {
            return Err(PgpError::parse("Empty signature subpacket"));
        }
        let subpacket = cursor.take(length)?;
        if subpacket[0] & 0x7F == KEY_FLAGS_SUBPACKET {
            let flags = subpacket.get(1).copied().unwrap_or(0);
            return Ok(Some(KeyUsage::from_flags(flags)));
        }
    }
    Ok(None)
}
