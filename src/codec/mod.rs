//! The encrypt/decrypt packet pipeline.
//!
//! Encryption nests streaming writers: literal data inside optional
//! compression inside the encrypted data packet, preceded by one session key
//! packet per recipient and optionally wrapped in ASCII armor. Decryption
//! peels the same layers back as streaming readers.
//!
//! ```text
//! [armor] PKESK* (SEIPD | SED) { [compressed] { literal } [MDC] }
//! ```

use crate::crypto::{CompressionAlgorithm, KeyId, SymmetricAlgorithm};
use crate::validation::MAX_HELD_PLAINTEXT_SIZE;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod compression;
pub mod decrypt;
pub mod encrypt;

pub use decrypt::{decrypt_bytes, decrypt_stream};
pub use encrypt::{encrypt_bytes, encrypt_stream, EncryptWriter};

/// Event line recorded when the modification detection code matches
pub const INTEGRITY_PASSED: &str = "Message Passed the integrity check.";
/// Event line recorded when the modification detection code does not match
pub const INTEGRITY_FAILED: &str = "Message Failed integrity check!!!";
/// Event line recorded for data packets without integrity protection
pub const INTEGRITY_ABSENT: &str = "There was no integrity check";

/// Options controlling how a message is encrypted.
///
/// The same defaults apply to byte, stream and file input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptOptions {
    /// Emit a SEIPD packet with a modification detection code instead of a plain SED packet
    pub integrity_check: bool,
    /// Wrap the output in ASCII armor
    pub armor: bool,
    /// Compression applied to the literal data
    pub compression: CompressionAlgorithm,
    /// Cipher used for the message body
    pub symmetric: SymmetricAlgorithm,
    /// File name recorded in the literal packet; the input's name or `_CONSOLE` when unset
    pub file_name: Option<String>,
    /// Modification time recorded in the literal packet; the encryption time when unset
    pub modification_time: Option<u32>,
}

impl Default for EncryptOptions {
    fn default() -> Self {
        Self {
            integrity_check: true,
            armor: false,
            compression: CompressionAlgorithm::Uncompressed,
            symmetric: SymmetricAlgorithm::Aes256,
            file_name: None,
            modification_time: None,
        }
    }
}

impl EncryptOptions {
    /// Enable or disable ASCII armor
    pub fn with_armor(mut self, armor: bool) -> Self {
        self.armor = armor;
        self
    }

    /// Enable or disable the modification detection code
    pub fn with_integrity_check(mut self, integrity_check: bool) -> Self {
        self.integrity_check = integrity_check;
        self
    }

    /// Select the compression algorithm
    pub fn with_compression(mut self, compression: CompressionAlgorithm) -> Self {
        self.compression = compression;
        self
    }

    /// Select the message cipher
    pub fn with_symmetric(mut self, symmetric: SymmetricAlgorithm) -> Self {
        self.symmetric = symmetric;
        self
    }

    /// Record a fixed file name in the literal packet
    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    /// Record a fixed modification time in the literal packet
    pub fn with_modification_time(mut self, timestamp: u32) -> Self {
        self.modification_time = Some(timestamp);
        self
    }
}

/// What decryption does with a message whose integrity check fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityPolicy {
    /// Record the failure and still return the plaintext
    #[default]
    Advisory,
    /// Reject the message with [`PgpError::IntegrityCheckFailed`](crate::PgpError::IntegrityCheckFailed)
    FailClosed,
}

/// Options controlling decryption
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecryptOptions {
    /// Handling of failed integrity checks
    pub integrity_policy: IntegrityPolicy,
    /// Largest plaintext held in memory under [`IntegrityPolicy::FailClosed`]
    pub max_held_plaintext: usize,
}

impl Default for DecryptOptions {
    fn default() -> Self {
        Self {
            integrity_policy: IntegrityPolicy::Advisory,
            max_held_plaintext: MAX_HELD_PLAINTEXT_SIZE,
        }
    }
}

impl DecryptOptions {
    /// Options that reject messages failing their integrity check
    pub fn fail_closed() -> Self {
        Self {
            integrity_policy: IntegrityPolicy::FailClosed,
            ..Self::default()
        }
    }

    /// Cap the plaintext held back while the integrity check is pending
    pub fn with_max_held_plaintext(mut self, limit: usize) -> Self {
        self.max_held_plaintext = limit;
        self
    }
}

/// Outcome of the integrity check of one message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegrityVerdict {
    /// Integrity protected and the modification detection code matched
    ProtectedValid,
    /// Integrity protected and the modification detection code did not match
    ProtectedFailed,
    /// The data packet carried no integrity protection
    Unprotected,
}

impl IntegrityVerdict {
    /// Status line recorded in the session event log
    pub fn message(&self) -> &'static str {
        match self {
            Self::ProtectedValid => INTEGRITY_PASSED,
            Self::ProtectedFailed => INTEGRITY_FAILED,
            Self::Unprotected => INTEGRITY_ABSENT,
        }
    }

    /// Returns true unless a present check failed
    pub fn is_acceptable(&self) -> bool {
        !matches!(self, Self::ProtectedFailed)
    }
}

impl fmt::Display for IntegrityVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Everything a decryption learns about a message besides its payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageInfo {
    /// Integrity check outcome
    pub verdict: IntegrityVerdict,
    /// File name from the literal packet
    pub file_name: String,
    /// Modification time from the literal packet
    pub modified: u32,
    /// Key that opened the session key
    pub key_id: KeyId,
}

/// A decrypted message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decrypted {
    /// Recovered plaintext
    pub plaintext: Vec<u8>,
    /// Integrity check outcome
    pub verdict: IntegrityVerdict,
    /// File name from the literal packet
    pub file_name: String,
    /// Modification time from the literal packet
    pub modified: u32,
    /// Key that opened the session key
    pub key_id: KeyId,
}

impl Decrypted {
    pub(crate) fn new(plaintext: Vec<u8>, info: MessageInfo) -> Self {
        Self {
            plaintext,
            verdict: info.verdict,
            file_name: info.file_name,
            modified: info.modified,
            key_id: info.key_id,
        }
    }
}
