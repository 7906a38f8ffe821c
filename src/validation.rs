//! Input validation and resource limits for envelope processing
//!
//! Packet bodies that must be held in memory (keys, session key packets,
//! signatures) are capped, as are ring sizes, nesting of compressed packets and
//! the cost parameters of key derivation read from untrusted key material.
//! Streamed data packets carry no size limit, except for the plaintext held
//! back while a fail-closed decryption waits for its integrity check.

use crate::error::{PgpError, Result};

/// Maximum size of a packet body that is read fully into memory (1MB)
pub const MAX_BUFFERED_PACKET_SIZE: usize = 1024 * 1024;

/// Maximum size of a key ring container (64MB)
pub const MAX_KEYRING_SIZE: usize = 64 * 1024 * 1024;

/// Maximum allowed number of keys in a keyring
pub const MAX_KEYS_PER_KEYRING: usize = 10000;

/// Maximum allowed number of packets ahead of the encrypted data packet
pub const MAX_PACKETS_PER_MESSAGE: usize = 1000;

/// Maximum allowed nesting depth of compressed packets
pub const MAX_PACKET_NESTING_DEPTH: usize = 8;

/// Default cap on plaintext held back by fail-closed decryption (256MB)
pub const MAX_HELD_PLAINTEXT_SIZE: usize = 256 * 1024 * 1024;

/// Maximum allowed User ID length (1KB)
pub const MAX_USER_ID_LENGTH: usize = 1024;

/// Maximum literal data file name length (one length octet)
pub const MAX_FILE_NAME_LENGTH: usize = 255;

/// Maximum length of a single armor line
pub const MAX_ARMOR_LINE_LENGTH: usize = 8 * 1024;

/// Smallest RSA modulus accepted for key generation
pub const MIN_RSA_BITS: usize = 2048;

/// Largest RSA modulus accepted for key generation
pub const MAX_RSA_BITS: usize = 8192;

/// Largest Argon2 memory exponent honoured when unlocking keys (2^21 KiB = 2GiB)
pub const MAX_ARGON2_MEMORY_EXPONENT: u8 = 21;

/// Validation functions for input data
pub struct Validator;

impl Validator {
    /// Validate the size of a packet body about to be buffered
    pub fn validate_packet_size(size: usize) -> Result<()> {
        if size > MAX_BUFFERED_PACKET_SIZE {
            return Err(PgpError::parse(format!(
                "Packet too large: {} bytes exceeds maximum of {} bytes",
                size, MAX_BUFFERED_PACKET_SIZE
            )));
        }
        Ok(())
    }

    /// Validate key ring container size
    pub fn validate_keyring_bytes(data: &[u8]) -> Result<()> {
        if data.len() > MAX_KEYRING_SIZE {
            return Err(PgpError::parse(format!(
                "Key ring too large: {} bytes exceeds maximum of {} bytes",
                data.len(),
                MAX_KEYRING_SIZE
            )));
        }
        Ok(())
    }

    /// Validate keyring entry count
    pub fn validate_keyring_size(count: usize) -> Result<()> {
        if count > MAX_KEYS_PER_KEYRING {
            return Err(PgpError::parse(format!(
                "Too many keys in keyring: {} exceeds maximum of {}",
                count, MAX_KEYS_PER_KEYRING
            )));
        }
        Ok(())
    }

    /// Validate the number of packets seen before the data packet
    pub fn validate_packet_count(count: usize) -> Result<()> {
        if count > MAX_PACKETS_PER_MESSAGE {
            return Err(PgpError::malformed(format!(
                "Too many packets: {} exceeds maximum of {}",
                count, MAX_PACKETS_PER_MESSAGE
            )));
        }
        Ok(())
    }

    /// Validate compressed packet nesting depth
    pub fn validate_nesting_depth(depth: usize) -> Result<()> {
        if depth > MAX_PACKET_NESTING_DEPTH {
            return Err(PgpError::malformed(format!(
                "Compressed packets nested {} deep, maximum is {}",
                depth, MAX_PACKET_NESTING_DEPTH
            )));
        }
        Ok(())
    }

    /// Validate the plaintext held back by a fail-closed decryption
    pub fn validate_held_plaintext(size: usize, limit: usize) -> Result<()> {
        if size > limit {
            return Err(PgpError::invalid_input(format!(
                "Plaintext exceeds {} bytes held for a fail-closed integrity check",
                limit
            )));
        }
        Ok(())
    }

    /// Validate User ID string
    pub fn validate_user_id(user_id: &str) -> Result<()> {
        // Check length
        if user_id.len() > MAX_USER_ID_LENGTH {
            return Err(PgpError::invalid_input(format!(
                "User ID too long: {} bytes exceeds maximum of {} bytes",
                user_id.len(),
                MAX_USER_ID_LENGTH
            )));
        }

        // Check for control characters (except tab)
        if user_id.chars().any(|c| c.is_control() && c != '\t') {
            return Err(PgpError::invalid_input(
                "User ID contains invalid control characters",
            ));
        }

        // Must not be empty
        if user_id.trim().is_empty() {
            return Err(PgpError::invalid_input("User ID cannot be empty"));
        }

        Ok(())
    }

    /// Validate a literal data file name
    pub fn validate_file_name(name: &str) -> Result<()> {
        if name.len() > MAX_FILE_NAME_LENGTH {
            return Err(PgpError::invalid_input(format!(
                "File name too long: {} bytes exceeds maximum of {} bytes",
                name.len(),
                MAX_FILE_NAME_LENGTH
            )));
        }
        Ok(())
    }

    /// Validate requested RSA modulus size
    pub fn validate_rsa_bits(bits: usize) -> Result<()> {
        if !(MIN_RSA_BITS..=MAX_RSA_BITS).contains(&bits) || bits % 8 != 0 {
            return Err(PgpError::invalid_input(format!(
                "RSA key size must be a multiple of 8 between {} and {} bits, got {}",
                MIN_RSA_BITS, MAX_RSA_BITS, bits
            )));
        }
        Ok(())
    }

    /// Validate an Argon2 memory exponent read from key material
    pub fn validate_argon2_memory(exponent: u8) -> Result<()> {
        if exponent > MAX_ARGON2_MEMORY_EXPONENT {
            return Err(PgpError::key(format!(
                "Argon2 memory exponent {} exceeds maximum of {}",
                exponent, MAX_ARGON2_MEMORY_EXPONENT
            )));
        }
        Ok(())
    }
}
