//! Error types for envelope operations.
//!
//! The variants separate the failure classes callers need to act on:
//! a container that is not OpenPGP at all, an envelope that parses but is not a
//! simple encrypted message, a key that is absent versus a key that is present
//! but locked with a different passphrase, and precondition failures on the
//! populated-key state of a [`Session`](crate::session::Session).

use crate::crypto::KeyId;
use std::io;
use thiserror::Error;

/// Result type alias for envelope operations.
pub type Result<T> = std::result::Result<T, PgpError>;

/// Main error type for envelope operations.
#[derive(Error, Debug)]
pub enum PgpError {
    /// Malformed container, armor or packet framing
    #[error("Parse error: {0}")]
    Parse(String),

    /// Well-formed packets that do not make up an encrypted message
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// No usable key for the requested operation
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// A parameter-free operation was called before its key was populated
    #[error("Key not populated: {0}")]
    KeyNotPopulated(String),

    /// The secret key exists but the passphrase does not unlock it
    #[error("Wrong passphrase for secret key {key_id}")]
    WrongPassphrase {
        /// Identifier of the key that refused to unlock
        key_id: KeyId,
    },

    /// The envelope decrypts but does not carry plain literal data
    #[error("Unsupported content: {0}")]
    UnsupportedContent(String),

    /// Zero-length plaintext handed to an encrypt operation
    #[error("Input is empty")]
    EmptyInput,

    /// Modification detection code mismatch under a fail-closed policy
    #[error("Message failed integrity check")]
    IntegrityCheckFailed,

    /// Key material that is invalid or unusable for the operation
    #[error("Key error: {0}")]
    Key(String),

    /// Failures reported by the underlying cryptographic primitives
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Invalid arguments
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(io::Error),
}

impl PgpError {
    /// Creates a new parse error.
    pub fn parse<T: ToString>(msg: T) -> Self {
        Self::Parse(msg.to_string())
    }

    /// Creates a new malformed envelope error.
    pub fn malformed<T: ToString>(msg: T) -> Self {
        Self::MalformedEnvelope(msg.to_string())
    }

    /// Creates a new key-not-found error.
    pub fn key_not_found<T: ToString>(msg: T) -> Self {
        Self::KeyNotFound(msg.to_string())
    }

    /// Creates a new key-not-populated error.
    pub fn not_populated<T: ToString>(msg: T) -> Self {
        Self::KeyNotPopulated(msg.to_string())
    }

    /// Creates a new unsupported content error.
    pub fn unsupported<T: ToString>(msg: T) -> Self {
        Self::UnsupportedContent(msg.to_string())
    }

    /// Creates a new key error.
    pub fn key<T: ToString>(msg: T) -> Self {
        Self::Key(msg.to_string())
    }

    /// Creates a new cryptographic error.
    pub fn crypto<T: ToString>(msg: T) -> Self {
        Self::Crypto(msg.to_string())
    }

    /// Creates a new invalid input error.
    pub fn invalid_input<T: ToString>(msg: T) -> Self {
        Self::InvalidInput(msg.to_string())
    }

    /// Creates a new configuration error.
    pub fn config<T: ToString>(msg: T) -> Self {
        Self::Config(msg.to_string())
    }

    /// Wraps this error in an [`io::Error`] so it can travel through
    /// `Read`/`Write` adapters and be recovered by `From<io::Error>`.
    pub(crate) fn into_io(self) -> io::Error {
        let kind = match &self {
            Self::Io(err) => err.kind(),
            _ => io::ErrorKind::InvalidData,
        };
        io::Error::new(kind, self)
    }
}

impl From<io::Error> for PgpError {
    fn from(err: io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<PgpError>()) {
            return Self::Io(err);
        }
        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<PgpError>()) {
            Some(Ok(inner)) => *inner,
            Some(Err(other)) => Self::Io(io::Error::new(kind, other)),
            None => Self::Io(io::Error::from(kind)),
        }
    }
}
