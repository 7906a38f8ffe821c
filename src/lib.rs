//! # pgp-envelope
//!
//! OpenPGP public-key envelope encryption and integrity-checked decryption.
//!
//! A recipient's public key encrypts a random session key, which encrypts an
//! optionally compressed literal data packet. The matching passphrase-protected
//! secret key reverses the process and checks the modification detection code.
//! Messages interoperate with RFC 4880 implementations such as GnuPG.
//!
//! ## Layers
//!
//! - [`armor`]: ASCII armor with CRC-24
//! - [`packet`]: packet framing, partial body lengths and the packet bodies in use
//! - [`crypto`]: algorithm identifiers, OpenPGP CFB, S2K, session keys, key material
//! - [`keyring`]: key ring parsing and private key resolution
//! - [`codec`]: the streaming encrypt/decrypt pipeline
//! - [`session`]: populated-key context, file operations and the event log
//!
//! ## Supported algorithms
//!
//! - **Public key**: RSA (PKCS#1 v1.5) and ML-KEM-1024 (private-use algorithm 100)
//! - **Symmetric**: AES-128/192/256 and CAST5 in OpenPGP CFB mode
//! - **Compression**: ZIP and ZLIB
//! - **Secret key protection**: iterated and salted S2K with CFB, Argon2 with AES-GCM
//!
//! ## Example
//!
//! ```rust,no_run
//! use pgp_envelope::codec::{decrypt_bytes, encrypt_bytes, DecryptOptions, EncryptOptions};
//! use pgp_envelope::crypto::{KeyPair, Passphrase, ProtectionMode};
//! use pgp_envelope::keyring::KeyRing;
//! use rand::rngs::OsRng;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut rng = OsRng;
//! let keypair = KeyPair::generate_rsa(&mut rng, 2048)?.with_user_id("Alice <alice@example.com>")?;
//! let passphrase = Passphrase::new("correct horse");
//! let ring = KeyRing::load_secret(&keypair.export_secret(&passphrase, ProtectionMode::Cfb, &mut rng)?)?;
//!
//! let options = EncryptOptions::default().with_armor(true);
//! let envelope = encrypt_bytes(b"Secret message", keypair.public_key(), &options)?;
//! let decrypted = decrypt_bytes(&envelope, &ring, &passphrase, &DecryptOptions::default())?;
//! assert_eq!(decrypted.plaintext, b"Secret message");
//! println!("{}", decrypted.verdict);
//! # Ok(())
//! # }
//! ```

pub mod armor;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod keyring;
pub mod packet;
pub mod session;
pub mod validation;

pub use codec::{Decrypted, DecryptOptions, EncryptOptions, IntegrityPolicy, IntegrityVerdict};
pub use config::EnvelopeConfig;
pub use error::{PgpError, Result};
pub use keyring::{load_public_key, KeyRing};
pub use session::Session;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
