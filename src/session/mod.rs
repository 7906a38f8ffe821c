//! Session orchestration: the public encrypt and decrypt operations.
//!
//! A [`Session`] owns the populated-key state used by the parameter-free
//! operations (one public key for encryption, one secret ring plus passphrase
//! for decryption) and the event log of the last decryption. Every operation
//! also has a form taking its keys explicitly, which leaves the state alone.
//!
//! The state sits behind a `RwLock` and the event log behind a `Mutex`, so a
//! session can be shared between threads. [`Session::global`] hands out a
//! process-wide instance for callers that want a single shared context.
//!
//! ```rust,no_run
//! use pgp_envelope::codec::EncryptOptions;
//! use pgp_envelope::session::Session;
//! # fn main() -> pgp_envelope::Result<()> {
//! # let public_ring: &[u8] = &[];
//! # let secret_ring: &[u8] = &[];
//! let session = Session::new();
//! session.populate_public_key(public_ring)?;
//! session.populate_private_key_and_passphrase(secret_ring, "Megazord55")?;
//!
//! let envelope = session.encrypt(b"Test this encryption!!!", &EncryptOptions::default())?;
//! let plaintext = session.decrypt_populated(&envelope)?;
//! assert_eq!(plaintext, b"Test this encryption!!!");
//! println!("{:?}", session.event_log());
//! # Ok(())
//! # }
//! ```

use crate::codec::{
    self, Decrypted, DecryptOptions, EncryptOptions, IntegrityVerdict, MessageInfo,
};
use crate::config::EnvelopeConfig;
use crate::crypto::{KeyId, Passphrase, PublicKey};
use crate::error::{PgpError, Result};
use crate::keyring::{self, KeyRing};
use crate::validation::Validator;
use rand::rngs::OsRng;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, instrument, warn};

/// Secret ring and the passphrase that unlocks it
struct SecretContext {
    ring: KeyRing,
    passphrase: Passphrase,
}

/// Keys set by the population calls
#[derive(Default)]
struct PopulatedKeys {
    public_key: Option<PublicKey>,
    secret: Option<SecretContext>,
}

/// Status lines of the most recently started decryption
#[derive(Default)]
struct EventLog {
    /// Ticket of the decryption allowed to record; bumped by every start
    current: u64,
    lines: Vec<String>,
}

/// Explicit context for encrypt and decrypt operations
pub struct Session {
    state: RwLock<PopulatedKeys>,
    events: Mutex<EventLog>,
    config: EnvelopeConfig,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("public_key_populated", &self.is_public_key_populated())
            .field("private_key_populated", &self.is_private_key_populated())
            .field("config", &self.config)
            .finish()
    }
}

static GLOBAL: OnceLock<Session> = OnceLock::new();

impl Session {
    /// Creates an empty session with default options
    pub fn new() -> Self {
        Self::with_config(EnvelopeConfig::default())
    }

    /// Creates an empty session.
    ///
    /// Decryptions follow `config.decrypt`; [`Session::encrypt_default`]
    /// uses `config.encrypt`.
    pub fn with_config(config: EnvelopeConfig) -> Self {
        Self {
            state: RwLock::new(PopulatedKeys::default()),
            events: Mutex::new(EventLog::default()),
            config,
        }
    }

    /// The process-wide session, created empty on first use
    pub fn global() -> &'static Session {
        GLOBAL.get_or_init(Session::new)
    }

    /// Configuration this session was created with
    pub fn config(&self) -> &EnvelopeConfig {
        &self.config
    }

    fn read_state(&self) -> RwLockReadGuard<'_, PopulatedKeys> {
        self.state.read().unwrap_or_else(|poisoned| {
            warn!("Session key state was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, PopulatedKeys> {
        self.state.write().unwrap_or_else(|poisoned| {
            warn!("Session key state was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn events(&self) -> MutexGuard<'_, EventLog> {
        self.events.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Clears the event log and hands out the ticket for a new decryption
    fn begin_decryption(&self) -> u64 {
        let mut log = self.events();
        log.current = log.current.wrapping_add(1);
        log.lines.clear();
        log.current
    }

    // Population

    /// Loads the first encryption-capable key from `data` as the active public key.
    ///
    /// On failure the active public key is cleared.
    #[instrument(skip_all)]
    pub fn populate_public_key(&self, data: &[u8]) -> Result<KeyId> {
        let mut state = self.write_state();
        match keyring::load_public_key(data) {
            Ok(key) => {
                let key_id = key.key_id();
                info!("Populated public key {}", key_id);
                state.public_key = Some(key);
                Ok(key_id)
            }
            Err(err) => {
                warn!("Public key population failed: {}", err);
                state.public_key = None;
                Err(err)
            }
        }
    }

    /// Loads a secret ring and keeps it with its passphrase, returning the number of secret keys.
    ///
    /// The passphrase is not checked here; a wrong one surfaces on the first
    /// decryption. On failure the active secret ring is cleared.
    #[instrument(skip_all)]
    pub fn populate_private_key_and_passphrase(&self, data: &[u8], passphrase: &str) -> Result<usize> {
        let mut state = self.write_state();
        match KeyRing::load_secret(data) {
            Ok(ring) => {
                let count = ring.secret_keys().count();
                info!("Populated secret key ring with {} secret keys", count);
                state.secret = Some(SecretContext {
                    ring,
                    passphrase: Passphrase::new(passphrase),
                });
                Ok(count)
            }
            Err(err) => {
                warn!("Secret key population failed: {}", err);
                state.secret = None;
                Err(err)
            }
        }
    }

    /// Returns true once a public key has been populated
    pub fn is_public_key_populated(&self) -> bool {
        self.read_state().public_key.is_some()
    }

    /// Returns true once a secret ring and passphrase have been populated
    pub fn is_private_key_populated(&self) -> bool {
        self.read_state().secret.is_some()
    }

    /// Forgets all populated keys and the event log
    pub fn clear(&self) {
        *self.write_state() = PopulatedKeys::default();
        self.begin_decryption();
        debug!("Session cleared");
    }

    /// Status lines recorded by the last decryption
    pub fn event_log(&self) -> Vec<String> {
        self.events().lines.clone()
    }

    // Encryption

    fn with_public_key<T>(&self, f: impl FnOnce(&PublicKey) -> Result<T>) -> Result<T> {
        let state = self.read_state();
        let key = state.public_key.as_ref().ok_or_else(|| {
            PgpError::not_populated("No public key has been populated for encryption")
        })?;
        f(key)
    }

    /// Encrypts `plaintext` to the populated public key
    pub fn encrypt(&self, plaintext: &[u8], options: &EncryptOptions) -> Result<Vec<u8>> {
        self.with_public_key(|key| codec::encrypt_bytes(plaintext, key, options))
    }

    /// Encrypts `plaintext` to the populated public key with the configured options
    pub fn encrypt_default(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.encrypt(plaintext, &self.config.encrypt)
    }

    /// Encrypts everything read from `input` to the populated public key
    pub fn encrypt_to_writer<R, W>(
        &self,
        input: &mut R,
        output: W,
        options: &EncryptOptions,
    ) -> Result<W>
    where
        R: Read + ?Sized,
        W: Write,
    {
        self.with_public_key(|key| codec::encrypt_stream(input, output, &[key], options, &mut OsRng))
    }

    /// Encrypts the file at `input` into a new file at `output`.
    ///
    /// The literal packet records the input's file name unless `options`
    /// fixes one. Without a populated public key this fails with
    /// [`PgpError::KeyNotPopulated`] before the input is opened; an empty
    /// input file is then rejected with [`PgpError::EmptyInput`].
    #[instrument(skip_all, fields(input = %input.as_ref().display()))]
    pub fn encrypt_file(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
        options: &EncryptOptions,
    ) -> Result<()> {
        let input = input.as_ref();
        self.with_public_key(|key| {
            let file = File::open(input)?;
            if file.metadata()?.len() == 0 {
                return Err(PgpError::EmptyInput);
            }

            let mut options = options.clone();
            if options.file_name.is_none() {
                if let Some(name) = input.file_name() {
                    let name = name.to_string_lossy().into_owned();
                    Validator::validate_file_name(&name)?;
                    options.file_name = Some(name);
                }
            }

            let output = output.as_ref();
            let sink = BufWriter::new(File::create(output)?);
            let result = codec::encrypt_stream(
                &mut BufReader::new(file),
                sink,
                &[key],
                &options,
                &mut OsRng,
            )
            .and_then(|mut sink| sink.flush().map_err(PgpError::from));
            if result.is_err() {
                discard_output(output);
            }
            result
        })
    }

    // Decryption

    /// Records the verdict of a finished decryption, or of one rejected by its integrity check.
    ///
    /// Nothing is recorded once a later decryption has started.
    fn record<T>(&self, ticket: u64, result: &Result<T>, verdict: impl Fn(&T) -> IntegrityVerdict) {
        let line = match result {
            Ok(value) => verdict(value).message(),
            Err(PgpError::IntegrityCheckFailed) => IntegrityVerdict::ProtectedFailed.message(),
            Err(_) => return,
        };
        let mut log = self.events();
        if log.current == ticket {
            log.lines.push(line.to_string());
        } else {
            debug!("Verdict superseded by a later decryption: {}", line);
        }
    }

    fn decrypt_with<T>(
        &self,
        ring: &KeyRing,
        passphrase: &Passphrase,
        run: impl FnOnce(&KeyRing, &Passphrase, &DecryptOptions) -> Result<T>,
        verdict: impl Fn(&T) -> IntegrityVerdict,
    ) -> Result<T> {
        let ticket = self.begin_decryption();
        let result = run(ring, passphrase, &self.config.decrypt);
        self.record(ticket, &result, verdict);
        result
    }

    fn with_secret<T>(
        &self,
        run: impl FnOnce(&KeyRing, &Passphrase, &DecryptOptions) -> Result<T>,
        verdict: impl Fn(&T) -> IntegrityVerdict,
    ) -> Result<T> {
        let state = self.read_state();
        let Some(secret) = state.secret.as_ref() else {
            self.begin_decryption();
            return Err(PgpError::not_populated(
                "No secret key ring and passphrase have been populated for decryption",
            ));
        };
        self.decrypt_with(&secret.ring, &secret.passphrase, run, verdict)
    }

    /// Decrypts `envelope` with a secret ring given as bytes
    pub fn decrypt(&self, envelope: &[u8], secret_ring: &[u8], passphrase: &str) -> Result<Vec<u8>> {
        self.decrypt_detailed(envelope, secret_ring, passphrase)
            .map(|decrypted| decrypted.plaintext)
    }

    /// Decrypts `envelope` and returns the plaintext with its metadata
    #[instrument(skip_all)]
    pub fn decrypt_detailed(
        &self,
        envelope: &[u8],
        secret_ring: &[u8],
        passphrase: &str,
    ) -> Result<Decrypted> {
        let ring = match KeyRing::load_secret(secret_ring) {
            Ok(ring) => ring,
            Err(err) => {
                self.begin_decryption();
                return Err(err);
            }
        };
        self.decrypt_with(
            &ring,
            &Passphrase::new(passphrase),
            |ring, passphrase, options| codec::decrypt_bytes(envelope, ring, passphrase, options),
            |decrypted| decrypted.verdict,
        )
    }

    /// Decrypts `envelope` with the populated secret ring
    pub fn decrypt_populated(&self, envelope: &[u8]) -> Result<Vec<u8>> {
        self.with_secret(
            |ring, passphrase, options| codec::decrypt_bytes(envelope, ring, passphrase, options),
            |decrypted| decrypted.verdict,
        )
        .map(|decrypted| decrypted.plaintext)
    }

    /// Decrypts a message from `input` with the populated secret ring, writing the plaintext to `output`
    pub fn decrypt_to_writer<R: Read, W: Write>(&self, input: R, output: &mut W) -> Result<MessageInfo> {
        self.with_secret(
            |ring, passphrase, options| codec::decrypt_stream(input, output, ring, passphrase, options),
            |info| info.verdict,
        )
    }

    /// Decrypts the file at `input` into a new file at `output` with a secret ring given as bytes
    pub fn decrypt_file(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
        secret_ring: &[u8],
        passphrase: &str,
    ) -> Result<MessageInfo> {
        let ring = match KeyRing::load_secret(secret_ring) {
            Ok(ring) => ring,
            Err(err) => {
                self.begin_decryption();
                return Err(err);
            }
        };
        self.decrypt_with(
            &ring,
            &Passphrase::new(passphrase),
            |ring, passphrase, options| {
                decrypt_file_with(input.as_ref(), output.as_ref(), ring, passphrase, options)
            },
            |info| info.verdict,
        )
    }

    /// Decrypts the file at `input` into a new file at `output` with the populated secret ring
    pub fn decrypt_file_populated(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
    ) -> Result<MessageInfo> {
        self.with_secret(
            |ring, passphrase, options| {
                decrypt_file_with(input.as_ref(), output.as_ref(), ring, passphrase, options)
            },
            |info| info.verdict,
        )
    }
}

fn decrypt_file_with(
    input: &Path,
    output: &Path,
    ring: &KeyRing,
    passphrase: &Passphrase,
    options: &DecryptOptions,
) -> Result<MessageInfo> {
    let source = BufReader::new(File::open(input)?);
    let mut sink = BufWriter::new(File::create(output)?);
    let result = codec::decrypt_stream(source, &mut sink, ring, passphrase, options)
        .and_then(|info| sink.flush().map(|_| info).map_err(PgpError::from));
    if result.is_err() {
        drop(sink);
        discard_output(output);
    }
    result
}

/// Removes a partially written output file
fn discard_output(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        debug!("Could not remove partial output {}: {}", path.display(), err);
    }
}
