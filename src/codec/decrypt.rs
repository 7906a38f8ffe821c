//! Decryption side of the pipeline.
//!
//! The outer packet sequence is read until the encrypted data packet, the
//! session key is recovered from the first PKESK that a ring key opens, and
//! the data packet is then decrypted as a stream. With integrity protection
//! the last 22 decrypted octets are held back as the modification detection
//! code and checked once the stream is drained.

use crate::armor::{self, ArmorReader};
use crate::codec::compression::Decompressor;
use crate::codec::{Decrypted, DecryptOptions, IntegrityPolicy, IntegrityVerdict, MessageInfo};
use crate::crypto::cfb::resync_iv;
use crate::crypto::{CfbDecryptor, KeyId, Passphrase, SessionKey};
use crate::error::{PgpError, Result};
use crate::keyring::KeyRing;
use crate::packet::{
    LiteralData, PacketBody, PacketHeader, PublicKeyEncryptedSessionKey, Tag, MDC_HEADER,
    MDC_PACKET_SIZE, SEIPD_VERSION,
};
use crate::validation::Validator;
use sha1::{Digest, Sha1};
use std::io::{self, BufRead, BufReader, Read, Write};
use subtle::ConstantTimeEq;
use tracing::{debug, info, instrument, warn};

/// Size of the ciphertext chunks pulled from the data packet
const READ_CHUNK: usize = 8192;

/// The packets that may appear inside decrypted data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InnerPacket {
    Literal,
    Compressed,
    Signed,
    Unsupported(Tag),
}

impl InnerPacket {
    fn from_tag(tag: Tag) -> Self {
        match tag {
            Tag::LiteralData => Self::Literal,
            Tag::CompressedData => Self::Compressed,
            Tag::OnePassSignature | Tag::Signature => Self::Signed,
            other => Self::Unsupported(other),
        }
    }
}

/// Which data packet carries the message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataPacket {
    /// Tag 18, with modification detection code
    Protected,
    /// Tag 9, legacy CFB with resynchronisation
    Legacy,
}

/// Streaming decryption of a data packet body
struct EncryptedDataReader<R: Read> {
    inner: R,
    cfb: CfbDecryptor,
    mdc: Option<Sha1>,
    /// Decrypted octets not yet handed out
    pending: Vec<u8>,
    position: usize,
    eof: bool,
    /// Decrypted modification detection code packet, once the body ends
    trailer: Option<Vec<u8>>,
}

impl<R: Read> EncryptedDataReader<R> {
    fn new(mut inner: R, kind: DataPacket, session_key: &SessionKey) -> Result<Self> {
        let algorithm = session_key.algorithm();
        let block_size = algorithm.block_size();

        if kind == DataPacket::Protected {
            let mut version = [0u8; 1];
            read_exact(&mut inner, &mut version, "encrypted data packet")?;
            if version[0] != SEIPD_VERSION {
                return Err(PgpError::unsupported(format!(
                    "Unsupported encrypted data packet version {}",
                    version[0]
                )));
            }
        }

        let mut prefix_ciphertext = vec![0u8; block_size + 2];
        read_exact(&mut inner, &mut prefix_ciphertext, "encrypted data prefix")?;
        let mut prefix = prefix_ciphertext.clone();
        let mut cfb = CfbDecryptor::zero_iv(algorithm, session_key.key())?;
        cfb.decrypt(&mut prefix);

        let quick_check = prefix[block_size - 2..block_size] == prefix[block_size..];

        let mdc = match kind {
            DataPacket::Protected => {
                if !quick_check {
                    warn!("Encrypted data prefix check failed");
                }
                let mut hasher = Sha1::new();
                hasher.update(&prefix);
                Some(hasher)
            }
            DataPacket::Legacy => {
                if !quick_check {
                    return Err(PgpError::crypto(
                        "Session key does not decrypt the data packet",
                    ));
                }
                cfb = CfbDecryptor::new(
                    algorithm,
                    session_key.key(),
                    resync_iv(&prefix_ciphertext),
                )?;
                None
            }
        };

        Ok(Self {
            inner,
            cfb,
            mdc,
            pending: Vec::new(),
            position: 0,
            eof: false,
            trailer: None,
        })
    }

    fn reserve(&self) -> usize {
        if self.mdc.is_some() {
            MDC_PACKET_SIZE
        } else {
            0
        }
    }

    /// Decrypts more input until octets beyond the held-back trailer are available
    fn fill(&mut self) -> io::Result<()> {
        let reserve = self.reserve();
        while !self.eof && self.pending.len() - self.position <= reserve {
            self.pending.drain(..self.position);
            self.position = 0;

            let mut chunk = [0u8; READ_CHUNK];
            let read = self.inner.read(&mut chunk)?;
            if read == 0 {
                self.eof = true;
                break;
            }
            self.cfb.decrypt(&mut chunk[..read]);
            self.pending.extend_from_slice(&chunk[..read]);
        }

        if self.eof && self.trailer.is_none() && reserve > 0 {
            let available = self.pending.len() - self.position;
            if available < reserve {
                return Err(PgpError::parse(
                    "Encrypted data ends before its modification detection code",
                )
                .into_io());
            }
            let split = self.pending.len() - reserve;
            self.trailer = Some(self.pending.split_off(split));
        }
        Ok(())
    }

    /// Drains the stream and computes the integrity verdict
    fn finish(mut self) -> Result<IntegrityVerdict> {
        io::copy(&mut self, &mut io::sink())?;

        let (Some(hasher), Some(trailer)) = (self.mdc.take(), self.trailer.take()) else {
            return Ok(IntegrityVerdict::Unprotected);
        };

        let mut hasher = hasher;
        hasher.update(MDC_HEADER);
        let digest = hasher.finalize();

        let header_ok = trailer[..2] == MDC_HEADER;
        let digest_ok: bool = digest.as_slice().ct_eq(&trailer[2..]).into();
        if header_ok && digest_ok {
            Ok(IntegrityVerdict::ProtectedValid)
        } else {
            Ok(IntegrityVerdict::ProtectedFailed)
        }
    }
}

impl<R: Read> Read for EncryptedDataReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.fill()?;

        let releasable = if self.eof {
            self.pending.len()
        } else {
            self.pending.len() - self.reserve()
        };
        let n = releasable.saturating_sub(self.position).min(buf.len());
        let out = &self.pending[self.position..self.position + n];
        if let Some(hasher) = self.mdc.as_mut() {
            hasher.update(out);
        }
        buf[..n].copy_from_slice(out);
        self.position += n;
        Ok(n)
    }
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    reader.read_exact(buf).map_err(|err| match err.kind() {
        io::ErrorKind::UnexpectedEof => PgpError::parse(format!("Truncated {what}")),
        _ => PgpError::from(err),
    })
}

/// Requires the input to end with the data packet.
///
/// For armored input this read also reaches the checksum line and footer.
fn expect_end(source: &mut dyn Read) -> Result<()> {
    match PacketHeader::read(source)? {
        None => Ok(()),
        Some(header) => Err(PgpError::malformed(format!(
            "Unexpected {:?} packet after the encrypted data",
            header.tag
        ))),
    }
}

/// Plaintext held back until the integrity check passes
struct HeldPlaintext {
    buffer: Vec<u8>,
    limit: usize,
}

impl HeldPlaintext {
    fn new(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            limit,
        }
    }
}

impl Write for HeldPlaintext {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Validator::validate_held_plaintext(self.buffer.len() + buf.len(), self.limit)
            .map_err(PgpError::into_io)?;
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Wraps the input in an armor decoder when it is armored
fn open_input<'a, R: Read + 'a>(input: R) -> Result<Box<dyn Read + 'a>> {
    let mut buffered = BufReader::new(input);
    let peek = buffered.fill_buf()?;

    if peek.is_empty() {
        return Err(PgpError::parse("Input is empty, not an OpenPGP message"));
    }
    if peek[0] & 0x80 != 0 {
        return Ok(Box::new(buffered));
    }
    if armor::is_armored(peek) {
        let reader = ArmorReader::new(buffered)?;
        debug!("Decoding armored {}", reader.kind());
        return Ok(Box::new(reader));
    }
    Err(PgpError::parse("Input is neither a binary nor an armored OpenPGP message"))
}

/// Reads session key packets up to the encrypted data packet
fn read_envelope_head(
    source: &mut dyn Read,
) -> Result<(Vec<PublicKeyEncryptedSessionKey>, PacketHeader, DataPacket)> {
    let mut session_keys = Vec::new();
    let mut packets = 0usize;

    loop {
        let header = PacketHeader::read(source)?
            .ok_or_else(|| PgpError::malformed("Message has no encrypted data packet"))?;
        packets += 1;
        Validator::validate_packet_count(packets)?;

        match header.tag {
            Tag::Marker => {
                PacketBody::new(&mut *source, &header).skip()?;
            }
            Tag::PublicKeyEncryptedSessionKey => {
                let body = PacketBody::new(&mut *source, &header).read_to_vec()?;
                match PublicKeyEncryptedSessionKey::from_bytes(&body) {
                    Ok(pkesk) => session_keys.push(pkesk),
                    Err(PgpError::UnsupportedContent(reason)) => {
                        debug!("Skipping session key packet: {}", reason)
                    }
                    Err(err) => return Err(err),
                }
            }
            Tag::SymmetricKeyEncryptedSessionKey => {
                debug!("Skipping passphrase-encrypted session key packet");
                PacketBody::new(&mut *source, &header).skip()?;
            }
            Tag::SymEncryptedIntegrityProtectedData | Tag::SymmetricallyEncryptedData => {
                if session_keys.is_empty() {
                    return Err(PgpError::malformed(
                        "No public-key encrypted session key precedes the encrypted data",
                    ));
                }
                let kind = if header.tag == Tag::SymEncryptedIntegrityProtectedData {
                    DataPacket::Protected
                } else {
                    DataPacket::Legacy
                };
                return Ok((session_keys, header, kind));
            }
            tag if tag.is_inner_content() => {
                return Err(PgpError::malformed(format!(
                    "{tag:?} packet found outside encrypted data"
                )));
            }
            other => {
                return Err(PgpError::parse(format!(
                    "Unexpected {other:?} packet in encrypted message"
                )));
            }
        }
    }
}

/// Finds the first session key packet a ring key can open
fn recover_session_key(
    session_keys: &[PublicKeyEncryptedSessionKey],
    ring: &KeyRing,
    passphrase: &Passphrase,
) -> Result<(SessionKey, KeyId)> {
    let mut failure: Option<PgpError> = None;

    for pkesk in session_keys {
        if pkesk.key_id.is_wildcard() {
            // Anonymous recipient: try every secret key of the right algorithm
            let candidates = ring
                .secret_keys()
                .filter(|secret| secret.public_key().algorithm() == pkesk.algorithm);
            for secret in candidates {
                match secret
                    .unlock(passphrase)
                    .and_then(|private_key| pkesk.encrypted_key.decrypt(&private_key))
                {
                    Ok(session_key) => return Ok((session_key, secret.key_id())),
                    Err(err) => remember(&mut failure, err),
                }
            }
            continue;
        }

        match ring.resolve_with(pkesk.key_id, passphrase) {
            Ok(Some(private_key)) => match pkesk.encrypted_key.decrypt(&private_key) {
                Ok(session_key) => {
                    debug!("Session key opened by {}", private_key.key_id());
                    return Ok((session_key, private_key.key_id()));
                }
                Err(err) => {
                    warn!("Key {} failed to open its session key: {}", pkesk.key_id, err);
                    remember(&mut failure, err);
                }
            },
            Ok(None) => debug!("No secret key for recipient {}", pkesk.key_id),
            Err(err) => remember(&mut failure, err),
        }
    }

    Err(failure.unwrap_or_else(|| {
        PgpError::key_not_found(format!(
            "None of the {} recipient keys is in the secret key ring",
            session_keys.len()
        ))
    }))
}

/// Keeps the most telling unlock failure: a wrong passphrase wins over anything else
fn remember(failure: &mut Option<PgpError>, err: PgpError) {
    if !matches!(failure, Some(PgpError::WrongPassphrase { .. })) {
        *failure = Some(err);
    }
}

/// Reads decrypted content down to the literal packet, copying its payload to `output`
fn read_content(source: &mut dyn Read, output: &mut dyn Write, depth: usize) -> Result<LiteralData> {
    Validator::validate_nesting_depth(depth)?;

    let header = PacketHeader::read(source)?
        .ok_or_else(|| PgpError::malformed("Encrypted data contains no packets"))?;

    match InnerPacket::from_tag(header.tag) {
        InnerPacket::Literal => {
            let mut body = PacketBody::new(source, &header);
            let literal = LiteralData::read_header(&mut body)?;
            io::copy(&mut body, output)?;
            Ok(literal)
        }
        InnerPacket::Compressed => {
            let body = PacketBody::new(source, &header);
            let mut decompressor = Decompressor::new(body)?;
            let literal = read_content(&mut decompressor, output, depth + 1)?;
            io::copy(&mut decompressor, &mut io::sink())?;
            Ok(literal)
        }
        InnerPacket::Signed => Err(PgpError::unsupported(
            "Message is signed, not simply encrypted",
        )),
        InnerPacket::Unsupported(tag) => Err(PgpError::unsupported(format!(
            "Unexpected {tag:?} packet inside encrypted data"
        ))),
    }
}

/// Decrypts a message from `input`, writing the plaintext to `output`.
///
/// Under [`IntegrityPolicy::FailClosed`] the plaintext is held until the
/// integrity check passes, so nothing reaches `output` for a tampered message.
/// The held plaintext is capped by [`DecryptOptions::max_held_plaintext`].
///
/// Nothing may follow the data packet. Armored input must carry a matching
/// checksum, when present, and its footer.
#[instrument(skip_all, fields(policy = ?options.integrity_policy))]
pub fn decrypt_stream<R: Read, W: Write>(
    input: R,
    output: &mut W,
    ring: &KeyRing,
    passphrase: &Passphrase,
    options: &DecryptOptions,
) -> Result<MessageInfo> {
    let mut source = open_input(input)?;
    let (session_keys, header, kind) = read_envelope_head(&mut *source)?;
    let (session_key, key_id) = recover_session_key(&session_keys, ring, passphrase)?;

    let body = PacketBody::new(&mut *source, &header);
    let mut data = EncryptedDataReader::new(body, kind, &session_key)?;

    let fail_closed = options.integrity_policy == IntegrityPolicy::FailClosed;
    let mut held = HeldPlaintext::new(options.max_held_plaintext);
    let content = if fail_closed {
        read_content(&mut data, &mut held, 0)
    } else {
        read_content(&mut data, output, 0)
    };

    let literal = match content {
        Ok(literal) => literal,
        Err(err) => {
            // Corrupted content under a protected packet is reported as a failed check
            if kind == DataPacket::Protected
                && matches!(data.finish(), Ok(IntegrityVerdict::ProtectedFailed))
            {
                warn!("Message content unreadable and integrity check failed: {}", err);
                return Err(PgpError::IntegrityCheckFailed);
            }
            return Err(err);
        }
    };

    let verdict = data.finish()?;
    if verdict.is_acceptable() {
        info!("{}", verdict);
    } else {
        warn!("{}", verdict);
    }
    expect_end(&mut *source)?;

    if fail_closed {
        if !verdict.is_acceptable() {
            return Err(PgpError::IntegrityCheckFailed);
        }
        output.write_all(&held.buffer)?;
    }

    Ok(MessageInfo {
        verdict,
        file_name: literal.file_name,
        modified: literal.date,
        key_id,
    })
}

/// Decrypts an in-memory message
pub fn decrypt_bytes(
    envelope: &[u8],
    ring: &KeyRing,
    passphrase: &Passphrase,
    options: &DecryptOptions,
) -> Result<Decrypted> {
    let mut plaintext = Vec::new();
    let info = decrypt_stream(envelope, &mut plaintext, ring, passphrase, options)?;
    Ok(Decrypted::new(plaintext, info))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encrypt_bytes, EncryptOptions};
    use crate::crypto::{CompressionAlgorithm, KeyPair, ProtectionMode, SymmetricAlgorithm};
    use crate::packet::write_packet;
    use rand::rngs::OsRng;

    const PASSPHRASE: &str = "decrypt-tests";

    fn setup() -> (KeyPair, KeyRing) {
        let mut rng = OsRng;
        let keypair = KeyPair::generate_mlkem1024(&mut rng).unwrap();
        let secret = keypair
            .export_secret(&Passphrase::new(PASSPHRASE), ProtectionMode::Cfb, &mut rng)
            .unwrap();
        let ring = KeyRing::load_secret(&secret).unwrap();
        (keypair, ring)
    }

    fn decrypt(envelope: &[u8], ring: &KeyRing) -> Result<Decrypted> {
        decrypt_bytes(
            envelope,
            ring,
            &Passphrase::new(PASSPHRASE),
            &DecryptOptions::default(),
        )
    }

    #[test]
    fn test_round_trip_variants() {
        let (keypair, ring) = setup();
        let plaintext = b"round trip through every layer".repeat(20);

        for integrity_check in [true, false] {
            for compression in [
                CompressionAlgorithm::Uncompressed,
                CompressionAlgorithm::Zip,
                CompressionAlgorithm::Zlib,
            ] {
                let options = EncryptOptions::default()
                    .with_integrity_check(integrity_check)
                    .with_compression(compression)
                    .with_armor(compression == CompressionAlgorithm::Zip);
                let envelope = encrypt_bytes(&plaintext, keypair.public_key(), &options).unwrap();

                let decrypted = decrypt(&envelope, &ring).unwrap();
                assert_eq!(decrypted.plaintext, plaintext);
                assert_eq!(decrypted.key_id, keypair.key_id());
                let expected = if integrity_check {
                    IntegrityVerdict::ProtectedValid
                } else {
                    IntegrityVerdict::Unprotected
                };
                assert_eq!(decrypted.verdict, expected);
            }
        }
    }

    #[test]
    fn test_literal_metadata() {
        let (keypair, ring) = setup();
        let options = EncryptOptions::default()
            .with_file_name("report.pdf")
            .with_modification_time(1_600_000_000)
            .with_symmetric(SymmetricAlgorithm::Cast5);
        let envelope = encrypt_bytes(b"pdf bytes", keypair.public_key(), &options).unwrap();

        let decrypted = decrypt(&envelope, &ring).unwrap();
        assert_eq!(decrypted.file_name, "report.pdf");
        assert_eq!(decrypted.modified, 1_600_000_000);
    }

    #[test]
    fn test_leading_marker_is_skipped() {
        let (keypair, ring) = setup();
        let envelope =
            encrypt_bytes(b"marked", keypair.public_key(), &EncryptOptions::default()).unwrap();

        let mut with_marker = Vec::new();
        write_packet(&mut with_marker, Tag::Marker, b"PGP").unwrap();
        with_marker.extend_from_slice(&envelope);

        assert_eq!(decrypt(&with_marker, &ring).unwrap().plaintext, b"marked");
    }

    #[test]
    fn test_missing_session_key_packet() {
        let (keypair, ring) = setup();
        let envelope =
            encrypt_bytes(b"orphan", keypair.public_key(), &EncryptOptions::default()).unwrap();

        let mut cursor = envelope.as_slice();
        let header = PacketHeader::read(&mut cursor).unwrap().unwrap();
        PacketBody::new(&mut cursor, &header).skip().unwrap();
        let pkesk_len = envelope.len() - cursor.len();

        assert!(matches!(
            decrypt(&envelope[pkesk_len..], &ring),
            Err(PgpError::MalformedEnvelope(_))
        ));

        // Session key packet but no data packet
        assert!(matches!(
            decrypt(&envelope[..pkesk_len], &ring),
            Err(PgpError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_literal_outside_encryption_is_malformed() {
        let (_, ring) = setup();
        let mut message = Vec::new();
        write_packet(&mut message, Tag::LiteralData, b"b\x00\x00\x00\x00\x00plain").unwrap();
        assert!(matches!(
            decrypt(&message, &ring),
            Err(PgpError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_not_pgp_is_parse_error() {
        let (_, ring) = setup();
        assert!(matches!(
            decrypt(b"hello, world", &ring),
            Err(PgpError::Parse(_))
        ));
        assert!(matches!(decrypt(b"", &ring), Err(PgpError::Parse(_))));
    }

    #[test]
    fn test_unknown_recipient_is_key_not_found() {
        let (_, ring) = setup();
        let stranger = KeyPair::generate_mlkem1024(&mut OsRng).unwrap();
        let envelope =
            encrypt_bytes(b"not for you", stranger.public_key(), &EncryptOptions::default())
                .unwrap();
        assert!(matches!(
            decrypt(&envelope, &ring),
            Err(PgpError::KeyNotFound(_))
        ));
    }

    #[test]
    fn test_wrong_passphrase() {
        let (keypair, ring) = setup();
        let envelope =
            encrypt_bytes(b"locked", keypair.public_key(), &EncryptOptions::default()).unwrap();
        let result = decrypt_bytes(
            &envelope,
            &ring,
            &Passphrase::new("not it"),
            &DecryptOptions::default(),
        );
        match result {
            Err(PgpError::WrongPassphrase { key_id }) => assert_eq!(key_id, keypair.key_id()),
            other => panic!("expected wrong passphrase, got {other:?}"),
        }
    }

    #[test]
    fn test_tampered_mdc_is_advisory_or_fatal() {
        let (keypair, ring) = setup();
        let plaintext = vec![0x41u8; 4096];
        let mut envelope =
            encrypt_bytes(&plaintext, keypair.public_key(), &EncryptOptions::default()).unwrap();
        // The last octet belongs to the encrypted MDC digest
        let last = envelope.len() - 1;
        envelope[last] ^= 0x01;

        let advisory = decrypt(&envelope, &ring).unwrap();
        assert_eq!(advisory.verdict, IntegrityVerdict::ProtectedFailed);
        assert_eq!(advisory.plaintext, plaintext);

        let mut sink = Vec::new();
        let strict = decrypt_stream(
            envelope.as_slice(),
            &mut sink,
            &ring,
            &Passphrase::new(PASSPHRASE),
            &DecryptOptions::fail_closed(),
        );
        assert!(matches!(strict, Err(PgpError::IntegrityCheckFailed)));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_armor_checksum_and_footer_enforced() {
        let (keypair, ring) = setup();
        let options = EncryptOptions::default().with_armor(true);
        let envelope = encrypt_bytes(b"crc checked", keypair.public_key(), &options).unwrap();
        let text = String::from_utf8(envelope).unwrap();
        assert_eq!(decrypt(text.as_bytes(), &ring).unwrap().plaintext, b"crc checked");

        let crc_line = text.lines().find(|line| line.starts_with('=')).unwrap();
        let replacement = if crc_line == "=AAAA" { "=AAAB" } else { "=AAAA" };
        let bad_crc = text.replace(crc_line, replacement);
        assert!(matches!(
            decrypt(bad_crc.as_bytes(), &ring),
            Err(PgpError::Parse(_))
        ));

        let footer = text.find("-----END").unwrap();
        let no_footer = &text[..footer + 6];
        assert!(matches!(
            decrypt(no_footer.as_bytes(), &ring),
            Err(PgpError::Parse(_))
        ));
    }

    #[test]
    fn test_bytes_after_data_packet_rejected() {
        let (keypair, ring) = setup();
        let envelope =
            encrypt_bytes(b"nothing after me", keypair.public_key(), &EncryptOptions::default())
                .unwrap();

        let mut with_garbage = envelope.clone();
        with_garbage.extend_from_slice(&[0xFF, 0xFF, 0xFF]);
        assert!(decrypt(&with_garbage, &ring).is_err());

        let mut with_marker = envelope;
        write_packet(&mut with_marker, Tag::Marker, b"PGP").unwrap();
        assert!(matches!(
            decrypt(&with_marker, &ring),
            Err(PgpError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_fail_closed_held_plaintext_is_capped() {
        let (keypair, ring) = setup();
        let plaintext = vec![0x42u8; 4096];
        let envelope =
            encrypt_bytes(&plaintext, keypair.public_key(), &EncryptOptions::default()).unwrap();

        let mut sink = Vec::new();
        let capped = decrypt_stream(
            envelope.as_slice(),
            &mut sink,
            &ring,
            &Passphrase::new(PASSPHRASE),
            &DecryptOptions::fail_closed().with_max_held_plaintext(1000),
        );
        assert!(matches!(capped, Err(PgpError::InvalidInput(_))));
        assert!(sink.is_empty());

        let roomy = decrypt_stream(
            envelope.as_slice(),
            &mut sink,
            &ring,
            &Passphrase::new(PASSPHRASE),
            &DecryptOptions::fail_closed().with_max_held_plaintext(plaintext.len()),
        )
        .unwrap();
        assert_eq!(roomy.verdict, IntegrityVerdict::ProtectedValid);
        assert_eq!(sink, plaintext);
    }

    #[test]
    fn test_truncated_message() {
        let (keypair, ring) = setup();
        let envelope =
            encrypt_bytes(&[7u8; 2000], keypair.public_key(), &EncryptOptions::default()).unwrap();
        for cut in [1, 10, envelope.len() / 2, envelope.len() - 5] {
            assert!(decrypt(&envelope[..cut], &ring).is_err());
        }
    }
}
