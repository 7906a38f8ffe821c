//! Encryption side of the pipeline.

use crate::armor::{ArmorType, ArmorWriter};
use crate::codec::compression::Compressor;
use crate::codec::EncryptOptions;
use crate::crypto::cfb::resync_iv;
use crate::crypto::{
    now_timestamp, secure_random_bytes, CfbEncryptor, CompressionAlgorithm, PublicKey, SessionKey,
};
use crate::error::{PgpError, Result};
use crate::packet::literal::CONSOLE_FILE_NAME;
use crate::packet::{
    self, LiteralData, PartialBodyWriter, PublicKeyEncryptedSessionKey, Tag, MDC_HEADER,
    SEIPD_VERSION,
};
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use sha1::{Digest, Sha1};
use std::io::{self, Read, Write};
use tracing::{debug, instrument};

/// Largest slice encrypted per write call
const WRITE_CHUNK: usize = 8192;

/// Outermost layer: raw packets or ASCII armor
enum Sink<W: Write> {
    Binary(W),
    Armored(ArmorWriter<W>),
}

impl<W: Write> Sink<W> {
    fn finish(self) -> io::Result<W> {
        match self {
            Self::Binary(mut inner) => {
                inner.flush()?;
                Ok(inner)
            }
            Self::Armored(writer) => writer.finish(),
        }
    }
}

impl<W: Write> Write for Sink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Binary(inner) => inner.write(buf),
            Self::Armored(writer) => writer.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Binary(inner) => inner.flush(),
            Self::Armored(writer) => writer.flush(),
        }
    }
}

/// Body of a SEIPD or SED packet.
///
/// The random prefix is written on construction. With integrity protection
/// the prefix and every plaintext byte are hashed, and [`finish`](Self::finish)
/// appends the encrypted modification detection code.
struct EncryptedDataWriter<W: Write> {
    inner: W,
    cfb: CfbEncryptor,
    mdc: Option<Sha1>,
    scratch: Vec<u8>,
}

impl<W: Write> EncryptedDataWriter<W> {
    fn new<R: CryptoRng + RngCore>(
        mut inner: W,
        session_key: &SessionKey,
        integrity_check: bool,
        rng: &mut R,
    ) -> Result<Self> {
        let algorithm = session_key.algorithm();
        let block_size = algorithm.block_size();

        // Random block followed by a repeat of its last two octets
        let mut prefix = secure_random_bytes(rng, block_size);
        prefix.extend_from_within(block_size - 2..block_size);

        let mut cfb = CfbEncryptor::zero_iv(algorithm, session_key.key())?;
        let mdc = if integrity_check {
            inner.write_all(&[SEIPD_VERSION])?;
            let mut hasher = Sha1::new();
            hasher.update(&prefix);
            Some(hasher)
        } else {
            None
        };

        cfb.encrypt(&mut prefix);
        inner.write_all(&prefix)?;

        if mdc.is_none() {
            // Legacy packets restart CFB on the last block of the prefix ciphertext
            cfb = CfbEncryptor::new(algorithm, session_key.key(), resync_iv(&prefix))?;
        }

        Ok(Self {
            inner,
            cfb,
            mdc,
            scratch: Vec::with_capacity(WRITE_CHUNK),
        })
    }

    fn finish(mut self) -> io::Result<W> {
        if let Some(mut hasher) = self.mdc.take() {
            let mut trailer = MDC_HEADER.to_vec();
            hasher.update(&trailer);
            trailer.extend_from_slice(&hasher.finalize());
            self.cfb.encrypt(&mut trailer);
            self.inner.write_all(&trailer)?;
        }
        Ok(self.inner)
    }
}

impl<W: Write> Write for EncryptedDataWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let taken = buf.len().min(WRITE_CHUNK);
        let chunk = &buf[..taken];
        if let Some(hasher) = self.mdc.as_mut() {
            hasher.update(chunk);
        }
        self.scratch.clear();
        self.scratch.extend_from_slice(chunk);
        self.cfb.encrypt(&mut self.scratch);
        self.inner.write_all(&self.scratch)?;
        Ok(taken)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

type DataWriter<W> = EncryptedDataWriter<PartialBodyWriter<Sink<W>>>;

/// Everything between the literal packet and the encrypted data packet
enum Payload<W: Write> {
    Direct(DataWriter<W>),
    Compressed(Compressor<PartialBodyWriter<DataWriter<W>>>),
}

impl<W: Write> Payload<W> {
    fn finish(self) -> io::Result<DataWriter<W>> {
        match self {
            Self::Direct(data) => Ok(data),
            Self::Compressed(compressor) => compressor.finish()?.finish(),
        }
    }
}

impl<W: Write> Write for Payload<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Direct(data) => data.write(buf),
            Self::Compressed(compressor) => compressor.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Direct(data) => data.flush(),
            Self::Compressed(compressor) => compressor.flush(),
        }
    }
}

/// Streaming message encryptor.
///
/// Everything written becomes the payload of the literal packet. Call
/// [`finish`](Self::finish) to close every layer; dropping the writer leaves a
/// truncated message.
pub struct EncryptWriter<W: Write> {
    literal: PartialBodyWriter<Payload<W>>,
    written: u64,
}

impl<W: Write> EncryptWriter<W> {
    /// Writes the session key packets and opens the data packet layers
    pub fn new<R: CryptoRng + RngCore>(
        output: W,
        recipients: &[&PublicKey],
        options: &EncryptOptions,
        rng: &mut R,
    ) -> Result<Self> {
        if recipients.is_empty() {
            return Err(PgpError::invalid_input("At least one recipient is required"));
        }
        if options.compression == CompressionAlgorithm::Bzip2 {
            return Err(PgpError::unsupported("BZip2 compression is not supported"));
        }
        for recipient in recipients {
            if !recipient.is_encryption_capable() {
                return Err(PgpError::key(format!(
                    "Key {} cannot be used for encryption",
                    recipient.key_id()
                )));
            }
        }

        let file_name = options.file_name.as_deref().unwrap_or(CONSOLE_FILE_NAME);
        let date = options.modification_time.unwrap_or_else(now_timestamp);
        let literal = LiteralData::binary(file_name, date)?;

        let session_key = SessionKey::generate(options.symmetric, rng);

        let mut sink = if options.armor {
            Sink::Armored(ArmorWriter::new(output, ArmorType::Message)?)
        } else {
            Sink::Binary(output)
        };

        for recipient in recipients {
            let pkesk = PublicKeyEncryptedSessionKey {
                key_id: recipient.key_id(),
                algorithm: recipient.algorithm(),
                encrypted_key: session_key.encrypt_for(recipient, rng)?,
            };
            packet::write_packet(
                &mut sink,
                Tag::PublicKeyEncryptedSessionKey,
                &pkesk.to_bytes()?,
            )?;
        }

        let data_tag = if options.integrity_check {
            Tag::SymEncryptedIntegrityProtectedData
        } else {
            Tag::SymmetricallyEncryptedData
        };
        let body = PartialBodyWriter::new(sink, data_tag)?;
        let data = EncryptedDataWriter::new(body, &session_key, options.integrity_check, rng)?;

        let payload = match options.compression {
            CompressionAlgorithm::Uncompressed => Payload::Direct(data),
            algorithm => Payload::Compressed(Compressor::new(
                PartialBodyWriter::new(data, Tag::CompressedData)?,
                algorithm,
            )?),
        };

        let mut literal_writer = PartialBodyWriter::new(payload, Tag::LiteralData)?;
        literal.write_header(&mut literal_writer)?;

        debug!(
            "Encrypting to {} recipient(s) with {}, integrity: {}, compression: {:?}, armor: {}",
            recipients.len(),
            options.symmetric,
            options.integrity_check,
            options.compression,
            options.armor
        );

        Ok(Self {
            literal: literal_writer,
            written: 0,
        })
    }

    /// Number of plaintext bytes written so far
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Closes every layer and returns the output writer
    pub fn finish(self) -> Result<W> {
        let payload = self.literal.finish()?;
        let data = payload.finish()?;
        let body = data.finish()?;
        let sink = body.finish()?;
        Ok(sink.finish()?)
    }
}

impl<W: Write> Write for EncryptWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.literal.write(buf)?;
        self.written += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.literal.flush()
    }
}

/// Encrypts everything read from `input` into `output`, returning `output`
#[instrument(skip_all, fields(recipients = recipients.len(), armor = options.armor))]
pub fn encrypt_stream<I, W, R>(
    input: &mut I,
    output: W,
    recipients: &[&PublicKey],
    options: &EncryptOptions,
    rng: &mut R,
) -> Result<W>
where
    I: Read + ?Sized,
    W: Write,
    R: CryptoRng + RngCore,
{
    let mut writer = EncryptWriter::new(output, recipients, options, rng)?;
    let copied = io::copy(input, &mut writer)?;
    debug!("Encrypted {} plaintext bytes", copied);
    writer.finish()
}

/// Encrypts a byte slice to one recipient.
///
/// Fails with [`PgpError::EmptyInput`] for zero-length plaintext.
pub fn encrypt_bytes(
    plaintext: &[u8],
    recipient: &PublicKey,
    options: &EncryptOptions,
) -> Result<Vec<u8>> {
    if plaintext.is_empty() {
        return Err(PgpError::EmptyInput);
    }
    let mut input = plaintext;
    encrypt_stream(&mut input, Vec::new(), &[recipient], options, &mut OsRng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KeyPair, SymmetricAlgorithm};
    use crate::packet::{PacketBody, PacketHeader};

    fn recipient() -> KeyPair {
        KeyPair::generate_mlkem1024(&mut OsRng).unwrap()
    }

    fn top_level_tags(mut message: &[u8]) -> Vec<Tag> {
        let mut tags = Vec::new();
        while let Some(header) = PacketHeader::read(&mut message).unwrap() {
            PacketBody::new(&mut message, &header).skip().unwrap();
            tags.push(header.tag);
        }
        tags
    }

    #[test]
    fn test_envelope_layout_with_integrity() {
        let keypair = recipient();
        let message = encrypt_bytes(
            b"Test this encryption!!!",
            keypair.public_key(),
            &EncryptOptions::default(),
        )
        .unwrap();

        assert_eq!(
            top_level_tags(&message),
            vec![
                Tag::PublicKeyEncryptedSessionKey,
                Tag::SymEncryptedIntegrityProtectedData
            ]
        );
        assert!(!message
            .windows(b"Test this encryption!!!".len())
            .any(|window| window == b"Test this encryption!!!"));
    }

    #[test]
    fn test_envelope_layout_without_integrity() {
        let keypair = recipient();
        let options = EncryptOptions::default().with_integrity_check(false);
        let message = encrypt_bytes(b"legacy", keypair.public_key(), &options).unwrap();
        assert_eq!(
            top_level_tags(&message),
            vec![
                Tag::PublicKeyEncryptedSessionKey,
                Tag::SymmetricallyEncryptedData
            ]
        );
    }

    #[test]
    fn test_seipd_body_size() {
        let keypair = recipient();
        let options = EncryptOptions::default()
            .with_symmetric(SymmetricAlgorithm::Cast5)
            .with_modification_time(0);
        let plaintext = b"0123456789";
        let message = encrypt_bytes(plaintext, keypair.public_key(), &options).unwrap();

        let mut cursor = message.as_slice();
        let header = PacketHeader::read(&mut cursor).unwrap().unwrap();
        PacketBody::new(&mut cursor, &header).skip().unwrap();
        let header = PacketHeader::read(&mut cursor).unwrap().unwrap();
        let body = PacketBody::new(&mut cursor, &header).read_to_vec().unwrap();

        // version + prefix (8 + 2) + literal packet (2 + 6 + "_CONSOLE" + data) + MDC
        let literal_len = 2 + 6 + CONSOLE_FILE_NAME.len() + plaintext.len();
        assert_eq!(body.len(), 1 + 10 + literal_len + 22);
    }

    #[test]
    fn test_armored_output() {
        let keypair = recipient();
        let options = EncryptOptions::default().with_armor(true);
        let message = encrypt_bytes(b"armored", keypair.public_key(), &options).unwrap();
        let text = String::from_utf8(message).unwrap();
        assert!(text.starts_with("-----BEGIN PGP MESSAGE-----\n"));
        assert!(text.ends_with("-----END PGP MESSAGE-----\n"));
    }

    #[test]
    fn test_large_payload_uses_partial_lengths() {
        let keypair = recipient();
        let plaintext = vec![0x5Au8; 100_000];
        let message =
            encrypt_bytes(&plaintext, keypair.public_key(), &EncryptOptions::default()).unwrap();

        let mut cursor = message.as_slice();
        let header = PacketHeader::read(&mut cursor).unwrap().unwrap();
        PacketBody::new(&mut cursor, &header).skip().unwrap();
        let header = PacketHeader::read(&mut cursor).unwrap().unwrap();
        assert!(matches!(header.length, packet::BodyLength::Partial(_)));
    }

    #[test]
    fn test_rejected_inputs() {
        let keypair = recipient();
        assert!(matches!(
            encrypt_bytes(b"", keypair.public_key(), &EncryptOptions::default()),
            Err(PgpError::EmptyInput)
        ));

        let options = EncryptOptions::default().with_compression(CompressionAlgorithm::Bzip2);
        assert!(matches!(
            encrypt_bytes(b"data", keypair.public_key(), &options),
            Err(PgpError::UnsupportedContent(_))
        ));

        let mut input: &[u8] = b"data";
        assert!(matches!(
            encrypt_stream(&mut input, Vec::new(), &[], &EncryptOptions::default(), &mut OsRng),
            Err(PgpError::InvalidInput(_))
        ));
    }
}
