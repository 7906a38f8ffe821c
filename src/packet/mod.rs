//! OpenPGP packet framing.
//!
//! This module reads and writes RFC 4880 packet headers in both the old and
//! new formats, exposes packet bodies as streams (following partial body
//! length chunks transparently), and provides the streaming
//! [`PartialBodyWriter`] used for data packets whose length is not known up
//! front. Bodies the pipeline inspects live in the submodules.

use crate::error::{PgpError, Result};
use crate::validation::Validator;
use std::io::{self, Read, Write};

pub mod literal;
pub mod pkesk;
pub mod signature;

pub use literal::{LiteralData, LiteralFormat};
pub use pkesk::PublicKeyEncryptedSessionKey;

/// Body of a marker packet
pub const MARKER_BODY: &[u8] = b"PGP";

/// Default chunk size used for partial body lengths (2^13)
pub const DEFAULT_PARTIAL_CHUNK: usize = 8192;

/// Version octet of a SEIPD packet carrying a modification detection code
pub const SEIPD_VERSION: u8 = 1;

/// Header of the modification detection code packet: new-format tag 19, length 20
pub const MDC_HEADER: [u8; 2] = [0xD3, 0x14];

/// Encoded size of the modification detection code packet
pub const MDC_PACKET_SIZE: usize = 22;

/// Packet tags defined in RFC 4880
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// Public-Key Encrypted Session Key Packet
    PublicKeyEncryptedSessionKey,
    /// Signature Packet
    Signature,
    /// Symmetric-Key Encrypted Session Key Packet
    SymmetricKeyEncryptedSessionKey,
    /// One-Pass Signature Packet
    OnePassSignature,
    /// Secret-Key Packet
    SecretKey,
    /// Public-Key Packet
    PublicKey,
    /// Secret-Subkey Packet
    SecretSubkey,
    /// Compressed Data Packet
    CompressedData,
    /// Symmetrically Encrypted Data Packet
    SymmetricallyEncryptedData,
    /// Marker Packet
    Marker,
    /// Literal Data Packet
    LiteralData,
    /// Trust Packet
    Trust,
    /// User ID Packet
    UserId,
    /// Public-Subkey Packet
    PublicSubkey,
    /// User Attribute Packet
    UserAttribute,
    /// Sym. Encrypted and Integrity Protected Data Packet
    SymEncryptedIntegrityProtectedData,
    /// Modification Detection Code Packet
    ModificationDetectionCode,
    /// Any tag this crate does not name
    Other(u8),
}

impl Tag {
    /// Convert packet tag to byte value
    pub fn to_u8(self) -> u8 {
        match self {
            Self::PublicKeyEncryptedSessionKey => 1,
            Self::Signature => 2,
            Self::SymmetricKeyEncryptedSessionKey => 3,
            Self::OnePassSignature => 4,
            Self::SecretKey => 5,
            Self::PublicKey => 6,
            Self::SecretSubkey => 7,
            Self::CompressedData => 8,
            Self::SymmetricallyEncryptedData => 9,
            Self::Marker => 10,
            Self::LiteralData => 11,
            Self::Trust => 12,
            Self::UserId => 13,
            Self::PublicSubkey => 14,
            Self::UserAttribute => 17,
            Self::SymEncryptedIntegrityProtectedData => 18,
            Self::ModificationDetectionCode => 19,
            Self::Other(tag) => tag,
        }
    }

    /// Convert byte value to packet tag
    pub fn from_u8(tag: u8) -> Self {
        match tag {
            1 => Self::PublicKeyEncryptedSessionKey,
            2 => Self::Signature,
            3 => Self::SymmetricKeyEncryptedSessionKey,
            4 => Self::OnePassSignature,
            5 => Self::SecretKey,
            6 => Self::PublicKey,
            7 => Self::SecretSubkey,
            8 => Self::CompressedData,
            9 => Self::SymmetricallyEncryptedData,
            10 => Self::Marker,
            11 => Self::LiteralData,
            12 => Self::Trust,
            13 => Self::UserId,
            14 => Self::PublicSubkey,
            17 => Self::UserAttribute,
            18 => Self::SymEncryptedIntegrityProtectedData,
            19 => Self::ModificationDetectionCode,
            other => Self::Other(other),
        }
    }

    /// Returns true for tags that may only appear inside an envelope after decryption
    pub fn is_inner_content(&self) -> bool {
        matches!(
            self,
            Self::LiteralData | Self::CompressedData | Self::OnePassSignature | Self::Signature
        )
    }
}

/// Length of a packet body as announced by its header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyLength {
    /// Exactly this many octets follow
    Fixed(u32),
    /// A chunk of this many octets follows, then another length
    Partial(u32),
    /// Old format length type 3: the body runs to the end of input
    Indeterminate,
}

/// Parsed packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Packet tag
    pub tag: Tag,
    /// Body length of the first (or only) chunk
    pub length: BodyLength,
    /// Whether the header used the new format
    pub new_format: bool,
}

fn truncated(what: &str) -> PgpError {
    PgpError::parse(format!("Truncated {what}"))
}

fn read_byte<R: Read + ?Sized>(reader: &mut R, what: &str) -> Result<u8> {
    let mut byte = [0u8; 1];
    reader.read_exact(&mut byte).map_err(|err| match err.kind() {
        io::ErrorKind::UnexpectedEof => truncated(what),
        _ => PgpError::from(err),
    })?;
    Ok(byte[0])
}

fn read_array<R: Read + ?Sized, const N: usize>(reader: &mut R, what: &str) -> Result<[u8; N]> {
    let mut bytes = [0u8; N];
    reader.read_exact(&mut bytes).map_err(|err| match err.kind() {
        io::ErrorKind::UnexpectedEof => truncated(what),
        _ => PgpError::from(err),
    })?;
    Ok(bytes)
}

/// Reads a new-format body length, starting with its first octet
fn read_new_length<R: Read + ?Sized>(reader: &mut R, first: u8) -> Result<BodyLength> {
    Ok(match first {
        0..=191 => BodyLength::Fixed(first as u32),
        192..=223 => {
            let second = read_byte(reader, "two-octet length")?;
            BodyLength::Fixed(((first as u32 - 192) << 8) + second as u32 + 192)
        }
        224..=254 => BodyLength::Partial(1u32 << (first & 0x1F)),
        255 => BodyLength::Fixed(u32::from_be_bytes(read_array(reader, "five-octet length")?)),
    })
}

impl PacketHeader {
    /// Reads the next packet header, or `None` at a clean end of input
    pub fn read<R: Read + ?Sized>(reader: &mut R) -> Result<Option<Self>> {
        let mut first = [0u8; 1];
        loop {
            match reader.read(&mut first) {
                Ok(0) => return Ok(None),
                Ok(_) => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
        let ctb = first[0];

        if ctb & 0x80 == 0 {
            return Err(PgpError::parse(format!(
                "Invalid packet header octet 0x{ctb:02X}"
            )));
        }

        if ctb & 0x40 != 0 {
            // New format: six bits of tag, length octets follow
            let length_octet = read_byte(reader, "packet header")?;
            let length = read_new_length(reader, length_octet)?;
            return Ok(Some(Self {
                tag: Tag::from_u8(ctb & 0x3F),
                length,
                new_format: true,
            }));
        }

        // Old format: four bits of tag, two bits of length type
        let tag = Tag::from_u8((ctb >> 2) & 0x0F);
        let length = match ctb & 0x03 {
            0 => BodyLength::Fixed(read_byte(reader, "packet header")? as u32),
            1 => BodyLength::Fixed(u16::from_be_bytes(read_array(reader, "packet header")?) as u32),
            2 => BodyLength::Fixed(u32::from_be_bytes(read_array(reader, "packet header")?)),
            _ => BodyLength::Indeterminate,
        };
        Ok(Some(Self {
            tag,
            length,
            new_format: false,
        }))
    }

    /// Parses a header from the front of a buffer, returning it with its encoded size
    pub fn from_bytes(data: &[u8]) -> Result<(Self, usize)> {
        let mut cursor = data;
        let header = Self::read(&mut cursor)?.ok_or_else(|| truncated("packet header"))?;
        Ok((header, data.len() - cursor.len()))
    }
}

/// Writes a new-format body length
pub fn write_length<W: Write>(out: &mut W, length: usize) -> io::Result<()> {
    if length < 192 {
        out.write_all(&[length as u8])
    } else if length < 8384 {
        let encoded = length - 192;
        out.write_all(&[192 + (encoded >> 8) as u8, (encoded & 0xFF) as u8])
    } else {
        let length = u32::try_from(length).map_err(|_| {
            PgpError::invalid_input(format!("Packet body of {length} bytes is too long")).into_io()
        })?;
        out.write_all(&[0xFF])?;
        out.write_all(&length.to_be_bytes())
    }
}

/// Writes a new-format header for a body of known length
pub fn write_header<W: Write>(out: &mut W, tag: Tag, length: usize) -> io::Result<()> {
    out.write_all(&[0xC0 | tag.to_u8()])?;
    write_length(out, length)
}

/// Writes a complete packet with a fixed-length body
pub fn write_packet<W: Write>(out: &mut W, tag: Tag, body: &[u8]) -> io::Result<()> {
    write_header(out, tag, body.len())?;
    out.write_all(body)
}

/// Streaming view of one packet body.
///
/// Follows partial body length chunks and reports truncation as a parse
/// error wrapped in [`io::Error`]; `PgpError::from` recovers it.
pub struct PacketBody<R: Read> {
    inner: R,
    remaining: u64,
    more_chunks: bool,
    to_eof: bool,
}

impl<R: Read> PacketBody<R> {
    /// Create a body reader positioned just after `header`
    pub fn new(inner: R, header: &PacketHeader) -> Self {
        let (remaining, more_chunks, to_eof) = match header.length {
            BodyLength::Fixed(len) => (len as u64, false, false),
            BodyLength::Partial(len) => (len as u64, true, false),
            BodyLength::Indeterminate => (0, false, true),
        };
        Self {
            inner,
            remaining,
            more_chunks,
            to_eof,
        }
    }

    /// Reads the whole body into memory, subject to the buffered packet limit
    pub fn read_to_vec(mut self) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        let limit = crate::validation::MAX_BUFFERED_PACKET_SIZE as u64 + 1;
        (&mut self).take(limit).read_to_end(&mut body)?;
        Validator::validate_packet_size(body.len())?;
        Ok(body)
    }

    /// Consumes and discards the rest of the body
    pub fn skip(mut self) -> Result<u64> {
        Ok(io::copy(&mut self, &mut io::sink())?)
    }

    fn next_chunk(&mut self) -> io::Result<()> {
        let first = read_byte(&mut self.inner, "partial body length").map_err(PgpError::into_io)?;
        match read_new_length(&mut self.inner, first).map_err(PgpError::into_io)? {
            BodyLength::Fixed(len) => {
                self.remaining = len as u64;
                self.more_chunks = false;
            }
            BodyLength::Partial(len) => {
                self.remaining = len as u64;
                self.more_chunks = true;
            }
            BodyLength::Indeterminate => {
                return Err(PgpError::parse("Invalid partial body length").into_io())
            }
        }
        Ok(())
    }
}

impl<R: Read> Read for PacketBody<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.to_eof {
            return self.inner.read(buf);
        }
        while self.remaining == 0 {
            if !self.more_chunks {
                return Ok(0);
            }
            self.next_chunk()?;
        }
        let want = buf.len().min(self.remaining.min(usize::MAX as u64) as usize);
        let read = self.inner.read(&mut buf[..want])?;
        if read == 0 {
            return Err(truncated("packet body").into_io());
        }
        self.remaining -= read as u64;
        Ok(read)
    }
}

/// Writes a packet body with partial body lengths.
///
/// The packet header octet is written on construction. Full chunks go out as
/// partial lengths; [`finish`](Self::finish) writes the remainder with a
/// definite length, so short bodies end up as ordinary fixed-length packets.
pub struct PartialBodyWriter<W: Write> {
    inner: W,
    buffer: Vec<u8>,
    chunk_exponent: u8,
}

impl<W: Write> PartialBodyWriter<W> {
    /// Create a new writer using the default chunk size
    pub fn new(inner: W, tag: Tag) -> io::Result<Self> {
        Self::with_chunk_size(inner, tag, DEFAULT_PARTIAL_CHUNK)
    }

    /// Create a new writer with a chunk size, rounded down to a power of two (minimum 512)
    pub fn with_chunk_size(mut inner: W, tag: Tag, chunk_size: usize) -> io::Result<Self> {
        let chunk_size = chunk_size.clamp(512, 1 << 30);
        let chunk_exponent = (usize::BITS - 1 - chunk_size.leading_zeros()) as u8;
        inner.write_all(&[0xC0 | tag.to_u8()])?;
        Ok(Self {
            inner,
            buffer: Vec::with_capacity(1 << chunk_exponent),
            chunk_exponent,
        })
    }

    fn chunk_size(&self) -> usize {
        1 << self.chunk_exponent
    }

    fn flush_chunk(&mut self) -> io::Result<()> {
        let size = self.chunk_size();
        self.inner.write_all(&[224 + self.chunk_exponent])?;
        self.inner.write_all(&self.buffer[..size])?;
        self.buffer.drain(..size);
        Ok(())
    }

    /// Writes the final chunk and returns the underlying writer
    pub fn finish(mut self) -> io::Result<W> {
        write_length(&mut self.inner, self.buffer.len())?;
        self.inner.write_all(&self.buffer)?;
        self.buffer.clear();
        Ok(self.inner)
    }
}

impl<W: Write> Write for PartialBodyWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let room = self.chunk_size() * 2 - self.buffer.len();
        let taken = buf.len().min(room);
        self.buffer.extend_from_slice(&buf[..taken]);
        // Keep at least one byte back so the final chunk is never a partial length
        while self.buffer.len() > self.chunk_size() {
            self.flush_chunk()?;
        }
        Ok(taken)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Cursor over an in-memory packet body
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> ByteCursor<'a> {
    /// Create a new cursor at the start of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Number of unread bytes
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// Bytes consumed so far
    pub fn position(&self) -> usize {
        self.position
    }

    /// Returns true once every byte has been consumed
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Takes the next `len` bytes
    pub fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(PgpError::parse(format!(
                "Need {} bytes at offset {}, only {} remain",
                len,
                self.position,
                self.remaining()
            )));
        }
        let slice = &self.data[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    /// Takes everything that is left
    pub fn rest(&mut self) -> &'a [u8] {
        let slice = &self.data[self.position..];
        self.position = self.data.len();
        slice
    }

    /// Reads one octet
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Reads a big-endian two-octet scalar
    pub fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    /// Reads a big-endian four-octet scalar
    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads a fixed-size array
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Reads a multiprecision integer, returning its magnitude bytes
    pub fn read_mpi(&mut self) -> Result<&'a [u8]> {
        let bits = self.read_u16()? as usize;
        self.take(bits.div_ceil(8))
    }

    /// Reads a field prefixed with a two-octet byte count
    pub fn read_u16_prefixed(&mut self) -> Result<&'a [u8]> {
        let len = self.read_u16()? as usize;
        self.take(len)
    }

    /// Reads a field prefixed with a one-octet byte count
    pub fn read_u8_prefixed(&mut self) -> Result<&'a [u8]> {
        let len = self.read_u8()? as usize;
        self.take(len)
    }
}

/// Appends a multiprecision integer built from big-endian magnitude bytes
pub fn write_mpi(out: &mut Vec<u8>, magnitude: &[u8]) {
    let start = magnitude
        .iter()
        .position(|&byte| byte != 0)
        .unwrap_or(magnitude.len());
    let trimmed = &magnitude[start..];
    let bits = match trimmed.first() {
        Some(&first) => (trimmed.len() - 1) * 8 + (8 - first.leading_zeros() as usize),
        None => 0,
    };
    out.extend_from_slice(&(bits as u16).to_be_bytes());
    out.extend_from_slice(trimmed);
}

/// Appends a field prefixed with a two-octet byte count
pub fn write_u16_prefixed(out: &mut Vec<u8>, data: &[u8]) -> Result<()> {
    let len = u16::try_from(data.len())
        .map_err(|_| PgpError::invalid_input(format!("Field of {} bytes is too long", data.len())))?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(data);
    Ok(())
}

/// Sum of all octets modulo 65536, as used by session keys and unprotected secret keys
pub fn checksum16(data: &[u8]) -> u16 {
    data.iter()
        .fold(0u16, |sum, &byte| sum.wrapping_add(byte as u16))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(data: &[u8]) -> Vec<(PacketHeader, Vec<u8>)> {
        let mut input = data;
        let mut packets = Vec::new();
        while let Some(header) = PacketHeader::read(&mut input).unwrap() {
            let mut body = Vec::new();
            PacketBody::new(&mut input, &header)
                .read_to_end(&mut body)
                .unwrap();
            packets.push((header, body));
        }
        packets
    }

    #[test]
    fn test_tag_conversion() {
        assert_eq!(Tag::PublicKey.to_u8(), 6);
        assert_eq!(Tag::from_u8(18), Tag::SymEncryptedIntegrityProtectedData);
        assert_eq!(Tag::from_u8(60), Tag::Other(60));
        for tag in 0..64u8 {
            assert_eq!(Tag::from_u8(tag).to_u8(), tag);
        }
    }

    #[test]
    fn test_header_length_encoding() {
        let test_cases = vec![
            (50, vec![0xC0 | 11, 50]),
            (200, vec![0xC0 | 11, 192, 8]),
            (8383, vec![0xC0 | 11, 223, 255]),
            (10000, vec![0xC0 | 11, 255, 0, 0, 39, 16]),
        ];

        for (length, expected_bytes) in test_cases {
            let mut bytes = Vec::new();
            write_header(&mut bytes, Tag::LiteralData, length).unwrap();
            assert_eq!(bytes, expected_bytes);

            let (parsed, consumed) = PacketHeader::from_bytes(&bytes).unwrap();
            assert_eq!(parsed.tag, Tag::LiteralData);
            assert_eq!(parsed.length, BodyLength::Fixed(length as u32));
            assert_eq!(consumed, bytes.len());
        }
    }

    #[test]
    fn test_old_format_headers() {
        // 0x99: old format, tag 6, two-octet length
        let (header, consumed) = PacketHeader::from_bytes(&[0x99, 0x01, 0x0D]).unwrap();
        assert_eq!(header.tag, Tag::PublicKey);
        assert_eq!(header.length, BodyLength::Fixed(269));
        assert!(!header.new_format);
        assert_eq!(consumed, 3);

        // 0xA3: old format, tag 8, indeterminate length
        let packets = read_all(&[0xA3, 0x00, 1, 2, 3]);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].0.length, BodyLength::Indeterminate);
        assert_eq!(packets[0].1, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_partial_body_round_trip() {
        for size in [0usize, 1, 511, 512, 513, 1024, 5000] {
            let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
            let mut writer =
                PartialBodyWriter::with_chunk_size(Vec::new(), Tag::LiteralData, 512).unwrap();
            for chunk in data.chunks(97) {
                writer.write_all(chunk).unwrap();
            }
            let encoded = writer.finish().unwrap();

            let packets = read_all(&encoded);
            assert_eq!(packets.len(), 1, "size {size}");
            assert_eq!(packets[0].1, data, "size {size}");
        }
    }

    #[test]
    fn test_partial_lengths_emitted_for_large_bodies() {
        let mut writer =
            PartialBodyWriter::with_chunk_size(Vec::new(), Tag::LiteralData, 512).unwrap();
        writer.write_all(&[0u8; 1500]).unwrap();
        let encoded = writer.finish().unwrap();
        // 224 + 9 announces a 512-byte chunk
        assert_eq!(encoded[1], 224 + 9);
        let (header, _) = PacketHeader::from_bytes(&encoded).unwrap();
        assert_eq!(header.length, BodyLength::Partial(512));
    }

    #[test]
    fn test_truncated_input_is_parse_error() {
        let mut packet = Vec::new();
        write_packet(&mut packet, Tag::UserId, b"Alice <alice@example.com>").unwrap();

        for cut in 1..packet.len() {
            let mut input = &packet[..cut];
            let result = PacketHeader::read(&mut input).and_then(|header| {
                let header = header.ok_or_else(|| PgpError::parse("empty"))?;
                PacketBody::new(&mut input, &header).read_to_vec()
            });
            assert!(matches!(result, Err(PgpError::Parse(_))), "cut at {cut}");
        }
    }

    #[test]
    fn test_invalid_header_octet() {
        assert!(matches!(
            PacketHeader::from_bytes(b"hello"),
            Err(PgpError::Parse(_))
        ));
        assert!(PacketHeader::read(&mut &[][..]).unwrap().is_none());
    }

    #[test]
    fn test_mpi_encoding() {
        let mut out = Vec::new();
        write_mpi(&mut out, &[0x00, 0x01, 0xFF]);
        assert_eq!(out, vec![0x00, 0x09, 0x01, 0xFF]);

        let mut cursor = ByteCursor::new(&out);
        assert_eq!(cursor.read_mpi().unwrap(), &[0x01, 0xFF]);
        assert!(cursor.is_empty());
    }

    #[test]
    fn test_cursor_bounds() {
        let data = [1u8, 2, 3];
        let mut cursor = ByteCursor::new(&data);
        assert_eq!(cursor.read_u16().unwrap(), 0x0102);
        assert!(matches!(cursor.read_u16(), Err(PgpError::Parse(_))));
        assert_eq!(cursor.read_u8().unwrap(), 3);
        assert_eq!(checksum16(&[0xFF, 0xFF, 0x02]), 0x0200);
    }
}
