//! ASCII armor encoding and decoding for PGP messages and keys.
//!
//! This module implements the ASCII armor format defined in RFC 4880 §6 as
//! streaming adapters: [`ArmorWriter`] wraps any [`Write`] and emits 64-column
//! base64 lines, [`ArmorReader`] wraps any [`BufRead`] and yields the decoded
//! bytes. Both maintain the CRC-24 checksum as data flows through.
//!
//! Decoding accepts armor headers, CRLF line endings, arbitrary line widths
//! and a missing checksum line; a checksum that is present must match.

use crate::error::{PgpError, Result};
use crate::validation::MAX_ARMOR_LINE_LENGTH;
use base64::{engine::general_purpose, Engine as _};
use std::fmt;
use std::io::{self, BufRead, Read, Write};

/// CRC-24 polynomial used for PGP armor checksums
const CRC24_POLY: u32 = 0x1864CFB;
const CRC24_INIT: u32 = 0xB704CE;

/// Raw bytes per armored line (64 base64 characters)
const LINE_BYTES: usize = 48;

/// ASCII armor block types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArmorType {
    /// PGP message (encrypted data)
    Message,
    /// Public key block
    PublicKey,
    /// Private key block
    PrivateKey,
    /// Signature block
    Signature,
    /// Any other label
    Other(String),
}

impl ArmorType {
    /// Get the armor label for this type
    pub fn label(&self) -> &str {
        match self {
            ArmorType::Message => "PGP MESSAGE",
            ArmorType::PublicKey => "PGP PUBLIC KEY BLOCK",
            ArmorType::PrivateKey => "PGP PRIVATE KEY BLOCK",
            ArmorType::Signature => "PGP SIGNATURE",
            ArmorType::Other(label) => label,
        }
    }

    /// Parse armor type from its label
    pub fn from_label(label: &str) -> Self {
        match label {
            "PGP MESSAGE" => ArmorType::Message,
            "PGP PUBLIC KEY BLOCK" => ArmorType::PublicKey,
            "PGP PRIVATE KEY BLOCK" => ArmorType::PrivateKey,
            "PGP SIGNATURE" => ArmorType::Signature,
            other => ArmorType::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ArmorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Incremental CRC-24
#[derive(Debug, Clone, Copy)]
pub struct Crc24(u32);

impl Default for Crc24 {
    fn default() -> Self {
        Self(CRC24_INIT)
    }
}

impl Crc24 {
    /// Create a new checksum state
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed more data
    pub fn update(&mut self, data: &[u8]) {
        let mut crc = self.0;
        for &byte in data {
            crc ^= (byte as u32) << 16;
            for _ in 0..8 {
                crc <<= 1;
                if crc & 0x1000000 != 0 {
                    crc ^= CRC24_POLY;
                }
            }
        }
        self.0 = crc & 0xFFFFFF;
    }

    /// Current checksum value
    pub fn value(&self) -> u32 {
        self.0
    }
}

/// Calculate CRC-24 checksum used in PGP armor
pub fn crc24(data: &[u8]) -> u32 {
    let mut crc = Crc24::new();
    crc.update(data);
    crc.value()
}

fn checksum_line(crc: u32) -> String {
    let bytes = [(crc >> 16) as u8, (crc >> 8) as u8, crc as u8];
    format!("={}\n", general_purpose::STANDARD.encode(bytes))
}

fn begin_block(kind: &ArmorType, headers: &[(String, String)]) -> String {
    let mut out = format!("-----BEGIN {}-----\n", kind.label());
    for (key, value) in headers {
        out.push_str(&format!("{key}: {value}\n"));
    }
    // The blank line is mandatory even without headers
    out.push('\n');
    out
}

/// Streaming armor encoder
pub struct ArmorWriter<W: Write> {
    inner: W,
    kind: ArmorType,
    pending: Vec<u8>,
    crc: Crc24,
}

impl<W: Write> ArmorWriter<W> {
    /// Create a new writer and emit the armor header line
    pub fn new(inner: W, kind: ArmorType) -> io::Result<Self> {
        Self::with_headers(inner, kind, &[])
    }

    /// Create a new writer with armor headers such as `Version` or `Comment`
    pub fn with_headers(mut inner: W, kind: ArmorType, headers: &[(String, String)]) -> io::Result<Self> {
        inner.write_all(begin_block(&kind, headers).as_bytes())?;
        Ok(Self {
            inner,
            kind,
            pending: Vec::with_capacity(LINE_BYTES),
            crc: Crc24::new(),
        })
    }

    fn write_line(&mut self, data: &[u8]) -> io::Result<()> {
        let mut line = general_purpose::STANDARD.encode(data);
        line.push('\n');
        self.inner.write_all(line.as_bytes())
    }

    /// Writes the final line, checksum and footer, returning the underlying writer
    pub fn finish(mut self) -> io::Result<W> {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.write_line(&rest)?;
        }
        let tail = format!(
            "{}-----END {}-----\n",
            checksum_line(self.crc.value()),
            self.kind.label()
        );
        self.inner.write_all(tail.as_bytes())?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for ArmorWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.crc.update(buf);
        self.pending.extend_from_slice(buf);
        let full = self.pending.len() / LINE_BYTES * LINE_BYTES;
        if full > 0 {
            let lines: Vec<u8> = self.pending.drain(..full).collect();
            for line in lines.chunks(LINE_BYTES) {
                self.write_line(line)?;
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Encode binary data as an ASCII armored block
pub fn encode(kind: ArmorType, data: &[u8]) -> String {
    encode_with_headers(kind, &[], data)
}

/// Encode binary data as an ASCII armored block with armor headers
pub fn encode_with_headers(kind: ArmorType, headers: &[(String, String)], data: &[u8]) -> String {
    let mut out = begin_block(&kind, headers);
    for line in data.chunks(LINE_BYTES) {
        out.push_str(&general_purpose::STANDARD.encode(line));
        out.push('\n');
    }
    out.push_str(&checksum_line(crc24(data)));
    out.push_str(&format!("-----END {}-----\n", kind.label()));
    out
}

/// Returns true if the input starts (after whitespace) with an armor header line
pub fn is_armored(data: &[u8]) -> bool {
    let start = data
        .iter()
        .position(|byte| !byte.is_ascii_whitespace())
        .unwrap_or(data.len());
    data[start..].starts_with(b"-----BEGIN ")
}

/// Decoded armor block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Armored {
    /// Block type
    pub kind: ArmorType,
    /// Armor headers in the order they appeared
    pub headers: Vec<(String, String)>,
    /// Decoded payload
    pub data: Vec<u8>,
}

/// Decode a complete ASCII armored block
pub fn decode(armored: &[u8]) -> Result<Armored> {
    let mut reader = ArmorReader::new(armored)?;
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    Ok(Armored {
        kind: reader.kind().clone(),
        headers: reader.headers().to_vec(),
        data,
    })
}

fn armor_error(msg: impl Into<String>) -> io::Error {
    PgpError::Parse(msg.into()).into_io()
}

/// Streaming armor decoder
pub struct ArmorReader<R: BufRead> {
    inner: R,
    kind: ArmorType,
    headers: Vec<(String, String)>,
    /// Base64 characters not yet forming a full quantum
    carry: String,
    decoded: Vec<u8>,
    position: usize,
    crc: Crc24,
    finished: bool,
}

impl<R: BufRead> ArmorReader<R> {
    /// Create a new reader, consuming the header line and armor headers
    pub fn new(mut inner: R) -> Result<Self> {
        let mut line = String::new();

        // Find the begin line
        let kind = loop {
            if !read_line(&mut inner, &mut line)? {
                return Err(PgpError::parse("No armor header found"));
            }
            if let Some(label) = line
                .strip_prefix("-----BEGIN ")
                .and_then(|rest| rest.strip_suffix("-----"))
            {
                break ArmorType::from_label(label);
            }
        };

        let mut reader = Self {
            inner,
            kind,
            headers: Vec::new(),
            carry: String::new(),
            decoded: Vec::new(),
            position: 0,
            crc: Crc24::new(),
            finished: false,
        };

        // Armor headers run until a blank line
        loop {
            if !read_line(&mut reader.inner, &mut line)? {
                return Err(PgpError::parse("Armor ended inside its headers"));
            }
            if line.is_empty() {
                break;
            }
            match line.split_once(": ") {
                Some((key, value)) => reader
                    .headers
                    .push((key.trim().to_string(), value.trim().to_string())),
                None if is_base64_line(&line) => {
                    // Some writers omit the blank line when there are no headers
                    reader.take_data_line(&line).map_err(PgpError::from)?;
                    break;
                }
                None => {
                    return Err(PgpError::parse(format!("Invalid armor header line: {line}")))
                }
            }
        }

        Ok(reader)
    }

    /// Block type from the header line
    pub fn kind(&self) -> &ArmorType {
        &self.kind
    }

    /// Armor headers in the order they appeared
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    fn take_data_line(&mut self, line: &str) -> io::Result<()> {
        self.carry.push_str(line);
        let whole = self.carry.len() / 4 * 4;
        if whole == 0 {
            return Ok(());
        }
        let decoded = general_purpose::STANDARD
            .decode(&self.carry[..whole])
            .map_err(|e| armor_error(format!("Invalid base64 in armor: {e}")))?;
        self.carry.drain(..whole);
        self.crc.update(&decoded);
        self.decoded = decoded;
        self.position = 0;
        Ok(())
    }

    fn finish_block(&mut self, expected_crc: Option<u32>, footer: &str) -> io::Result<()> {
        if !self.carry.is_empty() {
            return Err(armor_error("Armor data ends with an incomplete base64 group"));
        }
        if let Some(expected) = expected_crc {
            if expected != self.crc.value() {
                return Err(armor_error(format!(
                    "Armor checksum mismatch: expected {:06X}, got {:06X}",
                    expected,
                    self.crc.value()
                )));
            }
        }
        let label = footer
            .strip_prefix("-----END ")
            .and_then(|rest| rest.strip_suffix("-----"))
            .ok_or_else(|| armor_error(format!("Invalid armor footer: {footer}")))?;
        if label != self.kind.label() {
            return Err(armor_error(format!(
                "Armor footer '{}' does not match header '{}'",
                label,
                self.kind.label()
            )));
        }
        self.finished = true;
        Ok(())
    }

    fn next_line(&mut self) -> io::Result<String> {
        let mut line = String::new();
        if !read_line(&mut self.inner, &mut line).map_err(PgpError::into_io)? {
            return Err(armor_error("Truncated armor: missing footer"));
        }
        Ok(line)
    }

    /// Decodes lines until there is data to hand out or the footer is reached
    fn fill(&mut self) -> io::Result<()> {
        while self.position == self.decoded.len() && !self.finished {
            let line = self.next_line()?;
            if line.starts_with("-----END ") {
                self.finish_block(None, &line)?;
            } else if let Some(encoded) = line.strip_prefix('=') {
                let bytes = general_purpose::STANDARD
                    .decode(encoded)
                    .map_err(|_| armor_error("Invalid armor checksum encoding"))?;
                if bytes.len() != 3 {
                    return Err(armor_error("Armor checksum must be three bytes"));
                }
                let expected =
                    ((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | bytes[2] as u32;
                let footer = self.next_line()?;
                self.finish_block(Some(expected), &footer)?;
            } else if line.is_empty() {
                continue;
            } else if is_base64_line(&line) {
                self.take_data_line(&line)?;
            } else {
                return Err(armor_error(format!("Invalid armor line: {line}")));
            }
        }
        Ok(())
    }
}

impl<R: BufRead> Read for ArmorReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.fill()?;
        let available = &self.decoded[self.position..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.position += n;
        Ok(n)
    }
}

/// Reads one line without its terminator; false at end of input
fn read_line<R: BufRead>(reader: &mut R, line: &mut String) -> Result<bool> {
    line.clear();
    let mut raw = Vec::new();
    let read = reader
        .take(MAX_ARMOR_LINE_LENGTH as u64 + 1)
        .read_until(b'\n', &mut raw)?;
    if read == 0 {
        return Ok(false);
    }
    if raw.len() > MAX_ARMOR_LINE_LENGTH && !raw.ends_with(b"\n") {
        return Err(PgpError::parse("Armor line too long"));
    }
    let text = std::str::from_utf8(&raw).map_err(|_| PgpError::parse("Armor is not valid UTF-8"))?;
    line.push_str(text.trim_end_matches(['\r', '\n']).trim_end());
    Ok(true)
}

/// Check if a line contains only base64 characters
fn is_base64_line(line: &str) -> bool {
    !line.is_empty()
        && line
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '=')
}
