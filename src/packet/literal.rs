//! Literal data packet header (tag 11).
//!
//! The body is a short header (format, file name, date) followed by the
//! payload, which is streamed and never held here.

use crate::error::{PgpError, Result};
use crate::validation::Validator;
use std::io::{self, Read, Write};

/// File name recorded for data that did not come from a file
pub const CONSOLE_FILE_NAME: &str = "_CONSOLE";

/// Literal data format octet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralFormat {
    /// `b`: binary data
    Binary,
    /// `t`: text with canonical line endings
    Text,
    /// `u`: UTF-8 text
    Utf8,
    /// Any other format octet
    Other(u8),
}

impl LiteralFormat {
    /// Convert byte value to format
    pub fn from_u8(octet: u8) -> Self {
        match octet {
            b'b' => Self::Binary,
            b't' => Self::Text,
            b'u' => Self::Utf8,
            other => Self::Other(other),
        }
    }

    /// Convert format to byte value
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Binary => b'b',
            Self::Text => b't',
            Self::Utf8 => b'u',
            Self::Other(octet) => octet,
        }
    }
}

/// Header fields of a literal data packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralData {
    /// Data format
    pub format: LiteralFormat,
    /// File name, decoded lossily from the packet
    pub file_name: String,
    /// Modification date as a 32-bit timestamp
    pub date: u32,
}

impl LiteralData {
    /// Create a new binary literal header
    pub fn binary(file_name: &str, date: u32) -> Result<Self> {
        Validator::validate_file_name(file_name)?;
        Ok(Self {
            format: LiteralFormat::Binary,
            file_name: file_name.to_string(),
            date,
        })
    }

    /// Reads the header from the start of a literal packet body
    pub fn read_header<R: Read>(body: &mut R) -> Result<Self> {
        let mut fixed = [0u8; 2];
        read_exact(body, &mut fixed)?;
        let mut name = vec![0u8; fixed[1] as usize];
        read_exact(body, &mut name)?;
        let mut date = [0u8; 4];
        read_exact(body, &mut date)?;

        Ok(Self {
            format: LiteralFormat::from_u8(fixed[0]),
            file_name: String::from_utf8_lossy(&name).into_owned(),
            date: u32::from_be_bytes(date),
        })
    }

    /// Writes the header; the payload follows directly
    pub fn write_header<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let name = self.file_name.as_bytes();
        let name_len = u8::try_from(name.len()).map_err(|_| {
            PgpError::invalid_input("Literal file name longer than 255 bytes").into_io()
        })?;
        out.write_all(&[self.format.to_u8(), name_len])?;
        out.write_all(name)?;
        out.write_all(&self.date.to_be_bytes())
    }
}

fn read_exact<R: Read>(body: &mut R, buf: &mut [u8]) -> Result<()> {
    body.read_exact(buf).map_err(|err| match err.kind() {
        io::ErrorKind::UnexpectedEof => PgpError::parse("Truncated literal data header"),
        _ => PgpError::from(err),
    })
}
