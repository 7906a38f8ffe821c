//! Compressed data packet bodies (tag 8).
//!
//! The body is one algorithm octet followed by the compressed stream. ZIP is
//! raw DEFLATE and ZLIB is DEFLATE with the zlib wrapper; both come from
//! `flate2`.

use crate::crypto::CompressionAlgorithm;
use crate::error::{PgpError, Result};
use flate2::read::{DeflateDecoder, ZlibDecoder};
use flate2::write::{DeflateEncoder, ZlibEncoder};
use flate2::Compression;
use std::io::{self, Read, Write};

/// Streaming compressor for the body of a compressed data packet
pub enum Compressor<W: Write> {
    /// Raw DEFLATE
    Zip(DeflateEncoder<W>),
    /// ZLIB
    Zlib(ZlibEncoder<W>),
}

impl<W: Write> Compressor<W> {
    /// Writes the algorithm octet and starts compressing
    pub fn new(mut inner: W, algorithm: CompressionAlgorithm) -> Result<Self> {
        let level = Compression::default();
        match algorithm {
            CompressionAlgorithm::Zip => {
                inner.write_all(&[algorithm.to_u8()])?;
                Ok(Self::Zip(DeflateEncoder::new(inner, level)))
            }
            CompressionAlgorithm::Zlib => {
                inner.write_all(&[algorithm.to_u8()])?;
                Ok(Self::Zlib(ZlibEncoder::new(inner, level)))
            }
            CompressionAlgorithm::Bzip2 => Err(PgpError::unsupported(
                "BZip2 compression is not supported",
            )),
            CompressionAlgorithm::Uncompressed => Err(PgpError::invalid_input(
                "Uncompressed output does not use a compressed data packet",
            )),
        }
    }

    /// Flushes the compressed stream and returns the underlying writer
    pub fn finish(self) -> io::Result<W> {
        match self {
            Self::Zip(encoder) => encoder.finish(),
            Self::Zlib(encoder) => encoder.finish(),
        }
    }
}

impl<W: Write> Write for Compressor<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Zip(encoder) => encoder.write(buf),
            Self::Zlib(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Zip(encoder) => encoder.flush(),
            Self::Zlib(encoder) => encoder.flush(),
        }
    }
}

/// Streaming decompressor over the body of a compressed data packet
pub enum Decompressor<R: Read> {
    /// Algorithm 0: the body is stored as is
    Stored(R),
    /// Raw DEFLATE
    Zip(DeflateDecoder<R>),
    /// ZLIB
    Zlib(ZlibDecoder<R>),
}

impl<R: Read> Decompressor<R> {
    /// Reads the algorithm octet and sets up decompression
    pub fn new(mut body: R) -> Result<Self> {
        let mut octet = [0u8; 1];
        body.read_exact(&mut octet).map_err(|err| match err.kind() {
            io::ErrorKind::UnexpectedEof => PgpError::parse("Empty compressed data packet"),
            _ => PgpError::from(err),
        })?;

        match CompressionAlgorithm::from_u8(octet[0]) {
            Some(CompressionAlgorithm::Uncompressed) => Ok(Self::Stored(body)),
            Some(CompressionAlgorithm::Zip) => Ok(Self::Zip(DeflateDecoder::new(body))),
            Some(CompressionAlgorithm::Zlib) => Ok(Self::Zlib(ZlibDecoder::new(body))),
            Some(CompressionAlgorithm::Bzip2) => Err(PgpError::unsupported(
                "BZip2 compressed data is not supported",
            )),
            None => Err(PgpError::unsupported(format!(
                "Unknown compression algorithm {}",
                octet[0]
            ))),
        }
    }
}

impl<R: Read> Read for Decompressor<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Stored(body) => body.read(buf),
            Self::Zip(decoder) => decoder.read(buf),
            Self::Zlib(decoder) => decoder.read(buf),
        }
    }
}
