//! Compression codecs.
//!
//! We only speak Stored and Deflate. Everything else is somebody else's
//! algorithm, and reading it fails with
//! [`ZipError::UnsupportedCompressionMethod`].

use std::io::{self, Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::result::*;
use crate::spec::CompressionMethod;

/// Decompresses entry data.
pub enum Decompressor<R: Read> {
    Stored(R),
    Deflate(DeflateDecoder<R>),
}

impl<R: Read> Decompressor<R> {
    pub fn new(method: CompressionMethod, inner: R) -> ZipResult<Self> {
        match method {
            CompressionMethod::Stored => Ok(Decompressor::Stored(inner)),
            CompressionMethod::Deflate => Ok(Decompressor::Deflate(DeflateDecoder::new(inner))),
            CompressionMethod::Unsupported(m) => Err(ZipError::UnsupportedCompressionMethod(m)),
        }
    }

    pub fn into_inner(self) -> R {
        match self {
            Decompressor::Stored(r) => r,
            Decompressor::Deflate(r) => r.into_inner(),
        }
    }
}

impl<R: Read> Read for Decompressor<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Decompressor::Stored(r) => r.read(buf),
            Decompressor::Deflate(r) => r.read(buf),
        }
    }
}

/// Compresses entry data.
pub enum Compressor<W: Write> {
    Stored(W),
    Deflate(DeflateEncoder<W>),
}

impl<W: Write> Compressor<W> {
    /// `level` is flate2's 0-9; `None` picks the default.
    pub fn new(method: CompressionMethod, level: Option<u32>, inner: W) -> ZipResult<Self> {
        match method {
            CompressionMethod::Stored => Ok(Compressor::Stored(inner)),
            CompressionMethod::Deflate => {
                let level = level.map(Compression::new).unwrap_or_default();
                Ok(Compressor::Deflate(DeflateEncoder::new(inner, level)))
            }
            CompressionMethod::Unsupported(m) => Err(ZipError::UnsupportedCompressionMethod(m)),
        }
    }

    /// Flushes any buffered output and returns the inner writer.
    pub fn finish(self) -> io::Result<W> {
        match self {
            Compressor::Stored(w) => Ok(w),
            Compressor::Deflate(w) => w.finish(),
        }
    }
}

impl<W: Write> Write for Compressor<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Compressor::Stored(w) => w.write(buf),
            Compressor::Deflate(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Compressor::Stored(w) => w.flush(),
            Compressor::Deflate(w) => w.flush(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn deflate_round_trip() -> ZipResult<()> {
        let text = b"It was the best of times, it was the worst of times. ".repeat(50);
        let mut compressor = Compressor::new(CompressionMethod::Deflate, Some(9), Vec::new())?;
        compressor.write_all(&text)?;
        let compressed = compressor.finish()?;
        assert!(compressed.len() < text.len());

        let mut decompressor = Decompressor::new(CompressionMethod::Deflate, &compressed[..])?;
        let mut decompressed = Vec::new();
        decompressor.read_to_end(&mut decompressed)?;
        assert_eq!(decompressed, text);
        Ok(())
    }

    #[test]
    fn unsupported_methods() {
        // 12 is bzip2
        assert!(matches!(
            Decompressor::new(CompressionMethod::from_u16(12), &b""[..]),
            Err(ZipError::UnsupportedCompressionMethod(12))
        ));
        assert!(matches!(
            Compressor::new(CompressionMethod::from_u16(14), None, Vec::new()),
            Err(ZipError::UnsupportedCompressionMethod(14))
        ));
    }
}
