//! Helper module to compute a CRC32 checksum (and count bytes)
//!
//! Originally borrowed from zip-rs:
//! <https://github.com/mvdnes/zip-rs/commit/b3c836d9c32efa120cdd5366280f940d3c3b985c>

use std::io;
use std::io::prelude::*;

use camino::Utf8PathBuf;
use crc32fast::Hasher;

use crate::result::*;

/// What the central directory says we should end up with
#[derive(Debug, Clone)]
pub struct Expected {
    pub path: Utf8PathBuf,
    /// `None` when there's no CRC to check (WinZip AE-2)
    pub crc32: Option<u32>,
    pub size: u64,
    /// A bad CRC after a PKWARE password check passed
    /// probably means the password was wrong.
    pub password_hint: bool,
}

/// Reader that validates the CRC32 and size when it reaches the EOF.
pub struct Crc32Reader<R> {
    inner: R,
    hasher: Hasher,
    count: u64,
    expected: Expected,
}

impl<R> Crc32Reader<R> {
    pub fn new(inner: R, expected: Expected) -> Crc32Reader<R> {
        Crc32Reader {
            inner,
            hasher: Hasher::new(),
            count: 0,
            expected,
        }
    }

    fn check(&self) -> ZipResult<()> {
        if self.count != self.expected.size {
            return Err(ZipError::SizeMismatch {
                path: self.expected.path.clone(),
                expected: self.expected.size,
                actual: self.count,
            });
        }
        if let Some(expected) = self.expected.crc32 {
            let actual = self.hasher.clone().finalize();
            if actual != expected {
                return Err(ZipError::ChecksumMismatch {
                    path: self.expected.path.clone(),
                    expected,
                    actual,
                    password_hint: self.expected.password_hint,
                });
            }
        }
        Ok(())
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for Crc32Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = match self.inner.read(buf) {
            Ok(0) if !buf.is_empty() => {
                self.check()?;
                0
            }
            Ok(n) => n,
            Err(e) => return Err(e),
        };
        self.hasher.update(&buf[0..count]);
        self.count += count as u64;
        if self.count > self.expected.size {
            return Err(ZipError::SizeMismatch {
                path: self.expected.path.clone(),
                expected: self.expected.size,
                actual: self.count,
            }
            .into());
        }
        Ok(count)
    }
}
