//! Encryption schemes, and the readers and writers that apply them
//! to entry data.

use std::io::{self, Read, Write};

pub mod aes;
pub mod pkware;
pub mod strong;

use self::aes::{AesReader, AesStrength, AesVendorVersion, AesWriter};
use self::pkware::{PkwareReader, PkwareWriter};
use self::strong::{StrongAlgorithm, StrongReader, StrongWriter};

/// How an entry's data is encrypted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncryptionMethod {
    None,
    /// The traditional PKWARE stream cipher
    Pkware,
    /// WinZip AES
    Aes {
        strength: AesStrength,
        vendor_version: AesVendorVersion,
    },
    /// PKWARE Strong Encryption
    Strong(StrongAlgorithm),
}

impl EncryptionMethod {
    pub fn is_encrypted(&self) -> bool {
        *self != EncryptionMethod::None
    }

    /// AE-1, which is what we write
    pub fn aes(strength: AesStrength) -> Self {
        EncryptionMethod::Aes {
            strength,
            vendor_version: AesVendorVersion::Ae1,
        }
    }
}

/// Decrypts entry data with whichever scheme it was encrypted with.
pub enum Decryptor<R: Read> {
    None(R),
    Pkware(PkwareReader<R>),
    Aes(AesReader<R>),
    Strong(StrongReader<R>),
}

impl<R: Read> Decryptor<R> {
    pub fn into_inner(self) -> R {
        match self {
            Decryptor::None(r) => r,
            Decryptor::Pkware(r) => r.into_inner(),
            Decryptor::Aes(r) => r.into_inner(),
            Decryptor::Strong(r) => r.into_inner(),
        }
    }
}

impl<R: Read> Read for Decryptor<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Decryptor::None(r) => r.read(buf),
            Decryptor::Pkware(r) => r.read(buf),
            Decryptor::Aes(r) => r.read(buf),
            Decryptor::Strong(r) => r.read(buf),
        }
    }
}

/// Encrypts entry data, header (and trailer) included.
pub enum Encryptor<W: Write> {
    None(W),
    Pkware(PkwareWriter<W>),
    Aes(AesWriter<W>),
    Strong(StrongWriter<W>),
}

impl<W: Write> Encryptor<W> {
    /// Writes any trailing MAC or padding and returns the inner writer.
    pub fn finish(self) -> io::Result<W> {
        match self {
            Encryptor::None(w) => Ok(w),
            Encryptor::Pkware(w) => w.finish(),
            Encryptor::Aes(w) => w.finish(),
            Encryptor::Strong(w) => w.finish(),
        }
    }
}

impl<W: Write> Write for Encryptor<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Encryptor::None(w) => w.write(buf),
            Encryptor::Pkware(w) => w.write(buf),
            Encryptor::Aes(w) => w.write(buf),
            Encryptor::Strong(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Encryptor::None(w) => w.flush(),
            Encryptor::Pkware(w) => w.flush(),
            Encryptor::Aes(w) => w.flush(),
            Encryptor::Strong(w) => w.flush(),
        }
    }
}
