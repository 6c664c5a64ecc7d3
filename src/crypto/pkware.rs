//! The traditional PKWARE stream cipher ("ZipCrypto").
//!
//! See APPNOTE section 6.1. It's weak, but it's everywhere.

use std::io::{self, Read, Write};

use camino::Utf8PathBuf;
use rand::RngCore;

use crate::result::*;

/// Every encrypted entry starts with this many bytes of encrypted header.
pub const HEADER_LEN: usize = 12;

const fn make_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xedb88320
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC_TABLE: [u32; 256] = make_crc_table();

fn crc32_step(crc: u32, byte: u8) -> u32 {
    (crc >> 8) ^ CRC_TABLE[((crc ^ byte as u32) & 0xff) as usize]
}

/// The cipher's three 32-bit keys
#[derive(Debug, Clone)]
pub struct Keys {
    key0: u32,
    key1: u32,
    key2: u32,
}

impl Keys {
    pub fn new(password: &[u8]) -> Self {
        let mut keys = Self {
            key0: 0x12345678,
            key1: 0x23456789,
            key2: 0x34567890,
        };
        for &b in password {
            keys.update(b);
        }
        keys
    }

    fn update(&mut self, plain: u8) {
        self.key0 = crc32_step(self.key0, plain);
        self.key1 = self
            .key1
            .wrapping_add(self.key0 & 0xff)
            .wrapping_mul(134775813)
            .wrapping_add(1);
        self.key2 = crc32_step(self.key2, (self.key1 >> 24) as u8);
    }

    fn stream_byte(&self) -> u8 {
        let temp = (self.key2 | 2) as u16;
        (temp.wrapping_mul(temp ^ 1) >> 8) as u8
    }

    pub fn decrypt_byte(&mut self, cipher: u8) -> u8 {
        let plain = cipher ^ self.stream_byte();
        self.update(plain);
        plain
    }

    pub fn encrypt_byte(&mut self, plain: u8) -> u8 {
        let cipher = plain ^ self.stream_byte();
        self.update(plain);
        cipher
    }
}

/// The byte the last header byte must decrypt to:
/// the high byte of the CRC, or of the DOS time when a data descriptor
/// means the CRC wasn't known when the header was written.
pub fn check_byte(crc32: u32, last_modified_time: u16, data_descriptor: bool) -> u8 {
    if data_descriptor {
        (last_modified_time >> 8) as u8
    } else {
        (crc32 >> 24) as u8
    }
}

/// Decrypts an entry's data, having already checked the password
pub struct PkwareReader<R> {
    inner: R,
    keys: Keys,
}

impl<R: Read> PkwareReader<R> {
    /// Reads and decrypts the 12-byte header,
    /// failing with [`ZipError::IncorrectPassword`] if it doesn't end with
    /// `check`.
    pub fn new(mut inner: R, password: &[u8], check: u8, path: &Utf8PathBuf) -> ZipResult<Self> {
        let mut keys = Keys::new(password);
        let mut header = [0u8; HEADER_LEN];
        inner.read_exact(&mut header)?;
        for b in header.iter_mut() {
            *b = keys.decrypt_byte(*b);
        }
        // Only one byte of check, so one wrong password in 256 gets through.
        // The CRC catches those later.
        if header[HEADER_LEN - 1] != check {
            return Err(ZipError::IncorrectPassword(path.clone()));
        }
        Ok(Self { inner, keys })
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for PkwareReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = self.inner.read(buf)?;
        for b in buf[..count].iter_mut() {
            *b = self.keys.decrypt_byte(*b);
        }
        Ok(count)
    }
}

pub struct PkwareWriter<W> {
    inner: W,
    keys: Keys,
    buffer: Vec<u8>,
}

impl<W: Write> PkwareWriter<W> {
    /// Writes the encrypted header: eleven random bytes and `check`.
    pub fn new(mut inner: W, password: &[u8], check: u8) -> io::Result<Self> {
        let mut keys = Keys::new(password);
        let mut header = [0u8; HEADER_LEN];
        rand::thread_rng().fill_bytes(&mut header[..HEADER_LEN - 1]);
        header[HEADER_LEN - 1] = check;
        for b in header.iter_mut() {
            *b = keys.encrypt_byte(*b);
        }
        inner.write_all(&header)?;
        Ok(Self {
            inner,
            keys,
            buffer: Vec::new(),
        })
    }

    pub fn finish(mut self) -> io::Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for PkwareWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.clear();
        self.buffer
            .extend(buf.iter().map(|&b| self.keys.encrypt_byte(b)));
        self.inner.write_all(&self.buffer)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn crc_table_matches_crc32fast() {
        let data = b"The quick brown fox jumps over the lazy dog";
        let ours = !data.iter().fold(!0u32, |crc, &b| crc32_step(crc, b));
        assert_eq!(ours, crc32fast::hash(data));
    }

    #[test]
    fn round_trip() -> ZipResult<()> {
        let path: Utf8PathBuf = "secret.txt".into();
        let mut writer = PkwareWriter::new(Vec::new(), b"hunter2", 0xAB)?;
        writer.write_all(b"attack at dawn")?;
        let ciphertext = writer.finish()?;
        assert_eq!(ciphertext.len(), HEADER_LEN + 14);
        assert_ne!(&ciphertext[HEADER_LEN..], b"attack at dawn");

        let mut reader = PkwareReader::new(&ciphertext[..], b"hunter2", 0xAB, &path)?;
        let mut plaintext = Vec::new();
        reader.read_to_end(&mut plaintext)?;
        assert_eq!(plaintext, b"attack at dawn");
        Ok(())
    }

    #[test]
    fn wrong_check_byte_is_a_wrong_password() -> ZipResult<()> {
        let path: Utf8PathBuf = "secret.txt".into();
        let mut writer = PkwareWriter::new(Vec::new(), b"hunter2", 0xAB)?;
        writer.write_all(b"attack at dawn")?;
        let ciphertext = writer.finish()?;
        // Same password, but the expected check byte differs.
        assert!(matches!(
            PkwareReader::new(&ciphertext[..], b"hunter2", 0xAC, &path),
            Err(ZipError::IncorrectPassword(_))
        ));
        Ok(())
    }

    #[test]
    fn check_byte_source() {
        assert_eq!(check_byte(0x12345678, 0xBEEF, false), 0x12);
        assert_eq!(check_byte(0x12345678, 0xBEEF, true), 0xBE);
    }
}
