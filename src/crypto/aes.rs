//! WinZip AES encryption (AE-1 and AE-2)
//!
//! Each entry gets a random salt. PBKDF2-HMAC-SHA1 stretches the password
//! and salt into an AES key, an HMAC key, and a two-byte password verifier.
//! Data is encrypted with AES in counter mode and authenticated with
//! HMAC-SHA1 over the ciphertext, truncated to ten bytes.
//!
//! On disk: `salt | verifier | ciphertext | authentication code`.

use std::io::{self, Read, Write};

use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Aes192, Aes256, Block};
use camino::Utf8PathBuf;
use hmac::{Hmac, Mac};
use log::*;
use rand::RngCore;
use sha1::Sha1;

use crate::result::*;

pub const PASSWORD_VERIFIER_LEN: usize = 2;
pub const AUTH_CODE_LEN: usize = 10;
const PBKDF2_ITERATIONS: u32 = 1000;
pub const BLOCK_LEN: usize = 16;

type HmacSha1 = Hmac<Sha1>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AesStrength {
    Aes128,
    Aes192,
    Aes256,
}

impl AesStrength {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            1 => Some(AesStrength::Aes128),
            2 => Some(AesStrength::Aes192),
            3 => Some(AesStrength::Aes256),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            AesStrength::Aes128 => 1,
            AesStrength::Aes192 => 2,
            AesStrength::Aes256 => 3,
        }
    }

    pub fn key_len(self) -> usize {
        match self {
            AesStrength::Aes128 => 16,
            AesStrength::Aes192 => 24,
            AesStrength::Aes256 => 32,
        }
    }

    pub fn salt_len(self) -> usize {
        self.key_len() / 2
    }

    /// Bytes of salt, verifier and MAC added around the ciphertext
    pub fn overhead(self) -> u64 {
        (self.salt_len() + PASSWORD_VERIFIER_LEN + AUTH_CODE_LEN) as u64
    }
}

/// AE-1 entries store (and check) a CRC; AE-2 entries store zero
/// and rely on the MAC alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AesVendorVersion {
    Ae1,
    Ae2,
}

impl AesVendorVersion {
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            1 => Some(AesVendorVersion::Ae1),
            2 => Some(AesVendorVersion::Ae2),
            _ => None,
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            AesVendorVersion::Ae1 => 1,
            AesVendorVersion::Ae2 => 2,
        }
    }
}

/// An AES block cipher with any of the three key sizes
#[derive(Clone)]
pub enum AesCipher {
    Aes128(Aes128),
    Aes192(Aes192),
    Aes256(Aes256),
}

impl AesCipher {
    pub fn new(key: &[u8]) -> ZipResult<Self> {
        let bad_key = |_| ZipError::InvalidArchive("Bad AES key length");
        Ok(match key.len() {
            16 => AesCipher::Aes128(Aes128::new_from_slice(key).map_err(bad_key)?),
            24 => AesCipher::Aes192(Aes192::new_from_slice(key).map_err(bad_key)?),
            32 => AesCipher::Aes256(Aes256::new_from_slice(key).map_err(bad_key)?),
            _ => return Err(ZipError::InvalidArchive("Bad AES key length")),
        })
    }

    pub fn encrypt_block(&self, block: &mut [u8; BLOCK_LEN]) {
        let block = Block::from_mut_slice(&mut block[..]);
        match self {
            AesCipher::Aes128(c) => c.encrypt_block(block),
            AesCipher::Aes192(c) => c.encrypt_block(block),
            AesCipher::Aes256(c) => c.encrypt_block(block),
        }
    }

    pub fn decrypt_block(&self, block: &mut [u8; BLOCK_LEN]) {
        let block = Block::from_mut_slice(&mut block[..]);
        match self {
            AesCipher::Aes128(c) => c.decrypt_block(block),
            AesCipher::Aes192(c) => c.decrypt_block(block),
            AesCipher::Aes256(c) => c.decrypt_block(block),
        }
    }
}

/// AES in counter mode, WinZip flavor.
///
/// The counter is a 128-bit little-endian integer starting at 1:
/// the first byte increments, carrying into the next.
/// Encryption and decryption are the same XOR.
pub struct AesCtr {
    cipher: AesCipher,
    counter: [u8; BLOCK_LEN],
    keystream: [u8; BLOCK_LEN],
    /// How much of `keystream` has been used
    used: usize,
}

impl AesCtr {
    pub fn new(cipher: AesCipher) -> Self {
        Self {
            cipher,
            counter: [0; BLOCK_LEN],
            keystream: [0; BLOCK_LEN],
            used: BLOCK_LEN,
        }
    }

    fn next_block(&mut self) {
        for b in self.counter.iter_mut() {
            *b = b.wrapping_add(1);
            if *b != 0 {
                break;
            }
        }
        self.keystream = self.counter;
        self.cipher.encrypt_block(&mut self.keystream);
        self.used = 0;
    }

    pub fn apply_keystream(&mut self, data: &mut [u8]) {
        for b in data.iter_mut() {
            if self.used == BLOCK_LEN {
                self.next_block();
            }
            *b ^= self.keystream[self.used];
            self.used += 1;
        }
    }
}

/// Everything PBKDF2 gives us for one entry
pub struct DerivedKeys {
    pub encryption: Vec<u8>,
    pub authentication: Vec<u8>,
    pub verifier: [u8; PASSWORD_VERIFIER_LEN],
}

pub fn derive_keys(password: &[u8], salt: &[u8], strength: AesStrength) -> DerivedKeys {
    let key_len = strength.key_len();
    let mut derived = vec![0u8; 2 * key_len + PASSWORD_VERIFIER_LEN];
    pbkdf2::pbkdf2_hmac::<Sha1>(password, salt, PBKDF2_ITERATIONS, &mut derived);
    let verifier = [derived[2 * key_len], derived[2 * key_len + 1]];
    derived.truncate(2 * key_len);
    let authentication = derived.split_off(key_len);
    DerivedKeys {
        encryption: derived,
        authentication,
        verifier,
    }
}

fn new_mac(key: &[u8]) -> ZipResult<HmacSha1> {
    <HmacSha1 as Mac>::new_from_slice(key)
        .map_err(|_| ZipError::InvalidArchive("Bad HMAC key length"))
}

/// Decrypts (and authenticates) an AES-encrypted entry.
///
/// The inner reader must yield exactly the entry's compressed data,
/// salt to authentication code.
pub struct AesReader<R> {
    inner: R,
    ctr: AesCtr,
    mac: HmacSha1,
    /// Ciphertext bytes left before the authentication code
    remaining: u64,
    verified: bool,
    path: Utf8PathBuf,
}

impl<R: Read> AesReader<R> {
    pub fn new(
        mut inner: R,
        password: &[u8],
        strength: AesStrength,
        compressed_size: u64,
        path: &Utf8PathBuf,
    ) -> ZipResult<Self> {
        let remaining = compressed_size
            .checked_sub(strength.overhead())
            .ok_or(ZipError::InvalidArchive(
                "AES entry too short for its salt and MAC",
            ))?;
        let mut salt = vec![0u8; strength.salt_len()];
        inner.read_exact(&mut salt)?;
        let mut verifier = [0u8; PASSWORD_VERIFIER_LEN];
        inner.read_exact(&mut verifier)?;

        let keys = derive_keys(password, &salt, strength);
        if keys.verifier != verifier {
            return Err(ZipError::IncorrectPassword(path.clone()));
        }
        let ctr = AesCtr::new(AesCipher::new(&keys.encryption)?);
        let mac = new_mac(&keys.authentication)?;
        Ok(Self {
            inner,
            ctr,
            mac,
            remaining,
            verified: false,
            path: path.clone(),
        })
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn check_auth_code(&mut self) -> ZipResult<()> {
        if self.verified {
            return Ok(());
        }
        self.verified = true;
        let mut code = [0u8; AUTH_CODE_LEN];
        self.inner.read_exact(&mut code)?;
        self.mac.clone().verify_truncated_left(&code).map_err(|_| {
            warn!("Authentication code mismatch for {}", self.path);
            ZipError::IncorrectPassword(self.path.clone())
        })
    }
}

impl<R: Read> Read for AesReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.remaining == 0 {
            self.check_auth_code()?;
            return Ok(0);
        }
        let wanted = std::cmp::min(buf.len() as u64, self.remaining) as usize;
        let count = self.inner.read(&mut buf[..wanted])?;
        if count == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "AES entry ended early",
            ));
        }
        self.mac.update(&buf[..count]);
        self.ctr.apply_keystream(&mut buf[..count]);
        self.remaining -= count as u64;
        // Check as soon as we've seen the last byte:
        // decompressors often stop reading without hitting EOF.
        if self.remaining == 0 {
            self.check_auth_code()?;
        }
        Ok(count)
    }
}

/// Encrypts an entry, writing salt and verifier up front
/// and the authentication code on [`finish()`](Self::finish).
pub struct AesWriter<W> {
    inner: W,
    ctr: AesCtr,
    mac: HmacSha1,
    buffer: Vec<u8>,
}

impl<W: Write> AesWriter<W> {
    pub fn new(mut inner: W, password: &[u8], strength: AesStrength) -> ZipResult<Self> {
        let mut salt = vec![0u8; strength.salt_len()];
        rand::thread_rng().fill_bytes(&mut salt);
        let keys = derive_keys(password, &salt, strength);
        inner.write_all(&salt)?;
        inner.write_all(&keys.verifier)?;
        Ok(Self {
            inner,
            ctr: AesCtr::new(AesCipher::new(&keys.encryption)?),
            mac: new_mac(&keys.authentication)?,
            buffer: Vec::new(),
        })
    }

    pub fn finish(mut self) -> io::Result<W> {
        let code = self.mac.finalize().into_bytes();
        self.inner.write_all(&code[..AUTH_CODE_LEN])?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for AesWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.clear();
        self.buffer.extend_from_slice(buf);
        self.ctr.apply_keystream(&mut self.buffer);
        self.mac.update(&self.buffer);
        self.inner.write_all(&self.buffer)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
