//! PKWARE Strong Encryption, password mode (APPNOTE section 7)
//!
//! Each encrypted entry (or encrypted central directory) begins with a
//! decryption header:
//!
//! ```text
//! IVSize   2 bytes   Size of initialization vector (IV)
//! IVData   IVSize    Initialization vector for this file
//! Size     4 bytes   Size of remaining decryption header data
//! Format   2 bytes   Format definition for this record
//! AlgID    2 bytes   Encryption algorithm identifier
//! Bitlen   2 bytes   Bit length of encryption key
//! Flags    2 bytes   Processing flags
//! ErdSize  2 bytes   Size of Encrypted Random Data
//! ErdData  ErdSize   Encrypted Random Data
//! RCount   4 bytes   Number of Recipients.
//! HashAlg  2 bytes   Hash algorithm identifier
//! HSize    2 bytes   Hash size
//! SRList   (var)     Simple list of recipients hashed public keys
//! VSize    2 bytes   Size of password validation data
//! VData    VSize     Encrypted password validation data
//! ```
//!
//! (`HashAlg` through `SRList` are only present when `RCount` is non-zero.)
//!
//! The password is hashed and stretched into a master key,
//! which decrypts the random data. The IV and the random data together
//! give the file key, which decrypts the validation data (whose last four
//! bytes are the CRC-32 of the rest) and then the payload.
//! Everything is AES in CBC mode, padded PKCS#7 style.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt};
use camino::Utf8PathBuf;
use rand::RngCore;
use sha1::{Digest, Sha1};

use super::aes::{AesCipher, BLOCK_LEN};
use crate::cursor::{to_bytes, DataInput};
use crate::result::*;

/// The only decryption header format there is
pub const FORMAT: u16 = 3;
pub const FLAG_PASSWORD: u16 = 0x0001;
pub const FLAG_CERTIFICATES: u16 = 0x0002;
pub const IV_LEN: usize = 16;
const VALIDATION_LEN: usize = 16;

/// Strong Encryption's AES variants, by algorithm ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrongAlgorithm {
    Aes128,
    Aes192,
    Aes256,
    Unsupported(u16),
}

impl StrongAlgorithm {
    pub fn from_id(id: u16) -> Self {
        match id {
            0x660e => StrongAlgorithm::Aes128,
            0x660f => StrongAlgorithm::Aes192,
            0x6610 => StrongAlgorithm::Aes256,
            other => StrongAlgorithm::Unsupported(other),
        }
    }

    pub fn id(self) -> u16 {
        match self {
            StrongAlgorithm::Aes128 => 0x660e,
            StrongAlgorithm::Aes192 => 0x660f,
            StrongAlgorithm::Aes256 => 0x6610,
            StrongAlgorithm::Unsupported(other) => other,
        }
    }

    pub fn key_len(self) -> ZipResult<usize> {
        match self {
            StrongAlgorithm::Aes128 => Ok(16),
            StrongAlgorithm::Aes192 => Ok(24),
            StrongAlgorithm::Aes256 => Ok(32),
            StrongAlgorithm::Unsupported(other) => Err(ZipError::UnsupportedEncryptionMethod(
                format!("Strong Encryption algorithm {:#06x}", other),
            )),
        }
    }

    pub fn bit_length(self) -> u16 {
        match self {
            StrongAlgorithm::Aes128 => 128,
            StrongAlgorithm::Aes192 => 192,
            StrongAlgorithm::Aes256 => 256,
            StrongAlgorithm::Unsupported(_) => 0,
        }
    }
}

/// Stretches a SHA-1 hash into a key of up to 40 bytes,
/// the way CryptDeriveKey does.
pub fn derive_key(hash: &[u8], key_len: usize) -> Vec<u8> {
    let mut inner = [0x36u8; 64];
    let mut outer = [0x5cu8; 64];
    for (i, b) in hash.iter().enumerate() {
        inner[i] ^= b;
        outer[i] ^= b;
    }
    let mut key = Sha1::digest(inner).to_vec();
    key.extend_from_slice(&Sha1::digest(outer));
    key.truncate(key_len);
    key
}

fn master_key(password: &[u8], key_len: usize) -> Vec<u8> {
    derive_key(&Sha1::digest(password), key_len)
}

fn file_key(iv: &[u8], random_data: &[u8], key_len: usize) -> Vec<u8> {
    let mut hasher = Sha1::new();
    hasher.update(iv);
    hasher.update(random_data);
    derive_key(&hasher.finalize(), key_len)
}

fn cbc_encrypt(cipher: &AesCipher, chain: &mut [u8; BLOCK_LEN], data: &mut [u8]) {
    debug_assert_eq!(data.len() % BLOCK_LEN, 0);
    for chunk in data.chunks_exact_mut(BLOCK_LEN) {
        let mut block = [0u8; BLOCK_LEN];
        for i in 0..BLOCK_LEN {
            block[i] = chunk[i] ^ chain[i];
        }
        cipher.encrypt_block(&mut block);
        chunk.copy_from_slice(&block);
        *chain = block;
    }
}

fn cbc_decrypt(cipher: &AesCipher, chain: &mut [u8; BLOCK_LEN], data: &mut [u8]) {
    debug_assert_eq!(data.len() % BLOCK_LEN, 0);
    for chunk in data.chunks_exact_mut(BLOCK_LEN) {
        let mut block = [0u8; BLOCK_LEN];
        block.copy_from_slice(chunk);
        let next_chain = block;
        cipher.decrypt_block(&mut block);
        for i in 0..BLOCK_LEN {
            chunk[i] = block[i] ^ chain[i];
        }
        *chain = next_chain;
    }
}

fn pad(data: &mut Vec<u8>) {
    let padding = BLOCK_LEN - data.len() % BLOCK_LEN;
    data.extend(std::iter::repeat(padding as u8).take(padding));
}

/// Returns the length of `data` without its padding,
/// or `None` if the padding is garbage.
fn unpadded_len(data: &[u8]) -> Option<usize> {
    let padding = *data.last()? as usize;
    if padding == 0 || padding > BLOCK_LEN || padding > data.len() {
        return None;
    }
    if data[data.len() - padding..]
        .iter()
        .all(|&b| b as usize == padding)
    {
        Some(data.len() - padding)
    } else {
        None
    }
}

/// Hashed public keys of certificate recipients.
/// We don't do certificates, so these just come along for the ride.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientList {
    pub hash_algorithm: u16,
    pub hash_size: u16,
    pub recipients: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptionHeader {
    pub iv: Vec<u8>,
    pub format: u16,
    pub algorithm: StrongAlgorithm,
    pub bit_length: u16,
    pub flags: u16,
    pub encrypted_random_data: Vec<u8>,
    pub recipients: Option<RecipientList>,
    pub validation_data: Vec<u8>,
}

impl DecryptionHeader {
    pub fn read<R: Read>(input: &mut R) -> ZipResult<Self> {
        let iv_size = input.read_u16::<LittleEndian>()?;
        let mut iv = vec![0u8; iv_size as usize];
        input.read_exact(&mut iv)?;
        let remaining = input.read_u32::<LittleEndian>()?;
        if remaining > 1 << 20 {
            return Err(ZipError::InvalidArchive("Implausibly large decryption header"));
        }
        let mut rest = vec![0u8; remaining as usize];
        input.read_exact(&mut rest)?;

        let mut rest = DataInput::new(io::Cursor::new(&rest[..]));
        let format = rest.read_u16()?;
        let algorithm = StrongAlgorithm::from_id(rest.read_u16()?);
        let bit_length = rest.read_u16()?;
        let flags = rest.read_u16()?;
        let erd_size = rest.read_u16()?;
        let encrypted_random_data = rest.read_bytes(erd_size)?;
        let recipient_count = rest.read_u32()?;
        let recipients = if recipient_count > 0 {
            let hash_algorithm = rest.read_u16()?;
            let hash_size = rest.read_u16()?;
            let mut recipients = Vec::new();
            for _ in 0..recipient_count {
                let size = rest.read_u16()?;
                recipients.push(rest.read_bytes(size)?);
            }
            Some(RecipientList {
                hash_algorithm,
                hash_size,
                recipients,
            })
        } else {
            None
        };
        let validation_size = rest.read_u16()?;
        let validation_data = rest.read_bytes(validation_size)?;
        if rest.position()? != remaining as u64 {
            return Err(ZipError::InvalidArchive(
                "Decryption header size doesn't match its contents",
            ));
        }

        Ok(Self {
            iv,
            format,
            algorithm,
            bit_length,
            flags,
            encrypted_random_data,
            recipients,
            validation_data,
        })
    }

    pub fn to_bytes(&self) -> ZipResult<Vec<u8>> {
        let rest = to_bytes(|out| {
            out.write_u16(self.format)?;
            out.write_u16(self.algorithm.id())?;
            out.write_u16(self.bit_length)?;
            out.write_u16(self.flags)?;
            out.write_len_u16(self.encrypted_random_data.len(), "Random data too long")?;
            out.write_bytes(&self.encrypted_random_data)?;
            match &self.recipients {
                None => out.write_u32(0)?,
                Some(list) => {
                    out.write_u32(list.recipients.len() as u32)?;
                    out.write_u16(list.hash_algorithm)?;
                    out.write_u16(list.hash_size)?;
                    for recipient in &list.recipients {
                        out.write_len_u16(recipient.len(), "Recipient too long")?;
                        out.write_bytes(recipient)?;
                    }
                }
            }
            out.write_len_u16(self.validation_data.len(), "Validation data too long")?;
            out.write_bytes(&self.validation_data)
        })?;
        to_bytes(|out| {
            out.write_len_u16(self.iv.len(), "IV too long")?;
            out.write_bytes(&self.iv)?;
            out.write_u32(rest.len() as u32)?;
            out.write_bytes(&rest)
        })
    }

    /// Builds a header for a fresh password-encrypted stream,
    /// returning it with the file key it protects.
    pub fn generate(password: &[u8], algorithm: StrongAlgorithm) -> ZipResult<(Self, FileKey)> {
        let key_len = algorithm.key_len()?;
        let mut rng = rand::thread_rng();
        let mut iv = [0u8; IV_LEN];
        rng.fill_bytes(&mut iv);
        let mut random_data = vec![0u8; key_len];
        rng.fill_bytes(&mut random_data);

        let master = AesCipher::new(&master_key(password, key_len))?;
        let mut encrypted_random_data = random_data.clone();
        pad(&mut encrypted_random_data);
        cbc_encrypt(&master, &mut iv.clone(), &mut encrypted_random_data);

        let cipher = AesCipher::new(&file_key(&iv, &random_data, key_len))?;
        let mut validation_data = vec![0u8; VALIDATION_LEN];
        rng.fill_bytes(&mut validation_data[..VALIDATION_LEN - 4]);
        let crc = crc32fast::hash(&validation_data[..VALIDATION_LEN - 4]);
        validation_data[VALIDATION_LEN - 4..].copy_from_slice(&crc.to_le_bytes());
        cbc_encrypt(&cipher, &mut iv.clone(), &mut validation_data);

        let header = Self {
            iv: iv.to_vec(),
            format: FORMAT,
            algorithm,
            bit_length: algorithm.bit_length(),
            flags: FLAG_PASSWORD,
            encrypted_random_data,
            recipients: None,
            validation_data,
        };
        Ok((header, FileKey { cipher, iv }))
    }

    /// Recovers the file key from the password,
    /// failing with [`ZipError::IncorrectPassword`] if validation fails.
    pub fn unlock(&self, password: &[u8], path: &Utf8PathBuf) -> ZipResult<FileKey> {
        let key_len = self.algorithm.key_len()?;
        if self.flags & FLAG_PASSWORD == 0 {
            return Err(ZipError::UnsupportedEncryptionMethod(
                "Strong Encryption with certificates only".to_owned(),
            ));
        }
        let iv: [u8; IV_LEN] = self.iv.as_slice().try_into().map_err(|_| {
            ZipError::UnsupportedEncryptionMethod(format!(
                "Strong Encryption with a {}-byte IV",
                self.iv.len()
            ))
        })?;
        let wrong_password = || ZipError::IncorrectPassword(path.clone());

        let mut random_data = self.encrypted_random_data.clone();
        if random_data.is_empty() || random_data.len() % BLOCK_LEN != 0 {
            return Err(ZipError::InvalidArchive("Encrypted random data isn't whole blocks"));
        }
        let master = AesCipher::new(&master_key(password, key_len))?;
        cbc_decrypt(&master, &mut iv.clone(), &mut random_data);
        let random_len = unpadded_len(&random_data).ok_or_else(wrong_password)?;
        random_data.truncate(random_len);

        let cipher = AesCipher::new(&file_key(&iv, &random_data, key_len))?;
        let mut validation = self.validation_data.clone();
        if validation.len() < BLOCK_LEN || validation.len() % BLOCK_LEN != 0 {
            return Err(ZipError::InvalidArchive("Validation data isn't whole blocks"));
        }
        cbc_decrypt(&cipher, &mut iv.clone(), &mut validation);
        let (body, crc) = validation.split_at(validation.len() - 4);
        let expected = u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]);
        if crc32fast::hash(body) != expected {
            return Err(wrong_password());
        }
        Ok(FileKey { cipher, iv })
    }
}

/// The key and IV that encrypt a stream's payload
#[derive(Clone)]
pub struct FileKey {
    cipher: AesCipher,
    iv: [u8; IV_LEN],
}

const CHUNK_LEN: usize = 64 * BLOCK_LEN;

/// Decrypts a Strong Encryption payload.
///
/// The final block's padding isn't checked, since writers disagree on how
/// to fill it. Deflate stops on its own; stored data needs a
/// [`limit()`](Self::limit) to cut the output at its real length.
pub struct StrongReader<R> {
    inner: R,
    cipher: AesCipher,
    chain: [u8; BLOCK_LEN],
    ready: Vec<u8>,
    position: usize,
    /// Plaintext bytes left to hand out, if we know
    remaining: Option<u64>,
    done: bool,
}

impl<R: Read> StrongReader<R> {
    /// Reads the decryption header and unlocks it.
    pub fn new(mut inner: R, password: &[u8], path: &Utf8PathBuf) -> ZipResult<Self> {
        let header = DecryptionHeader::read(&mut inner)?;
        let key = header.unlock(password, path)?;
        Ok(Self::with_key(inner, key))
    }

    /// Decrypts a payload whose header has already been dealt with.
    pub fn with_key(inner: R, key: FileKey) -> Self {
        Self {
            inner,
            cipher: key.cipher,
            chain: key.iv,
            ready: Vec::new(),
            position: 0,
            remaining: None,
            done: false,
        }
    }

    /// Stops after `plaintext_len` bytes, dropping whatever pads the last block.
    pub fn limit(mut self, plaintext_len: u64) -> Self {
        self.remaining = Some(plaintext_len);
        self
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn fill(&mut self) -> ZipResult<()> {
        let mut chunk = vec![0u8; CHUNK_LEN];
        let mut filled = 0;
        while filled < CHUNK_LEN {
            let count = self.inner.read(&mut chunk[filled..])?;
            if count == 0 {
                break;
            }
            filled += count;
        }
        if filled % BLOCK_LEN != 0 {
            return Err(ZipError::InvalidArchive(
                "Strong-encrypted data isn't a whole number of blocks",
            ));
        }
        self.done = filled < CHUNK_LEN;
        chunk.truncate(filled);
        cbc_decrypt(&self.cipher, &mut self.chain, &mut chunk);
        self.ready = chunk;
        self.position = 0;
        Ok(())
    }
}

impl<R: Read> Read for StrongReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.remaining == Some(0) {
                return Ok(0);
            }
            if self.position < self.ready.len() {
                let mut count = std::cmp::min(buf.len(), self.ready.len() - self.position);
                if let Some(remaining) = self.remaining.as_mut() {
                    count = std::cmp::min(count as u64, *remaining) as usize;
                    *remaining -= count as u64;
                }
                buf[..count].copy_from_slice(&self.ready[self.position..self.position + count]);
                self.position += count;
                return Ok(count);
            }
            if self.done || buf.is_empty() {
                return Ok(0);
            }
            self.fill()?;
        }
    }
}

/// Encrypts a Strong Encryption payload;
/// [`finish()`](Self::finish) pads and writes the final block.
pub struct StrongWriter<W> {
    inner: W,
    cipher: AesCipher,
    chain: [u8; BLOCK_LEN],
    pending: Vec<u8>,
}

impl<W: Write> StrongWriter<W> {
    /// Generates and writes a decryption header, then encrypts what follows.
    pub fn new(mut inner: W, password: &[u8], algorithm: StrongAlgorithm) -> ZipResult<Self> {
        let (header, key) = DecryptionHeader::generate(password, algorithm)?;
        inner.write_all(&header.to_bytes()?)?;
        Ok(Self::with_key(inner, key))
    }

    pub fn with_key(inner: W, key: FileKey) -> Self {
        Self {
            inner,
            cipher: key.cipher,
            chain: key.iv,
            pending: Vec::new(),
        }
    }

    pub fn finish(mut self) -> io::Result<W> {
        pad(&mut self.pending);
        cbc_encrypt(&self.cipher, &mut self.chain, &mut self.pending);
        self.inner.write_all(&self.pending)?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for StrongWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        let whole = self.pending.len() / BLOCK_LEN * BLOCK_LEN;
        if whole > 0 {
            cbc_encrypt(&self.cipher, &mut self.chain, &mut self.pending[..whole]);
            self.inner.write_all(&self.pending[..whole])?;
            self.pending.drain(..whole);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// The ciphertext size of `len` bytes of plaintext, padding included
pub fn padded_len(len: u64) -> u64 {
    (len / BLOCK_LEN as u64 + 1) * BLOCK_LEN as u64
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn derived_keys_are_truncated_hashes() {
        let hash = Sha1::digest(b"password");
        let long = derive_key(&hash, 40);
        assert_eq!(derive_key(&hash, 16), long[..16]);
        assert_eq!(derive_key(&hash, 32), long[..32]);
    }

    #[test]
    fn padding() {
        let mut data = vec![1u8; 16];
        pad(&mut data);
        assert_eq!(data.len(), 32);
        assert_eq!(unpadded_len(&data), Some(16));
        assert_eq!(unpadded_len(&[5u8; 16]), None);
        assert_eq!(padded_len(0), 16);
        assert_eq!(padded_len(15), 16);
        assert_eq!(padded_len(16), 32);
    }

    #[test]
    fn header_round_trip() -> ZipResult<()> {
        let (mut header, _) = DecryptionHeader::generate(b"pw", StrongAlgorithm::Aes192)?;
        header.recipients = Some(RecipientList {
            hash_algorithm: 0x8004,
            hash_size: 20,
            recipients: vec![vec![1; 20], vec![2; 20]],
        });
        let bytes = header.to_bytes()?;
        assert_eq!(DecryptionHeader::read(&mut &bytes[..])?, header);
        Ok(())
    }

    #[test]
    fn round_trip_every_algorithm() -> ZipResult<()> {
        let path: Utf8PathBuf = "strong.bin".into();
        let plaintext: Vec<u8> = (0..5000u32).map(|i| (i * 7) as u8).collect();
        for algorithm in [
            StrongAlgorithm::Aes128,
            StrongAlgorithm::Aes192,
            StrongAlgorithm::Aes256,
        ] {
            let mut writer = StrongWriter::new(Vec::new(), b"correct horse", algorithm)?;
            writer.write_all(&plaintext[..1234])?;
            writer.write_all(&plaintext[1234..])?;
            let ciphertext = writer.finish()?;

            let mut reader = StrongReader::new(&ciphertext[..], b"correct horse", &path)?
                .limit(plaintext.len() as u64);
            let mut decrypted = Vec::new();
            reader.read_to_end(&mut decrypted)?;
            assert_eq!(decrypted, plaintext);

            assert!(matches!(
                StrongReader::new(&ciphertext[..], b"battery staple", &path),
                Err(ZipError::IncorrectPassword(_))
            ));
        }
        Ok(())
    }

    #[test]
    fn block_aligned_and_empty_payloads() -> ZipResult<()> {
        let path: Utf8PathBuf = "strong.bin".into();
        for len in [0usize, 16, CHUNK_LEN, CHUNK_LEN + 1] {
            let plaintext = vec![0x5au8; len];
            let mut writer = StrongWriter::new(Vec::new(), b"pw", StrongAlgorithm::Aes256)?;
            writer.write_all(&plaintext)?;
            let ciphertext = writer.finish()?;

            let mut reader = StrongReader::new(&ciphertext[..], b"pw", &path)?.limit(len as u64);
            let mut decrypted = Vec::new();
            reader.read_to_end(&mut decrypted)?;
            assert_eq!(decrypted, plaintext);
        }
        Ok(())
    }

    #[test]
    fn padding_is_not_checked() -> ZipResult<()> {
        let path: Utf8PathBuf = "zero-padded.bin".into();
        let plaintext = b"twenty bytes of text";
        let (header, key) = DecryptionHeader::generate(b"pw", StrongAlgorithm::Aes128)?;

        // Zero fill instead of PKCS#7, as some writers do.
        let mut payload = plaintext.to_vec();
        payload.resize(2 * BLOCK_LEN, 0);
        cbc_encrypt(&key.cipher, &mut key.iv.clone(), &mut payload);
        let mut ciphertext = header.to_bytes()?;
        ciphertext.extend_from_slice(&payload);

        let mut reader = StrongReader::new(&ciphertext[..], b"pw", &path)?
            .limit(plaintext.len() as u64);
        let mut decrypted = Vec::new();
        reader.read_to_end(&mut decrypted)?;
        assert_eq!(decrypted, plaintext);

        // Without a limit, the fill comes along too.
        let mut reader = StrongReader::new(&ciphertext[..], b"pw", &path)?;
        let mut decrypted = Vec::new();
        reader.read_to_end(&mut decrypted)?;
        assert_eq!(&decrypted[..plaintext.len()], plaintext);
        assert_eq!(decrypted[plaintext.len()..], [0u8; 12]);
        Ok(())
    }

    #[test]
    fn unknown_algorithms_are_unsupported() {
        let algorithm = StrongAlgorithm::from_id(0x6801); // RC4
        assert!(matches!(
            DecryptionHeader::generate(b"pw", algorithm),
            Err(ZipError::UnsupportedEncryptionMethod(_))
        ));
    }
}
