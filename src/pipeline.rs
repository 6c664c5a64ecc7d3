//! The entry pipeline: how an entry's bytes get from the volume to the
//! caller (and back).
//!
//! Reading goes volume → decryption → decompression → CRC and size checks.
//! Writing goes the other way: CRC and size tallies → compression →
//! encryption → byte count → volume. Encryption headers and trailers count
//! toward an entry's compressed size, like the format says they should.

use std::io::{self, Read, Seek, SeekFrom, Take, Write};

use crc32fast::Hasher;
use log::*;

use crate::codec::{Compressor, Decompressor};
use crate::crc_reader::{Crc32Reader, Expected};
use crate::crypto::aes::{AesReader, AesVendorVersion, AesWriter};
use crate::crypto::pkware::{self, PkwareReader, PkwareWriter};
use crate::crypto::strong::{StrongReader, StrongWriter};
use crate::crypto::{Decryptor, EncryptionMethod, Encryptor};
use crate::cursor::{DataInput, DataOutput};
use crate::extra_field::{ExtraFields, Zip64Context};
use crate::read::FileMetadata;
use crate::result::*;
use crate::spec::{self, CompressionMethod, DataDescriptor, LocalFileHeader};
use crate::volume::VolumeReader;

type ReadChain<'a> = Crc32Reader<Decompressor<Decryptor<Take<&'a mut VolumeReader>>>>;

/// Reads an entry's decrypted, decompressed contents.
///
/// Errors (wrong password, bad checksum, etc.) come out of `read()` as
/// `io::Error`s wrapping a [`ZipError`]; `ZipError::from()` unwraps them.
pub struct EntryReader<'a> {
    chain: Option<ReadChain<'a>>,
    /// Absolute offset of the end of the entry's compressed data
    data_end: u64,
    /// Whether a data descriptor follows, and if it's the wide kind
    data_descriptor: Option<bool>,
}

impl<'a> EntryReader<'a> {
    pub(crate) fn new(
        volume: &'a mut VolumeReader,
        entry: &FileMetadata,
        password: Option<&[u8]>,
    ) -> ZipResult<Self> {
        let header_offset = volume
            .volumes()
            .absolute_offset(entry.disk_number, entry.header_offset)?;
        volume.seek(SeekFrom::Start(header_offset))?;
        let mut input = DataInput::new(&mut *volume);
        let local_header = LocalFileHeader::read(&mut input)?;
        trace!("{:?}", local_header);
        let local_extra = ExtraFields::parse(
            &local_header.extra_field,
            Zip64Context::for_local(&local_header),
        )?;
        if cfg!(feature = "check-local-metadata") {
            check_local_header(entry, &local_header, &local_extra)?;
        }
        let data_start = input.position()?;
        let data_end = data_start + entry.compressed_size;

        let data_descriptor = if entry.has_data_descriptor() {
            Some(local_extra.zip64().is_some() || entry.needs_zip64_sizes())
        } else {
            None
        };

        let raw = Read::take(volume, entry.compressed_size);
        let (decryptor, password_hint) = decryptor(raw, entry, password)?;
        let decompressor = Decompressor::new(entry.compression_method, decryptor)?;

        let crc32 = match entry.encryption {
            EncryptionMethod::Aes {
                vendor_version: AesVendorVersion::Ae2,
                ..
            } => {
                debug!("{} is AE-2; relying on its MAC instead of a CRC", entry.path);
                None
            }
            _ => Some(entry.crc32),
        };
        let expected = Expected {
            path: entry.path.clone(),
            crc32,
            size: entry.size,
            password_hint,
        };
        debug!("Reading {}", entry.path);
        Ok(Self {
            chain: Some(Crc32Reader::new(decompressor, expected)),
            data_end,
            data_descriptor,
        })
    }

    /// Consumes the data descriptor, if there is one.
    fn finish(&mut self) -> ZipResult<()> {
        if let Some(chain) = self.chain.take() {
            if let Some(zip64) = self.data_descriptor {
                let volume = chain.into_inner().into_inner().into_inner().into_inner();
                volume.seek(SeekFrom::Start(self.data_end))?;
                let descriptor = DataDescriptor::read(&mut DataInput::new(volume), zip64)?;
                trace!("{:?}", descriptor);
            }
        }
        Ok(())
    }
}

impl Read for EntryReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let chain = match self.chain.as_mut() {
            Some(c) => c,
            None => return Ok(0),
        };
        let count = chain.read(buf)?;
        if count == 0 && !buf.is_empty() {
            self.finish()?;
        }
        Ok(count)
    }
}

/// Picks the decryptor for an entry, checking the password on the way.
/// Also returns whether a bad CRC should hint at a bad password.
fn decryptor<'a>(
    raw: Take<&'a mut VolumeReader>,
    entry: &FileMetadata,
    password: Option<&[u8]>,
) -> ZipResult<(Decryptor<Take<&'a mut VolumeReader>>, bool)> {
    if entry.encryption == EncryptionMethod::None {
        return Ok((Decryptor::None(raw), false));
    }
    let password = password.ok_or_else(|| ZipError::PasswordRequired(entry.path.clone()))?;
    Ok(match entry.encryption {
        EncryptionMethod::None => (Decryptor::None(raw), false),
        EncryptionMethod::Pkware => {
            let check = pkware::check_byte(
                entry.crc32,
                entry.dos_time,
                entry.has_data_descriptor(),
            );
            let reader = PkwareReader::new(raw, password, check, &entry.path)?;
            (Decryptor::Pkware(reader), true)
        }
        EncryptionMethod::Aes { strength, .. } => {
            let reader = AesReader::new(raw, password, strength, entry.compressed_size, &entry.path)?;
            (Decryptor::Aes(reader), false)
        }
        EncryptionMethod::Strong(_) => {
            let mut reader = StrongReader::new(raw, password, &entry.path)?;
            if entry.compression_method == CompressionMethod::Stored {
                reader = reader.limit(entry.size);
            }
            (Decryptor::Strong(reader), false)
        }
    })
}

/// Makes sure the local header tells the same story as the central directory.
fn check_local_header(
    entry: &FileMetadata,
    local: &LocalFileHeader,
    local_extra: &ExtraFields,
) -> ZipResult<()> {
    let mismatch = || {
        ZipError::InvalidArchive("Central directory entry doesn't match local file header")
    };
    if local.flags & spec::FLAG_MASKED_LOCAL_HEADER != 0 {
        debug!("{}'s local header is masked; nothing to check", entry.path);
        return Ok(());
    }
    if local.path != entry.raw_path || local.compression_method != entry.stored_method() {
        return Err(mismatch());
    }
    if !spec::has_data_descriptor(local.flags) {
        let zip64 = local_extra.zip64();
        let compressed = zip64
            .and_then(|z| z.compressed_size)
            .unwrap_or(local.compressed_size as u64);
        let uncompressed = zip64
            .and_then(|z| z.uncompressed_size)
            .unwrap_or(local.uncompressed_size as u64);
        if local.crc32 != entry.crc32
            || compressed != entry.compressed_size
            || uncompressed != entry.size
        {
            return Err(mismatch());
        }
    }
    Ok(())
}

/// What an entry's encryption needs to get going
#[derive(Debug, Clone)]
pub struct EncryptionSetup {
    pub method: EncryptionMethod,
    pub password: Vec<u8>,
    /// The PKWARE header's check byte
    pub check_byte: u8,
}

/// Sizes and checksum of a written entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntryStats {
    pub crc32: u32,
    pub uncompressed_size: u64,
    pub compressed_size: u64,
}

/// The write side of the pipeline: checksums, compresses, and encrypts
/// everything written to it.
pub struct EntryEncoder<W: Write> {
    compressor: Compressor<Encryptor<DataOutput<W>>>,
    hasher: Hasher,
    uncompressed_size: u64,
}

impl<W: Write> EntryEncoder<W> {
    pub fn new(
        inner: W,
        method: CompressionMethod,
        level: Option<u32>,
        encryption: Option<&EncryptionSetup>,
    ) -> ZipResult<Self> {
        let out = DataOutput::new(inner);
        let encryptor = match encryption {
            None => Encryptor::None(out),
            Some(setup) => match setup.method {
                EncryptionMethod::None => Encryptor::None(out),
                EncryptionMethod::Pkware => Encryptor::Pkware(PkwareWriter::new(
                    out,
                    &setup.password,
                    setup.check_byte,
                )?),
                EncryptionMethod::Aes { strength, .. } => {
                    Encryptor::Aes(AesWriter::new(out, &setup.password, strength)?)
                }
                EncryptionMethod::Strong(algorithm) => {
                    Encryptor::Strong(StrongWriter::new(out, &setup.password, algorithm)?)
                }
            },
        };
        Ok(Self {
            compressor: Compressor::new(method, level, encryptor)?,
            hasher: Hasher::new(),
            uncompressed_size: 0,
        })
    }

    /// Flushes the compressor and writes any encryption trailer.
    pub fn finish(self) -> ZipResult<(EntryStats, W)> {
        let encryptor = self.compressor.finish()?;
        let out = encryptor.finish()?;
        let stats = EntryStats {
            crc32: self.hasher.finalize(),
            uncompressed_size: self.uncompressed_size,
            compressed_size: out.position(),
        };
        Ok((stats, out.into_inner()))
    }
}

impl<W: Write> Write for EntryEncoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let count = self.compressor.write(buf)?;
        self.hasher.update(&buf[..count]);
        self.uncompressed_size += count as u64;
        Ok(count)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.compressor.flush()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::aes::AesStrength;

    #[test]
    fn stats_cover_encryption_overhead() -> ZipResult<()> {
        let setup = EncryptionSetup {
            method: EncryptionMethod::aes(AesStrength::Aes128),
            password: b"pw".to_vec(),
            check_byte: 0,
        };
        let mut encoder =
            EntryEncoder::new(Vec::new(), CompressionMethod::Stored, None, Some(&setup))?;
        encoder.write_all(b"twelve bytes")?;
        let (stats, bytes) = encoder.finish()?;
        assert_eq!(stats.uncompressed_size, 12);
        assert_eq!(stats.crc32, crc32fast::hash(b"twelve bytes"));
        assert_eq!(
            stats.compressed_size,
            12 + AesStrength::Aes128.overhead()
        );
        assert_eq!(bytes.len() as u64, stats.compressed_size);
        Ok(())
    }

    #[test]
    fn plain_deflate() -> ZipResult<()> {
        let text = b"la la la la la la la la la la la la".repeat(10);
        let mut encoder =
            EntryEncoder::new(Vec::new(), CompressionMethod::Deflate, None, None)?;
        encoder.write_all(&text)?;
        let (stats, bytes) = encoder.finish()?;
        assert_eq!(stats.uncompressed_size, text.len() as u64);
        assert!(stats.compressed_size < stats.uncompressed_size);
        assert_eq!(bytes.len() as u64, stats.compressed_size);
        Ok(())
    }
}
