//! Tools for writing a ZIP archive.
//!
//! A [`ZipWriter`] accumulates entries, then [`ZipWriter::finish()`]
//! writes the central directory and hands back the finished, immutable
//! [`ZipArchive`].
//!
//! Entries go in one of two ways:
//!
//! - [`ZipWriter::write_entry_whole()`] takes all the data up front,
//!   so the local file header carries the final sizes and CRC.
//!
//! - [`ZipWriter::write_entry_stream()`] returns an [`EntryWriter`];
//!   the local header has zeroes and the real values go in a
//!   data descriptor when [`EntryWriter::close()`] is called.
//!
//! Nothing already written is ever revisited, so the same code works for
//! a single file and for split archives whose finished volumes are closed.
//!
//! ```no_run
//! # use zipfold::*;
//! # use zipfold::write::*;
//! use std::io::Write;
//!
//! let mut writer = ZipWriter::create("foo.zip", WriterOptions::new())?;
//! writer.write_entry_whole(EntryOptions::new("hello.txt"), b"Hello, world!")?;
//!
//! let mut stream = writer.write_entry_stream(EntryOptions::new("big.log"))?;
//! for i in 0..1000 {
//!     writeln!(stream, "line {}", i)?;
//! }
//! stream.close()?;
//!
//! let archive = writer.finish()?;
//! assert_eq!(archive.entries().len(), 2);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::io::{self, Write};

use camino::Utf8Path;
use chrono::{Local, NaiveDateTime};
use log::*;

use crate::arch::*;
use crate::crypto::aes::AesStrength;
use crate::crypto::pkware;
use crate::crypto::strong::{self, DecryptionHeader, StrongAlgorithm, StrongWriter};
use crate::crypto::EncryptionMethod;
use crate::cursor::to_bytes;
use crate::extra_field::*;
use crate::pipeline::{EncryptionSetup, EntryEncoder, EntryStats};
use crate::read::{FileMetadata, ZipArchive};
use crate::result::*;
use crate::spec::*;
use crate::volume::VolumeWriter;

/// Split archives can't have volumes smaller than this.
pub const MIN_SPLIT_SIZE: u64 = 64 * 1024;

/// "Made by" Unix, APPNOTE version 6.3, so readers look at our Unix modes.
const SOURCE_VERSION: u16 = (3 << 8) | 63;

const DEFAULT_FILE_MODE: u32 = 0o100644;
const DEFAULT_DIRECTORY_MODE: u32 = 0o040755;
const SYMLINK_MODE: u32 = 0o120000;
const MODE_PERMISSIONS: u32 = 0o7777;
/// MS-DOS directory attribute
const DOS_DIRECTORY: u32 = 0x10;

/// Archive-wide options for a [`ZipWriter`]
#[derive(Debug, Clone)]
pub struct WriterOptions {
    split_size: Option<u64>,
    comment: Vec<u8>,
    force_zip64: bool,
    central_directory_encryption: Option<(Vec<u8>, StrongAlgorithm)>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            split_size: None,
            comment: Vec::new(),
            force_zip64: false,
            central_directory_encryption: None,
        }
    }
}

impl WriterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spread the archive over volumes of at most `bytes` each
    /// (at least [`MIN_SPLIT_SIZE`]).
    pub fn split_size(mut self, bytes: u64) -> Self {
        self.split_size = Some(bytes);
        self
    }

    /// Set the archive comment
    pub fn comment<C: Into<Vec<u8>>>(mut self, comment: C) -> Self {
        self.comment = comment.into();
        self
    }

    /// Write Zip64 end of central directory records even if nothing needs them.
    pub fn force_zip64(mut self, force: bool) -> Self {
        self.force_zip64 = force;
        self
    }

    /// Encrypt the central directory with PKWARE Strong Encryption.
    pub fn encrypt_central_directory(mut self, password: &[u8], algorithm: StrongAlgorithm) -> Self {
        self.central_directory_encryption = Some((password.to_vec(), algorithm));
        self
    }
}

/// Options for a single entry
///
/// The defaults are Deflate, no encryption,
/// and the current time as the modification time.
#[derive(Debug, Clone)]
pub struct EntryOptions {
    name: String,
    compression_method: CompressionMethod,
    compression_level: Option<u32>,
    encryption: EncryptionMethod,
    password: Option<Vec<u8>>,
    last_modified: NaiveDateTime,
    unix_mode: Option<u32>,
    large_file: bool,
    comment: Vec<u8>,
    extra_fields: Vec<ExtraField>,
}

impl EntryOptions {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            compression_method: CompressionMethod::Deflate,
            compression_level: None,
            encryption: EncryptionMethod::None,
            password: None,
            last_modified: Local::now().naive_local(),
            unix_mode: None,
            large_file: false,
            comment: Vec::new(),
            extra_fields: Vec::new(),
        }
    }

    pub fn compression_method(mut self, method: CompressionMethod) -> Self {
        self.compression_method = method;
        self
    }

    /// Set the compression level (0-9, Deflate only)
    pub fn compression_level(mut self, level: Option<u32>) -> Self {
        self.compression_level = level;
        self
    }

    /// Encrypt the entry with `password`.
    pub fn encryption(mut self, method: EncryptionMethod, password: &[u8]) -> Self {
        self.encryption = method;
        self.password = Some(password.to_vec());
        self
    }

    /// Shorthand for WinZip AES (AE-1) encryption
    pub fn aes(self, strength: AesStrength, password: &[u8]) -> Self {
        self.encryption(EncryptionMethod::aes(strength), password)
    }

    /// Set the last modified time
    ///
    /// Stored as an MS-DOS timestamp, so it's clamped to 1980-2107
    /// and rounded down to even seconds.
    pub fn last_modified(mut self, when: NaiveDateTime) -> Self {
        self.last_modified = when;
        self
    }

    /// Set the Unix permission bits (the file type bits are ours to pick).
    pub fn unix_permissions(mut self, mode: u32) -> Self {
        self.unix_mode = Some(mode & MODE_PERMISSIONS);
        self
    }

    /// Reserve a Zip64 record in a streamed entry's local header,
    /// for entries that might reach 4 GiB.
    pub fn large_file(mut self, large: bool) -> Self {
        self.large_file = large;
        self
    }

    pub fn comment<C: Into<Vec<u8>>>(mut self, comment: C) -> Self {
        self.comment = comment.into();
        self
    }

    /// Add an extra field record to the entry's headers.
    ///
    /// Zip64 and encryption records are managed by the writer
    /// and are dropped here.
    pub fn extra_field(mut self, record: ExtraField) -> Self {
        match record.header_id() {
            ZIP64_ID | AES_ID | STRONG_ENCRYPTION_ID => {
                warn!("Ignoring {:#06x} extra field; the writer adds its own", record.header_id())
            }
            _ => self.extra_fields.push(record),
        }
        self
    }
}

/// Everything about an entry's headers that's known before its data is.
#[derive(Debug, Clone)]
struct PreparedEntry {
    path: Vec<u8>,
    flags: u16,
    compression_method: CompressionMethod,
    compression_level: Option<u32>,
    /// The method the headers say (99 for AES)
    stored_method: u16,
    time: u16,
    date: u16,
    /// Every extra field but Zip64
    extra_fields: ExtraFields,
    version_needed: u16,
    external_attributes: u32,
    comment: Vec<u8>,
    encryption: Option<EncryptionSetup>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    File,
    Directory,
    Symlink,
}

impl PreparedEntry {
    fn new(options: EntryOptions, kind: EntryKind, data_descriptor: bool) -> ZipResult<Self> {
        let EntryOptions {
            name,
            compression_method,
            compression_level,
            encryption,
            password,
            last_modified,
            unix_mode,
            comment,
            extra_fields: user_extra_fields,
            ..
        } = options;

        if name.is_empty() {
            return Err(ZipError::InvalidPath("Entry with an empty name".to_owned()));
        }
        let mut flags = 0;
        if !name.is_ascii() {
            flags |= FLAG_UTF8;
        }
        if data_descriptor {
            flags |= FLAG_DATA_DESCRIPTOR;
        }
        let (time, date) = to_msdos(last_modified);

        let mut extra_fields = ExtraFields::new();
        for record in user_extra_fields {
            extra_fields.push(record);
        }

        let mut version_needed = VERSION_DEFAULT;
        let mut stored_method = compression_method.to_u16();
        match encryption {
            EncryptionMethod::None => {}
            EncryptionMethod::Pkware => flags |= FLAG_ENCRYPTED,
            EncryptionMethod::Aes {
                strength,
                vendor_version,
            } => {
                flags |= FLAG_ENCRYPTED;
                stored_method = AES_METHOD;
                version_needed = VERSION_AES;
                extra_fields.push(ExtraField::Aes(AesExtraField {
                    vendor_version,
                    strength,
                    compression_method: compression_method.to_u16(),
                }));
            }
            EncryptionMethod::Strong(algorithm) => {
                flags |= FLAG_ENCRYPTED | FLAG_STRONG_ENCRYPTION;
                version_needed = VERSION_STRONG_ENCRYPTION;
                extra_fields.push(ExtraField::StrongEncryption(StrongEncryptionField {
                    format: 2,
                    algorithm: algorithm.id(),
                    bit_length: algorithm.bit_length(),
                    flags: strong::FLAG_PASSWORD,
                    cert_data: Vec::new(),
                }));
            }
        }

        let encryption = match (encryption, password) {
            (EncryptionMethod::None, _) => None,
            (method, Some(password)) => Some(EncryptionSetup {
                method,
                password,
                // Filled in once we know the CRC, if we're going to.
                check_byte: pkware::check_byte(0, time, data_descriptor),
            }),
            (_, None) => return Err(ZipError::PasswordRequired(name.into())),
        };

        let mode = match kind {
            EntryKind::File => unix_mode.map_or(DEFAULT_FILE_MODE, |m| 0o100000 | m),
            EntryKind::Directory => unix_mode.map_or(DEFAULT_DIRECTORY_MODE, |m| 0o040000 | m),
            EntryKind::Symlink => SYMLINK_MODE | unix_mode.unwrap_or(0o777),
        };
        let mut external_attributes = mode << 16;
        if kind == EntryKind::Directory {
            external_attributes |= DOS_DIRECTORY;
        }

        Ok(Self {
            path: name.into_bytes(),
            flags,
            compression_method,
            compression_level,
            stored_method,
            time,
            date,
            extra_fields,
            version_needed,
            external_attributes,
            comment,
            encryption,
        })
    }

    fn display_path(&self) -> String {
        String::from_utf8_lossy(&self.path).into_owned()
    }

    /// The local file header, with a Zip64 record when `zip64` holds sizes.
    fn local_file_header(&self, crc32: u32, sizes: Option<(u64, u64)>, reserve_zip64: bool) -> LocalFileHeader {
        let mut extra_fields = self.extra_fields.clone();
        let (compressed_size, uncompressed_size, zip64) = match sizes {
            Some((compressed, uncompressed)) if fits_u32(compressed) && fits_u32(uncompressed) => {
                (compressed as u32, uncompressed as u32, None)
            }
            // The local header's Zip64 record MUST hold both sizes.
            Some((compressed, uncompressed)) => (
                ZIP64_SENTINEL_32,
                ZIP64_SENTINEL_32,
                Some((compressed, uncompressed)),
            ),
            None if reserve_zip64 => (ZIP64_SENTINEL_32, ZIP64_SENTINEL_32, Some((0, 0))),
            None => (0, 0, None),
        };
        let mut version_needed = self.version_needed;
        if let Some((compressed, uncompressed)) = zip64 {
            extra_fields.records.insert(
                0,
                ExtraField::Zip64(Zip64ExtendedInformation {
                    uncompressed_size: Some(uncompressed),
                    compressed_size: Some(compressed),
                    ..Default::default()
                }),
            );
            version_needed = version_needed.max(VERSION_ZIP64);
        }
        LocalFileHeader {
            minimum_extract_version: version_needed,
            flags: self.flags,
            compression_method: self.stored_method,
            last_modified_time: self.time,
            last_modified_date: self.date,
            crc32,
            compressed_size,
            uncompressed_size,
            path: self.path.clone(),
            extra_field: extra_fields.to_bytes(),
        }
    }

    /// The central directory entry, promoting whatever doesn't fit
    /// into a Zip64 extended information record.
    fn central_directory_entry(&self, stats: &EntryStats, disk: u32, offset: u64) -> CentralDirectoryEntry {
        let promote = |value: u64| if fits_u32(value) { None } else { Some(value) };
        let zip64 = Zip64ExtendedInformation {
            uncompressed_size: promote(stats.uncompressed_size),
            compressed_size: promote(stats.compressed_size),
            header_offset: promote(offset),
            disk_start: if fits_u16(disk as u64) { None } else { Some(disk) },
        };
        let mut extra_fields = self.extra_fields.clone();
        let mut version_needed = self.version_needed;
        if zip64 != Zip64ExtendedInformation::default() {
            extra_fields.records.insert(0, ExtraField::Zip64(zip64));
            version_needed = version_needed.max(VERSION_ZIP64);
        }
        CentralDirectoryEntry {
            source_version: SOURCE_VERSION,
            minimum_extract_version: version_needed,
            flags: self.flags,
            compression_method: self.stored_method,
            last_modified_time: self.time,
            last_modified_date: self.date,
            crc32: stats.crc32,
            compressed_size: u32_or_sentinel(stats.compressed_size),
            uncompressed_size: u32_or_sentinel(stats.uncompressed_size),
            disk_number: u16_or_sentinel(disk as u64),
            internal_file_attributes: 0,
            external_file_attributes: self.external_attributes,
            header_offset: u32_or_sentinel(offset),
            path: self.path.clone(),
            extra_field: extra_fields.to_bytes(),
            file_comment: self.comment.clone(),
        }
    }
}

/// Writes a record that mustn't straddle volumes,
/// returning the disk and offset it starts at.
fn write_record(volume: &mut VolumeWriter, record: &[u8]) -> ZipResult<(u32, u64)> {
    volume.write_atomic(record)?;
    let (disk, end) = volume.position();
    Ok((disk, end - record.len() as u64))
}

/// Builds a ZIP archive, one entry at a time.
pub struct ZipWriter {
    volume: VolumeWriter,
    options: WriterOptions,
    entries: Vec<CentralDirectoryEntry>,
}

impl ZipWriter {
    /// Creates a new archive at `path`.
    ///
    /// For split archives, volumes are written to `path.z01`, `path.z02`, ...
    /// and the last one is renamed to `path` when the archive is finished.
    pub fn create<P: AsRef<Utf8Path>>(path: P, options: WriterOptions) -> ZipResult<Self> {
        if let Some(size) = options.split_size {
            if size < MIN_SPLIT_SIZE {
                return Err(ZipError::UnsupportedArchive(format!(
                    "Split size {} is smaller than the minimum of {} bytes",
                    size, MIN_SPLIT_SIZE
                )));
            }
        }
        let volume = VolumeWriter::create(path.as_ref(), options.split_size)?;
        Ok(Self {
            volume,
            options,
            entries: Vec::new(),
        })
    }

    /// Compresses, encrypts, and writes an entry whose data is all here.
    pub fn write_entry_whole(&mut self, options: EntryOptions, data: &[u8]) -> ZipResult<()> {
        self.write_whole(options, EntryKind::File, data)
    }

    /// Adds a directory. A trailing `/` is added to the name if it's missing.
    pub fn add_directory(&mut self, options: EntryOptions) -> ZipResult<()> {
        let mut options = options
            .compression_method(CompressionMethod::Stored)
            .encryption(EncryptionMethod::None, b"");
        if !options.name.ends_with('/') {
            options.name.push('/');
        }
        self.write_whole(options, EntryKind::Directory, &[])
    }

    /// Adds a symbolic link pointing at `target`.
    pub fn add_symlink(&mut self, options: EntryOptions, target: &str) -> ZipResult<()> {
        let options = options.compression_method(CompressionMethod::Stored);
        self.write_whole(options, EntryKind::Symlink, target.as_bytes())
    }

    fn write_whole(&mut self, options: EntryOptions, kind: EntryKind, data: &[u8]) -> ZipResult<()> {
        let mut prepared = PreparedEntry::new(options, kind, false)?;
        let crc32 = crc32fast::hash(data);
        if let Some(setup) = prepared.encryption.as_mut() {
            setup.check_byte = pkware::check_byte(crc32, prepared.time, false);
        }

        let mut encoder = EntryEncoder::new(
            Vec::new(),
            prepared.compression_method,
            prepared.compression_level,
            prepared.encryption.as_ref(),
        )?;
        encoder.write_all(data)?;
        let (stats, payload) = encoder.finish()?;
        debug_assert_eq!(stats.crc32, crc32);

        let local = prepared.local_file_header(
            crc32,
            Some((stats.compressed_size, stats.uncompressed_size)),
            false,
        );
        trace!("{:?}", local);
        let (disk, offset) = write_record(&mut self.volume, &to_bytes(|out| local.write(out))?)?;
        self.volume.write_all(&payload)?;

        debug!(
            "Wrote {} ({} bytes, {} compressed) at {}:{}",
            prepared.display_path(),
            stats.uncompressed_size,
            stats.compressed_size,
            disk,
            offset
        );
        self.entries
            .push(prepared.central_directory_entry(&stats, disk, offset));
        Ok(())
    }

    /// Starts an entry whose data will be written through the returned
    /// [`EntryWriter`]. Its sizes and CRC go in a data descriptor.
    ///
    /// [`EntryWriter::close()`] must be called,
    /// or the entry won't make it into the central directory.
    pub fn write_entry_stream(&mut self, options: EntryOptions) -> ZipResult<EntryWriter<'_>> {
        let large_file = options.large_file;
        let prepared = PreparedEntry::new(options, EntryKind::File, true)?;
        let local = prepared.local_file_header(0, None, large_file);
        trace!("{:?}", local);
        let (disk, offset) = write_record(&mut self.volume, &to_bytes(|out| local.write(out))?)?;

        let encoder = EntryEncoder::new(
            &mut self.volume,
            prepared.compression_method,
            prepared.compression_level,
            prepared.encryption.as_ref(),
        )?;
        Ok(EntryWriter {
            encoder,
            entries: &mut self.entries,
            prepared,
            disk,
            offset,
            large_file,
        })
    }

    /// Writes the central directory and end records,
    /// returning the finished archive.
    pub fn finish(mut self) -> ZipResult<ZipArchive> {
        let entry_count = self.entries.len() as u64;
        let records = self
            .entries
            .iter()
            .map(|entry| to_bytes(|out| entry.write(out)))
            .collect::<ZipResult<Vec<_>>>()?;

        let WrittenDirectory {
            disk: cd_disk,
            offset: cd_offset,
            size: cd_size,
            entries_by_disk,
            encryption,
        } = match self.options.central_directory_encryption.take() {
            None => self.write_central_directory(&records)?,
            Some((password, algorithm)) => {
                self.write_encrypted_central_directory(&records, &password, algorithm)?
            }
        };

        let needs_zip64 = self.options.force_zip64
            || encryption.is_some()
            || !fits_u16(entry_count)
            || !fits_u32(cd_size)
            || !fits_u32(cd_offset)
            || !fits_u16(cd_disk as u64);

        // The Zip64 record goes first, then the locator and the EOCDR
        // together, so that the locator is right where readers look.
        let extensible_data = encryption
            .as_ref()
            .map(|(bytes, _)| bytes.clone())
            .unwrap_or_default();
        let zip64_len = (Zip64EndOfCentralDirectory::FIXED_SIZE + extensible_data.len()) as u64;
        let eocdr_len = (EndOfCentralDirectory::FIXED_SIZE + self.options.comment.len()) as u64;
        let locator_len = Zip64EndOfCentralDirectoryLocator::SIZE as u64;
        let final_disk = if needs_zip64 {
            self.landing_disk(&[zip64_len, locator_len + eocdr_len])
        } else {
            self.landing_disk(&[eocdr_len])
        };

        let zip64_parts = if needs_zip64 {
            let record = Zip64EndOfCentralDirectory {
                source_version: SOURCE_VERSION,
                minimum_extract_version: if encryption.is_some() {
                    VERSION_CENTRAL_DIRECTORY_ENCRYPTION
                } else {
                    VERSION_ZIP64
                },
                disk_number: final_disk,
                disk_with_central_directory: cd_disk,
                entries_on_this_disk: entries_on_disk(&entries_by_disk, final_disk),
                entries: entry_count,
                central_directory_size: cd_size,
                central_directory_offset: cd_offset,
                extensible_data,
            };
            trace!("{:?}", record);
            let (disk, offset) = write_record(&mut self.volume, &to_bytes(|out| record.write(out))?)?;
            check_landing(disk, final_disk)?;
            let locator = Zip64EndOfCentralDirectoryLocator {
                disk_with_zip64_eocdr: disk,
                zip64_eocdr_offset: offset,
                disks: final_disk + 1,
            };
            trace!("{:?}", locator);
            Some((locator, record))
        } else {
            None
        };

        let eocdr = EndOfCentralDirectory {
            disk_number: u16_or_sentinel(final_disk as u64),
            disk_with_central_directory: u16_or_sentinel(cd_disk as u64),
            entries_on_this_disk: u16_or_sentinel(entries_on_disk(&entries_by_disk, final_disk)),
            entries: u16_or_sentinel(entry_count),
            central_directory_size: u32_or_sentinel(cd_size),
            central_directory_offset: u32_or_sentinel(cd_offset),
            file_comment: self.options.comment.clone(),
        };
        trace!("{:?}", eocdr);

        let tail = to_bytes(|out| {
            if let Some((locator, _)) = &zip64_parts {
                locator.write(out)?;
            }
            eocdr.write(out)
        })?;
        self.volume.write_atomic(&tail)?;
        check_landing(self.volume.disk(), final_disk)?;

        let volumes = self.volume.finish()?;
        debug!(
            "Finished archive with {} entries over {} volume(s)",
            entry_count,
            volumes.len()
        );
        let entries = self
            .entries
            .iter()
            .map(FileMetadata::from_cde)
            .collect::<ZipResult<Vec<_>>>()?;
        let (zip64_locator, zip64_eocdr) = match zip64_parts {
            Some((locator, record)) => (Some(locator), Some(record)),
            None => (None, None),
        };
        Ok(ZipArchive::from_parts(
            volumes,
            eocdr,
            zip64_locator,
            zip64_eocdr,
            encryption.map(|(_, description)| description),
            entries,
        ))
    }

    /// The disk the last of `records` will land on
    /// if each is written atomically from here.
    fn landing_disk(&self, records: &[u64]) -> u32 {
        let (mut disk, mut written) = self.volume.position();
        if let Some(size) = self.options.split_size {
            for len in records {
                if *len > size - written {
                    disk += 1;
                    written = 0;
                }
                written += len;
            }
        }
        disk
    }

    /// Writes each central directory record atomically.
    fn write_central_directory(&mut self, records: &[Vec<u8>]) -> ZipResult<WrittenDirectory> {
        let mut start = None;
        let mut size = 0;
        let mut disks = Vec::with_capacity(records.len());
        for record in records {
            let (disk, offset) = write_record(&mut self.volume, record)?;
            start.get_or_insert((disk, offset));
            disks.push(disk);
            size += record.len() as u64;
        }
        let (disk, offset) = start.unwrap_or_else(|| self.volume.position());
        Ok(WrittenDirectory {
            disk,
            offset,
            size,
            entries_by_disk: disks,
            encryption: None,
        })
    }

    /// Writes an archive decryption header, an archive extra data record,
    /// then the central directory encrypted as one Strong Encryption stream.
    fn write_encrypted_central_directory(
        &mut self,
        records: &[Vec<u8>],
        password: &[u8],
        algorithm: StrongAlgorithm,
    ) -> ZipResult<WrittenDirectory> {
        let plaintext = records.concat();
        let (header, key) = DecryptionHeader::generate(password, algorithm)?;
        let mut encryptor = StrongWriter::with_key(Vec::new(), key);
        encryptor.write_all(&plaintext)?;
        let ciphertext = encryptor.finish()?;
        debug_assert_eq!(ciphertext.len() as u64, strong::padded_len(plaintext.len() as u64));

        let mut prefix = header.to_bytes()?;
        prefix.extend(to_bytes(|out| ArchiveExtraData::default().write(out))?);
        let (disk, offset) = write_record(&mut self.volume, &prefix)?;
        self.volume.write_all(&ciphertext)?;
        let size = (prefix.len() + ciphertext.len()) as u64;

        let description = CentralDirectoryEncryption {
            compression_method: CompressionMethod::Stored.to_u16(),
            compressed_size: plaintext.len() as u64,
            original_size: plaintext.len() as u64,
            algorithm: algorithm.id(),
            bit_length: algorithm.bit_length(),
            flags: strong::FLAG_PASSWORD,
            hash_algorithm: 0,
            hash_data: Vec::new(),
        };
        debug!("Encrypted central directory: {:?}", description);
        let bytes = to_bytes(|out| description.write(out))?;
        // The whole directory counts as being where it starts.
        Ok(WrittenDirectory {
            disk,
            offset,
            size,
            entries_by_disk: vec![disk; records.len()],
            encryption: Some((bytes, description)),
        })
    }
}

/// The end records name the disk they're on before they're written,
/// so make sure they actually ended up there.
fn check_landing(actual: u32, predicted: u32) -> ZipResult<()> {
    if actual == predicted {
        Ok(())
    } else {
        Err(ZipError::UnsupportedArchive(format!(
            "End of central directory landed on disk {} instead of disk {}",
            actual, predicted
        )))
    }
}

/// Where the central directory ended up
struct WrittenDirectory {
    disk: u32,
    offset: u64,
    size: u64,
    /// The disk each record landed on
    entries_by_disk: Vec<u32>,
    /// The Zip64 extensible data describing the encryption, and its parsed form
    encryption: Option<(Vec<u8>, CentralDirectoryEncryption)>,
}

fn entries_on_disk(entries_by_disk: &[u32], disk: u32) -> u64 {
    entries_by_disk.iter().filter(|d| **d == disk).count() as u64
}

/// Streams an entry's data into the archive.
///
/// Dropping this without calling [`close()`](Self::close)
/// leaves the entry out of the central directory.
pub struct EntryWriter<'w> {
    encoder: EntryEncoder<&'w mut VolumeWriter>,
    entries: &'w mut Vec<CentralDirectoryEntry>,
    prepared: PreparedEntry,
    disk: u32,
    offset: u64,
    large_file: bool,
}

impl EntryWriter<'_> {
    /// Finishes the entry: flushes the compressor and encryptor,
    /// writes the data descriptor, and records the entry.
    pub fn close(self) -> ZipResult<()> {
        let (stats, volume) = self.encoder.finish()?;
        let zip64 = self.large_file
            || !fits_u32(stats.compressed_size)
            || !fits_u32(stats.uncompressed_size);
        let descriptor = DataDescriptor {
            crc32: stats.crc32,
            compressed_size: stats.compressed_size,
            uncompressed_size: stats.uncompressed_size,
        };
        trace!("{:?}", descriptor);
        volume.write_atomic(&to_bytes(|out| descriptor.write(out, zip64))?)?;

        debug!(
            "Streamed {} ({} bytes, {} compressed) at {}:{}",
            self.prepared.display_path(),
            stats.uncompressed_size,
            stats.compressed_size,
            self.disk,
            self.offset
        );
        self.entries.push(
            self.prepared
                .central_directory_entry(&stats, self.disk, self.offset),
        );
        Ok(())
    }
}

impl Write for EntryWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.encoder.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.encoder.flush()
    }
}
