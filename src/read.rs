//! Tools for reading a ZIP archive.
//!
//! To start reading an archive, first open a [`ZipArchive`] from its path
//! (for split archives, the path of the last volume, usually `foo.zip`).
//!
//! The archive itself is just the central directory, decoded.
//! Reading an entry's contents needs a [`VolumeReader`] cursor;
//! each thread should get its own from [`ZipArchive::reader()`].

use std::borrow::Cow;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, NaiveDateTime};
use codepage_437::*;
use log::*;

use crate::arch::usize;
use crate::codec::Decompressor;
use crate::crypto::aes::AesVendorVersion;
use crate::crypto::strong::{DecryptionHeader, StrongAlgorithm, StrongReader};
use crate::crypto::EncryptionMethod;
use crate::cursor::DataInput;
use crate::extra_field::{ExtraFields, Zip64Context};
use crate::pipeline::EntryReader;
use crate::result::*;
use crate::spec::*;
use crate::volume::{VolumeReader, VolumeSet};

/// Metadata for a file or directory in the archive,
/// retrieved from its central directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    /// Uncompressed size of the file in bytes
    pub size: u64,

    /// Compressed size of the file in bytes,
    /// including any encryption header and trailer
    pub compressed_size: u64,

    /// Compression algorithm used to store the file.
    /// For WinZip AES entries, this is the real method from the AES extra field,
    /// not the 99 in the header.
    pub compression_method: CompressionMethod,

    pub encryption: EncryptionMethod,

    /// The CRC-32 of the decompressed file
    pub crc32: u32,

    /// The general purpose bit flags
    pub flags: u16,

    /// The provided path of the file.
    pub path: Utf8PathBuf,

    /// The path as stored, before decoding
    pub raw_path: Vec<u8>,

    /// The date and time the file was last modified,
    /// if the DOS timestamp made any sense
    pub last_modified: Option<NaiveDateTime>,

    pub dos_time: u16,
    pub dos_date: u16,

    /// The OS the archiver ran on, which says how to read the attributes
    pub system: System,

    /// Unix mode bits, if the file was archived in a Unix OS.
    ///
    /// This library does _not_ try to convert DOS permission bits into
    /// roughly-equivalent Unix mode bits, or do other cross-OS handwaving.
    pub unix_mode: Option<u32>,

    pub external_attributes: u32,
    pub internal_attributes: u16,
    pub source_version: u16,
    pub minimum_extract_version: u16,

    pub extra_fields: ExtraFields,
    pub comment: Vec<u8>,

    /// The volume holding the local file header
    pub disk_number: u32,

    /// The offset to the local file header within its volume
    pub header_offset: u64,
}

/// File type bits of a Unix mode
const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

impl FileMetadata {
    /// Returns true if the given entry is a directory
    pub fn is_dir(&self) -> bool {
        // Path::ends_with() doesn't consider separators,
        // so we need a different approach.
        self.size == 0 && self.path.as_str().ends_with('/')
    }

    /// Returns true if the given entry is a file
    pub fn is_file(&self) -> bool {
        !self.is_dir() && !self.is_symlink()
    }

    /// Returns true if the given entry is a symbolic link,
    /// whose contents are the link target
    pub fn is_symlink(&self) -> bool {
        self.unix_mode.map_or(false, |mode| mode & S_IFMT == S_IFLNK)
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryption.is_encrypted()
    }

    pub fn has_data_descriptor(&self) -> bool {
        has_data_descriptor(self.flags)
    }

    /// The best modification time we have:
    /// Info-ZIP's extended timestamp (in UTC) if present,
    /// otherwise the DOS timestamp.
    pub fn modified(&self) -> Option<NaiveDateTime> {
        self.extra_fields
            .extended_timestamp()
            .and_then(|t| t.modified)
            .and_then(|secs| DateTime::from_timestamp(secs as i64, 0))
            .map(|t| t.naive_utc())
            .or(self.last_modified)
    }

    /// The compression method as it appears in the headers
    pub(crate) fn stored_method(&self) -> u16 {
        match self.encryption {
            EncryptionMethod::Aes { .. } => AES_METHOD,
            _ => self.compression_method.to_u16(),
        }
    }

    /// True if a data descriptor for this entry must use 64-bit sizes
    pub(crate) fn needs_zip64_sizes(&self) -> bool {
        self.size >= ZIP64_SENTINEL_32 as u64 || self.compressed_size >= ZIP64_SENTINEL_32 as u64
    }

    /// Decodes a central directory entry, resolving Zip64 values,
    /// the path encoding, and how the entry is encrypted.
    pub fn from_cde(cde: &CentralDirectoryEntry) -> ZipResult<Self> {
        let path: Cow<str> = if is_utf8(cde.flags) {
            Cow::Borrowed(std::str::from_utf8(&cde.path).map_err(ZipError::Encoding)?)
        } else {
            Cow::borrow_from_cp437(&cde.path, &CP437_CONTROL)
        };
        let path = Utf8PathBuf::from(path.into_owned());

        let saturated = Zip64Context::for_central(cde);
        let extra_fields = ExtraFields::parse(&cde.extra_field, saturated)?;
        let zip64 = extra_fields.zip64().cloned().unwrap_or_default();
        let resolve = |field: &'static str, is_sentinel: bool, extended: Option<u64>, classic: u64| {
            if is_sentinel {
                extended.ok_or_else(|| ZipError::MissingZip64Field {
                    path: path.clone(),
                    field,
                })
            } else {
                Ok(classic)
            }
        };
        let size = resolve(
            "uncompressed size",
            saturated.uncompressed_size,
            zip64.uncompressed_size,
            cde.uncompressed_size as u64,
        )?;
        let compressed_size = resolve(
            "compressed size",
            saturated.compressed_size,
            zip64.compressed_size,
            cde.compressed_size as u64,
        )?;
        let header_offset = resolve(
            "local header offset",
            saturated.header_offset,
            zip64.header_offset,
            cde.header_offset as u64,
        )?;
        let disk_number = resolve(
            "disk number",
            saturated.disk_start,
            zip64.disk_start.map(u64::from),
            cde.disk_number as u64,
        )? as u32;

        let (compression_method, encryption) = resolve_encryption(cde, &extra_fields, &path)?;

        let system = System::from_source_version(cde.source_version);
        let unix_mode = match system {
            System::Unix => Some(cde.external_file_attributes >> 16),
            _ => None,
        };

        Ok(Self {
            size,
            compressed_size,
            compression_method,
            encryption,
            crc32: cde.crc32,
            flags: cde.flags,
            path,
            raw_path: cde.path.clone(),
            last_modified: parse_msdos(cde.last_modified_time, cde.last_modified_date),
            dos_time: cde.last_modified_time,
            dos_date: cde.last_modified_date,
            system,
            unix_mode,
            external_attributes: cde.external_file_attributes,
            internal_attributes: cde.internal_file_attributes,
            source_version: cde.source_version,
            minimum_extract_version: cde.minimum_extract_version,
            extra_fields,
            comment: cde.file_comment.clone(),
            disk_number,
            header_offset,
        })
    }
}

/// Works out the real compression method and the encryption scheme
/// from the flags, the method, and the extra fields.
fn resolve_encryption(
    cde: &CentralDirectoryEntry,
    extra_fields: &ExtraFields,
    path: &Utf8Path,
) -> ZipResult<(CompressionMethod, EncryptionMethod)> {
    if cde.compression_method == AES_METHOD {
        let aes = extra_fields.aes().ok_or_else(|| {
            ZipError::UnsupportedEncryptionMethod(format!(
                "{} claims WinZip AES, but has no AES extra field",
                path
            ))
        })?;
        if aes.vendor_version == AesVendorVersion::Ae2 {
            warn!("{} is AE-2; its CRC won't be checked", path);
        }
        return Ok((
            CompressionMethod::from_u16(aes.compression_method),
            EncryptionMethod::Aes {
                strength: aes.strength,
                vendor_version: aes.vendor_version,
            },
        ));
    }
    let method = CompressionMethod::from_u16(cde.compression_method);
    if !is_encrypted(cde.flags) {
        return Ok((method, EncryptionMethod::None));
    }
    if !is_strong_encrypted(cde.flags) {
        return Ok((method, EncryptionMethod::Pkware));
    }
    let algorithm = match extra_fields.strong_encryption() {
        Some(field) => StrongAlgorithm::from_id(field.algorithm),
        None => {
            // The decryption header names the algorithm too,
            // and that's what decryption actually goes by.
            warn!("{} is strongly encrypted but has no 0x0017 extra field", path);
            StrongAlgorithm::Unsupported(0)
        }
    };
    Ok((method, EncryptionMethod::Strong(algorithm)))
}

/// Watches the reader walk an archive's structure.
///
/// Every callback gets the record's offset in the logical address space
/// (or, for an encrypted central directory, in its decrypted contents).
/// The defaults do nothing.
pub trait RecordObserver {
    fn end_of_central_directory(&mut self, _offset: u64, _record: &EndOfCentralDirectory) {}

    fn zip64_locator(&mut self, _offset: u64, _record: &Zip64EndOfCentralDirectoryLocator) {}

    fn zip64_end_of_central_directory(
        &mut self,
        _offset: u64,
        _record: &Zip64EndOfCentralDirectory,
    ) {
    }

    fn central_directory_entry(&mut self, _offset: u64, _record: &CentralDirectoryEntry) {}

    fn local_file_header(&mut self, _offset: u64, _record: &LocalFileHeader) {}
}

/// Observes nothing.
pub struct NoopObserver;

impl RecordObserver for NoopObserver {}

/// Traces every record it sees through the `log` crate.
pub struct LoggingObserver;

impl RecordObserver for LoggingObserver {
    fn end_of_central_directory(&mut self, offset: u64, record: &EndOfCentralDirectory) {
        trace!("@{}: {:?}", offset, record);
    }

    fn zip64_locator(&mut self, offset: u64, record: &Zip64EndOfCentralDirectoryLocator) {
        trace!("@{}: {:?}", offset, record);
    }

    fn zip64_end_of_central_directory(&mut self, offset: u64, record: &Zip64EndOfCentralDirectory) {
        trace!("@{}: {:?}", offset, record);
    }

    fn central_directory_entry(&mut self, offset: u64, record: &CentralDirectoryEntry) {
        trace!("@{}: {:?}", offset, record);
    }

    fn local_file_header(&mut self, offset: u64, record: &LocalFileHeader) {
        trace!("@{}: {:?}", offset, record);
    }
}

/// A ZIP archive to be read
#[derive(Debug, Clone)]
pub struct ZipArchive {
    volumes: VolumeSet,
    eocdr: EndOfCentralDirectory,
    zip64_locator: Option<Zip64EndOfCentralDirectoryLocator>,
    zip64_eocdr: Option<Zip64EndOfCentralDirectory>,
    central_directory_encryption: Option<CentralDirectoryEncryption>,
    /// A list of entries from the ZIP's central directory
    entries: Vec<FileMetadata>,
}

impl ZipArchive {
    /// Opens the archive at `path`.
    ///
    /// ```no_run
    /// # use zipfold::*;
    /// let archive = ZipArchive::open("foo.zip")?;
    /// for entry in archive.entries() {
    ///     println!("{} ({} bytes)", entry.path, entry.size);
    /// }
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn open<P: AsRef<Utf8Path>>(path: P) -> ZipResult<Self> {
        Self::discover(path.as_ref(), None, &mut NoopObserver, false)
    }

    /// Opens an archive whose central directory is encrypted.
    ///
    /// Fails with [`ZipError::IncorrectCentralDirectoryPassword`]
    /// before decoding any entries if the password is wrong.
    /// (Archives without an encrypted central directory open just fine.)
    pub fn open_encrypted<P: AsRef<Utf8Path>>(path: P, password: &[u8]) -> ZipResult<Self> {
        Self::discover(path.as_ref(), Some(password), &mut NoopObserver, false)
    }

    /// Opens an archive, reporting each record to `observer` as it goes,
    /// local file headers included.
    pub fn open_observed<P: AsRef<Utf8Path>, O: RecordObserver>(
        path: P,
        password: Option<&[u8]>,
        observer: &mut O,
    ) -> ZipResult<Self> {
        Self::discover(path.as_ref(), password, observer, true)
    }

    pub(crate) fn from_parts(
        volumes: VolumeSet,
        eocdr: EndOfCentralDirectory,
        zip64_locator: Option<Zip64EndOfCentralDirectoryLocator>,
        zip64_eocdr: Option<Zip64EndOfCentralDirectory>,
        central_directory_encryption: Option<CentralDirectoryEncryption>,
        entries: Vec<FileMetadata>,
    ) -> Self {
        Self {
            volumes,
            eocdr,
            zip64_locator,
            zip64_eocdr,
            central_directory_encryption,
            entries,
        }
    }

    fn discover<O: RecordObserver>(
        path: &Utf8Path,
        password: Option<&[u8]>,
        observer: &mut O,
        walk_local_headers: bool,
    ) -> ZipResult<Self> {
        // The end of central directory record sits in the last volume,
        // which is the one we were pointed at.
        let mut last = DataInput::new(File::open(path)?);
        let last_len = last.get_mut().seek(SeekFrom::End(0))?;
        let tail_len = std::cmp::min(
            last_len,
            (EndOfCentralDirectory::FIXED_SIZE + u16::MAX as usize) as u64,
        );
        let tail_start = last_len - tail_len;
        last.seek(tail_start)?;
        let tail = last.read_bytes(tail_len)?;

        let eocdr_posit = find_eocdr(&tail)?;
        let eocdr_offset = tail_start + eocdr_posit as u64;
        let eocdr = EndOfCentralDirectory::read(&mut DataInput::new(io::Cursor::new(
            &tail[eocdr_posit..],
        )))?;
        trace!("{:?}", eocdr);
        observer.end_of_central_directory(eocdr_offset, &eocdr);

        // The Zip64 locator, if there is one, is right before the EOCDR.
        let locator_size = Zip64EndOfCentralDirectoryLocator::SIZE as u64;
        let zip64_locator = if eocdr_offset >= locator_size {
            last.seek(eocdr_offset - locator_size)?;
            if last.peek_signature()? == ZIP64_EOCDR_LOCATOR_SIGNATURE {
                let locator = Zip64EndOfCentralDirectoryLocator::read(&mut last)?;
                trace!("{:?}", locator);
                observer.zip64_locator(eocdr_offset - locator_size, &locator);
                Some(locator)
            } else {
                None
            }
        } else {
            None
        };
        drop(last);

        let disks = match &zip64_locator {
            Some(locator) => std::cmp::max(locator.disks, 1),
            None => eocdr.total_disks(),
        };
        let volumes = if disks > 1 {
            VolumeSet::split(path, disks)?
        } else {
            VolumeSet::solid(path)?
        };
        let mut input = DataInput::new(volumes.reader());

        let zip64_eocdr = match &zip64_locator {
            Some(locator) => {
                let offset = volumes
                    .absolute_offset(locator.disk_with_zip64_eocdr, locator.zip64_eocdr_offset)?;
                input.seek(offset)?;
                let record = Zip64EndOfCentralDirectory::read(&mut input)?;
                trace!("{:?}", record);
                observer.zip64_end_of_central_directory(offset, &record);
                Some(record)
            }
            None => {
                if eocdr.has_sentinels() {
                    warn!("End of central directory record has Zip64 sentinels, but no Zip64 locator");
                }
                None
            }
        };

        // The Zip64 record takes precedence whenever it's there.
        let (entry_count, cd_size, cd_offset, cd_disk) = match &zip64_eocdr {
            Some(z) => (
                z.entries,
                z.central_directory_size,
                z.central_directory_offset,
                z.disk_with_central_directory,
            ),
            None => (
                eocdr.entries as u64,
                eocdr.central_directory_size as u64,
                eocdr.central_directory_offset as u64,
                eocdr.disk_with_central_directory as u32,
            ),
        };
        let cd_start = volumes.absolute_offset(cd_disk, cd_offset)?;
        if cd_start
            .checked_add(cd_size)
            .map_or(true, |end| end > volumes.total_len())
        {
            return Err(ZipError::InvalidArchive(
                "Invalid central directory size or offset",
            ));
        }
        trace!("{} entries at offset {}", entry_count, cd_start);

        let central_directory_encryption = match &zip64_eocdr {
            Some(z)
                if z.minimum_extract_version & 0xff >= VERSION_CENTRAL_DIRECTORY_ENCRYPTION
                    && !z.extensible_data.is_empty() =>
            {
                let encryption = CentralDirectoryEncryption::parse(&z.extensible_data)?;
                debug!("Central directory is encrypted: {:?}", encryption);
                Some(encryption)
            }
            _ => None,
        };

        // Don't let a bogus count make us allocate the world.
        let capacity = std::cmp::min(
            entry_count,
            cd_size / CentralDirectoryEntry::FIXED_SIZE as u64,
        );
        let mut entries = Vec::with_capacity(usize(capacity)?);

        match &central_directory_encryption {
            Some(encryption) => {
                let plaintext =
                    decrypt_central_directory(&mut input, cd_start, cd_size, encryption, password)?;
                let mut plain_input = DataInput::new(io::Cursor::new(plaintext));
                read_entries(&mut plain_input, entry_count, observer, &mut entries)?;
            }
            None => {
                input.seek(cd_start)?;
                read_entries(&mut input, entry_count, observer, &mut entries)?;
            }
        }

        if walk_local_headers {
            for entry in &entries {
                let offset = volumes.absolute_offset(entry.disk_number, entry.header_offset)?;
                input.seek(offset)?;
                let local = LocalFileHeader::read(&mut input)?;
                observer.local_file_header(offset, &local);
            }
        }

        Ok(Self {
            volumes,
            eocdr,
            zip64_locator,
            zip64_eocdr,
            central_directory_encryption,
            entries,
        })
    }

    /// Returns the entries found in the ZIP archive's central directory.
    ///
    /// No effort is made to deduplicate or otherwise validate these entries.
    pub fn entries(&self) -> &[FileMetadata] {
        &self.entries
    }

    /// Looks up an entry by its path in the archive.
    pub fn by_name<P: AsRef<Utf8Path>>(&self, path: P) -> ZipResult<&FileMetadata> {
        let path = path.as_ref();
        self.entries
            .iter()
            .find(|e| e.path == path)
            .ok_or_else(|| ZipError::NoSuchFile(path.to_owned()))
    }

    pub fn volumes(&self) -> &VolumeSet {
        &self.volumes
    }

    /// The number of volumes the archive spans
    pub fn total_disks(&self) -> u32 {
        match &self.zip64_locator {
            Some(locator) => locator.disks,
            None => self.eocdr.total_disks(),
        }
    }

    pub fn end_of_central_directory(&self) -> &EndOfCentralDirectory {
        &self.eocdr
    }

    pub fn zip64_locator(&self) -> Option<&Zip64EndOfCentralDirectoryLocator> {
        self.zip64_locator.as_ref()
    }

    pub fn zip64_end_of_central_directory(&self) -> Option<&Zip64EndOfCentralDirectory> {
        self.zip64_eocdr.as_ref()
    }

    pub fn central_directory_encryption(&self) -> Option<&CentralDirectoryEncryption> {
        self.central_directory_encryption.as_ref()
    }

    /// The archive comment
    pub fn comment(&self) -> &[u8] {
        &self.eocdr.file_comment
    }

    /// A fresh cursor for reading entries.
    pub fn reader(&self) -> VolumeReader {
        self.volumes.reader()
    }

    /// Reads the given entry through the given cursor.
    ///
    /// Since each file in a ZIP archive is compressed independently,
    /// multiple files can be read in parallel, each with its own cursor.
    pub fn read<'r>(
        &self,
        volume: &'r mut VolumeReader,
        metadata: &FileMetadata,
        password: Option<&[u8]>,
    ) -> ZipResult<EntryReader<'r>> {
        EntryReader::new(volume, metadata, password)
    }

    /// Reads a whole entry into memory.
    pub fn read_to_vec(&self, metadata: &FileMetadata, password: Option<&[u8]>) -> ZipResult<Vec<u8>> {
        let mut volume = self.reader();
        let mut reader = self.read(&mut volume, metadata, password)?;
        let mut contents = Vec::with_capacity(usize(std::cmp::min(metadata.size, 1 << 20))?);
        reader.read_to_end(&mut contents)?;
        Ok(contents)
    }
}

fn read_entries<R: Read + Seek, O: RecordObserver>(
    input: &mut DataInput<R>,
    count: u64,
    observer: &mut O,
    entries: &mut Vec<FileMetadata>,
) -> ZipResult<()> {
    for _ in 0..count {
        let offset = input.position()?;
        let dir_entry = CentralDirectoryEntry::read(input)?;
        trace!("{:?}", dir_entry);
        observer.central_directory_entry(offset, &dir_entry);

        let file_metadata = FileMetadata::from_cde(&dir_entry)?;
        debug!("{:?}", file_metadata);
        entries.push(file_metadata);
    }
    Ok(())
}

/// Decrypts (and decompresses) a Strong-encrypted central directory:
/// an archive decryption header, an archive extra data record,
/// then the ciphertext.
fn decrypt_central_directory(
    input: &mut DataInput<VolumeReader>,
    cd_start: u64,
    cd_size: u64,
    encryption: &CentralDirectoryEncryption,
    password: Option<&[u8]>,
) -> ZipResult<Vec<u8>> {
    let password = password.ok_or(ZipError::IncorrectCentralDirectoryPassword)?;
    input.seek(cd_start)?;
    let header = DecryptionHeader::read(input.get_mut())?;
    trace!("{:?}", header);
    let extra_data = ArchiveExtraData::read(input)?;
    trace!("{:?}", extra_data);

    let ciphertext_start = input.position()?;
    let ciphertext_len = (cd_start + cd_size)
        .checked_sub(ciphertext_start)
        .ok_or(ZipError::InvalidArchive(
            "Central directory decryption header runs past the central directory",
        ))?;

    let key = header
        .unlock(password, &Utf8PathBuf::from("central directory"))
        .map_err(|e| match e {
            ZipError::IncorrectPassword(_) => ZipError::IncorrectCentralDirectoryPassword,
            other => other,
        })?;
    let method = CompressionMethod::from_u16(encryption.compression_method);
    let mut decryptor = StrongReader::with_key(Read::take(input.get_mut(), ciphertext_len), key);
    if method == CompressionMethod::Stored {
        decryptor = decryptor.limit(encryption.original_size);
    }
    let mut decompressor = Decompressor::new(method, decryptor)?;
    let mut plaintext = Vec::with_capacity(usize(std::cmp::min(encryption.original_size, 1 << 24))?);
    decompressor.read_to_end(&mut plaintext)?;
    if plaintext.len() as u64 != encryption.original_size {
        return Err(ZipError::InvalidArchive(
            "Decrypted central directory isn't the size it claims",
        ));
    }
    Ok(plaintext)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::extra_field::{AesExtraField, ExtraField, Zip64ExtendedInformation};
    use crate::crypto::aes::AesStrength;

    fn cde(path: &[u8]) -> CentralDirectoryEntry {
        CentralDirectoryEntry {
            source_version: (3 << 8) | 20,
            minimum_extract_version: 20,
            path: path.to_vec(),
            external_file_attributes: 0o100644 << 16,
            ..Default::default()
        }
    }

    #[test]
    fn cp437_names() -> ZipResult<()> {
        // 0x82 is é in CP437
        let metadata = FileMetadata::from_cde(&cde(b"caf\x82.txt"))?;
        assert_eq!(metadata.path, "café.txt");
        assert_eq!(metadata.unix_mode, Some(0o100644));
        assert!(metadata.is_file());
        Ok(())
    }

    #[test]
    fn utf8_names() -> ZipResult<()> {
        let mut entry = cde("naïve/".as_bytes());
        entry.flags |= FLAG_UTF8;
        let metadata = FileMetadata::from_cde(&entry)?;
        assert_eq!(metadata.path, "naïve/");
        assert!(metadata.is_dir());
        Ok(())
    }

    #[test]
    fn symlinks_by_mode() -> ZipResult<()> {
        let mut entry = cde(b"link");
        entry.external_file_attributes = 0o120777 << 16;
        entry.uncompressed_size = 6;
        let metadata = FileMetadata::from_cde(&entry)?;
        assert!(metadata.is_symlink());
        assert!(!metadata.is_file());
        Ok(())
    }

    #[test]
    fn zip64_values_replace_sentinels() -> ZipResult<()> {
        let mut entry = cde(b"big");
        entry.uncompressed_size = ZIP64_SENTINEL_32;
        entry.header_offset = ZIP64_SENTINEL_32;
        entry.compressed_size = 1000;
        let mut extra = ExtraFields::new();
        extra.push(ExtraField::Zip64(Zip64ExtendedInformation {
            uncompressed_size: Some(1 << 32),
            header_offset: Some(5 << 32),
            ..Default::default()
        }));
        entry.extra_field = extra.to_bytes();
        let metadata = FileMetadata::from_cde(&entry)?;
        assert_eq!(metadata.size, 1 << 32);
        assert_eq!(metadata.compressed_size, 1000);
        assert_eq!(metadata.header_offset, 5 << 32);
        assert!(metadata.needs_zip64_sizes());
        Ok(())
    }

    #[test]
    fn sentinel_without_zip64_field() {
        let mut entry = cde(b"big");
        entry.compressed_size = ZIP64_SENTINEL_32;
        match FileMetadata::from_cde(&entry) {
            Err(e @ ZipError::MissingZip64Field { .. }) => {
                let message = e.to_string();
                assert!(message.contains("big"), "{}", message);
                assert!(message.contains("compressed size"), "{}", message);
            }
            other => panic!("Expected MissingZip64Field, got {:?}", other),
        }
    }

    #[test]
    fn aes_method_comes_from_extra_field() -> ZipResult<()> {
        let mut entry = cde(b"secret");
        entry.flags = FLAG_ENCRYPTED;
        entry.compression_method = AES_METHOD;
        let mut extra = ExtraFields::new();
        extra.push(ExtraField::Aes(AesExtraField {
            vendor_version: AesVendorVersion::Ae2,
            strength: AesStrength::Aes192,
            compression_method: 8,
        }));
        entry.extra_field = extra.to_bytes();
        let metadata = FileMetadata::from_cde(&entry)?;
        assert_eq!(metadata.compression_method, CompressionMethod::Deflate);
        assert_eq!(
            metadata.encryption,
            EncryptionMethod::Aes {
                strength: AesStrength::Aes192,
                vendor_version: AesVendorVersion::Ae2
            }
        );
        assert_eq!(metadata.stored_method(), AES_METHOD);

        entry.extra_field.clear();
        assert!(matches!(
            FileMetadata::from_cde(&entry),
            Err(ZipError::UnsupportedEncryptionMethod(_))
        ));
        Ok(())
    }

    #[test]
    fn pkware_and_strong_flags() -> ZipResult<()> {
        let mut entry = cde(b"secret");
        entry.flags = FLAG_ENCRYPTED;
        assert_eq!(
            FileMetadata::from_cde(&entry)?.encryption,
            EncryptionMethod::Pkware
        );
        entry.flags |= FLAG_STRONG_ENCRYPTION;
        assert!(matches!(
            FileMetadata::from_cde(&entry)?.encryption,
            EncryptionMethod::Strong(_)
        ));
        Ok(())
    }

    #[test]
    fn not_a_zip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = Utf8PathBuf::from_path_buf(dir.path().join("nope.zip")).unwrap();
        std::fs::write(&path, b"This is not the archive you're looking for")?;
        assert!(matches!(
            ZipArchive::open(&path),
            Err(ZipError::NotAZipArchive)
        ));
        Ok(())
    }
}
