//! Code specific to the ZIP file format specification.
//!
//! We try to keep the nitty gritty here,
//! and higher-level stuff in the [`read`] and [`write`] modules.
//!
//! Most comments quote the ZIP spec, [`APPNOTE.TXT`].
//!
//! [_Zip Files: History, Explanation and Implementation_]
//! is also a fantastic resource and a great read.
//!
//! [`read`]: ../read/index.html
//! [`write`]: ../write/index.html
//! [`APPNOTE.TXT`]: https://pkware.cachefly.net/webdocs/APPNOTE/APPNOTE-6.3.9.TXT
//! [_Zip Files: History, Explanation and Implementation_]: https://www.hanshq.net/zip.html

use std::io::{Read, Seek, Write};

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use memchr::memmem;

use crate::cursor::{DataInput, DataOutput};
use crate::result::*;

// Magic numbers denoting various sections of a ZIP archive

pub const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x04034b50;
pub const CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x02014b50;
pub const EOCDR_SIGNATURE: u32 = 0x06054b50;
pub const ZIP64_EOCDR_SIGNATURE: u32 = 0x06064b50;
pub const ZIP64_EOCDR_LOCATOR_SIGNATURE: u32 = 0x07064b50;
pub const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x08074b50;
/// Starts the first volume of a split archive.
/// (Yes, it's the same as the data descriptor signature.)
pub const SPLIT_ARCHIVE_SIGNATURE: u32 = 0x08074b50;
/// Starts a split archive that only ever needed one volume.
pub const SPLIT_TEMPORARY_SIGNATURE: u32 = 0x30304b50;
pub const ARCHIVE_EXTRA_DATA_SIGNATURE: u32 = 0x08064b50;

const EOCDR_MAGIC: [u8; 4] = EOCDR_SIGNATURE.to_le_bytes();

/// Zip64 records are emitted when a value reaches these.
pub const ZIP64_SENTINEL_32: u32 = u32::MAX;
pub const ZIP64_SENTINEL_16: u16 = u16::MAX;

/// The compression method stored for WinZip AES entries.
/// The real one lives in the AES extra field.
pub const AES_METHOD: u16 = 99;

pub const VERSION_DEFAULT: u16 = 20;
pub const VERSION_ZIP64: u16 = 45;
pub const VERSION_AES: u16 = 51;
pub const VERSION_STRONG_ENCRYPTION: u16 = 51;
pub const VERSION_CENTRAL_DIRECTORY_ENCRYPTION: u16 = 62;

// General purpose bit flags

/// Bit 0: If set, indicates that the file is encrypted.
pub const FLAG_ENCRYPTED: u16 = 1 << 0;
/// Bit 3: the CRC-32 and sizes are in a data descriptor after the data.
pub const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;
/// Bit 6: Strong encryption.  If this bit is set, you MUST
/// set the version needed to extract value to at least
/// 50 and you MUST also set bit 0.
pub const FLAG_STRONG_ENCRYPTION: u16 = 1 << 6;
/// Bit 11: Language encoding flag (EFS).
pub const FLAG_UTF8: u16 = 1 << 11;
/// Bit 13: Set when encrypting the Central Directory
/// to indicate selected data values in the Local Header are masked.
pub const FLAG_MASKED_LOCAL_HEADER: u16 = 1 << 13;

/// Extracts the "is this text UTF-8?" bit from the 16-bit flags field.
///
/// If false, text is assumped to be CP437.
pub fn is_utf8(flags: u16) -> bool {
    flags & FLAG_UTF8 != 0
}

/// Extracts the "is this file encrypted?" bit from the 16-bit flags field.
pub fn is_encrypted(flags: u16) -> bool {
    flags & FLAG_ENCRYPTED != 0
}

pub fn is_strong_encrypted(flags: u16) -> bool {
    flags & FLAG_STRONG_ENCRYPTION != 0
}

pub fn has_data_descriptor(flags: u16) -> bool {
    flags & FLAG_DATA_DESCRIPTOR != 0
}

/// Compression methods we know by name
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unsupported(u16),
}

impl CompressionMethod {
    pub fn from_u16(u: u16) -> Self {
        match u {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            v => CompressionMethod::Unsupported(v),
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unsupported(v) => v,
        }
    }
}

/// The OS a file in the archive was compressed with.
/// Used to decode additional metadata like permissions
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum System {
    Dos,
    Unix,
    Unknown(u8),
}

impl System {
    pub fn from_source_version(source_version: u16) -> Self {
        // 4.4.2.1 The upper byte indicates the compatibility of the file
        // attribute information.  If the external file attributes
        // are compatible with MS-DOS and can be read by PKZIP for
        // DOS version 2.04g then this value will be zero.  If these
        // attributes are not compatible, then this value will
        // identify the host system on which the attributes are
        // compatible.
        //
        // 4.4.2.2 The current mappings are:
        //
        //  0 - MS-DOS and OS/2 (FAT / VFAT / FAT32 file systems)
        //  3 - UNIX
        //  (and a bunch we don't care about)
        match source_version >> 8 {
            0 => System::Dos,
            3 => System::Unix,
            other => System::Unknown(other as u8),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            System::Dos => 0,
            System::Unix => 3,
            System::Unknown(b) => b,
        }
    }
}

/// Decodes an MS-DOS date and time, or returns `None` if they're nonsense
/// (like the all-zero timestamps some tools write).
pub fn parse_msdos(time: u16, date: u16) -> Option<NaiveDateTime> {
    let seconds = (0b0000_0000_0001_1111 & time) as u32 * 2; // MSDOS uses 2-second precision
    let minutes = (0b0000_0111_1110_0000 & time) as u32 >> 5;
    let hours = (0b1111_1000_0000_0000 & time) as u32 >> 11;

    let days = (0b0000_0000_0001_1111 & date) as u32;
    let months = (0b0000_0001_1110_0000 & date) as u32 >> 5;
    // MSDOS uses years since 1980; Always interpreted as a positive value
    let years = ((0b1111_1110_0000_0000 & date) >> 9) as i32 + 1980;

    NaiveDate::from_ymd_opt(years, months, days)?.and_hms_opt(hours, minutes, seconds)
}

/// Encodes a timestamp as MS-DOS `(time, date)`,
/// clamping it to the 1980-2107 range the format can hold.
pub fn to_msdos(when: NaiveDateTime) -> (u16, u16) {
    let (year, month, day) = match when.year() {
        y if y < 1980 => (1980, 1, 1),
        y if y > 2107 => (2107, 12, 31),
        y => (y, when.month(), when.day()),
    };
    let date = (((year - 1980) as u16) << 9) | ((month as u16) << 5) | day as u16;
    let time = ((when.hour() as u16) << 11)
        | ((when.minute() as u16) << 5)
        | (when.second() as u16 / 2);
    (time, date)
}

/// Data from the End of central directory record
///
/// Found at the back of the ZIP archive and provides offsets for finding
/// its central directory, along with the disk bookkeeping that
/// split archives still rely on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_central_directory: u16,
    pub entries_on_this_disk: u16,
    pub entries: u16,
    pub central_directory_size: u32,
    pub central_directory_offset: u32,
    pub file_comment: Vec<u8>,
}

impl EndOfCentralDirectory {
    pub const FIXED_SIZE: usize = 22;

    pub fn read<R: Read + Seek>(input: &mut DataInput<R>) -> ZipResult<Self> {
        // 4.3.16  End of central directory record:
        //
        // end of central dir signature    4 bytes  (0x06054b50)
        // number of this disk             2 bytes
        // number of the disk with the
        // start of the central directory  2 bytes
        // total number of entries in
        // the central dir on this disk    2 bytes
        // total number of entries in
        // the central dir                 2 bytes
        // size of the central directory   4 bytes
        // offset of start of central
        // directory with respect to
        // the starting disk number        4 bytes
        // zipfile comment length          2 bytes
        // .ZIP file comment       (variable size)
        input.expect_signature("end of central directory record", EOCDR_SIGNATURE)?;
        let disk_number = input.read_u16()?;
        let disk_with_central_directory = input.read_u16()?;
        let entries_on_this_disk = input.read_u16()?;
        let entries = input.read_u16()?;
        let central_directory_size = input.read_u32()?;
        let central_directory_offset = input.read_u32()?;
        let comment_length = input.read_u16()?;
        let file_comment = input.read_bytes(comment_length)?;

        Ok(Self {
            disk_number,
            disk_with_central_directory,
            entries_on_this_disk,
            entries,
            central_directory_size,
            central_directory_offset,
            file_comment,
        })
    }

    pub fn write<W: Write>(&self, out: &mut DataOutput<W>) -> ZipResult<()> {
        out.write_u32(EOCDR_SIGNATURE)?;
        out.write_u16(self.disk_number)?;
        out.write_u16(self.disk_with_central_directory)?;
        out.write_u16(self.entries_on_this_disk)?;
        out.write_u16(self.entries)?;
        out.write_u32(self.central_directory_size)?;
        out.write_u32(self.central_directory_offset)?;
        out.write_len_u16(self.file_comment.len(), "Archive comment too long")?;
        out.write_bytes(&self.file_comment)
    }

    /// Total number of volumes in the archive.
    /// The EOCD is always on the last one.
    pub fn total_disks(&self) -> u32 {
        self.disk_number as u32 + 1
    }

    /// True if any field is a sentinel pointing at the Zip64 record.
    pub fn has_sentinels(&self) -> bool {
        self.disk_number == ZIP64_SENTINEL_16
            || self.disk_with_central_directory == ZIP64_SENTINEL_16
            || self.entries_on_this_disk == ZIP64_SENTINEL_16
            || self.entries == ZIP64_SENTINEL_16
            || self.central_directory_size == ZIP64_SENTINEL_32
            || self.central_directory_offset == ZIP64_SENTINEL_32
    }
}

/// Searches backward through the tail of an archive to find the
/// End of central directory record.
///
/// It should be right at the end of the file,
/// but its variable-length comment means we can't jump to a known offset.
/// The signature can also show up inside the comment (or compressed data),
/// so only accept a match whose record (and comment) fits in what's left.
pub fn find_eocdr(tail: &[u8]) -> ZipResult<usize> {
    let mut haystack = tail;
    while let Some(candidate) = memmem::rfind(haystack, &EOCDR_MAGIC) {
        let end_of_fixed = candidate + EndOfCentralDirectory::FIXED_SIZE;
        if end_of_fixed <= tail.len() {
            let comment_length =
                u16::from_le_bytes([tail[end_of_fixed - 2], tail[end_of_fixed - 1]]) as usize;
            if end_of_fixed + comment_length <= tail.len() {
                return Ok(candidate);
            }
        }
        haystack = &tail[..candidate];
    }
    Err(ZipError::NotAZipArchive)
}

/// Data from the Zip64 end of central directory locator
///
/// This should immediately precede the End of central directory record
/// on Zip64 files and tell us where to find the Zip64 end of central directory record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zip64EndOfCentralDirectoryLocator {
    pub disk_with_zip64_eocdr: u32,
    pub zip64_eocdr_offset: u64,
    pub disks: u32,
}

impl Zip64EndOfCentralDirectoryLocator {
    pub const SIZE: usize = 20;

    pub fn read<R: Read + Seek>(input: &mut DataInput<R>) -> ZipResult<Self> {
        // 4.3.15 Zip64 end of central directory locator
        //
        // zip64 end of central dir locator
        // signature                       4 bytes  (0x07064b50)
        // number of the disk with the
        // start of the zip64 end of
        // central directory               4 bytes
        // relative offset of the zip64
        // end of central directory record 8 bytes
        // total number of disks           4 bytes
        input.expect_signature(
            "zip64 end of central directory locator",
            ZIP64_EOCDR_LOCATOR_SIGNATURE,
        )?;
        let disk_with_zip64_eocdr = input.read_u32()?;
        let zip64_eocdr_offset = input.read_u64()?;
        let disks = input.read_u32()?;

        Ok(Self {
            disk_with_zip64_eocdr,
            zip64_eocdr_offset,
            disks,
        })
    }

    pub fn write<W: Write>(&self, out: &mut DataOutput<W>) -> ZipResult<()> {
        out.write_u32(ZIP64_EOCDR_LOCATOR_SIGNATURE)?;
        out.write_u32(self.disk_with_zip64_eocdr)?;
        out.write_u64(self.zip64_eocdr_offset)?;
        out.write_u32(self.disks)
    }
}

/// Data from the Zip64 end of central directory record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zip64EndOfCentralDirectory {
    pub source_version: u16,
    pub minimum_extract_version: u16,
    pub disk_number: u32,
    pub disk_with_central_directory: u32,
    pub entries_on_this_disk: u64,
    pub entries: u64,
    pub central_directory_size: u64,
    pub central_directory_offset: u64,
    pub extensible_data: Vec<u8>,
}

impl Zip64EndOfCentralDirectory {
    pub const FIXED_SIZE: usize = 56;

    pub fn read<R: Read + Seek>(input: &mut DataInput<R>) -> ZipResult<Self> {
        // 4.3.14  Zip64 end of central directory record
        //
        // zip64 end of central dir
        // signature                       4 bytes  (0x06064b50)
        // size of zip64 end of central
        // directory record                8 bytes
        // version made by                 2 bytes
        // version needed to extract       2 bytes
        // number of this disk             4 bytes
        // number of the disk with the
        // start of the central directory  4 bytes
        // total number of entries in the
        // central directory on this disk  8 bytes
        // total number of entries in the
        // central directory               8 bytes
        // size of the central directory   8 bytes
        // offset of start of central
        // directory with respect to
        // the starting disk number        8 bytes
        // zip64 extensible data sector    (variable size)
        input.expect_signature(
            "zip64 end of central directory record",
            ZIP64_EOCDR_SIGNATURE,
        )?;
        let eocdr_size = input.read_u64()?;
        let source_version = input.read_u16()?;
        let minimum_extract_version = input.read_u16()?;
        let disk_number = input.read_u32()?;
        let disk_with_central_directory = input.read_u32()?;
        let entries_on_this_disk = input.read_u64()?;
        let entries = input.read_u64()?;
        let central_directory_size = input.read_u64()?;
        let central_directory_offset = input.read_u64()?;

        // 4.3.14.1 The value stored into the "size of zip64 end of central
        // directory record" SHOULD be the size of the remaining
        // record and SHOULD NOT include the leading 12 bytes.
        //
        // Size = SizeOfFixedFields + SizeOfVariableData - 12.
        // (SizeOfVariableData = Size - SizeOfFixedFields + 12)
        let extensible_data_length = (eocdr_size + 12)
            .checked_sub(Self::FIXED_SIZE as u64)
            .ok_or(ZipError::InvalidArchive(
                "Invalid extensible data length in Zip64 End Of Central Directory Record",
            ))?;
        let extensible_data = input.read_bytes(extensible_data_length)?;

        Ok(Self {
            source_version,
            minimum_extract_version,
            disk_number,
            disk_with_central_directory,
            entries_on_this_disk,
            entries,
            central_directory_size,
            central_directory_offset,
            extensible_data,
        })
    }

    pub fn write<W: Write>(&self, out: &mut DataOutput<W>) -> ZipResult<()> {
        out.write_u32(ZIP64_EOCDR_SIGNATURE)?;
        out.write_u64((Self::FIXED_SIZE - 12 + self.extensible_data.len()) as u64)?;
        out.write_u16(self.source_version)?;
        out.write_u16(self.minimum_extract_version)?;
        out.write_u32(self.disk_number)?;
        out.write_u32(self.disk_with_central_directory)?;
        out.write_u64(self.entries_on_this_disk)?;
        out.write_u64(self.entries)?;
        out.write_u64(self.central_directory_size)?;
        out.write_u64(self.central_directory_offset)?;
        out.write_bytes(&self.extensible_data)
    }
}

/// Describes an encrypted central directory,
/// as found in the extensible data of a version 2 Zip64 EOCDR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentralDirectoryEncryption {
    pub compression_method: u16,
    pub compressed_size: u64,
    pub original_size: u64,
    pub algorithm: u16,
    pub bit_length: u16,
    pub flags: u16,
    pub hash_algorithm: u16,
    pub hash_data: Vec<u8>,
}

impl CentralDirectoryEncryption {
    pub fn parse(extensible_data: &[u8]) -> ZipResult<Self> {
        // 7.3.4 Zip64 End of Central Directory Record (version 2):
        //
        //   Compression Method  2 bytes
        //   Compressed Size     8 bytes
        //   Original Size       8 bytes
        //   AlgId               2 bytes
        //   BitLen              2 bytes
        //   Flags               2 bytes
        //   HashID              2 bytes
        //   Hash Length         2 bytes
        //   Hash Data           (variable)
        let mut input = DataInput::new(std::io::Cursor::new(extensible_data));
        let compression_method = input.read_u16()?;
        let compressed_size = input.read_u64()?;
        let original_size = input.read_u64()?;
        let algorithm = input.read_u16()?;
        let bit_length = input.read_u16()?;
        let flags = input.read_u16()?;
        let hash_algorithm = input.read_u16()?;
        let hash_length = input.read_u16()?;
        let hash_data = input.read_bytes(hash_length)?;
        Ok(Self {
            compression_method,
            compressed_size,
            original_size,
            algorithm,
            bit_length,
            flags,
            hash_algorithm,
            hash_data,
        })
    }

    pub fn write<W: Write>(&self, out: &mut DataOutput<W>) -> ZipResult<()> {
        out.write_u16(self.compression_method)?;
        out.write_u64(self.compressed_size)?;
        out.write_u64(self.original_size)?;
        out.write_u16(self.algorithm)?;
        out.write_u16(self.bit_length)?;
        out.write_u16(self.flags)?;
        out.write_u16(self.hash_algorithm)?;
        out.write_len_u16(self.hash_data.len(), "Hash data too long")?;
        out.write_bytes(&self.hash_data)
    }
}

/// Data from the archive extra data record,
/// which sits between the archive decryption header
/// and an encrypted central directory.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ArchiveExtraData {
    pub data: Vec<u8>,
}

impl ArchiveExtraData {
    pub fn read<R: Read + Seek>(input: &mut DataInput<R>) -> ZipResult<Self> {
        // 4.3.11  Archive extra data record:
        //
        // archive extra data signature    4 bytes  (0x08064b50)
        // extra field length              4 bytes
        // extra field data                (variable size)
        input.expect_signature("archive extra data record", ARCHIVE_EXTRA_DATA_SIGNATURE)?;
        let len = input.read_u32()?;
        let data = input.read_bytes(len)?;
        Ok(Self { data })
    }

    pub fn write<W: Write>(&self, out: &mut DataOutput<W>) -> ZipResult<()> {
        out.write_u32(ARCHIVE_EXTRA_DATA_SIGNATURE)?;
        out.write_u32(self.data.len() as u32)?;
        out.write_bytes(&self.data)
    }
}

/// Data from a central directory entry
///
/// Each of these records contians information about a file or folder
/// stored in the ZIP archive.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CentralDirectoryEntry {
    pub source_version: u16,
    pub minimum_extract_version: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub disk_number: u16,
    pub internal_file_attributes: u16,
    pub external_file_attributes: u32,
    pub header_offset: u32,
    pub path: Vec<u8>,
    pub extra_field: Vec<u8>,
    pub file_comment: Vec<u8>,
}

impl CentralDirectoryEntry {
    pub const FIXED_SIZE: usize = 46;

    pub fn read<R: Read + Seek>(input: &mut DataInput<R>) -> ZipResult<Self> {
        // 4.3.12  Central directory structure:
        //
        // [central directory header 1]
        // .
        // .
        // .
        // [central directory header n]
        // [digital signature]
        //
        // File header:
        //
        //   central file header signature   4 bytes  (0x02014b50)
        //   version made by                 2 bytes
        //   version needed to extract       2 bytes
        //   general purpose bit flag        2 bytes
        //   compression method              2 bytes
        //   last mod file time              2 bytes
        //   last mod file date              2 bytes
        //   crc-32                          4 bytes
        //   compressed size                 4 bytes
        //   uncompressed size               4 bytes
        //   file name length                2 bytes
        //   extra field length              2 bytes
        //   file comment length             2 bytes
        //   disk number start               2 bytes
        //   internal file attributes        2 bytes
        //   external file attributes        4 bytes
        //   relative offset of local header 4 bytes
        //
        //   file name (variable size)
        //   extra field (variable size)
        //   file comment (variable size)
        input.expect_signature("central directory header", CENTRAL_DIRECTORY_SIGNATURE)?;
        let source_version = input.read_u16()?;
        let minimum_extract_version = input.read_u16()?;
        let flags = input.read_u16()?;
        let compression_method = input.read_u16()?;
        let last_modified_time = input.read_u16()?;
        let last_modified_date = input.read_u16()?;
        let crc32 = input.read_u32()?;
        let compressed_size = input.read_u32()?;
        let uncompressed_size = input.read_u32()?;
        let path_length = input.read_u16()?;
        let extra_field_length = input.read_u16()?;
        let file_comment_length = input.read_u16()?;
        let disk_number = input.read_u16()?;
        let internal_file_attributes = input.read_u16()?;
        let external_file_attributes = input.read_u32()?;
        let header_offset = input.read_u32()?;
        let path = input.read_bytes(path_length)?;
        let extra_field = input.read_bytes(extra_field_length)?;
        let file_comment = input.read_bytes(file_comment_length)?;

        Ok(Self {
            source_version,
            minimum_extract_version,
            flags,
            compression_method,
            last_modified_time,
            last_modified_date,
            crc32,
            compressed_size,
            uncompressed_size,
            disk_number,
            internal_file_attributes,
            external_file_attributes,
            header_offset,
            path,
            extra_field,
            file_comment,
        })
    }

    pub fn write<W: Write>(&self, out: &mut DataOutput<W>) -> ZipResult<()> {
        out.write_u32(CENTRAL_DIRECTORY_SIGNATURE)?;
        out.write_u16(self.source_version)?;
        out.write_u16(self.minimum_extract_version)?;
        out.write_u16(self.flags)?;
        out.write_u16(self.compression_method)?;
        out.write_u16(self.last_modified_time)?;
        out.write_u16(self.last_modified_date)?;
        out.write_u32(self.crc32)?;
        out.write_u32(self.compressed_size)?;
        out.write_u32(self.uncompressed_size)?;
        out.write_len_u16(self.path.len(), "File name too long")?;
        out.write_len_u16(self.extra_field.len(), "Extra field too long")?;
        out.write_len_u16(self.file_comment.len(), "File comment too long")?;
        out.write_u16(self.disk_number)?;
        out.write_u16(self.internal_file_attributes)?;
        out.write_u32(self.external_file_attributes)?;
        out.write_u32(self.header_offset)?;
        out.write_bytes(&self.path)?;
        out.write_bytes(&self.extra_field)?;
        out.write_bytes(&self.file_comment)
    }

    pub fn size_in_file(&self) -> usize {
        Self::FIXED_SIZE + self.path.len() + self.extra_field.len() + self.file_comment.len()
    }
}

/// Data from a local file header
///
/// Each files' actual contents is preceded by this header.
/// These headers allow for "streaming" decompression without
/// the use of the central directory,
/// but we only use them to find the data (and sanity-check the CD).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocalFileHeader {
    pub minimum_extract_version: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub path: Vec<u8>,
    pub extra_field: Vec<u8>,
}

impl LocalFileHeader {
    pub const FIXED_SIZE: usize = 30;

    pub fn read<R: Read + Seek>(input: &mut DataInput<R>) -> ZipResult<Self> {
        // 4.3.7  Local file header:
        //
        // local file header signature     4 bytes  (0x04034b50)
        // version needed to extract       2 bytes
        // general purpose bit flag        2 bytes
        // compression method              2 bytes
        // last mod file time              2 bytes
        // last mod file date              2 bytes
        // crc-32                          4 bytes
        // compressed size                 4 bytes
        // uncompressed size               4 bytes
        // file name length                2 bytes
        // extra field length              2 bytes
        //
        // file name (variable size)
        // extra field (variable size)
        input.expect_signature("local file header", LOCAL_FILE_HEADER_SIGNATURE)?;
        let minimum_extract_version = input.read_u16()?;
        let flags = input.read_u16()?;
        let compression_method = input.read_u16()?;
        let last_modified_time = input.read_u16()?;
        let last_modified_date = input.read_u16()?;
        let crc32 = input.read_u32()?;
        let compressed_size = input.read_u32()?;
        let uncompressed_size = input.read_u32()?;
        let path_length = input.read_u16()?;
        let extra_field_length = input.read_u16()?;
        let path = input.read_bytes(path_length)?;
        let extra_field = input.read_bytes(extra_field_length)?;

        Ok(Self {
            minimum_extract_version,
            flags,
            compression_method,
            last_modified_time,
            last_modified_date,
            crc32,
            compressed_size,
            uncompressed_size,
            path,
            extra_field,
        })
    }

    pub fn write<W: Write>(&self, out: &mut DataOutput<W>) -> ZipResult<()> {
        out.write_u32(LOCAL_FILE_HEADER_SIGNATURE)?;
        out.write_u16(self.minimum_extract_version)?;
        out.write_u16(self.flags)?;
        out.write_u16(self.compression_method)?;
        out.write_u16(self.last_modified_time)?;
        out.write_u16(self.last_modified_date)?;
        out.write_u32(self.crc32)?;
        out.write_u32(self.compressed_size)?;
        out.write_u32(self.uncompressed_size)?;
        out.write_len_u16(self.path.len(), "File name too long")?;
        out.write_len_u16(self.extra_field.len(), "Extra field too long")?;
        out.write_bytes(&self.path)?;
        out.write_bytes(&self.extra_field)
    }
}

/// Data from a data descriptor, which follows the file data
/// when the sizes and CRC weren't known when the local header was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataDescriptor {
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

impl DataDescriptor {
    pub fn read<R: Read + Seek>(input: &mut DataInput<R>, zip64: bool) -> ZipResult<Self> {
        // 4.3.9  Data descriptor:
        //
        //   crc-32                          4 bytes
        //   compressed size                 4 bytes
        //   uncompressed size               4 bytes
        //
        // 4.3.9.3 Although not originally assigned a signature, the value
        // 0x08074b50 has commonly been adopted as a signature value
        // for the data descriptor record.  Implementers SHOULD be
        // aware that ZIP files MAY be encountered with or without this
        // signature marking data descriptors.
        //
        // (For Zip64 entries, the sizes are 8 bytes each.)
        if input.peek_signature()? == DATA_DESCRIPTOR_SIGNATURE {
            input.skip(4)?;
        }
        let crc32 = input.read_u32()?;
        let (compressed_size, uncompressed_size) = if zip64 {
            (input.read_u64()?, input.read_u64()?)
        } else {
            (input.read_u32()? as u64, input.read_u32()? as u64)
        };
        Ok(Self {
            crc32,
            compressed_size,
            uncompressed_size,
        })
    }

    pub fn write<W: Write>(&self, out: &mut DataOutput<W>, zip64: bool) -> ZipResult<()> {
        out.write_u32(DATA_DESCRIPTOR_SIGNATURE)?;
        out.write_u32(self.crc32)?;
        if zip64 {
            out.write_u64(self.compressed_size)?;
            out.write_u64(self.uncompressed_size)
        } else {
            out.write_u32(self.compressed_size as u32)?;
            out.write_u32(self.uncompressed_size as u32)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cursor::to_bytes;
    use std::io::Cursor;

    #[test]
    fn dos_time_round_trip() {
        let when = NaiveDate::from_ymd_opt(2021, 3, 14)
            .unwrap()
            .and_hms_opt(15, 9, 26)
            .unwrap();
        let (time, date) = to_msdos(when);
        assert_eq!(parse_msdos(time, date), Some(when));
        // Zeroed timestamps have no month or day
        assert_eq!(parse_msdos(0, 0), None);
    }

    #[test]
    fn dos_time_clamps() {
        let ancient = NaiveDate::from_ymd_opt(1970, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let (_, date) = to_msdos(ancient);
        assert_eq!(date, (1 << 5) | 1);
    }

    #[test]
    fn eocdr_search_skips_matches_in_comment() -> ZipResult<()> {
        let mut comment = b"junk".to_vec();
        comment.extend_from_slice(&EOCDR_MAGIC);
        let eocdr = EndOfCentralDirectory {
            disk_number: 0,
            disk_with_central_directory: 0,
            entries_on_this_disk: 1,
            entries: 1,
            central_directory_size: 10,
            central_directory_offset: 20,
            file_comment: comment,
        };
        let mut tail = vec![0xAA; 30];
        tail.extend(to_bytes(|out| eocdr.write(out))?);
        let found = find_eocdr(&tail)?;
        assert_eq!(found, 30);

        let mut input = DataInput::new(Cursor::new(&tail[found..]));
        assert_eq!(EndOfCentralDirectory::read(&mut input)?, eocdr);
        assert_eq!(eocdr.total_disks(), 1);
        Ok(())
    }

    #[test]
    fn no_eocdr() {
        assert!(matches!(
            find_eocdr(b"definitely not a zip"),
            Err(ZipError::NotAZipArchive)
        ));
    }

    #[test]
    fn zip64_eocdr_with_extensible_data() -> ZipResult<()> {
        let record = Zip64EndOfCentralDirectory {
            source_version: 45,
            minimum_extract_version: 62,
            disk_number: 0,
            disk_with_central_directory: 0,
            entries_on_this_disk: 70000,
            entries: 70000,
            central_directory_size: 1 << 33,
            central_directory_offset: 1 << 34,
            extensible_data: vec![1, 2, 3, 4, 5],
        };
        let bytes = to_bytes(|out| record.write(out))?;
        assert_eq!(bytes.len(), Zip64EndOfCentralDirectory::FIXED_SIZE + 5);
        let mut input = DataInput::new(Cursor::new(&bytes[..]));
        assert_eq!(Zip64EndOfCentralDirectory::read(&mut input)?, record);
        Ok(())
    }

    #[test]
    fn data_descriptor_with_and_without_signature() -> ZipResult<()> {
        let dd = DataDescriptor {
            crc32: 0xdeadbeef,
            compressed_size: 10,
            uncompressed_size: 20,
        };
        let signed = to_bytes(|out| dd.write(out, false))?;
        assert_eq!(signed.len(), 16);
        let mut input = DataInput::new(Cursor::new(&signed[..]));
        assert_eq!(DataDescriptor::read(&mut input, false)?, dd);

        let unsigned = &signed[4..];
        let mut input = DataInput::new(Cursor::new(unsigned));
        assert_eq!(DataDescriptor::read(&mut input, false)?, dd);

        let wide = to_bytes(|out| dd.write(out, true))?;
        assert_eq!(wide.len(), 24);
        let mut input = DataInput::new(Cursor::new(&wide[..]));
        assert_eq!(DataDescriptor::read(&mut input, true)?, dd);
        Ok(())
    }
}
