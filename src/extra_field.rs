//! Extra fields: the tagged records trailing file names in
//! local and central directory headers.
//!
//! 4.5.1 In order to allow different programs and different types
//! of information to be stored in the 'extra' field in .ZIP
//! files, the following structure MUST be used for all
//! programs storing data in this field:
//!
//! ```text
//! header1+data1 + header2+data2 . . .
//! ```
//!
//! Each header MUST consist of:
//!
//! ```text
//! Header ID - 2 bytes
//! Data Size - 2 bytes
//! ```
//!
//! We decode the records we know, keep the rest as [`ExtraField::Unknown`],
//! and always reproduce the input byte for byte on the way back out.

use std::io::Cursor;

use log::*;

use crate::crypto::aes::{AesStrength, AesVendorVersion};
use crate::cursor::DataInput;
use crate::result::*;
use crate::spec::{CentralDirectoryEntry, LocalFileHeader, ZIP64_SENTINEL_16, ZIP64_SENTINEL_32};

pub const ZIP64_ID: u16 = 0x0001;
pub const NTFS_ID: u16 = 0x000a;
pub const STRONG_ENCRYPTION_ID: u16 = 0x0017;
pub const EXTENDED_TIMESTAMP_ID: u16 = 0x5455;
pub const INFO_ZIP_UNIX_OLD_ID: u16 = 0x5855;
pub const INFO_ZIP_UNIX_NEW_ID: u16 = 0x7875;
pub const AES_ID: u16 = 0x9901;
pub const JAR_MARKER_ID: u16 = 0xcafe;
pub const ANDROID_ALIGNMENT_ID: u16 = 0xd935;

/// Which classic header fields were saturated,
/// and so which values the Zip64 extended information record must hold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Zip64Context {
    pub uncompressed_size: bool,
    pub compressed_size: bool,
    pub header_offset: bool,
    pub disk_start: bool,
}

impl Zip64Context {
    pub fn for_central(cde: &CentralDirectoryEntry) -> Self {
        Self {
            uncompressed_size: cde.uncompressed_size == ZIP64_SENTINEL_32,
            compressed_size: cde.compressed_size == ZIP64_SENTINEL_32,
            header_offset: cde.header_offset == ZIP64_SENTINEL_32,
            disk_start: cde.disk_number == ZIP64_SENTINEL_16,
        }
    }

    pub fn for_local(local: &LocalFileHeader) -> Self {
        Self {
            uncompressed_size: local.uncompressed_size == ZIP64_SENTINEL_32,
            compressed_size: local.compressed_size == ZIP64_SENTINEL_32,
            header_offset: false,
            disk_start: false,
        }
    }

    fn expected_len(&self) -> u16 {
        let mut len = 0;
        if self.uncompressed_size {
            len += 8;
        }
        if self.compressed_size {
            len += 8;
        }
        if self.header_offset {
            len += 8;
        }
        if self.disk_start {
            len += 4;
        }
        len
    }
}

/// 4.5.3 -Zip64 Extended Information Extra Field (0x0001)
///
/// Holds exactly the values whose classic counterparts are sentinels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Zip64ExtendedInformation {
    pub uncompressed_size: Option<u64>,
    pub compressed_size: Option<u64>,
    pub header_offset: Option<u64>,
    pub disk_start: Option<u32>,
}

/// NTFS timestamps (0x000a), in 100ns ticks since 1601.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NtfsTimestamps {
    pub reserved: u32,
    pub modified: u64,
    pub accessed: u64,
    pub created: u64,
}

/// The Strong Encryption header (0x0017).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrongEncryptionField {
    pub format: u16,
    pub algorithm: u16,
    pub bit_length: u16,
    pub flags: u16,
    pub cert_data: Vec<u8>,
}

/// Info-ZIP's extended timestamp (0x5455), in Unix seconds.
///
/// Central directory copies usually carry only the modification time,
/// even when `flags` says more are in the local header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedTimestamp {
    pub flags: u8,
    pub modified: Option<i32>,
    pub accessed: Option<i32>,
    pub created: Option<i32>,
}

/// The WinZip AES record (0x9901)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AesExtraField {
    pub vendor_version: AesVendorVersion,
    pub strength: AesStrength,
    /// The compression method actually used, since the header says 99.
    pub compression_method: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtraField {
    Zip64(Zip64ExtendedInformation),
    Ntfs(NtfsTimestamps),
    StrongEncryption(StrongEncryptionField),
    ExtendedTimestamp(ExtendedTimestamp),
    /// Info-ZIP Unix, old style (0x5855): times, and in local headers, IDs.
    InfoZipUnixOld {
        accessed: u32,
        modified: u32,
        ids: Option<(u16, u16)>,
    },
    /// Info-ZIP Unix, new style (0x7875): variable-width UID and GID.
    InfoZipUnixNew { version: u8, uid: Vec<u8>, gid: Vec<u8> },
    Aes(AesExtraField),
    /// Marks an executable JAR (0xcafe, empty)
    JarMarker,
    /// Padding Android's zipalign uses to align stored data (0xd935)
    AndroidAlignment { alignment: u16, padding: Vec<u8> },
    Unknown { id: u16, data: Vec<u8> },
}

impl ExtraField {
    pub fn header_id(&self) -> u16 {
        match self {
            ExtraField::Zip64(_) => ZIP64_ID,
            ExtraField::Ntfs(_) => NTFS_ID,
            ExtraField::StrongEncryption(_) => STRONG_ENCRYPTION_ID,
            ExtraField::ExtendedTimestamp(_) => EXTENDED_TIMESTAMP_ID,
            ExtraField::InfoZipUnixOld { .. } => INFO_ZIP_UNIX_OLD_ID,
            ExtraField::InfoZipUnixNew { .. } => INFO_ZIP_UNIX_NEW_ID,
            ExtraField::Aes(_) => AES_ID,
            ExtraField::JarMarker => JAR_MARKER_ID,
            ExtraField::AndroidAlignment { .. } => ANDROID_ALIGNMENT_ID,
            ExtraField::Unknown { id, .. } => *id,
        }
    }

    /// The record's data, without the ID and size header.
    pub fn body(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        match self {
            ExtraField::Zip64(z) => {
                if let Some(v) = z.uncompressed_size {
                    bytes.extend_from_slice(&v.to_le_bytes());
                }
                if let Some(v) = z.compressed_size {
                    bytes.extend_from_slice(&v.to_le_bytes());
                }
                if let Some(v) = z.header_offset {
                    bytes.extend_from_slice(&v.to_le_bytes());
                }
                if let Some(v) = z.disk_start {
                    bytes.extend_from_slice(&v.to_le_bytes());
                }
            }
            ExtraField::Ntfs(n) => {
                bytes.extend_from_slice(&n.reserved.to_le_bytes());
                bytes.extend_from_slice(&1u16.to_le_bytes());
                bytes.extend_from_slice(&24u16.to_le_bytes());
                bytes.extend_from_slice(&n.modified.to_le_bytes());
                bytes.extend_from_slice(&n.accessed.to_le_bytes());
                bytes.extend_from_slice(&n.created.to_le_bytes());
            }
            ExtraField::StrongEncryption(s) => {
                bytes.extend_from_slice(&s.format.to_le_bytes());
                bytes.extend_from_slice(&s.algorithm.to_le_bytes());
                bytes.extend_from_slice(&s.bit_length.to_le_bytes());
                bytes.extend_from_slice(&s.flags.to_le_bytes());
                bytes.extend_from_slice(&s.cert_data);
            }
            ExtraField::ExtendedTimestamp(t) => {
                bytes.push(t.flags);
                for time in [t.modified, t.accessed, t.created].iter().flatten() {
                    bytes.extend_from_slice(&time.to_le_bytes());
                }
            }
            ExtraField::InfoZipUnixOld {
                accessed,
                modified,
                ids,
            } => {
                bytes.extend_from_slice(&accessed.to_le_bytes());
                bytes.extend_from_slice(&modified.to_le_bytes());
                if let Some((uid, gid)) = ids {
                    bytes.extend_from_slice(&uid.to_le_bytes());
                    bytes.extend_from_slice(&gid.to_le_bytes());
                }
            }
            ExtraField::InfoZipUnixNew { version, uid, gid } => {
                bytes.push(*version);
                bytes.push(uid.len() as u8);
                bytes.extend_from_slice(uid);
                bytes.push(gid.len() as u8);
                bytes.extend_from_slice(gid);
            }
            ExtraField::Aes(a) => {
                bytes.extend_from_slice(&a.vendor_version.to_u16().to_le_bytes());
                bytes.extend_from_slice(b"AE");
                bytes.push(a.strength.to_u8());
                bytes.extend_from_slice(&a.compression_method.to_le_bytes());
            }
            ExtraField::JarMarker => {}
            ExtraField::AndroidAlignment { alignment, padding } => {
                bytes.extend_from_slice(&alignment.to_le_bytes());
                bytes.extend_from_slice(padding);
            }
            ExtraField::Unknown { data, .. } => bytes.extend_from_slice(data),
        }
        bytes
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        let body = self.body();
        out.extend_from_slice(&self.header_id().to_le_bytes());
        out.extend_from_slice(&(body.len() as u16).to_le_bytes());
        out.extend_from_slice(&body);
    }
}

/// Every extra field record of a header, in order,
/// plus any bytes at the end too short to be a record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtraFields {
    pub records: Vec<ExtraField>,
    pub trailing: Vec<u8>,
}

impl ExtraFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(mut bytes: &[u8], zip64: Zip64Context) -> ZipResult<Self> {
        let mut records = Vec::new();
        while bytes.len() >= 4 {
            let id = u16::from_le_bytes([bytes[0], bytes[1]]);
            let len = u16::from_le_bytes([bytes[2], bytes[3]]) as usize;
            if 4 + len > bytes.len() {
                break;
            }
            let body = &bytes[4..4 + len];
            let record = parse_record(id, body, zip64)?;
            trace!("{:?}", record);
            records.push(record);
            bytes = &bytes[4 + len..];
        }
        if !bytes.is_empty() {
            debug!("Keeping {} trailing extra field bytes", bytes.len());
        }
        Ok(Self {
            records,
            trailing: bytes.to_vec(),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        for record in &self.records {
            record.write_to(&mut bytes);
        }
        bytes.extend_from_slice(&self.trailing);
        bytes
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.trailing.is_empty()
    }

    pub fn push(&mut self, record: ExtraField) {
        self.records.push(record);
    }

    /// Removes every record with the given ID.
    pub fn remove(&mut self, id: u16) {
        self.records.retain(|r| r.header_id() != id);
    }

    pub fn zip64(&self) -> Option<&Zip64ExtendedInformation> {
        self.records.iter().find_map(|r| match r {
            ExtraField::Zip64(z) => Some(z),
            _ => None,
        })
    }

    pub fn aes(&self) -> Option<&AesExtraField> {
        self.records.iter().find_map(|r| match r {
            ExtraField::Aes(a) => Some(a),
            _ => None,
        })
    }

    pub fn strong_encryption(&self) -> Option<&StrongEncryptionField> {
        self.records.iter().find_map(|r| match r {
            ExtraField::StrongEncryption(s) => Some(s),
            _ => None,
        })
    }

    pub fn extended_timestamp(&self) -> Option<&ExtendedTimestamp> {
        self.records.iter().find_map(|r| match r {
            ExtraField::ExtendedTimestamp(t) => Some(t),
            _ => None,
        })
    }
}

fn parse_record(id: u16, body: &[u8], zip64: Zip64Context) -> ZipResult<ExtraField> {
    let unknown = || ExtraField::Unknown {
        id,
        data: body.to_vec(),
    };
    let mut input = DataInput::new(Cursor::new(body));
    let parsed = match id {
        ZIP64_ID => return parse_zip64(&mut input, body.len(), zip64).map(|z| z.unwrap_or_else(unknown)),
        NTFS_ID => parse_ntfs(&mut input),
        STRONG_ENCRYPTION_ID => parse_strong_encryption(&mut input, body.len()),
        EXTENDED_TIMESTAMP_ID => parse_extended_timestamp(&mut input, body.len()),
        INFO_ZIP_UNIX_OLD_ID => parse_unix_old(&mut input, body.len()),
        INFO_ZIP_UNIX_NEW_ID => parse_unix_new(&mut input),
        AES_ID => parse_aes(&mut input),
        JAR_MARKER_ID => Ok(ExtraField::JarMarker),
        ANDROID_ALIGNMENT_ID => parse_android_alignment(&mut input, body.len()),
        _ => return Ok(unknown()),
    };
    // Anything we can't reproduce exactly stays opaque.
    match parsed {
        Ok(record) if record.body() == body => Ok(record),
        _ => {
            debug!("Keeping non-canonical extra field {:#06x} as-is", id);
            Ok(unknown())
        }
    }
}

fn parse_zip64(
    input: &mut DataInput<Cursor<&[u8]>>,
    declared: usize,
    zip64: Zip64Context,
) -> ZipResult<Option<ExtraField>> {
    let expected = zip64.expected_len();
    if expected == 0 {
        // Some writers always add one; with nothing saturated there's nothing to read.
        debug!("Ignoring Zip64 extra field with no saturated fields");
        return Ok(None);
    }
    if declared != expected as usize {
        return Err(ZipError::Zip64FieldInconsistency {
            declared: declared as u16,
            expected,
        });
    }
    let mut field = Zip64ExtendedInformation::default();
    if zip64.uncompressed_size {
        field.uncompressed_size = Some(input.read_u64()?);
    }
    if zip64.compressed_size {
        field.compressed_size = Some(input.read_u64()?);
    }
    if zip64.header_offset {
        field.header_offset = Some(input.read_u64()?);
    }
    if zip64.disk_start {
        field.disk_start = Some(input.read_u32()?);
    }
    Ok(Some(ExtraField::Zip64(field)))
}

fn parse_ntfs(input: &mut DataInput<Cursor<&[u8]>>) -> ZipResult<ExtraField> {
    //  Reserved      4 bytes    Reserved for future use
    //  Tag1          2 bytes    NTFS attribute tag value #1
    //  Size1         2 bytes    Size of attribute #1, in bytes
    //  (var)         Size1      Attribute #1 data
    //
    //  For NTFS, values for Tag1 are: 0x0001 (Mtime, Atime, Ctime)
    let reserved = input.read_u32()?;
    let tag = input.read_u16()?;
    let size = input.read_u16()?;
    if tag != 1 || size != 24 {
        return Err(ZipError::InvalidArchive("Unexpected NTFS attribute"));
    }
    Ok(ExtraField::Ntfs(NtfsTimestamps {
        reserved,
        modified: input.read_u64()?,
        accessed: input.read_u64()?,
        created: input.read_u64()?,
    }))
}

fn parse_strong_encryption(
    input: &mut DataInput<Cursor<&[u8]>>,
    len: usize,
) -> ZipResult<ExtraField> {
    // Format      2 bytes   Indicates the format of the header
    // AlgID       2 bytes   Encryption algorithm identifier
    // Bitlen      2 bytes   Bit length of encryption key
    // Flags       2 bytes   Processing flags
    // CertData    TSize-8   Certificate decryption extra field data
    let format = input.read_u16()?;
    let algorithm = input.read_u16()?;
    let bit_length = input.read_u16()?;
    let flags = input.read_u16()?;
    let cert_data = input.read_bytes(len.saturating_sub(8) as u64)?;
    Ok(ExtraField::StrongEncryption(StrongEncryptionField {
        format,
        algorithm,
        bit_length,
        flags,
        cert_data,
    }))
}

fn parse_extended_timestamp(
    input: &mut DataInput<Cursor<&[u8]>>,
    len: usize,
) -> ZipResult<ExtraField> {
    let flags = input.read_u8()?;
    let mut remaining = len - 1;
    let mut next = |bit: u8| -> ZipResult<Option<i32>> {
        if flags & bit != 0 && remaining >= 4 {
            remaining -= 4;
            Ok(Some(input.read_u32()? as i32))
        } else {
            Ok(None)
        }
    };
    let modified = next(1)?;
    let accessed = next(2)?;
    let created = next(4)?;
    Ok(ExtraField::ExtendedTimestamp(ExtendedTimestamp {
        flags,
        modified,
        accessed,
        created,
    }))
}

fn parse_unix_old(input: &mut DataInput<Cursor<&[u8]>>, len: usize) -> ZipResult<ExtraField> {
    let accessed = input.read_u32()?;
    let modified = input.read_u32()?;
    let ids = if len >= 12 {
        Some((input.read_u16()?, input.read_u16()?))
    } else {
        None
    };
    Ok(ExtraField::InfoZipUnixOld {
        accessed,
        modified,
        ids,
    })
}

fn parse_unix_new(input: &mut DataInput<Cursor<&[u8]>>) -> ZipResult<ExtraField> {
    let version = input.read_u8()?;
    let uid_size = input.read_u8()?;
    let uid = input.read_bytes(uid_size)?;
    let gid_size = input.read_u8()?;
    let gid = input.read_bytes(gid_size)?;
    Ok(ExtraField::InfoZipUnixNew { version, uid, gid })
}

fn parse_aes(input: &mut DataInput<Cursor<&[u8]>>) -> ZipResult<ExtraField> {
    // Vendor version      2 bytes
    // Vendor ID           2 bytes  "AE"
    // Encryption strength 1 byte   1, 2, or 3 for 128, 192 and 256-bit keys
    // Compression method  2 bytes
    let vendor_version = AesVendorVersion::from_u16(input.read_u16()?)
        .ok_or(ZipError::InvalidArchive("Unknown AES vendor version"))?;
    let vendor_id = input.read_u16()?;
    if vendor_id.to_le_bytes() != *b"AE" {
        return Err(ZipError::InvalidArchive("Unknown AES vendor ID"));
    }
    let strength = AesStrength::from_u8(input.read_u8()?)
        .ok_or(ZipError::InvalidArchive("Unknown AES strength"))?;
    let compression_method = input.read_u16()?;
    Ok(ExtraField::Aes(AesExtraField {
        vendor_version,
        strength,
        compression_method,
    }))
}

fn parse_android_alignment(
    input: &mut DataInput<Cursor<&[u8]>>,
    len: usize,
) -> ZipResult<ExtraField> {
    let alignment = input.read_u16()?;
    let padding = input.read_bytes(len.saturating_sub(2) as u64)?;
    Ok(ExtraField::AndroidAlignment { alignment, padding })
}
