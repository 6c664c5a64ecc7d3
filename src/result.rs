//! Error types and the related `Result<T>`

use std::io;

use camino::Utf8PathBuf;
use thiserror::Error;

pub type ZipResult<T> = Result<T, ZipError>;

#[derive(Debug, Error)]
pub enum ZipError {
    /// An error from underlying I/O
    #[error("I/O Error")]
    Io(#[source] io::Error),

    /// No End Of Central Directory Record was found,
    /// so this doesn't look like a ZIP archive at all.
    #[error("Not a zip archive: couldn't find End Of Central Directory Record")]
    NotAZipArchive,

    /// A record didn't start with the signature we expected to find there.
    #[error("Corrupt {record} at offset {offset}: expected signature {expected:#010x}, found {actual:#010x}")]
    CorruptHeader {
        record: &'static str,
        offset: u64,
        expected: u32,
        actual: u32,
    },

    /// The ZIP archive contained invalid data per the spec.
    #[error("Invalid Zip archive: {0}")]
    InvalidArchive(&'static str),

    /// Decoding a UTF-8 name or comment failed
    #[error("Invalid UTF-8")]
    Encoding(#[from] std::str::Utf8Error),

    /// The entry is compressed with a method we have no codec for.
    #[error("Unsupported compression method {0}")]
    UnsupportedCompressionMethod(u16),

    /// The entry is encrypted with an algorithm we can't handle.
    #[error("Unsupported encryption method: {0}")]
    UnsupportedEncryptionMethod(String),

    /// The ZIP archive uses an unsupported feature
    #[error("Unsupported Zip archive: {0}")]
    UnsupportedArchive(String),

    /// The password verifier or MAC of an entry didn't match.
    #[error("Incorrect password for {0}")]
    IncorrectPassword(Utf8PathBuf),

    /// An encrypted entry was read without a password.
    #[error("{0} is encrypted, but no password was given")]
    PasswordRequired(Utf8PathBuf),

    /// The central directory is encrypted and the given password
    /// (if any) doesn't unlock it.
    #[error("Incorrect password for the encrypted central directory")]
    IncorrectCentralDirectoryPassword,

    /// The CRC-32 of the decompressed data didn't match the recorded one.
    #[error(
        "Checksum mismatch for {path}: expected {expected:#010x}, got {actual:#010x}{}",
        hint(.password_hint)
    )]
    ChecksumMismatch {
        path: Utf8PathBuf,
        expected: u32,
        actual: u32,
        password_hint: bool,
    },

    /// The entry decompressed to a different number of bytes than recorded.
    #[error("Size mismatch for {path}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        path: Utf8PathBuf,
        expected: u64,
        actual: u64,
    },

    /// A volume of a split archive couldn't be found.
    #[error("Missing volume {index} of split archive ({path})")]
    MissingVolume { index: u32, path: Utf8PathBuf },

    /// A Zip64 extended information record's size disagrees
    /// with the fields its header says it should hold.
    #[error("Zip64 extended information field is {declared} bytes, expected {expected}")]
    Zip64FieldInconsistency { declared: u16, expected: u16 },

    /// A central directory field held the Zip64 sentinel,
    /// but the entry had no Zip64 extended information to resolve it.
    #[error("{path}: {field} is a Zip64 sentinel, but there's no Zip64 extended information field")]
    MissingZip64Field {
        path: Utf8PathBuf,
        field: &'static str,
    },

    /// A file wasn't found at the provied path
    #[error("No file in the archive with the path {0}")]
    NoSuchFile(Utf8PathBuf),

    /// A path (from the user or the archive) was invalid.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// One or more entries failed during extraction.
    #[error("Failed to extract {} entries (first: {}: {})", .failed.len(), .failed[0].0, .failed[0].1)]
    ExtractionFailed {
        failed: Vec<(Utf8PathBuf, ZipError)>,
    },

    /// A cast from a 64-bit int to a usize failed,
    /// probably on a 32-bit system.
    #[error("Zip archive too large for address space")]
    InsufficientAddressSpace,
}

fn hint(password_hint: &bool) -> &'static str {
    if *password_hint {
        " (wrong password?)"
    } else {
        ""
    }
}

impl ZipError {
    /// True for both entry- and archive-level password failures.
    pub fn is_password_error(&self) -> bool {
        matches!(
            self,
            ZipError::IncorrectPassword(_)
                | ZipError::PasswordRequired(_)
                | ZipError::IncorrectCentralDirectoryPassword
        )
    }
}

// Readers in the entry pipeline have to speak io::Error.
// Smuggle our errors through it and unwrap them on the way back out,
// so callers see IncorrectPassword rather than a generic I/O failure.

impl From<io::Error> for ZipError {
    fn from(e: io::Error) -> Self {
        if !e.get_ref().map_or(false, |inner| inner.is::<ZipError>()) {
            return ZipError::Io(e);
        }
        match e.into_inner().map(|inner| inner.downcast::<ZipError>()) {
            Some(Ok(zip_error)) => *zip_error,
            Some(Err(other)) => ZipError::Io(io::Error::new(io::ErrorKind::Other, other)),
            None => ZipError::InvalidArchive("Lost an error inside an I/O error"),
        }
    }
}

impl From<ZipError> for io::Error {
    fn from(e: ZipError) -> Self {
        match e {
            ZipError::Io(io) => io,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
