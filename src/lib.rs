//! zipfold reads and writes ZIP archives: ZIP64, split (multi-volume)
//! archives, and the three encryption schemes you'll find in the wild
//! (traditional PKWARE, WinZip AES, and PKWARE Strong Encryption).
//!
//! Writing goes through a [`ZipWriter`]:
//!
//! ```no_run
//! # use zipfold::*;
//! # use zipfold::crypto::aes::AesStrength;
//! let mut writer = ZipWriter::create("foo.zip", WriterOptions::new())?;
//! writer.write_entry_whole(EntryOptions::new("hello.txt"), b"Hello!")?;
//! writer.write_entry_whole(
//!     EntryOptions::new("secret.txt").aes(AesStrength::Aes256, b"hunter2"),
//!     b"Nobody look",
//! )?;
//! writer.add_directory(EntryOptions::new("empty"))?;
//! let archive = writer.finish()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! and reading starts with a [`ZipArchive`]:
//!
//! ```no_run
//! # use std::io::Read;
//! # use zipfold::*;
//! let archive = ZipArchive::open("foo.zip")?;
//!
//! // Entries can be read one at a time...
//! let metadata = archive.by_name("secret.txt")?;
//! let mut volume = archive.reader();
//! let mut contents = String::new();
//! archive
//!     .read(&mut volume, metadata, Some(b"hunter2"))?
//!     .read_to_string(&mut contents)?;
//!
//! // ...or all at once, on as many threads as we have cores.
//! archive.extract(
//!     "out",
//!     &ExtractOptions::new().parallel(true).password(b"hunter2"),
//! )?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Each entry in a ZIP archive is compressed (and encrypted) on its own,
//! with a central directory at the end telling us where to find each one.
//! That's what lets us extract entries in parallel:
//! each worker gets its own [`volume::VolumeReader`] and seeks to whatever
//! it needs, across however many volumes the archive is split into.
//!
//! If an archive's sizes or offsets outgrow the classic 32-bit fields,
//! ZIP64 records are written (and read) automatically.

pub mod codec;
pub mod crc_reader;
pub mod crypto;
pub mod cursor;
pub mod extra_field;
pub mod extract;
pub mod pipeline;
pub mod read;
pub mod result;
pub mod spec;
pub mod volume;
pub mod write;

mod arch;

pub use crypto::EncryptionMethod;
pub use extract::{ExtractOptions, IgnoreAttributes};
pub use read::{FileMetadata, ZipArchive};
pub use result::{ZipError, ZipResult};
pub use spec::CompressionMethod;
pub use write::{EntryOptions, WriterOptions, ZipWriter};
