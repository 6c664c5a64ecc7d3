//! Unpacking a whole archive (or some of it) onto the filesystem,
//! one entry at a time or spread over a pool of workers.
//!
//! Entries are visited in the order they appear in the archive,
//! not the order of the central directory, so reads only ever move forward
//! through the volumes. In parallel mode that order is cut into contiguous
//! chunks, and each chunk gets its own [`VolumeReader`].

use std::fs::{self, File};
use std::io::{self, Read};

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use chrono::NaiveDateTime;
use log::*;
use rayon::prelude::*;

use crate::read::{FileMetadata, ZipArchive};
use crate::result::*;
use crate::volume::VolumeReader;

/// How to extract
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    parallel: bool,
    threads: Option<usize>,
    password: Option<Vec<u8>>,
}

impl ExtractOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract on a pool of worker threads.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Size of the worker pool; defaults to the number of available cores.
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Password for encrypted entries
    pub fn password(mut self, password: &[u8]) -> Self {
        self.password = Some(password.to_vec());
        self
    }

    fn thread_count(&self) -> usize {
        self.threads
            .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
            .unwrap_or(1)
            .max(1)
    }
}

/// What an [`AttributeSink`] is told about each extracted entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryAttributes<'a> {
    pub name: &'a Utf8Path,
    pub is_dir: bool,
    pub is_symlink: bool,
    pub external_attributes: u32,
    pub unix_mode: Option<u32>,
    pub last_modified: Option<NaiveDateTime>,
}

impl<'a> From<&'a FileMetadata> for EntryAttributes<'a> {
    fn from(entry: &'a FileMetadata) -> Self {
        Self {
            name: &entry.path,
            is_dir: entry.is_dir(),
            is_symlink: entry.is_symlink(),
            external_attributes: entry.external_attributes,
            unix_mode: entry.unix_mode,
            last_modified: entry.modified(),
        }
    }
}

/// Applies permissions, timestamps, and the like to extracted entries.
///
/// Extraction doesn't touch any of that itself, since what makes sense
/// depends on the platform and on the caller.
pub trait AttributeSink: Sync {
    fn apply(&self, output: &Utf8Path, attributes: &EntryAttributes<'_>) -> ZipResult<()>;
}

/// An [`AttributeSink`] that leaves everything alone
#[derive(Debug, Clone, Copy, Default)]
pub struct IgnoreAttributes;

impl AttributeSink for IgnoreAttributes {
    fn apply(&self, _output: &Utf8Path, _attributes: &EntryAttributes<'_>) -> ZipResult<()> {
        Ok(())
    }
}

impl ZipArchive {
    /// Extracts every entry into `destination`.
    pub fn extract<P: AsRef<Utf8Path>>(&self, destination: P, options: &ExtractOptions) -> ZipResult<()> {
        let entries: Vec<&FileMetadata> = self.entries().iter().collect();
        extract_entries(self, &entries, destination.as_ref(), options, &IgnoreAttributes)
    }
}

/// Extracts `entries` from `archive` into `destination`,
/// handing each one to `sink` once it's written.
///
/// Every entry is attempted. If any fail, the result is
/// [`ZipError::ExtractionFailed`] listing each of them.
pub fn extract_entries<S: AttributeSink>(
    archive: &ZipArchive,
    entries: &[&FileMetadata],
    destination: &Utf8Path,
    options: &ExtractOptions,
    sink: &S,
) -> ZipResult<()> {
    let ordered = in_archive_order(archive, entries)?;
    let password = options.password.as_deref();
    fs::create_dir_all(destination)?;

    let failed: Vec<(Utf8PathBuf, ZipError)> = if options.parallel && ordered.len() > 1 {
        let threads = options.thread_count();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| ZipError::Io(io::Error::new(io::ErrorKind::Other, e)))?;
        let chunk_len = (ordered.len() + threads - 1) / threads;
        debug!(
            "Extracting {} entries on {} threads, {} per task",
            ordered.len(),
            threads,
            chunk_len
        );
        pool.install(|| {
            ordered
                .par_chunks(chunk_len)
                .map(|chunk| {
                    // Each task gets its own reader, gone when the task is.
                    let mut reader = archive.reader();
                    extract_chunk(archive, &mut reader, chunk, destination, password, sink)
                })
                .flatten()
                .collect()
        })
    } else {
        debug!("Extracting {} entries", ordered.len());
        let mut reader = archive.reader();
        extract_chunk(archive, &mut reader, &ordered, destination, password, sink)
    };

    if failed.is_empty() {
        Ok(())
    } else {
        for (path, e) in &failed {
            error!("Couldn't extract {}: {}", path, e);
        }
        Err(ZipError::ExtractionFailed { failed })
    }
}

/// Sorts entries by where their local headers are.
fn in_archive_order<'a>(
    archive: &ZipArchive,
    entries: &[&'a FileMetadata],
) -> ZipResult<Vec<&'a FileMetadata>> {
    let volumes = archive.volumes();
    let mut keyed = entries
        .iter()
        .map(|entry| Ok((volumes.absolute_offset(entry.disk_number, entry.header_offset)?, *entry)))
        .collect::<ZipResult<Vec<_>>>()?;
    keyed.sort_by_key(|(offset, _)| *offset);
    Ok(keyed.into_iter().map(|(_, entry)| entry).collect())
}

fn extract_chunk<S: AttributeSink>(
    archive: &ZipArchive,
    reader: &mut VolumeReader,
    chunk: &[&FileMetadata],
    destination: &Utf8Path,
    password: Option<&[u8]>,
    sink: &S,
) -> Vec<(Utf8PathBuf, ZipError)> {
    chunk
        .iter()
        .filter_map(|entry| {
            extract_one(archive, reader, entry, destination, password, sink)
                .err()
                .map(|e| (entry.path.clone(), e))
        })
        .collect()
}

fn extract_one<S: AttributeSink>(
    archive: &ZipArchive,
    reader: &mut VolumeReader,
    entry: &FileMetadata,
    destination: &Utf8Path,
    password: Option<&[u8]>,
    sink: &S,
) -> ZipResult<()> {
    let output = output_path(destination, &entry.path)?;
    // A symlink entry replaces whatever is at its own path; nothing else may.
    refuse_links(destination, &output, !entry.is_symlink())?;
    if entry.is_dir() {
        fs::create_dir_all(&output)?;
    } else {
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut contents = archive.read(reader, entry, password)?;
        if entry.is_symlink() {
            let mut target = String::new();
            contents.read_to_string(&mut target)?;
            check_link_target(&entry.path, &target)?;
            make_symlink(&target, &output)?;
        } else {
            let mut file = File::create(&output)?;
            io::copy(&mut contents, &mut file)?;
        }
    }
    trace!("Extracted {} to {}", entry.path, output);
    sink.apply(&output, &EntryAttributes::from(entry))
}

/// Refuses to go through a symlink an earlier entry (or anybody else) left
/// under `destination` on the way to `output`.
/// `output` itself is only checked when `include_output` is set.
fn refuse_links(destination: &Utf8Path, output: &Utf8Path, include_output: bool) -> ZipResult<()> {
    let relative = output.strip_prefix(destination).map_err(|_| {
        ZipError::InvalidPath(format!("{} isn't under {}", output, destination))
    })?;
    let mut current = destination.to_owned();
    let mut components = relative.components().peekable();
    while let Some(component) = components.next() {
        current.push(component.as_str());
        if components.peek().is_none() && !include_output {
            break;
        }
        match fs::symlink_metadata(&current) {
            Ok(metadata) if metadata.file_type().is_symlink() => {
                return Err(ZipError::InvalidPath(format!(
                    "{} would be written through the symlink {}",
                    output, current
                )));
            }
            Ok(_) => {}
            // Nothing further down exists yet either.
            Err(e) if e.kind() == io::ErrorKind::NotFound => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Makes sure a symlink at `link_path` (an entry path)
/// can't point anywhere outside the extraction directory.
pub fn check_link_target(link_path: &Utf8Path, target: &str) -> ZipResult<()> {
    let escapes = || {
        ZipError::InvalidPath(format!(
            "Symlink {} points outside the destination, at {}",
            link_path, target
        ))
    };
    // How many directories deep the link sits
    let mut depth = link_path
        .parent()
        .map(|parent| {
            parent
                .components()
                .filter(|c| matches!(c, Utf8Component::Normal(_)))
                .count()
        })
        .unwrap_or(0);
    if target.is_empty() {
        return Err(escapes());
    }
    for component in Utf8Path::new(target).components() {
        match component {
            Utf8Component::Prefix(_) | Utf8Component::RootDir => return Err(escapes()),
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => depth = depth.checked_sub(1).ok_or_else(escapes)?,
            Utf8Component::Normal(_) => depth += 1,
        }
    }
    Ok(())
}

#[cfg(unix)]
fn make_symlink(target: &str, link: &Utf8Path) -> ZipResult<()> {
    if fs::symlink_metadata(link).is_ok() {
        fs::remove_file(link)?;
    }
    std::os::unix::fs::symlink(target, link)?;
    Ok(())
}

/// No symlinks here (or not without privileges): store the target as text.
#[cfg(not(unix))]
fn make_symlink(target: &str, link: &Utf8Path) -> ZipResult<()> {
    fs::write(link, target)?;
    Ok(())
}

/// Resolves an entry's path under `destination`,
/// refusing anything that would land outside of it.
pub fn output_path(destination: &Utf8Path, entry_path: &Utf8Path) -> ZipResult<Utf8PathBuf> {
    let mut output = destination.to_owned();
    for component in entry_path.components() {
        match component {
            Utf8Component::Prefix(prefix) => {
                return Err(ZipError::InvalidPath(format!(
                    "Prefix {} found in path {}",
                    prefix.as_str(),
                    entry_path
                )));
            }
            Utf8Component::RootDir => {
                return Err(ZipError::InvalidPath(format!(
                    "Absolute path {} in archive",
                    entry_path
                )));
            }
            Utf8Component::CurDir => {
                warn!("Current dir (.) found in path {}", entry_path);
            }
            Utf8Component::ParentDir => {
                return Err(ZipError::InvalidPath(format!(
                    "Parent dir (..) found in path {}",
                    entry_path
                )));
            }
            Utf8Component::Normal(component) => output.push(component),
        }
    }
    if output == destination {
        return Err(ZipError::InvalidPath(format!("Empty path {:?}", entry_path)));
    }
    Ok(output)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn paths_stay_under_destination() -> ZipResult<()> {
        let dest = Utf8Path::new("out");
        assert_eq!(output_path(dest, Utf8Path::new("a/b.txt"))?, Utf8Path::new("out/a/b.txt"));
        assert_eq!(output_path(dest, Utf8Path::new("./a/./b.txt"))?, Utf8Path::new("out/a/b.txt"));
        assert_eq!(output_path(dest, Utf8Path::new("dir/"))?, Utf8Path::new("out/dir"));
        Ok(())
    }

    #[test]
    fn escapes_are_rejected() {
        let dest = Utf8Path::new("out");
        for bad in ["../evil", "a/../../evil", "/etc/passwd", ".", ""] {
            assert!(
                matches!(output_path(dest, Utf8Path::new(bad)), Err(ZipError::InvalidPath(_))),
                "{} was allowed",
                bad
            );
        }
    }

    #[test]
    fn link_targets_stay_inside() {
        for (link, target) in [
            ("link", "file"),
            ("a/link", "../file"),
            ("a/b/link", "../../c/./d"),
            ("a/link", "b/../c"),
        ] {
            assert!(
                check_link_target(Utf8Path::new(link), target).is_ok(),
                "{} -> {} was refused",
                link,
                target
            );
        }
        for (link, target) in [
            ("link", "/etc/passwd"),
            ("link", "../file"),
            ("a/link", "../../file"),
            ("a/link", "b/../../../file"),
            ("link", ""),
        ] {
            assert!(
                matches!(
                    check_link_target(Utf8Path::new(link), target),
                    Err(ZipError::InvalidPath(_))
                ),
                "{} -> {} was allowed",
                link,
                target
            );
        }
    }

    #[cfg(unix)]
    #[test]
    fn links_on_the_way_are_refused() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let dest = Utf8Path::from_path(dir.path()).unwrap().join("out");
        fs::create_dir_all(dest.join("real"))?;
        std::os::unix::fs::symlink("real", dest.join("alias"))?;

        let through = output_path(&dest, Utf8Path::new("alias/file.txt"))?;
        assert!(matches!(
            refuse_links(&dest, &through, true),
            Err(ZipError::InvalidPath(_))
        ));
        let onto = output_path(&dest, Utf8Path::new("alias"))?;
        assert!(refuse_links(&dest, &onto, true).is_err());
        // Replacing the link itself is fine.
        refuse_links(&dest, &onto, false)?;

        let fresh = output_path(&dest, Utf8Path::new("real/new/file.txt"))?;
        refuse_links(&dest, &fresh, true)?;
        Ok(())
    }

    #[test]
    fn thread_count_defaults_to_something() {
        assert!(ExtractOptions::new().thread_count() >= 1);
        assert_eq!(ExtractOptions::new().threads(0).thread_count(), 1);
        assert_eq!(ExtractOptions::new().threads(3).thread_count(), 3);
    }
}
