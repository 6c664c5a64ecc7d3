//! The volume address space: one or more files presented as a single
//! run of bytes.
//!
//! A *solid* archive is one file, and a logical offset is just a file offset.
//! A *split* archive is spread across `name.z01`, `name.z02`, ..., with the
//! last volume (holding the end of central directory record) named
//! `name.zip`. ZIP records address split archives with
//! `(disk number, offset within that disk)` pairs;
//! [`VolumeSet::absolute_offset()`] flattens those into the logical space.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};

use camino::{Utf8Path, Utf8PathBuf};
use log::*;

use crate::result::*;
use crate::spec::{SPLIT_ARCHIVE_SIGNATURE, SPLIT_TEMPORARY_SIGNATURE};

/// Returns the path of volume `disk` (zero-based) of a split archive,
/// assuming it isn't the last one.
///
/// ```
/// # use camino::Utf8Path;
/// # use zipfold::volume::split_volume_path;
/// assert_eq!(split_volume_path(Utf8Path::new("foo/bar.zip"), 0), "foo/bar.z01");
/// assert_eq!(split_volume_path(Utf8Path::new("foo/bar.zip"), 11), "foo/bar.z12");
/// ```
pub fn split_volume_path(archive: &Utf8Path, disk: u32) -> Utf8PathBuf {
    archive.with_extension(format!("z{:02}", disk + 1))
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Volume {
    path: Utf8PathBuf,
    len: u64,
}

/// The files making up an archive, in disk order, with their lengths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSet {
    volumes: Vec<Volume>,
}

impl VolumeSet {
    /// A single-file archive.
    pub fn solid(path: &Utf8Path) -> ZipResult<Self> {
        let len = fs::metadata(path)?.len();
        Ok(Self {
            volumes: vec![Volume {
                path: path.to_owned(),
                len,
            }],
        })
    }

    /// A split archive of `disks` volumes whose last volume lives at `path`.
    pub fn split(path: &Utf8Path, disks: u32) -> ZipResult<Self> {
        if disks == 0 {
            return Err(ZipError::InvalidArchive("Split archive with zero volumes"));
        }
        let mut volumes = Vec::with_capacity(disks as usize);
        for index in 0..disks {
            let volume_path = if index + 1 == disks {
                path.to_owned()
            } else {
                split_volume_path(path, index)
            };
            let len = match fs::metadata(&volume_path) {
                Ok(m) => m.len(),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(ZipError::MissingVolume {
                        index,
                        path: volume_path,
                    })
                }
                Err(e) => return Err(e.into()),
            };
            volumes.push(Volume {
                path: volume_path,
                len,
            });
        }
        debug!("Split archive {} has {} volumes", path, disks);
        Ok(Self { volumes })
    }

    /// Number of volumes (disks) in the set.
    pub fn len(&self) -> u32 {
        self.volumes.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    pub fn is_split(&self) -> bool {
        self.volumes.len() > 1
    }

    /// Paths of every volume, in disk order.
    pub fn paths(&self) -> impl Iterator<Item = &Utf8Path> {
        self.volumes.iter().map(|v| v.path.as_path())
    }

    /// The path of the volume holding the end of central directory record.
    pub fn last_path(&self) -> &Utf8Path {
        &self.volumes[self.volumes.len() - 1].path
    }

    /// Length of the whole logical address space.
    pub fn total_len(&self) -> u64 {
        self.volumes.iter().map(|v| v.len).sum()
    }

    /// Length of a single volume.
    pub fn volume_len(&self, disk: u32) -> ZipResult<u64> {
        self.volumes
            .get(disk as usize)
            .map(|v| v.len)
            .ok_or_else(|| self.missing(disk))
    }

    /// Converts a `(disk, offset within disk)` pair to a logical offset.
    pub fn absolute_offset(&self, disk: u32, offset: u64) -> ZipResult<u64> {
        if disk as usize >= self.volumes.len() {
            return Err(self.missing(disk));
        }
        let start: u64 = self.volumes[..disk as usize].iter().map(|v| v.len).sum();
        Ok(start + offset)
    }

    /// Converts a logical offset to a `(disk, offset within disk)` pair.
    ///
    /// Offsets past the end map to one past the last volume.
    pub fn locate(&self, absolute: u64) -> (u32, u64) {
        let mut start = 0;
        for (disk, volume) in self.volumes.iter().enumerate() {
            if absolute < start + volume.len {
                return (disk as u32, absolute - start);
            }
            start += volume.len;
        }
        (self.volumes.len() as u32, absolute - start)
    }

    /// Opens a new cursor over the address space.
    ///
    /// Cursors are cheap, hold at most one open file,
    /// and shouldn't be shared between threads.
    pub fn reader(&self) -> VolumeReader {
        VolumeReader {
            volumes: self.clone(),
            open: None,
            position: 0,
        }
    }

    fn missing(&self, index: u32) -> ZipError {
        let last = self.last_path();
        ZipError::MissingVolume {
            index,
            path: split_volume_path(last, index),
        }
    }
}

struct OpenVolume {
    disk: u32,
    file: BufReader<File>,
    /// Where `file`'s cursor is, relative to the start of the volume.
    offset: u64,
}

/// A `Read + Seek` cursor over a [`VolumeSet`],
/// crossing from one volume to the next as needed.
pub struct VolumeReader {
    volumes: VolumeSet,
    open: Option<OpenVolume>,
    position: u64,
}

impl VolumeReader {
    pub fn volumes(&self) -> &VolumeSet {
        &self.volumes
    }

    /// The current logical offset.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// The disk the cursor is currently on.
    pub fn current_disk(&self) -> u32 {
        self.volumes.locate(self.position).0
    }

    /// Seeks to `offset` within `disk`.
    pub fn seek_disk(&mut self, disk: u32, offset: u64) -> ZipResult<u64> {
        let absolute = self.volumes.absolute_offset(disk, offset)?;
        self.position = absolute;
        Ok(absolute)
    }

    fn open_disk(&mut self, disk: u32) -> io::Result<&mut OpenVolume> {
        match self.open.take() {
            Some(open) if open.disk == disk => Ok(self.open.insert(open)),
            _ => {
                let path = &self.volumes.volumes[disk as usize].path;
                trace!("Opening volume {} ({})", disk, path);
                let file = match File::open(path) {
                    Ok(f) => f,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        return Err(ZipError::MissingVolume {
                            index: disk,
                            path: path.clone(),
                        }
                        .into())
                    }
                    Err(e) => return Err(e),
                };
                Ok(self.open.insert(OpenVolume {
                    disk,
                    file: BufReader::new(file),
                    offset: 0,
                }))
            }
        }
    }
}

impl Read for VolumeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let (disk, offset) = self.volumes.locate(self.position);
        if disk >= self.volumes.len() {
            return Ok(0);
        }
        let remaining = self.volumes.volumes[disk as usize].len - offset;
        let open = self.open_disk(disk)?;
        if open.offset != offset {
            open.file.seek(SeekFrom::Start(offset))?;
            open.offset = offset;
        }
        let wanted = std::cmp::min(buf.len() as u64, remaining) as usize;
        let count = open.file.read(&mut buf[..wanted])?;
        if count == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("Volume {} is shorter than it was when opened", disk),
            ));
        }
        open.offset += count as u64;
        self.position += count as u64;
        Ok(count)
    }
}

impl Seek for VolumeReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_position = match pos {
            SeekFrom::Start(p) => Some(p),
            SeekFrom::End(delta) => self.volumes.total_len().checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        match new_position {
            Some(p) => {
                self.position = p;
                Ok(p)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Seek before the start of the archive",
            )),
        }
    }
}

/// A `Write` sink that spreads an archive over volumes of at most
/// `split_size` bytes each (or a single file if there's no split size).
pub struct VolumeWriter {
    archive: Utf8PathBuf,
    split_size: Option<u64>,
    disk: u32,
    current_path: Utf8PathBuf,
    file: BufWriter<File>,
    /// Bytes written to the current volume
    written: u64,
    finished: Vec<Volume>,
}

impl VolumeWriter {
    /// Creates the first volume of an archive at `archive`.
    ///
    /// With a split size, volumes go to `archive.z01`, `archive.z02`, ...
    /// until [`finish()`](Self::finish) renames the last one to `archive`.
    pub fn create(archive: &Utf8Path, split_size: Option<u64>) -> ZipResult<Self> {
        if let Some(size) = split_size {
            if size < 64 {
                return Err(ZipError::InvalidArchive("Split size too small"));
            }
        }
        let current_path = match split_size {
            Some(_) => split_volume_path(archive, 0),
            None => archive.to_owned(),
        };
        let file = BufWriter::new(File::create(&current_path)?);
        let mut writer = Self {
            archive: archive.to_owned(),
            split_size,
            disk: 0,
            current_path,
            file,
            written: 0,
            finished: Vec::new(),
        };
        if split_size.is_some() {
            writer.write_atomic(&SPLIT_ARCHIVE_SIGNATURE.to_le_bytes())?;
        }
        Ok(writer)
    }

    pub fn is_split(&self) -> bool {
        self.split_size.is_some()
    }

    /// The disk currently being written, and the offset within it.
    pub fn position(&self) -> (u32, u64) {
        (self.disk, self.written)
    }

    pub fn disk(&self) -> u32 {
        self.disk
    }

    /// Bytes left before the current volume is full.
    pub fn remaining(&self) -> Option<u64> {
        self.split_size.map(|size| size - self.written)
    }

    /// Writes a record that mustn't straddle two volumes,
    /// first moving to a fresh volume if it wouldn't fit in this one.
    pub fn write_atomic(&mut self, record: &[u8]) -> ZipResult<()> {
        if let Some(size) = self.split_size {
            if record.len() as u64 > size {
                return Err(ZipError::InvalidArchive(
                    "Record is larger than the split size",
                ));
            }
            if record.len() as u64 > size - self.written {
                self.roll()?;
            }
        }
        self.file.write_all(record)?;
        self.written += record.len() as u64;
        Ok(())
    }

    fn roll(&mut self) -> io::Result<()> {
        self.file.flush()?;
        let next_path = split_volume_path(&self.archive, self.disk + 1);
        debug!(
            "Volume {} full at {} bytes, moving on to {}",
            self.current_path, self.written, next_path
        );
        let next = BufWriter::new(File::create(&next_path)?);
        drop(std::mem::replace(&mut self.file, next));
        self.finished.push(Volume {
            path: std::mem::replace(&mut self.current_path, next_path),
            len: self.written,
        });
        self.disk += 1;
        self.written = 0;
        Ok(())
    }

    /// Flushes the last volume and returns the finished set.
    pub fn finish(mut self) -> ZipResult<VolumeSet> {
        self.file.flush()?;
        if self.split_size.is_some() {
            if self.finished.is_empty() {
                // Everything fit in one volume:
                // mark it as a split archive that wasn't.
                let file = self.file.get_mut();
                file.seek(SeekFrom::Start(0))?;
                file.write_all(&SPLIT_TEMPORARY_SIGNATURE.to_le_bytes())?;
                file.seek(SeekFrom::End(0))?;
                file.flush()?;
            }
            drop(self.file);
            fs::rename(&self.current_path, &self.archive)?;
            debug!("Renamed {} to {}", self.current_path, self.archive);
        } else {
            drop(self.file);
        }
        self.finished.push(Volume {
            path: self.archive,
            len: self.written,
        });
        Ok(VolumeSet {
            volumes: self.finished,
        })
    }
}

impl Write for VolumeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut wanted = buf.len();
        if let Some(size) = self.split_size {
            if self.written == size {
                self.roll()?;
            }
            wanted = std::cmp::min(wanted as u64, size - self.written) as usize;
        }
        let count = self.file.write(&buf[..wanted])?;
        self.written += count as u64;
        Ok(count)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn temp_archive(dir: &tempfile::TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().join("test.zip")).unwrap()
    }

    #[test]
    fn solid_round_trip() -> ZipResult<()> {
        let dir = tempfile::tempdir()?;
        let path = temp_archive(&dir);
        let mut writer = VolumeWriter::create(&path, None)?;
        writer.write_all(b"hello, ")?;
        writer.write_atomic(b"world")?;
        let set = writer.finish()?;
        assert!(!set.is_split());
        assert_eq!(set.total_len(), 12);

        let mut contents = Vec::new();
        set.reader().read_to_end(&mut contents)?;
        assert_eq!(contents, b"hello, world");
        Ok(())
    }

    #[test]
    fn atomic_write_rolls_before_boundary() -> ZipResult<()> {
        let dir = tempfile::tempdir()?;
        let path = temp_archive(&dir);
        let mut writer = VolumeWriter::create(&path, Some(64))?;
        // 4 byte split signature + 58 bytes leaves 2 bytes in volume 0,
        // so a 4-byte signature has to go to the next volume.
        let payload = [0xAAu8; 58];
        writer.write_all(&payload)?;
        assert_eq!(writer.position(), (0, 62));
        writer.write_atomic(&0x04034b50u32.to_le_bytes())?;
        assert_eq!(writer.position(), (1, 4));
        let set = writer.finish()?;

        assert_eq!(set.len(), 2);
        assert_eq!(set.volume_len(0)?, 62);
        assert_eq!(set.volume_len(1)?, 4);
        assert!(split_volume_path(&path, 0).exists());
        assert!(path.exists());

        let first = fs::read(split_volume_path(&path, 0))?;
        assert_eq!(first[..4], SPLIT_ARCHIVE_SIGNATURE.to_le_bytes());

        let mut contents = Vec::new();
        set.reader().read_to_end(&mut contents)?;
        let mut expected = SPLIT_ARCHIVE_SIGNATURE.to_le_bytes().to_vec();
        expected.extend_from_slice(&payload);
        expected.extend_from_slice(&0x04034b50u32.to_le_bytes());
        assert_eq!(contents, expected);
        Ok(())
    }

    #[test]
    fn plain_writes_straddle_volumes() -> ZipResult<()> {
        let dir = tempfile::tempdir()?;
        let path = temp_archive(&dir);
        let mut writer = VolumeWriter::create(&path, Some(64))?;
        let payload: Vec<u8> = (0..200u32).map(|i| i as u8).collect();
        writer.write_all(&payload)?;
        let set = writer.finish()?;
        assert_eq!(set.len(), 4);
        assert_eq!(set.total_len(), 204);

        let mut reader = set.reader();
        reader.seek(SeekFrom::Start(4))?;
        let mut contents = Vec::new();
        reader.read_to_end(&mut contents)?;
        assert_eq!(contents, payload);

        assert_eq!(set.locate(64), (1, 0));
        assert_eq!(set.absolute_offset(2, 5)?, 133);
        Ok(())
    }

    #[test]
    fn single_volume_split_gets_temporary_marker() -> ZipResult<()> {
        let dir = tempfile::tempdir()?;
        let path = temp_archive(&dir);
        let mut writer = VolumeWriter::create(&path, Some(1024))?;
        writer.write_all(b"tiny")?;
        let set = writer.finish()?;
        assert_eq!(set.len(), 1);
        let bytes = fs::read(&path)?;
        assert_eq!(bytes[..4], SPLIT_TEMPORARY_SIGNATURE.to_le_bytes());
        assert_eq!(&bytes[4..], b"tiny");
        Ok(())
    }

    #[test]
    fn missing_volume_is_reported() -> ZipResult<()> {
        let dir = tempfile::tempdir()?;
        let path = temp_archive(&dir);
        fs::write(&path, b"last")?;
        match VolumeSet::split(&path, 3) {
            Err(ZipError::MissingVolume { index, path: p }) => {
                assert_eq!(index, 0);
                assert_eq!(p, split_volume_path(&path, 0));
            }
            other => panic!("Expected a missing volume, got {:?}", other),
        }
        Ok(())
    }
}
