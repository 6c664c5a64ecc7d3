//! Little-endian binary input and output over any `Read + Seek` / `Write`.
//!
//! Everything in a ZIP archive is little-endian,
//! so unlike `byteorder` proper we don't make callers spell that out.

use std::io::{self, Read, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::arch::usize;
use crate::result::*;

/// Turns a short read into a complaint about a truncated record,
/// which is a lot more useful than "unexpected EOF".
fn truncated(e: io::Error) -> ZipError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        ZipError::InvalidArchive("Record truncated by end of archive")
    } else {
        e.into()
    }
}

pub struct DataInput<R> {
    inner: R,
}

impl<R: Read + Seek> DataInput<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn position(&mut self) -> ZipResult<u64> {
        Ok(self.inner.stream_position()?)
    }

    pub fn seek(&mut self, to: u64) -> ZipResult<()> {
        self.inner.seek(SeekFrom::Start(to))?;
        Ok(())
    }

    pub fn skip(&mut self, count: i64) -> ZipResult<()> {
        self.inner.seek(SeekFrom::Current(count))?;
        Ok(())
    }

    pub fn read_u8(&mut self) -> ZipResult<u8> {
        self.inner.read_u8().map_err(truncated)
    }

    pub fn read_u16(&mut self) -> ZipResult<u16> {
        self.inner.read_u16::<LittleEndian>().map_err(truncated)
    }

    pub fn read_u32(&mut self) -> ZipResult<u32> {
        self.inner.read_u32::<LittleEndian>().map_err(truncated)
    }

    pub fn read_u64(&mut self) -> ZipResult<u64> {
        self.inner.read_u64::<LittleEndian>().map_err(truncated)
    }

    pub fn read_bytes<L: Into<u64>>(&mut self, len: L) -> ZipResult<Vec<u8>> {
        let mut buf = vec![0; usize(len)?];
        self.inner.read_exact(&mut buf).map_err(truncated)?;
        Ok(buf)
    }

    /// Reads the next four bytes as a signature without consuming them.
    pub fn peek_signature(&mut self) -> ZipResult<u32> {
        let signature = self.read_u32()?;
        self.skip(-4)?;
        Ok(signature)
    }

    /// Consumes a signature, failing with
    /// [`ZipError::CorruptHeader`] if it isn't `expected`.
    pub fn expect_signature(&mut self, record: &'static str, expected: u32) -> ZipResult<()> {
        let offset = self.position()?;
        let actual = self.read_u32()?;
        if actual != expected {
            return Err(ZipError::CorruptHeader {
                record,
                offset,
                expected,
                actual,
            });
        }
        Ok(())
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// A position in a [`DataOutput`], for measuring what was written since.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark(u64);

/// Counts every byte written through it.
pub struct DataOutput<W> {
    inner: W,
    written: u64,
}

impl<W: Write> DataOutput<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }

    /// Bytes written so far
    pub fn position(&self) -> u64 {
        self.written
    }

    pub fn mark(&self) -> Mark {
        Mark(self.written)
    }

    /// Bytes written since `mark` was taken
    pub fn since(&self, mark: Mark) -> u64 {
        self.written - mark.0
    }

    pub fn write_u8(&mut self, v: u8) -> ZipResult<()> {
        WriteBytesExt::write_u8(self, v)?;
        Ok(())
    }

    pub fn write_u16(&mut self, v: u16) -> ZipResult<()> {
        WriteBytesExt::write_u16::<LittleEndian>(self, v)?;
        Ok(())
    }

    pub fn write_u32(&mut self, v: u32) -> ZipResult<()> {
        WriteBytesExt::write_u32::<LittleEndian>(self, v)?;
        Ok(())
    }

    pub fn write_u64(&mut self, v: u64) -> ZipResult<()> {
        WriteBytesExt::write_u64::<LittleEndian>(self, v)?;
        Ok(())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> ZipResult<()> {
        self.write_all(bytes)?;
        Ok(())
    }

    /// Writes a length as a 16-bit field,
    /// complaining if it doesn't fit instead of truncating it.
    pub fn write_len_u16(&mut self, len: usize, what: &'static str) -> ZipResult<()> {
        let len = u16::try_from(len).map_err(|_| ZipError::InvalidArchive(what))?;
        self.write_u16(len)
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for DataOutput<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let count = self.inner.write(buf)?;
        self.written += count as u64;
        Ok(count)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Serializes a record into a fresh buffer.
pub fn to_bytes<F>(f: F) -> ZipResult<Vec<u8>>
where
    F: FnOnce(&mut DataOutput<Vec<u8>>) -> ZipResult<()>,
{
    let mut out = DataOutput::new(Vec::new());
    f(&mut out)?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn little_endian_primitives() -> ZipResult<()> {
        let bytes = to_bytes(|out| {
            out.write_u16(0x0102)?;
            out.write_u32(0x03040506)?;
            out.write_u64(0x0708090a0b0c0d0e)?;
            assert_eq!(out.position(), 14);
            Ok(())
        })?;
        assert_eq!(bytes[..2], [0x02, 0x01]);
        assert_eq!(bytes[2..6], [0x06, 0x05, 0x04, 0x03]);

        let mut input = DataInput::new(Cursor::new(&bytes[..]));
        assert_eq!(input.read_u16()?, 0x0102);
        assert_eq!(input.read_u32()?, 0x03040506);
        assert_eq!(input.read_u64()?, 0x0708090a0b0c0d0e);
        assert_eq!(input.position()?, 14);
        Ok(())
    }

    #[test]
    fn signatures() -> ZipResult<()> {
        let bytes = 0x04034b50u32.to_le_bytes();
        let mut input = DataInput::new(Cursor::new(&bytes[..]));
        assert_eq!(input.peek_signature()?, 0x04034b50);
        assert_eq!(input.position()?, 0);
        match input.expect_signature("central directory header", 0x02014b50) {
            Err(ZipError::CorruptHeader {
                offset, actual, ..
            }) => {
                assert_eq!(offset, 0);
                assert_eq!(actual, 0x04034b50);
            }
            other => panic!("Expected a corrupt header, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn truncation_is_reported() {
        let mut input = DataInput::new(Cursor::new(&[1u8, 2, 3][..]));
        assert!(matches!(
            input.read_u32(),
            Err(ZipError::InvalidArchive(_))
        ));
    }

    #[test]
    fn marks_measure_writes() -> ZipResult<()> {
        let mut out = DataOutput::new(Vec::new());
        out.write_u32(0)?;
        let mark = out.mark();
        out.write_bytes(b"hello")?;
        assert_eq!(out.since(mark), 5);
        Ok(())
    }
}
