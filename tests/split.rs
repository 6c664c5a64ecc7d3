use std::fs;
use std::io::Write;

use anyhow::Result;

use zipfold::spec::{SPLIT_ARCHIVE_SIGNATURE, SPLIT_TEMPORARY_SIGNATURE};
use zipfold::volume::split_volume_path;
use zipfold::write::MIN_SPLIT_SIZE;
use zipfold::*;

mod common;
use common::*;

fn first_four(path: &camino::Utf8Path) -> Result<[u8; 4]> {
    let bytes = fs::read(path)?;
    Ok([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[test]
fn spans_volumes() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let path = temp_path(&dir, "split.zip");

    let files: Vec<(String, Vec<u8>)> = (0..3)
        .map(|i| (format!("noise-{}.bin", i), noise(50_000, i + 1)))
        .collect();

    let mut writer = ZipWriter::create(&path, WriterOptions::new().split_size(MIN_SPLIT_SIZE))?;
    for (name, contents) in &files {
        writer.write_entry_whole(entry(name).compression_method(CompressionMethod::Stored), contents)?;
    }
    let written = writer.finish()?;

    let volumes = written.volumes();
    assert!(volumes.is_split());
    assert!(volumes.len() >= 3, "Only {} volumes", volumes.len());
    assert_eq!(written.total_disks(), volumes.len());
    for volume in volumes.paths() {
        assert!(fs::metadata(volume)?.len() <= MIN_SPLIT_SIZE, "{} is too big", volume);
    }
    assert_eq!(volumes.last_path(), path);
    assert_eq!(
        first_four(&split_volume_path(&path, 0))?,
        SPLIT_ARCHIVE_SIGNATURE.to_le_bytes()
    );

    let archive = ZipArchive::open(&path)?;
    assert_eq!(archive.total_disks(), volumes.len());
    assert_eq!(archive.entries(), written.entries());
    for (name, contents) in &files {
        let metadata = archive.by_name(name)?;
        assert_eq!(&archive.read_to_vec(metadata, None)?, contents);
    }
    Ok(())
}

#[test]
fn streamed_entries_span_volumes() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let path = temp_path(&dir, "streamed.zip");
    let contents = noise(200_000, 42);

    let mut writer = ZipWriter::create(&path, WriterOptions::new().split_size(MIN_SPLIT_SIZE))?;
    let mut stream = writer.write_entry_stream(entry("big.bin"))?;
    for chunk in contents.chunks(4096) {
        stream.write_all(chunk)?;
    }
    stream.close()?;
    writer.write_entry_whole(entry("after.txt"), b"still here")?;
    writer.finish()?;

    let archive = ZipArchive::open(&path)?;
    assert!(archive.total_disks() >= 4);
    assert_eq!(archive.read_to_vec(archive.by_name("big.bin")?, None)?, contents);
    assert_eq!(archive.read_to_vec(archive.by_name("after.txt")?, None)?, b"still here");
    Ok(())
}

#[test]
fn small_split_archive_is_one_volume() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let path = temp_path(&dir, "small.zip");

    let mut writer = ZipWriter::create(&path, WriterOptions::new().split_size(MIN_SPLIT_SIZE))?;
    writer.write_entry_whole(entry("tiny.txt"), b"tiny")?;
    let written = writer.finish()?;
    assert_eq!(written.volumes().len(), 1);
    assert!(!split_volume_path(&path, 0).exists());
    assert_eq!(first_four(&path)?, SPLIT_TEMPORARY_SIGNATURE.to_le_bytes());

    let archive = ZipArchive::open(&path)?;
    assert_eq!(archive.total_disks(), 1);
    assert_eq!(archive.read_to_vec(archive.by_name("tiny.txt")?, None)?, b"tiny");
    Ok(())
}

#[test]
fn missing_volume() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let path = temp_path(&dir, "holey.zip");

    let mut writer = ZipWriter::create(&path, WriterOptions::new().split_size(MIN_SPLIT_SIZE))?;
    writer.write_entry_whole(
        entry("noise.bin").compression_method(CompressionMethod::Stored),
        &noise(150_000, 7),
    )?;
    writer.finish()?;

    let second = split_volume_path(&path, 1);
    fs::remove_file(&second)?;
    match ZipArchive::open(&path) {
        Err(ZipError::MissingVolume { index, path }) => {
            assert_eq!(index, 1);
            assert_eq!(path, second);
        }
        other => panic!("Expected MissingVolume, got {:?}", other),
    }
    Ok(())
}
