use std::fs;
use std::sync::Mutex;

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};

use zipfold::crypto::aes::AesStrength;
use zipfold::extract::{extract_entries, AttributeSink, EntryAttributes};
use zipfold::*;

mod common;
use common::*;

fn build_tree(path: &Utf8Path) -> Result<Vec<(String, Vec<u8>)>> {
    let mut files = Vec::new();
    let mut writer = ZipWriter::create(path, WriterOptions::new())?;
    writer.add_directory(entry("top"))?;
    for i in 0..40u64 {
        let name = format!("top/sub-{}/file-{}.dat", i % 5, i);
        let contents = if i % 3 == 0 {
            noise(2000 + i as usize * 50, i + 1)
        } else {
            text(3000 + i as usize * 10)
        };
        let options = if i % 4 == 0 {
            entry(&name).aes(AesStrength::Aes128, b"pw")
        } else {
            entry(&name)
        };
        writer.write_entry_whole(options, &contents)?;
        files.push((name, contents));
    }
    writer.finish()?;
    Ok(files)
}

fn check_tree(out: &Utf8Path, files: &[(String, Vec<u8>)]) -> Result<()> {
    assert!(out.join("top").is_dir());
    for (name, contents) in files {
        assert_eq!(&fs::read(out.join(name))?, contents, "{}", name);
    }
    Ok(())
}

#[test]
fn sequential_and_parallel_agree() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let path = temp_path(&dir, "tree.zip");
    let files = build_tree(&path)?;
    let archive = ZipArchive::open(&path)?;

    let sequential = temp_path(&dir, "sequential");
    archive.extract(&sequential, &ExtractOptions::new().password(b"pw"))?;
    check_tree(&sequential, &files)?;

    for threads in [1, 3, 8] {
        let parallel = temp_path(&dir, &format!("parallel-{}", threads));
        archive.extract(
            &parallel,
            &ExtractOptions::new()
                .parallel(true)
                .threads(threads)
                .password(b"pw"),
        )?;
        check_tree(&parallel, &files)?;
    }
    Ok(())
}

#[test]
fn failures_are_collected() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let path = temp_path(&dir, "tree.zip");
    let files = build_tree(&path)?;
    let archive = ZipArchive::open(&path)?;

    // No password: every AES entry fails, everything else still comes out.
    let out = temp_path(&dir, "out");
    let failed = match archive.extract(&out, &ExtractOptions::new().parallel(true).threads(4)) {
        Err(ZipError::ExtractionFailed { failed }) => failed,
        other => panic!("Expected ExtractionFailed, got {:?}", other),
    };
    let mut failed_names: Vec<String> = failed.iter().map(|(p, _)| p.to_string()).collect();
    failed_names.sort();
    let mut expected: Vec<String> = files
        .iter()
        .enumerate()
        .filter(|(i, _)| i % 4 == 0)
        .map(|(_, (name, _))| name.clone())
        .collect();
    expected.sort();
    assert_eq!(failed_names, expected);
    assert!(failed
        .iter()
        .all(|(_, e)| matches!(e, ZipError::PasswordRequired(_))));

    for (i, (name, contents)) in files.iter().enumerate() {
        if i % 4 != 0 {
            assert_eq!(&fs::read(out.join(name))?, contents);
        }
    }
    Ok(())
}

#[test]
fn escaping_paths_are_refused() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let path = temp_path(&dir, "evil.zip");

    let mut writer = ZipWriter::create(&path, WriterOptions::new())?;
    writer.write_entry_whole(entry("../evil.txt"), b"muahaha")?;
    writer.write_entry_whole(entry("fine.txt"), b"fine")?;
    writer.finish()?;

    let archive = ZipArchive::open(&path)?;
    let out = temp_path(&dir, "nested/out");
    match archive.extract(&out, &ExtractOptions::new()) {
        Err(ZipError::ExtractionFailed { failed }) => {
            assert_eq!(failed.len(), 1);
            assert_eq!(failed[0].0, "../evil.txt");
            assert!(matches!(failed[0].1, ZipError::InvalidPath(_)));
        }
        other => panic!("Expected ExtractionFailed, got {:?}", other),
    }
    assert!(!temp_path(&dir, "nested/evil.txt").exists());
    assert_eq!(fs::read(out.join("fine.txt"))?, b"fine");
    Ok(())
}

#[test]
fn escaping_links_are_refused() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let path = temp_path(&dir, "links.zip");
    let outside = temp_path(&dir, "outside");
    fs::create_dir(&outside)?;

    let mut writer = ZipWriter::create(&path, WriterOptions::new())?;
    writer.add_symlink(entry("link"), outside.as_str())?;
    writer.add_symlink(entry("up"), "../outside")?;
    writer.write_entry_whole(entry("link/pwned.txt"), b"owned")?;
    writer.write_entry_whole(entry("up/pwned.txt"), b"owned")?;
    writer.finish()?;

    let archive = ZipArchive::open(&path)?;
    let out = temp_path(&dir, "dest");
    let failed = match archive.extract(&out, &ExtractOptions::new()) {
        Err(ZipError::ExtractionFailed { failed }) => failed,
        other => panic!("Expected ExtractionFailed, got {:?}", other),
    };
    let failed_names: Vec<&str> = failed.iter().map(|(p, _)| p.as_str()).collect();
    assert_eq!(failed_names, ["link", "up"]);
    assert!(failed
        .iter()
        .all(|(_, e)| matches!(e, ZipError::InvalidPath(_))));

    assert!(!outside.join("pwned.txt").exists());
    // With the links refused, their names are plain directories.
    assert!(fs::symlink_metadata(out.join("link"))?.is_dir());
    assert_eq!(fs::read(out.join("link/pwned.txt"))?, b"owned");
    assert_eq!(fs::read(out.join("up/pwned.txt"))?, b"owned");
    Ok(())
}

#[cfg(unix)]
#[test]
fn writes_through_links_are_refused() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let path = temp_path(&dir, "through.zip");

    let mut writer = ZipWriter::create(&path, WriterOptions::new())?;
    writer.add_directory(entry("real"))?;
    writer.add_symlink(entry("alias"), "real")?;
    writer.write_entry_whole(entry("alias/sneaky.txt"), b"sneaky")?;
    writer.finish()?;

    let archive = ZipArchive::open(&path)?;
    let out = temp_path(&dir, "dest");
    match archive.extract(&out, &ExtractOptions::new()) {
        Err(ZipError::ExtractionFailed { failed }) => {
            assert_eq!(failed.len(), 1);
            assert_eq!(failed[0].0, "alias/sneaky.txt");
            assert!(matches!(failed[0].1, ZipError::InvalidPath(_)));
        }
        other => panic!("Expected ExtractionFailed, got {:?}", other),
    }
    assert_eq!(fs::read_link(out.join("alias"))?, std::path::Path::new("real"));
    assert!(!out.join("real/sneaky.txt").exists());
    Ok(())
}

#[derive(Default)]
struct Recorder(Mutex<Vec<(Utf8PathBuf, bool, bool, Option<u32>)>>);

impl AttributeSink for Recorder {
    fn apply(&self, output: &Utf8Path, attributes: &EntryAttributes<'_>) -> ZipResult<()> {
        self.0.lock().unwrap().push((
            output.to_owned(),
            attributes.is_dir,
            attributes.is_symlink,
            attributes.unix_mode,
        ));
        Ok(())
    }
}

#[test]
fn attributes_and_links() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let path = temp_path(&dir, "links.zip");

    let mut writer = ZipWriter::create(&path, WriterOptions::new())?;
    writer.add_directory(entry("bin").unix_permissions(0o700))?;
    writer.write_entry_whole(entry("bin/tool").unix_permissions(0o755), b"#!/bin/sh\necho hi\n")?;
    writer.add_symlink(entry("bin/alias"), "tool")?;
    writer.finish()?;

    let archive = ZipArchive::open(&path)?;
    let out = temp_path(&dir, "out");
    let recorder = Recorder::default();
    let entries: Vec<&FileMetadata> = archive.entries().iter().collect();
    extract_entries(&archive, &entries, &out, &ExtractOptions::new(), &recorder)?;

    let recorded = recorder.0.into_inner().unwrap();
    assert_eq!(
        recorded,
        vec![
            (out.join("bin"), true, false, Some(0o040700)),
            (out.join("bin/tool"), false, false, Some(0o100755)),
            (out.join("bin/alias"), false, true, Some(0o120777)),
        ]
    );

    #[cfg(unix)]
    assert_eq!(fs::read_link(out.join("bin/alias"))?, std::path::Path::new("tool"));
    #[cfg(not(unix))]
    assert_eq!(fs::read(out.join("bin/alias"))?, b"tool");
    Ok(())
}
