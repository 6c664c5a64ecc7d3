use anyhow::Result;

use zipfold::crypto::aes::{AesStrength, AesVendorVersion};
use zipfold::crypto::strong::StrongAlgorithm;
use zipfold::spec::{CompressionMethod, LOCAL_FILE_HEADER_SIGNATURE};
use zipfold::*;

mod common;
use common::*;

#[test]
fn aes_256_scenario() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let path = temp_path(&dir, "aes.zip");

    let mut writer = ZipWriter::create(&path, WriterOptions::new())?;
    writer.write_entry_whole(
        entry("a.txt")
            .compression_method(CompressionMethod::Stored)
            .aes(AesStrength::Aes256, b"secret"),
        b"hello",
    )?;
    writer.finish()?;

    let bytes = std::fs::read(&path)?;
    assert_eq!(bytes[..4], LOCAL_FILE_HEADER_SIGNATURE.to_le_bytes());

    let archive = ZipArchive::open(&path)?;
    let metadata = archive.by_name("a.txt")?;
    let aes = metadata.extra_fields.aes().expect("No AES extra field");
    assert_eq!(aes.strength.to_u8(), 3);
    assert_eq!(aes.vendor_version, AesVendorVersion::Ae1);
    assert_eq!(metadata.compression_method, CompressionMethod::Stored);
    // Salt, password verifier, ciphertext, MAC
    assert_eq!(metadata.compressed_size, 16 + 2 + 5 + 10);

    assert_eq!(archive.read_to_vec(metadata, Some(b"secret"))?, b"hello");

    let mut cursor = archive.reader();
    match archive.read(&mut cursor, metadata, Some(b"wrong")) {
        Err(ZipError::IncorrectPassword(p)) => assert_eq!(p, "a.txt"),
        Err(other) => panic!("Expected IncorrectPassword, got {:?}", other),
        Ok(_) => panic!("Wrong password was accepted"),
    }
    Ok(())
}

#[test]
fn missing_passwords() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let path = temp_path(&dir, "needs-password.zip");

    let mut writer = ZipWriter::create(&path, WriterOptions::new())?;
    writer.write_entry_whole(entry("pk.txt").encryption(EncryptionMethod::Pkware, b"pw"), b"a")?;
    writer.write_entry_whole(entry("aes.txt").aes(AesStrength::Aes128, b"pw"), b"b")?;
    writer.write_entry_whole(
        entry("strong.txt").encryption(EncryptionMethod::Strong(StrongAlgorithm::Aes192), b"pw"),
        b"c",
    )?;
    let archive = writer.finish()?;

    for metadata in archive.entries() {
        assert!(metadata.is_encrypted());
        match archive.read_to_vec(metadata, None) {
            Err(e @ ZipError::PasswordRequired(_)) => assert!(e.is_password_error()),
            other => panic!("Expected PasswordRequired for {}, got {:?}", metadata.path, other),
        }
    }
    Ok(())
}

#[test]
fn wrong_passwords() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let path = temp_path(&dir, "wrong.zip");

    let mut writer = ZipWriter::create(&path, WriterOptions::new())?;
    writer.write_entry_whole(
        entry("pk.txt")
            .compression_method(CompressionMethod::Stored)
            .encryption(EncryptionMethod::Pkware, b"right"),
        &text(500),
    )?;
    writer.write_entry_whole(
        entry("strong.txt").encryption(EncryptionMethod::Strong(StrongAlgorithm::Aes256), b"right"),
        &text(500),
    )?;
    writer.write_entry_whole(entry("aes.txt").aes(AesStrength::Aes192, b"right"), &text(500))?;
    let archive = writer.finish()?;

    let pk = archive.by_name("pk.txt")?;
    // The traditional scheme only has a one-byte check,
    // so about one wrong password in 256 gets as far as the CRC.
    let mut hinted = None;
    for i in 0..4096 {
        let candidate = format!("wrong{}", i);
        match archive.read_to_vec(pk, Some(candidate.as_bytes())) {
            Err(ZipError::IncorrectPassword(_)) => {}
            Err(ZipError::ChecksumMismatch { password_hint, .. }) => {
                hinted = Some((candidate, password_hint));
                break;
            }
            other => panic!("Expected a password failure for {}, got {:?}", candidate, other),
        }
    }
    let (candidate, password_hint) = hinted.expect("No wrong password got past the check byte");
    assert!(password_hint, "{} didn't hint at a wrong password", candidate);
    let message = archive
        .read_to_vec(pk, Some(candidate.as_bytes()))
        .unwrap_err()
        .to_string();
    assert!(message.contains("wrong password?"), "{}", message);
    assert_eq!(archive.read_to_vec(pk, Some(b"right"))?, text(500));

    for name in ["strong.txt", "aes.txt"] {
        let metadata = archive.by_name(name)?;
        assert!(matches!(
            archive.read_to_vec(metadata, Some(b"wrong")),
            Err(ZipError::IncorrectPassword(_))
        ));
        assert_eq!(archive.read_to_vec(metadata, Some(b"right"))?, text(500));
    }
    Ok(())
}

#[test]
fn encrypted_central_directory() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let path = temp_path(&dir, "hidden.zip");

    let options =
        WriterOptions::new().encrypt_central_directory(b"directory", StrongAlgorithm::Aes256);
    let mut writer = ZipWriter::create(&path, options)?;
    writer.write_entry_whole(entry("visible-only-with-password.txt"), b"plain data")?;
    writer.write_entry_whole(
        entry("doubly-secret.txt").encryption(EncryptionMethod::Strong(StrongAlgorithm::Aes128), b"file"),
        b"secret data",
    )?;
    let written = writer.finish()?;
    assert!(written.central_directory_encryption().is_some());

    // Nothing should come out of the directory without its password.
    assert!(matches!(
        ZipArchive::open(&path),
        Err(ZipError::IncorrectCentralDirectoryPassword)
    ));
    assert!(matches!(
        ZipArchive::open_encrypted(&path, b"wrong"),
        Err(ZipError::IncorrectCentralDirectoryPassword)
    ));

    let archive = ZipArchive::open_encrypted(&path, b"directory")?;
    assert_eq!(archive.entries(), written.entries());
    let zip64 = archive
        .zip64_end_of_central_directory()
        .expect("Encrypted directories need a Zip64 record");
    assert_eq!(zip64.minimum_extract_version & 0xff, 62);

    let plain = archive.by_name("visible-only-with-password.txt")?;
    assert_eq!(archive.read_to_vec(plain, None)?, b"plain data");
    let secret = archive.by_name("doubly-secret.txt")?;
    assert_eq!(archive.read_to_vec(secret, Some(b"file"))?, b"secret data");
    Ok(())
}
