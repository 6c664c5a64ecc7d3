#![allow(dead_code)]

use camino::Utf8PathBuf;
use chrono::{NaiveDate, NaiveDateTime};
use tempfile::TempDir;

use zipfold::*;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn temp_path(dir: &TempDir, name: &str) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(dir.path().join(name)).expect("Temp dir isn't UTF-8")
}

pub fn timestamp() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2021, 6, 15)
        .unwrap()
        .and_hms_opt(12, 34, 56)
        .unwrap()
}

pub fn entry(name: &str) -> EntryOptions {
    EntryOptions::new(name).last_modified(timestamp())
}

/// Bytes that won't compress, from a small xorshift generator
/// so failures are reproducible.
pub fn noise(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state as u8
        })
        .collect()
}

pub fn text(len: usize) -> Vec<u8> {
    b"All work and no play makes Jack a dull boy.\n"
        .iter()
        .cycle()
        .take(len)
        .copied()
        .collect()
}
