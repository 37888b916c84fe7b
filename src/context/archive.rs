//! Deterministic tar and gzip writers
//!
//! Every header field that could vary between machines is pinned: owner is
//! root, mtime is fixed, modes are normalized and entries are written in the
//! order given (callers pass them sorted).

use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{self, Write};
use tar::{EntryType, Header};

/// Environment variable that fixes archive timestamps
pub const SOURCE_DATE_EPOCH: &str = "SOURCE_DATE_EPOCH";

/// Timestamp for archive entries: `SOURCE_DATE_EPOCH` when set, else 0
pub fn source_date_epoch() -> u64 {
    std::env::var(SOURCE_DATE_EPOCH)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TarEntry {
    Dir { path: String },
    File { path: String, data: Vec<u8>, executable: bool },
}

impl TarEntry {
    pub fn path(&self) -> &str {
        match self {
            TarEntry::Dir { path } | TarEntry::File { path, .. } => path,
        }
    }
}

fn header(entry_type: EntryType, mode: u32, size: u64, mtime: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mode(mode);
    header.set_size(size);
    header.set_mtime(mtime);
    header.set_uid(0);
    header.set_gid(0);
    header
}

pub fn write_tar(entries: &[TarEntry], mtime: u64) -> io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.mode(tar::HeaderMode::Deterministic);

    for entry in entries {
        match entry {
            TarEntry::Dir { path } => {
                let mut header = header(EntryType::Directory, 0o755, 0, mtime);
                let path = format!("{}/", path.trim_end_matches('/'));
                builder.append_data(&mut header, path, io::empty())?;
            }
            TarEntry::File {
                path,
                data,
                executable,
            } => {
                let mode = if *executable { 0o755 } else { 0o644 };
                let mut header = header(EntryType::Regular, mode, data.len() as u64, mtime);
                builder.append_data(&mut header, path, data.as_slice())?;
            }
        }
    }

    builder.into_inner()
}

pub fn gzip(data: &[u8]) -> io::Result<Vec<u8>> {
    // GzEncoder writes mtime 0 into the header, so output is stable
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Read;

    fn sample() -> Vec<TarEntry> {
        vec![
            TarEntry::Dir { path: "app".into() },
            TarEntry::File {
                path: "app/main.py".into(),
                data: b"print('hi')\n".to_vec(),
                executable: false,
            },
            TarEntry::File {
                path: "run.sh".into(),
                data: b"#!/bin/sh\n".to_vec(),
                executable: true,
            },
        ]
    }

    #[test]
    fn test_tar_is_deterministic() {
        let a = write_tar(&sample(), 0).unwrap();
        let b = write_tar(&sample(), 0).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, write_tar(&sample(), 1_700_000_000).unwrap());
    }

    #[test]
    fn test_tar_headers() {
        let bytes = write_tar(&sample(), 42).unwrap();
        let mut archive = tar::Archive::new(bytes.as_slice());
        let mut seen = Vec::new();
        for entry in archive.entries().unwrap() {
            let entry = entry.unwrap();
            let header = entry.header();
            assert_eq!(header.uid().unwrap(), 0);
            assert_eq!(header.gid().unwrap(), 0);
            assert_eq!(header.mtime().unwrap(), 42);
            seen.push((
                entry.path().unwrap().to_string_lossy().into_owned(),
                header.mode().unwrap(),
            ));
        }
        assert_eq!(
            seen,
            vec![
                ("app/".to_string(), 0o755),
                ("app/main.py".to_string(), 0o644),
                ("run.sh".to_string(), 0o755),
            ]
        );
    }

    #[test]
    fn test_gzip_round_trip_and_stable() {
        let tar = write_tar(&sample(), 0).unwrap();
        let gz = gzip(&tar).unwrap();
        assert_eq!(gz, gzip(&tar).unwrap());

        let mut decoded = Vec::new();
        flate2::read::GzDecoder::new(gz.as_slice())
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, tar);
    }

    #[test]
    #[serial]
    fn test_source_date_epoch() {
        std::env::remove_var(SOURCE_DATE_EPOCH);
        assert_eq!(source_date_epoch(), 0);
        std::env::set_var(SOURCE_DATE_EPOCH, "1700000000");
        assert_eq!(source_date_epoch(), 1_700_000_000);
        std::env::set_var(SOURCE_DATE_EPOCH, "yesterday");
        assert_eq!(source_date_epoch(), 0);
        std::env::remove_var(SOURCE_DATE_EPOCH);
    }
}
