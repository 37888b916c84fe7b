use super::{FileKind, FileSystem};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

#[derive(Debug, Default, Clone, Copy)]
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn kind(&self, path: &Path) -> Option<FileKind> {
        let meta = fs::metadata(path).ok()?;
        Some(if meta.is_file() {
            FileKind::File
        } else if meta.is_dir() {
            FileKind::Directory
        } else {
            FileKind::Other
        })
    }

    fn read_to_string(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).with_context(|| format!("Failed to read file {}", path.display()))
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).with_context(|| format!("Failed to read file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("app")).unwrap();
        fs::write(dir.path().join("requirements.txt"), "aiogram==3.4.1\n").unwrap();
        fs::write(dir.path().join("app/main.py"), b"print('hi')\n").unwrap();
        dir
    }

    #[test]
    fn test_kind() {
        let temp = create_test_dir();
        let fs = RealFileSystem;

        assert_eq!(fs.kind(temp.path()), Some(FileKind::Directory));
        assert_eq!(
            fs.kind(&temp.path().join("requirements.txt")),
            Some(FileKind::File)
        );
        assert_eq!(fs.kind(&temp.path().join("missing")), None);
        assert!(fs.is_dir(&temp.path().join("app")));
        assert!(!fs.is_file(&temp.path().join("app")));
    }

    #[test]
    fn test_read() {
        let temp = create_test_dir();
        let fs = RealFileSystem;

        let content = fs
            .read_to_string(&temp.path().join("requirements.txt"))
            .unwrap();
        assert_eq!(content, "aiogram==3.4.1\n");

        let bytes = fs.read(&temp.path().join("app/main.py")).unwrap();
        assert_eq!(bytes, b"print('hi')\n");
    }

    #[test]
    fn test_read_missing_file_names_path() {
        let temp = create_test_dir();
        let err = RealFileSystem
            .read_to_string(&temp.path().join("nope.txt"))
            .unwrap_err();
        assert!(err.to_string().contains("nope.txt"));
    }
}
