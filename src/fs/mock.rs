use super::{FileKind, FileSystem};
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// In-memory file system rooted at `/mock` by default
pub struct MockFileSystem {
    entries: RwLock<HashMap<PathBuf, Option<Vec<u8>>>>,
    root: PathBuf,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::with_root(PathBuf::from("/mock"))
    }

    pub fn with_root(root: PathBuf) -> Self {
        let mut entries = HashMap::new();
        entries.insert(root.clone(), None);
        Self {
            entries: RwLock::new(entries),
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: impl AsRef<[u8]>) {
        let path = self.normalize_path(path.as_ref());
        let mut entries = self.entries.write().unwrap();
        if let Some(parent) = path.parent() {
            Self::ensure_parents(&mut entries, parent);
        }
        entries.insert(path, Some(content.as_ref().to_vec()));
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let path = self.normalize_path(path.as_ref());
        let mut entries = self.entries.write().unwrap();
        Self::ensure_parents(&mut entries, &path);
    }

    pub fn remove(&self, path: impl AsRef<Path>) {
        let path = self.normalize_path(path.as_ref());
        self.entries
            .write()
            .unwrap()
            .retain(|p, _| !p.starts_with(&path));
    }

    fn normalize_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    fn ensure_parents(entries: &mut HashMap<PathBuf, Option<Vec<u8>>>, path: &Path) {
        let mut current = PathBuf::new();
        for component in path.components() {
            current.push(component);
            entries.entry(current.clone()).or_insert(None);
        }
    }
}

impl Default for MockFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for MockFileSystem {
    fn kind(&self, path: &Path) -> Option<FileKind> {
        let path = self.normalize_path(path);
        self.entries.read().unwrap().get(&path).map(|e| match e {
            Some(_) => FileKind::File,
            None => FileKind::Directory,
        })
    }

    fn read_to_string(&self, path: &Path) -> Result<String> {
        let bytes = self.read(path)?;
        String::from_utf8(bytes).map_err(|e| anyhow!("File {} is not UTF-8: {}", path.display(), e))
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let normalized = self.normalize_path(path);
        let entries = self.entries.read().unwrap();
        match entries.get(&normalized) {
            Some(Some(content)) => Ok(content.clone()),
            Some(None) => Err(anyhow!("Not a file: {}", normalized.display())),
            None => Err(anyhow!("File not found: {}", normalized.display())),
        }
    }
}
