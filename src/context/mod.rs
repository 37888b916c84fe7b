//! Build context: the directory a build copies its inputs from
//!
//! The tree is walked once with `.dockerignore` applied. Everything later
//! (the daemon upload, the COPY layers of the layout backend) is produced
//! from that sorted snapshot.
//!
//! Only the `.dockerignore` at the context root is read, and its patterns
//! are anchored at the root the way the Docker daemon reads them.

pub mod archive;

pub use archive::{source_date_epoch, TarEntry};

use crate::descriptor::{DEFAULT_ENTRYPOINT_MODULE, DEFAULT_MANIFEST, DEFAULT_SOURCE};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use ignore::WalkBuilder;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

pub const DOCKERIGNORE: &str = ".dockerignore";

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Build context {0} does not exist or is not a directory")]
    MissingRoot(PathBuf),

    #[error("Failed to walk build context: {0}")]
    Walk(#[from] ignore::Error),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid pattern in .dockerignore: {0}")]
    Pattern(#[source] ignore::Error),

    #[error("Failed to write archive: {0}")]
    Archive(#[source] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct ContextSettings {
    /// Manifest path relative to the context root
    pub manifest: String,
    /// Source path relative to the context root
    pub source: String,
    pub entry_module: String,
    /// Timestamp written into every archive entry
    pub mtime: u64,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            manifest: DEFAULT_MANIFEST.to_string(),
            source: DEFAULT_SOURCE.to_string(),
            entry_module: DEFAULT_ENTRYPOINT_MODULE.to_string(),
            mtime: source_date_epoch(),
        }
    }
}

/// Files that satisfy `python -m <module>`
pub fn module_candidates(module: &str) -> Vec<String> {
    let base = module.replace('.', "/");
    vec![format!("{}.py", base), format!("{}/__init__.py", base)]
}

fn normalize_rel(path: &str) -> String {
    let trimmed = path.trim_start_matches("./").trim_matches('/');
    if trimmed == "." {
        String::new()
    } else {
        trimmed.to_string()
    }
}

fn join_rel(base: &str, rest: &str) -> String {
    match (base.is_empty(), rest.is_empty()) {
        (true, _) => rest.to_string(),
        (false, true) => base.to_string(),
        (false, false) => format!("{}/{}", base, rest),
    }
}

/// Rewrite a `.dockerignore` line as a gitignore line anchored at the root.
/// `None` for blank lines and comments.
fn anchored_pattern(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (negate, pattern) = match line.strip_prefix('!') {
        Some(rest) => ("!", rest.trim()),
        None => ("", line),
    };
    let mut pattern = pattern;
    loop {
        let stripped = pattern.trim_start_matches('/');
        let stripped = stripped.strip_prefix("./").unwrap_or(stripped);
        if stripped == pattern {
            break;
        }
        pattern = stripped;
    }
    let pattern = pattern.trim_end_matches('/');
    if pattern.is_empty() || pattern == "." {
        return None;
    }
    if pattern.starts_with("**") {
        Some(format!("{}{}", negate, pattern))
    } else {
        Some(format!("{}/{}", negate, pattern))
    }
}

/// Matcher for `<root>/.dockerignore`, empty when the file is absent
fn dockerignore(root: &Path) -> Result<Gitignore, ContextError> {
    let path = root.join(DOCKERIGNORE);
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Gitignore::empty()),
        Err(source) => return Err(ContextError::Io { path, source }),
    };

    let mut builder = GitignoreBuilder::new(root);
    for pattern in content.lines().filter_map(anchored_pattern) {
        builder
            .add_line(Some(path.clone()), &pattern)
            .map_err(ContextError::Pattern)?;
    }
    builder.build().map_err(ContextError::Pattern)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextEntry {
    /// Path relative to the context root, `/`-separated
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    pub executable: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildContext {
    root: PathBuf,
    entries: Vec<ContextEntry>,
    manifest: String,
    source: String,
    entry_module: String,
    mtime: u64,
}

impl BuildContext {
    pub fn collect(root: &Path, settings: &ContextSettings) -> Result<Self, ContextError> {
        if !root.is_dir() {
            return Err(ContextError::MissingRoot(root.to_path_buf()));
        }

        let excluded = dockerignore(root)?;
        let walk_root = root.to_path_buf();
        let walker = WalkBuilder::new(root)
            .standard_filters(false)
            .filter_entry(move |entry| {
                let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
                entry.path() == walk_root
                    || !excluded
                        .matched_path_or_any_parents(entry.path(), is_dir)
                        .is_ignore()
            })
            .build();

        let mut entries = Vec::new();
        for result in walker {
            let entry = result?;
            let path = entry.path();
            if path == root {
                continue;
            }

            let Some(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_symlink() {
                warn!(path = %path.display(), "Skipping symlink in build context");
                continue;
            }

            let metadata = entry.metadata()?;
            let relative = path
                .strip_prefix(root)
                .map_err(|e| ContextError::Io {
                    path: path.to_path_buf(),
                    source: std::io::Error::new(std::io::ErrorKind::Other, e),
                })?
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");

            entries.push(ContextEntry {
                path: relative,
                is_dir: file_type.is_dir(),
                size: if file_type.is_dir() { 0 } else { metadata.len() },
                executable: is_executable(&metadata),
            });
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));

        let context = Self {
            root: root.to_path_buf(),
            entries,
            manifest: normalize_rel(&settings.manifest),
            source: normalize_rel(&settings.source),
            entry_module: settings.entry_module.clone(),
            mtime: settings.mtime,
        };

        debug!(
            root = %root.display(),
            entries = context.entries.len(),
            manifest = context.has_manifest(),
            entry_module = context.has_entry_module(),
            "Collected build context"
        );

        Ok(context)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entries(&self) -> &[ContextEntry] {
        &self.entries
    }

    pub fn files(&self) -> impl Iterator<Item = &ContextEntry> {
        self.entries.iter().filter(|e| !e.is_dir)
    }

    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }

    pub fn mtime(&self) -> u64 {
        self.mtime
    }

    pub fn contains(&self, path: &str) -> bool {
        let path = normalize_rel(path);
        path.is_empty() || self.entries.iter().any(|e| e.path == path)
    }

    pub fn manifest_path(&self) -> &str {
        &self.manifest
    }

    pub fn has_manifest(&self) -> bool {
        self.entries
            .iter()
            .any(|e| !e.is_dir && e.path == self.manifest)
    }

    pub fn has_source(&self) -> bool {
        self.contains(&self.source)
    }

    /// Whether the source tree holds the file `python -m <module>` needs
    pub fn has_entry_module(&self) -> bool {
        module_candidates(&self.entry_module)
            .iter()
            .any(|candidate| self.contains(&join_rel(&self.source, candidate)))
    }

    fn read(&self, rel: &str) -> Result<Vec<u8>, ContextError> {
        let path = self.root.join(rel);
        std::fs::read(&path).map_err(|source| ContextError::Io { path, source })
    }

    /// Entries at or below `src`, rebased under `dest` (both `/`-separated,
    /// `dest` may be empty). Returns `None` when `src` is not in the context.
    pub fn select(&self, src: &str, dest: &str) -> Result<Option<Vec<TarEntry>>, ContextError> {
        let src = normalize_rel(src);
        let dest = normalize_rel(dest);

        if !src.is_empty() && !self.contains(&src) {
            return Ok(None);
        }

        let single_file = self
            .entries
            .iter()
            .find(|e| e.path == src)
            .filter(|e| !e.is_dir);

        let mut out = Vec::new();
        let mut dirs = BTreeSet::new();

        if let Some(file) = single_file {
            let name = file.path.rsplit('/').next().unwrap_or(&file.path);
            let target = join_rel(&dest, name);
            add_parents(&target, &mut dirs, &mut out);
            out.push(TarEntry::File {
                path: target,
                data: self.read(&file.path)?,
                executable: file.executable,
            });
            return Ok(Some(out));
        }

        for entry in &self.entries {
            let rest = if src.is_empty() {
                entry.path.as_str()
            } else if let Some(rest) = entry.path.strip_prefix(&format!("{}/", src)) {
                rest
            } else {
                continue;
            };
            let target = join_rel(&dest, rest);
            add_parents(&target, &mut dirs, &mut out);
            if entry.is_dir {
                if dirs.insert(target.clone()) {
                    out.push(TarEntry::Dir { path: target });
                }
            } else {
                out.push(TarEntry::File {
                    path: target,
                    data: self.read(&entry.path)?,
                    executable: entry.executable,
                });
            }
        }

        Ok(Some(out))
    }

    /// Tar of the whole context with `dockerfile` written as `Dockerfile`,
    /// replacing any Dockerfile already present
    pub fn archive(&self, dockerfile: &str) -> Result<Vec<u8>, ContextError> {
        let mut entries: Vec<TarEntry> = self
            .select("", "")?
            .unwrap_or_default()
            .into_iter()
            .filter(|e| e.path() != "Dockerfile")
            .collect();
        entries.push(TarEntry::File {
            path: "Dockerfile".to_string(),
            data: dockerfile.as_bytes().to_vec(),
            executable: false,
        });
        entries.sort_by(|a, b| a.path().cmp(b.path()));

        archive::write_tar(&entries, self.mtime).map_err(ContextError::Archive)
    }
}

fn add_parents(path: &str, dirs: &mut BTreeSet<String>, out: &mut Vec<TarEntry>) {
    let parts: Vec<&str> = path.split('/').collect();
    for depth in 1..parts.len() {
        let dir = parts[..depth].join("/");
        if dirs.insert(dir.clone()) {
            out.push(TarEntry::Dir { path: dir });
        }
    }
}

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.is_file() && metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &std::fs::Metadata) -> bool {
    false
}
