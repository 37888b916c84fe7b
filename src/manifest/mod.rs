//! Requirements manifest parsing
//!
//! Handles the subset of requirements-file syntax a bot project actually
//! uses: one requirement per logical line, `#` comments, `\` continuations
//! and pip option lines (`-r`, `-c`, `--index-url`, ...). Option lines are
//! kept verbatim but never resolved.

mod package_set;
mod requirement;

pub use package_set::{PackageDiff, PackageSet};
pub use requirement::{normalize_name, normalize_version, Operator, Requirement, VersionSpecifier};

use crate::fs::FileSystem;
use crate::image::Digest;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Cannot read manifest {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("Invalid requirement on line {line} ('{text}'): {reason}")]
    InvalidRequirement {
        line: usize,
        text: String,
        reason: String,
    },
}

/// A pip option line such as `--index-url https://...` or `-r base.txt`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestOption {
    pub line: usize,
    pub text: String,
}

#[derive(Debug, Default)]
struct Parsed {
    requirements: Vec<Requirement>,
    options: Vec<ManifestOption>,
}

fn strip_comment(line: &str) -> &str {
    // `#` only starts a comment at line start or after whitespace; URLs keep
    // their fragments (`#egg=...`)
    let bytes = line.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b == b'#' && (i == 0 || bytes[i - 1].is_ascii_whitespace()) {
            return &line[..i];
        }
    }
    line
}

fn strip_hashes(line: &str) -> String {
    line.split_whitespace()
        .filter(|token| !token.starts_with("--hash="))
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_logical_lines(content: &str) -> Result<Parsed, ManifestError> {
    let mut parsed = Parsed::default();
    let mut pending = String::new();
    let mut start_line = 0;

    for (idx, raw) in content.lines().enumerate() {
        let line_no = idx + 1;
        if pending.is_empty() {
            start_line = line_no;
        }

        let line = strip_comment(raw);
        let trimmed = line.trim_end();
        if let Some(head) = trimmed.strip_suffix('\\') {
            pending.push_str(head);
            pending.push(' ');
            continue;
        }
        pending.push_str(trimmed);

        let logical = strip_hashes(&pending);
        pending.clear();
        if logical.is_empty() {
            continue;
        }

        if logical.starts_with('-') {
            parsed.options.push(ManifestOption {
                line: start_line,
                text: logical,
            });
        } else {
            parsed
                .requirements
                .push(Requirement::parse(&logical, start_line)?);
        }
    }

    // A trailing backslash on the last line still terminates the entry
    let logical = strip_hashes(&pending);
    if !logical.is_empty() {
        if logical.starts_with('-') {
            parsed.options.push(ManifestOption {
                line: start_line,
                text: logical,
            });
        } else {
            parsed
                .requirements
                .push(Requirement::parse(&logical, start_line)?);
        }
    }

    Ok(parsed)
}

/// Parse requirements-file text into its requirement entries
pub fn parse_requirements(content: &str) -> Result<Vec<Requirement>, ManifestError> {
    Ok(parse_logical_lines(content)?.requirements)
}

#[derive(Debug, Clone, Serialize)]
pub struct DependencyManifest {
    pub path: PathBuf,
    pub requirements: Vec<Requirement>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<ManifestOption>,
}

impl DependencyManifest {
    pub fn load(fs: &dyn FileSystem, path: &Path) -> Result<Self, ManifestError> {
        let content = fs
            .read_to_string(path)
            .map_err(|e| ManifestError::Unreadable {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        let manifest = Self::parse(path, &content)?;
        debug!(
            path = %path.display(),
            requirements = manifest.requirements.len(),
            options = manifest.options.len(),
            "Loaded dependency manifest"
        );
        Ok(manifest)
    }

    pub fn parse(path: &Path, content: &str) -> Result<Self, ManifestError> {
        let parsed = parse_logical_lines(content)?;
        Ok(Self {
            path: path.to_path_buf(),
            requirements: parsed.requirements,
            options: parsed.options,
        })
    }

    pub fn is_fully_pinned(&self) -> bool {
        self.requirements.iter().all(Requirement::is_pinned)
    }

    pub fn unpinned(&self) -> Vec<&Requirement> {
        self.requirements
            .iter()
            .filter(|r| !r.is_pinned())
            .collect()
    }

    /// Packages whose version is fully determined by the manifest
    pub fn expected_packages(&self) -> PackageSet {
        let mut set = PackageSet::new();
        for req in &self.requirements {
            if let Some(version) = req.pinned_version() {
                set.insert(&req.normalized, version);
            }
        }
        set
    }

    /// Pins to check an installed set against. Arbitrary-equality pins
    /// (`===`) keep one extra `=` on the version and compare literally.
    pub fn expected_pins(&self) -> PackageSet {
        let mut set = PackageSet::new();
        for req in &self.requirements {
            match (req.pinned_version(), req.specifiers.first().map(|s| s.op)) {
                (Some(version), Some(Operator::ArbitraryEqual)) => {
                    set.insert(&req.normalized, &format!("={}", version))
                }
                (Some(version), _) => set.insert(&req.normalized, version),
                (None, _) => {}
            }
        }
        set
    }

    /// Stable digest over the canonical requirement lines, independent of
    /// ordering, comments and name spelling
    pub fn fingerprint(&self) -> Digest {
        let mut lines: Vec<String> = self.requirements.iter().map(ToString::to_string).collect();
        lines.sort();
        let mut text = lines.join("\n");
        text.push('\n');
        Digest::sha256(text.as_bytes())
    }
}
