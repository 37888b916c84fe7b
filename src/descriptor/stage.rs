use serde::{Deserialize, Serialize};
use std::fmt;

use crate::image::ImageReference;

/// The nine build stages, in the only order they may run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    BaseImage,
    SystemUpgrade,
    ToolchainInstall,
    CacheCleanup,
    WorkingDirectory,
    ManifestCopy,
    DependencyInstall,
    SourceCopy,
    Entrypoint,
}

impl StageKind {
    pub const ALL: [StageKind; 9] = [
        StageKind::BaseImage,
        StageKind::SystemUpgrade,
        StageKind::ToolchainInstall,
        StageKind::CacheCleanup,
        StageKind::WorkingDirectory,
        StageKind::ManifestCopy,
        StageKind::DependencyInstall,
        StageKind::SourceCopy,
        StageKind::Entrypoint,
    ];

    /// 1-based position in the build
    pub fn index(&self) -> usize {
        *self as usize + 1
    }

    pub fn from_index(index: usize) -> Option<Self> {
        index
            .checked_sub(1)
            .and_then(|i| Self::ALL.get(i))
            .copied()
    }

    pub fn name(&self) -> &'static str {
        match self {
            StageKind::BaseImage => "base image",
            StageKind::SystemUpgrade => "system upgrade",
            StageKind::ToolchainInstall => "toolchain install",
            StageKind::CacheCleanup => "cache cleanup",
            StageKind::WorkingDirectory => "working directory",
            StageKind::ManifestCopy => "manifest copy",
            StageKind::DependencyInstall => "dependency install",
            StageKind::SourceCopy => "source copy",
            StageKind::Entrypoint => "entrypoint",
        }
    }

    /// Stages whose work runs as a shell command inside the image
    pub fn is_run(&self) -> bool {
        matches!(
            self,
            StageKind::SystemUpgrade
                | StageKind::ToolchainInstall
                | StageKind::CacheCleanup
                | StageKind::DependencyInstall
        )
    }

    /// Stages that share one `RUN` so the cleanup shrinks the same layer
    pub fn is_apt(&self) -> bool {
        matches!(
            self,
            StageKind::SystemUpgrade | StageKind::ToolchainInstall | StageKind::CacheCleanup
        )
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} {}", self.index(), Self::ALL.len(), self.name())
    }
}

/// Inputs of a single stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageSpec {
    Image {
        image: ImageReference,
    },
    /// Refresh the package index, optionally upgrading installed packages
    Refresh {
        upgrade: bool,
    },
    Packages {
        packages: Vec<String>,
    },
    Paths {
        paths: Vec<String>,
    },
    Path {
        path: String,
    },
    Copy {
        src: String,
        dest: String,
    },
    Install {
        manifest: String,
        upgrade_pip: bool,
        no_cache: bool,
    },
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        /// Shell form (`CMD python -m app.main`) rather than exec form
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        shell: bool,
        /// Declared with `ENTRYPOINT` instead of `CMD`
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        entrypoint: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub kind: StageKind,
    pub spec: StageSpec,
}

impl Stage {
    pub fn new(kind: StageKind, spec: StageSpec) -> Self {
        Self { kind, spec }
    }

    /// Path, relative to the working directory, that a COPY stage writes
    /// for a single-file source
    pub fn copied_path(&self) -> Option<String> {
        match &self.spec {
            StageSpec::Copy { src, dest } => {
                let file = src.rsplit('/').next().unwrap_or(src);
                if dest == "." || dest == "./" {
                    Some(file.to_string())
                } else if let Some(dir) = dest.strip_suffix('/') {
                    Some(format!("{}/{}", dir.trim_start_matches("./"), file))
                } else {
                    Some(dest.trim_start_matches("./").to_string())
                }
            }
            _ => None,
        }
    }

    pub fn summary(&self) -> String {
        match &self.spec {
            StageSpec::Image { image } => image.to_string(),
            StageSpec::Refresh { upgrade: true } => "update + upgrade".to_string(),
            StageSpec::Refresh { upgrade: false } => "update".to_string(),
            StageSpec::Packages { packages } => packages.join(" "),
            StageSpec::Paths { paths } => paths.join(" "),
            StageSpec::Path { path } => path.clone(),
            StageSpec::Copy { src, dest } => format!("{} -> {}", src, dest),
            StageSpec::Install { manifest, .. } => format!("-r {}", manifest),
            StageSpec::Command { program, args, .. } => {
                std::iter::once(program.as_str())
                    .chain(args.iter().map(String::as_str))
                    .collect::<Vec<_>>()
                    .join(" ")
            }
        }
    }
}
