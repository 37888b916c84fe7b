//! Build backends
//!
//! A backend executes a [`BuildDescriptor`] stage by stage and can answer
//! questions about the images it produced. Execution is strictly
//! sequential and all-or-nothing: the first failing stage aborts the build
//! and no image is recorded.

mod docker;
mod layout;
mod oci;

pub use docker::DockerBackend;
pub use layout::LayoutBackend;

use crate::context::BuildContext;
use crate::descriptor::{BuildDescriptor, StageKind};
use crate::image::{BuiltImage, ImageConfig, ImageReference};
use crate::manifest::PackageSet;
use crate::progress::ProgressHandler;
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Label holding the pinned package set recorded at dependency install
pub const PACKAGES_LABEL: &str = "org.botbox.packages";
/// Label holding the manifest fingerprint
pub const MANIFEST_LABEL: &str = "org.botbox.manifest";
pub const BASE_NAME_LABEL: &str = "org.opencontainers.image.base.name";

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Stage {stage} failed: {reason}")]
    StageFailed { stage: StageKind, reason: String },

    #[error("Stage {stage} failed: '{path}' not found in build context")]
    MissingInput { stage: StageKind, path: String },

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

impl BuildError {
    /// Stage the failure is attributed to, if any
    pub fn stage(&self) -> Option<StageKind> {
        match self {
            BuildError::StageFailed { stage, .. } | BuildError::MissingInput { stage, .. } => {
                Some(*stage)
            }
            _ => None,
        }
    }

    pub(crate) fn stage_failed(stage: StageKind, reason: impl fmt::Display) -> Self {
        BuildError::StageFailed {
            stage,
            reason: reason.to_string(),
        }
    }
}

/// Everything a backend needs to run one build
pub struct BuildRequest {
    pub descriptor: BuildDescriptor,
    pub context: BuildContext,
    /// Rendered Dockerfile for `descriptor`
    pub dockerfile: String,
    pub tag: ImageReference,
}

#[async_trait]
pub trait BuildBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn build(
        &self,
        request: &BuildRequest,
        progress: &dyn ProgressHandler,
    ) -> Result<BuiltImage, BuildError>;

    async fn inspect(&self, image: &ImageReference) -> Result<ImageConfig, BuildError>;

    /// Distributions installed in the image's Python environment
    async fn installed_packages(&self, image: &ImageReference) -> Result<PackageSet, BuildError>;

    /// Whether `path` exists in the image filesystem; relative paths are
    /// resolved against the image's working directory
    async fn contains_path(&self, image: &ImageReference, path: &str) -> Result<bool, BuildError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    Docker,
    Layout,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Docker => write!(f, "docker"),
            BackendKind::Layout => write!(f, "layout"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "docker" => Ok(BackendKind::Docker),
            "layout" | "oci" => Ok(BackendKind::Layout),
            other => Err(format!("unknown backend '{}' (expected docker or layout)", other)),
        }
    }
}

/// Settings shared by backend constructors
#[derive(Debug, Clone)]
pub struct BackendOptions {
    pub layout_dir: PathBuf,
    pub interpreter: String,
    pub request_timeout: Duration,
}

pub fn create_backend(
    kind: BackendKind,
    options: &BackendOptions,
) -> Result<Box<dyn BuildBackend>, BuildError> {
    match kind {
        BackendKind::Docker => Ok(Box::new(DockerBackend::connect(
            &options.interpreter,
            options.request_timeout,
        )?)),
        BackendKind::Layout => Ok(Box::new(LayoutBackend::new(options.layout_dir.clone()))),
    }
}

/// Resolve `path` against the image working directory
pub(crate) fn resolve_in_image(workdir: Option<&str>, path: &str) -> String {
    if path.starts_with('/') {
        return path.to_string();
    }
    let base = workdir.unwrap_or("/").trim_end_matches('/');
    let rel = path.trim_start_matches("./");
    if rel.is_empty() || rel == "." {
        if base.is_empty() {
            "/".to_string()
        } else {
            base.to_string()
        }
    } else {
        format!("{}/{}", base, rel)
    }
}
