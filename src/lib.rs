//! botbox - container image builder for Python bot services
//!
//! A bot image is always produced by the same nine stages: base image,
//! system upgrade, toolchain install, apt cache cleanup, working directory,
//! dependency manifest copy, dependency install, source copy and the
//! `python -m app.main` entrypoint. Copying the manifest on its own before
//! the source keeps the dependency layer cached across source-only edits.
//!
//! # Core Concepts
//!
//! - **Descriptor**: the ordered stage list, rendered to a Dockerfile or
//!   recovered from one
//! - **Build context**: the snapshot of the project directory that COPY
//!   stages read from, with `.dockerignore` applied
//! - **Backends**: the Docker daemon, or an OCI image layout written to disk
//! - **Verification**: checks run against a built image
//!
//! # Example Usage
//!
//! ```no_run
//! use botbox::backend::LayoutBackend;
//! use botbox::context::ContextSettings;
//! use botbox::descriptor::{BuildDescriptor, DescriptorSettings};
//! use botbox::image::ImageReference;
//! use botbox::pipeline::{BuildOrchestrator, PipelineContext};
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let mut context = PipelineContext::new(
//!     PathBuf::from("./weather-bot"),
//!     BuildDescriptor::standard(&DescriptorSettings::default()),
//!     ContextSettings::default(),
//!     ImageReference::parse("weather-bot:1.4")?,
//!     Arc::new(LayoutBackend::new(PathBuf::from("./out"))),
//! );
//!
//! let image = BuildOrchestrator::new().execute(&mut context).await?;
//! println!("Built {} ({})", image.reference, image.id.short());
//! # Ok(())
//! # }
//! ```
//!
//! # Project Structure
//!
//! - [`descriptor`]: stages, Dockerfile rendering and parsing
//! - [`context`]: build context collection and archiving
//! - [`manifest`]: requirements files and installed package sets
//! - [`validation`]: rules every build plan must satisfy
//! - [`pipeline`]: the phased build workflow
//! - [`backend`]: Docker and OCI layout backends
//! - [`verify`]: post-build checks

pub mod backend;
pub mod cli;
pub mod config;
pub mod context;
pub mod descriptor;
pub mod fs;
pub mod image;
pub mod manifest;
pub mod pipeline;
pub mod progress;
pub mod util;
pub mod validation;
pub mod verify;

pub use backend::{create_backend, BackendKind, BuildBackend, BuildError, BuildRequest};
pub use config::{BotboxConfig, ConfigError};
pub use context::{BuildContext, ContextSettings};
pub use descriptor::{BuildDescriptor, DescriptorSettings, Stage, StageKind, StageSpec};
pub use image::{BuiltImage, Digest, ImageConfig, ImageReference};
pub use manifest::{DependencyManifest, PackageSet};
pub use pipeline::{BuildOrchestrator, PipelineContext};
pub use util::{init_default, init_from_env, init_logging, LoggingConfig};
pub use validation::Validator;
pub use verify::{VerificationReport, VerifyOptions};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
