//! Configuration for botbox
//!
//! Settings are layered, later layers winning:
//!
//! 1. built-in defaults,
//! 2. `botbox.toml` in the build context directory,
//! 3. `BOTBOX_*` environment variables,
//! 4. command-line flags (applied by the CLI handlers).
//!
//! # Environment Variables
//!
//! - `BOTBOX_BASE_IMAGE`: base image reference - default: "python:3.11-slim"
//! - `BOTBOX_UPGRADE_SYSTEM`: run `apt-get upgrade` (true|false) - default: "true"
//! - `BOTBOX_TOOLCHAIN`: comma-separated apt packages - default: "build-essential"
//! - `BOTBOX_APT_LISTS_PATH`: apt cache removed after install - default: "/var/lib/apt/lists/*"
//! - `BOTBOX_WORKDIR`: working directory in the image - default: "/app"
//! - `BOTBOX_MANIFEST`: requirements file, relative to the context - default: "requirements.txt"
//! - `BOTBOX_SOURCE`: source tree, relative to the context - default: "."
//! - `BOTBOX_ENTRYPOINT_MODULE`: module run with `python -m` - default: "app.main"
//! - `BOTBOX_INTERPRETER`: interpreter in the image - default: "python"
//! - `BOTBOX_UPGRADE_PIP`: upgrade pip before installing (true|false) - default: "true"
//! - `BOTBOX_TAG`: tag of the produced image - default: "botbox/app:latest"
//! - `BOTBOX_LAYOUT_DIR`: output directory of the layout backend - default: "botbox-out"
//! - `BOTBOX_REQUEST_TIMEOUT`: Docker API timeout in seconds - default: "120"
//! - `BOTBOX_LOG_LEVEL`: logging level - default: "info"

use crate::backend::BackendOptions;
use crate::context::{source_date_epoch, ContextSettings};
use crate::descriptor::{
    is_apt_lists_path, DescriptorSettings, APT_LISTS_DIR, DEFAULT_APT_LISTS, DEFAULT_BASE_IMAGE,
    DEFAULT_ENTRYPOINT_MODULE, DEFAULT_INTERPRETER, DEFAULT_MANIFEST, DEFAULT_SOURCE,
    DEFAULT_TOOLCHAIN, DEFAULT_WORKDIR,
};
use crate::image::ImageReference;
use crate::validation::is_module_path;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// File looked up in the build context directory
pub const CONFIG_FILE: &str = "botbox.toml";

const ENV_PREFIX: &str = "BOTBOX_";
const DEFAULT_TAG: &str = "botbox/app:latest";
const DEFAULT_LAYOUT_DIR: &str = "botbox-out";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
const MAX_REQUEST_TIMEOUT_SECS: u64 = 3600;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("Invalid configuration file {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    /// Failed to parse configuration value
    #[error("Failed to parse {field}: {error}")]
    ParseError { field: String, error: String },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BotboxConfig {
    pub base_image: String,

    pub upgrade_system: bool,

    /// Native packages installed with apt
    pub toolchain: Vec<String>,

    pub apt_lists_path: String,

    pub workdir: String,

    /// Requirements file, relative to the build context
    pub manifest: String,

    /// Source tree, relative to the build context
    pub source: String,

    pub entrypoint_module: String,

    pub interpreter: String,

    pub upgrade_pip: bool,

    /// Tag given to the built image
    pub tag: String,

    pub layout_dir: PathBuf,

    pub request_timeout_secs: u64,

    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Extra labels recorded in the image
    pub labels: BTreeMap<String, String>,
}

impl Default for BotboxConfig {
    fn default() -> Self {
        Self {
            base_image: DEFAULT_BASE_IMAGE.to_string(),
            upgrade_system: true,
            toolchain: vec![DEFAULT_TOOLCHAIN.to_string()],
            apt_lists_path: DEFAULT_APT_LISTS.to_string(),
            workdir: DEFAULT_WORKDIR.to_string(),
            manifest: DEFAULT_MANIFEST.to_string(),
            source: DEFAULT_SOURCE.to_string(),
            entrypoint_module: DEFAULT_ENTRYPOINT_MODULE.to_string(),
            interpreter: DEFAULT_INTERPRETER.to_string(),
            upgrade_pip: true,
            tag: DEFAULT_TAG.to_string(),
            layout_dir: PathBuf::from(DEFAULT_LAYOUT_DIR),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            labels: BTreeMap::new(),
        }
    }
}

fn parse_bool(field: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::ParseError {
            field: field.to_string(),
            error: format!("'{}' is not a boolean", other),
        }),
    }
}

impl BotboxConfig {
    /// Defaults, then `botbox.toml` from `context_dir` when present, then
    /// the environment
    pub fn load(context_dir: &Path) -> Result<Self, ConfigError> {
        let file = context_dir.join(CONFIG_FILE);
        let mut config = if file.is_file() {
            Self::from_file(&file)?
        } else {
            Self::default()
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Keys missing from the file keep their defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Malformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        debug!(path = %path.display(), "Loaded configuration file");
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_vars(|key| env::var(key).ok())
    }

    /// Overlay values from `lookup`, which receives full variable names
    pub fn apply_vars<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(v) = var("BASE_IMAGE") {
            self.base_image = v;
        }
        if let Some(v) = var("UPGRADE_SYSTEM") {
            self.upgrade_system = parse_bool("BOTBOX_UPGRADE_SYSTEM", &v)?;
        }
        if let Some(v) = var("TOOLCHAIN") {
            self.toolchain = v
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = var("APT_LISTS_PATH") {
            self.apt_lists_path = v;
        }
        if let Some(v) = var("WORKDIR") {
            self.workdir = v;
        }
        if let Some(v) = var("MANIFEST") {
            self.manifest = v;
        }
        if let Some(v) = var("SOURCE") {
            self.source = v;
        }
        if let Some(v) = var("ENTRYPOINT_MODULE") {
            self.entrypoint_module = v;
        }
        if let Some(v) = var("INTERPRETER") {
            self.interpreter = v;
        }
        if let Some(v) = var("UPGRADE_PIP") {
            self.upgrade_pip = parse_bool("BOTBOX_UPGRADE_PIP", &v)?;
        }
        if let Some(v) = var("TAG") {
            self.tag = v;
        }
        if let Some(v) = var("LAYOUT_DIR") {
            self.layout_dir = PathBuf::from(v);
        }
        if let Some(v) = var("REQUEST_TIMEOUT") {
            self.request_timeout_secs =
                v.trim().parse().map_err(|e: std::num::ParseIntError| {
                    ConfigError::ParseError {
                        field: "BOTBOX_REQUEST_TIMEOUT".to_string(),
                        error: e.to_string(),
                    }
                })?;
        }
        if let Some(v) = var("LOG_LEVEL") {
            self.log_level = v.to_lowercase();
        }
        Ok(())
    }

    /// Validates the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` naming the first offending key
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::ValidationFailed(msg));

        if let Err(e) = ImageReference::parse(&self.base_image) {
            return invalid(format!("base_image: {}", e));
        }
        if let Err(e) = ImageReference::parse(&self.tag) {
            return invalid(format!("tag: {}", e));
        }
        if self.toolchain.iter().any(|p| p.trim().is_empty()) {
            return invalid("toolchain entries cannot be empty".to_string());
        }
        if self.apt_lists_path.trim().is_empty() {
            return invalid("apt_lists_path cannot be empty".to_string());
        }
        if !is_apt_lists_path(&self.apt_lists_path) {
            return invalid(format!(
                "apt_lists_path must be under {}, got '{}'",
                APT_LISTS_DIR, self.apt_lists_path
            ));
        }
        if !self.workdir.starts_with('/') {
            return invalid(format!("workdir must be absolute, got '{}'", self.workdir));
        }
        if self.manifest.trim().is_empty() {
            return invalid("manifest cannot be empty".to_string());
        }
        if self.source.trim().is_empty() {
            return invalid("source cannot be empty".to_string());
        }
        if !is_module_path(&self.entrypoint_module) {
            return invalid(format!(
                "entrypoint_module '{}' is not a dotted module path",
                self.entrypoint_module
            ));
        }
        if self.interpreter.trim().is_empty() {
            return invalid("interpreter cannot be empty".to_string());
        }
        if self.request_timeout_secs == 0 {
            return invalid("Request timeout must be at least 1 second".to_string());
        }
        if self.request_timeout_secs > MAX_REQUEST_TIMEOUT_SECS {
            return invalid(format!(
                "Request timeout cannot exceed {} seconds",
                MAX_REQUEST_TIMEOUT_SECS
            ));
        }
        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return invalid(format!(
                    "Invalid log level: {}. Valid options: trace, debug, info, warn, error",
                    self.log_level
                ))
            }
        }
        Ok(())
    }

    pub fn tag_reference(&self) -> Result<ImageReference, ConfigError> {
        ImageReference::parse(&self.tag).map_err(|e| ConfigError::ParseError {
            field: "tag".to_string(),
            error: e.to_string(),
        })
    }

    pub fn to_descriptor_settings(&self) -> Result<DescriptorSettings, ConfigError> {
        let base_image =
            ImageReference::parse(&self.base_image).map_err(|e| ConfigError::ParseError {
                field: "base_image".to_string(),
                error: e.to_string(),
            })?;
        Ok(DescriptorSettings {
            base_image,
            upgrade_system: self.upgrade_system,
            toolchain: self.toolchain.clone(),
            apt_lists_path: self.apt_lists_path.clone(),
            workdir: self.workdir.clone(),
            manifest: self.manifest.clone(),
            upgrade_pip: self.upgrade_pip,
            source: self.source.clone(),
            interpreter: self.interpreter.clone(),
            entrypoint_module: self.entrypoint_module.clone(),
            labels: self.labels.clone(),
        })
    }

    pub fn context_settings(&self) -> ContextSettings {
        ContextSettings {
            manifest: self.manifest.clone(),
            source: self.source.clone(),
            entry_module: self.entrypoint_module.clone(),
            mtime: source_date_epoch(),
        }
    }

    pub fn backend_options(&self) -> BackendOptions {
        BackendOptions {
            layout_dir: self.layout_dir.clone(),
            interpreter: self.interpreter.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    /// The command the image is expected to start
    pub fn expected_command(&self) -> Vec<String> {
        vec![
            self.interpreter.clone(),
            "-m".to_string(),
            self.entrypoint_module.clone(),
        ]
    }

    /// Converts configuration to a display map for output formatting
    pub fn to_display_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();

        map.insert("base_image".to_string(), self.base_image.clone());
        map.insert("upgrade_system".to_string(), self.upgrade_system.to_string());
        map.insert("toolchain".to_string(), self.toolchain.join(","));
        map.insert("apt_lists_path".to_string(), self.apt_lists_path.clone());
        map.insert("workdir".to_string(), self.workdir.clone());
        map.insert("manifest".to_string(), self.manifest.clone());
        map.insert("source".to_string(), self.source.clone());
        map.insert(
            "entrypoint_module".to_string(),
            self.entrypoint_module.clone(),
        );
        map.insert("interpreter".to_string(), self.interpreter.clone());
        map.insert("upgrade_pip".to_string(), self.upgrade_pip.to_string());
        map.insert("tag".to_string(), self.tag.clone());
        map.insert(
            "layout_dir".to_string(),
            self.layout_dir.display().to_string(),
        );
        map.insert(
            "request_timeout_secs".to_string(),
            self.request_timeout_secs.to_string(),
        );
        map.insert("log_level".to_string(), self.log_level.clone());
        for (key, value) in &self.labels {
            map.insert(format!("labels.{}", key), value.clone());
        }

        map
    }
}

impl fmt::Display for BotboxConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "botbox configuration:")?;
        for (key, value) in self.to_display_map() {
            writeln!(f, "  {}: {}", key, value)?;
        }
        Ok(())
    }
}
