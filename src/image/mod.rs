//! Image-side data: references, digests, runtime config and the record of a
//! finished build

mod config;
mod digest;
mod reference;

pub use config::ImageConfig;
pub use digest::Digest;
pub use reference::{ImageReference, DEFAULT_TAG};

use crate::descriptor::StageKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("Invalid image reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("Invalid digest '{0}' (expected 'algorithm:hex')")]
    InvalidDigest(String),
}

/// A filesystem layer produced by one stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerRecord {
    pub digest: Digest,
    pub size: u64,
    pub stage: StageKind,
}

/// One line of image history; instructions that produced no layer are
/// recorded with `empty_layer`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub created_by: String,
    #[serde(default)]
    pub empty_layer: bool,
    /// `None` for metadata such as labels that belongs to no stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<StageKind>,
}

/// Output artifact of a build: immutable once returned
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltImage {
    pub reference: ImageReference,
    /// Digest of the image config, which identifies the image
    pub id: Digest,
    pub base: ImageReference,
    pub config: ImageConfig,
    pub layers: Vec<LayerRecord>,
    pub history: Vec<HistoryEntry>,
    /// Backend that produced the image
    pub backend: String,
    /// Layout directory, for images that live on disk rather than in a daemon
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<PathBuf>,
}

impl BuiltImage {
    pub fn layers_for(&self, stage: StageKind) -> impl Iterator<Item = &LayerRecord> {
        self.layers.iter().filter(move |l| l.stage == stage)
    }

    pub fn total_size(&self) -> u64 {
        self.layers.iter().map(|l| l.size).sum()
    }
}
