//! Pipeline context: long-lived dependencies plus the state each phase
//! leaves for the next

use std::path::PathBuf;
use std::sync::Arc;

use crate::backend::BuildBackend;
use crate::context::{BuildContext, ContextSettings};
use crate::descriptor::BuildDescriptor;
use crate::image::{BuiltImage, ImageReference};
use crate::progress::{NoOpHandler, ProgressHandler};
use crate::validation::Validator;
use crate::verify::{VerificationReport, VerifyOptions};

pub struct PipelineContext {
    /// Build context directory
    pub root: PathBuf,

    pub descriptor: BuildDescriptor,

    pub context_settings: ContextSettings,

    /// Tag given to the produced image
    pub tag: ImageReference,

    pub validator: Arc<Validator>,

    pub backend: Arc<dyn BuildBackend>,

    pub progress: Arc<dyn ProgressHandler>,

    /// Run the verify phase after a successful build
    pub verify: Option<VerifyOptions>,

    pub build_context: Option<BuildContext>,
    pub dockerfile: Option<String>,
    pub image: Option<BuiltImage>,
    pub report: Option<VerificationReport>,

    /// Problems that do not stop the build
    pub warnings: Vec<String>,
}

impl PipelineContext {
    pub fn new(
        root: PathBuf,
        descriptor: BuildDescriptor,
        context_settings: ContextSettings,
        tag: ImageReference,
        backend: Arc<dyn BuildBackend>,
    ) -> Self {
        Self {
            root,
            descriptor,
            context_settings,
            tag,
            validator: Arc::new(Validator::new()),
            backend,
            progress: Arc::new(NoOpHandler),
            verify: None,
            build_context: None,
            dockerfile: None,
            image: None,
            report: None,
            warnings: Vec::new(),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressHandler>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_validator(mut self, validator: Arc<Validator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_verify(mut self, options: VerifyOptions) -> Self {
        self.verify = Some(options);
        self
    }
}
