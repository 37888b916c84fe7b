use crate::pipeline::context::PipelineContext;
use crate::pipeline::phase_trait::WorkflowPhase;
use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

/// Reject descriptors that break the stage contracts before any work runs
pub struct ValidatePhase;

#[async_trait]
impl WorkflowPhase for ValidatePhase {
    fn name(&self) -> &'static str {
        "ValidatePhase"
    }

    async fn execute(&self, context: &mut PipelineContext) -> Result<()> {
        context.validator.validate(&context.descriptor)?;
        debug!(stages = context.descriptor.stages().len(), "Descriptor is valid");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LayoutBackend;
    use crate::context::ContextSettings;
    use crate::descriptor::{BuildDescriptor, DescriptorSettings};
    use crate::image::ImageReference;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn pipeline(descriptor: BuildDescriptor) -> PipelineContext {
        PipelineContext::new(
            PathBuf::from("/tmp/project"),
            descriptor,
            ContextSettings::default(),
            ImageReference::parse("bot").unwrap(),
            Arc::new(LayoutBackend::new(PathBuf::from("/tmp/out"))),
        )
    }

    #[tokio::test]
    async fn test_standard_descriptor_passes() {
        let mut context = pipeline(BuildDescriptor::standard(&DescriptorSettings::default()));
        assert!(ValidatePhase.execute(&mut context).await.is_ok());
    }

    #[tokio::test]
    async fn test_reordered_descriptor_fails() {
        let standard = BuildDescriptor::standard(&DescriptorSettings::default());
        let mut stages = standard.stages().to_vec();
        stages.swap(5, 6);

        let mut context = pipeline(BuildDescriptor::new(stages));
        let err = ValidatePhase.execute(&mut context).await.unwrap_err();
        assert!(err.to_string().contains("[StageOrder]"));
    }
}
