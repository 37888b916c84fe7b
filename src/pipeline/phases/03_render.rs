use crate::descriptor::dockerfile;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::phase_trait::WorkflowPhase;
use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

pub struct RenderPhase;

#[async_trait]
impl WorkflowPhase for RenderPhase {
    fn name(&self) -> &'static str {
        "RenderPhase"
    }

    async fn execute(&self, context: &mut PipelineContext) -> Result<()> {
        let rendered = dockerfile::render(&context.descriptor);
        debug!("Rendered Dockerfile:\n{}", rendered);
        context.dockerfile = Some(rendered);
        Ok(())
    }
}
