use crate::backend::BuildRequest;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::phase_trait::WorkflowPhase;
use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

/// Hand the descriptor to the backend and record the produced image
pub struct BuildPhase;

#[async_trait]
impl WorkflowPhase for BuildPhase {
    fn name(&self) -> &'static str {
        "BuildPhase"
    }

    async fn execute(&self, context: &mut PipelineContext) -> Result<()> {
        let build_context = context
            .build_context
            .take()
            .context("Build context was not collected")?;
        let dockerfile = context
            .dockerfile
            .clone()
            .context("Dockerfile was not rendered")?;

        let request = BuildRequest {
            descriptor: context.descriptor.clone(),
            context: build_context,
            dockerfile,
            tag: context.tag.clone(),
        };

        info!(backend = context.backend.name(), tag = %request.tag, "Building image");
        let image = context
            .backend
            .build(&request, context.progress.as_ref())
            .await?;

        context.build_context = Some(request.context);
        context.image = Some(image);
        Ok(())
    }
}
