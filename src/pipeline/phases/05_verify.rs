use crate::pipeline::context::PipelineContext;
use crate::pipeline::phase_trait::WorkflowPhase;
use crate::verify::verify_image;
use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{info, warn};

/// Check the built image against the declared entrypoint and sources
pub struct VerifyPhase;

#[async_trait]
impl WorkflowPhase for VerifyPhase {
    fn name(&self) -> &'static str {
        "VerifyPhase"
    }

    async fn execute(&self, context: &mut PipelineContext) -> Result<()> {
        let Some(options) = context.verify.clone() else {
            return Ok(());
        };
        let image = context
            .image
            .as_ref()
            .context("No image to verify")?
            .reference
            .clone();

        let report = verify_image(context.backend.as_ref(), &image, &options).await?;
        for check in &report.checks {
            if check.passed {
                info!("{}", check);
            } else {
                warn!("{}", check);
            }
        }

        let passed = report.passed();
        let failures: Vec<String> = report.failures().map(ToString::to_string).collect();
        context.report = Some(report);
        if !passed {
            anyhow::bail!("Verification failed: {}", failures.join("; "));
        }
        Ok(())
    }
}
