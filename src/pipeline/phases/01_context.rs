use crate::context::BuildContext;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::phase_trait::WorkflowPhase;
use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{info, warn};

/// Snapshot the build context directory
pub struct ContextPhase;

#[async_trait]
impl WorkflowPhase for ContextPhase {
    fn name(&self) -> &'static str {
        "ContextPhase"
    }

    async fn execute(&self, context: &mut PipelineContext) -> Result<()> {
        let build_context = BuildContext::collect(&context.root, &context.context_settings)
            .with_context(|| format!("Failed to collect build context {}", context.root.display()))?;

        // Missing inputs only fail the stage that needs them
        if !build_context.has_manifest() {
            let message = format!(
                "Dependency manifest '{}' not found in build context",
                build_context.manifest_path()
            );
            warn!("{}", message);
            context.warnings.push(message);
        }
        if !build_context.has_entry_module() {
            let message = format!(
                "Entry module '{}' not found in build context",
                context.context_settings.entry_module
            );
            warn!("{}", message);
            context.warnings.push(message);
        }

        info!(
            files = build_context.files().count(),
            bytes = build_context.total_size(),
            "Build context collected"
        );
        context.build_context = Some(build_context);
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
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn pipeline(root: &Path) -> PipelineContext {
        PipelineContext::new(
            root.to_path_buf(),
            BuildDescriptor::standard(&DescriptorSettings::default()),
            ContextSettings::default(),
            ImageReference::parse("bot").unwrap(),
            Arc::new(LayoutBackend::new(root.join("out"))),
        )
    }

    #[tokio::test]
    async fn test_collects_context() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("requirements.txt"), "").unwrap();
        fs::create_dir_all(dir.path().join("app")).unwrap();
        fs::write(dir.path().join("app/main.py"), "").unwrap();

        let mut context = pipeline(dir.path());
        ContextPhase.execute(&mut context).await.unwrap();

        assert!(context.build_context.is_some());
        assert!(context.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_missing_inputs_are_warnings() {
        let dir = TempDir::new().unwrap();
        let mut context = pipeline(dir.path());
        ContextPhase.execute(&mut context).await.unwrap();

        assert_eq!(context.warnings.len(), 2);
        assert!(context.warnings[0].contains("requirements.txt"));
        assert!(context.warnings[1].contains("app.main"));
    }

    #[tokio::test]
    async fn test_missing_root_fails() {
        let dir = TempDir::new().unwrap();
        let mut context = pipeline(&dir.path().join("nope"));
        assert!(ContextPhase.execute(&mut context).await.is_err());
    }
}
