use super::context::PipelineContext;
use super::phase_trait::WorkflowPhase;
use super::phases::{BuildPhase, ContextPhase, RenderPhase, ValidatePhase, VerifyPhase};
use crate::backend::BuildError;
use crate::image::BuiltImage;
use crate::progress::ProgressEvent;
use anyhow::{Context, Result};
use std::time::Instant;
use tracing::{debug, error, info};

/// Runs the build phases in order, aborting on the first failure
#[derive(Default)]
pub struct BuildOrchestrator;

impl BuildOrchestrator {
    pub fn new() -> Self {
        Self
    }

    fn phases(context: &PipelineContext) -> Vec<Box<dyn WorkflowPhase>> {
        let mut phases: Vec<Box<dyn WorkflowPhase>> = vec![
            Box::new(ContextPhase),
            Box::new(ValidatePhase),
            Box::new(RenderPhase),
            Box::new(BuildPhase),
        ];
        if context.verify.is_some() {
            phases.push(Box::new(VerifyPhase));
        }
        phases
    }

    pub async fn execute(&self, context: &mut PipelineContext) -> Result<BuiltImage> {
        let start = Instant::now();
        info!("Starting build for: {}", context.root.display());

        let progress = context.progress.clone();
        progress.on_progress(&ProgressEvent::Started {
            context: context.root.display().to_string(),
        });

        for phase in Self::phases(context) {
            let phase_name = phase.name();
            debug!("Phase: {}", phase_name);
            progress.on_progress(&ProgressEvent::PhaseStarted {
                phase: phase_name.to_string(),
            });

            let phase_start = Instant::now();
            if let Err(e) = phase
                .execute(context)
                .await
                .with_context(|| format!("Phase {} failed", phase_name))
            {
                let stage = e
                    .chain()
                    .find_map(|cause| cause.downcast_ref::<BuildError>())
                    .and_then(BuildError::stage);
                error!(phase = phase_name, error = %format!("{:#}", e), "Build aborted");
                progress.on_progress(&ProgressEvent::Failed {
                    stage,
                    error: format!("{:#}", e),
                });
                return Err(e);
            }

            progress.on_progress(&ProgressEvent::PhaseComplete {
                phase: phase_name.to_string(),
                duration: phase_start.elapsed(),
            });
        }

        let image = context
            .image
            .clone()
            .context("Pipeline finished without producing an image")?;

        info!(
            "Build complete: {} ({})",
            image.reference,
            image.id.short()
        );
        progress.on_progress(&ProgressEvent::Completed {
            image: image.reference.to_string(),
            total_time: start.elapsed(),
        });

        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LayoutBackend;
    use crate::context::ContextSettings;
    use crate::descriptor::{BuildDescriptor, DescriptorSettings, StageKind};
    use crate::image::ImageReference;
    use crate::progress::ProgressHandler;
    use crate::verify::VerifyOptions;
    use std::fs;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        phases: Mutex<Vec<String>>,
        failed: Mutex<Option<Option<StageKind>>>,
    }

    impl ProgressHandler for Recorder {
        fn on_progress(&self, event: &ProgressEvent) {
            match event {
                ProgressEvent::PhaseStarted { phase } => {
                    self.phases.lock().unwrap().push(phase.clone())
                }
                ProgressEvent::Failed { stage, .. } => *self.failed.lock().unwrap() = Some(*stage),
                _ => {}
            }
        }
    }

    fn pipeline(project: &Path, out: &Path, recorder: Arc<Recorder>) -> PipelineContext {
        PipelineContext::new(
            project.to_path_buf(),
            BuildDescriptor::standard(&DescriptorSettings::default()),
            ContextSettings {
                mtime: 0,
                ..Default::default()
            },
            ImageReference::parse("bot:test").unwrap(),
            Arc::new(LayoutBackend::new(out.to_path_buf())),
        )
        .with_progress(recorder)
    }

    fn project() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("requirements.txt"), "aiogram==3.4.1\n").unwrap();
        fs::create_dir_all(dir.path().join("app")).unwrap();
        fs::write(dir.path().join("app/main.py"), "").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_phases_run_in_order() {
        let project = project();
        let out = TempDir::new().unwrap();
        let recorder = Arc::new(Recorder::default());
        let mut context = pipeline(project.path(), out.path(), recorder.clone()).with_verify(
            VerifyOptions {
                expected_command: vec!["python".into(), "-m".into(), "app.main".into()],
                entry_module: "app.main".into(),
                against: None,
                expected_packages: None,
            },
        );

        let image = BuildOrchestrator::new().execute(&mut context).await.unwrap();

        assert_eq!(image.reference.to_string(), "bot:test");
        assert_eq!(
            *recorder.phases.lock().unwrap(),
            vec!["ContextPhase", "ValidatePhase", "RenderPhase", "BuildPhase", "VerifyPhase"]
        );
        assert!(context.report.unwrap().passed());
    }

    #[tokio::test]
    async fn test_failure_names_phase_and_stage() {
        let project = project();
        fs::remove_file(project.path().join("requirements.txt")).unwrap();
        let out = TempDir::new().unwrap();
        let recorder = Arc::new(Recorder::default());
        let mut context = pipeline(project.path(), out.path(), recorder.clone());

        let err = BuildOrchestrator::new()
            .execute(&mut context)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("Phase BuildPhase failed"));
        assert_eq!(
            *recorder.failed.lock().unwrap(),
            Some(Some(StageKind::ManifestCopy))
        );
        assert!(context.image.is_none());
    }
}
