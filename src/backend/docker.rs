//! Docker Engine backend
//!
//! Sends the context with the rendered Dockerfile to the daemon's classic
//! builder and follows its `Step N/M` output to attribute progress and
//! failures to stages. Post-build queries run in throwaway containers.

use super::{resolve_in_image, BuildBackend, BuildError, BuildRequest};
use crate::descriptor::{Instruction, StageKind};
use crate::image::{BuiltImage, Digest, HistoryEntry, ImageConfig, ImageReference, LayerRecord};
use crate::manifest::PackageSet;
use crate::progress::{ProgressEvent, ProgressHandler};
use async_trait::async_trait;
use bollard::container::{
    Config, LogsOptions, RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::BuildImageOptions;
use bollard::models::ImageConfig as DockerImageConfig;
use bollard::Docker;
use bytes::Bytes;
use futures_util::StreamExt;
use regex::Regex;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

fn step_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^Step (\d+)/(\d+) : ").expect("valid regex"))
}

pub struct DockerBackend {
    docker: Docker,
    interpreter: String,
}

impl DockerBackend {
    /// Client for the local daemon; no request is made until first use
    pub fn connect(interpreter: &str, timeout: Duration) -> Result<Self, BuildError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| BuildError::Unavailable(format!("Failed to connect to Docker: {}", e)))?
            .with_timeout(timeout);
        Ok(Self {
            docker,
            interpreter: interpreter.to_string(),
        })
    }

    /// Whether the daemon answers
    pub async fn ping(&self) -> bool {
        self.docker.ping().await.is_ok()
    }

    async fn inspect_raw(
        &self,
        image: &ImageReference,
    ) -> Result<bollard::models::ImageInspect, BuildError> {
        self.docker
            .inspect_image(&image.to_string())
            .await
            .map_err(|e| match e {
                bollard::errors::Error::DockerResponseServerError {
                    status_code: 404, ..
                } => BuildError::Backend(format!("Image {} not found", image)),
                other => BuildError::Backend(format!("Failed to inspect {}: {}", image, other)),
            })
    }

    /// Run `argv` in a fresh container from `image`; returns the exit code
    /// and combined output. The container is always removed.
    async fn run_in_image(
        &self,
        image: &ImageReference,
        argv: Vec<String>,
    ) -> Result<(i64, String), BuildError> {
        let config = Config {
            image: Some(image.to_string()),
            entrypoint: Some(argv.clone()),
            cmd: None,
            ..Default::default()
        };
        let container = self
            .docker
            .create_container::<String, String>(None, config)
            .await
            .map_err(|e| BuildError::Backend(format!("Failed to create container: {}", e)))?;

        let result = self.run_container(&container.id).await;

        if let Err(e) = self
            .docker
            .remove_container(
                &container.id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            warn!(container = %container.id, error = %e, "Failed to remove container");
        }

        debug!(image = %image, command = ?argv, result = ?result.as_ref().map(|r| r.0), "Ran command in image");
        result
    }

    async fn run_container(&self, id: &str) -> Result<(i64, String), BuildError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| BuildError::Backend(format!("Failed to start container: {}", e)))?;

        let code = match self
            .docker
            .wait_container(id, None::<WaitContainerOptions<String>>)
            .next()
            .await
        {
            Some(Ok(response)) => response.status_code,
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => code,
            Some(Err(e)) => {
                return Err(BuildError::Backend(format!(
                    "Failed to wait for container: {}",
                    e
                )))
            }
            None => return Err(BuildError::Backend("Container wait returned nothing".into())),
        };

        let logs_options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut log_stream = self.docker.logs(id, Some(logs_options));
        let mut output = String::new();
        while let Some(log) = log_stream.next().await {
            if let Ok(log_output) = log {
                output.push_str(&log_output.to_string());
            }
        }

        Ok((code, output))
    }
}

/// Follows classic builder output and maps steps back onto stages
struct StepTracker<'a> {
    instructions: &'a [(Vec<StageKind>, Instruction)],
    current: Option<(usize, Instant)>,
}

impl<'a> StepTracker<'a> {
    fn new(instructions: &'a [(Vec<StageKind>, Instruction)]) -> Self {
        Self {
            instructions,
            current: None,
        }
    }

    fn current_kinds(&self) -> &[StageKind] {
        self.current
            .and_then(|(step, _)| self.instructions.get(step))
            .map(|(kinds, _)| kinds.as_slice())
            .unwrap_or(&[])
    }

    fn line(&mut self, line: &str, progress: &dyn ProgressHandler) {
        let line = line.trim_end();
        if line.is_empty() {
            return;
        }

        if let Some(caps) = step_re().captures(line) {
            let step: usize = caps[1].parse().unwrap_or(0);
            self.finish_step(progress);
            let index = step.saturating_sub(1);
            self.current = Some((index, Instant::now()));
            for kind in self.current_kinds() {
                progress.on_progress(&ProgressEvent::StageStarted { stage: *kind });
            }
            return;
        }

        match self.current_kinds().first() {
            Some(stage) => progress.on_progress(&ProgressEvent::StageLog {
                stage: *stage,
                line: line.to_string(),
            }),
            None => debug!(line, "Builder output"),
        }
    }

    fn finish_step(&mut self, progress: &dyn ProgressHandler) {
        if let Some((step, started)) = self.current.take() {
            if let Some((kinds, _)) = self.instructions.get(step) {
                for kind in kinds {
                    progress.on_progress(&ProgressEvent::StageComplete {
                        stage: *kind,
                        duration: started.elapsed(),
                    });
                }
            }
        }
    }

    /// Attribute a builder error to the running step
    fn fail(&self, reason: &str) -> BuildError {
        let Some((step, _)) = self.current else {
            return BuildError::Backend(reason.to_string());
        };
        let Some((kinds, instruction)) = self.instructions.get(step) else {
            return BuildError::Backend(reason.to_string());
        };
        let Some(stage) = kinds.first().copied() else {
            return BuildError::Backend(reason.to_string());
        };

        let lower = reason.to_lowercase();
        if let Instruction::Copy { sources, .. } = instruction {
            if lower.contains("not found") || lower.contains("no such file") {
                return BuildError::MissingInput {
                    stage,
                    path: sources.first().cloned().unwrap_or_default(),
                };
            }
        }
        BuildError::stage_failed(stage, reason.trim())
    }
}

fn image_config(config: Option<DockerImageConfig>) -> ImageConfig {
    let Some(config) = config else {
        return ImageConfig::default();
    };
    ImageConfig {
        entrypoint: config.entrypoint.unwrap_or_default(),
        cmd: config.cmd.unwrap_or_default(),
        working_dir: config.working_dir.filter(|w| !w.is_empty()),
        env: config.env.unwrap_or_default(),
        labels: config.labels.unwrap_or_default().into_iter().collect(),
    }
}

/// The trailing layers belong to the RUN and COPY steps in order; anything
/// before them came with the base image
fn attribute_layers(
    instructions: &[(Vec<StageKind>, Instruction)],
    diff_ids: &[String],
) -> Result<Vec<LayerRecord>, BuildError> {
    let producing: Vec<StageKind> = instructions
        .iter()
        .filter(|(_, i)| matches!(i, Instruction::Run { .. } | Instruction::Copy { .. }))
        .filter_map(|(kinds, _)| kinds.last().copied())
        .collect();

    let base_count = diff_ids.len().saturating_sub(producing.len());
    let skipped = producing.len().saturating_sub(diff_ids.len());

    diff_ids
        .iter()
        .enumerate()
        .map(|(i, id)| {
            let stage = if i < base_count {
                StageKind::BaseImage
            } else {
                producing[skipped + i - base_count]
            };
            let digest = Digest::parse(id)
                .map_err(|e| BuildError::Backend(format!("Unexpected layer id: {}", e)))?;
            Ok(LayerRecord {
                digest,
                // the engine reports sizes per image, not per layer
                size: 0,
                stage,
            })
        })
        .collect()
}

fn history(instructions: &[(Vec<StageKind>, Instruction)]) -> Vec<HistoryEntry> {
    instructions
        .iter()
        .flat_map(|(kinds, instruction)| {
            let empty_layer = !matches!(instruction, Instruction::Run { .. } | Instruction::Copy { .. });
            kinds.iter().map(move |kind| HistoryEntry {
                created_by: instruction.single_line(),
                empty_layer,
                stage: Some(*kind),
            })
        })
        .collect()
}

#[async_trait]
impl BuildBackend for DockerBackend {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn build(
        &self,
        request: &BuildRequest,
        progress: &dyn ProgressHandler,
    ) -> Result<BuiltImage, BuildError> {
        let archive = request
            .context
            .archive(&request.dockerfile)
            .map_err(|e| BuildError::Backend(format!("Failed to package build context: {}", e)))?;
        let instructions = request.descriptor.instructions();
        let base = request
            .descriptor
            .base_image()
            .cloned()
            .ok_or_else(|| BuildError::Backend("descriptor has no base image".to_string()))?;

        debug!(tag = %request.tag, bytes = archive.len(), "Sending build context to Docker");

        let options = BuildImageOptions {
            dockerfile: "Dockerfile".to_string(),
            t: request.tag.to_string(),
            rm: true,
            forcerm: true,
            ..Default::default()
        };
        let mut stream = self
            .docker
            .build_image(options, None, Some(Bytes::from(archive)));

        let mut tracker = StepTracker::new(&instructions);
        while let Some(item) = stream.next().await {
            match item {
                Ok(info) => {
                    if let Some(error) = info.error {
                        return Err(tracker.fail(&error));
                    }
                    if let Some(text) = info.stream {
                        for line in text.lines() {
                            tracker.line(line, progress);
                        }
                    }
                }
                Err(bollard::errors::Error::DockerStreamError { error }) => {
                    return Err(tracker.fail(&error))
                }
                Err(e) => {
                    return Err(match tracker.current {
                        Some(_) => tracker.fail(&e.to_string()),
                        None => BuildError::Unavailable(e.to_string()),
                    })
                }
            }
        }
        tracker.finish_step(progress);

        let inspect = self.inspect_raw(&request.tag).await?;
        let id = inspect
            .id
            .as_deref()
            .ok_or_else(|| BuildError::Backend("Built image has no id".to_string()))
            .and_then(|id| {
                Digest::parse(id).map_err(|e| BuildError::Backend(e.to_string()))
            })?;
        let diff_ids = inspect
            .root_fs
            .and_then(|fs| fs.layers)
            .unwrap_or_default();

        let image = BuiltImage {
            reference: request.tag.clone(),
            id,
            base,
            config: image_config(inspect.config),
            layers: attribute_layers(&instructions, &diff_ids)?,
            history: history(&instructions),
            backend: "docker".to_string(),
            location: None,
        };

        info!(image = %image.reference, id = image.id.short(), "Docker build finished");
        Ok(image)
    }

    async fn inspect(&self, image: &ImageReference) -> Result<ImageConfig, BuildError> {
        Ok(image_config(self.inspect_raw(image).await?.config))
    }

    async fn installed_packages(&self, image: &ImageReference) -> Result<PackageSet, BuildError> {
        let argv = vec![
            self.interpreter.clone(),
            "-m".to_string(),
            "pip".to_string(),
            "freeze".to_string(),
        ];
        let (code, output) = self.run_in_image(image, argv).await?;
        if code != 0 {
            return Err(BuildError::Backend(format!(
                "pip freeze exited with {}: {}",
                code,
                output.trim()
            )));
        }
        Ok(PackageSet::from_freeze(&output))
    }

    async fn contains_path(&self, image: &ImageReference, path: &str) -> Result<bool, BuildError> {
        let config = self.inspect(image).await?;
        let path = resolve_in_image(config.working_dir.as_deref(), path);
        let argv = vec!["test".to_string(), "-e".to_string(), path.clone()];
        match self.run_in_image(image, argv).await? {
            (0, _) => Ok(true),
            (1, _) => Ok(false),
            (code, output) => Err(BuildError::Backend(format!(
                "test -e {} exited with {}: {}",
                path,
                code,
                output.trim()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{BuildDescriptor, DescriptorSettings};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<ProgressEvent>>,
    }

    impl ProgressHandler for Recorder {
        fn on_progress(&self, event: &ProgressEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    impl Recorder {
        fn started(&self) -> Vec<StageKind> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| match e {
                    ProgressEvent::StageStarted { stage } => Some(*stage),
                    _ => None,
                })
                .collect()
        }

        fn completed(&self) -> Vec<StageKind> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| match e {
                    ProgressEvent::StageComplete { stage, .. } => Some(*stage),
                    _ => None,
                })
                .collect()
        }
    }

    fn instructions() -> Vec<(Vec<StageKind>, Instruction)> {
        BuildDescriptor::standard(&DescriptorSettings::default()).instructions()
    }

    #[test]
    fn test_steps_map_to_stages() {
        let instructions = instructions();
        let recorder = Recorder::default();
        let mut tracker = StepTracker::new(&instructions);

        let total = instructions.len();
        for step in 1..=total {
            tracker.line(&format!("Step {}/{} : ...", step, total), &recorder);
            tracker.line(" ---> Running in 1234", &recorder);
        }
        tracker.finish_step(&recorder);

        assert_eq!(recorder.started(), StageKind::ALL.to_vec());
        assert_eq!(recorder.completed(), StageKind::ALL.to_vec());
    }

    #[test]
    fn test_output_lines_attributed_to_running_stage() {
        let instructions = instructions();
        let recorder = Recorder::default();
        let mut tracker = StepTracker::new(&instructions);

        tracker.line("Step 1/6 : FROM python:3.11-slim", &recorder);
        tracker.line(" ---> abc123", &recorder);

        let events = recorder.events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(
            e,
            ProgressEvent::StageLog { stage: StageKind::BaseImage, line } if line == " ---> abc123"
        )));
    }

    #[test]
    fn test_copy_failure_is_missing_input() {
        let instructions = instructions();
        let recorder = Recorder::default();
        let mut tracker = StepTracker::new(&instructions);

        let copy_step = instructions
            .iter()
            .position(|(kinds, _)| kinds.contains(&StageKind::ManifestCopy))
            .unwrap();
        tracker.line(&format!("Step {}/6 : COPY requirements.txt .", copy_step + 1), &recorder);

        let err = tracker.fail("COPY failed: file not found in build context");
        assert!(matches!(
            err,
            BuildError::MissingInput { stage: StageKind::ManifestCopy, ref path } if path == "requirements.txt"
        ));
    }

    #[test]
    fn test_run_failure_attributed_to_first_merged_stage() {
        let instructions = instructions();
        let recorder = Recorder::default();
        let mut tracker = StepTracker::new(&instructions);

        tracker.line("Step 2/6 : RUN apt-get update", &recorder);
        let err = tracker.fail("The command returned a non-zero code: 100");
        assert_eq!(err.stage(), Some(StageKind::SystemUpgrade));
    }

    #[test]
    fn test_failure_before_any_step() {
        let instructions = instructions();
        let tracker = StepTracker::new(&instructions);
        assert!(matches!(tracker.fail("boom"), BuildError::Backend(_)));
    }

    #[test]
    fn test_attribute_layers() {
        let instructions = instructions();
        let producing = instructions
            .iter()
            .filter(|(_, i)| matches!(i, Instruction::Run { .. } | Instruction::Copy { .. }))
            .count();

        let ids: Vec<String> = (0..producing + 2)
            .map(|i| Digest::sha256(&[i as u8]).to_string())
            .collect();
        let layers = attribute_layers(&instructions, &ids).unwrap();

        assert_eq!(layers.len(), ids.len());
        assert_eq!(layers[0].stage, StageKind::BaseImage);
        assert_eq!(layers[1].stage, StageKind::BaseImage);
        assert_eq!(layers.last().unwrap().stage, StageKind::SourceCopy);
        assert!(layers.iter().any(|l| l.stage == StageKind::DependencyInstall));
    }

    #[test]
    fn test_image_config_conversion() {
        let config = DockerImageConfig {
            cmd: Some(vec!["python".into(), "-m".into(), "app.main".into()]),
            working_dir: Some(String::new()),
            labels: Some([("a".to_string(), "b".to_string())].into_iter().collect()),
            ..Default::default()
        };
        let converted = image_config(Some(config));
        assert_eq!(converted.default_command(), vec!["python", "-m", "app.main"]);
        assert_eq!(converted.working_dir, None);
        assert_eq!(converted.label("a"), Some("b"));
        assert_eq!(image_config(None), ImageConfig::default());
    }

    #[test]
    fn test_history_follows_stages() {
        let entries = history(&instructions());
        let stages: Vec<StageKind> = entries.iter().filter_map(|h| h.stage).collect();
        assert_eq!(stages, StageKind::ALL.to_vec());
        assert!(entries.iter().all(|h| !h.created_by.contains('\n')));
    }

    #[tokio::test]
    async fn test_missing_image_against_daemon() {
        let Ok(backend) = DockerBackend::connect("python", Duration::from_secs(10)) else {
            return;
        };
        if !backend.ping().await {
            eprintln!("Docker daemon not available, skipping");
            return;
        }
        let reference = ImageReference::parse("botbox-test/missing:never").unwrap();
        assert!(matches!(
            backend.inspect(&reference).await,
            Err(BuildError::Backend(_))
        ));
    }
}
