//! Logging-based progress handler

use super::{ProgressEvent, ProgressHandler};
use tracing::{debug, error, info};

/// Handler that logs progress events using tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl ProgressHandler for LoggingHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Started { context } => {
                info!(context = %context, "Starting build");
            }
            ProgressEvent::PhaseStarted { phase } => {
                debug!(phase = %phase, "Starting phase");
            }
            ProgressEvent::PhaseComplete { phase, duration } => {
                debug!(
                    phase = %phase,
                    duration_ms = duration.as_millis(),
                    "Phase complete"
                );
            }
            ProgressEvent::StageStarted { stage } => {
                info!(stage = %stage, "Running stage");
            }
            ProgressEvent::StageLog { stage, line } => {
                debug!(stage = stage.index(), "{}", line);
            }
            ProgressEvent::StageComplete { stage, duration } => {
                debug!(
                    stage = %stage,
                    duration_ms = duration.as_millis(),
                    "Stage complete"
                );
            }
            ProgressEvent::Completed { image, total_time } => {
                info!(
                    image = %image,
                    total_time_ms = total_time.as_millis(),
                    "Build complete"
                );
            }
            ProgressEvent::Failed { stage, error } => match stage {
                Some(stage) => error!(stage = %stage, error = %error, "Build failed"),
                None => error!(error = %error, "Build failed"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::StageKind;
    use std::time::Duration;

    #[test]
    fn test_logging_handler_accepts_every_event() {
        let handler = LoggingHandler;
        let events = vec![
            ProgressEvent::Started {
                context: "/bot".into(),
            },
            ProgressEvent::PhaseStarted {
                phase: "Context".into(),
            },
            ProgressEvent::StageStarted {
                stage: StageKind::BaseImage,
            },
            ProgressEvent::StageLog {
                stage: StageKind::BaseImage,
                line: "Step 1/7 : FROM python:3.11-slim".into(),
            },
            ProgressEvent::StageComplete {
                stage: StageKind::BaseImage,
                duration: Duration::from_millis(5),
            },
            ProgressEvent::Failed {
                stage: Some(StageKind::ManifestCopy),
                error: "requirements.txt not found".into(),
            },
            ProgressEvent::Completed {
                image: "bot:latest".into(),
                total_time: Duration::from_secs(1),
            },
        ];
        for event in &events {
            handler.on_progress(event);
        }
    }
}
