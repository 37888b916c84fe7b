//! Progress handler trait and events

use crate::descriptor::StageKind;
use std::time::Duration;

/// Events emitted while a build pipeline runs
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Pipeline started for a context directory
    Started { context: String },

    PhaseStarted { phase: String },

    PhaseComplete { phase: String, duration: Duration },

    /// A build stage began executing
    StageStarted { stage: StageKind },

    /// Output line produced while a stage runs
    StageLog { stage: StageKind, line: String },

    StageComplete { stage: StageKind, duration: Duration },

    /// Build finished and produced an image
    Completed { image: String, total_time: Duration },

    /// Pipeline aborted
    Failed {
        stage: Option<StageKind>,
        error: String,
    },
}

/// Receives progress events from the pipeline and backends
pub trait ProgressHandler: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);
}

/// No-op handler that ignores all events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHandler;

impl ProgressHandler for NoOpHandler {
    fn on_progress(&self, _event: &ProgressEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records stage starts so tests can assert ordering
    #[derive(Default)]
    struct RecordingHandler {
        stages: Mutex<Vec<StageKind>>,
    }

    impl ProgressHandler for RecordingHandler {
        fn on_progress(&self, event: &ProgressEvent) {
            if let ProgressEvent::StageStarted { stage } = event {
                self.stages.lock().unwrap().push(*stage);
            }
        }
    }

    #[test]
    fn test_noop_handler() {
        NoOpHandler.on_progress(&ProgressEvent::Started {
            context: "/bot".to_string(),
        });
    }

    #[test]
    fn test_handler_as_trait_object() {
        let handler = RecordingHandler::default();
        let dyn_handler: &dyn ProgressHandler = &handler;

        dyn_handler.on_progress(&ProgressEvent::StageStarted {
            stage: StageKind::BaseImage,
        });
        dyn_handler.on_progress(&ProgressEvent::StageLog {
            stage: StageKind::BaseImage,
            line: "pulling".to_string(),
        });
        dyn_handler.on_progress(&ProgressEvent::StageStarted {
            stage: StageKind::SystemUpgrade,
        });

        assert_eq!(
            *handler.stages.lock().unwrap(),
            vec![StageKind::BaseImage, StageKind::SystemUpgrade]
        );
    }

    #[test]
    fn test_event_debug() {
        let event = ProgressEvent::StageStarted {
            stage: StageKind::ManifestCopy,
        };
        let debug_str = format!("{:?}", event);
        assert!(debug_str.contains("StageStarted"));
        assert!(debug_str.contains("ManifestCopy"));
    }
}
