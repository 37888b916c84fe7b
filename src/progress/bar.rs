//! Terminal progress bar over the nine build stages

use super::{ProgressEvent, ProgressHandler};
use crate::descriptor::StageKind;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

const TEMPLATE: &str = "{spinner} [{bar:30}] {pos}/{len} {msg}";

pub struct BarHandler {
    bar: ProgressBar,
}

impl BarHandler {
    pub fn new() -> Self {
        Self::with_target(ProgressDrawTarget::stderr())
    }

    pub fn hidden() -> Self {
        Self::with_target(ProgressDrawTarget::hidden())
    }

    fn with_target(target: ProgressDrawTarget) -> Self {
        let bar = ProgressBar::with_draw_target(Some(StageKind::ALL.len() as u64), target);
        if let Ok(style) = ProgressStyle::with_template(TEMPLATE) {
            bar.set_style(style.progress_chars("=> "));
        }
        Self { bar }
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }
}

impl Default for BarHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressHandler for BarHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::StageStarted { stage } => {
                self.bar.set_message(stage.name());
            }
            ProgressEvent::StageComplete { stage, .. } => {
                self.bar.set_position(stage.index() as u64);
            }
            ProgressEvent::StageLog { line, .. } => {
                self.bar.tick();
                self.bar.set_message(line.clone());
            }
            ProgressEvent::Completed { image, .. } => {
                self.bar.finish_with_message(format!("built {}", image));
            }
            ProgressEvent::Failed { stage, error } => {
                let message = match stage {
                    Some(stage) => format!("{} failed: {}", stage.name(), error),
                    None => format!("failed: {}", error),
                };
                self.bar.abandon_with_message(message);
            }
            _ => {}
        }
    }
}

/// Bar when attached to a terminal, plain tracing output otherwise
pub fn default_handler(quiet: bool) -> Box<dyn ProgressHandler> {
    if quiet {
        Box::new(super::NoOpHandler)
    } else if atty::is(atty::Stream::Stderr) {
        Box::new(BarHandler::new())
    } else {
        Box::new(super::LoggingHandler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_bar_tracks_completed_stages() {
        let handler = BarHandler::hidden();
        for stage in [StageKind::BaseImage, StageKind::SystemUpgrade] {
            handler.on_progress(&ProgressEvent::StageStarted { stage });
            handler.on_progress(&ProgressEvent::StageComplete {
                stage,
                duration: Duration::ZERO,
            });
        }
        assert_eq!(handler.position(), 2);
    }
}
