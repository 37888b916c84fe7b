//! Progress reporting for builds

mod bar;
mod handler;
mod logging;

pub use bar::{default_handler, BarHandler};
pub use handler::{NoOpHandler, ProgressEvent, ProgressHandler};
pub use logging::LoggingHandler;
