pub mod commands;
pub mod handlers;
pub mod output;

pub use commands::{
    BuildArgs, CliArgs, Commands, InspectArgs, LintArgs, PlanArgs, VerifyArgs,
};
pub use handlers::{EXIT_FAILURE, EXIT_SUCCESS, EXIT_USAGE};
pub use output::{LintReport, OutputFormat, OutputFormatter};
