use botbox::cli::commands::{CliArgs, Commands};
use botbox::cli::handlers::{handle_build, handle_inspect, handle_lint, handle_plan, handle_verify};
use botbox::config::BotboxConfig;
use botbox::util::logging::{init_logging, json_from_env, parse_level, LoggingConfig};
use botbox::VERSION;

use clap::Parser;
use std::env;
use std::path::Path;
use tracing::{debug, Level};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    init_logging_from_args(&args);

    debug!("botbox v{} starting", VERSION);
    debug!("Arguments: {:?}", args);

    let exit_code = match &args.command {
        Commands::Plan(plan_args) => handle_plan(plan_args).await,
        Commands::Build(build_args) => handle_build(build_args, args.quiet).await,
        Commands::Inspect(inspect_args) => handle_inspect(inspect_args).await,
        Commands::Verify(verify_args) => handle_verify(verify_args).await,
        Commands::Lint(lint_args) => handle_lint(lint_args),
    };

    std::process::exit(exit_code);
}

/// `--log-level` wins, then `-v`/`-q`, then `log_level` from the
/// command's botbox.toml and `BOTBOX_LOG_LEVEL`
fn init_logging_from_args(args: &CliArgs) {
    let level = if let Some(level_str) = &args.log_level {
        parse_level(level_str)
    } else if args.verbose {
        Level::DEBUG
    } else if args.quiet {
        Level::ERROR
    } else {
        configured_level(args.command.context_dir())
    };

    init_logging(LoggingConfig::for_output(level, json_from_env()));
}

fn configured_level(context_dir: Option<&Path>) -> Level {
    let dir = match context_dir {
        Some(dir) => Some(dir.to_path_buf()),
        None => env::current_dir().ok(),
    };
    let from_config = dir
        .and_then(|dir| BotboxConfig::load(&dir).ok())
        .map(|config| config.log_level);

    match from_config {
        Some(level) => parse_level(&level),
        None => parse_level(&env::var("BOTBOX_LOG_LEVEL").unwrap_or_else(|_| "info".to_string())),
    }
}
