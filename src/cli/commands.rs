use crate::backend::BackendKind;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

/// Container image builder for Python bot services
#[derive(Parser, Debug)]
#[command(
    name = "botbox",
    about = "Container image builder for Python bot services",
    version,
    long_about = "botbox builds a runnable image for a Python bot in nine fixed stages: \
                  base image, system upgrade, toolchain install, apt cache cleanup, \
                  working directory, manifest copy, dependency install, source copy and \
                  the `python -m app.main` entrypoint. It can print the plan, run it \
                  against Docker or write an OCI layout, and verify the result."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Enable debug output")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Print the build plan",
        long_about = "Prints the nine-stage build plan for a project.\n\n\
                      Examples:\n  \
                      botbox plan\n  \
                      botbox plan ./weather-bot --format json\n  \
                      botbox plan -o Dockerfile"
    )]
    Plan(PlanArgs),

    #[command(
        about = "Build the image",
        long_about = "Runs the build pipeline: collect the context, validate the plan, \
                      render the Dockerfile and execute the stages.\n\n\
                      Examples:\n  \
                      botbox build\n  \
                      botbox build ./weather-bot --tag weather-bot:1.4\n  \
                      botbox build --backend layout --output ./out --verify"
    )]
    Build(BuildArgs),

    #[command(about = "Show the runtime configuration of a built image")]
    Inspect(InspectArgs),

    #[command(
        about = "Check a built image",
        long_about = "Checks that the image starts the declared entrypoint and contains the \
                      entry module. With --against, also checks that both images installed \
                      the same packages.\n\n\
                      Examples:\n  \
                      botbox verify weather-bot:1.4\n  \
                      botbox verify bot:a --against bot:b --backend layout"
    )]
    Verify(VerifyArgs),

    #[command(about = "Check an existing Dockerfile against the build procedure")]
    Lint(LintArgs),
}

/// Flags that override configuration values
#[derive(Args, Debug, Clone, Default)]
pub struct PlanOverrides {
    #[arg(long, value_name = "IMAGE", help = "Base image reference")]
    pub base_image: Option<String>,

    #[arg(long, value_name = "DIR", help = "Working directory inside the image")]
    pub workdir: Option<String>,

    #[arg(long, value_name = "FILE", help = "Requirements file, relative to the context")]
    pub manifest: Option<String>,

    #[arg(long, value_name = "MODULE", help = "Module started with `python -m`")]
    pub entrypoint_module: Option<String>,

    #[arg(
        long,
        value_name = "FILE",
        help = "Use an existing Dockerfile instead of generating the plan"
    )]
    pub dockerfile: Option<PathBuf>,
}

#[derive(Parser, Debug, Clone)]
pub struct PlanArgs {
    #[arg(
        value_name = "PATH",
        help = "Path to the build context (defaults to current directory)"
    )]
    pub path: Option<PathBuf>,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "dockerfile",
        help = "Output format"
    )]
    pub format: OutputFormatArg,

    #[arg(
        short = 'o',
        long,
        value_name = "FILE",
        help = "Write output to file instead of stdout"
    )]
    pub output: Option<PathBuf>,

    #[arg(long, help = "Print the resolved configuration instead of the plan")]
    pub show_config: bool,

    #[command(flatten)]
    pub overrides: PlanOverrides,
}

#[derive(Parser, Debug, Clone)]
pub struct BuildArgs {
    #[arg(
        value_name = "PATH",
        help = "Path to the build context (defaults to current directory)"
    )]
    pub path: Option<PathBuf>,

    #[arg(
        short = 'b',
        long,
        value_parser = parse_backend,
        default_value = "docker",
        help = "Build backend (docker, layout)"
    )]
    pub backend: BackendKind,

    #[arg(short = 't', long, value_name = "REF", help = "Tag for the built image")]
    pub tag: Option<String>,

    #[arg(
        short = 'o',
        long,
        value_name = "DIR",
        help = "Output directory for the layout backend"
    )]
    pub output: Option<PathBuf>,

    #[arg(long, help = "Verify the image after building")]
    pub verify: bool,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,

    #[command(flatten)]
    pub overrides: PlanOverrides,
}

/// Where to find an already built image
#[derive(Args, Debug, Clone)]
pub struct ImageSource {
    #[arg(
        short = 'b',
        long,
        value_parser = parse_backend,
        default_value = "docker",
        help = "Backend holding the image (docker, layout)"
    )]
    pub backend: BackendKind,

    #[arg(long, value_name = "DIR", help = "Layout directory for the layout backend")]
    pub layout: Option<PathBuf>,

    #[arg(
        long,
        value_name = "PATH",
        help = "Directory whose botbox.toml is used (defaults to current directory)"
    )]
    pub context: Option<PathBuf>,
}

#[derive(Parser, Debug, Clone)]
pub struct InspectArgs {
    #[arg(value_name = "REF", help = "Image reference")]
    pub reference: String,

    #[command(flatten)]
    pub source: ImageSource,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct VerifyArgs {
    #[arg(value_name = "REF", help = "Image reference")]
    pub reference: String,

    #[arg(
        long,
        value_name = "REF",
        help = "Second build of the same inputs to compare installed packages with"
    )]
    pub against: Option<String>,

    #[command(flatten)]
    pub source: ImageSource,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct LintArgs {
    #[arg(value_name = "DOCKERFILE", help = "Dockerfile to check")]
    pub dockerfile: PathBuf,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormatArg {
    Json,
    Yaml,
    Human,
    Dockerfile,
}

impl From<OutputFormatArg> for super::output::OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Json => super::output::OutputFormat::Json,
            OutputFormatArg::Yaml => super::output::OutputFormat::Yaml,
            OutputFormatArg::Human => super::output::OutputFormat::Human,
            OutputFormatArg::Dockerfile => super::output::OutputFormat::Dockerfile,
        }
    }
}

fn parse_backend(s: &str) -> Result<BackendKind, String> {
    s.parse()
}

impl Commands {
    /// Directory whose `botbox.toml` applies to this invocation
    pub fn context_dir(&self) -> Option<&Path> {
        match self {
            Commands::Plan(args) => args.path.as_deref(),
            Commands::Build(args) => args.path.as_deref(),
            Commands::Inspect(args) => args.source.context.as_deref(),
            Commands::Verify(args) => args.source.context.as_deref(),
            Commands::Lint(args) => args
                .dockerfile
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty()),
        }
    }
}
