//! Command handlers
//!
//! Each handler returns the process exit code: 0 on success, 1 when a
//! build, verification or lint fails, 2 for usage and configuration errors.

use super::commands::{
    BuildArgs, ImageSource, InspectArgs, LintArgs, PlanArgs, PlanOverrides, VerifyArgs,
};
use super::output::{LintReport, OutputFormat, OutputFormatter};
use crate::backend::{create_backend, BackendKind, BuildBackend};
use crate::config::BotboxConfig;
use crate::descriptor::{BuildDescriptor, StageKind, StageSpec};
use crate::fs::{FileSystem, RealFileSystem};
use crate::image::ImageReference;
use crate::manifest::{DependencyManifest, PackageSet};
use crate::pipeline::{BuildOrchestrator, PipelineContext};
use crate::progress::default_handler;
use crate::validation::Validator;
use crate::verify::{verify_image, VerifyOptions};
use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_USAGE: i32 = 2;

fn resolve_dir(path: Option<&PathBuf>) -> Result<PathBuf> {
    let dir = match path {
        Some(path) => path.clone(),
        None => env::current_dir().context("Failed to get current directory")?,
    };
    if !dir.is_dir() {
        anyhow::bail!("Context path is not a directory: {}", dir.display());
    }
    dir.canonicalize()
        .with_context(|| format!("Failed to canonicalize {}", dir.display()))
}

fn apply_overrides(config: &mut BotboxConfig, overrides: &PlanOverrides) {
    if let Some(base_image) = &overrides.base_image {
        config.base_image = base_image.clone();
    }
    if let Some(workdir) = &overrides.workdir {
        config.workdir = workdir.clone();
    }
    if let Some(manifest) = &overrides.manifest {
        config.manifest = manifest.clone();
    }
    if let Some(module) = &overrides.entrypoint_module {
        config.entrypoint_module = module.clone();
    }
}

/// Configuration for `dir`, validated
fn load_config(dir: &Path) -> Result<BotboxConfig> {
    let config = BotboxConfig::load(dir)?;
    config.validate()?;
    debug!("{}", config);
    Ok(config)
}

/// The generated plan, or the one recovered from `--dockerfile`
fn load_descriptor(config: &BotboxConfig, overrides: &PlanOverrides) -> Result<BuildDescriptor> {
    match &overrides.dockerfile {
        Some(path) => {
            let content = RealFileSystem
                .read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            BuildDescriptor::from_dockerfile(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))
        }
        None => Ok(BuildDescriptor::standard(&config.to_descriptor_settings()?)),
    }
}

fn emit(content: &str, file: Option<&Path>) -> Result<()> {
    match file {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote {}", path.display());
        }
        None => print!("{}", content),
    }
    Ok(())
}

fn usage_error(e: anyhow::Error) -> i32 {
    error!("{:#}", e);
    eprintln!("Error: {:#}", e);
    EXIT_USAGE
}

fn failure(e: anyhow::Error) -> i32 {
    error!("{:#}", e);
    eprintln!("Error: {:#}", e);
    EXIT_FAILURE
}

pub async fn handle_plan(args: &PlanArgs) -> i32 {
    let setup = || -> Result<(BotboxConfig, BuildDescriptor)> {
        let dir = resolve_dir(args.path.as_ref())?;
        let mut config = BotboxConfig::load(&dir)?;
        apply_overrides(&mut config, &args.overrides);
        config.validate()?;
        let descriptor = load_descriptor(&config, &args.overrides)?;
        Ok((config, descriptor))
    };

    let (config, descriptor) = match setup() {
        Ok(v) => v,
        Err(e) => return usage_error(e),
    };

    let formatter = OutputFormatter::new(args.format.into());
    let rendered = if args.show_config {
        formatter.format_config(&config)
    } else {
        formatter.format_plan(&descriptor)
    };

    match rendered.and_then(|out| emit(&out, args.output.as_deref())) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => failure(e),
    }
}

/// Packages the manifest pins, when the manifest is present
fn expected_packages(dir: &Path, descriptor: &BuildDescriptor) -> Option<PackageSet> {
    let src = match descriptor.stage(StageKind::ManifestCopy).map(|s| &s.spec) {
        Some(StageSpec::Copy { src, .. }) => src.clone(),
        _ => return None,
    };
    let path = dir.join(src);
    if !path.is_file() {
        return None;
    }
    match DependencyManifest::load(&RealFileSystem, &path) {
        Ok(manifest) => Some(manifest.expected_pins()),
        Err(e) => {
            warn!("Skipping package check: {}", e);
            None
        }
    }
}

pub async fn handle_build(args: &BuildArgs, quiet: bool) -> i32 {
    let setup = || -> Result<(PathBuf, BotboxConfig, BuildDescriptor, ImageReference)> {
        let dir = resolve_dir(args.path.as_ref())?;
        let mut config = BotboxConfig::load(&dir)?;
        apply_overrides(&mut config, &args.overrides);
        if let Some(tag) = &args.tag {
            config.tag = tag.clone();
        }
        if let Some(output) = &args.output {
            config.layout_dir = output.clone();
        }
        config.validate()?;
        let descriptor = load_descriptor(&config, &args.overrides)?;
        let tag = config.tag_reference()?;
        Ok((dir, config, descriptor, tag))
    };

    let (dir, config, descriptor, tag) = match setup() {
        Ok(v) => v,
        Err(e) => return usage_error(e),
    };

    let backend: Arc<dyn BuildBackend> =
        match create_backend(args.backend, &config.backend_options()) {
            Ok(backend) => Arc::from(backend),
            Err(e) => return failure(e.into()),
        };

    let verify = args.verify.then(|| VerifyOptions {
        expected_command: descriptor
            .entrypoint_command()
            .unwrap_or_else(|| config.expected_command()),
        entry_module: descriptor
            .entry_module()
            .map(str::to_string)
            .unwrap_or_else(|| config.entrypoint_module.clone()),
        against: None,
        expected_packages: expected_packages(&dir, &descriptor),
    });

    let mut context = PipelineContext::new(
        dir,
        descriptor,
        config.context_settings(),
        tag,
        backend,
    )
    .with_validator(Arc::new(Validator::with_apt_lists_path(&config.apt_lists_path)))
    .with_progress(Arc::from(default_handler(quiet)));
    if let Some(options) = verify {
        context = context.with_verify(options);
    }

    let result = BuildOrchestrator::new().execute(&mut context).await;
    let image = match result {
        Ok(image) => image,
        Err(e) => {
            if let Some(report) = &context.report {
                if let Ok(out) = OutputFormatter::new(args.format.into()).format_report(report) {
                    eprint!("{}", out);
                }
            }
            return failure(e);
        }
    };

    if quiet {
        return EXIT_SUCCESS;
    }

    let formatter = OutputFormatter::new(args.format.into());
    let mut output = match formatter.format_image(&image) {
        Ok(out) => out,
        Err(e) => return usage_error(e),
    };
    if let Some(report) = &context.report {
        if formatter.format() == OutputFormat::Human {
            match formatter.format_report(report) {
                Ok(text) => {
                    output.push('\n');
                    output.push_str(&text);
                }
                Err(e) => return failure(e),
            }
        }
    }
    if formatter.format() == OutputFormat::Human {
        for warning in &context.warnings {
            output.push_str(&format!("\n\u{26A0} {}\n", warning));
        }
    }

    match emit(&output, None) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => failure(e),
    }
}

fn open_backend(source: &ImageSource) -> Result<(BotboxConfig, Box<dyn BuildBackend>)> {
    let dir = resolve_dir(source.context.as_ref())?;
    let mut config = load_config(&dir)?;
    if let Some(layout) = &source.layout {
        config.layout_dir = layout.clone();
    }
    if source.backend == BackendKind::Layout && !config.layout_dir.is_dir() {
        anyhow::bail!(
            "Layout directory does not exist: {}",
            config.layout_dir.display()
        );
    }
    let backend = create_backend(source.backend, &config.backend_options())?;
    Ok((config, backend))
}

pub async fn handle_inspect(args: &InspectArgs) -> i32 {
    let setup = || -> Result<(ImageReference, Box<dyn BuildBackend>)> {
        let reference = ImageReference::parse(&args.reference)?;
        let (_, backend) = open_backend(&args.source)?;
        Ok((reference, backend))
    };
    let (reference, backend) = match setup() {
        Ok(v) => v,
        Err(e) => return usage_error(e),
    };

    let config = match backend.inspect(&reference).await {
        Ok(config) => config,
        Err(e) => return failure(e.into()),
    };

    match OutputFormatter::new(args.format.into())
        .format_inspect(&reference, &config)
        .and_then(|out| emit(&out, None))
    {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => failure(e),
    }
}

pub async fn handle_verify(args: &VerifyArgs) -> i32 {
    let setup = || -> Result<(ImageReference, VerifyOptions, Box<dyn BuildBackend>)> {
        let reference = ImageReference::parse(&args.reference)?;
        let against = args
            .against
            .as_deref()
            .map(ImageReference::parse)
            .transpose()?;
        let (config, backend) = open_backend(&args.source)?;
        let options = VerifyOptions {
            expected_command: config.expected_command(),
            entry_module: config.entrypoint_module.clone(),
            against,
            expected_packages: None,
        };
        Ok((reference, options, backend))
    };
    let (reference, options, backend) = match setup() {
        Ok(v) => v,
        Err(e) => return usage_error(e),
    };

    let report = match verify_image(backend.as_ref(), &reference, &options).await {
        Ok(report) => report,
        Err(e) => return failure(e.into()),
    };

    if let Err(e) = OutputFormatter::new(args.format.into())
        .format_report(&report)
        .and_then(|out| emit(&out, None))
    {
        return failure(e);
    }

    if report.passed() {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    }
}

pub fn lint(path: &Path, content: &str, validator: &Validator) -> LintReport {
    let path = path.display().to_string();
    match BuildDescriptor::from_dockerfile(content) {
        Ok(descriptor) => LintReport {
            path,
            failures: validator.validate_all(&descriptor),
            descriptor: Some(descriptor),
            parse_error: None,
        },
        Err(e) => LintReport {
            path,
            descriptor: None,
            parse_error: Some(e.to_string()),
            failures: Vec::new(),
        },
    }
}

pub fn handle_lint(args: &LintArgs) -> i32 {
    let content = match RealFileSystem.read_to_string(&args.dockerfile) {
        Ok(content) => content,
        Err(e) => {
            return usage_error(e.context(format!("Failed to read {}", args.dockerfile.display())))
        }
    };

    let report = lint(&args.dockerfile, &content, &Validator::new());
    if let Err(e) = OutputFormatter::new(args.format.into())
        .format_lint(&report)
        .and_then(|out| emit(&out, None))
    {
        return failure(e);
    }

    if report.passed() {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{dockerfile, DescriptorSettings};

    #[test]
    fn test_lint_generated_dockerfile_passes() {
        let rendered = dockerfile::render(&BuildDescriptor::standard(&DescriptorSettings::default()));
        let report = lint(Path::new("Dockerfile"), &rendered, &Validator::new());
        assert!(report.passed(), "{:?}", report);
    }

    #[test]
    fn test_lint_reports_every_failure() {
        let content = "\
FROM python:3.11-slim
RUN apt-get update && apt-get upgrade -y && apt-get install -y build-essential
WORKDIR /app
COPY requirements.txt .
RUN pip install -r requirements.txt
COPY . .
CMD python -m app.main
";
        let report = lint(Path::new("Dockerfile"), content, &Validator::new());
        assert!(!report.passed());
        assert!(report.failures.len() >= 2, "{:?}", report.failures);
    }

    #[test]
    fn test_lint_unparseable() {
        let report = lint(Path::new("Dockerfile"), "FROM\n", &Validator::new());
        assert!(report.parse_error.is_some());
        assert!(!report.passed());
    }

    #[test]
    fn test_overrides_apply() {
        let mut config = BotboxConfig::default();
        apply_overrides(
            &mut config,
            &PlanOverrides {
                workdir: Some("/srv".into()),
                entrypoint_module: Some("bot.main".into()),
                ..Default::default()
            },
        );
        assert_eq!(config.workdir, "/srv");
        assert_eq!(config.entrypoint_module, "bot.main");
        assert_eq!(config.manifest, "requirements.txt");
    }
}
