//! Output formatting for multiple formats
//!
//! Every command result can be printed as JSON, YAML or human-readable
//! text. Build plans can additionally be printed as a Dockerfile.

use anyhow::{bail, Context, Result};
use serde::Serialize;

use crate::config::BotboxConfig;
use crate::descriptor::{dockerfile, BuildDescriptor};
use crate::image::{BuiltImage, ImageConfig, ImageReference};
use crate::validation::RuleFailure;
use crate::verify::VerificationReport;

const RULE: &str = "\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}";

/// Output format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON format (machine-readable)
    Json,
    /// YAML format (human-friendly, version-control friendly)
    Yaml,
    /// Human-readable formatted text
    Human,
    /// Dockerfile text, for build plans only
    Dockerfile,
}

/// Result of linting an existing Dockerfile
#[derive(Debug, Clone, Serialize)]
pub struct LintReport {
    pub path: String,
    pub descriptor: Option<BuildDescriptor>,
    /// Set when the file could not be mapped onto the nine stages
    pub parse_error: Option<String>,
    pub failures: Vec<RuleFailure>,
}

impl LintReport {
    pub fn passed(&self) -> bool {
        self.parse_error.is_none() && self.failures.is_empty()
    }
}

#[derive(Serialize)]
struct PlanView<'a> {
    descriptor: &'a BuildDescriptor,
    dockerfile: String,
}

#[derive(Serialize)]
struct InspectView<'a> {
    image: String,
    default_command: Vec<String>,
    config: &'a ImageConfig,
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

fn tree_lines<T: AsRef<str>>(output: &mut String, items: &[T]) {
    for (i, item) in items.iter().enumerate() {
        let connector = if i + 1 == items.len() {
            "\u{2514}"
        } else {
            "\u{251C}"
        };
        output.push_str(&format!("{}\u{2500} {}\n", connector, item.as_ref()));
    }
}

/// Output formatter for command results
pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    fn structured<T: Serialize>(&self, value: &T, what: &str) -> Result<String> {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(value)
                .with_context(|| format!("Failed to serialize {} to JSON", what)),
            OutputFormat::Yaml => serde_yaml::to_string(value)
                .with_context(|| format!("Failed to serialize {} to YAML", what)),
            OutputFormat::Human => bail!("no human rendering for {}", what),
            OutputFormat::Dockerfile => bail!("The dockerfile format only applies to plans"),
        }
    }

    pub fn format_plan(&self, descriptor: &BuildDescriptor) -> Result<String> {
        match self.format {
            OutputFormat::Dockerfile => Ok(dockerfile::render(descriptor)),
            OutputFormat::Human => Ok(self.format_plan_human(descriptor)),
            _ => self.structured(
                &PlanView {
                    descriptor,
                    dockerfile: dockerfile::render(descriptor),
                },
                "build plan",
            ),
        }
    }

    fn format_plan_human(&self, descriptor: &BuildDescriptor) -> String {
        let mut output = String::from("Build Plan\n");
        output.push_str(RULE);
        output.push_str("\n\n");

        let stages: Vec<String> = descriptor
            .stages()
            .iter()
            .map(|s| format!("{:<24} {}", s.kind.to_string(), s.summary()))
            .collect();
        tree_lines(&mut output, &stages);

        if !descriptor.labels().is_empty() {
            output.push_str("\nLabels:\n");
            let labels: Vec<String> = descriptor
                .labels()
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            tree_lines(&mut output, &labels);
        }

        if let Some(command) = descriptor.entrypoint_command() {
            output.push_str(&format!("\nStarts: {:?}\n", command));
        }
        output
    }

    pub fn format_image(&self, image: &BuiltImage) -> Result<String> {
        if self.format != OutputFormat::Human {
            return self.structured(image, "image");
        }

        let mut output = format!("\u{2713} Built {}\n", image.reference);
        output.push_str(RULE);
        output.push_str("\n\n");
        output.push_str(&format!("Image ID:  {}\n", image.id));
        output.push_str(&format!("Base:      {}\n", image.base));
        output.push_str(&format!("Backend:   {}\n", image.backend));
        if let Some(location) = &image.location {
            output.push_str(&format!("Location:  {}\n", location.display()));
        }
        output.push_str(&format!(
            "Command:   {:?}\n",
            image.config.default_command()
        ));
        if let Some(workdir) = &image.config.working_dir {
            output.push_str(&format!("Workdir:   {}\n", workdir));
        }

        if !image.layers.is_empty() {
            output.push_str("\nLayers:\n");
            let layers: Vec<String> = image
                .layers
                .iter()
                .map(|l| {
                    format!(
                        "{:<24} {} ({})",
                        l.stage.to_string(),
                        l.digest.short(),
                        human_size(l.size)
                    )
                })
                .collect();
            tree_lines(&mut output, &layers);
        }
        Ok(output)
    }

    pub fn format_inspect(&self, reference: &ImageReference, config: &ImageConfig) -> Result<String> {
        if self.format != OutputFormat::Human {
            return self.structured(
                &InspectView {
                    image: reference.to_string(),
                    default_command: config.default_command(),
                    config,
                },
                "image config",
            );
        }

        let mut output = format!("Image {}\n", reference);
        output.push_str(RULE);
        output.push_str("\n\n");
        output.push_str(&format!("Command:     {:?}\n", config.default_command()));
        if !config.entrypoint.is_empty() {
            output.push_str(&format!("Entrypoint:  {:?}\n", config.entrypoint));
        }
        output.push_str(&format!(
            "Workdir:     {}\n",
            config.working_dir.as_deref().unwrap_or("/")
        ));
        if !config.env.is_empty() {
            output.push_str("\nEnvironment:\n");
            tree_lines(&mut output, &config.env);
        }
        if !config.labels.is_empty() {
            output.push_str("\nLabels:\n");
            let labels: Vec<String> = config
                .labels
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            tree_lines(&mut output, &labels);
        }
        Ok(output)
    }

    pub fn format_report(&self, report: &VerificationReport) -> Result<String> {
        if self.format != OutputFormat::Human {
            return self.structured(report, "verification report");
        }

        let mut output = if report.passed() {
            format!("\u{2713} {} verified\n", report.image)
        } else {
            format!("\u{2717} {} failed verification\n", report.image)
        };
        output.push_str(RULE);
        output.push_str("\n\n");
        for check in &report.checks {
            output.push_str(&format!("{}\n", check));
        }
        Ok(output)
    }

    pub fn format_lint(&self, report: &LintReport) -> Result<String> {
        if self.format != OutputFormat::Human {
            return self.structured(report, "lint report");
        }

        let mut output = if report.passed() {
            format!("\u{2713} {} follows the build procedure\n", report.path)
        } else {
            format!("\u{2717} {} has problems\n", report.path)
        };

        if let Some(error) = &report.parse_error {
            output.push_str(&format!("  - {}\n", error));
        }
        for failure in &report.failures {
            output.push_str(&format!("  - [{}] {}\n", failure.rule, failure.message));
        }
        Ok(output)
    }

    pub fn format_config(&self, config: &BotboxConfig) -> Result<String> {
        match self.format {
            OutputFormat::Human | OutputFormat::Dockerfile => Ok(config.to_string()),
            _ => self.structured(&config.to_display_map(), "config"),
        }
    }
}
