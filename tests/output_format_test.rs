//! Output formatting integration tests
//!
//! Tests all output formats (JSON, YAML, Human-readable, Dockerfile) for:
//! - Build plans
//! - Built images
//! - Verification and lint reports

use botbox::cli::handlers::lint;
use botbox::cli::output::{OutputFormat, OutputFormatter};
use botbox::descriptor::{BuildDescriptor, DescriptorSettings, StageKind};
use botbox::image::{BuiltImage, Digest, ImageConfig, ImageReference, LayerRecord};
use botbox::validation::Validator;
use botbox::verify::{CheckResult, VerificationReport};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

fn sample_descriptor() -> BuildDescriptor {
    let mut labels = BTreeMap::new();
    labels.insert("org.opencontainers.image.title".to_string(), "weather-bot".to_string());
    BuildDescriptor::standard(&DescriptorSettings {
        labels,
        ..Default::default()
    })
}

fn sample_image() -> BuiltImage {
    BuiltImage {
        reference: ImageReference::parse("weather-bot:1.4").unwrap(),
        id: Digest::sha256(b"image config"),
        base: ImageReference::parse("python:3.11-slim").unwrap(),
        config: ImageConfig {
            cmd: vec!["python".into(), "-m".into(), "app.main".into()],
            working_dir: Some("/app".into()),
            ..Default::default()
        },
        layers: vec![
            LayerRecord {
                digest: Digest::sha256(b"requirements"),
                size: 120,
                stage: StageKind::ManifestCopy,
            },
            LayerRecord {
                digest: Digest::sha256(b"source"),
                size: 48_000,
                stage: StageKind::SourceCopy,
            },
        ],
        history: Vec::new(),
        backend: "layout".to_string(),
        location: Some(PathBuf::from("/tmp/out/weather-bot-1.4")),
    }
}

fn sample_report() -> VerificationReport {
    let mut report = VerificationReport::new(&ImageReference::parse("weather-bot:1.4").unwrap());
    report.push(CheckResult::pass("entrypoint", "python -m app.main"));
    report.push(CheckResult::fail("entry module present", "app/main.py not found"));
    report
}

#[test]
fn test_plan_dockerfile_format() {
    let output = OutputFormatter::new(OutputFormat::Dockerfile)
        .format_plan(&sample_descriptor())
        .unwrap();

    assert!(output.contains("FROM python:3.11-slim"));
    assert!(output.contains("LABEL org.opencontainers.image.title="));
}

#[test]
fn test_plan_human_format() {
    let output = OutputFormatter::new(OutputFormat::Human)
        .format_plan(&sample_descriptor())
        .unwrap();

    assert!(output.starts_with("Build Plan"));
    for kind in StageKind::ALL {
        assert!(output.contains(&kind.to_string()), "missing {}", kind);
    }
    assert!(output.contains("Labels:"));
}

#[test]
fn test_plan_yaml_format() {
    let output = OutputFormatter::new(OutputFormat::Yaml)
        .format_plan(&sample_descriptor())
        .unwrap();

    let value: serde_yaml::Value = serde_yaml::from_str(&output).unwrap();
    assert_eq!(value["descriptor"]["stages"].as_sequence().unwrap().len(), 9);
}

#[test]
fn test_image_json_format() {
    let output = OutputFormatter::new(OutputFormat::Json)
        .format_image(&sample_image())
        .unwrap();

    let value: serde_json::Value = serde_json::from_str(&output).unwrap();
    assert_eq!(value["backend"], "layout");
    assert_eq!(value["layers"].as_array().unwrap().len(), 2);
}

#[test]
fn test_image_human_format() {
    let output = OutputFormatter::new(OutputFormat::Human)
        .format_image(&sample_image())
        .unwrap();

    assert!(output.contains("Built weather-bot:1.4"));
    assert!(output.contains("Location:  /tmp/out/weather-bot-1.4"));
    assert!(output.contains("8/9 source copy"));
    assert!(output.contains("Workdir:   /app"));
}

#[test]
fn test_image_dockerfile_format_rejected() {
    assert!(OutputFormatter::new(OutputFormat::Dockerfile)
        .format_image(&sample_image())
        .is_err());
}

#[test]
fn test_report_human_format() {
    let output = OutputFormatter::new(OutputFormat::Human)
        .format_report(&sample_report())
        .unwrap();

    assert!(output.contains("failed verification"));
    assert!(output.contains("[ok] entrypoint"));
    assert!(output.contains("[FAILED] entry module present"));
}

#[test]
fn test_report_json_format() {
    let output = OutputFormatter::new(OutputFormat::Json)
        .format_report(&sample_report())
        .unwrap();

    let value: serde_json::Value = serde_json::from_str(&output).unwrap();
    assert_eq!(value["checks"].as_array().unwrap().len(), 2);
    assert_eq!(value["checks"][1]["passed"], false);
}

#[test]
fn test_lint_json_format() {
    let content = "\
FROM python:3.11-slim
WORKDIR /app
COPY requirements.txt .
RUN pip install -r requirements.txt
COPY . .
CMD [\"python\", \"-m\", \"app.main\"]
";
    let report = lint(Path::new("Dockerfile"), content, &Validator::new());
    let output = OutputFormatter::new(OutputFormat::Json)
        .format_lint(&report)
        .unwrap();

    let value: serde_json::Value = serde_json::from_str(&output).unwrap();
    assert_eq!(value["path"], "Dockerfile");
    let rules: Vec<&str> = value["failures"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|f| f["rule"].as_str())
        .collect();
    assert!(rules.contains(&"StageOrder"), "{:?}", rules);
    assert!(rules.contains(&"NoCacheInstall"), "{:?}", rules);
}
