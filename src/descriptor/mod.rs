//! The build descriptor: nine ordered stages that turn a Python bot project
//! into an image
//!
//! A descriptor is plain data. It can be produced from settings
//! ([`BuildDescriptor::standard`]) or recovered from an existing Dockerfile
//! ([`BuildDescriptor::from_dockerfile`]), lowered to Dockerfile
//! instructions, and handed to a backend for execution.

pub mod dockerfile;
mod instruction;
mod stage;

pub use instruction::{CommandLine, Instruction};
pub use stage::{Stage, StageKind, StageSpec};

use crate::image::{ImageError, ImageReference};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_BASE_IMAGE: &str = "python:3.11-slim";
pub const DEFAULT_TOOLCHAIN: &str = "build-essential";
pub const DEFAULT_APT_LISTS: &str = "/var/lib/apt/lists/*";
pub const APT_LISTS_DIR: &str = "/var/lib/apt/lists";

/// True for the apt lists directory itself or anything below it
pub fn is_apt_lists_path(path: &str) -> bool {
    path.strip_prefix(APT_LISTS_DIR)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}
pub const DEFAULT_WORKDIR: &str = "/app";
pub const DEFAULT_MANIFEST: &str = "requirements.txt";
pub const DEFAULT_SOURCE: &str = ".";
pub const DEFAULT_INTERPRETER: &str = "python";
pub const DEFAULT_ENTRYPOINT_MODULE: &str = "app.main";

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error(transparent)]
    InvalidReference(#[from] ImageError),

    #[error("Unknown instruction {keyword} on line {line}")]
    UnknownInstruction { line: usize, keyword: String },

    #[error("Malformed instruction on line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("Cannot map line {line} ({instruction}) to a build stage")]
    Unclassifiable { line: usize, instruction: String },

    #[error("Stage {0} is missing")]
    MissingStage(StageKind),

    #[error("Stage {0} appears more than once")]
    DuplicateStage(StageKind),
}

/// Values the standard descriptor is filled from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorSettings {
    pub base_image: ImageReference,
    pub upgrade_system: bool,
    pub toolchain: Vec<String>,
    pub apt_lists_path: String,
    pub workdir: String,
    pub manifest: String,
    pub upgrade_pip: bool,
    pub source: String,
    pub interpreter: String,
    pub entrypoint_module: String,
    pub labels: BTreeMap<String, String>,
}

impl Default for DescriptorSettings {
    fn default() -> Self {
        Self {
            base_image: ImageReference::parse(DEFAULT_BASE_IMAGE)
                .expect("default base image is a valid reference"),
            upgrade_system: true,
            toolchain: vec![DEFAULT_TOOLCHAIN.to_string()],
            apt_lists_path: DEFAULT_APT_LISTS.to_string(),
            workdir: DEFAULT_WORKDIR.to_string(),
            manifest: DEFAULT_MANIFEST.to_string(),
            upgrade_pip: true,
            source: DEFAULT_SOURCE.to_string(),
            interpreter: DEFAULT_INTERPRETER.to_string(),
            entrypoint_module: DEFAULT_ENTRYPOINT_MODULE.to_string(),
            labels: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildDescriptor {
    stages: Vec<Stage>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    env: Vec<(String, String)>,
}

impl BuildDescriptor {
    /// Build from explicit stages; order and completeness are checked by
    /// [`BuildDescriptor::check_structure`] and the validator
    pub fn new(stages: Vec<Stage>) -> Self {
        Self {
            stages,
            labels: BTreeMap::new(),
            env: Vec::new(),
        }
    }

    pub fn standard(settings: &DescriptorSettings) -> Self {
        let manifest_file = settings
            .manifest
            .rsplit('/')
            .next()
            .unwrap_or(&settings.manifest)
            .to_string();

        let stages = vec![
            Stage::new(
                StageKind::BaseImage,
                StageSpec::Image {
                    image: settings.base_image.clone(),
                },
            ),
            Stage::new(
                StageKind::SystemUpgrade,
                StageSpec::Refresh {
                    upgrade: settings.upgrade_system,
                },
            ),
            Stage::new(
                StageKind::ToolchainInstall,
                StageSpec::Packages {
                    packages: settings.toolchain.clone(),
                },
            ),
            Stage::new(
                StageKind::CacheCleanup,
                StageSpec::Paths {
                    paths: vec![settings.apt_lists_path.clone()],
                },
            ),
            Stage::new(
                StageKind::WorkingDirectory,
                StageSpec::Path {
                    path: settings.workdir.clone(),
                },
            ),
            Stage::new(
                StageKind::ManifestCopy,
                StageSpec::Copy {
                    src: settings.manifest.clone(),
                    dest: ".".to_string(),
                },
            ),
            Stage::new(
                StageKind::DependencyInstall,
                StageSpec::Install {
                    manifest: manifest_file,
                    upgrade_pip: settings.upgrade_pip,
                    no_cache: true,
                },
            ),
            Stage::new(
                StageKind::SourceCopy,
                StageSpec::Copy {
                    src: settings.source.clone(),
                    dest: ".".to_string(),
                },
            ),
            Stage::new(
                StageKind::Entrypoint,
                StageSpec::Command {
                    program: settings.interpreter.clone(),
                    args: vec!["-m".to_string(), settings.entrypoint_module.clone()],
                    shell: false,
                    entrypoint: false,
                },
            ),
        ];

        Self {
            stages,
            labels: settings.labels.clone(),
            env: Vec::new(),
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn stage(&self, kind: StageKind) -> Option<&Stage> {
        self.stages.iter().find(|s| s.kind == kind)
    }

    pub fn require(&self, kind: StageKind) -> Result<&Stage, DescriptorError> {
        self.stage(kind).ok_or(DescriptorError::MissingStage(kind))
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    pub fn base_image(&self) -> Option<&ImageReference> {
        match self.stage(StageKind::BaseImage).map(|s| &s.spec) {
            Some(StageSpec::Image { image }) => Some(image),
            _ => None,
        }
    }

    pub fn workdir(&self) -> Option<&str> {
        match self.stage(StageKind::WorkingDirectory).map(|s| &s.spec) {
            Some(StageSpec::Path { path }) => Some(path),
            _ => None,
        }
    }

    /// The command line a container started from the image runs
    pub fn entrypoint_command(&self) -> Option<Vec<String>> {
        match self.stage(StageKind::Entrypoint).map(|s| &s.spec) {
            Some(StageSpec::Command {
                program,
                args,
                shell,
                ..
            }) => {
                let mut argv = vec![program.clone()];
                argv.extend(args.iter().cloned());
                if *shell {
                    Some(CommandLine::shell(argv.join(" ")).argv())
                } else {
                    Some(argv)
                }
            }
            _ => None,
        }
    }

    /// Python module the entrypoint runs with `-m`, if any
    pub fn entry_module(&self) -> Option<&str> {
        match self.stage(StageKind::Entrypoint).map(|s| &s.spec) {
            Some(StageSpec::Command { args, .. }) => {
                let pos = args.iter().position(|a| a == "-m")?;
                args.get(pos + 1).map(String::as_str)
            }
            _ => None,
        }
    }

    /// Every kind present exactly once, in build order
    pub fn check_structure(&self) -> Result<(), DescriptorError> {
        let mut seen = HashSet::new();
        for stage in &self.stages {
            if !seen.insert(stage.kind) {
                return Err(DescriptorError::DuplicateStage(stage.kind));
            }
        }
        for kind in StageKind::ALL {
            if !seen.contains(&kind) {
                return Err(DescriptorError::MissingStage(kind));
            }
        }
        Ok(())
    }

    /// Lower stages into Dockerfile instructions
    ///
    /// Adjacent apt stages share one `RUN`; labels and environment follow
    /// `FROM` and carry no stage.
    pub fn instructions(&self) -> Vec<(Vec<StageKind>, Instruction)> {
        let mut out: Vec<(Vec<StageKind>, Instruction)> = Vec::new();

        for stage in &self.stages {
            let instruction = lower(stage);

            if stage.kind.is_apt() {
                if let Some((kinds, Instruction::Run { command })) = out.last_mut() {
                    if kinds.last().map(StageKind::is_apt).unwrap_or(false) {
                        command.push_str(" && ");
                        if let Instruction::Run { command: next } = &instruction {
                            command.push_str(next);
                        }
                        kinds.push(stage.kind);
                        continue;
                    }
                }
            }

            out.push((vec![stage.kind], instruction));

            if stage.kind == StageKind::BaseImage {
                if !self.labels.is_empty() {
                    out.push((
                        Vec::new(),
                        Instruction::Label {
                            labels: self
                                .labels
                                .iter()
                                .map(|(k, v)| (k.clone(), v.clone()))
                                .collect(),
                        },
                    ));
                }
                if !self.env.is_empty() {
                    out.push((
                        Vec::new(),
                        Instruction::Env {
                            vars: self.env.clone(),
                        },
                    ));
                }
            }
        }

        out
    }

    /// Recover a descriptor from Dockerfile text
    pub fn from_dockerfile(content: &str) -> Result<Self, DescriptorError> {
        let located = dockerfile::parse_located(content)?;
        let mut descriptor = Self::new(Vec::new());

        for item in located {
            match item.instruction {
                Instruction::Label { labels } => descriptor.labels.extend(labels),
                Instruction::Env { vars } => descriptor.env.extend(vars),
                other => {
                    for stage in classify(item.line, &other, &descriptor.stages)? {
                        descriptor.push_stage(stage);
                    }
                }
            }
        }

        debug!(
            stages = descriptor.stages.len(),
            "Recovered descriptor from Dockerfile"
        );
        Ok(descriptor)
    }

    // Consecutive pieces of the same kind (e.g. `apt-get update` then
    // `apt-get upgrade`) fold into one stage
    fn push_stage(&mut self, stage: Stage) {
        if let Some(last) = self.stages.last_mut() {
            if last.kind == stage.kind {
                if let Some(merged) = merge_specs(&last.spec, &stage.spec) {
                    last.spec = merged;
                    return;
                }
            }
        }
        self.stages.push(stage);
    }
}

fn lower(stage: &Stage) -> Instruction {
    match &stage.spec {
        StageSpec::Image { image } => Instruction::From {
            image: image.to_string(),
            alias: None,
        },
        StageSpec::Refresh { upgrade } => Instruction::Run {
            command: if *upgrade {
                "apt-get update && apt-get upgrade -y".to_string()
            } else {
                "apt-get update".to_string()
            },
        },
        StageSpec::Packages { packages } => Instruction::Run {
            command: format!(
                "apt-get install -y --no-install-recommends {}",
                packages.join(" ")
            ),
        },
        StageSpec::Paths { paths } => Instruction::Run {
            command: format!("rm -rf {}", paths.join(" ")),
        },
        StageSpec::Path { path } => Instruction::Workdir { path: path.clone() },
        StageSpec::Copy { src, dest } => Instruction::Copy {
            sources: vec![src.clone()],
            dest: dest.clone(),
            flags: Vec::new(),
        },
        StageSpec::Install {
            manifest,
            upgrade_pip,
            no_cache,
        } => {
            let mut parts = Vec::new();
            if *upgrade_pip {
                parts.push("pip install --upgrade pip".to_string());
            }
            let cache = if *no_cache { " --no-cache-dir" } else { "" };
            parts.push(format!("pip install{} -r {}", cache, manifest));
            Instruction::Run {
                command: parts.join(" && "),
            }
        }
        StageSpec::Command {
            program,
            args,
            shell,
            entrypoint,
        } => {
            let line = if *shell {
                let mut words = vec![program.clone()];
                words.extend(args.iter().cloned());
                CommandLine::shell(words.join(" "))
            } else {
                let mut argv = vec![program.clone()];
                argv.extend(args.iter().cloned());
                CommandLine::exec(argv)
            };
            if *entrypoint {
                Instruction::Entrypoint(line)
            } else {
                Instruction::Cmd(line)
            }
        }
    }
}

fn merge_specs(a: &StageSpec, b: &StageSpec) -> Option<StageSpec> {
    match (a, b) {
        (StageSpec::Refresh { upgrade: x }, StageSpec::Refresh { upgrade: y }) => {
            Some(StageSpec::Refresh { upgrade: *x || *y })
        }
        (StageSpec::Packages { packages: x }, StageSpec::Packages { packages: y }) => {
            let mut packages = x.clone();
            packages.extend(y.iter().cloned());
            Some(StageSpec::Packages { packages })
        }
        (StageSpec::Paths { paths: x }, StageSpec::Paths { paths: y }) => {
            let mut paths = x.clone();
            paths.extend(y.iter().cloned());
            Some(StageSpec::Paths { paths })
        }
        (
            StageSpec::Install {
                manifest: m1,
                upgrade_pip: u1,
                no_cache: c1,
            },
            StageSpec::Install {
                manifest: m2,
                upgrade_pip: u2,
                no_cache: c2,
            },
        ) if m1.is_empty() || m2.is_empty() => Some(StageSpec::Install {
            manifest: if m1.is_empty() { m2.clone() } else { m1.clone() },
            upgrade_pip: *u1 || *u2,
            // a pip self-upgrade carries no manifest, so only the install
            // segment decides caching
            no_cache: if m2.is_empty() { *c1 } else { *c2 },
        }),
        _ => None,
    }
}

fn classify_run_segment(segment: &str) -> Option<Stage> {
    let words: Vec<&str> = segment.split_whitespace().collect();
    let (program, rest) = words.split_first()?;
    let program = program.rsplit('/').next().unwrap_or(*program);

    match (program, rest) {
        ("apt-get" | "apt", [sub, ..]) if *sub == "update" => Some(Stage::new(
            StageKind::SystemUpgrade,
            StageSpec::Refresh { upgrade: false },
        )),
        ("apt-get" | "apt", [sub, ..]) if *sub == "upgrade" || *sub == "dist-upgrade" => {
            Some(Stage::new(
                StageKind::SystemUpgrade,
                StageSpec::Refresh { upgrade: true },
            ))
        }
        ("apt-get" | "apt", [sub, tail @ ..]) if *sub == "install" => Some(Stage::new(
            StageKind::ToolchainInstall,
            StageSpec::Packages {
                packages: tail
                    .iter()
                    .filter(|w| !w.starts_with('-'))
                    .map(|w| w.to_string())
                    .collect(),
            },
        )),
        ("rm", [flags, paths @ ..])
            if flags.starts_with('-') && paths.iter().any(|p| is_apt_lists_path(p)) =>
        {
            Some(Stage::new(
                StageKind::CacheCleanup,
                StageSpec::Paths {
                    paths: paths.iter().map(|p| p.to_string()).collect(),
                },
            ))
        }
        _ => classify_pip(&words),
    }
}

fn classify_pip(words: &[&str]) -> Option<Stage> {
    // `pip install ...`, `pip3 install ...` or `python -m pip install ...`
    let install_at = words.iter().position(|w| *w == "install")?;
    let invoker = &words[..install_at];
    let is_pip = match invoker {
        [pip] => pip.starts_with("pip"),
        [python, "-m", "pip"] => python.starts_with("python"),
        _ => false,
    };
    if !is_pip {
        return None;
    }

    let args = &words[install_at + 1..];
    let no_cache = args.contains(&"--no-cache-dir");
    let manifest = args
        .iter()
        .position(|w| *w == "-r" || *w == "--requirement")
        .and_then(|i| args.get(i + 1))
        .map(|m| m.to_string())
        .or_else(|| {
            args.iter()
                .find_map(|w| w.strip_prefix("--requirement=").map(str::to_string))
        });

    let spec = match manifest {
        Some(manifest) => StageSpec::Install {
            manifest,
            upgrade_pip: false,
            no_cache,
        },
        None if args.iter().any(|w| *w == "--upgrade" || *w == "-U") && args.contains(&"pip") => {
            StageSpec::Install {
                manifest: String::new(),
                upgrade_pip: true,
                no_cache,
            }
        }
        None => return None,
    };
    Some(Stage::new(StageKind::DependencyInstall, spec))
}

fn classify(line: usize, instruction: &Instruction, existing: &[Stage]) -> Result<Vec<Stage>, DescriptorError> {
    let unclassifiable = || DescriptorError::Unclassifiable {
        line,
        instruction: instruction.keyword().to_string(),
    };

    let stages = match instruction {
        Instruction::From { image, .. } => vec![Stage::new(
            StageKind::BaseImage,
            StageSpec::Image {
                image: ImageReference::parse(image)?,
            },
        )],
        Instruction::Run { command } => command
            .split("&&")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|segment| classify_run_segment(segment).ok_or_else(unclassifiable))
            .collect::<Result<Vec<_>, _>>()?,
        Instruction::Workdir { path } => vec![Stage::new(
            StageKind::WorkingDirectory,
            StageSpec::Path { path: path.clone() },
        )],
        Instruction::Copy { sources, dest, .. } => {
            let [src] = sources.as_slice() else {
                return Err(unclassifiable());
            };
            let manifest_copied = existing.iter().any(|s| s.kind == StageKind::ManifestCopy);
            let kind = if src == "." || src == "./" || src.ends_with('/') || manifest_copied {
                StageKind::SourceCopy
            } else {
                StageKind::ManifestCopy
            };
            vec![Stage::new(
                kind,
                StageSpec::Copy {
                    src: src.clone(),
                    dest: dest.clone(),
                },
            )]
        }
        Instruction::Cmd(cmd) | Instruction::Entrypoint(cmd) => {
            let entrypoint = matches!(instruction, Instruction::Entrypoint(_));
            let spec = if cmd.shell {
                let words: Vec<&str> = cmd.args.iter().flat_map(|a| a.split_whitespace()).collect();
                let (program, args) = words.split_first().ok_or_else(unclassifiable)?;
                StageSpec::Command {
                    program: program.to_string(),
                    args: args.iter().map(|a| a.to_string()).collect(),
                    shell: true,
                    entrypoint,
                }
            } else {
                let (program, args) = cmd.args.split_first().ok_or_else(unclassifiable)?;
                StageSpec::Command {
                    program: program.clone(),
                    args: args.to_vec(),
                    shell: false,
                    entrypoint,
                }
            };
            vec![Stage::new(StageKind::Entrypoint, spec)]
        }
        Instruction::Env { .. } | Instruction::Label { .. } => Vec::new(),
    };

    Ok(stages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[test]
    fn test_standard_has_nine_ordered_stages() {
        let descriptor = BuildDescriptor::standard(&DescriptorSettings::default());
        let kinds: Vec<StageKind> = descriptor.stages().iter().map(|s| s.kind).collect();
        assert_eq!(kinds, StageKind::ALL.to_vec());
        assert!(descriptor.check_structure().is_ok());
    }

    #[test]
    fn test_entrypoint_command() {
        let descriptor = BuildDescriptor::standard(&DescriptorSettings::default());
        assert_eq!(
            descriptor.entrypoint_command(),
            Some(vec![
                "python".to_string(),
                "-m".to_string(),
                "app.main".to_string()
            ])
        );
        assert_eq!(descriptor.entry_module(), Some("app.main"));
        assert_eq!(descriptor.workdir(), Some("/app"));
    }

    #[test]
    fn test_instructions_merge_apt_stages() {
        let descriptor = BuildDescriptor::standard(&DescriptorSettings::default());
        let instructions = descriptor.instructions();
        assert_eq!(instructions.len(), 7);

        let (kinds, run) = &instructions[1];
        assert_eq!(
            kinds,
            &vec![
                StageKind::SystemUpgrade,
                StageKind::ToolchainInstall,
                StageKind::CacheCleanup
            ]
        );
        assert_eq!(
            run,
            &Instruction::Run {
                command: "apt-get update && apt-get upgrade -y && apt-get install -y \
                          --no-install-recommends build-essential && rm -rf /var/lib/apt/lists/*"
                    .into()
            }
        );

        let (kinds, run) = &instructions[4];
        assert_eq!(kinds, &vec![StageKind::DependencyInstall]);
        assert_eq!(
            run,
            &Instruction::Run {
                command: "pip install --upgrade pip && pip install --no-cache-dir -r requirements.txt"
                    .into()
            }
        );
    }

    #[test]
    fn test_labels_follow_from_without_stage() {
        let mut settings = DescriptorSettings::default();
        settings
            .labels
            .insert("org.opencontainers.image.title".into(), "bot".into());
        let instructions = BuildDescriptor::standard(&settings).instructions();
        assert!(instructions[1].0.is_empty());
        assert_eq!(instructions[1].1.keyword(), "LABEL");
    }

    #[parameterized(
        tagged = { "python:3.12-slim" },
        untagged = { "python" },
        registry_untagged = { "localhost:5000/python" },
        digest_pinned = { "python@sha256:0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef" },
    )]
    fn test_render_parse_classify_round_trip(base_image: &str) {
        let mut settings = DescriptorSettings::default();
        settings.toolchain = vec!["build-essential".into(), "libffi-dev".into()];
        settings.base_image = ImageReference::parse(base_image).unwrap();
        settings.labels.insert("maintainer".into(), "ops team".into());
        let descriptor = BuildDescriptor::standard(&settings);

        let text = dockerfile::render(&descriptor);
        let recovered = BuildDescriptor::from_dockerfile(&text).unwrap();
        assert_eq!(recovered, descriptor);
    }

    #[test]
    fn test_round_trip_values_ending_in_backslash() {
        let mut settings = DescriptorSettings::default();
        settings.labels.insert("share".into(), "C:\\bots\\".into());
        settings.labels.insert("quote".into(), "say \"hi\" \\".into());
        let descriptor = BuildDescriptor::standard(&settings);

        let text = dockerfile::render(&descriptor);
        let recovered = BuildDescriptor::from_dockerfile(&text).unwrap();
        assert_eq!(recovered, descriptor);
        assert_eq!(
            recovered.stages().len(),
            StageKind::ALL.len(),
            "label line swallowed the next instruction:\n{}",
            text
        );
    }

    #[test]
    fn test_round_trip_custom_apt_lists_path() {
        let settings = DescriptorSettings {
            apt_lists_path: "/var/lib/apt/lists/".into(),
            ..Default::default()
        };
        let descriptor = BuildDescriptor::standard(&settings);

        let text = dockerfile::render(&descriptor);
        let recovered = BuildDescriptor::from_dockerfile(&text).unwrap();
        assert_eq!(recovered, descriptor);
    }

    #[parameterized(
        dir = { "/var/lib/apt/lists", true },
        glob = { "/var/lib/apt/lists/*", true },
        trailing_slash = { "/var/lib/apt/lists/", true },
        sibling = { "/var/lib/apt/lists-old", false },
        elsewhere = { "/tmp/lists", false },
    )]
    fn test_is_apt_lists_path(path: &str, expected: bool) {
        assert_eq!(is_apt_lists_path(path), expected);
    }

    #[test]
    fn test_from_handwritten_dockerfile() {
        let text = r#"
FROM python:3.11-slim
RUN apt-get update && apt-get upgrade -y
RUN apt-get install -y gcc && rm -rf /var/lib/apt/lists/*
WORKDIR /srv
COPY requirements.txt .
RUN python -m pip install -r requirements.txt
COPY . .
ENTRYPOINT ["python", "-m", "bot"]
"#;
        let descriptor = BuildDescriptor::from_dockerfile(text).unwrap();
        assert!(descriptor.check_structure().is_ok());
        assert_eq!(
            descriptor.stage(StageKind::ToolchainInstall).unwrap().spec,
            StageSpec::Packages {
                packages: vec!["gcc".into()]
            }
        );
        assert_eq!(
            descriptor.stage(StageKind::DependencyInstall).unwrap().spec,
            StageSpec::Install {
                manifest: "requirements.txt".into(),
                upgrade_pip: false,
                no_cache: false
            }
        );
        assert_eq!(descriptor.entry_module(), Some("bot"));
    }

    #[test]
    fn test_missing_stages_are_reported_by_structure_check() {
        let descriptor =
            BuildDescriptor::from_dockerfile("FROM python:3.11-slim\nCMD [\"python\"]\n").unwrap();
        assert!(matches!(
            descriptor.check_structure(),
            Err(DescriptorError::MissingStage(StageKind::SystemUpgrade))
        ));
    }

    #[test]
    fn test_duplicate_stage() {
        let descriptor = BuildDescriptor::from_dockerfile(
            "FROM python:3.11-slim\nWORKDIR /app\nWORKDIR /srv\n",
        )
        .unwrap();
        assert!(matches!(
            descriptor.check_structure(),
            Err(DescriptorError::DuplicateStage(StageKind::WorkingDirectory))
        ));
    }

    #[test]
    fn test_unclassifiable_run_names_line() {
        let err = BuildDescriptor::from_dockerfile("FROM python:3.11-slim\n\nRUN useradd bot\n")
            .unwrap_err();
        assert!(matches!(err, DescriptorError::Unclassifiable { line: 3, .. }));
    }

    #[test]
    fn test_invalid_base_image() {
        let err = BuildDescriptor::from_dockerfile("FROM Python:3.11\n").unwrap_err();
        assert!(matches!(err, DescriptorError::InvalidReference(_)));
    }
}
