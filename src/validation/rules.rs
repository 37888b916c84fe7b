use crate::descriptor::{BuildDescriptor, StageKind, StageSpec};
use anyhow::Result;
use regex::Regex;
use std::sync::OnceLock;

pub trait ValidationRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn validate(&self, descriptor: &BuildDescriptor) -> Result<()>;
}

fn module_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*$").expect("valid regex")
    })
}

/// Dotted Python module path such as `app.main`
pub fn is_module_path(module: &str) -> bool {
    module_re().is_match(module)
}

pub struct StageOrderRule;

impl ValidationRule for StageOrderRule {
    fn name(&self) -> &'static str {
        "StageOrder"
    }

    fn validate(&self, descriptor: &BuildDescriptor) -> Result<()> {
        descriptor.check_structure()?;
        for (stage, expected) in descriptor.stages().iter().zip(StageKind::ALL) {
            if stage.kind != expected {
                anyhow::bail!(
                    "Stage {} runs where {} is expected",
                    stage.kind,
                    expected
                );
            }
        }
        Ok(())
    }
}

pub struct BaseImageRule;

impl ValidationRule for BaseImageRule {
    fn name(&self) -> &'static str {
        "BaseImage"
    }

    fn validate(&self, descriptor: &BuildDescriptor) -> Result<()> {
        let Some(image) = descriptor.base_image() else {
            anyhow::bail!("No base image declared");
        };
        if image.repository().is_empty() {
            anyhow::bail!("Base image repository cannot be empty");
        }
        Ok(())
    }
}

pub struct ManifestBeforeInstallRule;

impl ValidationRule for ManifestBeforeInstallRule {
    fn name(&self) -> &'static str {
        "ManifestBeforeInstall"
    }

    fn validate(&self, descriptor: &BuildDescriptor) -> Result<()> {
        let Some(install) = descriptor.stage(StageKind::DependencyInstall) else {
            return Ok(());
        };
        let StageSpec::Install { manifest, .. } = &install.spec else {
            anyhow::bail!("Dependency install stage has no install spec");
        };
        if manifest.is_empty() {
            anyhow::bail!("Dependency install does not name a manifest");
        }

        let copied = descriptor
            .stage(StageKind::ManifestCopy)
            .and_then(|s| s.copied_path());
        match copied {
            Some(path) if path == manifest.trim_start_matches("./") => Ok(()),
            Some(path) => anyhow::bail!(
                "Dependency install reads '{}' but the manifest was copied to '{}'",
                manifest,
                path
            ),
            None => anyhow::bail!("Manifest '{}' is installed but never copied", manifest),
        }
    }
}

pub struct CacheCleanupRule {
    pub apt_lists_path: String,
}

impl CacheCleanupRule {
    pub fn new(apt_lists_path: impl Into<String>) -> Self {
        Self {
            apt_lists_path: apt_lists_path.into(),
        }
    }
}

impl Default for CacheCleanupRule {
    fn default() -> Self {
        Self::new(crate::descriptor::DEFAULT_APT_LISTS)
    }
}

impl ValidationRule for CacheCleanupRule {
    fn name(&self) -> &'static str {
        "CacheCleanup"
    }

    fn validate(&self, descriptor: &BuildDescriptor) -> Result<()> {
        let Some(cleanup) = descriptor.stage(StageKind::CacheCleanup) else {
            return Ok(());
        };
        match &cleanup.spec {
            StageSpec::Paths { paths } if paths.iter().any(|p| p == &self.apt_lists_path) => Ok(()),
            StageSpec::Paths { paths } => anyhow::bail!(
                "Cache cleanup removes [{}] but not {}",
                paths.join(", "),
                self.apt_lists_path
            ),
            _ => anyhow::bail!("Cache cleanup stage has no paths"),
        }
    }
}

pub struct NoCacheInstallRule;

impl ValidationRule for NoCacheInstallRule {
    fn name(&self) -> &'static str {
        "NoCacheInstall"
    }

    fn validate(&self, descriptor: &BuildDescriptor) -> Result<()> {
        match descriptor.stage(StageKind::DependencyInstall).map(|s| &s.spec) {
            Some(StageSpec::Install { no_cache: false, .. }) => {
                anyhow::bail!("pip install runs without --no-cache-dir")
            }
            _ => Ok(()),
        }
    }
}

pub struct EntrypointRule;

impl ValidationRule for EntrypointRule {
    fn name(&self) -> &'static str {
        "Entrypoint"
    }

    fn validate(&self, descriptor: &BuildDescriptor) -> Result<()> {
        let Some(stage) = descriptor.stage(StageKind::Entrypoint) else {
            return Ok(());
        };
        let StageSpec::Command {
            program,
            args,
            shell,
            ..
        } = &stage.spec
        else {
            anyhow::bail!("Entrypoint stage has no command");
        };

        if program.is_empty() {
            anyhow::bail!("Entrypoint command cannot be empty");
        }
        if *shell {
            anyhow::bail!("Entrypoint must use exec form, not shell form");
        }
        if let Some(pos) = args.iter().position(|a| a == "-m") {
            match args.get(pos + 1) {
                Some(module) if is_module_path(module) => {}
                Some(module) => anyhow::bail!("'{}' is not a Python module path", module),
                None => anyhow::bail!("Entrypoint passes -m without a module"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DescriptorSettings;
    use yare::parameterized;

    fn standard() -> BuildDescriptor {
        BuildDescriptor::standard(&DescriptorSettings::default())
    }

    #[parameterized(
        simple = { "app", true },
        dotted = { "app.main", true },
        underscore = { "_bot.run_2", true },
        dash = { "my-app.main", false },
        leading_digit = { "1app", false },
        trailing_dot = { "app.", false },
        empty = { "", false },
    )]
    fn test_is_module_path(module: &str, expected: bool) {
        assert_eq!(is_module_path(module), expected);
    }

    #[test]
    fn test_all_rules_accept_standard() {
        let descriptor = standard();
        assert!(StageOrderRule.validate(&descriptor).is_ok());
        assert!(BaseImageRule.validate(&descriptor).is_ok());
        assert!(ManifestBeforeInstallRule.validate(&descriptor).is_ok());
        assert!(CacheCleanupRule::default().validate(&descriptor).is_ok());
        assert!(NoCacheInstallRule.validate(&descriptor).is_ok());
        assert!(EntrypointRule.validate(&descriptor).is_ok());
    }

    #[test]
    fn test_stage_order_rejects_swapped_stages() {
        let mut stages = standard().stages().to_vec();
        stages.swap(5, 6);
        let err = StageOrderRule
            .validate(&BuildDescriptor::new(stages))
            .unwrap_err();
        assert!(err.to_string().contains("dependency install"));
    }

    #[test]
    fn test_manifest_mismatch() {
        let text = "FROM python:3.11-slim\nCOPY requirements.txt .\n\
                    RUN pip install --no-cache-dir -r requirements-dev.txt\n";
        let descriptor = BuildDescriptor::from_dockerfile(text).unwrap();
        let err = ManifestBeforeInstallRule.validate(&descriptor).unwrap_err();
        assert!(err.to_string().contains("requirements-dev.txt"));
    }

    #[test]
    fn test_cached_install_rejected() {
        let descriptor = BuildDescriptor::from_dockerfile(
            "FROM python:3.11-slim\nRUN pip install -r requirements.txt\n",
        )
        .unwrap();
        assert!(NoCacheInstallRule.validate(&descriptor).is_err());
    }

    #[test]
    fn test_cleanup_of_other_path_rejected() {
        let descriptor = BuildDescriptor::from_dockerfile(
            "FROM python:3.11-slim\nRUN rm -rf /var/lib/apt/lists/partial /tmp/x\n",
        )
        .unwrap();
        assert!(CacheCleanupRule::default().validate(&descriptor).is_err());
    }

    #[test]
    fn test_shell_form_entrypoint_rejected() {
        let descriptor =
            BuildDescriptor::from_dockerfile("FROM python:3.11-slim\nCMD python -m app.main\n")
                .unwrap();
        let err = EntrypointRule.validate(&descriptor).unwrap_err();
        assert!(err.to_string().contains("exec form"));
    }

    #[test]
    fn test_bad_module_rejected() {
        let descriptor = BuildDescriptor::from_dockerfile(
            "FROM python:3.11-slim\nCMD [\"python\", \"-m\", \"my-bot\"]\n",
        )
        .unwrap();
        assert!(EntrypointRule.validate(&descriptor).is_err());
    }
}
