//! Post-build checks over a produced image
//!
//! Each check yields a [`CheckResult`] instead of an error so a report can
//! list every property that does or does not hold. Errors are reserved for
//! a backend that cannot answer.

use crate::backend::{BuildBackend, BuildError};
use crate::context::module_candidates;
use crate::image::{ImageConfig, ImageReference};
use crate::manifest::{normalize_version, PackageSet};
use serde::Serialize;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

impl CheckResult {
    pub fn pass(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            detail: detail.into(),
        }
    }

    pub fn fail(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.passed { "ok" } else { "FAILED" };
        write!(f, "[{}] {}: {}", mark, self.name, self.detail)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VerificationReport {
    pub image: String,
    pub checks: Vec<CheckResult>,
}

impl VerificationReport {
    pub fn new(image: &ImageReference) -> Self {
        Self {
            image: image.to_string(),
            checks: Vec::new(),
        }
    }

    pub fn push(&mut self, check: CheckResult) {
        self.checks.push(check);
    }

    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| !c.passed)
    }
}

fn render_argv(argv: &[String]) -> String {
    format!("{:?}", argv)
}

/// The image starts exactly the declared command
pub fn check_entrypoint(config: &ImageConfig, expected: &[String]) -> CheckResult {
    const NAME: &str = "entrypoint";
    let actual = config.default_command();
    if actual == expected {
        CheckResult::pass(NAME, render_argv(&actual))
    } else {
        CheckResult::fail(
            NAME,
            format!(
                "expected {}, image runs {}",
                render_argv(expected),
                render_argv(&actual)
            ),
        )
    }
}

/// Two builds from the same inputs installed the same packages
pub fn check_reproducible(first: &PackageSet, second: &PackageSet) -> CheckResult {
    const NAME: &str = "reproducible packages";
    let diff = first.diff(second);
    if diff.is_empty() {
        CheckResult::pass(NAME, format!("{} packages identical", first.len()))
    } else {
        CheckResult::fail(NAME, diff.to_string())
    }
}

/// The file behind `python -m <module>` exists under the working directory
pub async fn check_source_present(
    backend: &dyn BuildBackend,
    image: &ImageReference,
    module: &str,
) -> Result<CheckResult, BuildError> {
    const NAME: &str = "entry module present";
    let candidates = module_candidates(module);
    for candidate in &candidates {
        if backend.contains_path(image, candidate).await? {
            debug!(image = %image, path = %candidate, "Found entry module");
            return Ok(CheckResult::pass(NAME, candidate.clone()));
        }
    }
    Ok(CheckResult::fail(
        NAME,
        format!("none of {} found in the working directory", candidates.join(", ")),
    ))
}

/// Installed version satisfies a pin from
/// [`crate::manifest::DependencyManifest::expected_pins`]
fn satisfies_pin(pinned: &str, installed: &str) -> bool {
    match pinned.strip_prefix('=') {
        Some(literal) => literal == installed,
        None => normalize_version(pinned) == normalize_version(installed),
    }
}

/// Every package the manifest pins is installed at an equal version
pub fn check_pinned_installed(expected: &PackageSet, installed: &PackageSet) -> CheckResult {
    const NAME: &str = "pinned packages installed";
    let missing: Vec<String> = expected
        .iter()
        .filter(|(name, version)| {
            !installed
                .get(name)
                .is_some_and(|found| satisfies_pin(version, found))
        })
        .map(|(name, version)| format!("{}=={}", name, version))
        .collect();
    if missing.is_empty() {
        CheckResult::pass(NAME, format!("{} pinned packages", expected.len()))
    } else {
        CheckResult::fail(NAME, format!("missing {}", missing.join(", ")))
    }
}

/// What to verify an image against
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    pub expected_command: Vec<String>,
    pub entry_module: String,
    /// Compare installed packages with a second build of the same inputs
    pub against: Option<ImageReference>,
    /// Packages the manifest pins
    pub expected_packages: Option<PackageSet>,
}

/// Run every applicable check against `image`
pub async fn verify_image(
    backend: &dyn BuildBackend,
    image: &ImageReference,
    options: &VerifyOptions,
) -> Result<VerificationReport, BuildError> {
    let mut report = VerificationReport::new(image);

    let config = backend.inspect(image).await?;
    report.push(check_entrypoint(&config, &options.expected_command));
    report.push(check_source_present(backend, image, &options.entry_module).await?);

    let needs_packages = options.against.is_some() || options.expected_packages.is_some();
    if needs_packages {
        let installed = backend.installed_packages(image).await?;
        if let Some(expected) = &options.expected_packages {
            report.push(check_pinned_installed(expected, &installed));
        }
        if let Some(other) = &options.against {
            let other_packages = backend.installed_packages(other).await?;
            report.push(check_reproducible(&installed, &other_packages));
        }
    }

    debug!(
        image = %image,
        checks = report.checks.len(),
        passed = report.passed(),
        "Verification finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_entrypoint_from_cmd() {
        let config = ImageConfig {
            cmd: argv(&["python", "-m", "app.main"]),
            ..Default::default()
        };
        assert!(check_entrypoint(&config, &argv(&["python", "-m", "app.main"])).passed);
    }

    #[test]
    fn test_entrypoint_from_entrypoint_and_cmd() {
        let config = ImageConfig {
            entrypoint: argv(&["python"]),
            cmd: argv(&["-m", "app.main"]),
            ..Default::default()
        };
        assert!(check_entrypoint(&config, &argv(&["python", "-m", "app.main"])).passed);
    }

    #[test]
    fn test_entrypoint_mismatch_reports_both() {
        let config = ImageConfig {
            cmd: argv(&["python3", "bot.py"]),
            ..Default::default()
        };
        let result = check_entrypoint(&config, &argv(&["python", "-m", "app.main"]));
        assert!(!result.passed);
        assert!(result.detail.contains("bot.py"));
        assert!(result.detail.contains("app.main"));
    }

    #[test]
    fn test_reproducible() {
        let a = PackageSet::from_freeze("aiogram==3.4.1\npytz==2024.1\n");
        let b = PackageSet::from_freeze("pytz==2024.1\naiogram==3.4.1\n");
        assert!(check_reproducible(&a, &b).passed);

        let c = PackageSet::from_freeze("aiogram==3.5.0\npytz==2024.1\n");
        let result = check_reproducible(&a, &c);
        assert!(!result.passed);
        assert!(result.detail.contains("aiogram"));
    }

    #[test]
    fn test_pinned_installed() {
        let expected = PackageSet::from_freeze("aiogram==3.4.1\n");
        let installed = PackageSet::from_freeze("aiogram==3.4.1\naiohttp==3.9.3\n");
        assert!(check_pinned_installed(&expected, &installed).passed);

        let stale = PackageSet::from_freeze("aiogram==3.3.0\n");
        assert!(!check_pinned_installed(&expected, &stale).passed);
    }

    #[parameterized(
        trailing_zero = { "aiogram==3.4", "aiogram==3.4.0", true },
        pre_release_case = { "aiogram==1.0RC1", "aiogram==1.0rc1", true },
        different = { "aiogram==3.4", "aiogram==3.4.1", false },
        literal_exact = { "aiogram===3.4", "aiogram==3.4", true },
        literal_not_normalized = { "aiogram===3.4", "aiogram==3.4.0", false },
    )]
    fn test_pinned_installed_equivalent_versions(expected: &str, installed: &str, passes: bool) {
        let expected = PackageSet::from_freeze(expected);
        let installed = PackageSet::from_freeze(installed);
        assert_eq!(check_pinned_installed(&expected, &installed).passed, passes);
    }

    #[test]
    fn test_report_passes_only_when_all_checks_pass() {
        let image = ImageReference::parse("bot:latest").unwrap();
        let mut report = VerificationReport::new(&image);
        assert!(report.passed());

        report.push(CheckResult::pass("a", ""));
        assert!(report.passed());
        report.push(CheckResult::fail("b", "nope"));
        assert!(!report.passed());
        assert_eq!(report.failures().count(), 1);
        assert_eq!(report.checks[1].to_string(), "[FAILED] b: nope");
    }
}
