use crate::descriptor::BuildDescriptor;
use crate::validation::rules::{
    BaseImageRule, CacheCleanupRule, EntrypointRule, ManifestBeforeInstallRule,
    NoCacheInstallRule, StageOrderRule, ValidationRule,
};
use anyhow::Result;
use serde::Serialize;

/// A rule that rejected the descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleFailure {
    pub rule: &'static str,
    pub message: String,
}

pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: Vec<Box<dyn ValidationRule>>) -> Self {
        Self { rules }
    }

    /// Standard rules, with cache cleanup expecting `apt_lists_path`
    pub fn with_apt_lists_path(apt_lists_path: &str) -> Self {
        Self::with_rules(standard_rules(CacheCleanupRule::new(apt_lists_path)))
    }

    /// Stop at the first failing rule
    pub fn validate(&self, descriptor: &BuildDescriptor) -> Result<()> {
        for rule in &self.rules {
            if let Err(e) = rule.validate(descriptor) {
                anyhow::bail!("[{}] {}", rule.name(), e);
            }
        }
        Ok(())
    }

    /// Run every rule and collect all failures
    pub fn validate_all(&self, descriptor: &BuildDescriptor) -> Vec<RuleFailure> {
        self.rules
            .iter()
            .filter_map(|rule| {
                rule.validate(descriptor).err().map(|e| RuleFailure {
                    rule: rule.name(),
                    message: e.to_string(),
                })
            })
            .collect()
    }
}

fn standard_rules(cache_cleanup: CacheCleanupRule) -> Vec<Box<dyn ValidationRule>> {
    vec![
        Box::new(StageOrderRule),
        Box::new(BaseImageRule),
        Box::new(ManifestBeforeInstallRule),
        Box::new(cache_cleanup),
        Box::new(NoCacheInstallRule),
        Box::new(EntrypointRule),
    ]
}

impl Default for Validator {
    fn default() -> Self {
        Self::with_rules(standard_rules(CacheCleanupRule::default()))
    }
}
