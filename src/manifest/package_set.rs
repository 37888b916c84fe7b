use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::requirement::normalize_name;
use crate::image::Digest;

/// Installed (or expected-installed) distributions keyed by normalized name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageSet {
    packages: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PackageDiff {
    pub added: Vec<(String, String)>,
    pub removed: Vec<(String, String)>,
    /// name, version in self, version in other
    pub changed: Vec<(String, String, String)>,
}

impl PackageDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

impl fmt::Display for PackageDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        parts.extend(self.added.iter().map(|(n, v)| format!("+{}=={}", n, v)));
        parts.extend(self.removed.iter().map(|(n, v)| format!("-{}=={}", n, v)));
        parts.extend(
            self.changed
                .iter()
                .map(|(n, a, b)| format!("~{} {} -> {}", n, a, b)),
        );
        write!(f, "{}", parts.join(", "))
    }
}

impl PackageSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, version: &str) {
        self.packages
            .insert(normalize_name(name), version.trim().to_string());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.packages.get(&normalize_name(name)).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.packages.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Parse `pip freeze` output
    ///
    /// Editable installs and comment lines are skipped; direct references
    /// (`name @ url`) keep the URL as their version.
    pub fn from_freeze(output: &str) -> Self {
        let mut set = Self::new();
        for line in output.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') || line.starts_with('-') {
                continue;
            }
            if let Some((name, version)) = line.split_once("==") {
                set.insert(name.trim(), version);
            } else if let Some((name, url)) = line.split_once(" @ ") {
                set.insert(name.trim(), &format!("@ {}", url.trim()));
            }
        }
        set
    }

    /// One `name==version` per line, sorted by name
    pub fn to_lines(&self) -> String {
        self.iter()
            .map(|(n, v)| {
                if v.starts_with('@') {
                    format!("{} {}\n", n, v)
                } else {
                    format!("{}=={}\n", n, v)
                }
            })
            .collect()
    }

    pub fn digest(&self) -> Digest {
        Digest::sha256(self.to_lines().as_bytes())
    }

    pub fn diff(&self, other: &PackageSet) -> PackageDiff {
        let mut diff = PackageDiff::default();
        for (name, version) in self.iter() {
            match other.packages.get(name) {
                None => diff.removed.push((name.to_string(), version.to_string())),
                Some(theirs) if theirs != version => {
                    diff.changed
                        .push((name.to_string(), version.to_string(), theirs.clone()))
                }
                Some(_) => {}
            }
        }
        for (name, version) in other.iter() {
            if !self.packages.contains_key(name) {
                diff.added.push((name.to_string(), version.to_string()));
            }
        }
        diff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FREEZE: &str = "aiogram==3.4.1\nAPScheduler==3.10.4\n-e git+https://example.com/x.git#egg=x\n\
                          python_dotenv==1.0.1\nedge-tts @ file:///wheels/edge_tts-6.1.9.whl\n";

    #[test]
    fn test_from_freeze() {
        let set = PackageSet::from_freeze(FREEZE);
        assert_eq!(set.len(), 4);
        assert_eq!(set.get("apscheduler"), Some("3.10.4"));
        assert_eq!(set.get("python-dotenv"), Some("1.0.1"));
        assert_eq!(
            set.get("edge_tts"),
            Some("@ file:///wheels/edge_tts-6.1.9.whl")
        );
    }

    #[test]
    fn test_to_lines_sorted() {
        let set = PackageSet::from_freeze("sqlalchemy==2.0.29\naiogram==3.4.1\n");
        assert_eq!(set.to_lines(), "aiogram==3.4.1\nsqlalchemy==2.0.29\n");
    }

    #[test]
    fn test_digest_ignores_input_order_and_case() {
        let a = PackageSet::from_freeze("aiogram==3.4.1\nPytz==2024.1\n");
        let b = PackageSet::from_freeze("pytz==2024.1\naiogram==3.4.1\n");
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn test_diff() {
        let before = PackageSet::from_freeze("aiogram==3.4.1\npytz==2024.1\ngtts==2.5.1\n");
        let after = PackageSet::from_freeze("aiogram==3.5.0\npytz==2024.1\nedge-tts==6.1.9\n");

        let diff = before.diff(&after);
        assert_eq!(diff.added, vec![("edge-tts".to_string(), "6.1.9".to_string())]);
        assert_eq!(diff.removed, vec![("gtts".to_string(), "2.5.1".to_string())]);
        assert_eq!(
            diff.changed,
            vec![(
                "aiogram".to_string(),
                "3.4.1".to_string(),
                "3.5.0".to_string()
            )]
        );
        assert_eq!(
            diff.to_string(),
            "+edge-tts==6.1.9, -gtts==2.5.1, ~aiogram 3.4.1 -> 3.5.0"
        );
        assert!(before.diff(&before).is_empty());
    }
}
