//! A single requirements-file entry

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use super::ManifestError;

fn requirement_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?)\s*(?:\[([^\]]*)\])?\s*(.*)$")
            .expect("valid regex")
    })
}

fn specifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(===|==|!=|~=|>=|<=|>|<)\s*([A-Za-z0-9.*+!_-]+)$").expect("valid regex")
    })
}

fn separator_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[-_.]+").expect("valid regex"))
}

/// Canonical project name: lowercase with runs of `-`, `_`, `.` folded to `-`
pub fn normalize_name(name: &str) -> String {
    separator_re()
        .replace_all(&name.to_lowercase(), "-")
        .into_owned()
}

/// Comparable form of a version: lowercase, no `v` prefix or zero epoch,
/// trailing zero release segments dropped, pre-release spellings folded
/// (`1.0.0-RC1` and `1.0rc1` agree)
pub fn normalize_version(version: &str) -> String {
    let lowered = version.trim().to_lowercase();
    let v = lowered.strip_prefix('v').unwrap_or(&lowered);
    let v = v.strip_prefix("0!").unwrap_or(v);

    let split = v
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(v.len());
    let (release, rest) = v.split_at(split);

    let mut segments: Vec<String> = release
        .trim_end_matches('.')
        .split('.')
        .map(|s| s.parse::<u64>().map(|n| n.to_string()).unwrap_or_else(|_| s.to_string()))
        .collect();
    while segments.len() > 1 && segments.last().map(String::as_str) == Some("0") {
        segments.pop();
    }
    let release = segments.join(".");

    if rest.starts_with('+') {
        return format!("{}{}", release, rest);
    }
    let rest = rest.trim_start_matches(['-', '_', '.']);
    let rest = [("alpha", "a"), ("beta", "b"), ("preview", "rc"), ("pre", "rc"), ("c", "rc")]
        .iter()
        .find(|(long, _)| rest.starts_with(long) && !rest.starts_with("rc"))
        .map(|(long, short)| format!("{}{}", short, &rest[long.len()..]))
        .unwrap_or_else(|| rest.to_string());
    let rest = rest.replace(['-', '_'], ".");

    if rest.starts_with("post") || rest.starts_with("dev") {
        format!("{}.{}", release, rest)
    } else {
        format!("{}{}", release, rest)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "===")]
    ArbitraryEqual,
    #[serde(rename = "!=")]
    NotEqual,
    #[serde(rename = "~=")]
    Compatible,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = "<")]
    Less,
}

impl Operator {
    fn parse(op: &str) -> Option<Self> {
        Some(match op {
            "==" => Self::Equal,
            "===" => Self::ArbitraryEqual,
            "!=" => Self::NotEqual,
            "~=" => Self::Compatible,
            ">=" => Self::GreaterOrEqual,
            "<=" => Self::LessOrEqual,
            ">" => Self::Greater,
            "<" => Self::Less,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equal => "==",
            Self::ArbitraryEqual => "===",
            Self::NotEqual => "!=",
            Self::Compatible => "~=",
            Self::GreaterOrEqual => ">=",
            Self::LessOrEqual => "<=",
            Self::Greater => ">",
            Self::Less => "<",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSpecifier {
    pub op: Operator,
    pub version: String,
}

impl fmt::Display for VersionSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op.as_str(), self.version)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    /// Name as written in the manifest
    pub name: String,
    pub normalized: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extras: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub specifiers: Vec<VersionSpecifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// 1-based line in the manifest where the entry starts
    pub line: usize,
}

impl Requirement {
    pub fn parse(text: &str, line: usize) -> Result<Self, ManifestError> {
        let invalid = |reason: &str| ManifestError::InvalidRequirement {
            line,
            text: text.to_string(),
            reason: reason.to_string(),
        };

        let (body, marker) = match text.split_once(';') {
            Some((body, marker)) => {
                let marker = marker.trim();
                if marker.is_empty() {
                    return Err(invalid("empty environment marker"));
                }
                (body.trim(), Some(marker.to_string()))
            }
            None => (text.trim(), None),
        };

        let caps = requirement_re()
            .captures(body)
            .ok_or_else(|| invalid("expected a project name"))?;

        let name = caps[1].to_string();
        let extras = caps
            .get(2)
            .map(|m| {
                m.as_str()
                    .split(',')
                    .map(|e| normalize_name(e.trim()))
                    .filter(|e| !e.is_empty())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let rest = caps.get(3).map(|m| m.as_str().trim()).unwrap_or("");

        let mut url = None;
        let mut specifiers = Vec::new();

        if let Some(location) = rest.strip_prefix('@') {
            let location = location.trim();
            if location.is_empty() {
                return Err(invalid("direct reference is missing its URL"));
            }
            url = Some(location.to_string());
        } else if !rest.is_empty() {
            let inner = rest
                .strip_prefix('(')
                .and_then(|r| r.strip_suffix(')'))
                .unwrap_or(rest);
            for clause in inner.split(',') {
                let clause = clause.trim();
                let caps = specifier_re()
                    .captures(clause)
                    .ok_or_else(|| invalid("malformed version specifier"))?;
                let op = Operator::parse(&caps[1]).ok_or_else(|| invalid("unknown operator"))?;
                specifiers.push(VersionSpecifier {
                    op,
                    version: caps[2].to_string(),
                });
            }
        }

        Ok(Self {
            normalized: normalize_name(&name),
            name,
            extras,
            specifiers,
            marker,
            url,
            line,
        })
    }

    /// Exact version when the entry pins one (`==1.2.3` or `===1.2.3`, no wildcard)
    pub fn pinned_version(&self) -> Option<&str> {
        match self.specifiers.as_slice() {
            [only]
                if matches!(only.op, Operator::Equal | Operator::ArbitraryEqual)
                    && !only.version.contains('*') =>
            {
                Some(&only.version)
            }
            _ => None,
        }
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned_version().is_some()
    }
}

/// Canonical form: normalized name, sorted extras, specifiers, marker
impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.normalized)?;
        if !self.extras.is_empty() {
            let mut extras = self.extras.clone();
            extras.sort();
            write!(f, "[{}]", extras.join(","))?;
        }
        if let Some(url) = &self.url {
            write!(f, " @ {}", url)?;
        } else if !self.specifiers.is_empty() {
            let specs: Vec<String> = self.specifiers.iter().map(ToString::to_string).collect();
            write!(f, "{}", specs.join(","))?;
        }
        if let Some(marker) = &self.marker {
            write!(f, "; {}", marker)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[parameterized(
        lower = { "aiogram", "aiogram" },
        mixed = { "SQLAlchemy", "sqlalchemy" },
        underscores = { "python_dotenv", "python-dotenv" },
        runs = { "google.generativeai", "google-generativeai" },
        mixed_runs = { "Foo._-Bar", "foo-bar" },
    )]
    fn test_normalize_name(input: &str, expected: &str) {
        assert_eq!(normalize_name(input), expected);
    }

    #[parameterized(
        plain = { "3.4.1", "3.4.1" },
        trailing_zero = { "3.4.0", "3.4" },
        trailing_zeros = { "2.0.0", "2" },
        zero_only = { "0", "0" },
        leading_zeros = { "2024.01", "2024.1" },
        prefix = { "v1.2", "1.2" },
        epoch = { "0!1.2", "1.2" },
        rc_case = { "1.0RC1", "1rc1" },
        rc_separated = { "1.0.0-rc1", "1rc1" },
        alpha = { "2.0alpha2", "2a2" },
        beta = { "2.0.beta1", "2b1" },
        post = { "1.0-post1", "1.post1" },
        dev = { "1.0.dev3", "1.dev3" },
        local = { "1.0+cpu", "1+cpu" },
    )]
    fn test_normalize_version(input: &str, expected: &str) {
        assert_eq!(normalize_version(input), expected);
    }

    #[test]
    fn test_parse_pinned() {
        let req = Requirement::parse("aiogram==3.4.1", 1).unwrap();
        assert_eq!(req.name, "aiogram");
        assert_eq!(req.pinned_version(), Some("3.4.1"));
        assert!(req.marker.is_none());
    }

    #[test]
    fn test_parse_range_is_not_pinned() {
        let req = Requirement::parse("SQLAlchemy>=2.0,<3", 2).unwrap();
        assert_eq!(req.normalized, "sqlalchemy");
        assert_eq!(req.specifiers.len(), 2);
        assert_eq!(req.specifiers[0].op, Operator::GreaterOrEqual);
        assert_eq!(req.specifiers[1].op, Operator::Less);
        assert!(!req.is_pinned());
    }

    #[test]
    fn test_parse_wildcard_is_not_pinned() {
        let req = Requirement::parse("pytz==2024.*", 1).unwrap();
        assert!(!req.is_pinned());
    }

    #[test]
    fn test_parse_extras_and_marker() {
        let req =
            Requirement::parse("uvicorn[Standard, watchfiles]==0.29.0 ; python_version >= \"3.9\"", 4)
                .unwrap();
        assert_eq!(req.extras, vec!["standard", "watchfiles"]);
        assert_eq!(req.marker.as_deref(), Some("python_version >= \"3.9\""));
        assert_eq!(req.pinned_version(), Some("0.29.0"));
    }

    #[test]
    fn test_parse_direct_reference() {
        let req = Requirement::parse("edge-tts @ https://example.com/edge_tts-6.1.9.tar.gz", 3)
            .unwrap();
        assert_eq!(
            req.url.as_deref(),
            Some("https://example.com/edge_tts-6.1.9.tar.gz")
        );
        assert!(req.specifiers.is_empty());
        assert!(!req.is_pinned());
    }

    #[test]
    fn test_parse_parenthesized_specifiers() {
        let req = Requirement::parse("gTTS (>=2.5, !=2.5.2)", 1).unwrap();
        assert_eq!(req.specifiers.len(), 2);
        assert_eq!(req.specifiers[1].op, Operator::NotEqual);
    }

    #[parameterized(
        no_name = { "==1.0" },
        bad_operator = { "aiogram=>3" },
        dangling_url = { "aiogram @" },
        empty_marker = { "aiogram==3.4.1;" },
    )]
    fn test_parse_rejects(input: &str) {
        let err = Requirement::parse(input, 7).unwrap_err();
        assert!(err.to_string().contains("line 7"));
    }

    #[test]
    fn test_display_is_canonical() {
        let req = Requirement::parse("Python_Dotenv[B,a] >= 1.0 ; sys_platform == 'linux'", 1)
            .unwrap();
        assert_eq!(req.to_string(), "python-dotenv[a,b]>=1.0; sys_platform == 'linux'");
    }
}
