//! Image references: `[registry/]repository[:tag][@digest]`

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use super::{Digest, ImageError};

pub const DEFAULT_TAG: &str = "latest";

fn repository_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*(?:/[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*)*$")
            .expect("valid regex")
    })
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").expect("valid regex"))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageReference {
    registry: Option<String>,
    repository: String,
    tag: Option<String>,
    digest: Option<Digest>,
}

impl ImageReference {
    pub fn parse(reference: &str) -> Result<Self, ImageError> {
        let invalid = |reason: &str| ImageError::InvalidReference {
            reference: reference.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = reference.trim();
        if trimmed.is_empty() {
            return Err(invalid("reference is empty"));
        }

        let (name_and_tag, digest) = match trimmed.split_once('@') {
            Some((name, digest)) => (name, Some(Digest::parse(digest)?)),
            None => (trimmed, None),
        };

        let last_slash = name_and_tag.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match name_and_tag[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                (&name_and_tag[..split], Some(&name_and_tag[split + 1..]))
            }
            None => (name_and_tag, None),
        };

        if let Some(tag) = tag {
            if !tag_re().is_match(tag) {
                return Err(invalid("tag is not valid"));
            }
        }

        let (registry, repository) = match name.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (Some(first.to_string()), rest)
            }
            _ => (None, name),
        };

        if !repository_re().is_match(repository) {
            return Err(invalid("repository must be lowercase path components"));
        }

        // `python` and `python:latest` name the same image
        let tag = match (tag, &digest) {
            (Some(tag), _) => Some(tag.to_string()),
            (None, None) => Some(DEFAULT_TAG.to_string()),
            (None, Some(_)) => None,
        };

        Ok(Self {
            registry,
            repository: repository.to_string(),
            tag,
            digest,
        })
    }

    pub fn registry(&self) -> Option<&str> {
        self.registry.as_deref()
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Tag, `latest` when neither tag nor digest was given
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&Digest> {
        self.digest.as_ref()
    }

    /// A digest-pinned reference always resolves to the same image
    pub fn is_pinned(&self) -> bool {
        self.digest.is_some()
    }

    /// Name without tag or digest, e.g. `ghcr.io/acme/bot`
    pub fn name(&self) -> String {
        match &self.registry {
            Some(registry) => format!("{}/{}", registry, self.repository),
            None => self.repository.clone(),
        }
    }

    /// Filesystem-safe form, used for layout directory names. The readable
    /// prefix can collide (`bot:v1-latest`, `bot-v1:latest`), the suffix
    /// taken from the full reference cannot.
    pub fn slug(&self) -> String {
        let tag = self.tag().unwrap_or("digest");
        let readable = format!("{}-{}", self.name(), tag).replace(['/', ':'], "-");
        let full = Digest::sha256(self.to_string().as_bytes());
        format!("{}-{}", readable, &full.hash()[..8])
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

impl FromStr for ImageReference {
    type Err = ImageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ImageReference {
    type Error = ImageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ImageReference> for String {
    fn from(value: ImageReference) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[parameterized(
        official = { "python:3.11-slim", None, "python", Some("3.11-slim") },
        untagged = { "python", None, "python", Some("latest") },
        namespaced = { "library/python:3.12", None, "library/python", Some("3.12") },
        registry = { "ghcr.io/acme/bot:v1", Some("ghcr.io"), "acme/bot", Some("v1") },
        registry_port = { "localhost:5000/bot:dev", Some("localhost:5000"), "bot", Some("dev") },
    )]
    fn test_parse_components(
        input: &str,
        registry: Option<&str>,
        repository: &str,
        tag: Option<&str>,
    ) {
        let reference = ImageReference::parse(input).unwrap();
        assert_eq!(reference.registry(), registry);
        assert_eq!(reference.repository(), repository);
        assert_eq!(reference.tag(), tag);
    }

    #[test]
    fn test_parse_digest_pinned() {
        let hash = "a".repeat(64);
        let reference = ImageReference::parse(&format!("python@sha256:{}", hash)).unwrap();
        assert!(reference.is_pinned());
        assert_eq!(reference.tag(), None);
        assert_eq!(reference.to_string(), format!("python@sha256:{}", hash));
    }

    #[parameterized(
        empty = { "" },
        uppercase = { "Python:3.11" },
        bad_tag = { "python:-slim" },
        trailing_slash = { "acme/" },
        bad_digest = { "python@sha256" },
    )]
    fn test_parse_rejects(input: &str) {
        assert!(ImageReference::parse(input).is_err());
    }

    #[test]
    fn test_display_adds_default_tag() {
        let reference = ImageReference::parse("botbox-app").unwrap();
        assert_eq!(reference.to_string(), "botbox-app:latest");
    }

    #[test]
    fn test_untagged_equals_latest() {
        let untagged = ImageReference::parse("python").unwrap();
        assert_eq!(untagged, ImageReference::parse("python:latest").unwrap());
        assert_eq!(ImageReference::parse(&untagged.to_string()).unwrap(), untagged);
    }

    #[test]
    fn test_serde_round_trip_untagged() {
        let reference = ImageReference::parse("python").unwrap();
        let json = serde_json::to_string(&reference).unwrap();
        assert_eq!(json, "\"python:latest\"");
        let back: ImageReference = serde_json::from_str(&json).unwrap();
        assert_eq!(back, reference);
    }

    #[test]
    fn test_slug() {
        let reference = ImageReference::parse("localhost:5000/acme/bot:v1").unwrap();
        assert!(reference.slug().starts_with("localhost-5000-acme-bot-v1-"));
        assert_eq!(reference.slug(), reference.clone().slug());
    }

    #[parameterized(
        dash_moves = { "bot:v1-latest", "bot-v1:latest" },
        slash_vs_dash = { "acme/bot:v1", "acme-bot:v1" },
        digests = {
            "bot@sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
            "bot@sha256:bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"
        },
    )]
    fn test_slug_distinguishes(a: &str, b: &str) {
        let a = ImageReference::parse(a).unwrap();
        let b = ImageReference::parse(b).unwrap();
        assert_ne!(a.slug(), b.slug());
    }
}
