//! Image references and content digests
//!
//! Parses `[registry/]repository[:tag][@digest]` the way container tooling
//! does: a first path component containing `.` or `:` (or `localhost`) names
//! the registry, anything else lives on Docker Hub, and single-component Hub
//! names are expanded under `library/`.

use crate::error::{BaseImageError, BaseImageResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::str::FromStr;

/// Registry used when a reference names none
pub const DEFAULT_REGISTRY: &str = "index.docker.io";

/// Tag used when a reference carries neither tag nor digest
pub const DEFAULT_TAG: &str = "latest";

const MAX_TAG_LEN: usize = 128;

/// A content digest such as `sha256:0123...`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest {
    algorithm: String,
    hex: String,
}

impl Digest {
    /// Parse a digest string
    pub fn parse(value: &str) -> BaseImageResult<Self> {
        let (algorithm, hex) = value
            .split_once(':')
            .ok_or_else(|| BaseImageError::reference(value, "digest must be <algorithm>:<hex>"))?;

        let expected_len = match algorithm {
            "sha256" => 64,
            "sha512" => 128,
            _ => {
                return Err(BaseImageError::reference(
                    value,
                    format!("unsupported digest algorithm '{}'", algorithm),
                ))
            }
        };

        if hex.len() != expected_len
            || !hex
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        {
            return Err(BaseImageError::reference(
                value,
                format!("{} digest must be {} lowercase hex characters", algorithm, expected_len),
            ));
        }

        Ok(Self {
            algorithm: algorithm.to_string(),
            hex: hex.to_string(),
        })
    }

    /// SHA-256 digest of raw content (manifest bytes)
    pub fn sha256_of(content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content);
        Self {
            algorithm: "sha256".to_string(),
            hex: hex::encode(hasher.finalize()),
        }
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl FromStr for Digest {
    type Err = BaseImageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Digest {
    type Error = BaseImageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Digest> for String {
    fn from(digest: Digest) -> Self {
        digest.to_string()
    }
}

/// A parsed, normalized image reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    registry: String,
    repository: String,
    tag: Option<String>,
    digest: Option<Digest>,
}

impl Reference {
    /// Parse and normalize a reference string
    pub fn parse(input: &str) -> BaseImageResult<Self> {
        let raw = input.trim();
        if raw.is_empty() {
            return Err(BaseImageError::reference(input, "reference is empty"));
        }
        if raw.contains("://") {
            return Err(BaseImageError::reference(
                input,
                "reference must not include a URL scheme",
            ));
        }

        let (name_and_tag, digest) = match raw.split_once('@') {
            Some((rest, digest)) => (rest, Some(Digest::parse(digest)?)),
            None => (raw, None),
        };

        // A ':' after the last '/' separates the tag; earlier ones are ports
        let last_slash = name_and_tag.rfind('/').map_or(0, |i| i + 1);
        let (name, tag) = match name_and_tag[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                (
                    &name_and_tag[..split],
                    Some(name_and_tag[split + 1..].to_string()),
                )
            }
            None => (name_and_tag, None),
        };

        let (registry, repository) = split_registry(name);
        validate_registry(input, &registry)?;
        validate_repository(input, &repository)?;
        if let Some(ref tag) = tag {
            validate_tag(input, tag)?;
        }

        let tag = match (&tag, &digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            _ => tag,
        };

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Registry host (with optional port)
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// Repository path within the registry
    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&Digest> {
        self.digest.as_ref()
    }

    /// Whether the reference already names immutable content
    pub fn is_pinned(&self) -> bool {
        self.digest.is_some()
    }

    /// `registry/repository` without tag or digest
    pub fn name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// The manifest identifier used in registry API paths
    pub fn identifier(&self) -> String {
        match (&self.digest, &self.tag) {
            (Some(digest), _) => digest.to_string(),
            (None, Some(tag)) => tag.clone(),
            (None, None) => DEFAULT_TAG.to_string(),
        }
    }

    /// Rewrite as `name@digest`, dropping the tag
    pub fn pinned(&self, digest: Digest) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: None,
            digest: Some(digest),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        if let Some(ref tag) = self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(ref digest) = self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

impl FromStr for Reference {
    type Err = BaseImageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Reference {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

fn split_registry(name: &str) -> (String, String) {
    if let Some((first, rest)) = name.split_once('/') {
        if first.contains('.') || first.contains(':') || first == "localhost" {
            let registry = if first == "docker.io" {
                DEFAULT_REGISTRY
            } else {
                first
            };
            return (registry.to_string(), hub_repository(registry, rest));
        }
    }
    (
        DEFAULT_REGISTRY.to_string(),
        hub_repository(DEFAULT_REGISTRY, name),
    )
}

fn hub_repository(registry: &str, repository: &str) -> String {
    if registry == DEFAULT_REGISTRY && !repository.contains('/') {
        format!("library/{}", repository)
    } else {
        repository.to_string()
    }
}

fn validate_registry(input: &str, registry: &str) -> BaseImageResult<()> {
    let valid = !registry.is_empty()
        && registry
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':' | '[' | ']'));
    if valid {
        Ok(())
    } else {
        Err(BaseImageError::reference(
            input,
            format!("invalid registry '{}'", registry),
        ))
    }
}

fn validate_repository(input: &str, repository: &str) -> BaseImageResult<()> {
    for component in repository.split('/') {
        let starts_ok = component
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
        let chars_ok = component
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'));
        if !starts_ok || !chars_ok {
            return Err(BaseImageError::reference(
                input,
                format!(
                    "repository component '{}' must be lowercase alphanumerics separated by '.', '_' or '-'",
                    component
                ),
            ));
        }
    }
    Ok(())
}

fn validate_tag(input: &str, tag: &str) -> BaseImageResult<()> {
    let first_ok = tag
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_');
    let chars_ok = tag
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if !first_ok || !chars_ok || tag.len() > MAX_TAG_LEN {
        return Err(BaseImageError::reference(
            input,
            format!("invalid tag '{}'", tag),
        ));
    }
    Ok(())
}
