//! Target platforms and platform selection

use crate::error::{KoError, KoResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sentinel requesting every platform the base image offers
pub const ALL_PLATFORMS: &str = "all";

/// Platform assumed when none is requested
pub const DEFAULT_OS: &str = "linux";
pub const DEFAULT_ARCH: &str = "amd64";

/// An (os, architecture, variant) triple, serialized with OCI field names
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Platform {
    pub os: String,
    pub architecture: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    pub fn new(os: impl Into<String>, architecture: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            architecture: architecture.into(),
            variant: None,
        }
    }

    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    /// Whether `candidate` satisfies this requested platform.
    ///
    /// A request without a variant accepts any variant of the same os/arch.
    pub fn matches(&self, candidate: &Platform) -> bool {
        self.os == candidate.os
            && self.architecture == candidate.architecture
            && match self.variant {
                None => true,
                Some(ref v) => candidate.variant.as_deref() == Some(v.as_str()),
            }
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::new(DEFAULT_OS, DEFAULT_ARCH)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(ref variant) = self.variant {
            write!(f, "/{}", variant)?;
        }
        Ok(())
    }
}

impl FromStr for Platform {
    type Err = KoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('/').collect();
        if parts.iter().any(|p| p.is_empty()) || !(2..=3).contains(&parts.len()) {
            return Err(KoError::InvalidPlatform {
                value: s.to_string(),
                reason: "expected os/arch or os/arch/variant".to_string(),
            });
        }

        let mut platform = Self::new(parts[0], parts[1]);
        if let Some(variant) = parts.get(2) {
            platform = platform.with_variant(*variant);
        }
        Ok(platform)
    }
}

/// Which platform(s) a base image is resolved for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PlatformSelector {
    /// Every platform; indexes are returned unresolved
    All,
    /// One platform. `explicit` is false when it was defaulted, in which
    /// case single-architecture images are accepted whatever they report.
    Single { platform: Platform, explicit: bool },
    /// Several platforms; indexes are returned after checking coverage
    Many(Vec<Platform>),
}

impl PlatformSelector {
    /// Build a selector from the requested platform strings.
    ///
    /// Empty means the default platform; `all` anywhere wins over
    /// concrete entries.
    pub fn from_requested<I, S>(requested: I) -> KoResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut platforms = Vec::new();
        for value in requested {
            let value = value.as_ref().trim();
            if value.is_empty() {
                continue;
            }
            if value == ALL_PLATFORMS {
                return Ok(Self::All);
            }
            let platform: Platform = value.parse()?;
            if !platforms.contains(&platform) {
                platforms.push(platform);
            }
        }

        platforms.sort();
        Ok(match platforms.len() {
            0 => Self::Single {
                platform: Platform::default(),
                explicit: false,
            },
            1 => Self::Single {
                platform: platforms.remove(0),
                explicit: true,
            },
            _ => Self::Many(platforms),
        })
    }

    /// Single explicitly requested platform
    pub fn single(platform: Platform) -> Self {
        Self::Single {
            platform,
            explicit: true,
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }
}

impl fmt::Display for PlatformSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "{}", ALL_PLATFORMS),
            Self::Single { platform, .. } => write!(f, "{}", platform),
            Self::Many(platforms) => {
                let joined: Vec<String> = platforms.iter().map(ToString::to_string).collect();
                write!(f, "{}", joined.join(","))
            }
        }
    }
}

impl FromStr for PlatformSelector {
    type Err = KoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_requested(s.split(','))
    }
}
