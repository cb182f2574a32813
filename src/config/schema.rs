//! Configuration schema for kobuild
//!
//! Project configuration lives in `.ko.toml` at the working directory.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Root project configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Base image for targets without an override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_base_image: Option<String>,

    /// Per-target base images, keyed by import path
    pub base_image_overrides: BTreeMap<String, String>,

    /// Declared build targets, in declaration order
    pub builds: Vec<BuildConfig>,

    /// Registry access settings
    pub registry: RegistryConfig,
}

/// One declared build target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Optional label used in messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Directory relative to the working directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,

    /// Entrypoint file or package directory, relative to `dir`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,

    /// Environment for the compiler (KEY=VALUE)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,

    /// Extra compiler flags
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,

    /// Linker flags
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ldflags: Vec<String>,
}

impl BuildConfig {
    /// Label for messages: the id, or `#<index>` in declaration order
    pub fn label(&self, index: usize) -> String {
        match self.id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => format!("#{}", index),
        }
    }
}

/// Registry access settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Per-call deadline for waiting on a base image
    pub timeout_secs: u64,

    /// Attempts for transient registry failures (including the first)
    pub retry_attempts: u32,

    /// Initial retry backoff, doubled per attempt
    pub retry_backoff_ms: u64,

    /// Registries reached over plain http
    pub insecure: Vec<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            retry_attempts: 3,
            retry_backoff_ms: 250,
            insecure: vec![],
        }
    }
}
