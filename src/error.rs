//! Error types for kobuild
//!
//! Target resolution failures (`KoError`) abort the whole run. Base image
//! failures (`BaseImageError`) are scoped to a single target and are `Clone`
//! so one failed attempt can be handed to every caller that waited on it.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for kobuild operations
pub type KoResult<T> = Result<T, KoError>;

/// Result type alias for per-target base image resolution
pub type BaseImageResult<T> = Result<T, BaseImageError>;

/// Errors that abort a whole invocation
#[derive(Error, Debug)]
pub enum KoError {
    // Module identity
    #[error("Cannot determine module identity for {dir}: {reason}")]
    Config { dir: PathBuf, reason: String },

    // Configuration file
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Invalid platform '{value}': {reason}")]
    InvalidPlatform { value: String, reason: String },

    // Build targets
    #[error("Invalid build path {path}: {reason}")]
    Path { path: PathBuf, reason: String },

    #[error("Build configs {first} and {second} both resolve to import path {import_path}")]
    DuplicateTarget {
        import_path: String,
        first: String,
        second: String,
    },

    // Base images
    #[error("Base image for {import_path}: {source}")]
    BaseImage {
        import_path: String,
        #[source]
        source: BaseImageError,
    },

    #[error("{failed} of {total} targets failed base image resolution")]
    BaseImagesFailed { failed: usize, total: usize },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl KoError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a path error for a build location
    pub fn path(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Path {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::Config { .. } => Some("Run: go mod init <module path>"),
            Self::DuplicateTarget { .. } => {
                Some("Give each entry in [[builds]] a distinct dir or main")
            }
            Self::BaseImage { source, .. } => source.hint(),
            _ => None,
        }
    }
}

/// Classification of a failed registry call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryErrorKind {
    /// Repository, tag or manifest does not exist
    NotFound,
    /// Registry refused anonymous access
    Auth,
    /// Network failure, timeout or server error; worth retrying
    Transient,
}

impl std::fmt::Display for RegistryErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NotFound => "not found",
            Self::Auth => "unauthorized",
            Self::Transient => "transient failure",
        };
        write!(f, "{}", name)
    }
}

/// Errors raised while resolving the base image of one target
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BaseImageError {
    #[error("Invalid image reference '{reference}': {reason}")]
    Reference { reference: String, reason: String },

    #[error("Registry {kind} for {reference}: {message}")]
    Registry {
        kind: RegistryErrorKind,
        reference: String,
        message: String,
    },

    #[error("Platform {platform} not found in index {reference} (available: {available})")]
    PlatformNotFound {
        reference: String,
        platform: String,
        available: String,
    },

    #[error("Image {reference} is built for {actual}, but {requested} was requested")]
    PlatformMismatch {
        reference: String,
        requested: String,
        actual: String,
    },

    #[error("Timed out after {waited:?} waiting for {reference}")]
    Timeout { reference: String, waited: Duration },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BaseImageError {
    /// Create a reference parse error
    pub fn reference(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Reference {
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    /// Create a registry error
    pub fn registry(
        kind: RegistryErrorKind,
        reference: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Registry {
            kind,
            reference: reference.into(),
            message: message.into(),
        }
    }

    /// Registry subkind, if this is a registry error
    pub fn registry_kind(&self) -> Option<RegistryErrorKind> {
        match self {
            Self::Registry { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        self.registry_kind() == Some(RegistryErrorKind::Transient)
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::Registry {
                kind: RegistryErrorKind::Auth,
                ..
            } => Some("Only anonymous pulls are supported; use a public base image"),
            Self::PlatformNotFound { .. } => Some("Pass --platform all or pick a listed platform"),
            Self::Timeout { .. } => Some("Raise [registry] timeout_secs in .ko.toml"),
            _ => None,
        }
    }
}
