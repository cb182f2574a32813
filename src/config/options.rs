//! Per-invocation build options

use crate::error::{KoError, KoResult};
use crate::image::PlatformSelector;
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Options supplied by one invocation
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Directory the build runs from; relative paths resolve against the cwd
    pub working_directory: PathBuf,

    /// Base image applied to every target, above all configuration
    pub base_image_override: Option<String>,

    /// Requested platforms (`os/arch[/variant]` or `all`)
    pub platforms: BTreeSet<String>,
}

impl BuildOptions {
    pub fn new(working_directory: impl Into<PathBuf>) -> Self {
        Self {
            working_directory: working_directory.into(),
            ..Self::default()
        }
    }

    pub fn with_base_image(mut self, reference: impl Into<String>) -> Self {
        self.base_image_override = Some(reference.into());
        self
    }

    pub fn with_platforms<I, S>(mut self, platforms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.platforms.extend(platforms.into_iter().map(Into::into));
        self
    }

    /// Absolute working directory
    pub fn root_dir(&self) -> KoResult<PathBuf> {
        if self.working_directory.as_os_str().is_empty() {
            return std::env::current_dir().map_err(|e| KoError::io("getting current directory", e));
        }
        if self.working_directory.is_absolute() {
            return Ok(self.working_directory.clone());
        }
        let cwd = std::env::current_dir().map_err(|e| KoError::io("getting current directory", e))?;
        Ok(cwd.join(&self.working_directory))
    }

    /// Platform selector for the requested platform set
    pub fn platform_selector(&self) -> KoResult<PlatformSelector> {
        PlatformSelector::from_requested(&self.platforms)
    }
}
