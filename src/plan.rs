//! Invocation planning
//!
//! Ties configuration, target resolution and base image resolution
//! together for one run.

use crate::base::{BaseImageReport, BaseImageResolver, BaseImageSettings};
use crate::config::{BuildOptions, ConfigManager, ProjectConfig};
use crate::error::KoResult;
use crate::image::PlatformSelector;
use crate::registry::{HttpRegistryClient, RegistryClient, RetryPolicy, RetryingClient};
use crate::target::{BuildTargetRegistry, ResolvedTargetMap};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Everything one run needs, loaded up front
#[derive(Debug, Clone)]
pub struct Invocation {
    pub options: BuildOptions,
    pub config: ProjectConfig,
    pub root_dir: PathBuf,
}

/// Targets and their base images
#[derive(Debug)]
pub struct BuildPlan {
    pub targets: ResolvedTargetMap,
    pub platform: PlatformSelector,
    pub bases: BaseImageReport,
}

impl Invocation {
    /// Resolve the working directory and load its configuration
    pub async fn load(options: BuildOptions) -> KoResult<Self> {
        let root_dir = options.root_dir()?;
        let config = ConfigManager::for_working_dir(&root_dir).load().await?;
        Ok(Self::new(options, config, root_dir))
    }

    pub fn new(options: BuildOptions, config: ProjectConfig, root_dir: PathBuf) -> Self {
        Self {
            options,
            config,
            root_dir,
        }
    }

    /// Import path map of every configured build
    pub fn targets(&self) -> KoResult<ResolvedTargetMap> {
        BuildTargetRegistry::new().build_map(&self.root_dir, &self.config.builds)
    }

    /// HTTP registry client with the configured retry policy
    pub fn registry_client(&self) -> Arc<dyn RegistryClient> {
        let registry = &self.config.registry;
        Arc::new(RetryingClient::new(
            HttpRegistryClient::new(registry),
            RetryPolicy::from_config(registry),
        ))
    }

    pub fn base_image_resolver(&self, client: Arc<dyn RegistryClient>) -> BaseImageResolver {
        BaseImageResolver::new(
            client,
            BaseImageSettings::from_config(&self.config, &self.options),
        )
    }

    /// Resolve targets, then every target's base image.
    ///
    /// Target errors abort; base image errors are collected per target.
    pub async fn plan(&self, client: Arc<dyn RegistryClient>) -> KoResult<BuildPlan> {
        let platform = self.options.platform_selector()?;
        let targets = self.targets()?;
        info!(
            "Resolving base images for {} target(s), platform {}",
            targets.len(),
            platform
        );

        let bases = self
            .base_image_resolver(client)
            .resolve_all(&targets, &platform)
            .await;

        Ok(BuildPlan {
            targets,
            platform,
            bases,
        })
    }
}
