//! Base image resolution
//!
//! Picks the base image reference for a target, pins tags to digests,
//! fetches the manifest or index and narrows it to the requested platform.
//! Results are memoized per (reference, platform) for the life of the
//! resolver, and concurrent requests for the same key share one fetch.

pub mod cache;
pub mod select;

pub use cache::{CacheKey, EntryState, ResolutionCache};
pub use select::select;

use crate::config::{BuildOptions, ProjectConfig};
use crate::error::{BaseImageError, BaseImageResult, KoError, KoResult};
use crate::image::{Artifact, PlatformSelector, Reference};
use crate::registry::RegistryClient;
use crate::target::ResolvedTargetMap;
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Base image used when nothing else is configured
pub const FALLBACK_BASE_IMAGE: &str = "cgr.dev/chainguard/static:latest";

/// Scheme some callers put in front of import paths
pub const KO_SCHEME: &str = "ko://";

/// Strip an optional `ko://` prefix
pub fn strip_scheme(import_path: &str) -> &str {
    import_path.strip_prefix(KO_SCHEME).unwrap_or(import_path)
}

/// Which setting supplied a target's base image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseSource {
    Invocation,
    Target,
    ProjectDefault,
    Fallback,
}

impl fmt::Display for BaseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Invocation => "invocation override",
            Self::Target => "per-target override",
            Self::ProjectDefault => "project default",
            Self::Fallback => "built-in fallback",
        };
        write!(f, "{}", name)
    }
}

/// A pinned base image and the descriptor selected for the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedBase {
    /// Always carries a digest
    pub reference: Reference,
    pub descriptor: Artifact,
}

/// Inputs that decide which base image each target gets
#[derive(Debug, Clone)]
pub struct BaseImageSettings {
    pub invocation_override: Option<String>,
    /// Keyed by import path without `ko://`
    pub overrides: BTreeMap<String, String>,
    pub default_base_image: Option<String>,
    /// Default wait per `resolve` call
    pub timeout: Duration,
}

impl BaseImageSettings {
    pub fn from_config(config: &ProjectConfig, options: &BuildOptions) -> Self {
        Self {
            invocation_override: non_empty(options.base_image_override.as_deref()),
            overrides: config
                .base_image_overrides
                .iter()
                .map(|(path, image)| (strip_scheme(path).to_string(), image.clone()))
                .collect(),
            default_base_image: non_empty(config.default_base_image.as_deref()),
            timeout: Duration::from_secs(config.registry.timeout_secs),
        }
    }

    /// The reference string for a target and where it came from, checked
    /// in precedence order.
    pub fn select_reference(&self, import_path: &str) -> (&str, BaseSource) {
        let import_path = strip_scheme(import_path);

        if let Some(ref image) = self.invocation_override {
            return (image, BaseSource::Invocation);
        }
        if let Some(image) = self.overrides.get(import_path) {
            return (image, BaseSource::Target);
        }
        if let Some(ref image) = self.default_base_image {
            return (image, BaseSource::ProjectDefault);
        }
        (FALLBACK_BASE_IMAGE, BaseSource::Fallback)
    }
}

impl Default for BaseImageSettings {
    fn default() -> Self {
        Self::from_config(&ProjectConfig::default(), &BuildOptions::default())
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Per-target outcome of resolving a whole target map
#[derive(Debug, Default)]
pub struct BaseImageReport {
    pub results: BTreeMap<String, BaseImageResult<ResolvedBase>>,
}

impl BaseImageReport {
    /// Failed targets with their errors
    pub fn failures(&self) -> impl Iterator<Item = (&str, &BaseImageError)> {
        self.results
            .iter()
            .filter_map(|(path, result)| result.as_ref().err().map(|e| (path.as_str(), e)))
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    /// All bases, or the failure (a single one is reported by target)
    pub fn into_result(self) -> KoResult<BTreeMap<String, ResolvedBase>> {
        let total = self.results.len();
        let mut resolved = BTreeMap::new();
        let mut failed = Vec::new();

        for (import_path, result) in self.results {
            match result {
                Ok(base) => {
                    resolved.insert(import_path, base);
                }
                Err(source) => failed.push((import_path, source)),
            }
        }

        match failed.len() {
            0 => Ok(resolved),
            1 => {
                let (import_path, source) = failed.remove(0);
                Err(KoError::BaseImage {
                    import_path,
                    source,
                })
            }
            n => Err(KoError::BaseImagesFailed { failed: n, total }),
        }
    }
}

struct Inner {
    client: Arc<dyn RegistryClient>,
    settings: BaseImageSettings,
    cache: ResolutionCache,
}

/// Resolves base images for targets; clones share one cache
#[derive(Clone)]
pub struct BaseImageResolver {
    inner: Arc<Inner>,
}

impl BaseImageResolver {
    pub fn new(client: Arc<dyn RegistryClient>, settings: BaseImageSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                settings,
                cache: ResolutionCache::new(),
            }),
        }
    }

    pub fn settings(&self) -> &BaseImageSettings {
        &self.inner.settings
    }

    pub fn cache(&self) -> &ResolutionCache {
        &self.inner.cache
    }

    /// See [`BaseImageSettings::select_reference`]
    pub fn select_reference(&self, import_path: &str) -> (&str, BaseSource) {
        self.inner.settings.select_reference(import_path)
    }

    /// Resolve the base image of one target within the configured timeout
    pub async fn resolve(
        &self,
        platform: &PlatformSelector,
        import_path: &str,
    ) -> BaseImageResult<ResolvedBase> {
        let deadline = Instant::now() + self.inner.settings.timeout;
        self.resolve_with_deadline(platform, import_path, deadline)
            .await
    }

    /// Resolve the base image of one target, waiting until `deadline` at most
    pub async fn resolve_with_deadline(
        &self,
        platform: &PlatformSelector,
        import_path: &str,
        deadline: Instant,
    ) -> BaseImageResult<ResolvedBase> {
        let import_path = strip_scheme(import_path);
        let (raw, source) = self.select_reference(import_path);
        debug!("Base image for {}: {} ({})", import_path, raw, source);

        let reference = Reference::parse(raw)?;
        let key = CacheKey::new(&reference, platform);

        let client = self.inner.client.clone();
        let selector = platform.clone();
        self.inner
            .cache
            .get_or_resolve(&key, deadline, move || {
                fetch_base(client, reference, selector)
            })
            .await
    }

    /// Resolve every target concurrently; one failure does not stop others
    pub async fn resolve_all(
        &self,
        targets: &ResolvedTargetMap,
        platform: &PlatformSelector,
    ) -> BaseImageReport {
        let pending = targets.import_paths().map(|import_path| async move {
            let result = self.resolve(platform, import_path).await;
            (import_path.to_string(), result)
        });

        BaseImageReport {
            results: join_all(pending).await.into_iter().collect(),
        }
    }
}

/// Pin, fetch and select; runs once per cache attempt
async fn fetch_base(
    client: Arc<dyn RegistryClient>,
    reference: Reference,
    selector: PlatformSelector,
) -> BaseImageResult<ResolvedBase> {
    let digest = match reference.digest() {
        Some(digest) => digest.clone(),
        None => client.digest(&reference).await?,
    };
    let pinned = reference.pinned(digest);

    let artifact = client.fetch(&pinned).await?;
    let descriptor = select(&pinned, artifact, &selector)?;

    info!("Resolved {} to {}", reference, pinned);
    Ok(ResolvedBase {
        reference: pinned,
        descriptor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildConfig;
    use crate::error::RegistryErrorKind;
    use crate::image::Platform;
    use crate::registry::{InMemoryRegistry, RetryPolicy, RetryingClient};

    const APP: &str = "example.com/app";
    const TOOL: &str = "example.com/app/cmd/tool";

    fn settings() -> BaseImageSettings {
        BaseImageSettings {
            invocation_override: None,
            overrides: BTreeMap::from([(TOOL.to_string(), "gcr.io/base/tool:v1".to_string())]),
            default_base_image: Some("gcr.io/base/default:v1".to_string()),
            timeout: Duration::from_secs(10),
        }
    }

    fn implicit() -> PlatformSelector {
        PlatformSelector::from_requested(Vec::<String>::new()).unwrap()
    }

    #[test]
    fn precedence_is_ordered() {
        let mut s = settings();
        assert_eq!(s.select_reference(TOOL), ("gcr.io/base/tool:v1", BaseSource::Target));
        assert_eq!(
            s.select_reference(APP),
            ("gcr.io/base/default:v1", BaseSource::ProjectDefault)
        );

        s.invocation_override = Some("alpine:3.20".to_string());
        assert_eq!(s.select_reference(TOOL), ("alpine:3.20", BaseSource::Invocation));

        s.invocation_override = None;
        s.default_base_image = None;
        assert_eq!(s.select_reference(APP), (FALLBACK_BASE_IMAGE, BaseSource::Fallback));
    }

    #[test]
    fn ko_scheme_is_ignored() {
        let mut config = ProjectConfig::default();
        config
            .base_image_overrides
            .insert(format!("{}{}", KO_SCHEME, TOOL), "alpine:3.20".to_string());
        let s = BaseImageSettings::from_config(&config, &BuildOptions::default());

        assert_eq!(s.select_reference(TOOL).1, BaseSource::Target);
        assert_eq!(s.select_reference(&format!("ko://{}", TOOL)).1, BaseSource::Target);
    }

    #[test]
    fn blank_override_is_ignored() {
        let options = BuildOptions::default().with_base_image("  ");
        let s = BaseImageSettings::from_config(&ProjectConfig::default(), &options);
        assert_eq!(s.select_reference(APP).1, BaseSource::Fallback);
    }

    #[tokio::test]
    async fn tag_is_pinned_and_lookup_happens_once() {
        let registry = Arc::new(InMemoryRegistry::new());
        let digest = registry.push_image("gcr.io/base/tool:v1", None).unwrap();
        let resolver = BaseImageResolver::new(registry.clone(), settings());

        let first = resolver.resolve(&implicit(), TOOL).await.unwrap();
        assert_eq!(first.reference.digest(), Some(&digest));
        assert_eq!(first.reference.to_string(), format!("gcr.io/base/tool@{}", digest));

        // The tag moves; the run keeps what it pinned
        registry.push_image("gcr.io/base/tool:v1", None).unwrap();
        let second = resolver.resolve(&implicit(), TOOL).await.unwrap();

        assert_eq!(second, first);
        assert_eq!(registry.digest_calls(), 1);
        assert_eq!(registry.fetch_calls(), 1);
    }

    #[tokio::test]
    async fn digest_reference_skips_lookup() {
        let registry = Arc::new(InMemoryRegistry::new());
        let digest = registry.push_image("gcr.io/base/tool:v1", None).unwrap();

        let mut s = settings();
        s.invocation_override = Some(format!("gcr.io/base/tool@{}", digest));
        let resolver = BaseImageResolver::new(registry.clone(), s);

        let got = resolver.resolve(&implicit(), APP).await.unwrap();
        assert_eq!(got.descriptor.digest(), &digest);
        assert_eq!(registry.digest_calls(), 0);
    }

    #[tokio::test]
    async fn all_platforms_returns_index() {
        let registry = Arc::new(InMemoryRegistry::new());
        let digest = registry
            .push_index(
                "gcr.io/base/default:v1",
                &[Platform::new("linux", "amd64"), Platform::new("linux", "arm64")],
            )
            .unwrap();
        let resolver = BaseImageResolver::new(registry, settings());

        let got = resolver.resolve(&PlatformSelector::All, APP).await.unwrap();
        assert!(got.descriptor.is_index());
        assert_eq!(got.descriptor.digest(), &digest);
    }

    #[tokio::test]
    async fn single_platform_selects_child_and_pins_index() {
        let registry = Arc::new(InMemoryRegistry::new());
        let index = registry
            .push_index(
                "gcr.io/base/default:v1",
                &[Platform::new("linux", "amd64"), Platform::new("linux", "arm64")],
            )
            .unwrap();
        let resolver = BaseImageResolver::new(registry, settings());

        let arm = PlatformSelector::single(Platform::new("linux", "arm64"));
        let got = resolver.resolve(&arm, APP).await.unwrap();

        assert_eq!(got.reference.digest(), Some(&index));
        match got.descriptor {
            Artifact::Image(image) => {
                assert_eq!(image.platform, Some(Platform::new("linux", "arm64")))
            }
            other => panic!("expected image, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn absent_platform_fails() {
        let registry = Arc::new(InMemoryRegistry::new());
        registry
            .push_index("gcr.io/base/default:v1", &[Platform::new("linux", "amd64")])
            .unwrap();
        let resolver = BaseImageResolver::new(registry, settings());

        let err = resolver
            .resolve(&PlatformSelector::single(Platform::new("linux", "riscv64")), APP)
            .await
            .unwrap_err();
        assert!(matches!(err, BaseImageError::PlatformNotFound { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_targets_fetch_once() {
        let registry = Arc::new(InMemoryRegistry::new().with_latency(Duration::from_millis(30)));
        registry.push_image("gcr.io/base/default:v1", None).unwrap();
        let resolver = BaseImageResolver::new(registry.clone(), settings());

        let mut handles = Vec::new();
        for i in 0..12 {
            let resolver = resolver.clone();
            handles.push(tokio::spawn(async move {
                resolver
                    .resolve(&implicit(), &format!("example.com/app/cmd/t{}", i))
                    .await
            }));
        }

        let mut references = Vec::new();
        for handle in handles {
            references.push(handle.await.unwrap().unwrap().reference.to_string());
        }

        assert_eq!(references.len(), 12);
        assert!(references.iter().all(|r| r == &references[0]));
        assert_eq!(registry.digest_calls(), 1);
        assert_eq!(registry.fetch_calls(), 1);
    }

    #[tokio::test]
    async fn explicit_platform_is_checked_after_default_was_served() {
        let registry = Arc::new(InMemoryRegistry::new());
        let digest = registry
            .push_image("gcr.io/base/default:v1", Some(Platform::new("linux", "arm64")))
            .unwrap();
        let resolver = BaseImageResolver::new(registry, settings());

        assert!(resolver.resolve(&implicit(), APP).await.is_ok());

        let explicit = PlatformSelector::single(Platform::new("linux", "amd64"));
        let err = resolver.resolve(&explicit, APP).await.unwrap_err();
        assert_eq!(
            err,
            BaseImageError::PlatformMismatch {
                reference: format!("gcr.io/base/default@{}", digest),
                requested: "linux/amd64".to_string(),
                actual: "linux/arm64".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn tagged_and_bare_digest_share_one_fetch() {
        let registry = Arc::new(InMemoryRegistry::new());
        let digest = registry.push_image("gcr.io/base/tool:v1", None).unwrap();

        let mut s = settings();
        s.overrides
            .insert(TOOL.to_string(), format!("gcr.io/base/tool:v1@{}", digest));
        s.default_base_image = Some(format!("gcr.io/base/tool@{}", digest));
        let resolver = BaseImageResolver::new(registry.clone(), s);

        let tagged = resolver.resolve(&implicit(), TOOL).await.unwrap();
        let bare = resolver.resolve(&implicit(), APP).await.unwrap();

        assert_eq!(tagged, bare);
        assert_eq!(bare.reference.to_string(), format!("gcr.io/base/tool@{}", digest));
        assert_eq!(registry.fetch_calls(), 1);
        assert_eq!(registry.digest_calls(), 0);
    }

    #[tokio::test]
    async fn failed_resolution_is_retried_by_later_call() {
        let registry = Arc::new(InMemoryRegistry::new());
        registry.push_image("gcr.io/base/default:v1", None).unwrap();
        registry.fail_next(RegistryErrorKind::Transient, 1);
        let resolver = BaseImageResolver::new(registry.clone(), settings());

        let err = resolver.resolve(&implicit(), APP).await.unwrap_err();
        assert!(err.is_retryable());

        assert!(resolver.resolve(&implicit(), APP).await.is_ok());
        assert_eq!(registry.digest_calls(), 2);
    }

    #[tokio::test]
    async fn transient_failures_retried_inside_one_resolution() {
        let registry = InMemoryRegistry::new();
        registry.push_image("gcr.io/base/default:v1", None).unwrap();
        registry.fail_next(RegistryErrorKind::Transient, 2);
        let client = Arc::new(RetryingClient::new(
            registry,
            RetryPolicy::new(3, Duration::from_millis(1)),
        ));
        let resolver = BaseImageResolver::new(client.clone(), settings());

        assert!(resolver.resolve(&implicit(), APP).await.is_ok());
        assert_eq!(client.inner().digest_calls(), 3);
    }

    #[tokio::test]
    async fn not_found_is_reported_without_retry() {
        let registry = InMemoryRegistry::new();
        let client = Arc::new(RetryingClient::new(
            registry,
            RetryPolicy::new(3, Duration::from_millis(1)),
        ));
        let resolver = BaseImageResolver::new(client.clone(), settings());

        let err = resolver.resolve(&implicit(), APP).await.unwrap_err();
        assert_eq!(err.registry_kind(), Some(RegistryErrorKind::NotFound));
        assert_eq!(client.inner().digest_calls(), 1);
    }

    #[tokio::test]
    async fn invalid_reference_is_reported() {
        let mut s = settings();
        s.invocation_override = Some("Not A Reference".to_string());
        let resolver = BaseImageResolver::new(Arc::new(InMemoryRegistry::new()), s);

        let err = resolver.resolve(&implicit(), APP).await.unwrap_err();
        assert!(matches!(err, BaseImageError::Reference { .. }));
    }

    #[tokio::test]
    async fn expired_deadline_leaves_resolution_running() {
        let registry = Arc::new(InMemoryRegistry::new().with_latency(Duration::from_millis(50)));
        registry.push_image("gcr.io/base/default:v1", None).unwrap();
        let resolver = BaseImageResolver::new(registry.clone(), settings());

        let err = resolver
            .resolve_with_deadline(&implicit(), APP, Instant::now() + Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, BaseImageError::Timeout { .. }));

        let got = resolver.resolve(&implicit(), APP).await.unwrap();
        assert!(got.reference.is_pinned());
        assert_eq!(registry.digest_calls(), 1);
        assert_eq!(registry.fetch_calls(), 1);
    }

    #[tokio::test]
    async fn resolve_all_reports_per_target() {
        let registry = Arc::new(InMemoryRegistry::new());
        registry.push_image("gcr.io/base/default:v1", None).unwrap();
        let resolver = BaseImageResolver::new(registry, settings());

        let targets = target_map(&[APP, TOOL]);
        let report = resolver.resolve_all(&targets, &implicit()).await;

        assert!(report.results[APP].is_ok());
        let failures: Vec<&str> = report.failures().map(|(path, _)| path).collect();
        assert_eq!(failures, vec![TOOL]);

        match report.into_result() {
            Err(KoError::BaseImage { import_path, .. }) => assert_eq!(import_path, TOOL),
            other => panic!("expected BaseImage error, got {:?}", other),
        }
    }

    fn target_map(paths: &[&str]) -> ResolvedTargetMap {
        paths
            .iter()
            .map(|p| (p.to_string(), BuildConfig::default()))
            .collect()
    }
}
