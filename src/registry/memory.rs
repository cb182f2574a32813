//! In-process registry
//!
//! Holds tags and artifacts in memory, counts every call, and can inject
//! failures or latency. Tags can be moved at any time to model a remote
//! tag changing mid-run.

use crate::error::{BaseImageError, BaseImageResult, RegistryErrorKind};
use crate::image::descriptor::{OCI_INDEX, OCI_MANIFEST};
use crate::image::{Artifact, Digest, ImageIndex, ImageManifest, IndexEntry, Platform, Reference};
use crate::registry::RegistryClient;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Default)]
struct Store {
    /// repository name -> tag -> digest
    tags: HashMap<String, HashMap<String, Digest>>,
    /// (repository name, digest) -> artifact
    artifacts: HashMap<(String, Digest), Artifact>,
    failures: VecDeque<RegistryErrorKind>,
    generation: u64,
}

/// Registry backed by in-memory maps
#[derive(Default)]
pub struct InMemoryRegistry {
    store: Mutex<Store>,
    latency: Duration,
    digest_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Store a single-platform image and point the reference's tag at it
    pub fn push_image(&self, reference: &str, platform: Option<Platform>) -> BaseImageResult<Digest> {
        let reference = Reference::parse(reference)?;
        let mut store = self.lock();
        let digest = store.next_digest(&reference, "image");
        let image = ImageManifest {
            digest: digest.clone(),
            media_type: OCI_MANIFEST.to_string(),
            platform,
        };
        store.insert(&reference, Artifact::Image(image));
        Ok(digest)
    }

    /// Store a multi-platform index (with one child per platform) and tag it
    pub fn push_index(&self, reference: &str, platforms: &[Platform]) -> BaseImageResult<Digest> {
        let reference = Reference::parse(reference)?;
        let mut store = self.lock();

        let mut manifests = Vec::with_capacity(platforms.len());
        for platform in platforms {
            let child = store.next_digest(&reference, &platform.to_string());
            store.artifacts.insert(
                (reference.name(), child.clone()),
                Artifact::Image(ImageManifest {
                    digest: child.clone(),
                    media_type: OCI_MANIFEST.to_string(),
                    platform: Some(platform.clone()),
                }),
            );
            manifests.push(IndexEntry {
                digest: child,
                media_type: OCI_MANIFEST.to_string(),
                size: 0,
                platform: Some(platform.clone()),
            });
        }

        let digest = store.next_digest(&reference, "index");
        store.insert(
            &reference,
            Artifact::Index(ImageIndex {
                digest: digest.clone(),
                media_type: OCI_INDEX.to_string(),
                manifests,
            }),
        );
        Ok(digest)
    }

    /// Fail the next `times` calls with `kind`
    pub fn fail_next(&self, kind: RegistryErrorKind, times: usize) {
        let mut store = self.lock();
        store.failures.extend(std::iter::repeat(kind).take(times));
    }

    /// Number of `digest` calls served so far
    pub fn digest_calls(&self) -> usize {
        self.digest_calls.load(Ordering::SeqCst)
    }

    /// Number of `fetch` calls served so far
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn begin_call(&self, reference: &Reference) -> BaseImageResult<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let failure = self.lock().failures.pop_front();
        match failure {
            Some(kind) => Err(BaseImageError::registry(
                kind,
                reference.to_string(),
                "injected failure",
            )),
            None => Ok(()),
        }
    }

    fn lookup(&self, reference: &Reference) -> BaseImageResult<Artifact> {
        let store = self.lock();
        let name = reference.name();

        let digest = match reference.digest() {
            Some(digest) => digest.clone(),
            None => store
                .tags
                .get(&name)
                .and_then(|tags| tags.get(reference.tag().unwrap_or_default()))
                .cloned()
                .ok_or_else(|| not_found(reference))?,
        };

        store
            .artifacts
            .get(&(name, digest))
            .cloned()
            .ok_or_else(|| not_found(reference))
    }
}

impl Store {
    fn next_digest(&mut self, reference: &Reference, what: &str) -> Digest {
        self.generation += 1;
        Digest::sha256_of(format!("{}#{}#{}", reference.name(), what, self.generation).as_bytes())
    }

    fn insert(&mut self, reference: &Reference, artifact: Artifact) {
        let name = reference.name();
        let digest = artifact.digest().clone();
        if let Some(tag) = reference.tag() {
            self.tags
                .entry(name.clone())
                .or_default()
                .insert(tag.to_string(), digest.clone());
        }
        self.artifacts.insert((name, digest), artifact);
    }
}

#[async_trait]
impl RegistryClient for InMemoryRegistry {
    async fn digest(&self, reference: &Reference) -> BaseImageResult<Digest> {
        self.digest_calls.fetch_add(1, Ordering::SeqCst);
        self.begin_call(reference).await?;
        self.lookup(reference).map(|artifact| artifact.digest().clone())
    }

    async fn fetch(&self, reference: &Reference) -> BaseImageResult<Artifact> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.begin_call(reference).await?;
        self.lookup(reference)
    }
}

fn not_found(reference: &Reference) -> BaseImageError {
    BaseImageError::registry(
        RegistryErrorKind::NotFound,
        reference.to_string(),
        "manifest unknown",
    )
}
