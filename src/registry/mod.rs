//! Registry access
//!
//! The resolver only talks to a registry through [`RegistryClient`]:
//! - [`HttpRegistryClient`]: OCI distribution API over HTTPS, anonymous pulls
//! - [`InMemoryRegistry`]: seeded in-process store with call counters
//! - [`RetryingClient`]: retries transient failures of any client

pub mod http;
pub mod memory;
pub mod retry;

pub use http::HttpRegistryClient;
pub use memory::InMemoryRegistry;
pub use retry::{RetryPolicy, RetryingClient};

use crate::error::BaseImageResult;
use crate::image::{Artifact, Digest, Reference};
use async_trait::async_trait;

/// Remote image lookups
///
/// Failures are reported as `BaseImageError::Registry` tagged
/// `NotFound`, `Auth` or `Transient`.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Current digest of the manifest a reference points at
    async fn digest(&self, reference: &Reference) -> BaseImageResult<Digest>;

    /// Manifest or index a reference points at
    async fn fetch(&self, reference: &Reference) -> BaseImageResult<Artifact>;
}
