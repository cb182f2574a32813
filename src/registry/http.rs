//! OCI distribution API client
//!
//! Anonymous pulls only. Registries that demand a bearer token even for
//! public content get the standard anonymous token exchange; anything that
//! still answers 401/403 is reported as `Auth`.
//!
//! `ureq` is blocking, so every call runs on tokio's blocking pool.

use crate::config::RegistryConfig;
use crate::error::{BaseImageError, BaseImageResult, RegistryErrorKind};
use crate::image::descriptor::is_index_media_type;
use crate::image::reference::DEFAULT_REGISTRY;
use crate::image::{Artifact, Digest, ImageIndex, ImageManifest, IndexEntry, Platform, Reference};
use crate::registry::RegistryClient;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use ureq::http::Response;
use ureq::{Agent, Body};

const ACCEPT_MANIFESTS: &str = "application/vnd.oci.image.index.v1+json, \
     application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.oci.image.manifest.v1+json, \
     application/vnd.docker.distribution.manifest.v2+json";

const DIGEST_HEADER: &str = "docker-content-digest";

const USER_AGENT: &str = concat!("kobuild/", env!("CARGO_PKG_VERSION"));

/// Docker Hub serves the registry API from a different host than its name
const DOCKER_HUB_API: &str = "registry-1.docker.io";

/// Registry client speaking the OCI distribution API
#[derive(Clone)]
pub struct HttpRegistryClient {
    agent: Agent,
    insecure: Vec<String>,
}

impl HttpRegistryClient {
    pub fn new(config: &RegistryConfig) -> Self {
        let agent_config = Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_secs)))
            .http_status_as_error(false)
            .build();

        Self {
            agent: Agent::new_with_config(agent_config),
            insecure: config.insecure.clone(),
        }
    }

    fn session(&self, reference: &Reference) -> Session {
        let registry = reference.registry();
        let host = if registry == DEFAULT_REGISTRY {
            DOCKER_HUB_API
        } else {
            registry
        };

        Session {
            agent: self.agent.clone(),
            origin: format!("{}://{}", self.scheme(registry), host),
            repository: reference.repository().to_string(),
            display: reference.to_string(),
            token: None,
        }
    }

    fn scheme(&self, registry: &str) -> &'static str {
        let local = ["localhost", "127.0.0.1", "[::1]"]
            .iter()
            .any(|prefix| registry == *prefix || registry.starts_with(&format!("{}:", prefix)));
        if local || self.insecure.iter().any(|r| r == registry) {
            "http"
        } else {
            "https"
        }
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn digest(&self, reference: &Reference) -> BaseImageResult<Digest> {
        let mut session = self.session(reference);
        let reference = reference.clone();
        blocking(move || session.digest(&reference)).await
    }

    async fn fetch(&self, reference: &Reference) -> BaseImageResult<Artifact> {
        let mut session = self.session(reference);
        let reference = reference.clone();
        blocking(move || session.fetch(&reference)).await
    }
}

async fn blocking<T, F>(work: F) -> BaseImageResult<T>
where
    F: FnOnce() -> BaseImageResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| BaseImageError::Internal(format!("registry worker failed: {}", e)))?
}

#[derive(Debug, Clone, Copy)]
enum Method {
    Head,
    Get,
}

/// Per-reference request state (origin, repository, bearer token)
struct Session {
    agent: Agent,
    origin: String,
    repository: String,
    display: String,
    token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawManifest {
    media_type: Option<String>,
    manifests: Option<Vec<RawDescriptor>>,
    config: Option<RawDescriptor>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDescriptor {
    #[serde(default)]
    media_type: String,
    digest: String,
    #[serde(default)]
    size: u64,
    platform: Option<Platform>,
}

#[derive(Deserialize)]
struct RawConfig {
    os: Option<String>,
    architecture: Option<String>,
    variant: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

impl Session {
    fn digest(&mut self, reference: &Reference) -> BaseImageResult<Digest> {
        let url = self.manifest_url(&reference.identifier());
        match self.send(Method::Head, &url, ACCEPT_MANIFESTS) {
            Ok(response) => {
                if let Some(value) = header(&response, DIGEST_HEADER) {
                    return Digest::parse(&value).map_err(|_| {
                        self.error(
                            RegistryErrorKind::Transient,
                            format!("registry sent malformed digest '{}'", value),
                        )
                    });
                }
            }
            Err(e) if e.registry_kind() == Some(RegistryErrorKind::Auth) => return Err(e),
            // Some registries reject HEAD; fall through to GET
            Err(e) => debug!("HEAD {} failed, retrying with GET: {}", url, e),
        }

        let (bytes, _) = self.get_manifest(reference)?;
        Ok(Digest::sha256_of(&bytes))
    }

    fn fetch(&mut self, reference: &Reference) -> BaseImageResult<Artifact> {
        let (bytes, content_type) = self.get_manifest(reference)?;

        let computed = Digest::sha256_of(&bytes);
        let digest = match reference.digest() {
            Some(expected) if expected.algorithm() == "sha256" && *expected != computed => {
                return Err(self.error(
                    RegistryErrorKind::Transient,
                    format!("manifest content hashes to {}, expected {}", computed, expected),
                ));
            }
            Some(expected) => expected.clone(),
            None => computed,
        };

        let raw: RawManifest = serde_json::from_slice(&bytes).map_err(|e| {
            self.error(
                RegistryErrorKind::NotFound,
                format!("malformed manifest: {}", e),
            )
        })?;

        let media_type = raw
            .media_type
            .clone()
            .or(content_type)
            .unwrap_or_default();

        if is_index_media_type(&media_type) || raw.manifests.is_some() {
            let manifests = raw
                .manifests
                .unwrap_or_default()
                .into_iter()
                .map(|d| {
                    Ok(IndexEntry {
                        digest: Digest::parse(&d.digest)?,
                        media_type: d.media_type,
                        size: d.size,
                        platform: d.platform,
                    })
                })
                .collect::<BaseImageResult<Vec<_>>>()?;

            return Ok(Artifact::Index(ImageIndex {
                digest,
                media_type,
                manifests,
            }));
        }

        let platform = match raw.config {
            Some(config) => self.config_platform(&config.digest)?,
            None => None,
        };

        Ok(Artifact::Image(ImageManifest {
            digest,
            media_type,
            platform,
        }))
    }

    fn get_manifest(&mut self, reference: &Reference) -> BaseImageResult<(Vec<u8>, Option<String>)> {
        let url = self.manifest_url(&reference.identifier());
        let mut response = self.send(Method::Get, &url, ACCEPT_MANIFESTS)?;
        let content_type = header(&response, "content-type")
            .map(|v| v.split(';').next().unwrap_or_default().trim().to_string());
        let bytes = self.read_body(&mut response)?;
        Ok((bytes, content_type))
    }

    fn config_platform(&mut self, digest: &str) -> BaseImageResult<Option<Platform>> {
        let url = format!("{}/v2/{}/blobs/{}", self.origin, self.repository, digest);
        let mut response = self.send(Method::Get, &url, "application/json, */*")?;
        let config: RawConfig = self.read_json(&mut response)?;

        Ok(match (config.os, config.architecture) {
            (Some(os), Some(architecture)) => Some(Platform {
                os,
                architecture,
                variant: config.variant,
            }),
            _ => None,
        })
    }

    fn manifest_url(&self, identifier: &str) -> String {
        format!(
            "{}/v2/{}/manifests/{}",
            self.origin, self.repository, identifier
        )
    }

    /// Send a request, performing the anonymous token exchange once on 401
    fn send(&mut self, method: Method, url: &str, accept: &str) -> BaseImageResult<Response<Body>> {
        let response = self.call(method, url, accept)?;

        if response.status().as_u16() == 401 && self.token.is_none() {
            if let Some(challenge) = header(&response, "www-authenticate") {
                if let Some(token) = self.anonymous_token(&challenge)? {
                    self.token = Some(token);
                    let retried = self.call(method, url, accept)?;
                    return self.check_status(retried);
                }
            }
        }

        self.check_status(response)
    }

    fn call(&self, method: Method, url: &str, accept: &str) -> BaseImageResult<Response<Body>> {
        debug!("{:?} {}", method, url);
        let mut request = match method {
            Method::Head => self.agent.head(url),
            Method::Get => self.agent.get(url),
        }
        .header("Accept", accept)
        .header("User-Agent", USER_AGENT);

        if let Some(ref token) = self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        request
            .call()
            .map_err(|e| self.error(RegistryErrorKind::Transient, e.to_string()))
    }

    fn anonymous_token(&self, challenge: &str) -> BaseImageResult<Option<String>> {
        let Some(params) = parse_bearer_challenge(challenge) else {
            return Ok(None);
        };
        let Some(realm) = params.get("realm") else {
            return Ok(None);
        };

        let scope = params
            .get("scope")
            .cloned()
            .unwrap_or_else(|| format!("repository:{}:pull", self.repository));
        let url = match params.get("service") {
            Some(service) => format!("{}?service={}&scope={}", realm, service, scope),
            None => format!("{}?scope={}", realm, scope),
        };

        debug!("Requesting anonymous token from {}", realm);
        let response = self
            .agent
            .get(&url)
            .header("User-Agent", USER_AGENT)
            .call()
            .map_err(|e| self.error(RegistryErrorKind::Transient, e.to_string()))?;
        let mut response = self.check_status(response)?;
        let token: TokenResponse = self.read_json(&mut response)?;

        Ok(token.token.or(token.access_token))
    }

    fn check_status(&self, response: Response<Body>) -> BaseImageResult<Response<Body>> {
        let status = response.status().as_u16();
        match classify_status(status) {
            None => Ok(response),
            Some(kind) => Err(self.error(kind, format!("registry answered HTTP {}", status))),
        }
    }

    fn read_body(&self, response: &mut Response<Body>) -> BaseImageResult<Vec<u8>> {
        response
            .body_mut()
            .read_to_vec()
            .map_err(|e| self.error(RegistryErrorKind::Transient, format!("reading body: {}", e)))
    }

    fn read_json<T: DeserializeOwned>(&self, response: &mut Response<Body>) -> BaseImageResult<T> {
        let bytes = self.read_body(response)?;
        serde_json::from_slice(&bytes).map_err(|e| {
            self.error(
                RegistryErrorKind::NotFound,
                format!("malformed response: {}", e),
            )
        })
    }

    fn error(&self, kind: RegistryErrorKind, message: impl Into<String>) -> BaseImageError {
        BaseImageError::registry(kind, self.display.clone(), message)
    }
}

fn header(response: &Response<Body>, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Map an HTTP status to a registry error kind; `None` means success
fn classify_status(status: u16) -> Option<RegistryErrorKind> {
    match status {
        200..=299 => None,
        401 | 403 => Some(RegistryErrorKind::Auth),
        408 | 429 | 500..=599 => Some(RegistryErrorKind::Transient),
        _ => Some(RegistryErrorKind::NotFound),
    }
}

/// Parse `Bearer realm="...",service="...",scope="..."` into lowercase keys
fn parse_bearer_challenge(challenge: &str) -> Option<HashMap<String, String>> {
    let (scheme, mut rest) = challenge.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let mut params = HashMap::new();
    rest = rest.trim();
    while !rest.is_empty() {
        let (key, after) = rest.split_once('=')?;
        let after = after.trim_start();
        let (value, remaining) = match after.strip_prefix('"') {
            Some(quoted) => {
                let end = quoted.find('"')?;
                (&quoted[..end], &quoted[end + 1..])
            }
            None => match after.find(',') {
                Some(i) => (&after[..i], &after[i..]),
                None => (after, ""),
            },
        };
        params.insert(key.trim().to_ascii_lowercase(), value.to_string());
        rest = remaining.trim_start().trim_start_matches(',').trim_start();
    }
    Some(params)
}
