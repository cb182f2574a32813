//! Registry artifacts: single-platform manifests and multi-platform indexes

use crate::image::platform::Platform;
use crate::image::reference::Digest;
use serde::{Deserialize, Serialize};

pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// Whether a media type names a multi-platform index
pub fn is_index_media_type(media_type: &str) -> bool {
    media_type == OCI_INDEX || media_type == DOCKER_MANIFEST_LIST
}

/// A single-platform image manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageManifest {
    pub digest: Digest,
    pub media_type: String,
    /// Platform from the image config, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

/// One platform entry of an index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub digest: Digest,
    pub media_type: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

/// A multi-platform image index (OCI index or Docker manifest list)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageIndex {
    pub digest: Digest,
    pub media_type: String,
    pub manifests: Vec<IndexEntry>,
}

impl ImageIndex {
    /// Platforms listed in the index, in index order
    pub fn platforms(&self) -> Vec<&Platform> {
        self.manifests
            .iter()
            .filter_map(|m| m.platform.as_ref())
            .collect()
    }

    /// First entry whose platform satisfies `wanted`
    pub fn find(&self, wanted: &Platform) -> Option<&IndexEntry> {
        self.manifests
            .iter()
            .find(|m| m.platform.as_ref().is_some_and(|p| wanted.matches(p)))
    }

    /// Comma-separated platform list for error messages
    pub fn platforms_display(&self) -> String {
        let listed: Vec<String> = self.platforms().iter().map(|p| p.to_string()).collect();
        if listed.is_empty() {
            "none".to_string()
        } else {
            listed.join(", ")
        }
    }
}

/// Whatever a registry returns for a reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Artifact {
    Image(ImageManifest),
    Index(ImageIndex),
}

impl Artifact {
    pub fn digest(&self) -> &Digest {
        match self {
            Self::Image(image) => &image.digest,
            Self::Index(index) => &index.digest,
        }
    }

    pub fn media_type(&self) -> &str {
        match self {
            Self::Image(image) => &image.media_type,
            Self::Index(index) => &index.media_type,
        }
    }

    pub fn is_index(&self) -> bool {
        matches!(self, Self::Index(_))
    }
}

impl From<&IndexEntry> for ImageManifest {
    fn from(entry: &IndexEntry) -> Self {
        Self {
            digest: entry.digest.clone(),
            media_type: entry.media_type.clone(),
            platform: entry.platform.clone(),
        }
    }
}
