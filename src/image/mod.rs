//! Image model: references, digests, platforms and registry artifacts

pub mod descriptor;
pub mod platform;
pub mod reference;

pub use descriptor::{Artifact, ImageIndex, ImageManifest, IndexEntry};
pub use platform::{Platform, PlatformSelector};
pub use reference::{Digest, Reference};
