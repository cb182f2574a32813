//! kobuild - build target and base image resolution
//!
//! Maps declared Go build configs to unique import paths and resolves,
//! pins and caches the base image each target is layered onto.

pub mod base;
pub mod cli;
pub mod config;
pub mod error;
pub mod image;
pub mod module;
pub mod plan;
pub mod registry;
pub mod target;

pub use base::{BaseImageResolver, BaseSource, ResolvedBase};
pub use error::{BaseImageError, BaseImageResult, KoError, KoResult};
pub use target::{BuildTargetRegistry, ResolvedTargetMap};
