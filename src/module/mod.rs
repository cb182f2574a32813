//! Module identity and import path resolution
//!
//! A build target is named by its Go import path: the module path from the
//! nearest `go.mod` at or above the package directory, joined with the
//! package directory's path relative to that module root.

pub mod gomod;

pub use gomod::GoModReader;

use crate::error::{KoError, KoResult};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Source of module identities, consulted one directory at a time
pub trait ModuleDescriptorReader: Send + Sync {
    /// Module path declared in `dir`, or `None` if `dir` has no descriptor
    fn read_module_path(&self, dir: &Path) -> KoResult<Option<String>>;

    /// Descriptor file name, for error messages
    fn descriptor_name(&self) -> &'static str {
        "module descriptor"
    }
}

/// A module: its canonical path and the directory declaring it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    pub root_dir: PathBuf,
    pub module_path: String,
}

impl Module {
    pub fn new(root_dir: impl Into<PathBuf>, module_path: impl Into<String>) -> Self {
        Self {
            root_dir: root_dir.into(),
            module_path: module_path.into(),
        }
    }

    /// Import path of a package directory inside this module
    pub fn import_path_for(&self, package_dir: &Path) -> KoResult<String> {
        let root = self.root_dir.canonicalize().map_err(|e| KoError::Config {
            dir: self.root_dir.clone(),
            reason: format!("module root is not accessible: {}", e),
        })?;

        let relative = package_dir.strip_prefix(&root).map_err(|_| {
            KoError::path(
                package_dir,
                format!("not inside module {} at {}", self.module_path, root.display()),
            )
        })?;

        let mut import_path = self.module_path.clone();
        for component in relative.components() {
            match component {
                Component::Normal(segment) => {
                    import_path.push('/');
                    import_path.push_str(&segment.to_string_lossy());
                }
                Component::CurDir => {}
                _ => {
                    return Err(KoError::path(
                        package_dir,
                        "package path is not a plain relative path",
                    ))
                }
            }
        }
        Ok(import_path)
    }
}

/// Resolves module identities and target import paths
pub struct ModuleResolver {
    reader: Box<dyn ModuleDescriptorReader>,
}

impl ModuleResolver {
    /// Resolver backed by `go.mod` files
    pub fn new() -> Self {
        Self::with_reader(GoModReader)
    }

    pub fn with_reader(reader: impl ModuleDescriptorReader + 'static) -> Self {
        Self {
            reader: Box::new(reader),
        }
    }

    /// Find the module owning `dir` by walking up to the nearest descriptor
    pub fn identify(&self, dir: &Path) -> KoResult<Module> {
        let start = dir.canonicalize().map_err(|e| KoError::Config {
            dir: dir.to_path_buf(),
            reason: format!("directory is not accessible: {}", e),
        })?;

        for ancestor in start.ancestors() {
            if let Some(module_path) = self.reader.read_module_path(ancestor)? {
                debug!(
                    "Identified module {} at {}",
                    module_path,
                    ancestor.display()
                );
                return Ok(Module {
                    root_dir: ancestor.to_path_buf(),
                    module_path,
                });
            }
        }

        Err(KoError::Config {
            dir: dir.to_path_buf(),
            reason: format!(
                "no {} found here or in any parent directory",
                self.reader.descriptor_name()
            ),
        })
    }

    /// Import path of the target at `root_dir/dir/main` within `module`
    pub fn resolve_import_path(
        &self,
        module: &Module,
        root_dir: &Path,
        dir: Option<&str>,
        main: Option<&str>,
    ) -> KoResult<String> {
        let location = locate(root_dir, dir, main)?;
        module.import_path_for(&location)
    }
}

impl Default for ModuleResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Package directory for a dir/main pair.
///
/// Empty parts are skipped; a `main` naming a file resolves to its directory.
/// The result is canonical, exists, and lies within `root_dir`.
pub fn locate(root_dir: &Path, dir: Option<&str>, main: Option<&str>) -> KoResult<PathBuf> {
    let root = root_dir.canonicalize().map_err(|e| {
        KoError::path(root_dir, format!("working directory is not accessible: {}", e))
    })?;

    let mut candidate = root.clone();
    for part in [dir, main].into_iter().flatten() {
        let part = part.trim();
        if !part.is_empty() {
            candidate.push(part);
        }
    }

    let resolved = candidate
        .canonicalize()
        .map_err(|e| KoError::path(&candidate, format!("does not exist: {}", e)))?;

    let package_dir = if resolved.is_file() {
        resolved
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| KoError::path(&resolved, "file has no parent directory"))?
    } else {
        resolved
    };

    if !package_dir.starts_with(&root) {
        return Err(KoError::path(
            &candidate,
            format!("lies outside of {}", root.display()),
        ));
    }

    Ok(package_dir)
}
