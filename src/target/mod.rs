//! Build target registry
//!
//! Maps every declared build config to its import path. The map is built in
//! one pass and is either complete or not returned at all: a bad path, a
//! missing module or two configs naming the same package abort the call.

use crate::config::BuildConfig;
use crate::error::{KoError, KoResult};
use crate::module::{locate, ModuleResolver};
use serde::Serialize;
use std::collections::btree_map::{self, BTreeMap};
use std::path::Path;
use tracing::debug;

/// Import path -> build config, read-only once built
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ResolvedTargetMap {
    targets: BTreeMap<String, BuildConfig>,
}

impl ResolvedTargetMap {
    pub fn get(&self, import_path: &str) -> Option<&BuildConfig> {
        self.targets.get(import_path)
    }

    pub fn contains(&self, import_path: &str) -> bool {
        self.targets.contains_key(import_path)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Import paths in sorted order
    pub fn import_paths(&self) -> impl Iterator<Item = &str> {
        self.targets.keys().map(String::as_str)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, BuildConfig> {
        self.targets.iter()
    }
}

impl<'a> IntoIterator for &'a ResolvedTargetMap {
    type Item = (&'a String, &'a BuildConfig);
    type IntoIter = btree_map::Iter<'a, String, BuildConfig>;

    fn into_iter(self) -> Self::IntoIter {
        self.targets.iter()
    }
}

impl FromIterator<(String, BuildConfig)> for ResolvedTargetMap {
    fn from_iter<I: IntoIterator<Item = (String, BuildConfig)>>(iter: I) -> Self {
        Self {
            targets: iter.into_iter().collect(),
        }
    }
}

/// Builds the import path map for a project's build configs
pub struct BuildTargetRegistry {
    modules: ModuleResolver,
}

impl BuildTargetRegistry {
    pub fn new() -> Self {
        Self::with_resolver(ModuleResolver::new())
    }

    pub fn with_resolver(modules: ModuleResolver) -> Self {
        Self { modules }
    }

    /// Resolve every config under `root_dir` to a unique import path.
    ///
    /// An empty config list stands for the single default target (the
    /// package at `root_dir`).
    pub fn build_map(&self, root_dir: &Path, configs: &[BuildConfig]) -> KoResult<ResolvedTargetMap> {
        let implicit = [BuildConfig::default()];
        let configs = if configs.is_empty() {
            &implicit[..]
        } else {
            configs
        };

        let mut labeled: BTreeMap<String, (String, BuildConfig)> = BTreeMap::new();
        for (index, config) in configs.iter().enumerate() {
            let import_path = self.import_path(root_dir, config)?;
            let label = config.label(index);

            match labeled.entry(import_path) {
                btree_map::Entry::Occupied(existing) => {
                    return Err(KoError::DuplicateTarget {
                        import_path: existing.key().clone(),
                        first: existing.get().0.clone(),
                        second: label,
                    });
                }
                btree_map::Entry::Vacant(slot) => {
                    debug!("Build config {} -> {}", label, slot.key());
                    slot.insert((label, config.clone()));
                }
            }
        }

        Ok(ResolvedTargetMap {
            targets: labeled
                .into_iter()
                .map(|(import_path, (_, config))| (import_path, config))
                .collect(),
        })
    }

    /// Import path of one config, using the module that owns its location
    pub fn import_path(&self, root_dir: &Path, config: &BuildConfig) -> KoResult<String> {
        let dir = config.dir.as_deref();
        let main = config.main.as_deref();

        let location = locate(root_dir, dir, main)?;
        let module = self.modules.identify(&location)?;
        self.modules.resolve_import_path(&module, root_dir, dir, main)
    }
}

impl Default for BuildTargetRegistry {
    fn default() -> Self {
        Self::new()
    }
}
