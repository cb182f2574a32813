//! `go.mod` module descriptor reader

use crate::error::{KoError, KoResult};
use crate::module::ModuleDescriptorReader;
use std::fs;
use std::path::Path;

/// File name of the Go module descriptor
pub const GO_MOD: &str = "go.mod";

/// Reads the `module` directive from `<dir>/go.mod`
#[derive(Debug, Clone, Copy, Default)]
pub struct GoModReader;

impl ModuleDescriptorReader for GoModReader {
    fn read_module_path(&self, dir: &Path) -> KoResult<Option<String>> {
        let path = dir.join(GO_MOD);
        if !path.is_file() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .map_err(|e| KoError::io(format!("reading {}", path.display()), e))?;

        parse_module_directive(&content)
            .map(Some)
            .ok_or_else(|| KoError::Config {
                dir: dir.to_path_buf(),
                reason: format!("{} has no module directive", path.display()),
            })
    }

    fn descriptor_name(&self) -> &'static str {
        GO_MOD
    }
}

/// Extract the module path from go.mod content.
///
/// Accepts bare and quoted paths and ignores trailing `//` comments.
pub fn parse_module_directive(content: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let line = match line.find("//") {
            Some(i) => &line[..i],
            None => line,
        }
        .trim();

        let rest = line.strip_prefix("module")?;
        if !rest.starts_with(|c: char| c.is_whitespace() || c == '"' || c == '`') {
            return None;
        }

        let path = rest.trim().trim_matches(|c| c == '"' || c == '`');
        if path.is_empty() {
            None
        } else {
            Some(path.to_string())
        }
    })
}
