//! Node packages: every `node_modules/<pkg>/package.json` and
//! `node_modules/@scope/<pkg>/package.json` anywhere in the image.
//!
//! Nested dependency trees are legal, so one name may show up with several versions. Size is
//! the package directory without its own nested `node_modules`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

use super::package::{directory_size, insert_record, PackageMap, PackageParser, PackageRecord};

#[derive(Debug, Deserialize)]
struct PackageJson {
    name: Option<String>,
    version: Option<String>,
}

pub struct NodeParser;

/// Whether `package_json` sits directly in a package directory of some `node_modules`.
fn is_installed_package(package_json: &Path) -> bool {
    let Some(pkg_dir) = package_json.parent() else {
        return false;
    };
    let Some(parent) = pkg_dir.parent() else {
        return false;
    };
    let parent_name = parent.file_name().and_then(|n| n.to_str()).unwrap_or("");
    if parent_name == "node_modules" {
        return true;
    }
    parent_name.starts_with('@')
        && parent
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n == "node_modules")
            .unwrap_or(false)
}

impl PackageParser for NodeParser {
    fn name(&self) -> &'static str {
        "node"
    }

    fn parse(&self, root: &Path) -> Result<PackageMap> {
        let mut packages = PackageMap::new();

        for entry in WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file()
                || entry.file_name() != "package.json"
                || !is_installed_package(entry.path())
            {
                continue;
            }

            let path = entry.path();
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let manifest: PackageJson = match serde_json::from_str(&content) {
                Ok(manifest) => manifest,
                Err(e) => {
                    log::warn!("Skipping unparsable {}: {}", path.display(), e);
                    continue;
                }
            };

            let pkg_dir = path.parent().unwrap_or(root);
            let Some(version) = manifest.version else {
                log::debug!("Skipping {} without version", path.display());
                continue;
            };
            let name = manifest.name.unwrap_or_else(|| {
                pkg_dir
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default()
            });

            let size = directory_size(pkg_dir, &["node_modules"]);
            insert_record(&mut packages, PackageRecord::new(name, version, Some(size)));
        }

        Ok(packages)
    }
}
