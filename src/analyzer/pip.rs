//! Python installed distributions: `*.dist-info` and `*.egg-info` entries of every
//! `site-packages` / `dist-packages` directory in the image.
//!
//! Names are normalized the PEP 503 way (lowercase, runs of `-_.` collapsed to `-`), so the
//! same distribution compares equal whatever spelling its metadata uses. Size is the
//! distribution's top-level module directory when one exists.

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::package::{
    directory_size, insert_record, is_real_dir, is_regular_file, PackageMap, PackageParser,
    PackageRecord,
};

const PACKAGE_DIRS: &[&str] = &["site-packages", "dist-packages"];

pub struct PipParser;

pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if matches!(c, '-' | '_' | '.') {
            if !out.ends_with('-') {
                out.push('-');
            }
        } else {
            out.push(c.to_ascii_lowercase());
        }
    }
    out
}

/// `Name` and `Version` headers of a METADATA / PKG-INFO file.
fn read_metadata_headers(content: &str) -> (Option<String>, Option<String>) {
    let mut name = None;
    let mut version = None;
    for line in content.lines() {
        // Headers end at the first blank line, the description follows
        if line.trim().is_empty() {
            break;
        }
        if let Some(value) = line.strip_prefix("Name:") {
            name.get_or_insert_with(|| value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("Version:") {
            version.get_or_insert_with(|| value.trim().to_string());
        }
    }
    (name, version)
}

/// `requests-2.31.0.dist-info` → (`requests`, `2.31.0`).
fn split_info_dir_name(stem: &str) -> Option<(String, String)> {
    let (name, version) = stem.split_once('-')?;
    let version = version.split('-').next().unwrap_or(version);
    Some((name.to_string(), version.to_string()))
}

fn metadata_file(info: &Path) -> Option<PathBuf> {
    if is_regular_file(info) {
        return Some(info.to_path_buf());
    }
    if !is_real_dir(info) {
        return None;
    }
    ["METADATA", "PKG-INFO"]
        .iter()
        .map(|f| info.join(f))
        .find(|p| is_regular_file(p))
}

fn parse_distribution(packages_dir: &Path, info: &Path) -> Option<PackageRecord> {
    let file_name = info.file_name()?.to_str()?;
    let stem = file_name
        .strip_suffix(".dist-info")
        .or_else(|| file_name.strip_suffix(".egg-info"))?;

    let (mut name, mut version) = metadata_file(info)
        .and_then(|p| fs::read_to_string(p).ok())
        .map(|c| read_metadata_headers(&c))
        .unwrap_or((None, None));

    if name.is_none() || version.is_none() {
        if let Some((dir_name, dir_version)) = split_info_dir_name(stem) {
            name.get_or_insert(dir_name);
            version.get_or_insert(dir_version);
        }
    }

    let name = normalize_name(&name?);
    let version = version?;
    let module_dir = packages_dir.join(name.replace('-', "_"));
    let size = is_real_dir(&module_dir).then(|| directory_size(&module_dir, &["__pycache__"]));

    Some(PackageRecord::new(name, version, size))
}

impl PackageParser for PipParser {
    fn name(&self) -> &'static str {
        "pip"
    }

    fn parse(&self, root: &Path) -> Result<PackageMap> {
        let mut packages = PackageMap::new();

        let package_dirs: Vec<PathBuf> = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_type().is_dir()
                    && e.file_name()
                        .to_str()
                        .map(|n| PACKAGE_DIRS.contains(&n))
                        .unwrap_or(false)
            })
            .map(|e| e.into_path())
            .collect();

        for packages_dir in package_dirs {
            let mut infos: Vec<PathBuf> = match fs::read_dir(&packages_dir) {
                Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
                Err(e) => {
                    log::warn!("Failed to list {}: {}", packages_dir.display(), e);
                    continue;
                }
            };
            infos.sort();

            for info in infos {
                if let Some(record) = parse_distribution(&packages_dir, &info) {
                    insert_record(&mut packages, record);
                }
            }
        }

        Ok(packages)
    }
}
