//! Package-manager analyzer, generic over an ecosystem parser.
//!
//! A [`PackageParser`] turns a snapshot root into a [`PackageMap`]
//! (`name → version → PackageRecord`); several installed versions of one name are legal.
//! The diff walks names and versions in `BTreeMap` order, so output is alphabetical by name,
//! then by version.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::{Analysis, Analyzer, Change, Diff, Partition};
use crate::snapshot::Snapshot;
use crate::tar_extractor::resolve_in_root;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageRecord {
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl PackageRecord {
    pub fn new(name: impl Into<String>, version: impl Into<String>, size: Option<u64>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            size,
        }
    }
}

pub type PackageMap = BTreeMap<String, BTreeMap<String, PackageRecord>>;

/// Inserts `record`, keeping the first one seen for a duplicate name + version.
pub fn insert_record(packages: &mut PackageMap, record: PackageRecord) {
    let versions = packages.entry(record.name.clone()).or_default();
    if versions.contains_key(&record.version) {
        log::debug!(
            "Ignoring duplicate package record {}@{}",
            record.name,
            record.version
        );
        return;
    }
    versions.insert(record.version.clone(), record);
}

/// `rel` inside the snapshot at `root`, with symlinked ancestors resolved within the snapshot.
///
/// Image symlinks are stored verbatim, so an absolute target such as `/var/lib/dpkg -> /data`
/// must not be followed on the host.
pub(crate) fn path_in_root(root: &Path, rel: &str) -> PathBuf {
    root.join(resolve_in_root(root, Path::new(rel)))
}

/// Regular file at `path`; a symlink in last position does not count.
pub(crate) fn is_regular_file(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// Real directory at `path`; a symlink in last position does not count.
pub(crate) fn is_real_dir(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

/// Total size of regular files under `dir`, not descending into directories named in `skip`.
pub fn directory_size(dir: &Path, skip: &[&str]) -> u64 {
    WalkDir::new(dir)
        .follow_links(false)
        .follow_root_links(false)
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !(e.file_type().is_dir()
                    && e.file_name().to_str().map(|n| skip.contains(&n)).unwrap_or(false))
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Knows one ecosystem's on-disk package database layout.
pub trait PackageParser: Send + Sync {
    fn name(&self) -> &'static str;

    /// Installed packages under `root`. A missing database means no packages, not an error.
    fn parse(&self, root: &Path) -> Result<PackageMap>;
}

pub struct PackageAnalyzer<P: PackageParser> {
    parser: P,
}

impl<P: PackageParser> PackageAnalyzer<P> {
    pub fn new(parser: P) -> Self {
        Self { parser }
    }

    fn packages(&self, snapshot: &Snapshot) -> Result<PackageMap> {
        self.parser
            .parse(snapshot.root())
            .with_context(|| format!("Failed to read {} packages of {}", self.parser.name(), snapshot.reference()))
    }
}

impl<P: PackageParser> Analyzer for PackageAnalyzer<P> {
    fn name(&self) -> &'static str {
        self.parser.name()
    }

    fn analyze(&self, snapshot: &Snapshot) -> Result<Analysis> {
        Ok(Analysis::Packages(self.packages(snapshot)?))
    }

    fn diff(&self, image1: &Snapshot, image2: &Snapshot) -> Result<Diff> {
        let packages1 = self.packages(image1)?;
        let packages2 = self.packages(image2)?;
        Ok(Diff::Packages(diff_packages(&packages1, &packages2)))
    }
}

/// Per name on either side: versions only in `image1` are removed, only in `image2` added,
/// in both with different metadata changed. Identical records are omitted.
pub fn diff_packages(image1: &PackageMap, image2: &PackageMap) -> Partition<PackageRecord> {
    let empty = BTreeMap::new();
    let mut partition = Partition::default();

    let mut names: Vec<&String> = image1.keys().chain(image2.keys()).collect();
    names.sort();
    names.dedup();

    for name in names {
        let versions1 = image1.get(name).unwrap_or(&empty);
        let versions2 = image2.get(name).unwrap_or(&empty);

        let mut versions: Vec<&String> = versions1.keys().chain(versions2.keys()).collect();
        versions.sort();
        versions.dedup();

        for version in versions {
            match (versions1.get(version), versions2.get(version)) {
                (Some(old), None) => partition.removed.push(old.clone()),
                (None, Some(new)) => partition.added.push(new.clone()),
                (Some(old), Some(new)) if old != new => partition.changed.push(Change {
                    image1: old.clone(),
                    image2: new.clone(),
                }),
                _ => {}
            }
        }
    }

    partition
}
