//! Filesystem tree analyzer.
//!
//! Walks the flattened root without following symlinks and records one [`DirectoryEntry`]
//! per path, sorted lexicographically. Content identity is:
//! - directories: being a directory (their sizes aggregate children and are informational),
//! - regular files: size and SHA-256 digest,
//! - symlinks: the link target.
//!
//! Diff matches entries by normalized path only, so a moved file is one removal plus one
//! addition.

use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::Path;
use walkdir::WalkDir;

use super::{Analysis, Analyzer, Change, Diff, Partition};
use crate::config::PathPolicy;
use crate::snapshot::Snapshot;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryEntry {
    pub path: String,
    pub size: u64,
    pub is_dir: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_target: Option<String>,
}

impl DirectoryEntry {
    pub fn same_content(&self, other: &DirectoryEntry) -> bool {
        if self.is_dir || other.is_dir {
            return self.is_dir == other.is_dir;
        }
        self.size == other.size && self.digest == other.digest && self.link_target == other.link_target
    }
}

fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
}

/// Absolute, `/`-separated form of `rel` with trailing separators removed and case folded
/// when the policy says so.
pub fn normalize_path(rel: &Path, policy: PathPolicy) -> String {
    let mut out = String::new();
    for comp in rel.components() {
        if let std::path::Component::Normal(c) = comp {
            out.push('/');
            out.push_str(&c.to_string_lossy());
        }
    }
    if out.is_empty() {
        out.push('/');
    }
    if policy.case_sensitive {
        out
    } else {
        out.to_lowercase()
    }
}

/// Every path under `root` except the root itself, sorted by normalized path.
pub fn walk(root: &Path, policy: PathPolicy) -> Result<Vec<DirectoryEntry>> {
    struct Found {
        path: String,
        full: std::path::PathBuf,
        is_dir: bool,
        is_file: bool,
        is_symlink: bool,
        len: u64,
    }

    let mut found = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let metadata = entry
            .metadata()
            .with_context(|| format!("Failed to stat {}", entry.path().display()))?;
        found.push(Found {
            path: normalize_path(rel, policy),
            full: entry.path().to_path_buf(),
            is_dir: entry.file_type().is_dir(),
            is_file: entry.file_type().is_file(),
            is_symlink: entry.file_type().is_symlink(),
            len: metadata.len(),
        });
    }

    found.sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.full.cmp(&b.full)));
    found.dedup_by(|later, earlier| {
        let duplicate = later.path == earlier.path;
        if duplicate {
            log::debug!("Path {} collides under the path policy, keeping first", later.path);
        }
        duplicate
    });

    // Directory sizes: total of the regular files beneath them
    let mut dir_sizes: BTreeMap<String, u64> = BTreeMap::new();
    for f in found.iter().filter(|f| f.is_file) {
        let mut ancestor = f.path.as_str();
        while let Some(idx) = ancestor.rfind('/') {
            ancestor = &ancestor[..idx];
            if ancestor.is_empty() {
                break;
            }
            *dir_sizes.entry(ancestor.to_string()).or_default() += f.len;
        }
    }

    found
        .par_iter()
        .map(|f| -> Result<DirectoryEntry> {
            let (size, digest, link_target) = if f.is_dir {
                (dir_sizes.get(&f.path).copied().unwrap_or(0), None, None)
            } else if f.is_symlink {
                let target = fs::read_link(&f.full)
                    .with_context(|| format!("Failed to read link {}", f.full.display()))?;
                (f.len, None, Some(target.to_string_lossy().to_string()))
            } else if f.is_file {
                let digest = sha256_file(&f.full)
                    .with_context(|| format!("Failed to digest {}", f.full.display()))?;
                (f.len, Some(digest), None)
            } else {
                (f.len, None, None)
            };
            Ok(DirectoryEntry {
                path: f.path.clone(),
                size,
                is_dir: f.is_dir,
                digest,
                link_target,
            })
        })
        .collect()
}

pub fn diff_entries(image1: &[DirectoryEntry], image2: &[DirectoryEntry]) -> Partition<DirectoryEntry> {
    let map1: BTreeMap<&str, &DirectoryEntry> = image1.iter().map(|e| (e.path.as_str(), e)).collect();
    let map2: BTreeMap<&str, &DirectoryEntry> = image2.iter().map(|e| (e.path.as_str(), e)).collect();
    let mut partition = Partition::default();

    for (path, old) in &map1 {
        match map2.get(path) {
            None => partition.removed.push((*old).clone()),
            Some(new) if !old.same_content(new) => partition.changed.push(Change {
                image1: (*old).clone(),
                image2: (*new).clone(),
            }),
            Some(_) => {}
        }
    }
    partition.added = map2
        .iter()
        .filter(|(path, _)| !map1.contains_key(*path))
        .map(|(_, e)| (*e).clone())
        .collect();

    partition
}

pub struct FileAnalyzer {
    policy: PathPolicy,
}

impl FileAnalyzer {
    pub fn new(policy: PathPolicy) -> Self {
        Self { policy }
    }
}

impl Analyzer for FileAnalyzer {
    fn name(&self) -> &'static str {
        "file"
    }

    fn analyze(&self, snapshot: &Snapshot) -> Result<Analysis> {
        Ok(Analysis::Files(walk(snapshot.root(), self.policy)?))
    }

    fn diff(&self, image1: &Snapshot, image2: &Snapshot) -> Result<Diff> {
        let entries1 = walk(image1.root(), self.policy)?;
        let entries2 = walk(image2.root(), self.policy)?;
        Ok(Diff::Files(diff_entries(&entries1, &entries2)))
    }
}
