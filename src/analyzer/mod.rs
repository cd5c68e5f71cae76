//! Pluggable analyzers.
//!
//! Every analyzer implements [`Analyzer`], which covers both single-image inventory and
//! two-image diff so the [`Registry`] can hand out one capability per name:
//! - `apt`, `node`, `pip`: [`package::PackageAnalyzer`] over an ecosystem parser,
//! - `file`: [`file::FileAnalyzer`],
//! - `history`: [`history::HistoryAnalyzer`].
//!
//! Analyzers only read their snapshots and return fresh values, so any number of them can run
//! at once over the same snapshots.

pub mod apt;
pub mod file;
pub mod history;
pub mod node;
pub mod package;
pub mod pip;
pub mod registry;

use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::metadata::ImageMetadata;
use crate::snapshot::{LayerCommand, Snapshot};
pub use file::DirectoryEntry;
pub use package::{PackageMap, PackageRecord};
pub use registry::Registry;

pub trait Analyzer: Send + Sync {
    /// Registry name, also the key of the result.
    fn name(&self) -> &'static str;

    fn analyze(&self, snapshot: &Snapshot) -> Result<Analysis>;

    fn diff(&self, image1: &Snapshot, image2: &Snapshot) -> Result<Diff>;
}

/// Single-image inventory.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Analysis {
    Packages(PackageMap),
    Files(Vec<DirectoryEntry>),
    History(Vec<LayerCommand>),
}

/// An item present on both sides whose content differs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Change<T> {
    pub image1: T,
    pub image2: T,
}

/// Added / removed / changed partition of a two-image comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Partition<T> {
    pub added: Vec<T>,
    pub removed: Vec<T>,
    pub changed: Vec<Change<T>>,
}

impl<T> Default for Partition<T> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            removed: Vec::new(),
            changed: Vec::new(),
        }
    }
}

impl<T> Partition<T> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Diff {
    Packages(Partition<PackageRecord>),
    Files(Partition<DirectoryEntry>),
    History(Partition<LayerCommand>),
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        match self {
            Diff::Packages(p) => p.is_empty(),
            Diff::Files(p) => p.is_empty(),
            Diff::History(p) => p.is_empty(),
        }
    }

    /// Identity keys of (added, removed, changed): name@version, path or command.
    pub fn keys(&self) -> (Vec<String>, Vec<String>, Vec<String>) {
        fn split<T>(p: &Partition<T>, key: impl Fn(&T) -> String) -> (Vec<String>, Vec<String>, Vec<String>) {
            (
                p.added.iter().map(&key).collect(),
                p.removed.iter().map(&key).collect(),
                p.changed.iter().map(|c| key(&c.image1)).collect(),
            )
        }
        match self {
            Diff::Packages(p) => split(p, |r| format!("{}@{}", r.name, r.version)),
            Diff::Files(p) => split(p, |e| e.path.clone()),
            Diff::History(p) => split(p, |l| l.command.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyzeResult {
    pub image: String,
    pub analyzer: String,
    pub metadata: ImageMetadata,
    pub analysis: Analysis,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffResult {
    pub analyzer: String,
    pub image1: String,
    pub image2: String,
    pub diff: Diff,
}

/// Results keyed by analyzer name; iteration is alphabetical.
pub type ResultMap<T> = BTreeMap<String, T>;
