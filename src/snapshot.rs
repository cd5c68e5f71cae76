//! A resolved image: its flattened root filesystem plus ordered build-layer commands.
//!
//! A [`Snapshot`] exclusively owns the private temporary directory its root lives in. The
//! directory is removed by [`Snapshot::release`] (or on drop) unless the caller asked to keep it
//! with [`Snapshot::persist`], which hands the path over to the caller.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::metadata::ImageMetadata;
use crate::reference::ImageReference;

/// One build layer's instruction, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerCommand {
    pub command: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
}

impl LayerCommand {
    pub fn new(command: impl Into<String>, size: u64) -> Self {
        Self {
            command: command.into(),
            size,
            created: None,
        }
    }
}

#[derive(Debug)]
pub struct Snapshot {
    reference: ImageReference,
    root: PathBuf,
    layers: Vec<LayerCommand>,
    metadata: ImageMetadata,
    dir: TempDir,
}

impl Snapshot {
    /// Takes ownership of `dir`; `root` must live inside it.
    pub fn new(
        reference: ImageReference,
        dir: TempDir,
        root: PathBuf,
        layers: Vec<LayerCommand>,
        metadata: ImageMetadata,
    ) -> Self {
        debug_assert!(root.starts_with(dir.path()));
        Self {
            reference,
            root,
            layers,
            metadata,
            dir,
        }
    }

    pub fn reference(&self) -> &ImageReference {
        &self.reference
    }

    /// Root of the flattened filesystem.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn layers(&self) -> &[LayerCommand] {
        &self.layers
    }

    pub fn metadata(&self) -> &ImageMetadata {
        &self.metadata
    }

    /// Deletes the snapshot directory.
    pub fn release(self) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir
            .close()
            .with_context(|| format!("Failed to remove snapshot directory {}", path.display()))
    }

    /// Keeps the snapshot directory on disk and returns its root path; removal becomes the
    /// caller's responsibility.
    pub fn persist(self) -> PathBuf {
        let relative = self
            .root
            .strip_prefix(self.dir.path())
            .map(Path::to_path_buf)
            .unwrap_or_default();
        self.dir.keep().join(relative)
    }
}
