//! Unpack an OCI/Docker image archive into a typed, queryable structure.
//!
//! [`ExtractedImage`] unwraps a `docker save` (or OCI layout) archive into:
//! - [`ImageMetadata`] (id, repo tags, created, os, architecture),
//! - ordered [`Layer`] records (oldest → newest) pairing each history entry with its layer
//!   blob, if any.
//!
//! Layout support:
//! - `manifest.json` (Docker): `Config`, `RepoTags` and `Layers` of the first image.
//! - `index.json` only (OCI): first manifest descriptor → manifest blob → config + layer blobs.
//!   When both exist the image id is taken from `index.json`, as `docker image inspect` does.
//!
//! [`ExtractedImage::flatten_into`] replays the layers onto a root directory with whiteout
//! semantics. The unpacked archive lives in a `tempfile::TempDir` scoped to the instance.

use crate::metadata::{self, ImageMetadata};
use crate::notifier::Notifier;
use crate::snapshot::LayerCommand;
use crate::tar_extractor;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use oci_spec::image::ImageConfiguration;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Layer {
    pub command: String,
    pub created_at: Option<DateTime<Utc>>,
    pub is_empty: bool,
    pub tarball_path: Option<PathBuf>, // Some for layers with a blob
    pub size: u64,
}

impl Layer {
    pub fn to_command(&self) -> LayerCommand {
        LayerCommand {
            command: self.command.clone(),
            size: self.size,
            created: self.created_at,
        }
    }
}

/// Config, layer blobs and tags read from whichever manifest format the archive carries.
struct ManifestInfo {
    config_path: PathBuf,
    layer_paths: Vec<PathBuf>,
    repo_tags: Vec<String>,
    id: Option<String>,
}

pub struct ExtractedImage {
    _temp_dir: tempfile::TempDir,
    metadata: ImageMetadata,
    layers: Vec<Layer>,
}

impl ExtractedImage {
    pub fn from_tarball<P: AsRef<Path>>(tarball_path: P, notifier: &Notifier) -> Result<Self> {
        let tarball_path = tarball_path.as_ref();
        notifier.debug(&format!("Extracting image archive: {}", tarball_path.display()));

        let temp_dir = tempfile::Builder::new()
            .prefix("ocidiff-archive-")
            .tempdir()
            .context("Failed to create temporary directory")?;
        let extract_dir = temp_dir.path().join("extracted");
        fs::create_dir_all(&extract_dir)?;

        tar_extractor::extract_tar(tarball_path, &extract_dir)
            .with_context(|| format!("Failed to extract tar file: {}", tarball_path.display()))?;

        let manifest = Self::load_manifest(&extract_dir)?;

        let config_content = fs::read_to_string(&manifest.config_path).with_context(|| {
            format!(
                "Failed to read config file: {}",
                manifest.config_path.display()
            )
        })?;
        let config: ImageConfiguration =
            serde_json::from_str(&config_content).context("Failed to parse image configuration")?;

        let mut metadata = metadata::from_oci_config(&config);
        metadata.id = manifest
            .id
            .clone()
            .or_else(|| Self::digest_from_blob_path(&manifest.config_path))
            .unwrap_or_default();
        metadata.repo_tags = manifest.repo_tags.clone();

        let history = metadata::history_from_oci_config(&config);
        let layers = Self::pair_layers(&history, &manifest.layer_paths)?;
        notifier.debug(&format!(
            "Loaded {} history entries over {} layer blobs",
            layers.len(),
            manifest.layer_paths.len()
        ));

        Ok(ExtractedImage {
            _temp_dir: temp_dir,
            metadata,
            layers,
        })
    }

    pub fn metadata(&self) -> &ImageMetadata {
        &self.metadata
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Applies every layer blob, oldest first, onto `root`.
    pub fn flatten_into(&self, root: &Path, notifier: &Notifier) -> Result<()> {
        fs::create_dir_all(root)?;
        let total = self.layers.iter().filter(|l| l.tarball_path.is_some()).count();

        for (i, tarball) in self
            .layers
            .iter()
            .filter_map(|l| l.tarball_path.as_ref())
            .enumerate()
        {
            notifier.info(&format!("Applying layer {}/{}", i + 1, total));
            let stats = tar_extractor::apply_layer(tarball, root)
                .with_context(|| format!("Failed to apply layer {}", tarball.display()))?;
            notifier.trace(&format!(
                "Layer {}: {} entries, {} whiteouts, {} skipped",
                tarball.display(),
                stats.entries,
                stats.whiteouts,
                stats.skipped
            ));
        }
        Ok(())
    }

    fn load_manifest(extract_dir: &Path) -> Result<ManifestInfo> {
        let index_id = Self::index_manifest_digest(extract_dir)?;
        let manifest_path = extract_dir.join("manifest.json");

        if manifest_path.exists() {
            let content =
                fs::read_to_string(&manifest_path).context("Failed to read manifest.json")?;
            let manifest: Vec<serde_json::Value> =
                serde_json::from_str(&content).context("Failed to parse manifest.json")?;
            let first = manifest
                .first()
                .ok_or_else(|| anyhow!("Empty manifest.json"))?;

            let config_file = first["Config"]
                .as_str()
                .ok_or_else(|| anyhow!("Invalid manifest format - missing Config"))?;
            let layer_paths = first["Layers"]
                .as_array()
                .ok_or_else(|| anyhow!("Invalid manifest format - missing Layers array"))?
                .iter()
                .map(|l| {
                    l.as_str()
                        .map(|p| Self::archive_path(extract_dir, p))
                        .ok_or_else(|| anyhow!("Invalid layer reference"))
                })
                .collect::<Result<Vec<_>>>()?;
            let repo_tags = first["RepoTags"]
                .as_array()
                .map(|tags| {
                    tags.iter()
                        .filter_map(|t| t.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();

            return Ok(ManifestInfo {
                config_path: Self::archive_path(extract_dir, config_file),
                layer_paths,
                repo_tags,
                id: index_id,
            });
        }

        let digest = index_id.ok_or_else(|| {
            anyhow!("Invalid image archive: neither manifest.json nor index.json found")
        })?;
        let manifest_blob = Self::blob_path(extract_dir, &digest)?;
        let content = fs::read_to_string(&manifest_blob)
            .with_context(|| format!("Failed to read manifest blob {}", digest))?;
        let manifest: serde_json::Value =
            serde_json::from_str(&content).context("Failed to parse image manifest")?;

        let config_digest = manifest["config"]["digest"]
            .as_str()
            .ok_or_else(|| anyhow!("Invalid image manifest - missing config digest"))?;
        let layer_paths = manifest["layers"]
            .as_array()
            .ok_or_else(|| anyhow!("Invalid image manifest - missing layers"))?
            .iter()
            .map(|l| {
                l["digest"]
                    .as_str()
                    .ok_or_else(|| anyhow!("Invalid layer descriptor"))
                    .and_then(|d| Self::blob_path(extract_dir, d))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ManifestInfo {
            config_path: Self::blob_path(extract_dir, config_digest)?,
            layer_paths,
            repo_tags: Vec::new(),
            id: Some(digest),
        })
    }

    fn index_manifest_digest(extract_dir: &Path) -> Result<Option<String>> {
        let index_path = extract_dir.join("index.json");
        if !index_path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&index_path).context("Failed to read index.json")?;
        let index: serde_json::Value =
            serde_json::from_str(&content).context("Failed to parse index.json")?;
        Ok(index["manifests"]
            .as_array()
            .and_then(|m| m.first())
            .and_then(|m| m["digest"].as_str())
            .map(str::to_string))
    }

    fn blob_path(extract_dir: &Path, digest: &str) -> Result<PathBuf> {
        let (algorithm, hex) = digest
            .split_once(':')
            .ok_or_else(|| anyhow!("Malformed digest: {}", digest))?;
        Ok(Self::archive_path(extract_dir, &format!("blobs/{}/{}", algorithm, hex)))
    }

    /// A path named by `manifest.json` or a digest, kept inside the unpacked archive.
    fn archive_path(extract_dir: &Path, name: &str) -> PathBuf {
        extract_dir.join(tar_extractor::normalize_tar_path(Path::new(name)))
    }

    /// `blobs/sha256/<hex>` or legacy `<hex>.json` → `sha256:<hex>`.
    fn digest_from_blob_path(path: &Path) -> Option<String> {
        let name = path.file_name()?.to_str()?;
        let hex = name.strip_suffix(".json").unwrap_or(name);
        if hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
            Some(format!("sha256:{}", hex))
        } else {
            None
        }
    }

    /// Pairs history entries with layer blobs.
    ///
    /// Walks history newest → oldest, assigning blobs from the end of the manifest list to
    /// every non-empty entry. Blobs left over (images without history) get an empty command.
    fn pair_layers(history: &[metadata::HistoryEntry], layer_paths: &[PathBuf]) -> Result<Vec<Layer>> {
        let mut remaining = layer_paths.len();
        let mut layers = Vec::with_capacity(history.len().max(layer_paths.len()));

        for entry in history.iter().rev() {
            let tarball_path = if !entry.empty_layer && remaining > 0 {
                remaining -= 1;
                Some(layer_paths[remaining].clone())
            } else {
                None
            };
            let size = match &tarball_path {
                Some(path) => fs::metadata(path)
                    .with_context(|| format!("Missing layer blob: {}", path.display()))?
                    .len(),
                None => 0,
            };

            layers.push(Layer {
                command: entry.command.clone(),
                created_at: entry.created,
                is_empty: entry.empty_layer,
                tarball_path,
                size,
            });
        }

        for path in layer_paths[..remaining].iter().rev() {
            let size = fs::metadata(path)
                .with_context(|| format!("Missing layer blob: {}", path.display()))?
                .len();
            layers.push(Layer {
                command: String::new(),
                created_at: None,
                is_empty: false,
                tarball_path: Some(path.clone()),
                size,
            });
        }

        layers.reverse();
        Ok(layers)
    }
}
