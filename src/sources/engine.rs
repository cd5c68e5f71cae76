use anyhow::{anyhow, Context};
use clap::ValueEnum;
use std::path::PathBuf;
use std::process::Command;
use tempfile::TempDir;

use super::Source;
use crate::error::ResolveError;
use crate::notifier::Notifier;
use crate::reference::ImageReference;

/// Which container engine CLI retrieves local IDs and remote URLs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Default)]
pub enum RetrievalMode {
    #[default]
    Docker,
    Nerdctl,
}

impl RetrievalMode {
    pub fn binary(self) -> &'static str {
        match self {
            RetrievalMode::Docker => "docker",
            RetrievalMode::Nerdctl => "nerdctl",
        }
    }
}

/// Container engine implementation of the Source trait.
///
/// Local IDs must already be present in the engine. Remote URLs are pulled unless the engine
/// already has them, then everything is exported with `save`.
pub struct EngineSource {
    mode: RetrievalMode,
}

impl EngineSource {
    pub fn new(mode: RetrievalMode) -> Self {
        Self { mode }
    }

    fn run_command(&self, args: &[&str]) -> anyhow::Result<String> {
        let output = Command::new(self.mode.binary())
            .args(args)
            .output()
            .with_context(|| format!("Failed to execute {} command: {:?}", self.mode.binary(), args))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("{} command failed: {}", self.mode.binary(), error.trim()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn is_present(&self, image: &str) -> bool {
        self.run_command(&["image", "inspect", image]).is_ok()
    }
}

/// Registry and daemon messages that mean the image does not exist, as opposed to the
/// transport failing.
fn looks_like_not_found(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    ["not found", "manifest unknown", "no such image", "does not exist"]
        .iter()
        .any(|needle| message.contains(needle))
}

impl Source for EngineSource {
    fn name(&self) -> &str {
        self.mode.binary()
    }

    fn supports(&self, reference: &ImageReference) -> bool {
        matches!(
            reference,
            ImageReference::LocalId(_) | ImageReference::Remote(_)
        )
    }

    fn get_image_tarball(
        &self,
        reference: &ImageReference,
        notifier: &Notifier,
    ) -> Result<(PathBuf, Option<TempDir>), ResolveError> {
        let image = match reference {
            ImageReference::LocalId(id) => {
                if !self.is_present(id) {
                    return Err(ResolveError::NotFound(format!(
                        "no local image with id {}",
                        id
                    )));
                }
                id.as_str()
            }
            ImageReference::Remote(url) => {
                if !self.is_present(url) {
                    notifier.info(&format!("Pulling image '{}'...", url));
                    if let Err(e) = self.run_command(&["pull", url]) {
                        let message = format!("{:#}", e);
                        return Err(if looks_like_not_found(&message) {
                            ResolveError::NotFound(message)
                        } else {
                            ResolveError::TransportFailure(e)
                        });
                    }
                }
                url.as_str()
            }
            ImageReference::Archive(path) => {
                return Err(ResolveError::NotFound(format!(
                    "{} cannot load archive {}",
                    self.name(),
                    path.display()
                )))
            }
        };

        let temp_dir = tempfile::Builder::new()
            .prefix("ocidiff-save-")
            .tempdir()
            .context("Failed to create temporary directory")
            .map_err(ResolveError::TransportFailure)?;
        let tarball_path = temp_dir.path().join("image.tar");
        let tarball_arg = tarball_path.to_string_lossy().to_string();

        notifier.info(&format!("Exporting image '{}' to tarball...", image));
        self.run_command(&["save", "-o", &tarball_arg, image])
            .map_err(ResolveError::TransportFailure)?;

        Ok((tarball_path, Some(temp_dir)))
    }
}
