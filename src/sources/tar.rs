use std::path::PathBuf;
use tempfile::TempDir;

use super::Source;
use crate::error::ResolveError;
use crate::notifier::Notifier;
use crate::reference::ImageReference;

/// Tar implementation of the Source trait for pre-saved image archives
pub struct TarSource;

impl TarSource {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TarSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Source for TarSource {
    fn name(&self) -> &str {
        "tar"
    }

    fn supports(&self, reference: &ImageReference) -> bool {
        matches!(reference, ImageReference::Archive(_))
    }

    fn get_image_tarball(
        &self,
        reference: &ImageReference,
        notifier: &Notifier,
    ) -> Result<(PathBuf, Option<TempDir>), ResolveError> {
        let ImageReference::Archive(tarball_path) = reference else {
            return Err(ResolveError::NotFound(format!(
                "{} is not an image archive",
                reference
            )));
        };

        if !tarball_path.exists() {
            return Err(ResolveError::NotFound(format!(
                "Tarball file does not exist: {}",
                tarball_path.display()
            )));
        }

        if !tarball_path.is_file() {
            return Err(ResolveError::NotFound(format!(
                "Path is not a file: {}",
                tarball_path.display()
            )));
        }

        notifier.debug(&format!("Using image archive {}", tarball_path.display()));

        // The archive belongs to the caller, no temp dir needed
        Ok((tarball_path.clone(), None))
    }
}
