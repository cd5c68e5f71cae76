//! Image reference → flattened [`Snapshot`].
//!
//! [`ImageResolver`] picks the first [`Source`] that supports the reference, unpacks the
//! archive it returns, and replays the layers into `rootfs/` inside a private temporary
//! directory owned by the resulting snapshot. Intermediate archives are dropped as soon as the
//! snapshot is built.

use anyhow::Context;

use crate::error::ResolveError;
use crate::extracted_image::ExtractedImage;
use crate::notifier::Notifier;
use crate::reference::ImageReference;
use crate::snapshot::Snapshot;
use crate::sources::{naming, EngineSource, RetrievalMode, Source, TarSource};

pub struct ImageResolver {
    sources: Vec<Box<dyn Source>>,
}

impl ImageResolver {
    /// Archives are read directly; IDs and URLs go through the engine named by `mode`.
    pub fn new(mode: RetrievalMode) -> Self {
        Self::with_sources(vec![
            Box::new(TarSource::new()),
            Box::new(EngineSource::new(mode)),
        ])
    }

    pub fn with_sources(sources: Vec<Box<dyn Source>>) -> Self {
        Self { sources }
    }

    pub fn resolve(
        &self,
        reference: &ImageReference,
        notifier: &Notifier,
    ) -> Result<Snapshot, ResolveError> {
        let source = self
            .sources
            .iter()
            .find(|s| s.supports(reference))
            .ok_or_else(|| {
                ResolveError::NotFound(format!("no image source can retrieve {}", reference))
            })?;

        notifier.info(&format!(
            "Retrieving {} using {} source...",
            reference,
            source.name()
        ));
        // Keeps an engine export alive until the archive has been unpacked.
        let (tarball_path, _tarball_dir) = source.get_image_tarball(reference, notifier)?;

        notifier.info(&format!("Unpacking {}...", reference));
        let image = ExtractedImage::from_tarball(&tarball_path, notifier)
            .map_err(ResolveError::ExtractFailure)?;

        let dir = tempfile::Builder::new()
            .prefix(&naming::snapshot_dir_prefix(reference))
            .tempdir()
            .context("Failed to create snapshot directory")
            .map_err(ResolveError::ExtractFailure)?;
        let root = dir.path().join("rootfs");

        image
            .flatten_into(&root, notifier)
            .map_err(ResolveError::ExtractFailure)?;

        let layers = image.layers().iter().map(|l| l.to_command()).collect();
        notifier.debug(&format!(
            "Flattened {} ({}) into {}",
            reference,
            image.metadata().id,
            root.display()
        ));

        Ok(Snapshot::new(
            reference.clone(),
            dir,
            root,
            layers,
            image.metadata().clone(),
        ))
    }
}
