use std::path::PathBuf;
use tempfile::TempDir;

use crate::error::ResolveError;
use crate::notifier::Notifier;
use crate::reference::ImageReference;

/// Source trait for getting image archives from different places.
///
/// Implementations only retrieve; unpacking and flattening belong to the resolver.
pub trait Source: Send + Sync {
    /// Returns the name of the source for identification purposes
    fn name(&self) -> &str;

    /// Whether this source knows how to retrieve `reference` at all.
    fn supports(&self, reference: &ImageReference) -> bool;

    /// Retrieves an image archive and returns the path to it along with the temp directory
    /// holding it, if one was created. The directory must be kept alive while the archive is
    /// read.
    fn get_image_tarball(
        &self,
        reference: &ImageReference,
        notifier: &Notifier,
    ) -> Result<(PathBuf, Option<TempDir>), ResolveError>;
}
