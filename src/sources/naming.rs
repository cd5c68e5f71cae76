use std::path::Path;

use crate::reference::ImageReference;

/// Converts an image name to a directory-friendly label.
/// If no tag is specified, adds "latest" as the default tag.
pub fn container_image_to_label(image_name: &str) -> String {
    let without_registry_port = match image_name.split_once('/') {
        Some((domain, rest)) if domain.contains(':') => {
            format!("{}/{}", domain.replace(':', "-"), rest)
        }
        _ => image_name.to_string(),
    };
    let last_segment = without_registry_port.rsplit('/').next().unwrap_or("");
    let normalized = if !last_segment.contains(':') && !without_registry_port.contains('@') {
        format!("{}:latest", without_registry_port)
    } else {
        without_registry_port
    };

    super::sanitize_name(&normalized.replace([':', '@'], "#").replace('/', "-"))
}

/// File stem of an archive path, sanitized.
pub fn archive_path_to_label(archive: &Path) -> String {
    let stem = archive
        .file_name()
        .and_then(|name| name.to_str())
        .map(|name| {
            name.trim_end_matches(".gz")
                .trim_end_matches(".tgz")
                .trim_end_matches(".tar")
        })
        .filter(|name| !name.is_empty())
        .unwrap_or("archive");

    super::sanitize_name(stem)
}

/// Prefix for the directory a snapshot of `reference` is flattened into, so kept snapshots
/// can be told apart.
pub fn snapshot_dir_prefix(reference: &ImageReference) -> String {
    let label = match reference {
        ImageReference::LocalId(id) => {
            let id = super::extract_short_digest(id).unwrap_or(id);
            super::sanitize_name(&id[..id.len().min(12)])
        }
        ImageReference::Remote(url) => container_image_to_label(url),
        ImageReference::Archive(path) => archive_path_to_label(path),
    };
    format!("ocidiff-{}-", label)
}
