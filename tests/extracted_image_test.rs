mod common;

use anyhow::Result;
use common::{write_image, TestLayer};
use ocidiff::extracted_image::ExtractedImage;
use ocidiff::Notifier;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use tar_rs as tar;
use tempfile::tempdir;

#[test]
fn test_docker_archive_layers_and_metadata() -> Result<()> {
    let dir = tempdir()?;
    let archive = write_image(
        dir.path(),
        "docker-layout",
        &[
            TestLayer::new("#(nop) ADD rootfs /").file("etc/hostname", "box\n"),
            TestLayer::empty("#(nop)  ENV PATH=/usr/bin"),
            TestLayer::new("echo hi > /hi").file("hi", "hi\n"),
        ],
    )?;

    let image = ExtractedImage::from_tarball(&archive, &Notifier::silent())?;

    let metadata = image.metadata();
    assert_eq!(metadata.architecture, "amd64");
    assert_eq!(metadata.os, "linux");
    assert_eq!(metadata.repo_tags, vec!["docker-layout:test".to_string()]);
    assert!(metadata.created.is_some());

    let layers = image.layers();
    assert_eq!(layers.len(), 3);
    assert_eq!(layers[0].command, "ADD rootfs /");
    assert!(layers[1].is_empty);
    assert!(layers[1].tarball_path.is_none());
    assert_eq!(layers[1].command, "ENV PATH=/usr/bin");
    assert_eq!(layers[2].command, "echo hi > /hi");
    assert!(layers[2].tarball_path.is_some());

    let root = dir.path().join("rootfs");
    image.flatten_into(&root, &Notifier::silent())?;
    assert_eq!(fs::read_to_string(root.join("etc/hostname"))?, "box\n");
    assert_eq!(fs::read_to_string(root.join("hi"))?, "hi\n");
    Ok(())
}

fn append(builder: &mut tar::Builder<Vec<u8>>, path: &str, bytes: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_entry_type(tar::EntryType::Regular);
    builder.append_data(&mut header, path, bytes)?;
    Ok(())
}

fn digest(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

fn blob_name(digest: &str) -> String {
    format!("blobs/sha256/{}", digest.trim_start_matches("sha256:"))
}

/// An OCI image layout archive: `index.json` → manifest blob → config and layer blobs.
fn write_oci_layout(dir: &Path) -> Result<std::path::PathBuf> {
    let mut layer = tar::Builder::new(Vec::new());
    append(&mut layer, "srv/index.html", b"<h1>ok</h1>")?;
    let layer = layer.into_inner()?;
    let layer_digest = digest(&layer);

    let config = serde_json::to_vec(&json!({
        "architecture": "arm64",
        "os": "linux",
        "rootfs": { "type": "layers", "diff_ids": [layer_digest] },
        "history": [{ "created_by": "COPY index.html /srv/" }],
    }))?;
    let config_digest = digest(&config);

    let manifest = serde_json::to_vec(&json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.manifest.v1+json",
        "config": {
            "mediaType": "application/vnd.oci.image.config.v1+json",
            "digest": config_digest,
            "size": config.len(),
        },
        "layers": [{
            "mediaType": "application/vnd.oci.image.layer.v1.tar",
            "digest": layer_digest,
            "size": layer.len(),
        }],
    }))?;
    let manifest_digest = digest(&manifest);

    let index = serde_json::to_vec(&json!({
        "schemaVersion": 2,
        "manifests": [{
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "digest": manifest_digest,
            "size": manifest.len(),
        }],
    }))?;

    let mut outer = tar::Builder::new(Vec::new());
    append(&mut outer, "oci-layout", br#"{"imageLayoutVersion":"1.0.0"}"#)?;
    append(&mut outer, "index.json", &index)?;
    append(&mut outer, &blob_name(&manifest_digest), &manifest)?;
    append(&mut outer, &blob_name(&config_digest), &config)?;
    append(&mut outer, &blob_name(&layer_digest), &layer)?;

    let path = dir.join("oci-layout.tar");
    fs::write(&path, outer.into_inner()?)?;
    Ok(path)
}

#[test]
fn test_oci_layout_archive() -> Result<()> {
    let dir = tempdir()?;
    let archive = write_oci_layout(dir.path())?;

    let image = ExtractedImage::from_tarball(&archive, &Notifier::silent())?;
    assert_eq!(image.metadata().architecture, "arm64");
    assert!(image.metadata().id.starts_with("sha256:"));
    assert!(image.metadata().repo_tags.is_empty());

    assert_eq!(image.layers().len(), 1);
    assert_eq!(image.layers()[0].command, "COPY index.html /srv/");

    let root = dir.path().join("rootfs");
    image.flatten_into(&root, &Notifier::silent())?;
    assert_eq!(fs::read_to_string(root.join("srv/index.html"))?, "<h1>ok</h1>");
    Ok(())
}

#[test]
fn test_archive_without_manifest_is_rejected() -> Result<()> {
    let dir = tempdir()?;
    let mut outer = tar::Builder::new(Vec::new());
    append(&mut outer, "README", b"not an image")?;
    let path = dir.path().join("not-an-image.tar");
    fs::write(&path, outer.into_inner()?)?;

    let err = ExtractedImage::from_tarball(&path, &Notifier::silent())
        .err()
        .expect("archive without manifest must fail");
    assert!(format!("{err:#}").contains("neither manifest.json nor index.json"));
    Ok(())
}
