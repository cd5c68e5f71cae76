//! Synthetic `docker save` archives for integration tests.
//!
//! Every archive carries `manifest.json`, an image config with history, and one tar per
//! non-empty layer, which is the same shape the engines produce.

#![allow(dead_code)]

use anyhow::Result;
use ocidiff::{Config, Notifier, Orchestrator};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tar_rs as tar;

enum Entry {
    Dir(String),
    File(String, Vec<u8>),
    Symlink(String, String),
}

/// One history entry and, unless empty, its layer contents.
pub struct TestLayer {
    command: String,
    empty: bool,
    entries: Vec<Entry>,
}

impl TestLayer {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            empty: false,
            entries: Vec::new(),
        }
    }

    /// A metadata-only history entry such as `ENV` or `CMD`.
    pub fn empty(command: &str) -> Self {
        Self {
            empty: true,
            ..Self::new(command)
        }
    }

    pub fn dir(mut self, path: &str) -> Self {
        self.entries.push(Entry::Dir(path.to_string()));
        self
    }

    pub fn file(mut self, path: &str, content: impl AsRef<[u8]>) -> Self {
        self.entries
            .push(Entry::File(path.to_string(), content.as_ref().to_vec()));
        self
    }

    pub fn symlink(mut self, path: &str, target: &str) -> Self {
        self.entries
            .push(Entry::Symlink(path.to_string(), target.to_string()));
        self
    }

    fn to_tar(&self) -> Result<Vec<u8>> {
        let mut builder = tar::Builder::new(Vec::new());
        for entry in &self.entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(0);
            match entry {
                Entry::Dir(path) => {
                    header.set_mode(0o755);
                    header.set_entry_type(tar::EntryType::Directory);
                    builder.append_data(&mut header, path, std::io::empty())?;
                }
                Entry::File(path, content) => {
                    header.set_size(content.len() as u64);
                    header.set_mode(0o644);
                    header.set_entry_type(tar::EntryType::Regular);
                    builder.append_data(&mut header, path, content.as_slice())?;
                }
                Entry::Symlink(path, target) => {
                    header.set_mode(0o777);
                    header.set_entry_type(tar::EntryType::Symlink);
                    builder.append_link(&mut header, path, target)?;
                }
            }
        }
        Ok(builder.into_inner()?)
    }
}

fn append_bytes(builder: &mut tar::Builder<Vec<u8>>, path: &str, bytes: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_entry_type(tar::EntryType::Regular);
    builder.append_data(&mut header, path, bytes)?;
    Ok(())
}

/// Writes `<dir>/<name>.tar` holding an image tagged `<name>:test` built from `layers`.
pub fn write_image(dir: &Path, name: &str, layers: &[TestLayer]) -> Result<PathBuf> {
    let mut outer = tar::Builder::new(Vec::new());
    let mut layer_paths = Vec::new();
    let mut history = Vec::new();

    for (i, layer) in layers.iter().enumerate() {
        history.push(json!({
            "created": format!("2024-01-01T00:00:{:02}Z", i),
            "created_by": format!("/bin/sh -c {}", layer.command),
            "empty_layer": layer.empty,
        }));
        if layer.empty {
            continue;
        }
        let path = format!("layer{}/layer.tar", i);
        append_bytes(&mut outer, &path, &layer.to_tar()?)?;
        layer_paths.push(path);
    }

    let config = json!({
        "architecture": "amd64",
        "os": "linux",
        "created": "2024-01-01T00:00:00Z",
        "rootfs": { "type": "layers", "diff_ids": [] },
        "history": history,
    });
    append_bytes(&mut outer, "config.json", &serde_json::to_vec(&config)?)?;

    let manifest = json!([{
        "Config": "config.json",
        "RepoTags": [format!("{}:test", name)],
        "Layers": layer_paths,
    }]);
    append_bytes(&mut outer, "manifest.json", &serde_json::to_vec(&manifest)?)?;

    let archive = dir.join(format!("{}.tar", name));
    fs::write(&archive, outer.into_inner()?)?;
    Ok(archive)
}

/// A dpkg status database listing `(name, version)` pairs as installed.
pub fn dpkg_status(packages: &[(&str, &str)]) -> String {
    packages
        .iter()
        .map(|(name, version)| {
            format!(
                "Package: {}\nStatus: install ok installed\nInstalled-Size: 10\nVersion: {}\n",
                name, version
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn orchestrator(analyzers: &[&str], persist: bool) -> Orchestrator {
    let config = Config {
        analyzers: analyzers.iter().map(|a| a.to_string()).collect(),
        persist,
        ..Config::default()
    };
    Orchestrator::new(config, Notifier::silent())
}

pub fn arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Snapshot directories left in the system temp dir for an archive called `name`.
pub fn leftover_snapshots(name: &str) -> Vec<PathBuf> {
    let prefix = format!("ocidiff-{}-", name);
    fs::read_dir(std::env::temp_dir())
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.file_name().to_string_lossy().starts_with(&prefix))
                .map(|e| e.path())
                .collect()
        })
        .unwrap_or_default()
}
