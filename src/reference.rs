//! Image references accepted on the command line.
//!
//! An argument is classified, in order, as an existing local archive, a local image ID
//! (12 or 64 hex characters, optionally prefixed with `sha256:`), or a remote image URL in
//! `[registry[:port]/]name[:tag][@digest]` form. Anything else is rejected before any
//! resolution is attempted.

use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::error::{Error, Result};

static IMAGE_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:sha256:)?(?:[a-f0-9]{12}|[a-f0-9]{64})$").expect("valid image id regex")
});

static IMAGE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(?:[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?",
        r"(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?)*(?::[0-9]+)?/)?",
        r"[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*",
        r"(?:/[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*)*",
        r"(?::[A-Za-z0-9_][A-Za-z0-9_.-]{0,127})?",
        r"(?:@sha256:[a-f0-9]{64})?$",
    ))
    .expect("valid image url regex")
});

const ARCHIVE_EXTENSIONS: &[&str] = &["tar", "tgz", "gz"];

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ImageReference {
    LocalId(String),
    Remote(String),
    Archive(PathBuf),
}

impl ImageReference {
    /// Classifies a command line argument, without touching any container engine.
    pub fn parse(arg: &str) -> Result<Self> {
        let path = Path::new(arg);
        if has_archive_extension(path) {
            if path.is_file() {
                return Ok(ImageReference::Archive(path.to_path_buf()));
            }
            return Err(Error::Argument(format!(
                "Argument {} looks like an image archive but no such file exists",
                arg
            )));
        }

        if IMAGE_ID.is_match(arg) {
            return Ok(ImageReference::LocalId(arg.to_string()));
        }

        if IMAGE_URL.is_match(arg) {
            return Ok(ImageReference::Remote(arg.to_string()));
        }

        Err(Error::Argument(format!(
            "Argument {} is not an image ID, URL, or tar",
            arg
        )))
    }

    /// The original argument text.
    pub fn as_str(&self) -> std::borrow::Cow<'_, str> {
        match self {
            ImageReference::LocalId(id) => id.as_str().into(),
            ImageReference::Remote(url) => url.as_str().into(),
            ImageReference::Archive(path) => path.to_string_lossy(),
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

fn has_archive_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ARCHIVE_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}
