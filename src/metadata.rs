use chrono::{DateTime, Utc};
use oci_spec::image::ImageConfiguration;
use serde::Serialize;

/// Image facts reported alongside analysis results.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImageMetadata {
    pub id: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub repo_tags: Vec<String>,
    pub created: Option<DateTime<Utc>>,
    pub architecture: String,
    pub os: String,
}

/// One entry of the config's build history, shell prefix already stripped.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub command: String,
    pub created: Option<DateTime<Utc>>,
    pub empty_layer: bool,
}

pub fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Strips the `/bin/sh -c` wrappers Docker records around Dockerfile instructions.
pub fn normalize_command(created_by: &str) -> String {
    if created_by.contains("/bin/sh -c #(nop) ") {
        created_by
            .replace("/bin/sh -c #(nop) ", "")
            .trim_start()
            .to_string()
    } else if created_by.contains("/bin/sh -c ") {
        created_by
            .replace("/bin/sh -c ", "")
            .trim_start()
            .to_string()
    } else {
        created_by.to_string()
    }
}

/// The id is left empty; it lives in the manifest or index, not in the config itself.
pub fn from_oci_config(config: &ImageConfiguration) -> ImageMetadata {
    ImageMetadata {
        id: String::new(),
        repo_tags: Vec::new(),
        created: parse_timestamp(config.created().as_deref()),
        architecture: config.architecture().to_string(),
        os: config.os().to_string(),
    }
}

/// Build history in config order (oldest first).
pub fn history_from_oci_config(config: &ImageConfiguration) -> Vec<HistoryEntry> {
    config
        .history()
        .as_ref()
        .map(|entries| {
            entries
                .iter()
                .map(|h| HistoryEntry {
                    command: normalize_command(h.created_by().as_deref().unwrap_or("")),
                    created: parse_timestamp(h.created().as_deref()),
                    empty_layer: h.empty_layer().unwrap_or(false),
                })
                .collect()
        })
        .unwrap_or_default()
}
