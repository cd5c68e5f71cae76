//! Deterministically ordered results handed to presentation.
//!
//! Results and failures are keyed by analyzer name in `BTreeMap`s, so every view of a
//! [`Report`] is alphabetical regardless of request or completion order.

use anyhow::Result;
use bytesize::ByteSize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;

use crate::analyzer::{Analysis, AnalyzeResult, Change, Diff, DiffResult, Partition};
use crate::metadata::ImageMetadata;
use crate::snapshot::LayerCommand;

#[derive(Debug, Clone, PartialEq)]
pub struct Report<T> {
    results: BTreeMap<String, T>,
    failures: BTreeMap<String, String>,
}

impl<T> Default for Report<T> {
    fn default() -> Self {
        Self {
            results: BTreeMap::new(),
            failures: BTreeMap::new(),
        }
    }
}

impl<T> Report<T> {
    pub fn insert(&mut self, analyzer: impl Into<String>, result: T) {
        self.results.insert(analyzer.into(), result);
    }

    pub fn fail(&mut self, analyzer: impl Into<String>, message: impl Into<String>) {
        self.failures.insert(analyzer.into(), message.into());
    }

    pub fn get(&self, analyzer: &str) -> Option<&T> {
        self.results.get(analyzer)
    }

    /// Successful results, alphabetical by analyzer name.
    pub fn ordered(&self) -> impl Iterator<Item = &T> {
        self.results.values()
    }

    pub fn names(&self) -> Vec<&str> {
        self.results.keys().map(String::as_str).collect()
    }

    pub fn failures(&self) -> &BTreeMap<String, String> {
        &self.failures
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// The first failed analyzer, alphabetically, as an error.
    pub fn check(&self) -> crate::error::Result<()> {
        match self.failures.iter().next() {
            Some((analyzer, message)) => Err(crate::error::Error::Analysis {
                analyzer: analyzer.clone(),
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[derive(Serialize)]
struct FailureView<'a> {
    analyzer: &'a str,
    error: &'a str,
}

impl<T: Serialize> Report<T> {
    /// Results as a JSON array in analyzer order. Failures, if any, follow as
    /// `{"analyzer", "error"}` objects.
    pub fn to_json(&self) -> Result<String> {
        let mut values = self
            .ordered()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for (analyzer, error) in &self.failures {
            values.push(serde_json::to_value(FailureView { analyzer, error })?);
        }
        Ok(serde_json::to_string_pretty(&values)?)
    }
}

/// History commands after the first divergent layer are matched by text, not position.
const HISTORY_ORDER_NOTE: &str =
    "Note: commands after the first divergent layer are matched regardless of order, so reordered layers are not listed.";

fn human_size(bytes: u64) -> String {
    ByteSize::b(bytes).to_string()
}

fn opt_size(size: Option<u64>) -> String {
    size.map(human_size).unwrap_or_else(|| "-".to_string())
}

/// `Image: [<id>] (<os>/<arch>), created <date>` plus tags, skipped when nothing is known.
fn render_metadata(out: &mut String, metadata: &ImageMetadata) {
    if metadata.id.is_empty() && metadata.os.is_empty() {
        return;
    }
    out.push_str("Image: ");
    if !metadata.id.is_empty() {
        let _ = write!(out, "{} ", metadata.id);
    }
    let _ = write!(out, "({}/{})", metadata.os, metadata.architecture);
    if let Some(created) = metadata.created {
        let _ = write!(out, ", created {}", created.format("%Y-%m-%d %H:%M:%S"));
    }
    out.push('\n');
    if !metadata.repo_tags.is_empty() {
        let _ = writeln!(out, "Tags: {}", metadata.repo_tags.join(", "));
    }
}

fn render_history(out: &mut String, layers: &[LayerCommand]) {
    for layer in layers {
        let created = layer
            .created
            .map(|c| c.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        let _ = writeln!(out, "  {:<10} {:<20} {}", human_size(layer.size), created, layer.command);
    }
}

fn render_section<T>(
    out: &mut String,
    partition: &Partition<T>,
    line: impl Fn(&T) -> String,
    change: impl Fn(&Change<T>) -> String,
) {
    for (title, items) in [("Added", &partition.added), ("Removed", &partition.removed)] {
        if items.is_empty() {
            continue;
        }
        let _ = writeln!(out, "{}:", title);
        for item in items {
            let _ = writeln!(out, "  {}", line(item));
        }
    }
    if !partition.changed.is_empty() {
        let _ = writeln!(out, "Changed:");
        for c in &partition.changed {
            let _ = writeln!(out, "  {}", change(c));
        }
    }
}

/// Plain-text rendering of a result for terminal output.
pub trait RenderText {
    fn render_text(&self, out: &mut String);
}

impl RenderText for AnalyzeResult {
    fn render_text(&self, out: &mut String) {
        let _ = writeln!(out, "-----{}-----", self.analyzer);
        let _ = writeln!(out, "Analysis for {}:", self.image);
        render_metadata(out, &self.metadata);
        match &self.analysis {
            Analysis::Packages(packages) => {
                if packages.is_empty() {
                    let _ = writeln!(out, "  No packages found.");
                }
                for record in packages.values().flat_map(|v| v.values()) {
                    let _ = writeln!(
                        out,
                        "  {:<40} {:<24} {}",
                        record.name,
                        record.version,
                        opt_size(record.size)
                    );
                }
            }
            Analysis::Files(entries) => {
                for e in entries {
                    let _ = writeln!(out, "  {:<60} {}", e.path, human_size(e.size));
                }
            }
            Analysis::History(layers) => render_history(out, layers),
        }
        out.push('\n');
    }
}

impl RenderText for DiffResult {
    fn render_text(&self, out: &mut String) {
        let _ = writeln!(out, "-----{}-----", self.analyzer);
        if self.diff.is_empty() {
            let _ = writeln!(out, "No {} differences between {} and {}.", self.analyzer, self.image1, self.image2);
            if matches!(self.diff, Diff::History(_)) {
                let _ = writeln!(out, "{}", HISTORY_ORDER_NOTE);
            }
            out.push('\n');
            return;
        }
        let _ = writeln!(out, "Differences between {} and {}:", self.image1, self.image2);
        match &self.diff {
            Diff::Packages(p) => render_section(
                out,
                p,
                |r| format!("{:<40} {:<24} {}", r.name, r.version, opt_size(r.size)),
                |c| {
                    format!(
                        "{:<40} {} ({}) -> {} ({})",
                        c.image1.name,
                        c.image1.version,
                        opt_size(c.image1.size),
                        c.image2.version,
                        opt_size(c.image2.size)
                    )
                },
            ),
            Diff::Files(p) => render_section(
                out,
                p,
                |e| format!("{:<60} {}", e.path, human_size(e.size)),
                |c| {
                    format!(
                        "{:<60} {} -> {}",
                        c.image1.path,
                        human_size(c.image1.size),
                        human_size(c.image2.size)
                    )
                },
            ),
            Diff::History(p) => {
                for (title, items) in [("Removed", &p.removed), ("Added", &p.added)] {
                    if !items.is_empty() {
                        let _ = writeln!(out, "{}:", title);
                        render_history(out, items);
                    }
                }
                let _ = writeln!(out, "{}", HISTORY_ORDER_NOTE);
            }
        }
        out.push('\n');
    }
}

impl<T: RenderText> Report<T> {
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for result in self.ordered() {
            result.render_text(&mut out);
        }
        for (analyzer, error) in &self.failures {
            let _ = writeln!(out, "-----{}-----", analyzer);
            let _ = writeln!(out, "Error: {}", error);
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{PackageMap, PackageRecord};

    fn history_result(analyzer: &str) -> AnalyzeResult {
        AnalyzeResult {
            image: "img".to_string(),
            analyzer: analyzer.to_string(),
            metadata: ImageMetadata::default(),
            analysis: Analysis::History(vec![LayerCommand::new("RUN true", 1500)]),
        }
    }

    #[test]
    fn test_results_are_alphabetical_regardless_of_insertion() {
        let mut report = Report::default();
        for name in ["history", "apt", "file"] {
            report.insert(name, history_result(name));
        }

        assert_eq!(report.names(), vec!["apt", "file", "history"]);

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        let order: Vec<&str> = json
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["analyzer"].as_str().unwrap())
            .collect();
        assert_eq!(order, vec!["apt", "file", "history"]);
    }

    #[test]
    fn test_failures_are_kept_next_to_results() {
        let mut report = Report::default();
        report.insert("history", history_result("history"));
        report.fail("apt", "corrupt status file");

        assert!(report.has_failures());
        assert_eq!(report.len(), 1);
        assert_eq!(
            report.check().unwrap_err().to_string(),
            "apt analysis failed: corrupt status file"
        );

        let text = report.render_text();
        assert!(text.contains("-----history-----"));
        assert!(text.contains("Error: corrupt status file"));

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json[1]["analyzer"], "apt");
        assert_eq!(json[1]["error"], "corrupt status file");
    }

    #[test]
    fn test_render_package_diff() {
        let result = DiffResult {
            analyzer: "apt".to_string(),
            image1: "one".to_string(),
            image2: "two".to_string(),
            diff: Diff::Packages(Partition {
                added: vec![PackageRecord::new("bar", "1.0", Some(2048))],
                removed: vec![PackageRecord::new("foo", "1.0", None)],
                changed: vec![],
            }),
        };
        let mut out = String::new();
        result.render_text(&mut out);
        assert!(out.contains("Added:"));
        assert!(out.contains("bar"));
        assert!(out.contains("2.0 KB"));
        assert!(out.contains("Removed:"));
        assert!(!out.contains("Changed:"));
    }

    #[test]
    fn test_render_empty_diff() {
        let result = DiffResult {
            analyzer: "pip".to_string(),
            image1: "one".to_string(),
            image2: "two".to_string(),
            diff: Diff::Packages(Partition::default()),
        };
        let mut out = String::new();
        result.render_text(&mut out);
        assert!(out.contains("No pip differences between one and two."));
    }

    #[test]
    fn test_history_diff_mentions_order_insensitivity() {
        let empty = DiffResult {
            analyzer: "history".to_string(),
            image1: "one".to_string(),
            image2: "two".to_string(),
            diff: Diff::History(Partition::default()),
        };
        let mut out = String::new();
        empty.render_text(&mut out);
        assert!(out.contains("No history differences between one and two."));
        assert!(out.contains("reordered layers are not listed"));

        let changed = DiffResult {
            diff: Diff::History(Partition {
                added: vec![LayerCommand::new("RUN make", 10)],
                removed: vec![],
                changed: vec![],
            }),
            ..empty
        };
        let mut out = String::new();
        changed.render_text(&mut out);
        assert!(out.contains("Added:"));
        assert!(out.contains("RUN make"));
        assert!(out.contains("reordered layers are not listed"));

        let mut out = String::new();
        DiffResult {
            analyzer: "apt".to_string(),
            image1: "one".to_string(),
            image2: "two".to_string(),
            diff: Diff::Packages(Partition::default()),
        }
        .render_text(&mut out);
        assert!(!out.contains("reordered"));
    }

    #[test]
    fn test_render_empty_package_analysis() {
        let result = AnalyzeResult {
            image: "img".to_string(),
            analyzer: "node".to_string(),
            metadata: ImageMetadata::default(),
            analysis: Analysis::Packages(PackageMap::new()),
        };
        let mut out = String::new();
        result.render_text(&mut out);
        assert!(out.contains("No packages found."));
        assert!(!out.contains("Image:"));
    }

    #[test]
    fn test_render_image_metadata_header() {
        let result = AnalyzeResult {
            image: "debian.tar".to_string(),
            analyzer: "apt".to_string(),
            metadata: ImageMetadata {
                id: "sha256:0123456789ab".to_string(),
                repo_tags: vec!["debian:12".to_string()],
                created: crate::metadata::parse_timestamp(Some("2024-03-01T10:00:00Z")),
                architecture: "amd64".to_string(),
                os: "linux".to_string(),
            },
            analysis: Analysis::Packages(PackageMap::new()),
        };
        let mut out = String::new();
        result.render_text(&mut out);
        assert!(out.contains("Image: sha256:0123456789ab (linux/amd64), created 2024-03-01 10:00:00\n"));
        assert!(out.contains("Tags: debian:12\n"));
    }

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(999), "999 B");
        assert_eq!(human_size(1500), "1.5 KB");
        assert_eq!(human_size(2_000_000), "2.0 MB");
        assert_eq!(opt_size(None), "-");
    }
}
