pub mod engine;
pub mod naming;
pub mod source;
pub mod tar;

pub use engine::{EngineSource, RetrievalMode};
pub use source::Source;
pub use tar::TarSource;

/// Replaces characters that are awkward in directory names with `-` and collapses runs.
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '#' | '_' | '.') {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

/// First 12 hex characters of a `sha256:` digest.
pub fn extract_short_digest(digest: &str) -> Option<&str> {
    digest
        .strip_prefix("sha256:")
        .map(|hex| &hex[..hex.len().min(12)])
}
