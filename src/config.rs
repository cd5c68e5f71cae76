//! Run configuration, built once from the command line and passed down explicitly.

use clap::ValueEnum;

use crate::sources::RetrievalMode;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// How filesystem paths are compared across snapshots.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PathPolicy {
    pub case_sensitive: bool,
}

impl Default for PathPolicy {
    fn default() -> Self {
        Self {
            case_sensitive: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Requested analyzer names; empty selects every registered analyzer.
    pub analyzers: Vec<String>,
    pub output: OutputFormat,
    /// Keep snapshot directories after the run.
    pub persist: bool,
    pub retrieval: RetrievalMode,
    pub paths: PathPolicy,
}
