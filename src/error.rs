//! Error taxonomy for the analyze/diff workflows.
//!
//! Validation errors ([`Error::Argument`], [`Error::UnknownAnalyzer`]) are raised before any
//! filesystem or network work. [`Error::Resolution`] wraps a categorized [`ResolveError`] for a
//! single reference, and [`Error::Resolutions`] carries every failure of a two-image resolve.
//! [`Error::Incomplete`] wraps either of them when the other side's snapshot was kept.

use std::path::PathBuf;
use thiserror::Error;

/// Why an image reference could not be turned into a snapshot.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("image not found: {0}")]
    NotFound(String),

    #[error("failed to retrieve image: {0:#}")]
    TransportFailure(anyhow::Error),

    #[error("failed to extract image: {0:#}")]
    ExtractFailure(anyhow::Error),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Argument(String),

    #[error("unknown analyzer '{name}', expected one of: {}", known.join(", "))]
    UnknownAnalyzer { name: String, known: Vec<String> },

    #[error("could not resolve image {reference}: {source}")]
    Resolution {
        reference: String,
        #[source]
        source: ResolveError,
    },

    #[error("{}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    Resolutions(Vec<Error>),

    #[error("{analyzer} analysis failed: {message}")]
    Analysis { analyzer: String, message: String },

    /// A failed run that still left snapshots on disk (`--save`).
    #[error("{error}")]
    Incomplete { error: Box<Error>, saved: Vec<PathBuf> },
}

impl Error {
    /// Errors caught by validation, before any image work started.
    pub fn is_usage(&self) -> bool {
        matches!(self, Error::Argument(_) | Error::UnknownAnalyzer { .. })
    }

    /// Roots of snapshots kept on disk before the failure.
    pub fn saved(&self) -> &[PathBuf] {
        match self {
            Error::Incomplete { saved, .. } => saved,
            _ => &[],
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
