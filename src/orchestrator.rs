//! End-to-end analyze / diff workflows.
//!
//! [`Orchestrator`] validates the request (argument count, reference types, analyzer names)
//! before touching any image, resolves one image, or two concurrently for a diff, runs the
//! selected analyzers through [`crate::engine`], and finally releases or persists every
//! snapshot it created.
//!
//! Both sides of a diff resolve on their own scoped thread with their own result slot. The
//! orchestrator waits for both, and if either failed it reports every failure and runs no
//! analyzer.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::anyhow;

use crate::analyzer::{AnalyzeResult, Analyzer, DiffResult, Registry};
use crate::config::Config;
use crate::engine;
use crate::error::{Error, ResolveError, Result};
use crate::notifier::Notifier;
use crate::reference::ImageReference;
use crate::report::Report;
use crate::resolver::ImageResolver;
use crate::snapshot::Snapshot;

/// A finished run: the report plus the root of every snapshot kept on disk.
#[derive(Debug)]
pub struct Outcome<T> {
    pub report: Report<T>,
    pub saved: Vec<PathBuf>,
}

pub struct Orchestrator {
    config: Config,
    registry: Registry,
    resolver: ImageResolver,
    notifier: Notifier,
}

fn check_analyze_arg_num(images: &[String]) -> Result<()> {
    match images.len() {
        0 => Err(Error::Argument(
            "Too few arguments. Should have one or two images as arguments.".to_string(),
        )),
        1 => Ok(()),
        2 => Err(Error::Argument(
            "'analyze' requires one image as argument: ocidiff analyze [image]".to_string(),
        )),
        _ => Err(Error::Argument(
            "Too many arguments. Should have at most two images as arguments.".to_string(),
        )),
    }
}

fn check_diff_arg_num(images: &[String]) -> Result<()> {
    if images.len() != 2 {
        return Err(Error::Argument(
            "'diff' requires two images as arguments: container diff [image1] [image2]".to_string(),
        ));
    }
    Ok(())
}

/// Classifies every argument, reporting all invalid ones together.
fn parse_references(images: &[String]) -> Result<Vec<ImageReference>> {
    let mut references = Vec::with_capacity(images.len());
    let mut problems = Vec::new();
    for image in images {
        match ImageReference::parse(image) {
            Ok(reference) => references.push(reference),
            Err(e) => problems.push(e.to_string()),
        }
    }
    if !problems.is_empty() {
        return Err(Error::Argument(problems.join("\n")));
    }
    Ok(references)
}

impl Orchestrator {
    pub fn new(config: Config, notifier: Notifier) -> Self {
        let resolver = ImageResolver::new(config.retrieval);
        Self::with_resolver(config, notifier, resolver)
    }

    pub fn with_resolver(config: Config, notifier: Notifier, resolver: ImageResolver) -> Self {
        Self {
            registry: Registry::new(config.paths),
            config,
            resolver,
            notifier,
        }
    }

    pub fn analyze(&self, images: &[String]) -> Result<Outcome<AnalyzeResult>> {
        check_analyze_arg_num(images)?;
        let references = parse_references(images)?;
        let analyzers = self.selected_analyzers()?;

        let reference = &references[0];
        self.notifier
            .info(&format!("Starting analysis of {}", reference));
        let snapshot = self.resolve(reference)?;

        self.notifier.info("Running analyzers...");
        let report = engine::run_single(&snapshot, &analyzers, &self.notifier);

        let saved = self.dispose(snapshot).into_iter().collect();
        self.notifier.finish();
        Ok(Outcome { report, saved })
    }

    pub fn diff(&self, images: &[String]) -> Result<Outcome<DiffResult>> {
        check_diff_arg_num(images)?;
        let references = parse_references(images)?;
        let analyzers = self.selected_analyzers()?;

        let (reference1, reference2) = (&references[0], &references[1]);
        self.notifier.info(&format!(
            "Starting diff on images {} and {}, using analyzers: {}",
            reference1,
            reference2,
            analyzers.iter().map(|a| a.name()).collect::<Vec<_>>().join(", ")
        ));

        let (first, second) = thread::scope(|scope| {
            let handle1 = scope.spawn(|| self.resolve(reference1));
            let handle2 = scope.spawn(|| self.resolve(reference2));
            (
                handle1.join().unwrap_or_else(|_| Err(panicked(reference1))),
                handle2.join().unwrap_or_else(|_| Err(panicked(reference2))),
            )
        });

        let (snapshot1, snapshot2) = match (first, second) {
            (Ok(snapshot1), Ok(snapshot2)) => (snapshot1, snapshot2),
            (first, second) => {
                let mut errors = Vec::new();
                let mut saved = Vec::new();
                for outcome in [first, second] {
                    match outcome {
                        Ok(snapshot) => saved.extend(self.dispose(snapshot)),
                        Err(e) => errors.push(e),
                    }
                }
                self.notifier.finish();
                let error = if errors.len() == 1 {
                    errors.remove(0)
                } else {
                    Error::Resolutions(errors)
                };
                if saved.is_empty() {
                    return Err(error);
                }
                return Err(Error::Incomplete {
                    error: Box::new(error),
                    saved,
                });
            }
        };

        self.notifier.info("Running analyzers...");
        let report = engine::run_diff(&snapshot1, &snapshot2, &analyzers, &self.notifier);

        let saved = [snapshot1, snapshot2]
            .into_iter()
            .filter_map(|snapshot| self.dispose(snapshot))
            .collect();
        self.notifier.finish();
        Ok(Outcome { report, saved })
    }

    fn selected_analyzers(&self) -> Result<Vec<Arc<dyn Analyzer>>> {
        let analyzers = self.registry.validate_names(&self.config.analyzers)?;
        self.notifier.debug(&format!(
            "Selected analyzers: {}",
            analyzers.iter().map(|a| a.name()).collect::<Vec<_>>().join(", ")
        ));
        Ok(analyzers)
    }

    fn resolve(&self, reference: &ImageReference) -> Result<Snapshot> {
        self.resolver
            .resolve(reference, &self.notifier)
            .map_err(|source| {
                self.notifier
                    .error(&format!("Failed to resolve {}: {}", reference, source));
                Error::Resolution {
                    reference: reference.to_string(),
                    source,
                }
            })
    }

    /// Releases the snapshot, or keeps it and returns its root when persistence was requested.
    fn dispose(&self, snapshot: Snapshot) -> Option<PathBuf> {
        let reference = snapshot.reference().to_string();
        if self.config.persist {
            let root = snapshot.persist();
            self.notifier.info(&format!(
                "Image {} was saved at {}",
                reference,
                root.display()
            ));
            return Some(root);
        }
        if let Err(e) = snapshot.release() {
            self.notifier
                .warn(&format!("Failed to clean up {}: {:#}", reference, e));
        }
        None
    }
}

fn panicked(reference: &ImageReference) -> Error {
    Error::Resolution {
        reference: reference.to_string(),
        source: ResolveError::ExtractFailure(anyhow!("resolution thread panicked")),
    }
}
