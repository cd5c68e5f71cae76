//! Dispatches analyzers over one or two snapshots.
//!
//! Analyzers run concurrently on the rayon pool. A failing analyzer is recorded in the report
//! under its name and does not affect the others.

use rayon::prelude::*;
use std::sync::Arc;

use crate::analyzer::{AnalyzeResult, Analyzer, DiffResult};
use crate::notifier::Notifier;
use crate::report::Report;
use crate::snapshot::Snapshot;

fn into_report<T>(notifier: &Notifier, outcomes: Vec<(&'static str, anyhow::Result<T>)>) -> Report<T> {
    let mut report = Report::default();
    for (name, outcome) in outcomes {
        match outcome {
            Ok(result) => report.insert(name, result),
            Err(e) => {
                notifier.warn(&format!("{} analyzer failed: {:#}", name, e));
                report.fail(name, format!("{:#}", e));
            }
        }
    }
    report
}

pub fn run_single(
    snapshot: &Snapshot,
    analyzers: &[Arc<dyn Analyzer>],
    notifier: &Notifier,
) -> Report<AnalyzeResult> {
    let image = snapshot.reference().to_string();
    let outcomes = analyzers
        .par_iter()
        .map(|analyzer| {
            notifier.debug(&format!("Running {} analysis on {}", analyzer.name(), image));
            let outcome = analyzer.analyze(snapshot).map(|analysis| AnalyzeResult {
                image: image.clone(),
                analyzer: analyzer.name().to_string(),
                metadata: snapshot.metadata().clone(),
                analysis,
            });
            (analyzer.name(), outcome)
        })
        .collect();
    into_report(notifier, outcomes)
}

pub fn run_diff(
    image1: &Snapshot,
    image2: &Snapshot,
    analyzers: &[Arc<dyn Analyzer>],
    notifier: &Notifier,
) -> Report<DiffResult> {
    let name1 = image1.reference().to_string();
    let name2 = image2.reference().to_string();
    let outcomes = analyzers
        .par_iter()
        .map(|analyzer| {
            notifier.debug(&format!(
                "Running {} diff between {} and {}",
                analyzer.name(),
                name1,
                name2
            ));
            let outcome = analyzer.diff(image1, image2).map(|diff| DiffResult {
                analyzer: analyzer.name().to_string(),
                image1: name1.clone(),
                image2: name2.clone(),
                diff,
            });
            (analyzer.name(), outcome)
        })
        .collect();
    into_report(notifier, outcomes)
}
