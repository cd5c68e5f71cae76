//! Build-history analyzer.
//!
//! History is an ordered sequence, so the diff is a prefix divergence: the longest common
//! prefix of commands is unchanged and omitted. Past the divergence point, commands of image 1
//! with no counterpart in the rest of image 2 are `removed`, and those of image 2 with no
//! counterpart in the rest of image 1 are `added`, each in original order. Counterparts are
//! matched by command text with multiplicity, so a command never lands in both partitions.
//! One consequence: reordering commands after the divergence point yields an empty diff.
//! `changed` is never populated.

use anyhow::Result;
use std::collections::HashMap;

use super::{Analysis, Analyzer, Diff, Partition};
use crate::snapshot::{LayerCommand, Snapshot};

pub struct HistoryAnalyzer;

/// Items of `from` whose command is not matched one-for-one by `against`.
fn unmatched(from: &[LayerCommand], against: &[LayerCommand]) -> Vec<LayerCommand> {
    let mut available: HashMap<&str, usize> = HashMap::new();
    for layer in against {
        *available.entry(layer.command.as_str()).or_default() += 1;
    }
    from.iter()
        .filter(|layer| match available.get_mut(layer.command.as_str()) {
            Some(count) if *count > 0 => {
                *count -= 1;
                false
            }
            _ => true,
        })
        .cloned()
        .collect()
}

pub fn diff_history(image1: &[LayerCommand], image2: &[LayerCommand]) -> Partition<LayerCommand> {
    let common = image1
        .iter()
        .zip(image2)
        .take_while(|(a, b)| a.command == b.command)
        .count();
    log::debug!("History shares {} leading commands", common);

    let rest1 = &image1[common..];
    let rest2 = &image2[common..];

    Partition {
        added: unmatched(rest2, rest1),
        removed: unmatched(rest1, rest2),
        changed: Vec::new(),
    }
}

impl Analyzer for HistoryAnalyzer {
    fn name(&self) -> &'static str {
        "history"
    }

    fn analyze(&self, snapshot: &Snapshot) -> Result<Analysis> {
        Ok(Analysis::History(snapshot.layers().to_vec()))
    }

    fn diff(&self, image1: &Snapshot, image2: &Snapshot) -> Result<Diff> {
        Ok(Diff::History(diff_history(image1.layers(), image2.layers())))
    }
}
