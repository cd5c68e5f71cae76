use std::collections::BTreeMap;
use std::sync::Arc;

use super::apt::AptParser;
use super::file::FileAnalyzer;
use super::history::HistoryAnalyzer;
use super::node::NodeParser;
use super::package::PackageAnalyzer;
use super::pip::PipParser;
use super::Analyzer;
use crate::config::PathPolicy;
use crate::error::{Error, Result};

/// Name → analyzer lookup. Built once at startup and read-only afterwards.
pub struct Registry {
    analyzers: BTreeMap<&'static str, Arc<dyn Analyzer>>,
}

impl Registry {
    pub fn new(paths: PathPolicy) -> Self {
        let mut registry = Self {
            analyzers: BTreeMap::new(),
        };
        registry.register(Arc::new(PackageAnalyzer::new(AptParser)));
        registry.register(Arc::new(PackageAnalyzer::new(NodeParser)));
        registry.register(Arc::new(PackageAnalyzer::new(PipParser)));
        registry.register(Arc::new(FileAnalyzer::new(paths)));
        registry.register(Arc::new(HistoryAnalyzer));
        registry
    }

    pub fn register(&mut self, analyzer: Arc<dyn Analyzer>) {
        self.analyzers.insert(analyzer.name(), analyzer);
    }

    pub fn names(&self) -> Vec<String> {
        self.analyzers.keys().map(|n| n.to_string()).collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Analyzer>> {
        self.analyzers.get(name).cloned()
    }

    /// Looks up every requested name, failing on the first unknown one.
    ///
    /// An empty request selects all registered analyzers. Duplicates collapse and the result is
    /// in alphabetical order.
    pub fn validate_names(&self, requested: &[String]) -> Result<Vec<Arc<dyn Analyzer>>> {
        if requested.is_empty() {
            return Ok(self.analyzers.values().cloned().collect());
        }

        let mut selected = BTreeMap::new();
        for name in requested {
            let analyzer = self.get(name).ok_or_else(|| Error::UnknownAnalyzer {
                name: name.clone(),
                known: self.names(),
            })?;
            selected.insert(analyzer.name(), analyzer);
        }
        Ok(selected.into_values().collect())
    }
}
