pub mod analyzer;
pub mod config;
pub mod engine;
pub mod error;
pub mod extracted_image;
pub mod metadata;
pub mod notifier;
pub mod orchestrator;
pub mod reference;
pub mod report;
pub mod resolver;
pub mod snapshot;
pub mod sources;
pub mod tar_extractor;

// Re-exports for easy access
pub use analyzer::{Analyzer, Registry};
pub use config::{Config, OutputFormat, PathPolicy};
pub use error::{Error, ResolveError};
pub use extracted_image::{ExtractedImage, Layer};
pub use notifier::Notifier;
pub use orchestrator::{Orchestrator, Outcome};
pub use reference::ImageReference;
pub use report::Report;
pub use resolver::ImageResolver;
pub use snapshot::Snapshot;
pub use sources::{EngineSource, RetrievalMode, Source, TarSource};
