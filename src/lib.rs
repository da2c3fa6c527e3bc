//! storyfetch: resumable downloader for multi-chapter web fiction, outputting EPUB, HTML,
//! Markdown or plain text.

pub mod acquire;
pub mod cache;
pub mod cli;
pub mod config;
pub mod epub;
pub mod extractor;
pub mod formats;
pub mod input;
pub mod media;
pub mod model;
pub mod processor;

#[cfg(test)]
mod testing;

// Re-exports for CLI and consumers.
pub use acquire::{AcquireError, AcquireOptions, AcquireReport, Acquired, Orchestrator};
pub use cache::{Cache, CacheError};
pub use epub::{write_epub, EpubError, EpubFormatter};
pub use extractor::{
    Extractor, ExtractorError, ExtractorRegistry, ExtractorSource, PoliteClient, Session,
};
pub use formats::{write_package, write_story, FormatError, Formatter, OutputFormat};
pub use model::{Chapter, Image, Metadata, Story};
