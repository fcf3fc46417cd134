//! Core library for batch invoice extraction.
//!
//! This crate provides:
//! - Document discovery, fingerprinting and decoding (PDF, XML, text, images)
//! - Provider adapters for OpenAI-compatible, Gemini and Ollama backends
//! - Extraction strategies (pattern-only, model, hybrid, vision)
//! - A resumable, concurrent batch orchestrator
//! - Classification of processed files into a seller/buyer tree

pub mod aggregate;
pub mod batch;
pub mod classify;
pub mod documents;
pub mod error;
pub mod extract;
pub mod models;
pub mod provider;
pub mod resume;

#[cfg(test)]
mod testing;

pub use aggregate::ResultAggregator;
pub use batch::{BatchOrchestrator, BatchProgress, BatchReport, BatchStats, RetryPolicy, TaskOutcome};
pub use classify::{Placement, destination, place};
pub use documents::{Document, DocumentKind, DocumentLoader, FsDocumentLoader, discover};
pub use error::{ClassifyError, DocumentError, ExtractError, InvexError, ProviderError, ResumeError, Result};
pub use extract::{ExtractionContext, Extractor, StrategyRouter, select_strategy};
pub use models::{
    ExtractionMode, Fingerprint, InvexConfig, InvoiceFields, InvoiceRecord, ProcessingTask,
    ProviderConfig, ProviderKind, TaskStatus, ValidationStatus,
};
pub use provider::{Provider, RawResponse, create_provider};
pub use resume::{ResumeEntry, ResumeStore};
