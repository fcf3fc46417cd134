//! Data models: invoice records, processing tasks and configuration.

pub mod config;
pub mod invoice;
pub mod task;

pub use config::{
    BatchConfig, ClassifyMode, DocumentConfig, ExtractionConfig, InvexConfig, OutputConfig,
    ProviderConfig, ProviderKind,
};
pub use invoice::{
    ExtractionMode, Field, FieldMismatch, InvoiceFields, InvoiceRecord, LineItem, SourceRef,
    ValidationStatus,
};
pub use task::{Fingerprint, ProcessingTask, TaskStatus};
