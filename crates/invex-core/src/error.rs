//! Error types for the invex-core library.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the invex library.
#[derive(Error, Debug)]
pub enum InvexError {
    /// Provider adapter error.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Invoice extraction error.
    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractError),

    /// Document discovery or decoding error.
    #[error("document error: {0}")]
    Document(#[from] DocumentError),

    /// Resume store error.
    #[error("resume store error: {0}")]
    Resume(#[from] ResumeError),

    /// Classification error.
    #[error("classification error: {0}")]
    Classify(#[from] ClassifyError),

    /// No provider could be reached and fallback is disabled.
    #[error("no extraction provider is reachable and fallback is disabled: {0}")]
    NoProviderAvailable(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Normalized errors raised by provider adapters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Credentials are missing or were rejected. Fatal for the batch.
    #[error("{provider}: authentication/configuration error: {detail}")]
    AuthConfig { provider: String, detail: String },

    /// Rate limit, timeout or network failure. Retryable.
    #[error("{provider}: transient failure: {detail}")]
    Transient {
        provider: String,
        detail: String,
        retry_after_secs: Option<u64>,
    },

    /// Backend answered with content that could not be used.
    #[error("{provider}: malformed response: {detail}")]
    MalformedResponse { provider: String, detail: String },
}

impl ProviderError {
    /// Whether the orchestrator may retry after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient { .. })
    }

    /// Whether this error must abort the whole batch.
    pub fn is_auth(&self) -> bool {
        matches!(self, ProviderError::AuthConfig { .. })
    }

    pub(crate) fn transient(provider: impl Into<String>, detail: impl Into<String>) -> Self {
        ProviderError::Transient {
            provider: provider.into(),
            detail: detail.into(),
            retry_after_secs: None,
        }
    }

    pub(crate) fn malformed(provider: impl Into<String>, detail: impl Into<String>) -> Self {
        ProviderError::MalformedResponse {
            provider: provider.into(),
            detail: detail.into(),
        }
    }
}

/// Errors related to invoice field extraction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    /// Provider call failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Required fields are absent after parsing. Not retried.
    #[error("schema validation failed, missing: {}", missing.join(", "))]
    SchemaValidation { missing: Vec<String> },

    /// The selected strategy cannot handle this document type.
    #[error("{strategy} extractor cannot process {kind} documents")]
    UnsupportedDocument {
        strategy: &'static str,
        kind: &'static str,
    },
}

/// Errors related to document discovery and decoding.
#[derive(Error, Debug)]
pub enum DocumentError {
    /// File extension is not a supported document type.
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    /// File exceeds the configured size limit.
    #[error("file too large ({size} bytes, limit {limit})")]
    TooLarge { size: u64, limit: u64 },

    /// Text was decoded but does not look like an invoice.
    #[error("no invoice keywords found ({found} of {required} required)")]
    NotAnInvoice { found: usize, required: usize },

    /// No text could be decoded from the document.
    #[error("no text extracted from {0}")]
    Empty(PathBuf),

    /// PDF decoding failed.
    #[error("PDF error: {0}")]
    Pdf(String),

    /// XML decoding failed.
    #[error("XML error: {0}")]
    Xml(String),

    /// I/O error while reading the document.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DocumentError {
    /// Whether the document should be skipped rather than failed.
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            DocumentError::UnsupportedFormat(_)
                | DocumentError::TooLarge { .. }
                | DocumentError::NotAnInvoice { .. }
        )
    }
}

/// Errors related to the resume store.
#[derive(Error, Debug)]
pub enum ResumeError {
    /// I/O error on the progress log.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Entry could not be serialized.
    #[error("failed to encode entry: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors related to classification of processed files.
#[derive(Error, Debug)]
pub enum ClassifyError {
    /// Source file disappeared before it could be placed.
    #[error("source file missing: {0}")]
    MissingSource(PathBuf),

    /// Filesystem operation failed.
    #[error("failed to place {from} into {to}: {source}")]
    Filesystem {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for the invex library.
pub type Result<T> = std::result::Result<T, InvexError>;
