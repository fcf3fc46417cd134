//! Model-backed extractors: text through a provider, and vision over image bytes.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::prompts::PromptSet;
use super::response::parse_response;
use super::{ExtractionContext, Extractor, source_ref};
use crate::documents::{Document, DocumentContent};
use crate::error::{ExtractError, ProviderError};
use crate::models::invoice::{ExtractionMode, InvoiceFields, InvoiceRecord, ValidationStatus};
use crate::provider::{ImageInput, Provider, RawResponse};

/// Extractor that sends decoded text to a provider.
pub struct ModelExtractor {
    provider: Arc<dyn Provider>,
    prompts: PromptSet,
    availability: OnceCell<bool>,
    call_timeout: Option<Duration>,
}

impl ModelExtractor {
    pub fn new(provider: Arc<dyn Provider>, prompts: PromptSet) -> Self {
        Self {
            provider,
            prompts,
            availability: OnceCell::new(),
            call_timeout: None,
        }
    }

    /// Bound every provider call; expiry is reported as a transient error.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Seed the availability cache with an earlier probe result.
    pub fn with_known_availability(self, available: bool) -> Self {
        let _ = self.availability.set(available);
        self
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    /// Whether the provider is reachable. Probed once, then cached.
    pub async fn is_available(&self) -> bool {
        *self
            .availability
            .get_or_init(|| async {
                let available = self.provider.check_availability().await;
                info!(
                    "Provider {} ({}) available: {}",
                    self.provider.name(),
                    self.provider.model(),
                    available
                );
                available
            })
            .await
    }

    /// Ask the provider for the fields of a text document.
    pub async fn fields_from_text(&self, text: &str) -> Result<(InvoiceFields, RawResponse), ExtractError> {
        self.ensure_available().await?;
        let raw = self
            .bounded(self.provider.text_extract(&self.prompts.text_extraction, text))
            .await?;
        interpret(raw)
    }

    /// Ask the provider for the fields of an image.
    pub async fn fields_from_image(&self, bytes: &[u8], mime: &str) -> Result<(InvoiceFields, RawResponse), ExtractError> {
        self.ensure_available().await?;
        let image = ImageInput { bytes, mime };
        let raw = self
            .bounded(self.provider.vision_extract(&self.prompts.vision_extraction, &image))
            .await?;
        interpret(raw)
    }

    async fn bounded(
        &self,
        call: impl Future<Output = Result<RawResponse, ProviderError>>,
    ) -> Result<RawResponse, ProviderError> {
        let Some(limit) = self.call_timeout else {
            return call.await;
        };
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "{} did not answer within {}s",
                    self.provider.name(),
                    limit.as_secs()
                );
                Err(ProviderError::transient(
                    self.provider.name(),
                    format!("provider call timed out after {}s", limit.as_secs()),
                ))
            }
        }
    }

    async fn ensure_available(&self) -> Result<(), ExtractError> {
        if self.is_available().await {
            Ok(())
        } else {
            Err(ProviderError::transient(self.provider.name(), "provider is not reachable").into())
        }
    }
}

/// Parse and schema-check a raw answer.
fn interpret(raw: RawResponse) -> Result<(InvoiceFields, RawResponse), ExtractError> {
    let fields = parse_response(&raw.text)
        .map_err(|detail| ProviderError::malformed(raw.provider.clone(), detail))?;

    let missing = fields.missing_required();
    if !missing.is_empty() {
        debug!("{} answer is missing {:?}", raw.provider, missing);
        return Err(ExtractError::SchemaValidation { missing });
    }
    Ok((fields, raw))
}

#[async_trait]
impl Extractor for ModelExtractor {
    fn name(&self) -> &'static str {
        "llm"
    }

    async fn extract(&self, document: &Document, _ctx: &ExtractionContext) -> Result<InvoiceRecord, ExtractError> {
        let text = document.as_text().ok_or(ExtractError::UnsupportedDocument {
            strategy: self.name(),
            kind: document.kind().as_str(),
        })?;

        let (fields, raw) = self.fields_from_text(text).await?;
        Ok(InvoiceRecord::new(
            fields,
            ExtractionMode::Llm,
            ValidationStatus::Unvalidated,
            source_ref(document),
        )
        .with_raw_response(raw.text))
    }
}

/// Model extractor contract over raw image bytes.
pub struct VisionExtractor {
    model: Arc<ModelExtractor>,
}

impl VisionExtractor {
    pub fn new(model: Arc<ModelExtractor>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Extractor for VisionExtractor {
    fn name(&self) -> &'static str {
        "vision"
    }

    async fn extract(&self, document: &Document, _ctx: &ExtractionContext) -> Result<InvoiceRecord, ExtractError> {
        let DocumentContent::Image { bytes, mime } = &document.content else {
            return Err(ExtractError::UnsupportedDocument {
                strategy: self.name(),
                kind: document.kind().as_str(),
            });
        };

        let (fields, raw) = self.model.fields_from_image(bytes, mime).await?;
        Ok(InvoiceRecord::new(
            fields,
            ExtractionMode::Vision,
            ValidationStatus::Unvalidated,
            source_ref(document),
        )
        .with_raw_response(raw.text))
    }
}
