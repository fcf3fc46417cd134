//! Extraction strategies and their selection.

pub mod compare;
mod deterministic;
mod hybrid;
mod model;
pub mod prompts;
pub mod response;
pub mod rules;

pub use compare::{ComparisonPolicy, CrossCheck};
pub use deterministic::DeterministicExtractor;
pub use hybrid::HybridExtractor;
pub use model::{ModelExtractor, VisionExtractor};
pub use prompts::PromptSet;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::documents::{Document, DocumentKind};
use crate::error::{ExtractError, InvexError};
use crate::models::config::InvexConfig;
use crate::models::invoice::{ExtractionMode, InvoiceRecord, SourceRef};
use crate::provider::Provider;

/// Per-call information passed to an extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionContext {
    /// 1-based attempt number.
    pub attempt: u32,
    pub max_attempts: u32,
}

impl ExtractionContext {
    /// Context for a one-shot extraction.
    pub fn single() -> Self {
        Self {
            attempt: 1,
            max_attempts: 1,
        }
    }

    pub fn is_final_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// An extraction strategy.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Strategy name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Extract an invoice record from a decoded document.
    async fn extract(&self, document: &Document, ctx: &ExtractionContext) -> Result<InvoiceRecord, ExtractError>;
}

pub(crate) fn source_ref(document: &Document) -> SourceRef {
    SourceRef {
        path: document.path.clone(),
        fingerprint: document.fingerprint.clone(),
        kind: document.kind(),
    }
}

/// Routes each document to the strategy matching the mode and document kind.
///
/// | mode             | text          | image       |
/// |------------------|---------------|-------------|
/// | `regex_fallback` | deterministic | unsupported |
/// | `llm`, `vision`  | model         | vision      |
/// | `hybrid`         | hybrid        | vision      |
pub struct StrategyRouter {
    mode: ExtractionMode,
    deterministic: DeterministicExtractor,
    model: Option<Arc<ModelExtractor>>,
    hybrid: Option<HybridExtractor>,
    vision: Option<VisionExtractor>,
}

impl StrategyRouter {
    /// Pattern matching only.
    pub fn deterministic() -> Self {
        Self {
            mode: ExtractionMode::RegexFallback,
            deterministic: DeterministicExtractor::new(),
            model: None,
            hybrid: None,
            vision: None,
        }
    }

    /// Router for `mode` backed by `model`.
    pub fn with_model(mode: ExtractionMode, model: Arc<ModelExtractor>, policy: ComparisonPolicy) -> Self {
        if mode == ExtractionMode::RegexFallback {
            return Self::deterministic();
        }
        Self {
            mode,
            deterministic: DeterministicExtractor::new(),
            hybrid: Some(HybridExtractor::new(model.clone(), policy)),
            vision: Some(VisionExtractor::new(model.clone())),
            model: Some(model),
        }
    }

    /// Mode actually in effect.
    pub fn mode(&self) -> ExtractionMode {
        self.mode
    }

    fn route(&self, kind: DocumentKind) -> Option<&dyn Extractor> {
        match (self.mode, kind) {
            (ExtractionMode::RegexFallback, DocumentKind::Text) => Some(&self.deterministic),
            (ExtractionMode::RegexFallback, DocumentKind::Image) => None,
            (ExtractionMode::Hybrid, DocumentKind::Text) => {
                self.hybrid.as_ref().map(|h| h as &dyn Extractor)
            }
            (ExtractionMode::Llm | ExtractionMode::Vision, DocumentKind::Text) => {
                self.model.as_deref().map(|m| m as &dyn Extractor)
            }
            (_, DocumentKind::Image) => self.vision.as_ref().map(|v| v as &dyn Extractor),
        }
    }
}

#[async_trait]
impl Extractor for StrategyRouter {
    fn name(&self) -> &'static str {
        self.mode.as_str()
    }

    async fn extract(&self, document: &Document, ctx: &ExtractionContext) -> Result<InvoiceRecord, ExtractError> {
        match self.route(document.kind()) {
            Some(extractor) => extractor.extract(document, ctx).await,
            None => Err(ExtractError::UnsupportedDocument {
                strategy: self.name(),
                kind: document.kind().as_str(),
            }),
        }
    }
}

/// Choose the strategy for a batch.
///
/// Falls back to the deterministic extractor when no provider is configured
/// or the provider's probe fails, unless `allow_fallback` is off.
pub async fn select_strategy(
    config: &InvexConfig,
    provider: Option<Arc<dyn Provider>>,
) -> Result<StrategyRouter, InvexError> {
    let mode = config.extraction.mode;
    if !mode.needs_provider() {
        info!("Using deterministic extraction");
        return Ok(StrategyRouter::deterministic());
    }

    let fallback = |reason: String| {
        if config.batch.allow_fallback {
            warn!("{}; falling back to deterministic extraction", reason);
            Ok(StrategyRouter::deterministic())
        } else {
            Err(InvexError::NoProviderAvailable(reason))
        }
    };

    let Some(provider) = provider else {
        return fallback(format!("{} mode requested but no provider is configured", mode));
    };

    if !provider.check_availability().await {
        return fallback(format!(
            "provider {} ({}) is not reachable",
            provider.name(),
            provider.model()
        ));
    }

    info!(
        "Using {} extraction with provider {} ({})",
        mode,
        provider.name(),
        provider.model()
    );
    let model = ModelExtractor::new(provider, config.prompts.clone())
        .with_known_availability(true)
        .with_call_timeout(config.batch.call_timeout());
    Ok(StrategyRouter::with_model(
        mode,
        Arc::new(model),
        config.extraction.comparison.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::fingerprint_bytes;
    use crate::models::invoice::ValidationStatus;
    use crate::testing::ScriptedProvider;
    use pretty_assertions::assert_eq;

    const ANSWER: &str = r#"{"invoice_number": "12345678", "total_amount": 100.00}"#;
    const TEXT: &str = "发票号码：12345678\n价税合计：¥100.00\n";

    fn text_doc() -> Document {
        Document::text("a.txt", fingerprint_bytes(TEXT.as_bytes()), TEXT)
    }

    fn image_doc() -> Document {
        Document::image("a.jpg", fingerprint_bytes(b"jpg"), vec![0xff, 0xd8], "image/jpeg")
    }

    fn config(mode: ExtractionMode, allow_fallback: bool) -> InvexConfig {
        let mut config = InvexConfig::default();
        config.extraction.mode = mode;
        config.batch.allow_fallback = allow_fallback;
        config
    }

    #[tokio::test]
    async fn test_hybrid_routes_by_kind() {
        let provider: Arc<dyn Provider> = Arc::new(ScriptedProvider::answering(ANSWER));
        let router = select_strategy(&config(ExtractionMode::Hybrid, true), Some(provider))
            .await
            .unwrap();
        assert_eq!(router.mode(), ExtractionMode::Hybrid);

        let ctx = ExtractionContext::single();
        let text = router.extract(&text_doc(), &ctx).await.unwrap();
        assert_eq!(text.extraction_mode, ExtractionMode::Hybrid);
        assert_eq!(text.validation_status, ValidationStatus::Validated);

        let image = router.extract(&image_doc(), &ctx).await.unwrap();
        assert_eq!(image.extraction_mode, ExtractionMode::Vision);
    }

    #[tokio::test]
    async fn test_vision_mode_uses_model_for_text() {
        let provider: Arc<dyn Provider> = Arc::new(ScriptedProvider::answering(ANSWER));
        let router = select_strategy(&config(ExtractionMode::Vision, true), Some(provider))
            .await
            .unwrap();
        let record = router
            .extract(&text_doc(), &ExtractionContext::single())
            .await
            .unwrap();
        assert_eq!(record.extraction_mode, ExtractionMode::Llm);
    }

    #[tokio::test]
    async fn test_unavailable_provider_falls_back() {
        let provider: Arc<dyn Provider> =
            Arc::new(ScriptedProvider::answering(ANSWER).unavailable());
        let router = select_strategy(&config(ExtractionMode::Llm, true), Some(provider))
            .await
            .unwrap();
        assert_eq!(router.mode(), ExtractionMode::RegexFallback);

        let err = router
            .extract(&image_doc(), &ExtractionContext::single())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedDocument { kind: "image", .. }));
    }

    #[tokio::test]
    async fn test_fallback_disabled_is_fatal() {
        let err = select_strategy(&config(ExtractionMode::Hybrid, false), None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, InvexError::NoProviderAvailable(_)));
    }

    #[test]
    fn test_final_attempt() {
        let ctx = ExtractionContext {
            attempt: 2,
            max_attempts: 3,
        };
        assert!(!ctx.is_final_attempt());
        assert!(ExtractionContext::single().is_final_attempt());
    }
}
