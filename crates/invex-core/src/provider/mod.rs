//! Provider adapters: a uniform interface over remote and local model backends.

pub mod dialect;
mod http;

pub use http::HttpProvider;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::models::config::ProviderConfig;

/// Unparsed answer from a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// Generated text, usually a JSON object.
    pub text: String,
    /// Name of the provider that answered.
    pub provider: String,
    pub model: String,
}

/// Image bytes sent to a vision-capable backend.
#[derive(Debug, Clone, Copy)]
pub struct ImageInput<'a> {
    pub bytes: &'a [u8],
    pub mime: &'a str,
}

/// Capability set shared by every backend.
///
/// Implementations normalize failures into [`ProviderError`] so callers can
/// decide between retrying and failing without knowing the backend.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Short provider name used in logs and records.
    fn name(&self) -> &str;

    /// Model the provider is configured with.
    fn model(&self) -> &str;

    /// Send a prompt together with decoded document text.
    async fn text_extract(&self, prompt: &str, document_text: &str) -> Result<RawResponse, ProviderError>;

    /// Send a prompt together with raw image bytes.
    async fn vision_extract(&self, prompt: &str, image: &ImageInput<'_>) -> Result<RawResponse, ProviderError>;

    /// Lightweight reachability probe. Never errors; any failure is `false`.
    async fn check_availability(&self) -> bool;
}

/// Build the adapter described by `config`.
pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    Ok(Arc::new(HttpProvider::new(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::config::ProviderKind;

    #[test]
    fn test_create_provider() {
        let provider = create_provider(&ProviderConfig::new(ProviderKind::Ollama)).unwrap();
        assert_eq!(provider.name(), "ollama");
        assert_eq!(provider.model(), "qwen2.5:7b");

        let err = create_provider(&ProviderConfig::new(ProviderKind::Gemini)).err().unwrap();
        assert!(err.is_auth());
    }
}
