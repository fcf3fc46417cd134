//! HTTP provider adapter shared by every backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;
use tracing::{debug, trace, warn};

use super::dialect::{self, Dialect, Generation, Payload};
use super::{ImageInput, Provider, RawResponse};
use crate::error::ProviderError;
use crate::models::config::{ProviderConfig, ProviderKind};

/// Provider adapter speaking one of the supported wire dialects.
pub struct HttpProvider {
    kind: ProviderKind,
    dialect: Dialect,
    model: String,
    base_url: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
    client: Client,
}

impl HttpProvider {
    /// Build an adapter from configuration.
    ///
    /// Remote kinds without an API key are rejected here.
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let kind = config.kind;
        let api_key = config.api_key.clone().filter(|k| !k.trim().is_empty());
        if kind.requires_api_key() && api_key.is_none() {
            return Err(ProviderError::AuthConfig {
                provider: kind.to_string(),
                detail: match kind.api_key_env() {
                    Some(var) => format!("missing API key (set {})", var),
                    None => "missing API key".to_string(),
                },
            });
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs()))
            .build()
            .map_err(|e| ProviderError::AuthConfig {
                provider: kind.to_string(),
                detail: format!("failed to build HTTP client: {}", e),
            })?;

        debug!(
            "Configured {} provider: model={}, base_url={}",
            kind,
            config.model(),
            config.base_url()
        );

        Ok(Self {
            kind,
            dialect: Dialect::for_kind(kind),
            model: config.model().to_string(),
            base_url: config.base_url().to_string(),
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            client,
        })
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match (self.dialect, &self.api_key) {
            (Dialect::ChatCompletions, Some(key)) => builder.bearer_auth(key),
            (Dialect::GenerateContent, Some(key)) => builder.query(&[("key", key.as_str())]),
            _ => builder,
        }
    }

    async fn generate(&self, payload: Payload<'_>) -> Result<RawResponse, ProviderError> {
        let name = self.kind.as_str();
        let request = dialect::build_request(
            self.dialect,
            Generation {
                model: &self.model,
                temperature: self.temperature,
                max_tokens: self.max_tokens,
            },
            payload,
        );
        let url = format!("{}{}", self.base_url, request.path);
        trace!("POST {}", url);

        let response = self
            .authorize(self.client.post(&url))
            .json(&request.body)
            .send()
            .await
            .map_err(|e| send_error(name, e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_secs(response.headers());
            let body = response.text().await.unwrap_or_default();
            let err = classify_status(name, status, retry_after, &body);
            warn!("{} returned {}: {}", name, status, err);
            return Err(err);
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::malformed(name, format!("invalid JSON body: {}", e)))?;

        let text = dialect::response_text(self.dialect, &body)
            .ok_or_else(|| ProviderError::malformed(name, "response has no generated content"))?;

        debug!("{} answered with {} chars", name, text.len());
        Ok(RawResponse {
            text,
            provider: name.to_string(),
            model: self.model.clone(),
        })
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn name(&self) -> &str {
        self.kind.as_str()
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn text_extract(&self, prompt: &str, document_text: &str) -> Result<RawResponse, ProviderError> {
        self.generate(Payload::Text {
            prompt,
            text: document_text,
        })
        .await
    }

    async fn vision_extract(&self, prompt: &str, image: &ImageInput<'_>) -> Result<RawResponse, ProviderError> {
        self.generate(Payload::Image {
            prompt,
            bytes: image.bytes,
            mime: image.mime,
        })
        .await
    }

    async fn check_availability(&self) -> bool {
        let url = format!("{}{}", self.base_url, dialect::probe_path(self.dialect, &self.model));
        let response = match self
            .authorize(self.client.get(&url))
            .timeout(Duration::from_secs(10))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                debug!("{} availability probe failed: {}", self.name(), e);
                return false;
            }
        };

        if !response.status().is_success() {
            debug!(
                "{} availability probe returned {}",
                self.name(),
                response.status()
            );
            return false;
        }

        match self.dialect {
            Dialect::OllamaGenerate => match response.json::<Value>().await {
                Ok(tags) => {
                    let present = dialect::ollama_has_model(&tags, &self.model);
                    if !present {
                        debug!("Ollama is running but model {} is not pulled", self.model);
                    }
                    present
                }
                Err(_) => false,
            },
            _ => true,
        }
    }
}

/// Map a non-success HTTP status to the normalized error classes.
pub(crate) fn classify_status(
    provider: &str,
    status: StatusCode,
    retry_after_secs: Option<u64>,
    body: &str,
) -> ProviderError {
    let detail = format!("HTTP {}: {}", status.as_u16(), truncate(body, 200));
    match status.as_u16() {
        401 | 403 => ProviderError::AuthConfig {
            provider: provider.to_string(),
            detail,
        },
        408 | 429 | 500..=599 => ProviderError::Transient {
            provider: provider.to_string(),
            detail,
            retry_after_secs,
        },
        _ => ProviderError::malformed(provider, detail),
    }
}

fn send_error(provider: &str, e: reqwest::Error) -> ProviderError {
    let detail = if e.is_timeout() {
        format!("request timed out: {}", e)
    } else if e.is_connect() {
        format!("connection failed: {}", e)
    } else {
        format!("request failed: {}", e)
    };
    ProviderError::transient(provider, detail)
}

/// Seconds from a numeric `Retry-After` header.
fn retry_after_secs(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
