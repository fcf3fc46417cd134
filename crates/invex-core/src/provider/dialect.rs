//! Wire formats of the supported backends.
//!
//! Request builders and response readers are pure so they can be tested
//! without a server.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};

use crate::models::config::ProviderKind;

/// Request/response format spoken by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// OpenAI-compatible `/chat/completions` (OpenAI, DeepSeek).
    ChatCompletions,
    /// Google `models/{model}:generateContent`.
    GenerateContent,
    /// Ollama `/api/generate`.
    OllamaGenerate,
}

impl Dialect {
    pub fn for_kind(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::OpenAi | ProviderKind::DeepSeek => Dialect::ChatCompletions,
            ProviderKind::Gemini => Dialect::GenerateContent,
            ProviderKind::Ollama => Dialect::OllamaGenerate,
        }
    }
}

/// Generation parameters shared by every dialect.
#[derive(Debug, Clone, Copy)]
pub struct Generation<'a> {
    pub model: &'a str,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Request payload content.
#[derive(Debug, Clone, Copy)]
pub enum Payload<'a> {
    Text { prompt: &'a str, text: &'a str },
    Image { prompt: &'a str, bytes: &'a [u8], mime: &'a str },
}

/// A request ready to be sent: path relative to the base URL plus JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct WireRequest {
    pub path: String,
    pub body: Value,
}

/// Build the extraction request for a dialect.
pub fn build_request(dialect: Dialect, generation: Generation<'_>, payload: Payload<'_>) -> WireRequest {
    match dialect {
        Dialect::ChatCompletions => {
            let content = match payload {
                Payload::Text { prompt, text } => json!(format!("{}\n\n{}", prompt, text)),
                Payload::Image { prompt, bytes, mime } => json!([
                    { "type": "text", "text": prompt },
                    {
                        "type": "image_url",
                        "image_url": { "url": format!("data:{};base64,{}", mime, BASE64.encode(bytes)) }
                    }
                ]),
            };
            WireRequest {
                path: "/chat/completions".to_string(),
                body: json!({
                    "model": generation.model,
                    "messages": [{ "role": "user", "content": content }],
                    "temperature": generation.temperature,
                    "max_tokens": generation.max_tokens,
                }),
            }
        }
        Dialect::GenerateContent => {
            let parts = match payload {
                Payload::Text { prompt, text } => json!([{ "text": format!("{}\n\n{}", prompt, text) }]),
                Payload::Image { prompt, bytes, mime } => json!([
                    { "text": prompt },
                    { "inline_data": { "mime_type": mime, "data": BASE64.encode(bytes) } }
                ]),
            };
            WireRequest {
                path: format!("/v1beta/models/{}:generateContent", generation.model),
                body: json!({
                    "contents": [{ "parts": parts }],
                    "generationConfig": {
                        "temperature": generation.temperature,
                        "maxOutputTokens": generation.max_tokens,
                    },
                }),
            }
        }
        Dialect::OllamaGenerate => {
            let mut body = json!({
                "model": generation.model,
                "stream": false,
                "options": {
                    "temperature": generation.temperature,
                    "num_predict": generation.max_tokens,
                },
            });
            match payload {
                Payload::Text { prompt, text } => {
                    body["prompt"] = json!(format!("{}\n\n{}", prompt, text));
                }
                Payload::Image { prompt, bytes, .. } => {
                    body["prompt"] = json!(prompt);
                    body["images"] = json!([BASE64.encode(bytes)]);
                }
            }
            WireRequest {
                path: "/api/generate".to_string(),
                body,
            }
        }
    }
}

/// Pull the generated text out of a successful response body.
pub fn response_text(dialect: Dialect, body: &Value) -> Option<String> {
    let text = match dialect {
        Dialect::ChatCompletions => body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string),
        Dialect::GenerateContent => {
            let parts = body.pointer("/candidates/0/content/parts")?.as_array()?;
            let joined: String = parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect();
            Some(joined)
        }
        Dialect::OllamaGenerate => body
            .get("response")
            .and_then(Value::as_str)
            .map(str::to_string),
    }?;

    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Path of the availability probe.
pub fn probe_path(dialect: Dialect, model: &str) -> String {
    match dialect {
        Dialect::ChatCompletions => "/models".to_string(),
        Dialect::GenerateContent => format!("/v1beta/models/{}", model),
        Dialect::OllamaGenerate => "/api/tags".to_string(),
    }
}

/// Whether an Ollama `/api/tags` listing contains `model`.
pub fn ollama_has_model(tags: &Value, model: &str) -> bool {
    let Some(models) = tags.get("models").and_then(Value::as_array) else {
        return false;
    };
    let wanted_latest = format!("{}:latest", model);
    models
        .iter()
        .filter_map(|m| m.get("name").and_then(Value::as_str))
        .any(|name| name == model || name == wanted_latest)
}
