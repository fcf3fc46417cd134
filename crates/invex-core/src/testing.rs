//! In-memory test doubles shared by unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::ProviderError;
use crate::provider::{ImageInput, Provider, RawResponse};

/// Provider answering from a script, then with a default answer.
pub struct ScriptedProvider {
    default_answer: String,
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    available: bool,
    delay: Option<Duration>,
    calls: AtomicUsize,
    vision_calls: AtomicUsize,
    probes: AtomicUsize,
    call_times: Mutex<Vec<Instant>>,
}

impl ScriptedProvider {
    /// Always answer with `text`.
    pub fn answering(text: &str) -> Self {
        Self {
            default_answer: text.to_string(),
            script: Mutex::new(VecDeque::new()),
            available: true,
            delay: None,
            calls: AtomicUsize::new(0),
            vision_calls: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
            call_times: Mutex::new(Vec::new()),
        }
    }

    /// Always fail with `error`.
    pub fn failing(error: ProviderError) -> Self {
        let provider = Self::answering("");
        provider.script.lock().unwrap().extend(std::iter::repeat_n(Err(error), 64));
        provider
    }

    /// Queue a result to return before falling back to the default answer.
    pub fn then(self, result: Result<&str, ProviderError>) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(result.map(str::to_string));
        self
    }

    /// Sleep for `delay` before every answer.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vision_calls(&self) -> usize {
        self.vision_calls.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().unwrap().clone()
    }

    async fn next(&self) -> Result<RawResponse, ProviderError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.call_times.lock().unwrap().push(Instant::now());
        let scripted = self.script.lock().unwrap().pop_front();
        let text = match scripted {
            Some(result) => result?,
            None => self.default_answer.clone(),
        };
        Ok(RawResponse {
            text,
            provider: "scripted".to_string(),
            model: "test-model".to_string(),
        })
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "test-model"
    }

    async fn text_extract(&self, _prompt: &str, _document_text: &str) -> Result<RawResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.next().await
    }

    async fn vision_extract(&self, _prompt: &str, _image: &ImageInput<'_>) -> Result<RawResponse, ProviderError> {
        self.vision_calls.fetch_add(1, Ordering::SeqCst);
        self.next().await
    }

    async fn check_availability(&self) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.available
    }
}

/// Transient error as a rate-limited backend would return it.
pub fn rate_limited() -> ProviderError {
    ProviderError::transient("scripted", "HTTP 429")
}
