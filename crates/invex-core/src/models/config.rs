//! Configuration structures for the batch pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::extract::compare::ComparisonPolicy;
use crate::extract::prompts::PromptSet;
use crate::models::invoice::ExtractionMode;

/// Main configuration for the invex pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InvexConfig {
    /// Extraction strategy configuration.
    pub extraction: ExtractionConfig,

    /// Provider adapter configuration. `None` means deterministic only.
    pub provider: Option<ProviderConfig>,

    /// Worker pool, retry and resume configuration.
    pub batch: BatchConfig,

    /// Document pre-filter configuration.
    pub documents: DocumentConfig,

    /// Output and classification configuration.
    pub output: OutputConfig,

    /// Prompt templates sent to model backends.
    pub prompts: PromptSet,
}

/// Extraction strategy configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Requested extraction mode.
    pub mode: ExtractionMode,

    /// Cross-validation tolerances for hybrid mode.
    pub comparison: ComparisonPolicy,
}

/// Supported provider backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    DeepSeek,
    Gemini,
    Ollama,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::OpenAi,
        ProviderKind::DeepSeek,
        ProviderKind::Gemini,
        ProviderKind::Ollama,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::DeepSeek => "deepseek",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Ollama => "ollama",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::DeepSeek => "https://api.deepseek.com",
            ProviderKind::Gemini => "https://generativelanguage.googleapis.com",
            ProviderKind::Ollama => "http://localhost:11434",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "gpt-4o-mini",
            ProviderKind::DeepSeek => "deepseek-chat",
            ProviderKind::Gemini => "gemini-2.5-flash",
            ProviderKind::Ollama => "qwen2.5:7b",
        }
    }

    /// Request timeout in seconds. Local models are given more time.
    pub fn default_timeout_secs(&self) -> u64 {
        match self {
            ProviderKind::Ollama => 120,
            _ => 30,
        }
    }

    pub fn requires_api_key(&self) -> bool {
        !matches!(self, ProviderKind::Ollama)
    }

    /// Environment variable holding the API key.
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            ProviderKind::OpenAi => Some("OPENAI_API_KEY"),
            ProviderKind::DeepSeek => Some("DEEPSEEK_API_KEY"),
            ProviderKind::Gemini => Some("GEMINI_API_KEY"),
            ProviderKind::Ollama => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "deepseek" => Ok(ProviderKind::DeepSeek),
            "gemini" => Ok(ProviderKind::Gemini),
            "ollama" => Ok(ProviderKind::Ollama),
            other => Err(format!(
                "unknown provider '{}' (expected openai, deepseek, gemini or ollama)",
                other
            )),
        }
    }
}

/// Provider adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,

    /// Model name. Defaults per kind.
    #[serde(default)]
    pub model: Option<String>,

    /// Endpoint override.
    #[serde(default)]
    pub base_url: Option<String>,

    /// API key. Usually injected from the environment by the CLI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Request timeout override in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    0.1
}

fn default_max_tokens() -> u32 {
    2048
}

impl ProviderConfig {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            model: None,
            base_url: None,
            api_key: None,
            timeout_secs: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }

    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.kind.default_model())
    }

    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.kind.default_base_url())
            .trim_end_matches('/')
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
            .unwrap_or_else(|| self.kind.default_timeout_secs())
    }

    /// Fill the API key from the kind's environment variable if unset.
    pub fn resolve_api_key_from_env(&mut self) {
        if self.api_key.as_deref().is_some_and(|k| !k.is_empty()) {
            return;
        }
        if let Some(var) = self.kind.api_key_env() {
            if let Ok(key) = std::env::var(var) {
                if !key.trim().is_empty() {
                    self.api_key = Some(key.trim().to_string());
                }
            }
        }
    }
}

/// Worker pool, retry and resume configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Number of concurrent workers.
    pub workers: usize,

    /// Bounded queue capacity between producer and workers.
    pub queue_capacity: usize,

    /// Maximum extraction attempts per document.
    pub max_attempts: u32,

    /// Base backoff delay; doubles per attempt.
    pub backoff_base_ms: u64,

    /// Timeout for a single provider call, in seconds.
    pub call_timeout_secs: u64,

    /// Skip documents completed in earlier runs.
    pub resume: bool,

    /// Reprocess documents even if already done.
    pub force: bool,

    /// Use the deterministic extractor when no provider is reachable.
    pub allow_fallback: bool,

    /// Progress log location. Defaults to `<output_dir>/.invex-progress.jsonl`.
    pub resume_file: Option<PathBuf>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 16,
            max_attempts: 3,
            backoff_base_ms: 500,
            call_timeout_secs: 120,
            resume: true,
            force: false,
            allow_fallback: true,
            resume_file: None,
        }
    }
}

impl BatchConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs.max(1))
    }

    /// Bound on a whole extraction attempt, always longer than a single call.
    pub fn attempt_timeout(&self) -> Duration {
        self.call_timeout().saturating_mul(2)
    }
}

/// Document pre-filter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentConfig {
    /// Files larger than this are skipped.
    pub max_file_size_mb: u64,

    /// Only the first N PDF pages are decoded.
    pub max_pdf_pages: usize,

    /// Minimum number of distinct keywords a text document must contain.
    pub min_keyword_hits: usize,

    /// Invoice keywords used by the pre-filter.
    pub keywords: Vec<String>,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: 5,
            max_pdf_pages: 5,
            min_keyword_hits: 2,
            keywords: [
                "发票", "税额", "价税合计", "购买方", "销售方", "纳税人识别号", "invoice",
                "total", "tax", "seller", "buyer", "amount",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl DocumentConfig {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }
}

/// How source files are placed into the classification tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifyMode {
    #[default]
    Copy,
    Move,
}

impl FromStr for ClassifyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "copy" => Ok(ClassifyMode::Copy),
            "move" => Ok(ClassifyMode::Move),
            other => Err(format!("unknown classify mode '{}'", other)),
        }
    }
}

/// Output and classification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Root of reports, progress log and classification tree.
    pub output_dir: PathBuf,

    /// Place processed files into `seller/buyer/` folders.
    pub classify: bool,

    pub classify_mode: ClassifyMode,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("invex-output"),
            classify: true,
            classify_mode: ClassifyMode::Copy,
        }
    }
}

impl InvexConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        std::fs::write(path, content)
    }

    /// Location of the resume log.
    pub fn resume_path(&self) -> PathBuf {
        self.batch
            .resume_file
            .clone()
            .unwrap_or_else(|| self.output.output_dir.join(".invex-progress.jsonl"))
    }
}
