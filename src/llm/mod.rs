pub mod claude;
pub mod engine;
pub mod openai_compat;
pub mod prompts;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{DealscopeError, Result};

pub use engine::{build_context, AnalysisContext, EngineOptions, ModelAvailability, MultiModelEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Anthropic,
    OpenAI,
    Moonshot,
    OpenRouter,
    Gemini,
}

impl LlmProvider {
    pub fn from_provider(provider: &str) -> Option<Self> {
        match provider.to_lowercase().as_str() {
            "anthropic" | "claude" => Some(Self::Anthropic),
            "openai" => Some(Self::OpenAI),
            "moonshot" => Some(Self::Moonshot),
            "openrouter" => Some(Self::OpenRouter),
            "gemini" | "google" => Some(Self::Gemini),
            _ => None,
        }
    }

    pub fn base_url(&self) -> &'static str {
        match self {
            Self::OpenAI => "https://api.openai.com/v1",
            Self::Moonshot => "https://api.moonshot.ai/v1",
            Self::OpenRouter => "https://openrouter.ai/api/v1",
            Self::Gemini => "https://generativelanguage.googleapis.com/v1beta/openai",
            Self::Anthropic => "https://api.anthropic.com/v1",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Ask the provider for a JSON object response where supported.
    pub json_output: bool,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            max_tokens: 4096,
            temperature: 0.2,
            json_output: false,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn json(mut self) -> Self {
        self.json_output = true;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

impl std::ops::AddAssign for TokenUsage {
    fn add_assign(&mut self, other: Self) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Result of one model call. `model` is the model that actually answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,
    pub model: String,
    pub usage: TokenUsage,
    pub latency: Duration,
}

#[async_trait]
pub trait LlmBackend: Send + Sync {
    fn model_id(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion>;
}

/// What a provider edge returns before timing and model tagging.
#[derive(Debug, Clone)]
pub struct ProviderReply {
    pub content: String,
    pub usage: TokenUsage,
}

/// Non-success HTTP status from a provider, kept typed so quota errors can be told apart.
#[derive(Debug, thiserror::Error)]
#[error("API error {status}: {body}")]
pub struct ApiStatusError {
    pub status: u16,
    pub body: String,
}

impl ApiStatusError {
    pub fn new(status: u16, body: String) -> Self {
        Self { status, body }
    }

    pub fn is_quota(&self) -> bool {
        is_quota_signal(self.status, &self.body)
    }
}

/// 429s and the provider-specific exhaustion markers all count as quota errors.
pub fn is_quota_signal(status: u16, body: &str) -> bool {
    if status == 429 {
        return true;
    }
    let lowered = body.to_lowercase();
    lowered.contains("resource_exhausted")
        || lowered.contains("insufficient_quota")
        || lowered.contains("quota exceeded")
        || lowered.contains("rate_limit_exceeded")
}

fn classify_error(model: &str, err: anyhow::Error) -> DealscopeError {
    if let Some(status) = err.downcast_ref::<ApiStatusError>() {
        if status.is_quota() {
            return DealscopeError::QuotaExceeded {
                model: model.to_string(),
                message: status.body.clone(),
            };
        }
    }
    DealscopeError::Llm {
        model: model.to_string(),
        message: format!("{:#}", err),
    }
}

/// A hosted model reached over HTTP.
pub struct HttpBackend {
    provider: LlmProvider,
    api_key: String,
    base_url: Option<String>,
    model: String,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(
        provider: &str,
        api_key: Option<&str>,
        base_url: Option<&str>,
        model: &str,
    ) -> Result<Self> {
        let provider = LlmProvider::from_provider(provider).ok_or_else(|| {
            DealscopeError::InvalidConfig(format!("Invalid LLM provider: {}", provider))
        })?;
        let api_key = api_key
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                DealscopeError::Config(format!("API key not configured for model {}", model))
            })?
            .to_string();

        Ok(Self {
            provider,
            api_key,
            base_url: base_url.map(str::to_string),
            model: model.to_string(),
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl LlmBackend for HttpBackend {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let started = Instant::now();
        tracing::debug!(
            "Calling {} ({} prompt chars)",
            self.model,
            request.prompt.len()
        );

        let reply = match self.provider {
            LlmProvider::Anthropic => {
                claude::complete(
                    &self.client,
                    self.base_url.as_deref(),
                    &self.api_key,
                    &self.model,
                    request,
                )
                .await
            }
            LlmProvider::OpenAI
            | LlmProvider::Moonshot
            | LlmProvider::OpenRouter
            | LlmProvider::Gemini => {
                let base_url = self
                    .base_url
                    .as_deref()
                    .unwrap_or_else(|| self.provider.base_url());
                openai_compat::complete(&self.client, base_url, &self.api_key, &self.model, request)
                    .await
            }
        }
        .map_err(|e| classify_error(&self.model, e))?;

        Ok(Completion {
            content: reply.content,
            model: self.model.clone(),
            usage: reply.usage,
            latency: started.elapsed(),
        })
    }
}

pub fn http_backend(
    provider: &str,
    api_key: Option<&str>,
    base_url: Option<&str>,
    model: &str,
) -> Result<Arc<dyn LlmBackend>> {
    Ok(Arc::new(HttpBackend::new(provider, api_key, base_url, model)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_from_provider() {
        assert_eq!(
            LlmProvider::from_provider("anthropic"),
            Some(LlmProvider::Anthropic)
        );
        assert_eq!(
            LlmProvider::from_provider("OpenAI"),
            Some(LlmProvider::OpenAI)
        );
        assert_eq!(
            LlmProvider::from_provider("gemini"),
            Some(LlmProvider::Gemini)
        );
        assert_eq!(LlmProvider::from_provider("local"), None);
    }

    #[test]
    fn test_base_urls() {
        assert_eq!(LlmProvider::OpenAI.base_url(), "https://api.openai.com/v1");
        assert_eq!(
            LlmProvider::OpenRouter.base_url(),
            "https://openrouter.ai/api/v1"
        );
        assert!(LlmProvider::Gemini.base_url().contains("generativelanguage"));
    }

    #[test]
    fn test_quota_classification() {
        let quota = classify_error(
            "gemini-2.5-pro",
            ApiStatusError::new(429, "Too Many Requests".to_string()).into(),
        );
        assert!(quota.is_quota_exhausted());

        let exhausted = classify_error(
            "gemini-2.5-pro",
            ApiStatusError::new(400, r#"{"status":"RESOURCE_EXHAUSTED"}"#.to_string()).into(),
        );
        assert!(exhausted.is_quota_exhausted());

        let other = classify_error(
            "gpt-4o",
            ApiStatusError::new(500, "boom".to_string()).into(),
        );
        assert!(!other.is_quota_exhausted());
        assert!(matches!(other, DealscopeError::Llm { .. }));
    }

    #[test]
    fn test_backend_requires_api_key() {
        assert!(HttpBackend::new("openai", None, None, "gpt-4o").is_err());
        assert!(HttpBackend::new("openai", Some(""), None, "gpt-4o").is_err());
        assert!(HttpBackend::new("nope", Some("k"), None, "gpt-4o").is_err());
        assert!(HttpBackend::new("openai", Some("k"), None, "gpt-4o").is_ok());
    }

    #[test]
    fn test_usage_accumulates() {
        let mut usage = TokenUsage::default();
        usage += TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
        };
        usage += TokenUsage {
            input_tokens: 1,
            output_tokens: 1,
        };
        assert_eq!(usage.total(), 17);
    }
}
