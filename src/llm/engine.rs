use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{http_backend, prompts, Completion, CompletionRequest, LlmBackend};
use crate::analysis::AnalysisType;
use crate::config::settings::{LlmConfig, PipelineConfig};
use crate::error::{DealscopeError, Result};
use crate::rag::store::EmbeddingSearchResult;
use crate::transcript::format_timestamp;

pub const TRUNCATION_MARKER: &str = "[... contexto truncado ...]";

/// Retrieved evidence for one analysis call.
#[derive(Debug, Clone)]
pub struct AnalysisContext {
    pub meeting_id: String,
    pub results: Vec<EmbeddingSearchResult>,
    pub analysis_type: Option<AnalysisType>,
}

impl AnalysisContext {
    pub fn new(
        meeting_id: &str,
        results: Vec<EmbeddingSearchResult>,
        analysis_type: Option<AnalysisType>,
    ) -> Self {
        Self {
            meeting_id: meeting_id.to_string(),
            results,
            analysis_type,
        }
    }
}

/// Render results as `[timestamp] speaker: content` blocks in the given order.
///
/// With `max_chars`, output stops at the last block that fits whole and the truncation
/// marker is appended.
pub fn build_context(results: &[EmbeddingSearchResult], max_chars: Option<usize>) -> String {
    let mut out = String::new();

    for (i, result) in results.iter().enumerate() {
        let speaker = result
            .dominant_speaker
            .clone()
            .unwrap_or_else(|| result.speakers.join(", "));
        let block = format!(
            "[{}] {}: {}",
            format_timestamp(result.start_secs),
            speaker,
            result.content
        );
        let separator = if out.is_empty() { "" } else { "\n\n" };

        if let Some(limit) = max_chars {
            if out.len() + separator.len() + block.len() > limit {
                tracing::debug!(
                    "Context truncated at {} of {} blocks ({} chars)",
                    i,
                    results.len(),
                    out.len()
                );
                if !out.is_empty() {
                    out.push_str("\n\n");
                }
                out.push_str(TRUNCATION_MARKER);
                return out;
            }
        }

        out.push_str(separator);
        out.push_str(&block);
    }

    out
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelAvailability {
    pub general_model: String,
    pub general_available: bool,
    pub deep_context_model: Option<String>,
    pub deep_context_available: bool,
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub call_timeout: Duration,
    pub max_tokens: u32,
    pub quick_max_tokens: u32,
    pub temperature: f32,
    pub context_max_chars: usize,
    pub quick_context_max_chars: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(180),
            max_tokens: 8192,
            quick_max_tokens: 1024,
            temperature: 0.2,
            context_max_chars: 24_000,
            quick_context_max_chars: 8_000,
        }
    }
}

impl EngineOptions {
    pub fn from_config(llm: &LlmConfig, pipeline: &PipelineConfig) -> Self {
        Self {
            call_timeout: Duration::from_secs(pipeline.stage_timeout_secs),
            max_tokens: llm.max_tokens,
            quick_max_tokens: llm.quick_max_tokens,
            temperature: llm.temperature,
            context_max_chars: pipeline.context_max_chars,
            quick_context_max_chars: pipeline.quick_context_max_chars,
        }
    }
}

/// Routes analysis calls across the general, deep-context and quick models.
///
/// Script and ICP analyses prefer the deep-context model when one is configured and fall
/// back to the general model exactly once on quota exhaustion. Everything else goes to the
/// general model, except quick summaries and chat which use the quick model.
pub struct MultiModelEngine {
    general: Arc<dyn LlmBackend>,
    deep_context: Option<Arc<dyn LlmBackend>>,
    quick: Arc<dyn LlmBackend>,
    options: EngineOptions,
}

impl MultiModelEngine {
    pub fn new(
        general: Arc<dyn LlmBackend>,
        deep_context: Option<Arc<dyn LlmBackend>>,
        quick: Arc<dyn LlmBackend>,
        options: EngineOptions,
    ) -> Self {
        Self {
            general,
            deep_context,
            quick,
            options,
        }
    }

    pub fn from_config(llm: &LlmConfig, pipeline: &PipelineConfig) -> Result<Self> {
        if !llm.is_configured() {
            return Err(DealscopeError::Config(
                "LLM is not configured. Run 'dealscope config init' and set [llm].".to_string(),
            ));
        }

        let general = http_backend(
            &llm.provider,
            llm.api_key.as_deref(),
            llm.base_url.as_deref(),
            &llm.model,
        )?;
        let quick = http_backend(
            &llm.provider,
            llm.api_key.as_deref(),
            llm.base_url.as_deref(),
            &llm.quick_model,
        )?;

        let deep = &llm.deep_context;
        let deep_context = if deep.enabled {
            match http_backend(
                &deep.provider,
                deep.api_key.as_deref(),
                deep.base_url.as_deref(),
                &deep.model,
            ) {
                Ok(backend) => Some(backend),
                Err(e) => {
                    tracing::warn!("Deep-context model disabled: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(Self::new(
            general,
            deep_context,
            quick,
            EngineOptions::from_config(llm, pipeline),
        ))
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn general_model(&self) -> &str {
        self.general.model_id()
    }

    fn analysis_request(&self, prompt: String) -> CompletionRequest {
        CompletionRequest::new(prompt)
            .with_system(prompts::ANALYST_SYSTEM)
            .with_max_tokens(self.options.max_tokens)
            .with_temperature(self.options.temperature)
            .json()
    }

    async fn call(
        &self,
        backend: &dyn LlmBackend,
        stage: &'static str,
        request: &CompletionRequest,
    ) -> Result<Completion> {
        let completion = tokio::time::timeout(self.options.call_timeout, backend.complete(request))
            .await
            .map_err(|_| DealscopeError::Timeout {
                stage,
                timeout: self.options.call_timeout,
            })??;

        tracing::info!(
            "{} answered by {} in {:?} ({} tokens)",
            stage,
            completion.model,
            completion.latency,
            completion.usage.total()
        );
        Ok(completion)
    }

    async fn call_preferring_deep_context(
        &self,
        stage: &'static str,
        request: &CompletionRequest,
    ) -> Result<Completion> {
        if let Some(deep) = &self.deep_context {
            match self.call(deep.as_ref(), stage, request).await {
                Ok(completion) => return Ok(completion),
                Err(e) if e.is_quota_exhausted() => {
                    tracing::warn!(
                        "{} quota exhausted on {}, falling back to {}: {}",
                        stage,
                        deep.model_id(),
                        self.general.model_id(),
                        e
                    );
                }
                Err(e) => return Err(e),
            }
        }

        self.call(self.general.as_ref(), stage, request).await
    }

    pub async fn analyze_script(
        &self,
        context: &AnalysisContext,
        guidelines: Option<&str>,
    ) -> Result<Completion> {
        let evidence = build_context(&context.results, Some(self.options.context_max_chars));
        let request = self.analysis_request(prompts::script_analysis_prompt(&evidence, guidelines));
        self.call_preferring_deep_context("script analysis", &request)
            .await
    }

    pub async fn analyze_icp(
        &self,
        context: &AnalysisContext,
        guidelines: Option<&str>,
    ) -> Result<Completion> {
        let evidence = build_context(&context.results, Some(self.options.context_max_chars));
        let request = self.analysis_request(prompts::icp_analysis_prompt(&evidence, guidelines));
        self.call_preferring_deep_context("icp analysis", &request)
            .await
    }

    pub async fn analyze_objections(&self, context: &AnalysisContext) -> Result<Completion> {
        let evidence = build_context(&context.results, Some(self.options.context_max_chars));
        let request = self.analysis_request(prompts::objections_analysis_prompt(&evidence));
        self.call(self.general.as_ref(), "objections analysis", &request)
            .await
    }

    pub async fn generate_final_report(
        &self,
        script_analysis: &str,
        icp_analysis: &str,
        objections_analysis: &str,
        context: &AnalysisContext,
    ) -> Result<Completion> {
        let evidence = build_context(&context.results, Some(self.options.context_max_chars));
        let request = self.analysis_request(prompts::final_report_prompt(
            script_analysis,
            icp_analysis,
            objections_analysis,
            &evidence,
        ));
        self.call(self.general.as_ref(), "final report", &request)
            .await
    }

    pub async fn quick_summary(&self, context: &AnalysisContext) -> Result<Completion> {
        let evidence = build_context(
            &context.results,
            Some(self.options.quick_context_max_chars),
        );
        let request = CompletionRequest::new(prompts::quick_summary_prompt(&evidence))
            .with_max_tokens(self.options.quick_max_tokens)
            .with_temperature(self.options.temperature);
        self.call(self.quick.as_ref(), "quick summary", &request)
            .await
    }

    pub async fn chat_completion(&self, prompt: String) -> Result<Completion> {
        let request = CompletionRequest::new(prompt)
            .with_max_tokens(self.options.quick_max_tokens)
            .with_temperature(self.options.temperature);
        self.call(self.quick.as_ref(), "chat", &request).await
    }

    /// Tiny JSON prompts for topic tagging, sent to the quick model.
    pub async fn extract_topics_raw(&self, chunk_content: &str) -> Result<Completion> {
        let request = CompletionRequest::new(prompts::topic_extraction_prompt(chunk_content))
            .with_max_tokens(128)
            .with_temperature(0.0);
        self.call(self.quick.as_ref(), "topic extraction", &request)
            .await
    }

    /// One-line ping to each analysis model.
    pub async fn test_models(&self) -> ModelAvailability {
        let ping = CompletionRequest::new("Responda apenas: ok").with_max_tokens(8);

        let general_available = match self.call(self.general.as_ref(), "model test", &ping).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("General model {} unavailable: {}", self.general.model_id(), e);
                false
            }
        };

        let (deep_context_model, deep_context_available) = match &self.deep_context {
            Some(deep) => {
                let available = match self.call(deep.as_ref(), "model test", &ping).await {
                    Ok(_) => true,
                    Err(e) => {
                        tracing::warn!("Deep-context model {} unavailable: {}", deep.model_id(), e);
                        false
                    }
                };
                (Some(deep.model_id().to_string()), available)
            }
            None => (None, false),
        };

        ModelAvailability {
            general_model: self.general.model_id().to_string(),
            general_available,
            deep_context_model,
            deep_context_available,
        }
    }
}
