use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::guidelines::{FileGuidelineSource, GuidelineSource, Guidelines};
use super::report::FullAnalysisReport;
use super::validator::{extract_json, validate_report};
use super::AnalysisType;
use crate::chat::{ChatAnswer, ChatRequest, MeetingChatEngine};
use crate::config::settings::{ChatConfig, PipelineConfig};
use crate::config::DealscopeConfig;
use crate::error::{DealscopeError, Result};
use crate::llm::{AnalysisContext, Completion, MultiModelEngine};
use crate::rag::chunking::Chunker;
use crate::rag::embedding::{embedder_from_config, EmbeddingService};
use crate::rag::limiter::RateLimiter;
use crate::rag::service::{merge_result, sort_by_similarity, IndexingStats, SearchOptions};
use crate::rag::store::{open_store, EmbeddingSearchResult};
use crate::rag::RagService;

const QUICK_SUMMARY_QUERY: &str = "resumo da reunião: contexto do cliente, dores, objeções e próximos passos";
const NOT_REQUESTED: &str = "(análise não solicitada)";

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub analysis_types: Vec<AnalysisType>,
    pub cancel: CancellationToken,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            analysis_types: AnalysisType::ALL.to_vec(),
            cancel: CancellationToken::new(),
        }
    }
}

impl PipelineOptions {
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let analysis_types = AnalysisType::parse_list(&config.analysis_types.join(","))?;
        Ok(Self {
            analysis_types,
            ..Self::default()
        })
    }

    pub fn with_types(mut self, analysis_types: Vec<AnalysisType>) -> Self {
        self.analysis_types = analysis_types;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn wants(&self, analysis_type: AnalysisType) -> bool {
        self.analysis_types.contains(&analysis_type)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub total_tokens: u64,
    pub elapsed_ms: u64,
    pub models_used: BTreeSet<String>,
    pub indexing: Option<IndexingStats>,
    /// Distinct chunks handed to consolidation.
    pub evidence_chunks: usize,
    pub stages_completed: Vec<String>,
}

impl ProcessingStats {
    fn record(&mut self, completion: &Completion) {
        self.total_tokens += completion.usage.total();
        self.models_used.insert(completion.model.clone());
    }

    fn absorb(&mut self, other: ProcessingStats) {
        self.total_tokens += other.total_tokens;
        self.models_used.extend(other.models_used);
    }

    fn complete_stage(&mut self, stage: &str) {
        tracing::info!("Pipeline stage completed: {}", stage);
        self.stages_completed.push(stage.to_string());
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub success: bool,
    pub meeting_id: String,
    pub report: FullAnalysisReport,
    pub stats: ProcessingStats,
    /// Raw model output per analysis type, before consolidation.
    pub raw_analyses: BTreeMap<AnalysisType, String>,
    pub quick_summary: Option<String>,
    pub error: Option<String>,
}

struct SpecializedOutcome {
    analysis_type: AnalysisType,
    evidence: Vec<EmbeddingSearchResult>,
    completion: Completion,
}

/// Four-layer orchestration: index, specialized analyses, consolidation, chat preparation.
pub struct AnalysisPipeline {
    rag: Arc<RagService>,
    engine: Arc<MultiModelEngine>,
    guidelines: Arc<dyn GuidelineSource>,
    chat: MeetingChatEngine,
    stage_timeout: Duration,
}

impl AnalysisPipeline {
    pub fn new(
        rag: Arc<RagService>,
        engine: Arc<MultiModelEngine>,
        guidelines: Arc<dyn GuidelineSource>,
        chat_config: ChatConfig,
        stage_timeout: Duration,
    ) -> Self {
        let chat = MeetingChatEngine::new(
            rag.clone(),
            engine.clone(),
            guidelines.clone(),
            chat_config,
        );
        Self {
            rag,
            engine,
            guidelines,
            chat,
            stage_timeout,
        }
    }

    pub fn from_config(config: &DealscopeConfig) -> Result<Self> {
        let store = open_store(config)?;
        let embedder = embedder_from_config(&config.embedding)?;
        let limiter = Arc::new(RateLimiter::new(
            config.embedding.requests_per_second,
            config.embedding.burst,
        ));
        let embeddings =
            EmbeddingService::new(embedder, store, limiter, config.embedding.batch_size);

        let engine = Arc::new(MultiModelEngine::from_config(&config.llm, &config.pipeline)?);
        let topic_engine = config.rag.extract_topics.then(|| engine.clone());

        let rag = Arc::new(RagService::new(
            embeddings,
            topic_engine,
            Chunker::new(config.chunking),
            config.rag.clone(),
            Duration::from_secs(config.vector_store.cache_ttl_secs),
        ));

        Ok(Self::new(
            rag,
            engine,
            Arc::new(FileGuidelineSource::from_config(&config.guidelines)),
            config.chat.clone(),
            Duration::from_secs(config.pipeline.stage_timeout_secs),
        ))
    }

    pub fn rag(&self) -> &Arc<RagService> {
        &self.rag
    }

    pub fn engine(&self) -> &Arc<MultiModelEngine> {
        &self.engine
    }

    pub fn chat_engine(&self) -> &MeetingChatEngine {
        &self.chat
    }

    /// Run every layer. Never returns an error: failures come back as `success: false`
    /// with an empty report and the stats gathered up to that point.
    pub async fn run_full(
        &self,
        meeting_id: &str,
        raw_text: &str,
        options: PipelineOptions,
    ) -> PipelineResult {
        let started = Instant::now();
        let mut stats = ProcessingStats::default();
        let mut raw_analyses = BTreeMap::new();

        tracing::info!(
            "Starting full analysis for meeting {} ({:?})",
            meeting_id,
            options.analysis_types
        );

        let outcome = tokio::select! {
            biased;
            _ = options.cancel.cancelled() => Err(DealscopeError::Cancelled(format!(
                "analysis of meeting {}",
                meeting_id
            ))),
            result = self.execute(meeting_id, raw_text, &options, &mut stats, &mut raw_analyses) => result,
        };

        stats.elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok((report, quick_summary)) => {
                tracing::info!(
                    "Analysis of meeting {} finished in {}ms ({} tokens)",
                    meeting_id,
                    stats.elapsed_ms,
                    stats.total_tokens
                );
                PipelineResult {
                    success: true,
                    meeting_id: meeting_id.to_string(),
                    report,
                    stats,
                    raw_analyses,
                    quick_summary,
                    error: None,
                }
            }
            Err(e) => {
                tracing::error!("Analysis of meeting {} failed: {}", meeting_id, e);
                PipelineResult {
                    success: false,
                    meeting_id: meeting_id.to_string(),
                    report: FullAnalysisReport::empty(),
                    stats,
                    raw_analyses,
                    quick_summary: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn execute(
        &self,
        meeting_id: &str,
        raw_text: &str,
        options: &PipelineOptions,
        stats: &mut ProcessingStats,
        raw_analyses: &mut BTreeMap<AnalysisType, String>,
    ) -> Result<(FullAnalysisReport, Option<String>)> {
        if options.analysis_types.is_empty() {
            return Err(DealscopeError::InvalidConfig(
                "no analysis types requested".to_string(),
            ));
        }

        let indexing = self.index(meeting_id, raw_text).await?;
        stats.indexing = Some(indexing);
        stats.complete_stage("index");

        let guidelines = self.guidelines.active_guidelines().unwrap_or_else(|e| {
            tracing::warn!("Failed to load guidelines, using defaults: {}", e);
            Guidelines::default()
        });

        // Specialized usage counts even when a sibling analysis fails.
        let usage = Mutex::new(ProcessingStats::default());
        let specialized = tokio::try_join!(
            self.run_specialized(meeting_id, AnalysisType::Script, options, &guidelines, &usage),
            self.run_specialized(meeting_id, AnalysisType::Icp, options, &guidelines, &usage),
            self.run_specialized(meeting_id, AnalysisType::Objections, options, &guidelines, &usage),
        );
        stats.absorb(usage.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner()));
        let (script, icp, objections) = specialized?;

        let mut evidence: Vec<EmbeddingSearchResult> = Vec::new();
        for outcome in [script, icp, objections].into_iter().flatten() {
            for result in outcome.evidence {
                merge_result(&mut evidence, result);
            }
            raw_analyses.insert(outcome.analysis_type, outcome.completion.content);
        }
        sort_by_similarity(&mut evidence);
        stats.evidence_chunks = evidence.len();
        stats.complete_stage("specialized");

        let context = AnalysisContext::new(meeting_id, evidence, None);
        let completion = self
            .engine
            .generate_final_report(
                raw_or_placeholder(raw_analyses, AnalysisType::Script),
                raw_or_placeholder(raw_analyses, AnalysisType::Icp),
                raw_or_placeholder(raw_analyses, AnalysisType::Objections),
                &context,
            )
            .await
            .map_err(|e| DealscopeError::analysis(meeting_id, "final_report", e))?;
        stats.record(&completion);

        let report = validate_report(&completion.content)
            .map_err(|e| DealscopeError::analysis(meeting_id, "final_report", e))?;
        stats.complete_stage("consolidation");

        let quick_summary = self.prepare_chat(meeting_id, stats).await?;
        stats.complete_stage("chat_preparation");

        Ok((report, quick_summary))
    }

    async fn index(&self, meeting_id: &str, raw_text: &str) -> Result<IndexingStats> {
        let indexing = tokio::time::timeout(
            self.stage_timeout,
            self.rag.index_transcript(meeting_id, raw_text),
        )
        .await
        .map_err(|_| DealscopeError::Timeout {
            stage: "indexing",
            timeout: self.stage_timeout,
        })??;

        Ok(indexing.stats)
    }

    async fn run_specialized(
        &self,
        meeting_id: &str,
        analysis_type: AnalysisType,
        options: &PipelineOptions,
        guidelines: &Guidelines,
        usage: &Mutex<ProcessingStats>,
    ) -> Result<Option<SpecializedOutcome>> {
        if !options.wants(analysis_type) {
            return Ok(None);
        }
        let wrap = |e: DealscopeError| DealscopeError::analysis(meeting_id, analysis_type.as_str(), e);

        let evidence = self
            .rag
            .search_for_analysis(meeting_id, analysis_type)
            .await
            .map_err(wrap)?;
        tracing::debug!(
            "{} analysis for {} uses {} chunks",
            analysis_type,
            meeting_id,
            evidence.len()
        );

        let context = AnalysisContext::new(meeting_id, evidence, Some(analysis_type));
        let completion = match analysis_type {
            AnalysisType::Script => {
                self.engine
                    .analyze_script(&context, Some(&guidelines.script_text))
                    .await
            }
            AnalysisType::Icp => {
                self.engine
                    .analyze_icp(&context, Some(&guidelines.icp_text))
                    .await
            }
            AnalysisType::Objections => self.engine.analyze_objections(&context).await,
        }
        .map_err(wrap)?;

        match usage.lock() {
            Ok(mut stats) => stats.record(&completion),
            Err(poisoned) => poisoned.into_inner().record(&completion),
        }

        extract_json(&completion.content, analysis_type.as_str()).map_err(wrap)?;

        Ok(Some(SpecializedOutcome {
            analysis_type,
            evidence: context.results,
            completion,
        }))
    }

    /// The index must be non-empty; the summary is a preview and its failure is not fatal.
    async fn prepare_chat(
        &self,
        meeting_id: &str,
        stats: &mut ProcessingStats,
    ) -> Result<Option<String>> {
        if !self.rag.has_index(meeting_id).await? {
            return Err(DealscopeError::Indexing {
                meeting_id: meeting_id.to_string(),
                stage: "chat preparation",
                message: "meeting index is empty".to_string(),
            });
        }

        let context = self.summary_context(meeting_id).await?;
        match self.engine.quick_summary(&context).await {
            Ok(completion) => {
                stats.record(&completion);
                Ok(Some(completion.content.trim().to_string()))
            }
            Err(e) => {
                tracing::warn!("Quick summary for {} failed: {}", meeting_id, e);
                Ok(None)
            }
        }
    }

    async fn summary_context(&self, meeting_id: &str) -> Result<AnalysisContext> {
        let options = SearchOptions {
            min_similarity: Some(0.0),
            ..SearchOptions::cached("summary")
        };
        let mut results = self
            .rag
            .search(meeting_id, QUICK_SUMMARY_QUERY, &options)
            .await?;
        if results.is_empty() {
            results = self
                .rag
                .search_by_time_range(meeting_id, 0.0, f64::MAX)
                .await?;
        }
        Ok(AnalysisContext::new(meeting_id, results, None))
    }

    /// Index and summarise only. No specialized analyses, no consolidated report.
    pub async fn run_quick(&self, meeting_id: &str, raw_text: &str) -> Result<String> {
        tracing::info!("Starting quick analysis for meeting {}", meeting_id);
        self.index(meeting_id, raw_text).await?;

        let context = self.summary_context(meeting_id).await?;
        let completion = self
            .engine
            .quick_summary(&context)
            .await
            .map_err(|e| DealscopeError::analysis(meeting_id, "quick_summary", e))?;
        Ok(completion.content.trim().to_string())
    }

    pub async fn chat(&self, meeting_id: &str, question: &str) -> Result<ChatAnswer> {
        self.chat.answer(&ChatRequest::new(meeting_id, question)).await
    }

    pub async fn answer(&self, request: &ChatRequest) -> Result<ChatAnswer> {
        self.chat.answer(request).await
    }
}

fn raw_or_placeholder(raw: &BTreeMap<AnalysisType, String>, analysis_type: AnalysisType) -> &str {
    raw.get(&analysis_type)
        .map(String::as_str)
        .unwrap_or(NOT_REQUESTED)
}
