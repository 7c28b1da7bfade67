pub mod ranking;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::analysis::guidelines::{GuidelineSource, Guidelines};
use crate::analysis::FullAnalysisReport;
use crate::config::settings::ChatConfig;
use crate::error::Result;
use crate::llm::prompts::{chat_prompt, ChatPromptParts};
use crate::llm::{build_context, MultiModelEngine, TokenUsage};
use crate::rag::RagService;
use crate::transcript::{parse_to_segments, TranscriptSegment};

/// Fixed reply when no evidence could be found; the model is not called.
pub const NO_RELEVANT_INFORMATION: &str =
    "Não encontrei informações relevantes na transcrição desta reunião para responder a essa pergunta.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatStrategy {
    /// Chunk-embedding search against the meeting index.
    Retrieval,
    /// Keyword scoring over raw transcript segments.
    SegmentRanking,
}

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub meeting_id: String,
    pub question: String,
    pub report: Option<FullAnalysisReport>,
    pub transcript_text: Option<String>,
    pub segments: Vec<TranscriptSegment>,
}

impl ChatRequest {
    pub fn new(meeting_id: &str, question: &str) -> Self {
        Self {
            meeting_id: meeting_id.to_string(),
            question: question.to_string(),
            ..Self::default()
        }
    }

    pub fn with_report(mut self, report: Option<FullAnalysisReport>) -> Self {
        self.report = report;
        self
    }

    pub fn with_transcript(mut self, transcript_text: impl Into<String>) -> Self {
        self.transcript_text = Some(transcript_text.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatAnswer {
    pub answer: String,
    pub strategy: ChatStrategy,
    pub evidence_count: usize,
    pub model: Option<String>,
    pub usage: TokenUsage,
}

impl ChatAnswer {
    fn no_evidence(strategy: ChatStrategy) -> Self {
        Self {
            answer: NO_RELEVANT_INFORMATION.to_string(),
            strategy,
            evidence_count: 0,
            model: None,
            usage: TokenUsage::default(),
        }
    }

    pub fn found_evidence(&self) -> bool {
        self.evidence_count > 0
    }
}

/// Answers free-form questions about one meeting, grounded in its transcript.
pub struct MeetingChatEngine {
    rag: Arc<RagService>,
    engine: Arc<MultiModelEngine>,
    guidelines: Arc<dyn GuidelineSource>,
    config: ChatConfig,
}

impl MeetingChatEngine {
    pub fn new(
        rag: Arc<RagService>,
        engine: Arc<MultiModelEngine>,
        guidelines: Arc<dyn GuidelineSource>,
        config: ChatConfig,
    ) -> Self {
        Self {
            rag,
            engine,
            guidelines,
            config,
        }
    }

    pub async fn strategy_for(&self, meeting_id: &str) -> Result<ChatStrategy> {
        Ok(if self.rag.has_index(meeting_id).await? {
            ChatStrategy::Retrieval
        } else {
            ChatStrategy::SegmentRanking
        })
    }

    pub async fn answer(&self, request: &ChatRequest) -> Result<ChatAnswer> {
        let strategy = self.strategy_for(&request.meeting_id).await?;
        let question = request.question.trim();

        if question.is_empty() {
            return Ok(ChatAnswer::no_evidence(strategy));
        }

        let (excerpts, evidence_count) = match strategy {
            ChatStrategy::Retrieval => {
                let results = self
                    .rag
                    .search_for_chat(
                        &request.meeting_id,
                        question,
                        self.config.retrieval_limit,
                        self.config.min_similarity,
                    )
                    .await?;
                (build_context(&results, None), results.len())
            }
            ChatStrategy::SegmentRanking => {
                let parsed;
                let segments = if request.segments.is_empty() {
                    parsed = parse_to_segments(request.transcript_text.as_deref().unwrap_or(""));
                    &parsed
                } else {
                    &request.segments
                };
                let ranked = ranking::rank_segments(question, segments, self.config.top_segments);
                let rendered = ranked
                    .iter()
                    .map(|segment| segment.render())
                    .collect::<Vec<_>>()
                    .join("\n");
                (rendered, ranked.len())
            }
        };

        if evidence_count == 0 {
            tracing::info!(
                "No evidence for question on meeting {} ({:?})",
                request.meeting_id,
                strategy
            );
            return Ok(ChatAnswer::no_evidence(strategy));
        }

        let guidelines = self.guidelines.active_guidelines().unwrap_or_else(|e| {
            tracing::warn!("Failed to load guidelines, using defaults: {}", e);
            Guidelines::default()
        });

        let report = request
            .report
            .as_ref()
            .filter(|r| !r.is_empty())
            .map(|r| truncate_chars(&r.to_context_text(), self.config.max_report_chars));
        let transcript = request
            .transcript_text
            .as_deref()
            .map(|t| truncate_chars(t, self.config.max_transcript_chars));
        let guideline_text = guidelines.combined();

        let prompt = chat_prompt(&ChatPromptParts {
            question,
            report: report.as_deref(),
            excerpts: &excerpts,
            transcript: transcript.as_deref(),
            guidelines: &guideline_text,
            max_words: self.config.max_answer_words,
        });

        let completion = self.engine.chat_completion(prompt).await?;
        tracing::debug!(
            "Chat answer for {} from {} using {} excerpts",
            request.meeting_id,
            completion.model,
            evidence_count
        );

        Ok(ChatAnswer {
            answer: completion.content.trim().to_string(),
            strategy,
            evidence_count,
            model: Some(completion.model),
            usage: completion.usage,
        })
    }
}

/// First `max_chars` characters, with an ellipsis when something was cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => format!("{}…", &text[..byte_index]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::guidelines::StaticGuidelineSource;
    use crate::llm::prompts::CHAT_HEADER;
    use crate::llm::testing::ScriptedBackend;
    use crate::llm::EngineOptions;
    use crate::rag::service::testing::{hashing_rag, SALES_CALL};
    use crate::rag::store::{InMemoryVectorStore, VectorStore};

    struct Fixture {
        chat: MeetingChatEngine,
        rag: Arc<RagService>,
        quick: Arc<ScriptedBackend>,
    }

    fn fixture() -> Fixture {
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let rag = Arc::new(hashing_rag(store));
        let quick = Arc::new(ScriptedBackend::fixed(
            "quick-model",
            "[00:03:10] Marina: \"está caro para o nosso orçamento\"",
        ));
        let engine = Arc::new(MultiModelEngine::new(
            Arc::new(ScriptedBackend::fixed("general", "{}")),
            None,
            quick.clone(),
            EngineOptions::default(),
        ));
        let chat = MeetingChatEngine::new(
            rag.clone(),
            engine,
            Arc::new(StaticGuidelineSource::default()),
            ChatConfig::default(),
        );
        Fixture { chat, rag, quick }
    }

    #[tokio::test]
    async fn test_no_matching_chunks_skips_model() {
        let f = fixture();
        f.rag.index_transcript("m1", SALES_CALL).await.unwrap();

        let answer = f
            .chat
            .answer(&ChatRequest::new("m1", "xyzzy quantum flux"))
            .await
            .unwrap();

        assert_eq!(answer.answer, NO_RELEVANT_INFORMATION);
        assert_eq!(answer.strategy, ChatStrategy::Retrieval);
        assert!(answer.model.is_none());
        assert_eq!(f.quick.calls(), 0);
    }

    #[tokio::test]
    async fn test_retrieval_answer_is_grounded_in_excerpts() {
        let f = fixture();
        f.rag.index_transcript("m1", SALES_CALL).await.unwrap();

        let answer = f
            .chat
            .answer(&ChatRequest::new("m1", "orçamento"))
            .await
            .unwrap();

        assert_eq!(answer.strategy, ChatStrategy::Retrieval);
        assert_eq!(answer.model.as_deref(), Some("quick-model"));
        assert!(answer.found_evidence());

        let prompt = &f.quick.prompts()[0];
        assert!(prompt.starts_with(CHAT_HEADER));
        assert!(prompt.contains("está caro para o nosso orçamento"));
        assert!(prompt.contains("Máximo de 250 palavras"));
    }

    #[tokio::test]
    async fn test_unindexed_meeting_uses_segment_ranking() {
        let f = fixture();

        let request = ChatRequest::new("m2", "Qual foi a objeção de preço? está caro")
            .with_transcript(SALES_CALL);
        let answer = f.chat.answer(&request).await.unwrap();

        assert_eq!(answer.strategy, ChatStrategy::SegmentRanking);
        assert!(answer.found_evidence());
        let prompt = &f.quick.prompts()[0];
        assert!(prompt.contains("[00:03:10] Marina: Gostei, mas sinceramente está caro"));
    }

    #[tokio::test]
    async fn test_unindexed_meeting_without_transcript_has_no_evidence() {
        let f = fixture();
        let answer = f
            .chat
            .answer(&ChatRequest::new("m3", "Qual o orçamento?"))
            .await
            .unwrap();

        assert_eq!(answer.answer, NO_RELEVANT_INFORMATION);
        assert_eq!(f.quick.calls(), 0);
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("orçamento", 3), "orç…");
        assert_eq!(truncate_chars("curto", 10), "curto");
    }
}
