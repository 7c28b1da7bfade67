//! Pluggable persistence for chunk embeddings and cached search results.
//!
//! Two backends implement [`VectorStore`]:
//! - [`SqliteVectorStore`]: persistent, real cosine similarity over stored vectors
//! - [`InMemoryVectorStore`]: per-instance development fallback that answers similarity
//!   queries with keyword matching and a fixed score
//!
//! Callers must work with either; similarity scores are only meaningful when
//! [`VectorStore::supports_similarity`] returns true.

pub mod memory;
pub mod sqlite;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::loader::vector_store_path;
use crate::config::DealscopeConfig;
use crate::error::{DealscopeError, Result};
use crate::rag::chunking::TranscriptChunk;

pub use memory::InMemoryVectorStore;
pub use sqlite::SqliteVectorStore;

/// Similarity reported for lookups that are not similarity-ranked.
pub const EXACT_MATCH_SCORE: f64 = 1.0;

/// A chunk bound to a meeting together with its embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkEmbedding {
    pub meeting_id: String,
    pub chunk_id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub token_count: usize,
    pub start_secs: f64,
    pub end_secs: f64,
    pub speakers: Vec<String>,
    pub dominant_speaker: Option<String>,
    pub topics: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl ChunkEmbedding {
    pub fn from_chunk(meeting_id: &str, chunk: &TranscriptChunk, embedding: Vec<f32>) -> Self {
        Self {
            meeting_id: meeting_id.to_string(),
            chunk_id: chunk.id.clone(),
            content: chunk.content.clone(),
            embedding,
            token_count: chunk.token_count,
            start_secs: chunk.start_secs,
            end_secs: chunk.end_secs,
            speakers: chunk.speakers.iter().cloned().collect(),
            dominant_speaker: chunk.dominant_speaker.clone(),
            topics: chunk.topics.clone(),
            created_at: Utc::now(),
        }
    }

    pub fn to_search_result(&self, similarity: f64) -> EmbeddingSearchResult {
        EmbeddingSearchResult {
            chunk_id: self.chunk_id.clone(),
            content: self.content.clone(),
            similarity,
            start_secs: self.start_secs,
            end_secs: self.end_secs,
            speakers: self.speakers.clone(),
            dominant_speaker: self.dominant_speaker.clone(),
            topics: self.topics.clone(),
        }
    }
}

/// Read-side projection returned by every search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingSearchResult {
    pub chunk_id: String,
    pub content: String,
    pub similarity: f64,
    pub start_secs: f64,
    pub end_secs: f64,
    pub speakers: Vec<String>,
    pub dominant_speaker: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
}

/// Optional post-hoc filter; all present criteria must hold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilter {
    pub time_range: Option<(f64, f64)>,
    #[serde(default)]
    pub speakers: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,
}

impl SearchFilter {
    pub fn is_empty(&self) -> bool {
        self.time_range.is_none() && self.speakers.is_empty() && self.topics.is_empty()
    }

    pub fn matches(&self, embedding: &ChunkEmbedding) -> bool {
        let in_range = self.time_range.map_or(true, |(start, end)| {
            embedding.end_secs >= start && embedding.start_secs <= end
        });

        let speaker_ok = self.speakers.is_empty()
            || embedding.speakers.iter().any(|speaker| {
                self.speakers
                    .iter()
                    .any(|wanted| wanted.eq_ignore_ascii_case(speaker))
            });

        let topic_ok = self.topics.is_empty()
            || embedding.topics.iter().any(|topic| {
                self.topics
                    .iter()
                    .any(|wanted| wanted.eq_ignore_ascii_case(topic))
            });

        in_range && speaker_ok && topic_ok
    }
}

/// A similarity request. The text is kept alongside the vector so keyword backends can
/// answer without vectors.
#[derive(Debug, Clone)]
pub struct SimilarityQuery<'a> {
    pub text: &'a str,
    pub vector: &'a [f32],
    pub limit: usize,
    pub min_similarity: f64,
    pub filter: &'a SearchFilter,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub meeting_id: String,
    pub analysis_type: String,
    pub query_hash: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageStats {
    pub backend: String,
    pub meetings: usize,
    pub embeddings: usize,
    pub total_tokens: usize,
    pub cache_entries: usize,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Whether `search_similar` ranks by real vector similarity.
    fn supports_similarity(&self) -> bool;

    /// Insert or overwrite rows keyed by (meeting_id, chunk_id).
    async fn upsert_embeddings(&self, embeddings: &[ChunkEmbedding]) -> Result<usize>;

    /// Atomically swap a meeting's chunk set: either all new rows land or nothing changes.
    async fn replace_meeting(&self, meeting_id: &str, embeddings: &[ChunkEmbedding])
        -> Result<usize>;

    async fn search_similar(
        &self,
        meeting_id: &str,
        query: &SimilarityQuery<'_>,
    ) -> Result<Vec<EmbeddingSearchResult>>;

    /// Case-insensitive term matching over chunk content, scored by matched-term ratio.
    async fn keyword_search(
        &self,
        meeting_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<EmbeddingSearchResult>>;

    async fn get_by_time_range(
        &self,
        meeting_id: &str,
        start_secs: f64,
        end_secs: f64,
    ) -> Result<Vec<EmbeddingSearchResult>>;

    async fn get_by_speaker(
        &self,
        meeting_id: &str,
        speaker: &str,
    ) -> Result<Vec<EmbeddingSearchResult>>;

    async fn get_by_topics(
        &self,
        meeting_id: &str,
        topics: &[String],
    ) -> Result<Vec<EmbeddingSearchResult>>;

    async fn delete_for_meeting(&self, meeting_id: &str) -> Result<usize>;

    async fn count_for_meeting(&self, meeting_id: &str) -> Result<usize>;

    /// Returns `None` for missing or expired entries.
    async fn cache_get(&self, key: &CacheKey) -> Result<Option<Vec<EmbeddingSearchResult>>>;

    async fn cache_put(
        &self,
        key: &CacheKey,
        results: &[EmbeddingSearchResult],
        ttl: Duration,
    ) -> Result<()>;

    async fn storage_stats(&self, meeting_id: Option<&str>) -> Result<StorageStats>;

    async fn health_check(&self) -> Result<bool>;
}

/// Build the configured backend. "memory" (or "none") selects the development fallback.
pub fn open_store(config: &DealscopeConfig) -> Result<Arc<dyn VectorStore>> {
    match config.vector_store.backend.to_lowercase().as_str() {
        "sqlite" => {
            let path = vector_store_path(config)?;
            tracing::info!("Using SQLite vector store at {:?}", path);
            Ok(Arc::new(SqliteVectorStore::open(&path)?))
        }
        "memory" | "none" => {
            tracing::warn!(
                "No persistent vector store configured, using in-memory keyword fallback"
            );
            Ok(Arc::new(InMemoryVectorStore::new()))
        }
        other => Err(DealscopeError::InvalidConfig(format!(
            "Unknown vector store backend: {}",
            other
        ))),
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let x64 = f64::from(*x);
        let y64 = f64::from(*y);
        dot += x64 * y64;
        norm_a += x64 * x64;
        norm_b += y64 * y64;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 || !denom.is_finite() {
        return None;
    }
    Some(dot / denom)
}

/// Lowercased query terms longer than two characters.
pub fn query_terms(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|term| term.chars().count() > 2)
        .map(str::to_lowercase)
        .collect()
}

/// Fraction of query terms present in `content`; the full query as a substring counts as 1.0.
pub fn keyword_score(content: &str, query: &str, terms: &[String]) -> f64 {
    let haystack = content.to_lowercase();
    let needle = query.trim().to_lowercase();
    if !needle.is_empty() && haystack.contains(&needle) {
        return 1.0;
    }
    if terms.is_empty() {
        return 0.0;
    }
    let hits = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
    hits as f64 / terms.len() as f64
}

/// Rank, threshold and truncate candidates by similarity, best first.
pub(crate) fn rank_by_similarity(
    candidates: Vec<(f64, &ChunkEmbedding)>,
    min_similarity: f64,
    limit: usize,
) -> Vec<EmbeddingSearchResult> {
    let mut hits: Vec<(f64, &ChunkEmbedding)> = candidates
        .into_iter()
        .filter(|(score, _)| *score >= min_similarity)
        .collect();

    hits.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.chunk_id.cmp(&b.1.chunk_id))
    });
    hits.truncate(limit);

    hits.into_iter()
        .map(|(score, embedding)| embedding.to_search_result(score))
        .collect()
}
