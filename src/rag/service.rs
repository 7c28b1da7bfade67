use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::analysis::AnalysisType;
use crate::config::settings::RagConfig;
use crate::error::{DealscopeError, Result};
use crate::llm::MultiModelEngine;
use crate::rag::chunking::Chunker;
use crate::rag::embedding::EmbeddingService;
use crate::rag::limiter::RateLimiter;
use crate::rag::store::{CacheKey, EmbeddingSearchResult, SearchFilter, StorageStats, VectorStore};
use crate::transcript::parse_to_segments;

const SCRIPT_QUERIES: [&str; 5] = [
    "abertura da reunião e apresentação do vendedor",
    "perguntas de descoberta sobre o negócio do cliente",
    "apresentação da solução e proposta de valor",
    "fechamento da venda e compromisso do cliente",
    "definição de próximos passos e agenda",
];

const ICP_QUERIES: [&str; 6] = [
    "tamanho da empresa e número de funcionários",
    "principais dores, problemas e sobrecarga da equipe",
    "orçamento disponível e investimento",
    "quem toma a decisão de compra",
    "urgência e prazo para resolver o problema",
    "ferramentas, sistemas e processos atuais",
];

const OBJECTION_QUERIES: [&str; 5] = [
    "cliente acha o preço caro ou fora do orçamento",
    "objeção sobre momento ou prazo da compra",
    "comparação com concorrentes ou solução atual",
    "dúvidas, riscos e preocupações do cliente",
    "cliente precisa consultar sócio ou diretoria",
];

pub fn canned_queries(analysis_type: AnalysisType) -> &'static [&'static str] {
    match analysis_type {
        AnalysisType::Script => &SCRIPT_QUERIES,
        AnalysisType::Icp => &ICP_QUERIES,
        AnalysisType::Objections => &OBJECTION_QUERIES,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexingStats {
    pub segments: usize,
    pub chunks: usize,
    pub total_tokens: usize,
    pub topics_extracted: usize,
    pub embedding_model: String,
    pub backend: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexingResult {
    pub meeting_id: String,
    pub chunk_count: usize,
    pub embedding_count: usize,
    pub stats: IndexingStats,
}

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub limit: Option<usize>,
    pub min_similarity: Option<f64>,
    pub filter: SearchFilter,
    pub use_cache: bool,
    /// Cache namespace; defaults to "search".
    pub analysis_type: Option<String>,
}

impl SearchOptions {
    pub fn cached(analysis_type: &str) -> Self {
        Self {
            use_cache: true,
            analysis_type: Some(analysis_type.to_string()),
            ..Self::default()
        }
    }
}

/// Stable cache key for a query and the options that shape its results.
pub fn query_hash(query: &str, limit: usize, min_similarity: f64, filter: &SearchFilter) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query.trim().to_lowercase().as_bytes());
    hasher.update(limit.to_le_bytes());
    hasher.update(min_similarity.to_le_bytes());
    if let Ok(filter_json) = serde_json::to_vec(filter) {
        hasher.update(&filter_json);
    }
    hex::encode(hasher.finalize())
}

/// Indexing and retrieval for meeting transcripts.
pub struct RagService {
    embeddings: EmbeddingService,
    engine: Option<Arc<MultiModelEngine>>,
    chunker: Chunker,
    topic_limiter: RateLimiter,
    config: RagConfig,
    cache_ttl: Duration,
    meeting_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RagService {
    pub fn new(
        embeddings: EmbeddingService,
        engine: Option<Arc<MultiModelEngine>>,
        chunker: Chunker,
        config: RagConfig,
        cache_ttl: Duration,
    ) -> Self {
        let topic_limiter = RateLimiter::new(config.topic_requests_per_second, 1);
        Self {
            embeddings,
            engine,
            chunker,
            topic_limiter,
            config,
            cache_ttl,
            meeting_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        self.embeddings.store()
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    async fn meeting_lock(&self, meeting_id: &str) -> Arc<Mutex<()>> {
        self.meeting_locks
            .lock()
            .await
            .entry(meeting_id.to_string())
            .or_default()
            .clone()
    }

    /// Forget the lock once no other indexing run holds or awaits it.
    async fn release_meeting_lock(&self, meeting_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.meeting_locks.lock().await;
        // One reference lives in the map, the other is `lock`.
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(meeting_id);
        }
    }

    /// Parse, chunk, tag, embed and store a transcript, replacing any previous index for
    /// the meeting. Nothing is written unless every stage succeeds.
    pub async fn index_transcript(&self, meeting_id: &str, raw_text: &str) -> Result<IndexingResult> {
        let lock = self.meeting_lock(meeting_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.index_serialized(meeting_id, raw_text).await
        };
        self.release_meeting_lock(meeting_id, lock).await;
        result
    }

    async fn index_serialized(&self, meeting_id: &str, raw_text: &str) -> Result<IndexingResult> {
        let started = Instant::now();

        let segments = parse_to_segments(raw_text);
        let mut chunks = self.chunker.chunk(&segments);
        tracing::info!(
            "Indexing meeting {}: {} segments, {} chunks",
            meeting_id,
            segments.len(),
            chunks.len()
        );

        if chunks.is_empty() {
            return Err(indexing_error(
                meeting_id,
                "chunking",
                DealscopeError::Storage("transcript produced no chunks".to_string()),
            ));
        }

        let mut topics_extracted = 0;
        match (&self.engine, self.config.extract_topics) {
            (Some(engine), true) => {
                for chunk in &mut chunks {
                    self.topic_limiter.acquire().await;
                    chunk.topics = self
                        .embeddings
                        .extract_topics(engine, chunk)
                        .await
                        .map_err(|e| indexing_error(meeting_id, "topic extraction", e))?;
                    topics_extracted += chunk.topics.len();
                }
            }
            _ => tracing::debug!("Topic extraction disabled for meeting {}", meeting_id),
        }

        let embeddings = self
            .embeddings
            .embed_batch(meeting_id, &chunks)
            .await
            .map_err(|e| indexing_error(meeting_id, "embedding", e))?;

        let stored = self
            .store()
            .replace_meeting(meeting_id, &embeddings)
            .await
            .map_err(|e| indexing_error(meeting_id, "storage", e))?;

        let stats = IndexingStats {
            segments: segments.len(),
            chunks: chunks.len(),
            total_tokens: chunks.iter().map(|c| c.token_count).sum(),
            topics_extracted,
            embedding_model: self.embeddings.model().to_string(),
            backend: self.store().backend_name().to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
        };

        tracing::info!(
            "Indexed meeting {}: {} embeddings stored in {}ms",
            meeting_id,
            stored,
            stats.duration_ms
        );

        Ok(IndexingResult {
            meeting_id: meeting_id.to_string(),
            chunk_count: chunks.len(),
            embedding_count: stored,
            stats,
        })
    }

    pub async fn search(
        &self,
        meeting_id: &str,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<EmbeddingSearchResult>> {
        let limit = options.limit.unwrap_or(self.config.search_limit);
        let min_similarity = options.min_similarity.unwrap_or(self.config.min_similarity);
        let use_cache = options.use_cache && self.config.cache_enabled;

        let key = CacheKey {
            meeting_id: meeting_id.to_string(),
            analysis_type: options
                .analysis_type
                .clone()
                .unwrap_or_else(|| "search".to_string()),
            query_hash: query_hash(query, limit, min_similarity, &options.filter),
        };

        if use_cache {
            if let Some(hit) = self.store().cache_get(&key).await? {
                tracing::debug!("Cache hit for {} query on {}", key.analysis_type, meeting_id);
                return Ok(hit);
            }
        }

        let results = self
            .embeddings
            .search_similar(query, meeting_id, limit, min_similarity, &options.filter)
            .await?;

        if use_cache {
            if let Err(e) = self.store().cache_put(&key, &results, self.cache_ttl).await {
                tracing::warn!("Failed to cache search results for {}: {}", meeting_id, e);
            }
        }

        Ok(results)
    }

    /// Union of the canned queries for one analysis type, deduplicated by chunk id and
    /// ordered by descending similarity. Falls back to the opening chunks when nothing matches.
    pub async fn search_for_analysis(
        &self,
        meeting_id: &str,
        analysis_type: AnalysisType,
    ) -> Result<Vec<EmbeddingSearchResult>> {
        let options = SearchOptions {
            limit: Some(self.config.per_query_limit),
            ..SearchOptions::cached(analysis_type.as_str())
        };

        let mut merged: Vec<EmbeddingSearchResult> = Vec::new();
        for query in canned_queries(analysis_type) {
            for result in self.search(meeting_id, query, &options).await? {
                merge_result(&mut merged, result);
            }
        }

        if merged.is_empty() {
            tracing::warn!(
                "No {} evidence matched for meeting {}, using opening chunks",
                analysis_type,
                meeting_id
            );
            merged = self.search_by_time_range(meeting_id, 0.0, f64::MAX).await?;
            merged.truncate(self.config.search_limit);
            return Ok(merged);
        }

        sort_by_similarity(&mut merged);
        Ok(merged)
    }

    pub async fn search_for_script(&self, meeting_id: &str) -> Result<Vec<EmbeddingSearchResult>> {
        self.search_for_analysis(meeting_id, AnalysisType::Script).await
    }

    pub async fn search_for_icp(&self, meeting_id: &str) -> Result<Vec<EmbeddingSearchResult>> {
        self.search_for_analysis(meeting_id, AnalysisType::Icp).await
    }

    pub async fn search_for_objections(
        &self,
        meeting_id: &str,
    ) -> Result<Vec<EmbeddingSearchResult>> {
        self.search_for_analysis(meeting_id, AnalysisType::Objections)
            .await
    }

    pub async fn search_by_time_range(
        &self,
        meeting_id: &str,
        start_secs: f64,
        end_secs: f64,
    ) -> Result<Vec<EmbeddingSearchResult>> {
        self.store()
            .get_by_time_range(meeting_id, start_secs, end_secs)
            .await
    }

    /// Term matching over chunk text, for queries the embedding misses.
    pub async fn search_keywords(
        &self,
        meeting_id: &str,
        query: &str,
        limit: Option<usize>,
    ) -> Result<Vec<EmbeddingSearchResult>> {
        let limit = limit.unwrap_or(self.config.search_limit);
        self.store().keyword_search(meeting_id, query, limit).await
    }

    pub async fn search_by_speaker(
        &self,
        meeting_id: &str,
        speaker: &str,
    ) -> Result<Vec<EmbeddingSearchResult>> {
        self.store().get_by_speaker(meeting_id, speaker).await
    }

    pub async fn search_by_topics(
        &self,
        meeting_id: &str,
        topics: &[String],
    ) -> Result<Vec<EmbeddingSearchResult>> {
        self.store().get_by_topics(meeting_id, topics).await
    }

    /// Live search for chat; never served from cache.
    pub async fn search_for_chat(
        &self,
        meeting_id: &str,
        question: &str,
        limit: usize,
        min_similarity: f64,
    ) -> Result<Vec<EmbeddingSearchResult>> {
        self.search(
            meeting_id,
            question,
            &SearchOptions {
                limit: Some(limit),
                min_similarity: Some(min_similarity),
                use_cache: false,
                ..SearchOptions::default()
            },
        )
        .await
    }

    pub async fn has_index(&self, meeting_id: &str) -> Result<bool> {
        Ok(self.store().count_for_meeting(meeting_id).await? > 0)
    }

    pub async fn delete_meeting(&self, meeting_id: &str) -> Result<usize> {
        self.store().delete_for_meeting(meeting_id).await
    }

    pub async fn storage_stats(&self, meeting_id: Option<&str>) -> Result<StorageStats> {
        self.store().storage_stats(meeting_id).await
    }
}

fn indexing_error(meeting_id: &str, stage: &'static str, err: DealscopeError) -> DealscopeError {
    tracing::error!("Indexing {} failed at {}: {}", meeting_id, stage, err);
    DealscopeError::Indexing {
        meeting_id: meeting_id.to_string(),
        stage,
        message: err.to_string(),
    }
}

/// Keep one entry per chunk id, with the best similarity seen.
pub fn merge_result(merged: &mut Vec<EmbeddingSearchResult>, result: EmbeddingSearchResult) {
    match merged.iter_mut().find(|r| r.chunk_id == result.chunk_id) {
        Some(existing) if existing.similarity < result.similarity => *existing = result,
        Some(_) => {}
        None => merged.push(result),
    }
}

pub fn sort_by_similarity(results: &mut [EmbeddingSearchResult]) {
    results.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::llm::testing::ScriptedBackend;
    use crate::llm::EngineOptions;
    use crate::rag::embedding::testing::FlakyEmbedder;
    use crate::rag::embedding::HashingEmbedder;
    use crate::rag::store::{InMemoryVectorStore, SqliteVectorStore};

    #[tokio::test]
    async fn test_index_transcript_stores_every_chunk() {
        let store: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::open_in_memory().unwrap());
        let rag = hashing_rag(store.clone());

        let result = rag.index_transcript("m1", SALES_CALL).await.unwrap();
        assert!(result.chunk_count > 1);
        assert_eq!(result.embedding_count, result.chunk_count);
        assert_eq!(result.stats.segments, 10);
        assert_eq!(store.count_for_meeting("m1").await.unwrap(), result.chunk_count);
    }

    #[tokio::test]
    async fn test_reindexing_does_not_accumulate_rows() {
        let store: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::open_in_memory().unwrap());
        let rag = hashing_rag(store.clone());

        let first = rag.index_transcript("m1", SALES_CALL).await.unwrap();
        let second = rag.index_transcript("m1", SALES_CALL).await.unwrap();

        assert_eq!(first.chunk_count, second.chunk_count);
        assert_eq!(store.count_for_meeting("m1").await.unwrap(), second.chunk_count);
    }

    #[tokio::test]
    async fn test_failed_embedding_leaves_previous_index_intact() {
        let store: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::open_in_memory().unwrap());
        hashing_rag(store.clone())
            .index_transcript("m1", SALES_CALL)
            .await
            .unwrap();
        let before = store.count_for_meeting("m1").await.unwrap();

        let flaky = rag_service(store.clone(), Arc::new(FlakyEmbedder::new(1)), None, rag_config());
        let err = flaky.index_transcript("m1", SALES_CALL).await.unwrap_err();

        assert!(matches!(err, DealscopeError::Indexing { stage: "embedding", .. }));
        assert_eq!(store.count_for_meeting("m1").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_empty_transcript_keeps_previous_index() {
        let store: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::open_in_memory().unwrap());
        let rag = hashing_rag(store.clone());
        rag.index_transcript("m1", SALES_CALL).await.unwrap();
        let before = store.count_for_meeting("m1").await.unwrap();

        let err = rag.index_transcript("m1", "   \n ").await.unwrap_err();

        assert!(matches!(err, DealscopeError::Indexing { stage: "chunking", .. }));
        assert_eq!(store.count_for_meeting("m1").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_reindexing_memory_store_drops_cached_evidence() {
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let rag = hashing_rag(store);
        rag.index_transcript("m1", SALES_CALL).await.unwrap();
        let first = rag.search_for_objections("m1").await.unwrap();
        assert!(first.iter().any(|r| r.content.contains("Marina")));

        let replacement = "\
00:00:05 - Ana (Vendedora): Olá Pedro, vamos revisar o contrato e o preço combinado.
00:00:40 - Pedro: Achei o valor caro, mas o orçamento já foi aprovado pelo diretor.
";
        rag.index_transcript("m1", replacement).await.unwrap();
        let second = rag.search_for_objections("m1").await.unwrap();

        assert!(!second.is_empty());
        assert!(second.iter().all(|r| !r.content.contains("Marina")));
    }

    #[tokio::test]
    async fn test_search_by_speaker_returns_exact_matches() {
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let rag = hashing_rag(store);
        rag.index_transcript("m1", SALES_CALL).await.unwrap();

        let results = rag.search_by_speaker("m1", "Marina").await.unwrap();
        assert!(!results.is_empty());
        assert!(results
            .iter()
            .all(|r| r.speakers.iter().any(|s| s == "Marina") && r.similarity == 1.0));
        assert!(rag.search_by_speaker("m1", "Ninguém").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_meeting_locks_are_released_after_indexing() {
        let store: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::open_in_memory().unwrap());
        let rag = hashing_rag(store);

        let (first, second) = tokio::join!(
            rag.index_transcript("m1", SALES_CALL),
            rag.index_transcript("m2", SALES_CALL)
        );
        first.unwrap();
        second.unwrap();
        assert!(rag.index_transcript("m3", "").await.is_err());

        assert!(rag.meeting_locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_keyword_search_finds_literal_terms() {
        let store: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::open_in_memory().unwrap());
        let rag = hashing_rag(store);
        rag.index_transcript("m1", SALES_CALL).await.unwrap();

        let results = rag.search_keywords("m1", "diretor financeiro", Some(3)).await.unwrap();
        assert!(!results.is_empty());
        assert!(results.len() <= 3);
        assert!(results[0].content.contains("diretor financeiro"));
        assert!(rag.search_keywords("m2", "diretor", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_topics_are_attached_before_storage() {
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let quick = Arc::new(ScriptedBackend::fixed("quick", "[\"Atendimento\", \"preço\"]"));
        let general = Arc::new(ScriptedBackend::fixed("general", "{}"));
        let engine = Arc::new(MultiModelEngine::new(
            general,
            None,
            quick.clone(),
            EngineOptions::default(),
        ));
        let config = RagConfig {
            extract_topics: true,
            ..rag_config()
        };
        let rag = rag_service(store, Arc::new(HashingEmbedder::new(64)), Some(engine), config);

        let result = rag.index_transcript("m1", SALES_CALL).await.unwrap();
        assert_eq!(quick.calls(), result.chunk_count);

        let tagged = rag
            .search_by_topics("m1", &["atendimento".to_string()])
            .await
            .unwrap();
        assert_eq!(tagged.len(), result.chunk_count);
    }

    #[tokio::test]
    async fn test_specialized_search_dedups_by_chunk() {
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let rag = hashing_rag(store);
        rag.index_transcript("m1", SALES_CALL).await.unwrap();

        let results = rag.search_for_objections("m1").await.unwrap();
        assert!(!results.is_empty());

        let mut ids: Vec<&str> = results.iter().map(|r| r.chunk_id.as_str()).collect();
        let total = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), total);
        assert!(results.iter().any(|r| r.content.contains("está caro")));
    }

    #[tokio::test]
    async fn test_cached_search_is_served_from_store_cache() {
        let store: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::open_in_memory().unwrap());
        let rag = hashing_rag(store.clone());
        rag.index_transcript("m1", SALES_CALL).await.unwrap();

        let options = SearchOptions::cached("script");
        let first = rag.search("m1", "orçamento", &options).await.unwrap();
        assert_eq!(store.storage_stats(Some("m1")).await.unwrap().cache_entries, 1);

        let second = rag.search("m1", "orçamento", &options).await.unwrap();
        assert_eq!(first, second);

        rag.search_for_chat("m1", "orçamento", 5, 0.0).await.unwrap();
        assert_eq!(store.storage_stats(Some("m1")).await.unwrap().cache_entries, 1);
    }

    #[tokio::test]
    async fn test_concurrent_indexing_of_same_meeting_is_serialised() {
        let store: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::open_in_memory().unwrap());
        let rag = Arc::new(hashing_rag(store.clone()));

        let a = {
            let rag = rag.clone();
            tokio::spawn(async move { rag.index_transcript("m1", SALES_CALL).await })
        };
        let b = {
            let rag = rag.clone();
            tokio::spawn(async move { rag.index_transcript("m1", SALES_CALL).await })
        };

        let a = a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();
        assert_eq!(store.count_for_meeting("m1").await.unwrap(), a.chunk_count);
    }

    #[test]
    fn test_query_hash_depends_on_options() {
        let filter = SearchFilter::default();
        let a = query_hash("preço", 5, 0.3, &filter);
        assert_eq!(a, query_hash("  Preço ", 5, 0.3, &filter));
        assert_ne!(a, query_hash("preço", 6, 0.3, &filter));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_merge_keeps_best_similarity() {
        let make = |id: &str, s: f64| EmbeddingSearchResult {
            chunk_id: id.to_string(),
            content: String::new(),
            similarity: s,
            start_secs: 0.0,
            end_secs: 1.0,
            speakers: Vec::new(),
            dominant_speaker: None,
            topics: Vec::new(),
        };
        let mut merged = Vec::new();
        merge_result(&mut merged, make("a", 0.4));
        merge_result(&mut merged, make("b", 0.6));
        merge_result(&mut merged, make("a", 0.9));
        sort_by_similarity(&mut merged);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].chunk_id, "a");
        assert_eq!(merged[0].similarity, 0.9);
    }
}
