use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use super::{
    keyword_score, query_terms, CacheKey, ChunkEmbedding, EmbeddingSearchResult, SimilarityQuery,
    StorageStats, VectorStore, EXACT_MATCH_SCORE,
};
use crate::error::Result;

/// Score given to every keyword hit. Carries no ranking meaning.
pub const KEYWORD_MATCH_SCORE: f64 = 0.5;

struct CachedResults {
    results: Vec<EmbeddingSearchResult>,
    expires_at: Instant,
}

/// Development fallback that keeps everything in process memory.
///
/// Each instance owns its own state; nothing is shared between instances.
#[derive(Default)]
pub struct InMemoryVectorStore {
    meetings: RwLock<HashMap<String, Vec<ChunkEmbedding>>>,
    cache: Mutex<HashMap<CacheKey, CachedResults>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn collect<F>(&self, meeting_id: &str, predicate: F) -> Vec<EmbeddingSearchResult>
    where
        F: Fn(&ChunkEmbedding) -> bool,
    {
        let meetings = self.meetings.read().await;
        meetings
            .get(meeting_id)
            .map(|rows| {
                rows.iter()
                    .filter(|row| predicate(row))
                    .map(|row| row.to_search_result(EXACT_MATCH_SCORE))
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn keyword_ranked(
        &self,
        meeting_id: &str,
        query: &str,
        limit: usize,
        filter: Option<&super::SearchFilter>,
    ) -> Vec<(f64, EmbeddingSearchResult)> {
        let terms = query_terms(query);
        let meetings = self.meetings.read().await;
        let Some(rows) = meetings.get(meeting_id) else {
            return Vec::new();
        };

        let mut hits: Vec<(f64, usize, &ChunkEmbedding)> = rows
            .iter()
            .enumerate()
            .filter(|(_, row)| filter.map_or(true, |f| f.matches(row)))
            .map(|(i, row)| (keyword_score(&row.content, query, &terms), i, row))
            .filter(|(score, _, _)| *score > 0.0)
            .collect();

        hits.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });
        hits.truncate(limit);

        hits.into_iter()
            .map(|(score, _, row)| (score, row.to_search_result(score)))
            .collect()
    }
}

fn sorted_by_chunk(mut rows: Vec<ChunkEmbedding>) -> Vec<ChunkEmbedding> {
    rows.sort_by(|a, b| a.chunk_id.cmp(&b.chunk_id));
    rows
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn supports_similarity(&self) -> bool {
        false
    }

    async fn upsert_embeddings(&self, embeddings: &[ChunkEmbedding]) -> Result<usize> {
        let mut meetings = self.meetings.write().await;
        for embedding in embeddings {
            let rows = meetings.entry(embedding.meeting_id.clone()).or_default();
            match rows.iter_mut().find(|row| row.chunk_id == embedding.chunk_id) {
                Some(existing) => *existing = embedding.clone(),
                None => rows.push(embedding.clone()),
            }
        }
        for rows in meetings.values_mut() {
            let taken = std::mem::take(rows);
            *rows = sorted_by_chunk(taken);
        }
        Ok(embeddings.len())
    }

    async fn replace_meeting(
        &self,
        meeting_id: &str,
        embeddings: &[ChunkEmbedding],
    ) -> Result<usize> {
        let rows = sorted_by_chunk(embeddings.to_vec());
        let mut meetings = self.meetings.write().await;
        let mut cache = self.cache.lock().await;
        if rows.is_empty() {
            meetings.remove(meeting_id);
        } else {
            meetings.insert(meeting_id.to_string(), rows);
        }
        cache.retain(|key, _| key.meeting_id != meeting_id);
        Ok(embeddings.len())
    }

    /// Keyword fallback: `min_similarity` is ignored and every hit is reported with
    /// [`KEYWORD_MATCH_SCORE`].
    async fn search_similar(
        &self,
        meeting_id: &str,
        query: &SimilarityQuery<'_>,
    ) -> Result<Vec<EmbeddingSearchResult>> {
        let hits = self
            .keyword_ranked(meeting_id, query.text, query.limit, Some(query.filter))
            .await;

        Ok(hits
            .into_iter()
            .map(|(_, mut result)| {
                result.similarity = KEYWORD_MATCH_SCORE;
                result
            })
            .collect())
    }

    async fn keyword_search(
        &self,
        meeting_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<EmbeddingSearchResult>> {
        Ok(self
            .keyword_ranked(meeting_id, query, limit, None)
            .await
            .into_iter()
            .map(|(_, result)| result)
            .collect())
    }

    async fn get_by_time_range(
        &self,
        meeting_id: &str,
        start_secs: f64,
        end_secs: f64,
    ) -> Result<Vec<EmbeddingSearchResult>> {
        Ok(self
            .collect(meeting_id, |row| {
                row.end_secs >= start_secs && row.start_secs <= end_secs
            })
            .await)
    }

    async fn get_by_speaker(
        &self,
        meeting_id: &str,
        speaker: &str,
    ) -> Result<Vec<EmbeddingSearchResult>> {
        Ok(self
            .collect(meeting_id, |row| {
                row.speakers.iter().any(|s| s.eq_ignore_ascii_case(speaker))
            })
            .await)
    }

    async fn get_by_topics(
        &self,
        meeting_id: &str,
        topics: &[String],
    ) -> Result<Vec<EmbeddingSearchResult>> {
        Ok(self
            .collect(meeting_id, |row| {
                row.topics
                    .iter()
                    .any(|t| topics.iter().any(|wanted| wanted.eq_ignore_ascii_case(t)))
            })
            .await)
    }

    async fn delete_for_meeting(&self, meeting_id: &str) -> Result<usize> {
        let removed = self
            .meetings
            .write()
            .await
            .remove(meeting_id)
            .map(|rows| rows.len())
            .unwrap_or(0);

        self.cache
            .lock()
            .await
            .retain(|key, _| key.meeting_id != meeting_id);

        Ok(removed)
    }

    async fn count_for_meeting(&self, meeting_id: &str) -> Result<usize> {
        Ok(self
            .meetings
            .read()
            .await
            .get(meeting_id)
            .map(Vec::len)
            .unwrap_or(0))
    }

    async fn cache_get(&self, key: &CacheKey) -> Result<Option<Vec<EmbeddingSearchResult>>> {
        let mut cache = self.cache.lock().await;
        match cache.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.results.clone())),
            Some(_) => {
                cache.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn cache_put(
        &self,
        key: &CacheKey,
        results: &[EmbeddingSearchResult],
        ttl: Duration,
    ) -> Result<()> {
        self.cache.lock().await.insert(
            key.clone(),
            CachedResults {
                results: results.to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn storage_stats(&self, meeting_id: Option<&str>) -> Result<StorageStats> {
        let meetings = self.meetings.read().await;
        let cache = self.cache.lock().await;

        let selected: Vec<&Vec<ChunkEmbedding>> = match meeting_id {
            Some(id) => meetings.get(id).into_iter().collect(),
            None => meetings.values().collect(),
        };

        Ok(StorageStats {
            backend: self.backend_name().to_string(),
            meetings: selected.len(),
            embeddings: selected.iter().map(|rows| rows.len()).sum(),
            total_tokens: selected
                .iter()
                .flat_map(|rows| rows.iter())
                .map(|row| row.token_count)
                .sum(),
            cache_entries: cache
                .keys()
                .filter(|key| meeting_id.map_or(true, |id| key.meeting_id == id))
                .count(),
        })
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}
