use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::analysis::validator::extract_json;
use crate::config::settings::EmbeddingConfig;
use crate::error::{DealscopeError, Result};
use crate::llm::MultiModelEngine;
use crate::rag::chunking::TranscriptChunk;
use crate::rag::limiter::RateLimiter;
use crate::rag::store::{
    ChunkEmbedding, EmbeddingSearchResult, SearchFilter, SimilarityQuery, VectorStore,
};

pub const MAX_TOPICS_PER_CHUNK: usize = 5;

#[async_trait]
pub trait Embedder: Send + Sync {
    fn model(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts in one round trip where the provider supports it.
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_many(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| DealscopeError::EmbeddingFailed("empty embedding response".to_string()))
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| DealscopeError::EmbeddingFailed(format!("request to {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DealscopeError::EmbeddingFailed(format!(
                "API error {}: {}",
                status, body
            )));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| DealscopeError::EmbeddingFailed(format!("bad response: {}", e)))?;
        parsed.data.sort_by_key(|d| d.index);

        if parsed.data.len() != texts.len() {
            return Err(DealscopeError::EmbeddingFailed(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Deterministic local embedder: signed feature hashing of lowercased terms, L2-normalised.
/// Good enough for development and tests, no network required.
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(8),
        }
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model(&self) -> &str {
        "hashing"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimensions];

        for term in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(term.to_lowercase().as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimensions as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}

pub fn embedder_from_config(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.to_lowercase().as_str() {
        "hashing" | "local" => Ok(Arc::new(HashingEmbedder::new(config.hashing_dimensions))),
        "openai" => {
            let api_key = config
                .api_key
                .as_deref()
                .filter(|k| !k.is_empty())
                .ok_or_else(|| {
                    DealscopeError::Config("Embedding API key not configured".to_string())
                })?;
            let base_url = config
                .base_url
                .as_deref()
                .unwrap_or("https://api.openai.com/v1");
            Ok(Arc::new(OpenAiEmbedder::new(base_url, api_key, &config.model)))
        }
        other => Err(DealscopeError::InvalidConfig(format!(
            "Unknown embedding provider: {}",
            other
        ))),
    }
}

/// Parse a topic list out of model output. Accepts a JSON array, an object with a
/// `topics` array, or a comma/newline separated list.
pub fn parse_topics(raw: &str) -> Vec<String> {
    let candidates: Vec<String> = match extract_json(raw, "topics") {
        Ok(serde_json::Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Ok(serde_json::Value::Object(map)) => map
            .get("topics")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default(),
        _ => raw
            .split([',', '\n'])
            .map(|t| t.trim_matches(|c: char| c.is_whitespace() || c == '-' || c == '"'))
            .map(str::to_string)
            .collect(),
    };

    let mut topics: Vec<String> = Vec::new();
    for topic in candidates {
        let topic = topic.trim().to_lowercase();
        if topic.is_empty() || topic.chars().count() > 40 || topics.contains(&topic) {
            continue;
        }
        topics.push(topic);
        if topics.len() == MAX_TOPICS_PER_CHUNK {
            break;
        }
    }
    topics
}

/// Embedding generation and similarity search against one vector store.
pub struct EmbeddingService {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    limiter: Arc<RateLimiter>,
    batch_size: usize,
}

impl EmbeddingService {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        limiter: Arc<RateLimiter>,
        batch_size: usize,
    ) -> Self {
        Self {
            embedder,
            store,
            limiter,
            batch_size: batch_size.max(1),
        }
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub fn model(&self) -> &str {
        self.embedder.model()
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.limiter.acquire().await;
        self.embedder.embed(text).await.map_err(as_embedding_failure)
    }

    /// Embed every chunk in fixed-size batches. The first failing batch aborts the whole run.
    pub async fn embed_batch(
        &self,
        meeting_id: &str,
        chunks: &[TranscriptChunk],
    ) -> Result<Vec<ChunkEmbedding>> {
        let mut embeddings = Vec::with_capacity(chunks.len());

        for (batch_index, batch) in chunks.chunks(self.batch_size).enumerate() {
            self.limiter.acquire().await;

            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let vectors = self
                .embedder
                .embed_many(&texts)
                .await
                .map_err(as_embedding_failure)?;

            if vectors.len() != batch.len() {
                return Err(DealscopeError::EmbeddingFailed(format!(
                    "batch {} returned {} vectors for {} chunks",
                    batch_index,
                    vectors.len(),
                    batch.len()
                )));
            }

            tracing::debug!(
                "Embedded batch {} ({} chunks) for meeting {}",
                batch_index,
                batch.len(),
                meeting_id
            );

            embeddings.extend(
                batch
                    .iter()
                    .zip(vectors)
                    .map(|(chunk, vector)| ChunkEmbedding::from_chunk(meeting_id, chunk, vector)),
            );
        }

        Ok(embeddings)
    }

    /// Chunks of one meeting at or above `min_similarity`, best first. Under the keyword
    /// fallback store no query embedding is computed.
    pub async fn search_similar(
        &self,
        query: &str,
        meeting_id: &str,
        limit: usize,
        min_similarity: f64,
        filter: &SearchFilter,
    ) -> Result<Vec<EmbeddingSearchResult>> {
        let vector = if self.store.supports_similarity() {
            self.embed(query).await?
        } else {
            Vec::new()
        };

        self.store
            .search_similar(
                meeting_id,
                &SimilarityQuery {
                    text: query,
                    vector: &vector,
                    limit,
                    min_similarity,
                    filter,
                },
            )
            .await
    }

    /// One quick-model call per chunk; malformed replies yield no topics.
    pub async fn extract_topics(
        &self,
        engine: &MultiModelEngine,
        chunk: &TranscriptChunk,
    ) -> Result<Vec<String>> {
        let completion = engine.extract_topics_raw(&chunk.content).await?;
        Ok(parse_topics(&completion.content))
    }
}

fn as_embedding_failure(err: DealscopeError) -> DealscopeError {
    match err {
        DealscopeError::EmbeddingFailed(_) => err,
        other => DealscopeError::EmbeddingFailed(other.to_string()),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Wraps the hashing embedder and fails once `fail_after` texts have been embedded.
    pub struct FlakyEmbedder {
        inner: HashingEmbedder,
        fail_after: usize,
        embedded: AtomicUsize,
    }

    impl FlakyEmbedder {
        pub fn new(fail_after: usize) -> Self {
            Self {
                inner: HashingEmbedder::new(64),
                fail_after,
                embedded: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Embedder for FlakyEmbedder {
        fn model(&self) -> &str {
            "flaky"
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if self.embedded.fetch_add(1, Ordering::SeqCst) >= self.fail_after {
                return Err(DealscopeError::Api("embedding backend down".to_string()));
            }
            self.inner.embed(text).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FlakyEmbedder;
    use super::*;
    use crate::config::settings::ChunkingConfig;
    use crate::rag::chunking::Chunker;
    use crate::rag::store::{cosine_similarity, InMemoryVectorStore, SqliteVectorStore};
    use crate::transcript::TranscriptSegment;

    fn chunks(count: usize) -> Vec<TranscriptChunk> {
        let segments: Vec<TranscriptSegment> = (0..count * 4)
            .map(|i| {
                TranscriptSegment::new(
                    if i % 2 == 0 { "Vendedor" } else { "Cliente" },
                    &format!("frase número {} sobre preço e prazo de entrega", i),
                    i as f64 * 10.0,
                    i as f64 * 10.0 + 10.0,
                )
            })
            .collect();
        Chunker::new(ChunkingConfig {
            target_tokens: 60,
            overlap_tokens: 15,
            min_tokens: 10,
        })
        .chunk(&segments)
    }

    fn service(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> EmbeddingService {
        EmbeddingService::new(embedder, store, Arc::new(RateLimiter::unlimited()), 2)
    }

    #[tokio::test]
    async fn test_hashing_embedder_is_deterministic_and_normalised() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed("Está caro demais").await.unwrap();
        let b = embedder.embed("está CARO demais").await.unwrap();
        assert_eq!(a, b);

        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);

        let c = embedder.embed("agenda da próxima semana").await.unwrap();
        assert!(cosine_similarity(&a, &b).unwrap() > cosine_similarity(&a, &c).unwrap());
    }

    #[tokio::test]
    async fn test_embed_batch_covers_every_chunk() {
        let chunks = chunks(5);
        let service = service(
            Arc::new(HashingEmbedder::new(64)),
            Arc::new(InMemoryVectorStore::new()),
        );

        let embeddings = service.embed_batch("m1", &chunks).await.unwrap();
        assert_eq!(embeddings.len(), chunks.len());
        assert!(embeddings.iter().all(|e| e.meeting_id == "m1"));
        assert_eq!(embeddings[0].chunk_id, chunks[0].id);
    }

    #[tokio::test]
    async fn test_embed_batch_aborts_on_first_error() {
        let chunks = chunks(5);
        assert!(chunks.len() > 3);
        let service = service(
            Arc::new(FlakyEmbedder::new(3)),
            Arc::new(InMemoryVectorStore::new()),
        );

        let err = service.embed_batch("m1", &chunks).await.unwrap_err();
        assert!(matches!(err, DealscopeError::EmbeddingFailed(_)));
    }

    #[tokio::test]
    async fn test_search_similar_with_real_store() {
        let store: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::open_in_memory().unwrap());
        let service = service(Arc::new(HashingEmbedder::new(128)), store.clone());

        let chunks = chunks(3);
        let embeddings = service.embed_batch("m1", &chunks).await.unwrap();
        store.replace_meeting("m1", &embeddings).await.unwrap();

        let results = service
            .search_similar("preço e prazo de entrega", "m1", 3, 0.1, &SearchFilter::default())
            .await
            .unwrap();
        assert!(!results.is_empty());
        assert!(results.windows(2).all(|w| w[0].similarity >= w[1].similarity));

        let none = service
            .search_similar("preço", "other-meeting", 3, 0.0, &SearchFilter::default())
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_parse_topics_variants() {
        assert_eq!(
            parse_topics("```json\n[\"Preço\", \"integração\", \"preço\"]\n```"),
            vec!["preço".to_string(), "integração".to_string()]
        );
        assert_eq!(
            parse_topics("{\"topics\": [\"prazo\"]}"),
            vec!["prazo".to_string()]
        );
        assert_eq!(
            parse_topics("preco, sobrecarga\n- equipe"),
            vec![
                "preco".to_string(),
                "sobrecarga".to_string(),
                "equipe".to_string()
            ]
        );
        let many = parse_topics("[\"a\",\"b\",\"c\",\"d\",\"e\",\"f\"]");
        assert_eq!(many.len(), MAX_TOPICS_PER_CHUNK);
    }
}
