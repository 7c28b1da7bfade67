use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{
    cosine_similarity, keyword_score, query_terms, rank_by_similarity, CacheKey, ChunkEmbedding,
    EmbeddingSearchResult, SimilarityQuery, StorageStats, VectorStore, EXACT_MATCH_SCORE,
};
use crate::error::{DealscopeError, Result};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS chunk_embeddings (
        meeting_id TEXT NOT NULL,
        chunk_id TEXT NOT NULL,
        content TEXT NOT NULL,
        embedding BLOB NOT NULL,
        dimensions INTEGER NOT NULL,
        token_count INTEGER NOT NULL,
        start_secs REAL NOT NULL,
        end_secs REAL NOT NULL,
        speakers TEXT NOT NULL,
        dominant_speaker TEXT,
        topics TEXT NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (meeting_id, chunk_id)
    );

    CREATE INDEX IF NOT EXISTS idx_chunk_embeddings_meeting ON chunk_embeddings(meeting_id);

    CREATE TABLE IF NOT EXISTS search_cache (
        meeting_id TEXT NOT NULL,
        analysis_type TEXT NOT NULL,
        query_hash TEXT NOT NULL,
        results TEXT NOT NULL,
        expires_at INTEGER NOT NULL,
        PRIMARY KEY (meeting_id, analysis_type, query_hash)
    );
";

const SELECT_COLUMNS: &str = "meeting_id, chunk_id, content, embedding, token_count, start_secs,
     end_secs, speakers, dominant_speaker, topics, created_at";

/// Persistent vector store on SQLite. Vectors are stored as little-endian f32 blobs and
/// scored with cosine similarity at query time.
pub struct SqliteVectorStore {
    conn: Mutex<Connection>,
}

impl SqliteVectorStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| DealscopeError::VectorStore("connection lock poisoned".to_string()))
    }

    fn load_where(
        &self,
        clause: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<ChunkEmbedding>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM chunk_embeddings WHERE {} ORDER BY chunk_id",
            SELECT_COLUMNS, clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(args, row_to_embedding)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn load_meeting(&self, meeting_id: &str) -> Result<Vec<ChunkEmbedding>> {
        self.load_where("meeting_id = ?1", &[&meeting_id])
    }
}

pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn decode_vector(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(DealscopeError::VectorStore(format!(
            "embedding blob length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

fn row_to_embedding(row: &Row<'_>) -> rusqlite::Result<ChunkEmbedding> {
    let blob: Vec<u8> = row.get(3)?;
    let embedding = decode_vector(&blob).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Blob, Box::new(e))
    })?;

    let speakers: String = row.get(7)?;
    let topics: String = row.get(9)?;
    let created_at: String = row.get(10)?;

    Ok(ChunkEmbedding {
        meeting_id: row.get(0)?,
        chunk_id: row.get(1)?,
        content: row.get(2)?,
        embedding,
        token_count: row.get::<_, i64>(4)? as usize,
        start_secs: row.get(5)?,
        end_secs: row.get(6)?,
        speakers: serde_json::from_str(&speakers).unwrap_or_default(),
        dominant_speaker: row.get(8)?,
        topics: serde_json::from_str(&topics).unwrap_or_default(),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

fn insert_row(conn: &Connection, embedding: &ChunkEmbedding) -> Result<()> {
    conn.execute(
        "INSERT INTO chunk_embeddings (meeting_id, chunk_id, content, embedding, dimensions,
            token_count, start_secs, end_secs, speakers, dominant_speaker, topics, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
         ON CONFLICT(meeting_id, chunk_id) DO UPDATE SET
            content = excluded.content,
            embedding = excluded.embedding,
            dimensions = excluded.dimensions,
            token_count = excluded.token_count,
            start_secs = excluded.start_secs,
            end_secs = excluded.end_secs,
            speakers = excluded.speakers,
            dominant_speaker = excluded.dominant_speaker,
            topics = excluded.topics,
            created_at = excluded.created_at",
        params![
            embedding.meeting_id,
            embedding.chunk_id,
            embedding.content,
            encode_vector(&embedding.embedding),
            embedding.embedding.len() as i64,
            embedding.token_count as i64,
            embedding.start_secs,
            embedding.end_secs,
            serde_json::to_string(&embedding.speakers)?,
            embedding.dominant_speaker,
            serde_json::to_string(&embedding.topics)?,
            embedding.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    fn supports_similarity(&self) -> bool {
        true
    }

    async fn upsert_embeddings(&self, embeddings: &[ChunkEmbedding]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for embedding in embeddings {
            insert_row(&tx, embedding)?;
        }
        tx.commit()?;
        Ok(embeddings.len())
    }

    async fn replace_meeting(
        &self,
        meeting_id: &str,
        embeddings: &[ChunkEmbedding],
    ) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let removed = tx.execute(
            "DELETE FROM chunk_embeddings WHERE meeting_id = ?1",
            [meeting_id],
        )?;
        tx.execute(
            "DELETE FROM search_cache WHERE meeting_id = ?1",
            [meeting_id],
        )?;
        for embedding in embeddings {
            if embedding.meeting_id != meeting_id {
                return Err(DealscopeError::VectorStore(format!(
                    "chunk {} belongs to meeting {}, not {}",
                    embedding.chunk_id, embedding.meeting_id, meeting_id
                )));
            }
            insert_row(&tx, embedding)?;
        }
        tx.commit()?;

        tracing::debug!(
            "Replaced {} embeddings with {} for meeting {}",
            removed,
            embeddings.len(),
            meeting_id
        );
        Ok(embeddings.len())
    }

    async fn search_similar(
        &self,
        meeting_id: &str,
        query: &SimilarityQuery<'_>,
    ) -> Result<Vec<EmbeddingSearchResult>> {
        let rows = self.load_meeting(meeting_id)?;

        let candidates: Vec<(f64, &ChunkEmbedding)> = rows
            .iter()
            .filter(|row| query.filter.matches(row))
            .filter_map(|row| cosine_similarity(query.vector, &row.embedding).map(|s| (s, row)))
            .collect();

        Ok(rank_by_similarity(
            candidates,
            query.min_similarity,
            query.limit,
        ))
    }

    async fn keyword_search(
        &self,
        meeting_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<EmbeddingSearchResult>> {
        let rows = self.load_meeting(meeting_id)?;
        let terms = query_terms(query);

        let candidates: Vec<(f64, &ChunkEmbedding)> = rows
            .iter()
            .map(|row| (keyword_score(&row.content, query, &terms), row))
            .filter(|(score, _)| *score > 0.0)
            .collect();

        Ok(rank_by_similarity(candidates, f64::MIN_POSITIVE, limit))
    }

    async fn get_by_time_range(
        &self,
        meeting_id: &str,
        start_secs: f64,
        end_secs: f64,
    ) -> Result<Vec<EmbeddingSearchResult>> {
        let rows = self.load_where(
            "meeting_id = ?1 AND end_secs >= ?2 AND start_secs <= ?3",
            &[&meeting_id, &start_secs, &end_secs],
        )?;
        Ok(rows
            .iter()
            .map(|row| row.to_search_result(EXACT_MATCH_SCORE))
            .collect())
    }

    async fn get_by_speaker(
        &self,
        meeting_id: &str,
        speaker: &str,
    ) -> Result<Vec<EmbeddingSearchResult>> {
        Ok(self
            .load_meeting(meeting_id)?
            .iter()
            .filter(|row| row.speakers.iter().any(|s| s.eq_ignore_ascii_case(speaker)))
            .map(|row| row.to_search_result(EXACT_MATCH_SCORE))
            .collect())
    }

    async fn get_by_topics(
        &self,
        meeting_id: &str,
        topics: &[String],
    ) -> Result<Vec<EmbeddingSearchResult>> {
        Ok(self
            .load_meeting(meeting_id)?
            .iter()
            .filter(|row| {
                row.topics
                    .iter()
                    .any(|t| topics.iter().any(|wanted| wanted.eq_ignore_ascii_case(t)))
            })
            .map(|row| row.to_search_result(EXACT_MATCH_SCORE))
            .collect())
    }

    async fn delete_for_meeting(&self, meeting_id: &str) -> Result<usize> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM chunk_embeddings WHERE meeting_id = ?1",
            [meeting_id],
        )?;
        conn.execute(
            "DELETE FROM search_cache WHERE meeting_id = ?1",
            [meeting_id],
        )?;
        Ok(removed)
    }

    async fn count_for_meeting(&self, meeting_id: &str) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chunk_embeddings WHERE meeting_id = ?1",
            [meeting_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    async fn cache_get(&self, key: &CacheKey) -> Result<Option<Vec<EmbeddingSearchResult>>> {
        let conn = self.conn()?;
        let entry: Option<(String, i64)> = conn
            .query_row(
                "SELECT results, expires_at FROM search_cache
                 WHERE meeting_id = ?1 AND analysis_type = ?2 AND query_hash = ?3",
                params![key.meeting_id, key.analysis_type, key.query_hash],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((results, expires_at)) = entry else {
            return Ok(None);
        };

        if expires_at <= Utc::now().timestamp_millis() {
            conn.execute(
                "DELETE FROM search_cache
                 WHERE meeting_id = ?1 AND analysis_type = ?2 AND query_hash = ?3",
                params![key.meeting_id, key.analysis_type, key.query_hash],
            )?;
            return Ok(None);
        }

        Ok(Some(serde_json::from_str(&results)?))
    }

    async fn cache_put(
        &self,
        key: &CacheKey,
        results: &[EmbeddingSearchResult],
        ttl: Duration,
    ) -> Result<()> {
        let expires_at = Utc::now().timestamp_millis() + ttl.as_millis() as i64;
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO search_cache (meeting_id, analysis_type, query_hash, results, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                key.meeting_id,
                key.analysis_type,
                key.query_hash,
                serde_json::to_string(results)?,
                expires_at,
            ],
        )?;
        Ok(())
    }

    async fn storage_stats(&self, meeting_id: Option<&str>) -> Result<StorageStats> {
        let conn = self.conn()?;
        let filter = meeting_id.unwrap_or("");
        let (meetings, embeddings, total_tokens): (i64, i64, i64) = conn.query_row(
            "SELECT COUNT(DISTINCT meeting_id), COUNT(*), COALESCE(SUM(token_count), 0)
             FROM chunk_embeddings WHERE ?1 = '' OR meeting_id = ?1",
            [filter],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        let cache_entries: i64 = conn.query_row(
            "SELECT COUNT(*) FROM search_cache WHERE ?1 = '' OR meeting_id = ?1",
            [filter],
            |row| row.get(0),
        )?;

        Ok(StorageStats {
            backend: self.backend_name().to_string(),
            meetings: meetings as usize,
            embeddings: embeddings as usize,
            total_tokens: total_tokens as usize,
            cache_entries: cache_entries as usize,
        })
    }

    async fn health_check(&self) -> Result<bool> {
        let conn = self.conn()?;
        let one: i64 = conn.query_row("SELECT 1", [], |row| row.get(0))?;
        Ok(one == 1)
    }
}
