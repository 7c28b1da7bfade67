use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::config::settings::ChunkingConfig;
use crate::transcript::{parse_to_segments, TranscriptSegment};

const CHARS_PER_TOKEN: usize = 4;

/// Token estimate used across indexing: `ceil(chars / 4)`.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

fn segment_tokens(segment: &TranscriptSegment) -> usize {
    estimate_tokens(&segment.render())
}

/// A contiguous, token-bounded run of transcript segments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptChunk {
    pub id: String,
    pub index: usize,
    pub content: String,
    pub start_secs: f64,
    pub end_secs: f64,
    pub speakers: BTreeSet<String>,
    pub token_count: usize,
    pub dominant_speaker: Option<String>,
    pub has_overlap: bool,
    pub previous_chunk_id: Option<String>,
    /// Number of leading segments duplicated from the previous chunk
    pub overlap_segments: usize,
    pub segments: Vec<TranscriptSegment>,
    pub topics: Vec<String>,
}

impl TranscriptChunk {
    fn build(index: usize, segments: Vec<TranscriptSegment>, overlap_segments: usize) -> Self {
        let content = segments
            .iter()
            .map(TranscriptSegment::render)
            .collect::<Vec<_>>()
            .join("\n");

        let speakers = segments
            .iter()
            .map(|s| s.speaker_or_unknown().to_string())
            .collect();

        Self {
            id: chunk_id(index),
            index,
            token_count: estimate_tokens(&content),
            content,
            start_secs: segments.first().and_then(|s| s.start_secs).unwrap_or(0.0),
            end_secs: segments
                .last()
                .and_then(|s| s.end_secs.or(s.start_secs))
                .unwrap_or(0.0),
            speakers,
            dominant_speaker: dominant_speaker(&segments),
            has_overlap: overlap_segments > 0,
            previous_chunk_id: index.checked_sub(1).map(chunk_id),
            overlap_segments,
            segments,
            topics: Vec::new(),
        }
    }

    /// Segments that are new to this chunk, i.e. not duplicated from its predecessor.
    pub fn own_segments(&self) -> &[TranscriptSegment] {
        &self.segments[self.overlap_segments..]
    }

    /// Leading text duplicated from the previous chunk (empty for the first chunk).
    pub fn overlap_text(&self) -> String {
        self.segments[..self.overlap_segments]
            .iter()
            .map(TranscriptSegment::render)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn chunk_id(index: usize) -> String {
    format!("chunk_{:04}", index)
}

/// Speaker who contributed the most tokens; ties go to whoever spoke first.
pub fn dominant_speaker(segments: &[TranscriptSegment]) -> Option<String> {
    let mut totals: Vec<(&str, usize)> = Vec::new();

    for segment in segments {
        let speaker = segment.speaker_or_unknown();
        let tokens = estimate_tokens(&segment.text);
        match totals.iter_mut().find(|(name, _)| *name == speaker) {
            Some((_, total)) => *total += tokens,
            None => totals.push((speaker, tokens)),
        }
    }

    let mut best: Option<(&str, usize)> = None;
    for (speaker, total) in totals {
        if best.map_or(true, |(_, current)| total > current) {
            best = Some((speaker, total));
        }
    }
    best.map(|(speaker, _)| speaker.to_string())
}

pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    pub fn chunk_text(&self, raw: &str) -> Vec<TranscriptChunk> {
        self.chunk(&parse_to_segments(raw))
    }

    pub fn chunk(&self, segments: &[TranscriptSegment]) -> Vec<TranscriptChunk> {
        let mut chunks: Vec<TranscriptChunk> = Vec::new();
        let mut current: Vec<TranscriptSegment> = Vec::new();
        let mut current_tokens = 0;
        let mut current_overlap = 0;

        for segment in segments {
            let tokens = segment_tokens(segment);
            let has_new_material = current.len() > current_overlap;

            if has_new_material
                && current_tokens + tokens > self.config.target_tokens
                && current_tokens >= self.config.min_tokens
            {
                let finished = std::mem::take(&mut current);
                let seed = self.overlap_window(&finished, current_overlap);

                chunks.push(TranscriptChunk::build(
                    chunks.len(),
                    finished,
                    current_overlap,
                ));

                current_tokens = seed.iter().map(segment_tokens).sum();
                current_overlap = seed.len();
                current = seed;
            }

            current_tokens += tokens;
            current.push(segment.clone());
        }

        if current.len() > current_overlap {
            chunks.push(TranscriptChunk::build(chunks.len(), current, current_overlap));
        }

        tracing::debug!(
            "Chunked {} segments into {} chunks (target {} tokens, overlap {})",
            segments.len(),
            chunks.len(),
            self.config.target_tokens,
            self.config.overlap_tokens
        );

        chunks
    }

    /// Tail segments of a finished chunk, walking backwards until the overlap budget is
    /// reached. Only the chunk's own material is eligible, never its inherited overlap.
    fn overlap_window(
        &self,
        finished: &[TranscriptSegment],
        finished_overlap: usize,
    ) -> Vec<TranscriptSegment> {
        let own = &finished[finished_overlap..];
        let mut taken = 0;
        let mut budget_used = 0;

        for segment in own.iter().rev() {
            let tokens = segment_tokens(segment);
            if budget_used + tokens > self.config.overlap_tokens {
                break;
            }
            budget_used += tokens;
            taken += 1;
        }

        // The whole chunk is never replayed, only its tail.
        if taken == own.len() {
            taken = taken.saturating_sub(1);
        }

        own[own.len() - taken..].to_vec()
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(ChunkingConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_segment(i: usize, speaker: &str, words: usize) -> TranscriptSegment {
        let text = (0..words)
            .map(|w| format!("w{}_{}", i, w))
            .collect::<Vec<_>>()
            .join(" ");
        TranscriptSegment::new(speaker, &text, i as f64 * 10.0, i as f64 * 10.0 + 10.0)
    }

    fn dialogue(count: usize) -> Vec<TranscriptSegment> {
        (0..count)
            .map(|i| make_segment(i, if i % 2 == 0 { "Vendedor" } else { "Cliente" }, 12))
            .collect()
    }

    fn small_config() -> ChunkingConfig {
        ChunkingConfig {
            target_tokens: 120,
            overlap_tokens: 40,
            min_tokens: 20,
        }
    }

    #[test]
    fn test_small_transcript_single_chunk() {
        let chunker = Chunker::default();
        let chunks = chunker.chunk(&dialogue(3));

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, "chunk_0000");
        assert!(!chunks[0].has_overlap);
        assert!(chunks[0].previous_chunk_id.is_none());
    }

    #[test]
    fn test_empty_transcript_yields_no_chunks() {
        let chunker = Chunker::default();
        assert!(chunker.chunk(&[]).is_empty());
        assert!(chunker.chunk_text("").is_empty());
    }

    #[test]
    fn test_chunk_coverage_reconstructs_segments_once() {
        let segments = dialogue(40);
        let chunks = Chunker::new(small_config()).chunk(&segments);
        assert!(chunks.len() > 1);

        let rebuilt: Vec<TranscriptSegment> = chunks
            .iter()
            .flat_map(|c| c.own_segments().to_vec())
            .collect();
        assert_eq!(rebuilt, segments);
    }

    #[test]
    fn test_overlap_is_suffix_of_previous_chunk() {
        let chunks = Chunker::new(small_config()).chunk(&dialogue(40));

        for pair in chunks.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            assert!(next.has_overlap);
            assert_eq!(next.previous_chunk_id.as_deref(), Some(prev.id.as_str()));

            let overlap = next.overlap_text();
            assert!(next.content.starts_with(&overlap));
            assert!(prev.content.ends_with(&overlap));
            assert!(estimate_tokens(&overlap) <= small_config().overlap_tokens + 1);
        }
    }

    #[test]
    fn test_token_budget_exceeded_by_at_most_one_segment() {
        let config = small_config();
        let segments = dialogue(40);
        let max_segment = segments.iter().map(segment_tokens).max().unwrap();
        let chunks = Chunker::new(config).chunk(&segments);

        for chunk in &chunks[..chunks.len() - 1] {
            let tokens: usize = chunk.segments.iter().map(segment_tokens).sum();
            assert!(tokens <= config.target_tokens + max_segment);
        }
    }

    #[test]
    fn test_no_undersized_chunk_except_last() {
        let config = small_config();
        let chunks = Chunker::new(config).chunk(&dialogue(25));

        for chunk in &chunks[..chunks.len() - 1] {
            let tokens: usize = chunk.segments.iter().map(segment_tokens).sum();
            assert!(tokens >= config.min_tokens);
        }
    }

    #[test]
    fn test_dominant_speaker_is_token_weighted() {
        let a = TranscriptSegment::new("X", &"a".repeat(400), 0.0, 10.0);
        let b = TranscriptSegment::new("Y", &"b".repeat(200), 10.0, 20.0);
        let c = TranscriptSegment::new("Y", "ok", 20.0, 21.0);

        assert_eq!(dominant_speaker(&[a, b, c]), Some("X".to_string()));
    }

    #[test]
    fn test_chunk_ids_are_sequential_and_padded() {
        let chunks = Chunker::new(small_config()).chunk(&dialogue(40));
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.id, format!("chunk_{:04}", i));
            assert_eq!(chunk.index, i);
        }
    }

    #[test]
    fn test_chunk_format_with_speakers() {
        let segments = vec![
            TranscriptSegment::new("Ana", "Olá", 0.0, 5.0),
            TranscriptSegment::new("Bruno", "Oi", 5.0, 9.0),
        ];
        let chunks = Chunker::default().chunk(&segments);

        assert!(chunks[0].content.contains("[00:00] Ana: Olá"));
        assert!(chunks[0].content.contains("[00:05] Bruno: Oi"));
        assert_eq!(chunks[0].speakers.len(), 2);
        assert_eq!(chunks[0].end_secs, 9.0);
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
