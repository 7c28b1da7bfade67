pub mod chunking;
pub mod embedding;
pub mod limiter;
pub mod service;
pub mod store;

pub use chunking::{Chunker, TranscriptChunk};
pub use embedding::{embedder_from_config, Embedder, EmbeddingService};
pub use limiter::RateLimiter;
pub use service::{IndexingResult, IndexingStats, RagService, SearchOptions};
pub use store::{open_store, EmbeddingSearchResult, SearchFilter, VectorStore};
