use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DealscopeConfig {
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub vector_store: VectorStoreConfig,

    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub rag: RagConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub chat: ChatConfig,

    #[serde(default)]
    pub guidelines: GuidelinesConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub daemon: DaemonConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider: "anthropic", "openai", "moonshot", "openrouter", "gemini", "none"
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    pub api_key: Option<String>,
    /// Overrides the provider's default base URL (OpenAI-compatible providers only)
    pub base_url: Option<String>,
    /// General-purpose model used for objections, consolidation and fallback
    #[serde(default = "default_general_model")]
    pub model: String,
    /// Cheaper model for quick summaries and chat
    #[serde(default = "default_quick_model")]
    pub quick_model: String,
    /// Deep-context model preferred for script and ICP analysis
    #[serde(default)]
    pub deep_context: DeepContextConfig,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_quick_max_tokens")]
    pub quick_max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            api_key: None,
            base_url: None,
            model: default_general_model(),
            quick_model: default_quick_model(),
            deep_context: DeepContextConfig::default(),
            max_tokens: default_max_tokens(),
            quick_max_tokens: default_quick_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

impl LlmConfig {
    pub fn is_configured(&self) -> bool {
        self.provider != "none"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepContextConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_deep_context_provider")]
    pub provider: String,
    #[serde(default = "default_deep_context_model")]
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

impl Default for DeepContextConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_deep_context_provider(),
            model: default_deep_context_model(),
            api_key: None,
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding backend: "openai" (any OpenAI-compatible endpoint) or "hashing" (local)
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Sustained request rate allowed by the provider quota
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,
    /// Burst size of the request limiter
    #[serde(default = "default_burst")]
    pub burst: u32,
    /// Vector size for the local hashing embedder
    #[serde(default = "default_hashing_dimensions")]
    pub hashing_dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            api_key: None,
            base_url: None,
            batch_size: default_batch_size(),
            requests_per_second: default_requests_per_second(),
            burst: default_burst(),
            hashing_dimensions: default_hashing_dimensions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    /// Backend: "sqlite" (persistent) or "memory" (development fallback)
    #[serde(default = "default_vector_backend")]
    pub backend: String,
    /// Path to the vector database (defaults to the data directory)
    pub path: Option<PathBuf>,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            backend: default_vector_backend(),
            path: None,
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_target_tokens")]
    pub target_tokens: usize,
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
    #[serde(default = "default_min_tokens")]
    pub min_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_tokens: default_target_tokens(),
            overlap_tokens: default_overlap_tokens(),
            min_tokens: default_min_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    #[serde(default = "default_true")]
    pub extract_topics: bool,
    #[serde(default = "default_topic_requests_per_second")]
    pub topic_requests_per_second: f64,
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f64,
    /// Results kept per canned query in the specialized searches
    #[serde(default = "default_per_query_limit")]
    pub per_query_limit: usize,
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            extract_topics: true,
            topic_requests_per_second: default_topic_requests_per_second(),
            search_limit: default_search_limit(),
            min_similarity: default_min_similarity(),
            per_query_limit: default_per_query_limit(),
            cache_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Timeout applied to every LLM call and to the indexing stage
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_secs: u64,
    /// Subset of "script", "icp", "objections"
    #[serde(default = "default_analysis_types")]
    pub analysis_types: Vec<String>,
    #[serde(default = "default_context_max_chars")]
    pub context_max_chars: usize,
    #[serde(default = "default_quick_context_max_chars")]
    pub quick_context_max_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stage_timeout_secs: default_stage_timeout(),
            analysis_types: default_analysis_types(),
            context_max_chars: default_context_max_chars(),
            quick_context_max_chars: default_quick_context_max_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_top_segments")]
    pub top_segments: usize,
    #[serde(default = "default_retrieval_limit")]
    pub retrieval_limit: usize,
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f64,
    #[serde(default = "default_max_report_chars")]
    pub max_report_chars: usize,
    #[serde(default = "default_max_transcript_chars")]
    pub max_transcript_chars: usize,
    #[serde(default = "default_max_answer_words")]
    pub max_answer_words: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            top_segments: default_top_segments(),
            retrieval_limit: default_retrieval_limit(),
            min_similarity: default_min_similarity(),
            max_report_chars: default_max_report_chars(),
            max_transcript_chars: default_max_transcript_chars(),
            max_answer_words: default_max_answer_words(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuidelinesConfig {
    /// Custom sales script playbook (plain text / markdown)
    pub script_path: Option<PathBuf>,
    /// Custom ideal-customer-profile criteria
    pub icp_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database
    pub database_path: Option<PathBuf>,
    /// Directory for exported report notes
    pub notes_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Unix socket path
    pub socket_path: Option<PathBuf>,
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Maximum queued analysis jobs before submissions are rejected
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            log_level: default_log_level(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_llm_provider() -> String {
    "openai".to_string()
}

fn default_general_model() -> String {
    "gpt-4o".to_string()
}

fn default_quick_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_deep_context_provider() -> String {
    "gemini".to_string()
}

fn default_deep_context_model() -> String {
    "gemini-2.5-pro".to_string()
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_quick_max_tokens() -> u32 {
    1024
}

fn default_temperature() -> f32 {
    0.2
}

fn default_embedding_provider() -> String {
    "openai".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_batch_size() -> usize {
    16
}

fn default_requests_per_second() -> f64 {
    5.0
}

fn default_burst() -> u32 {
    5
}

fn default_hashing_dimensions() -> usize {
    256
}

fn default_vector_backend() -> String {
    "sqlite".to_string()
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_target_tokens() -> usize {
    500
}

fn default_overlap_tokens() -> usize {
    100
}

fn default_min_tokens() -> usize {
    50
}

fn default_topic_requests_per_second() -> f64 {
    2.0
}

fn default_search_limit() -> usize {
    10
}

fn default_min_similarity() -> f64 {
    0.3
}

fn default_per_query_limit() -> usize {
    5
}

fn default_stage_timeout() -> u64 {
    180
}

fn default_analysis_types() -> Vec<String> {
    vec![
        "script".to_string(),
        "icp".to_string(),
        "objections".to_string(),
    ]
}

fn default_context_max_chars() -> usize {
    24000
}

fn default_quick_context_max_chars() -> usize {
    8000
}

fn default_top_segments() -> usize {
    8
}

fn default_retrieval_limit() -> usize {
    8
}

fn default_max_report_chars() -> usize {
    6000
}

fn default_max_transcript_chars() -> usize {
    8000
}

fn default_max_answer_words() -> usize {
    250
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_queue_capacity() -> usize {
    32
}
