use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DealscopeError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Quota exceeded for model {model}: {message}")]
    QuotaExceeded { model: String, message: String },

    #[error("LLM call failed on {model}: {message}")]
    Llm { model: String, message: String },

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Indexing failed for meeting {meeting_id} during {stage}: {message}")]
    Indexing {
        meeting_id: String,
        stage: &'static str,
        message: String,
    },

    #[error("Invalid analysis response format ({context}): {reason}")]
    InvalidAnalysisFormat { context: String, reason: String },

    #[error("Report validation failed at {path}: {reason}")]
    SchemaValidation { path: String, reason: String },

    #[error("Analysis {analysis_type} failed for meeting {meeting_id}: {source}")]
    Analysis {
        meeting_id: String,
        analysis_type: String,
        #[source]
        source: Box<DealscopeError>,
    },

    #[error("{stage} timed out after {timeout:?}")]
    Timeout {
        stage: &'static str,
        timeout: Duration,
    },

    #[error("Pipeline failed for meeting {meeting_id}: {message}")]
    PipelineFailed { meeting_id: String, message: String },

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Daemon not running")]
    DaemonNotRunning,

    #[error("Meeting not found: {0}")]
    MeetingNotFound(String),

    #[error("Transcript not found for meeting: {0}")]
    TranscriptNotFound(String),
}

impl DealscopeError {
    /// Quota and resource-exhaustion failures trigger the single-level model fallback.
    pub fn is_quota_exhausted(&self) -> bool {
        match self {
            DealscopeError::QuotaExceeded { .. } => true,
            DealscopeError::Analysis { source, .. } => source.is_quota_exhausted(),
            _ => false,
        }
    }

    pub fn analysis(meeting_id: &str, analysis_type: &str, source: DealscopeError) -> Self {
        DealscopeError::Analysis {
            meeting_id: meeting_id.to_string(),
            analysis_type: analysis_type.to_string(),
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, DealscopeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_detection_through_analysis_wrapper() {
        let quota = DealscopeError::QuotaExceeded {
            model: "gemini-pro".to_string(),
            message: "RESOURCE_EXHAUSTED".to_string(),
        };
        assert!(quota.is_quota_exhausted());

        let wrapped = DealscopeError::analysis("m-1", "script", quota);
        assert!(wrapped.is_quota_exhausted());

        let other = DealscopeError::Api("boom".to_string());
        assert!(!other.is_quota_exhausted());
    }

    #[test]
    fn test_invalid_format_names_context() {
        let err = DealscopeError::InvalidAnalysisFormat {
            context: "objections".to_string(),
            reason: "no JSON found".to_string(),
        };
        assert!(err.to_string().contains("objections"));
    }
}
