use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analysis::persist::PersistableAnalysis;
use crate::analysis::{FullAnalysisReport, PipelineResult};
use crate::error::Result;

pub mod database;
pub mod migrations;

pub use database::Database;

/// Unique meeting identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MeetingId(pub String);

impl MeetingId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MeetingId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MeetingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Processing state of a meeting record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeetingStatus {
    Pending,
    Processing,
    Complete,
    Failed,
}

impl MeetingStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "pending" => MeetingStatus::Pending,
            "processing" => MeetingStatus::Processing,
            "complete" => MeetingStatus::Complete,
            _ => MeetingStatus::Failed,
        }
    }
}

impl std::fmt::Display for MeetingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MeetingStatus::Pending => write!(f, "pending"),
            MeetingStatus::Processing => write!(f, "processing"),
            MeetingStatus::Complete => write!(f, "complete"),
            MeetingStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A sales call known to the system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meeting {
    pub id: MeetingId,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub status: MeetingStatus,
    pub source_path: Option<std::path::PathBuf>,
    pub notes_path: Option<std::path::PathBuf>,
}

impl Meeting {
    pub fn new(title: String) -> Self {
        Self {
            id: MeetingId::new(),
            title,
            created_at: Utc::now(),
            status: MeetingStatus::Pending,
            source_path: None,
            notes_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTranscript {
    pub meeting_id: MeetingId,
    pub raw_text: String,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

/// The current analysis of one meeting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAnalysis {
    pub meeting_id: MeetingId,
    pub script_score: u8,
    pub icp_status: String,
    pub executive_summary: String,
    pub report: FullAnalysisReport,
    pub created_at: DateTime<Utc>,
}

/// Persistence operations the analysis flow depends on.
pub trait MeetingRepository {
    fn get_transcript_by_id(&self, meeting_id: &MeetingId) -> Result<Option<StoredTranscript>>;

    /// Store the analysis, replacing any previous one for the meeting.
    fn insert_analysis(&self, analysis: &PersistableAnalysis) -> Result<()>;

    fn mark_transcript_processed(&self, meeting_id: &MeetingId) -> Result<()>;

    fn update_meeting_status(&self, meeting_id: &MeetingId, status: MeetingStatus) -> Result<()>;

    /// Oldest unprocessed transcripts first.
    fn find_pending_transcripts(&self, limit: usize) -> Result<Vec<StoredTranscript>>;

    fn has_analysis(&self, meeting_id: &MeetingId) -> Result<bool>;

    fn get_latest_report(&self, meeting_id: &MeetingId) -> Result<Option<FullAnalysisReport>>;
}

/// Write a finished pipeline run: the analysis and `complete` on success, `failed` otherwise.
/// Failed runs never store a report.
pub fn record_pipeline_result<R: MeetingRepository + ?Sized>(
    repo: &R,
    result: &PipelineResult,
) -> Result<()> {
    let meeting_id = MeetingId::from_string(result.meeting_id.clone());

    if !result.success {
        tracing::warn!(
            "Marking meeting {} as failed: {}",
            meeting_id,
            result.error.as_deref().unwrap_or("unknown error")
        );
        return repo.update_meeting_status(&meeting_id, MeetingStatus::Failed);
    }

    let analysis = PersistableAnalysis::from_result(result)?;
    repo.insert_analysis(&analysis)?;
    repo.mark_transcript_processed(&meeting_id)?;
    repo.update_meeting_status(&meeting_id, MeetingStatus::Complete)?;
    tracing::info!("Stored analysis for meeting {}", meeting_id);
    Ok(())
}
