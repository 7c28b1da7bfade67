use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DaemonRequest {
    /// Queue a full analysis of a stored meeting.
    Submit {
        meeting_id: String,
        analysis_types: Option<Vec<String>>,
    },
    Cancel { job_id: String },
    JobStatus { job_id: String },
    GetStatus,
    Shutdown,
    Ping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DaemonResponse {
    Ok,
    Error { message: String },
    Status(DaemonStatus),
    Pong,
    JobQueued { job_id: String, meeting_id: String },
    /// The meeting already has a queued or running job.
    AlreadyQueued { job_id: String, meeting_id: String },
    Job(JobInfo),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_active(&self) -> bool {
        matches!(self, JobState::Queued | JobState::Running)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    pub job_id: String,
    pub meeting_id: String,
    pub state: JobState,
    pub submitted_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub running: bool,
    pub uptime_seconds: u64,
    pub queued: usize,
    pub running_jobs: usize,
    pub finished: usize,
    /// Most recent jobs first.
    pub recent_jobs: Vec<JobInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let request = DaemonRequest::Submit {
            meeting_id: "m-1".to_string(),
            analysis_types: Some(vec!["icp".to_string()]),
        };
        let json = serde_json::to_string(&request).unwrap();
        let parsed: DaemonRequest = serde_json::from_str(&json).unwrap();

        match parsed {
            DaemonRequest::Submit {
                meeting_id,
                analysis_types,
            } => {
                assert_eq!(meeting_id, "m-1");
                assert_eq!(analysis_types, Some(vec!["icp".to_string()]));
            }
            _ => panic!("Wrong request type"),
        }
    }

    #[test]
    fn test_job_response_serialization() {
        let response = DaemonResponse::Job(JobInfo {
            job_id: "j-1".to_string(),
            meeting_id: "m-1".to_string(),
            state: JobState::Running,
            submitted_at: Utc::now(),
            finished_at: None,
            error: None,
        });
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"running\""));

        match serde_json::from_str::<DaemonResponse>(&json).unwrap() {
            DaemonResponse::Job(info) => assert_eq!(info.state, JobState::Running),
            _ => panic!("Wrong response type"),
        }
    }

    #[test]
    fn test_all_request_variants() {
        let requests = vec![
            DaemonRequest::Submit {
                meeting_id: "m".to_string(),
                analysis_types: None,
            },
            DaemonRequest::Cancel {
                job_id: "j".to_string(),
            },
            DaemonRequest::JobStatus {
                job_id: "j".to_string(),
            },
            DaemonRequest::GetStatus,
            DaemonRequest::Shutdown,
            DaemonRequest::Ping,
        ];

        for request in requests {
            let json = serde_json::to_string(&request).unwrap();
            let _: DaemonRequest = serde_json::from_str(&json).unwrap();
        }
    }

    #[test]
    fn test_active_states() {
        assert!(JobState::Queued.is_active());
        assert!(JobState::Running.is_active());
        assert!(!JobState::Cancelled.is_active());
    }
}
