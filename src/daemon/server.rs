use crate::analysis::{AnalysisPipeline, AnalysisType, PipelineOptions};
use crate::config::loader::{database_path, notes_dir, socket_path};
use crate::config::DealscopeConfig;
use crate::daemon::protocol::{DaemonRequest, DaemonResponse, DaemonStatus, JobInfo, JobState};
use crate::error::{DealscopeError, Result};
use crate::notes::ReportWriter;
use crate::storage::database::Database;
use crate::storage::{record_pipeline_result, MeetingId, MeetingRepository, MeetingStatus};

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

const RECENT_JOBS: usize = 10;
const MAX_FINISHED_JOBS: usize = 200;

/// A queued analysis request.
#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: String,
    pub meeting_id: String,
    pub analysis_types: Vec<AnalysisType>,
}

/// Executes one job. The token is cancelled on job cancel or daemon shutdown.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: &Job, cancel: CancellationToken) -> Result<()>;
}

/// Runs the full pipeline against a stored transcript and records the outcome.
pub struct PipelineJobRunner {
    pipeline: Arc<AnalysisPipeline>,
    db_path: PathBuf,
    notes_dir: Option<PathBuf>,
}

impl PipelineJobRunner {
    pub fn new(pipeline: Arc<AnalysisPipeline>, db_path: PathBuf, notes_dir: Option<PathBuf>) -> Self {
        Self {
            pipeline,
            db_path,
            notes_dir,
        }
    }
}

#[async_trait]
impl JobRunner for PipelineJobRunner {
    async fn run(&self, job: &Job, cancel: CancellationToken) -> Result<()> {
        let meeting_id = MeetingId::from_string(job.meeting_id.clone());

        let transcript = {
            let db = Database::open(&self.db_path)?;
            let transcript = db
                .get_transcript_by_id(&meeting_id)?
                .ok_or_else(|| DealscopeError::TranscriptNotFound(job.meeting_id.clone()))?;
            db.update_meeting_status(&meeting_id, MeetingStatus::Processing)?;
            transcript
        };

        let options = PipelineOptions::default()
            .with_types(job.analysis_types.clone())
            .with_cancellation(cancel.clone());
        let result = self
            .pipeline
            .run_full(&job.meeting_id, &transcript.raw_text, options)
            .await;

        let db = Database::open(&self.db_path)?;
        record_pipeline_result(&db, &result)?;

        if !result.success {
            let message = result.error.unwrap_or_else(|| "unknown error".to_string());
            if cancel.is_cancelled() {
                return Err(DealscopeError::Cancelled(message));
            }
            return Err(DealscopeError::PipelineFailed {
                meeting_id: job.meeting_id.clone(),
                message,
            });
        }

        if let Some(dir) = &self.notes_dir {
            if let Some(mut meeting) = db.get_meeting(&meeting_id)? {
                let path = ReportWriter::new(dir.clone()).write(
                    &meeting,
                    &result.report,
                    result.quick_summary.as_deref(),
                )?;
                meeting.notes_path = Some(path);
                db.update_meeting(&meeting)?;
            }
        }

        Ok(())
    }
}

pub struct DaemonState {
    jobs: HashMap<String, JobInfo>,
    /// Submission order, oldest first.
    order: Vec<String>,
    active_by_meeting: HashMap<String, String>,
    cancels: HashMap<String, CancellationToken>,
    queue: mpsc::Sender<Job>,
    shutdown: CancellationToken,
    /// Finished jobs kept for status queries; older ones are forgotten.
    finished_limit: usize,
    pub start_time: Instant,
}

impl DaemonState {
    pub fn new(queue: mpsc::Sender<Job>, shutdown: CancellationToken) -> Self {
        Self {
            jobs: HashMap::new(),
            order: Vec::new(),
            active_by_meeting: HashMap::new(),
            cancels: HashMap::new(),
            queue,
            shutdown,
            finished_limit: MAX_FINISHED_JOBS,
            start_time: Instant::now(),
        }
    }

    pub fn submit(&mut self, meeting_id: String, analysis_types: Vec<AnalysisType>) -> DaemonResponse {
        if let Some(job_id) = self.active_by_meeting.get(&meeting_id) {
            return DaemonResponse::AlreadyQueued {
                job_id: job_id.clone(),
                meeting_id,
            };
        }

        let job = Job {
            job_id: uuid::Uuid::new_v4().to_string(),
            meeting_id: meeting_id.clone(),
            analysis_types,
        };
        let job_id = job.job_id.clone();

        if let Err(e) = self.queue.try_send(job) {
            let message = match e {
                mpsc::error::TrySendError::Full(_) => "Job queue full".to_string(),
                mpsc::error::TrySendError::Closed(_) => "Job queue closed".to_string(),
            };
            tracing::warn!("Rejected job for meeting {}: {}", meeting_id, message);
            return DaemonResponse::Error { message };
        }

        tracing::info!("Queued job {} for meeting {}", job_id, meeting_id);
        self.jobs.insert(
            job_id.clone(),
            JobInfo {
                job_id: job_id.clone(),
                meeting_id: meeting_id.clone(),
                state: JobState::Queued,
                submitted_at: Utc::now(),
                finished_at: None,
                error: None,
            },
        );
        self.order.push(job_id.clone());
        self.active_by_meeting.insert(meeting_id.clone(), job_id.clone());
        self.cancels
            .insert(job_id.clone(), self.shutdown.child_token());

        DaemonResponse::JobQueued { job_id, meeting_id }
    }

    pub fn cancel(&mut self, job_id: &str) -> DaemonResponse {
        let Some(info) = self.jobs.get_mut(job_id) else {
            return DaemonResponse::Error {
                message: format!("Unknown job: {}", job_id),
            };
        };

        match info.state {
            JobState::Queued => {
                info.state = JobState::Cancelled;
                info.finished_at = Some(Utc::now());
                let meeting_id = info.meeting_id.clone();
                self.active_by_meeting.remove(&meeting_id);
                self.cancels.remove(job_id);
                self.prune_finished();
            }
            JobState::Running => {
                // The worker records the final state once the pipeline stops.
                if let Some(token) = self.cancels.get(job_id) {
                    token.cancel();
                }
            }
            _ => {
                return DaemonResponse::Error {
                    message: format!("Job {} already {}", job_id, info.state),
                }
            }
        }

        tracing::info!("Cancelled job {}", job_id);
        DaemonResponse::Ok
    }

    pub fn job(&self, job_id: &str) -> Option<JobInfo> {
        self.jobs.get(job_id).cloned()
    }

    /// Mark the job running. `None` when it was cancelled while queued.
    fn start(&mut self, job_id: &str) -> Option<CancellationToken> {
        let info = self.jobs.get_mut(job_id)?;
        if info.state != JobState::Queued {
            return None;
        }
        info.state = JobState::Running;
        self.cancels.get(job_id).cloned()
    }

    fn finish(&mut self, job_id: &str, outcome: &Result<()>) {
        let token = self.cancels.remove(job_id);
        let Some(info) = self.jobs.get_mut(job_id) else {
            return;
        };

        let cancelled = token.map(|t| t.is_cancelled()).unwrap_or(false);
        match outcome {
            Ok(()) => info.state = JobState::Succeeded,
            Err(DealscopeError::Cancelled(message)) => {
                info.state = JobState::Cancelled;
                info.error = Some(message.clone());
            }
            Err(e) if cancelled => {
                info.state = JobState::Cancelled;
                info.error = Some(e.to_string());
            }
            Err(e) => {
                info.state = JobState::Failed;
                info.error = Some(e.to_string());
            }
        }
        info.finished_at = Some(Utc::now());

        let meeting_id = info.meeting_id.clone();
        if self.active_by_meeting.get(&meeting_id).map(String::as_str) == Some(job_id) {
            self.active_by_meeting.remove(&meeting_id);
        }
        self.prune_finished();
    }

    /// Drop the oldest finished jobs beyond `finished_limit`. Active jobs are never dropped.
    fn prune_finished(&mut self) {
        let is_finished =
            |jobs: &HashMap<String, JobInfo>, id: &str| jobs.get(id).map_or(true, |j| !j.state.is_active());

        let finished = self.order.iter().filter(|id| is_finished(&self.jobs, id)).count();
        let mut excess = finished.saturating_sub(self.finished_limit);
        if excess == 0 {
            return;
        }

        let jobs = &mut self.jobs;
        self.order.retain(|id| {
            if excess == 0 || !is_finished(jobs, id) {
                return true;
            }
            jobs.remove(id);
            excess -= 1;
            false
        });
        tracing::debug!("Job table trimmed to {} entries", self.order.len());
    }

    pub fn status(&self) -> DaemonStatus {
        let count = |state: JobState| self.jobs.values().filter(|j| j.state == state).count();
        let recent_jobs = self
            .order
            .iter()
            .rev()
            .take(RECENT_JOBS)
            .filter_map(|id| self.jobs.get(id).cloned())
            .collect();

        DaemonStatus {
            running: !self.shutdown.is_cancelled(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            queued: count(JobState::Queued),
            running_jobs: count(JobState::Running),
            finished: self.jobs.values().filter(|j| !j.state.is_active()).count(),
            recent_jobs,
        }
    }
}

/// Pull jobs off the queue one at a time until shutdown or the queue closes.
pub async fn run_worker(
    mut queue: mpsc::Receiver<Job>,
    state: Arc<Mutex<DaemonState>>,
    runner: Arc<dyn JobRunner>,
    shutdown: CancellationToken,
) {
    loop {
        let job = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            job = queue.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let token = state.lock().await.start(&job.job_id);
        let Some(token) = token else {
            tracing::debug!("Skipping cancelled job {}", job.job_id);
            continue;
        };

        tracing::info!("Running job {} for meeting {}", job.job_id, job.meeting_id);
        let outcome = runner.run(&job, token).await;
        if let Err(e) = &outcome {
            tracing::error!("Job {} failed: {}", job.job_id, e);
        }
        state.lock().await.finish(&job.job_id, &outcome);
    }

    tracing::info!("Job worker stopped");
}

pub async fn run_daemon(config: &DealscopeConfig) -> Result<()> {
    let socket = socket_path(config)?;

    if socket.exists() {
        std::fs::remove_file(&socket)?;
    }

    if let Some(parent) = socket.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let pipeline = Arc::new(AnalysisPipeline::from_config(config)?);
    let runner: Arc<dyn JobRunner> = Arc::new(PipelineJobRunner::new(
        pipeline,
        database_path(config)?,
        Some(notes_dir(config)?),
    ));

    let listener = UnixListener::bind(&socket).map_err(DealscopeError::Io)?;
    tracing::info!("Daemon listening on {:?}", socket);

    let shutdown = CancellationToken::new();
    let (tx, rx) = mpsc::channel(config.daemon.queue_capacity.max(1));
    let state = Arc::new(Mutex::new(DaemonState::new(tx, shutdown.clone())));

    let worker = tokio::spawn(run_worker(rx, state.clone(), runner, shutdown.clone()));

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down");
            signal_shutdown.cancel();
        }
    });

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            result = listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        let state = state.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, state).await {
                                tracing::error!("Connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                    }
                }
            }
        }
    }

    if let Err(e) = worker.await {
        tracing::error!("Job worker panicked: {}", e);
    }

    let _ = std::fs::remove_file(&socket);
    tracing::info!("Daemon shutdown complete");

    Ok(())
}

pub(crate) async fn handle_connection(
    stream: UnixStream,
    state: Arc<Mutex<DaemonState>>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let response = match serde_json::from_str::<DaemonRequest>(&line) {
            Ok(request) => handle_request(request, &state).await,
            Err(e) => DaemonResponse::Error {
                message: format!("Invalid request: {}", e),
            },
        };

        let response_json = serde_json::to_string(&response)?;
        writer.write_all(response_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        line.clear();
    }

    Ok(())
}

async fn handle_request(request: DaemonRequest, state: &Arc<Mutex<DaemonState>>) -> DaemonResponse {
    match request {
        DaemonRequest::Ping => DaemonResponse::Pong,

        DaemonRequest::GetStatus => DaemonResponse::Status(state.lock().await.status()),

        DaemonRequest::Submit {
            meeting_id,
            analysis_types,
        } => {
            let analysis_types = match analysis_types {
                Some(types) => match AnalysisType::parse_list(&types.join(",")) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        return DaemonResponse::Error {
                            message: e.to_string(),
                        }
                    }
                },
                None => AnalysisType::ALL.to_vec(),
            };
            state.lock().await.submit(meeting_id, analysis_types)
        }

        DaemonRequest::Cancel { job_id } => state.lock().await.cancel(&job_id),

        DaemonRequest::JobStatus { job_id } => match state.lock().await.job(&job_id) {
            Some(info) => DaemonResponse::Job(info),
            None => DaemonResponse::Error {
                message: format!("Unknown job: {}", job_id),
            },
        },

        DaemonRequest::Shutdown => {
            tracing::info!("Shutdown requested");
            state.lock().await.shutdown.cancel();
            DaemonResponse::Ok
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// Records meeting ids; meetings named "fail" error, "block" waits for cancellation.
    #[derive(Default)]
    pub struct FakeRunner {
        pub runs: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl JobRunner for FakeRunner {
        async fn run(&self, job: &Job, cancel: CancellationToken) -> Result<()> {
            self.runs.lock().unwrap().push(job.meeting_id.clone());
            match job.meeting_id.as_str() {
                "fail" => Err(DealscopeError::PipelineFailed {
                    meeting_id: job.meeting_id.clone(),
                    message: "boom".to_string(),
                }),
                "block" => {
                    cancel.cancelled().await;
                    Err(DealscopeError::Cancelled("stopped".to_string()))
                }
                _ => Ok(()),
            }
        }
    }

    pub fn test_state(capacity: usize) -> (Arc<Mutex<DaemonState>>, mpsc::Receiver<Job>, CancellationToken) {
        let shutdown = CancellationToken::new();
        let (tx, rx) = mpsc::channel(capacity);
        let state = Arc::new(Mutex::new(DaemonState::new(tx, shutdown.clone())));
        (state, rx, shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::time::Duration;

    fn submit(meeting_id: &str) -> DaemonRequest {
        DaemonRequest::Submit {
            meeting_id: meeting_id.to_string(),
            analysis_types: None,
        }
    }

    fn queued_job_id(response: DaemonResponse) -> String {
        match response {
            DaemonResponse::JobQueued { job_id, .. } => job_id,
            other => panic!("Expected JobQueued, got {:?}", other),
        }
    }

    async fn wait_for_state(state: &Arc<Mutex<DaemonState>>, job_id: &str, expected: JobState) {
        for _ in 0..200 {
            if state.lock().await.job(job_id).map(|j| j.state) == Some(expected) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("Job {} never reached {}", job_id, expected);
    }

    #[tokio::test]
    async fn test_finished_jobs_are_capped() {
        let (state, _rx, _) = test_state(16);
        let mut state = state.lock().await;
        state.finished_limit = 2;

        let mut ids = Vec::new();
        for n in 0..5 {
            let id = queued_job_id(state.submit(format!("m{}", n), Vec::new()));
            state.start(&id).unwrap();
            state.finish(&id, &Ok(()));
            ids.push(id);
        }
        let pending = queued_job_id(state.submit("m-pending".to_string(), Vec::new()));
        let dropped = queued_job_id(state.submit("m-dropped".to_string(), Vec::new()));
        assert!(matches!(state.cancel(&dropped), DaemonResponse::Ok));

        assert_eq!(state.jobs.len(), 3);
        assert_eq!(state.order.len(), 3);
        assert!(state.job(&ids[3]).is_none());
        assert_eq!(state.job(&ids[4]).map(|j| j.state), Some(JobState::Succeeded));
        assert_eq!(state.job(&pending).map(|j| j.state), Some(JobState::Queued));
        assert_eq!(state.job(&dropped).map(|j| j.state), Some(JobState::Cancelled));
    }

    #[tokio::test]
    async fn test_handle_ping() {
        let (state, _rx, _) = test_state(4);
        let response = handle_request(DaemonRequest::Ping, &state).await;
        assert!(matches!(response, DaemonResponse::Pong));
    }

    #[tokio::test]
    async fn test_handle_get_status() {
        let (state, _rx, _) = test_state(4);
        handle_request(submit("m1"), &state).await;

        match handle_request(DaemonRequest::GetStatus, &state).await {
            DaemonResponse::Status(status) => {
                assert!(status.running);
                assert_eq!(status.queued, 1);
                assert_eq!(status.recent_jobs.len(), 1);
            }
            other => panic!("Expected Status response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_submit_deduplicates_per_meeting() {
        let (state, _rx, _) = test_state(4);

        let first = queued_job_id(handle_request(submit("m1"), &state).await);
        match handle_request(submit("m1"), &state).await {
            DaemonResponse::AlreadyQueued { job_id, meeting_id } => {
                assert_eq!(job_id, first);
                assert_eq!(meeting_id, "m1");
            }
            other => panic!("Expected AlreadyQueued, got {:?}", other),
        }

        let other = queued_job_id(handle_request(submit("m2"), &state).await);
        assert_ne!(other, first);
    }

    #[tokio::test]
    async fn test_submit_rejects_unknown_analysis_type() {
        let (state, _rx, _) = test_state(4);
        let response = handle_request(
            DaemonRequest::Submit {
                meeting_id: "m1".to_string(),
                analysis_types: Some(vec!["sentiment".to_string()]),
            },
            &state,
        )
        .await;
        assert!(matches!(response, DaemonResponse::Error { .. }));
        assert_eq!(state.lock().await.status().queued, 0);
    }

    #[tokio::test]
    async fn test_full_queue_rejects_submission() {
        let (state, _rx, _) = test_state(1);
        queued_job_id(handle_request(submit("m1"), &state).await);

        match handle_request(submit("m2"), &state).await {
            DaemonResponse::Error { message } => assert_eq!(message, "Job queue full"),
            other => panic!("Expected Error response, got {:?}", other),
        }
        assert_eq!(state.lock().await.status().recent_jobs.len(), 1);
    }

    #[tokio::test]
    async fn test_worker_runs_jobs_and_releases_meeting() {
        let (state, rx, shutdown) = test_state(4);
        let runner = Arc::new(FakeRunner::default());
        let worker = tokio::spawn(run_worker(rx, state.clone(), runner.clone(), shutdown.clone()));

        let ok = queued_job_id(handle_request(submit("m1"), &state).await);
        let failed = queued_job_id(handle_request(submit("fail"), &state).await);

        wait_for_state(&state, &ok, JobState::Succeeded).await;
        wait_for_state(&state, &failed, JobState::Failed).await;

        let info = state.lock().await.job(&failed).unwrap();
        assert!(info.error.unwrap().contains("boom"));
        assert!(info.finished_at.is_some());

        // A finished meeting can be submitted again.
        queued_job_id(handle_request(submit("m1"), &state).await);

        shutdown.cancel();
        worker.await.unwrap();
        assert!(runner.runs.lock().unwrap().contains(&"fail".to_string()));
    }

    #[tokio::test]
    async fn test_cancel_queued_job_is_skipped() {
        let (state, rx, shutdown) = test_state(4);
        let runner = Arc::new(FakeRunner::default());

        let cancelled = queued_job_id(handle_request(submit("m1"), &state).await);
        let response = handle_request(
            DaemonRequest::Cancel {
                job_id: cancelled.clone(),
            },
            &state,
        )
        .await;
        assert!(matches!(response, DaemonResponse::Ok));

        let next = queued_job_id(handle_request(submit("m2"), &state).await);
        let worker = tokio::spawn(run_worker(rx, state.clone(), runner.clone(), shutdown.clone()));
        wait_for_state(&state, &next, JobState::Succeeded).await;

        assert_eq!(
            state.lock().await.job(&cancelled).unwrap().state,
            JobState::Cancelled
        );
        assert_eq!(*runner.runs.lock().unwrap(), vec!["m2".to_string()]);

        shutdown.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_cancels_running_job() {
        let (state, rx, shutdown) = test_state(4);
        let runner = Arc::new(FakeRunner::default());
        let worker = tokio::spawn(run_worker(rx, state.clone(), runner, shutdown.clone()));

        let job_id = queued_job_id(handle_request(submit("block"), &state).await);
        wait_for_state(&state, &job_id, JobState::Running).await;

        let response = handle_request(DaemonRequest::Shutdown, &state).await;
        assert!(matches!(response, DaemonResponse::Ok));
        assert!(shutdown.is_cancelled());

        worker.await.unwrap();
        assert_eq!(state.lock().await.job(&job_id).unwrap().state, JobState::Cancelled);
        assert!(!state.lock().await.status().running);
    }

    #[tokio::test]
    async fn test_unknown_job_status() {
        let (state, _rx, _) = test_state(4);
        let response = handle_request(
            DaemonRequest::JobStatus {
                job_id: "missing".to_string(),
            },
            &state,
        )
        .await;
        assert!(matches!(response, DaemonResponse::Error { .. }));
    }

    #[tokio::test]
    async fn test_pipeline_runner_records_analysis() {
        use crate::analysis::pipeline::testing::{sales_call_responder, scripted_pipeline};
        use crate::llm::testing::ScriptedBackend;
        use crate::rag::service::testing::SALES_CALL;
        use crate::storage::Meeting;
        use tempfile::TempDir;

        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("dealscope.db");
        let meeting = Meeting::new("Discovery".to_string());
        {
            let db = Database::open(&db_path).unwrap();
            db.insert_meeting(&meeting).unwrap();
            db.upsert_transcript(&meeting.id, SALES_CALL).unwrap();
        }

        let backend = Arc::new(ScriptedBackend::new("scripted", sales_call_responder));
        let runner = PipelineJobRunner::new(
            Arc::new(scripted_pipeline(backend)),
            db_path.clone(),
            Some(dir.path().join("notes")),
        );
        let job = Job {
            job_id: "j1".to_string(),
            meeting_id: meeting.id.to_string(),
            analysis_types: AnalysisType::ALL.to_vec(),
        };
        runner.run(&job, CancellationToken::new()).await.unwrap();

        let db = Database::open(&db_path).unwrap();
        assert!(db.has_analysis(&meeting.id).unwrap());
        let stored = db.get_meeting(&meeting.id).unwrap().unwrap();
        assert_eq!(stored.status, MeetingStatus::Complete);
        assert!(stored.notes_path.unwrap().exists());
    }

    #[tokio::test]
    async fn test_pipeline_runner_missing_transcript() {
        use crate::llm::testing::ScriptedBackend;
        use crate::analysis::pipeline::testing::{sales_call_responder, scripted_pipeline};
        use tempfile::TempDir;

        let dir = TempDir::new().unwrap();
        let backend = Arc::new(ScriptedBackend::new("scripted", sales_call_responder));
        let runner = PipelineJobRunner::new(
            Arc::new(scripted_pipeline(backend)),
            dir.path().join("dealscope.db"),
            None,
        );
        let job = Job {
            job_id: "j1".to_string(),
            meeting_id: "nope".to_string(),
            analysis_types: AnalysisType::ALL.to_vec(),
        };
        let err = runner.run(&job, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, DealscopeError::TranscriptNotFound(_)));
    }
}
