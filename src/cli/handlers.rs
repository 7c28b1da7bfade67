use crate::analysis::{AnalysisPipeline, AnalysisType, PipelineOptions, PipelineResult};
use crate::chat::ChatRequest;
use crate::cli::commands::*;
use crate::config::{self, DealscopeConfig};
use crate::daemon::{is_daemon_running, DaemonClient, DaemonRequest, DaemonResponse};
use crate::error::{DealscopeError, Result};
use crate::notes::markdown::render_report;
use crate::notes::ReportWriter;
use crate::rag::{SearchFilter, SearchOptions};
use crate::storage::database::Database;
use crate::storage::{record_pipeline_result, Meeting, MeetingId, MeetingRepository, MeetingStatus};
use std::path::Path;

pub async fn handle_command(cli: Cli) -> Result<()> {
    let cfg = config::loader::load_config_with_env()?;

    match cli.command {
        Commands::Ingest {
            file,
            title,
            meeting_id,
        } => handle_ingest(&cfg, &file, title, meeting_id).await,
        Commands::Analyze { id, quick, types } => handle_analyze(&cfg, &id, quick, types).await,
        Commands::Ask { id, question } => handle_ask(&cfg, &id, &question).await,
        Commands::Report { id, json } => handle_report(&cfg, id, json).await,
        Commands::List { limit } => handle_list(&cfg, limit).await,
        Commands::ProcessPending { limit } => handle_process_pending(&cfg, limit).await,
        Commands::Index { id } => handle_index(&cfg, &id).await,
        Commands::Search {
            id,
            query,
            limit,
            speaker,
        } => handle_search(&cfg, &id, &query, limit, speaker).await,
        Commands::Stats { id } => handle_stats(&cfg, id).await,
        Commands::Models { action } => handle_models(&cfg, action).await,
        Commands::Daemon => handle_daemon(&cfg).await,
        Commands::Submit { id, types } => handle_submit(&cfg, id, types).await,
        Commands::Status { job } => handle_status(&cfg, job).await,
        Commands::Cancel { job } => handle_cancel(&cfg, job).await,
        Commands::Shutdown => handle_shutdown(&cfg).await,
        Commands::Config { action } => handle_config(&cfg, action).await,
    }
}

fn open_database(cfg: &DealscopeConfig) -> Result<Database> {
    config::loader::ensure_directories(cfg)?;
    Database::open(config::loader::database_path(cfg)?)
}

fn stored_transcript(db: &Database, meeting_id: &MeetingId) -> Result<String> {
    db.get_transcript_by_id(meeting_id)?
        .map(|t| t.raw_text)
        .ok_or_else(|| DealscopeError::TranscriptNotFound(meeting_id.to_string()))
}

fn pipeline_options(cfg: &DealscopeConfig, types: Option<String>) -> Result<PipelineOptions> {
    match types {
        Some(types) => Ok(PipelineOptions::default().with_types(AnalysisType::parse_list(&types)?)),
        None => PipelineOptions::from_config(&cfg.pipeline),
    }
}

async fn handle_ingest(
    cfg: &DealscopeConfig,
    file: &Path,
    title: Option<String>,
    meeting_id: Option<String>,
) -> Result<()> {
    let raw_text = std::fs::read_to_string(file)?;
    if raw_text.trim().is_empty() {
        return Err(DealscopeError::Config(format!("Transcript file is empty: {}", file.display())));
    }

    let db = open_database(cfg)?;

    let meeting = match meeting_id {
        Some(id) => {
            let mut meeting = db
                .get_meeting(&MeetingId::from_string(id.clone()))?
                .ok_or(DealscopeError::MeetingNotFound(id))?;
            if let Some(title) = title {
                meeting.title = title;
            }
            meeting.status = MeetingStatus::Pending;
            meeting.source_path = Some(file.to_path_buf());
            db.update_meeting(&meeting)?;
            meeting
        }
        None => {
            let title = title.unwrap_or_else(|| {
                file.file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| "Untitled call".to_string())
            });
            let mut meeting = Meeting::new(title);
            meeting.source_path = Some(file.to_path_buf());
            db.insert_meeting(&meeting)?;
            meeting
        }
    };

    db.upsert_transcript(&meeting.id, &raw_text)?;
    let segments = crate::transcript::parse_to_segments(&raw_text);

    println!("Imported \"{}\" ({} segments)", meeting.title, segments.len());
    println!("Meeting ID: {}", meeting.id);
    println!("Analyze with: dealscope analyze {}", meeting.id);
    Ok(())
}

/// Run the full pipeline and persist the outcome, writing a markdown note on success.
async fn analyze_and_record(
    cfg: &DealscopeConfig,
    pipeline: &AnalysisPipeline,
    db: &Database,
    meeting: &Meeting,
    options: PipelineOptions,
) -> Result<PipelineResult> {
    let raw_text = stored_transcript(db, &meeting.id)?;
    db.update_meeting_status(&meeting.id, MeetingStatus::Processing)?;

    let result = pipeline
        .run_full(meeting.id.as_str(), &raw_text, options)
        .await;
    record_pipeline_result(db, &result)?;

    if result.success {
        let writer = ReportWriter::new(config::loader::notes_dir(cfg)?);
        let path = writer.write(meeting, &result.report, result.quick_summary.as_deref())?;
        let mut updated = meeting.clone();
        updated.status = MeetingStatus::Complete;
        updated.notes_path = Some(path);
        db.update_meeting(&updated)?;
    }

    Ok(result)
}

async fn handle_analyze(
    cfg: &DealscopeConfig,
    id: &str,
    quick: bool,
    types: Option<String>,
) -> Result<()> {
    let db = open_database(cfg)?;
    let meeting_id = MeetingId::from_string(id.to_string());
    let meeting = db
        .get_meeting(&meeting_id)?
        .ok_or_else(|| DealscopeError::MeetingNotFound(id.to_string()))?;

    let pipeline = AnalysisPipeline::from_config(cfg)?;

    if quick {
        let raw_text = stored_transcript(&db, &meeting_id)?;
        println!("Running quick analysis for \"{}\"...", meeting.title);
        let summary = pipeline.run_quick(id, &raw_text).await?;
        println!("\n{}\n", summary);
        return Ok(());
    }

    let options = pipeline_options(cfg, types)?;
    println!("Analyzing \"{}\" ({:?})...", meeting.title, options.analysis_types);

    let result = analyze_and_record(cfg, &pipeline, &db, &meeting, options).await?;
    print_result(&result);

    if !result.success {
        return Err(DealscopeError::PipelineFailed {
            meeting_id: id.to_string(),
            message: result.error.unwrap_or_default(),
        });
    }
    Ok(())
}

fn print_result(result: &PipelineResult) {
    if !result.success {
        eprintln!(
            "Analysis failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
        return;
    }

    let report = &result.report;
    println!("\n{}\n", report.executive_summary);
    println!(
        "Script adherence: {:.0}/100",
        report.script_adherence.overall_score
    );
    println!(
        "ICP fit:          {} ({:.0}/100)",
        report.icp_fit.status, report.icp_fit.overall_score
    );
    println!(
        "Objections:       {} ({} handled well)",
        report.objections.kpis.total, report.objections.kpis.handled_well
    );
    println!("Next action:      {}", report.next_action.action);
    println!(
        "\n{} tokens, {} ms, models: {}",
        result.stats.total_tokens,
        result.stats.elapsed_ms,
        result
            .stats
            .models_used
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    );
}

async fn handle_ask(cfg: &DealscopeConfig, id: &str, question: &str) -> Result<()> {
    let db = open_database(cfg)?;
    let meeting_id = MeetingId::from_string(id.to_string());
    let raw_text = stored_transcript(&db, &meeting_id)?;
    let report = db.get_latest_report(&meeting_id)?;

    let pipeline = AnalysisPipeline::from_config(cfg)?;
    let request = ChatRequest::new(id, question)
        .with_report(report)
        .with_transcript(raw_text);

    let answer = pipeline.answer(&request).await?;
    println!("{}", answer.answer);
    tracing::debug!(
        "Answered with {:?} using {} excerpts",
        answer.strategy,
        answer.evidence_count
    );
    Ok(())
}

async fn handle_report(cfg: &DealscopeConfig, id: Option<String>, json: bool) -> Result<()> {
    let db = open_database(cfg)?;

    let meeting_id = match id {
        Some(id) => id,
        None => select_meeting_interactive(&db)?,
    };

    let meeting = db
        .get_meeting(&MeetingId::from_string(meeting_id.clone()))?
        .ok_or(DealscopeError::MeetingNotFound(meeting_id))?;

    match db.get_analysis(&meeting.id)? {
        Some(analysis) if json => {
            println!("{}", serde_json::to_string_pretty(&analysis.report)?);
        }
        Some(analysis) => {
            println!("{}", render_report(&meeting, &analysis.report, None));
        }
        None => {
            println!("\nNo analysis available for: {}", meeting.title);
            println!("Run: dealscope analyze {}\n", meeting.id);
        }
    }

    Ok(())
}

async fn handle_list(cfg: &DealscopeConfig, limit: usize) -> Result<()> {
    let db_path = config::loader::database_path(cfg)?;

    if !db_path.exists() {
        println!("No meetings imported yet.");
        return Ok(());
    }

    let db = Database::open(&db_path)?;
    let meetings = db.list_meetings(limit)?;

    if meetings.is_empty() {
        println!("No meetings imported yet.");
        return Ok(());
    }

    println!(
        "{:<36} {:<30} {:<10} {:<6} {:<6}",
        "ID", "Title", "Status", "Score", "ICP"
    );
    println!("{}", "-".repeat(92));

    for meeting in meetings {
        let analysis = db.get_analysis(&meeting.id)?;
        let (score, icp) = analysis
            .map(|a| (a.script_score.to_string(), a.icp_status))
            .unwrap_or_else(|| ("-".to_string(), "-".to_string()));

        println!(
            "{:<36} {:<30} {:<10} {:<6} {:<6}",
            meeting.id,
            truncate(&meeting.title, 28),
            meeting.status,
            score,
            icp
        );
    }

    Ok(())
}

async fn handle_process_pending(cfg: &DealscopeConfig, limit: usize) -> Result<()> {
    let db = open_database(cfg)?;
    let pending = db.find_pending_transcripts(limit)?;

    if pending.is_empty() {
        println!("No pending transcripts.");
        return Ok(());
    }

    let pipeline = AnalysisPipeline::from_config(cfg)?;
    let (mut succeeded, mut failed) = (0usize, 0usize);

    for transcript in pending {
        if db.has_analysis(&transcript.meeting_id)? {
            tracing::info!("Skipping {}: already analyzed", transcript.meeting_id);
            db.mark_transcript_processed(&transcript.meeting_id)?;
            continue;
        }

        let Some(meeting) = db.get_meeting(&transcript.meeting_id)? else {
            tracing::warn!("Transcript without meeting: {}", transcript.meeting_id);
            continue;
        };

        println!("Analyzing \"{}\" ({})...", meeting.title, meeting.id);
        let result =
            analyze_and_record(cfg, &pipeline, &db, &meeting, pipeline_options(cfg, None)?).await?;
        if result.success {
            succeeded += 1;
        } else {
            failed += 1;
            eprintln!(
                "  failed: {}",
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    println!("\nProcessed: {} succeeded, {} failed", succeeded, failed);
    Ok(())
}

async fn handle_index(cfg: &DealscopeConfig, id: &str) -> Result<()> {
    let db = open_database(cfg)?;
    let raw_text = stored_transcript(&db, &MeetingId::from_string(id.to_string()))?;

    let pipeline = AnalysisPipeline::from_config(cfg)?;
    let result = pipeline.rag().index_transcript(id, &raw_text).await?;

    println!(
        "Indexed {} chunks ({} segments, {} tokens, {} topics) with {} on {} in {} ms",
        result.chunk_count,
        result.stats.segments,
        result.stats.total_tokens,
        result.stats.topics_extracted,
        result.stats.embedding_model,
        result.stats.backend,
        result.stats.duration_ms
    );
    Ok(())
}

async fn handle_search(
    cfg: &DealscopeConfig,
    id: &str,
    query: &str,
    limit: Option<usize>,
    speaker: Option<String>,
) -> Result<()> {
    let pipeline = AnalysisPipeline::from_config(cfg)?;

    if !pipeline.rag().has_index(id).await? {
        println!("Meeting {} is not indexed. Run: dealscope index {}", id, id);
        return Ok(());
    }

    let options = SearchOptions {
        limit,
        filter: SearchFilter {
            speakers: speaker.into_iter().collect(),
            ..SearchFilter::default()
        },
        ..SearchOptions::default()
    };
    let mut results = pipeline.rag().search(id, query, &options).await?;
    if results.is_empty() && options.filter.speakers.is_empty() {
        tracing::debug!("No semantic hits for {:?}, trying keyword match", query);
        results = pipeline.rag().search_keywords(id, query, limit).await?;
    }

    if results.is_empty() {
        println!("No matching excerpts.");
        return Ok(());
    }

    for result in results {
        println!(
            "[{:.2}] {} - {} ({})",
            result.similarity,
            crate::transcript::format_timestamp(result.start_secs),
            crate::transcript::format_timestamp(result.end_secs),
            result.speakers.join(", ")
        );
        println!("  {}\n", truncate(&result.content.replace('\n', " "), 200));
    }
    Ok(())
}

async fn handle_stats(cfg: &DealscopeConfig, id: Option<String>) -> Result<()> {
    let pipeline = AnalysisPipeline::from_config(cfg)?;
    let stats = pipeline.rag().storage_stats(id.as_deref()).await?;

    println!("Backend:       {}", stats.backend);
    println!("Meetings:      {}", stats.meetings);
    println!("Embeddings:    {}", stats.embeddings);
    println!("Total tokens:  {}", stats.total_tokens);
    println!("Cache entries: {}", stats.cache_entries);

    let db_path = config::loader::database_path(cfg)?;
    if db_path.exists() {
        let db = Database::open(&db_path)?;
        println!("Analyses:      {}", db.count_analyses()?);
    }
    Ok(())
}

async fn handle_models(cfg: &DealscopeConfig, action: ModelCommands) -> Result<()> {
    match action {
        ModelCommands::Test => {
            if !cfg.llm.is_configured() {
                println!("No LLM configured. Set [llm] in {}", config::loader::config_path()?.display());
                return Ok(());
            }

            let pipeline = AnalysisPipeline::from_config(cfg)?;
            let availability = pipeline.engine().test_models().await;

            let mark = |ok: bool| if ok { "ok" } else { "unavailable" };
            println!(
                "General model:      {} ({})",
                availability.general_model,
                mark(availability.general_available)
            );
            match &availability.deep_context_model {
                Some(model) => println!(
                    "Deep-context model: {} ({})",
                    model,
                    mark(availability.deep_context_available)
                ),
                None => println!("Deep-context model: not configured"),
            }
        }
    }
    Ok(())
}

async fn handle_daemon(cfg: &DealscopeConfig) -> Result<()> {
    config::loader::ensure_directories(cfg)?;
    println!("Starting dealscope daemon...");
    crate::daemon::run_daemon(cfg).await
}

async fn connect_daemon(cfg: &DealscopeConfig) -> Result<Option<DaemonClient>> {
    match DaemonClient::connect(&config::loader::socket_path(cfg)?).await {
        Ok(client) => Ok(Some(client)),
        Err(_) => {
            eprintln!("Error: Daemon is not running. Start it with: dealscope daemon");
            Ok(None)
        }
    }
}

async fn handle_submit(cfg: &DealscopeConfig, id: String, types: Option<String>) -> Result<()> {
    let Some(mut client) = connect_daemon(cfg).await? else {
        return Ok(());
    };

    let analysis_types = types.map(|t| t.split(',').map(|s| s.trim().to_string()).collect());
    let request = DaemonRequest::Submit {
        meeting_id: id,
        analysis_types,
    };

    match client.send(request).await? {
        DaemonResponse::JobQueued { job_id, meeting_id } => {
            println!("Queued analysis of {} (job {})", meeting_id, job_id);
        }
        DaemonResponse::AlreadyQueued { job_id, meeting_id } => {
            println!("Meeting {} already has an active job: {}", meeting_id, job_id);
        }
        DaemonResponse::Error { message } => {
            eprintln!("Error: {}", message);
        }
        _ => {
            eprintln!("Unexpected response from daemon");
        }
    }
    Ok(())
}

async fn handle_status(cfg: &DealscopeConfig, job: Option<String>) -> Result<()> {
    let socket = config::loader::socket_path(cfg)?;
    if !is_daemon_running(&socket).await {
        println!("Daemon: not running");
        return Ok(());
    }

    let mut client = DaemonClient::connect(&socket).await?;
    let request = match job {
        Some(job_id) => DaemonRequest::JobStatus { job_id },
        None => DaemonRequest::GetStatus,
    };

    match client.send(request).await? {
        DaemonResponse::Status(status) => {
            println!("Daemon: running ({}s)", status.uptime_seconds);
            println!(
                "Jobs: {} queued, {} running, {} finished",
                status.queued, status.running_jobs, status.finished
            );
            for job in status.recent_jobs {
                println!("  {} {:<10} {}", job.job_id, job.state, job.meeting_id);
            }
        }
        DaemonResponse::Job(info) => {
            println!("Job {}: {}", info.job_id, info.state);
            println!("Meeting: {}", info.meeting_id);
            if let Some(error) = info.error {
                println!("Error: {}", error);
            }
        }
        DaemonResponse::Error { message } => {
            eprintln!("Error: {}", message);
        }
        _ => {
            eprintln!("Unexpected response from daemon");
        }
    }
    Ok(())
}

async fn handle_cancel(cfg: &DealscopeConfig, job_id: String) -> Result<()> {
    let Some(mut client) = connect_daemon(cfg).await? else {
        return Ok(());
    };

    match client.send(DaemonRequest::Cancel { job_id: job_id.clone() }).await? {
        DaemonResponse::Ok => println!("Cancelled job {}", job_id),
        DaemonResponse::Error { message } => eprintln!("Error: {}", message),
        _ => eprintln!("Unexpected response from daemon"),
    }
    Ok(())
}

async fn handle_shutdown(cfg: &DealscopeConfig) -> Result<()> {
    let Some(mut client) = connect_daemon(cfg).await? else {
        return Ok(());
    };

    match client.send(DaemonRequest::Shutdown).await? {
        DaemonResponse::Ok => println!("Daemon shutting down"),
        _ => eprintln!("Unexpected response from daemon"),
    }
    Ok(())
}

async fn handle_config(cfg: &DealscopeConfig, action: ConfigCommands) -> Result<()> {
    match action {
        ConfigCommands::Show => {
            println!("{}", toml::to_string_pretty(cfg)?);
        }
        ConfigCommands::Path => {
            println!("{}", config::loader::config_path()?.display());
        }
        ConfigCommands::Init => {
            let path = config::loader::config_path()?;
            if !path.exists() {
                config::loader::save_config(cfg)?;
            }
            config::loader::ensure_directories(cfg)?;
            println!("Configuration initialized at: {}", path.display());
            println!("\nSettings:");
            println!("  LLM provider:    {}", cfg.llm.provider);
            println!("  Embeddings:      {} ({})", cfg.embedding.provider, cfg.embedding.model);
            println!("  Vector store:    {}", cfg.vector_store.backend);
            println!("  Analysis types:  {}", cfg.pipeline.analysis_types.join(", "));
        }
    }
    Ok(())
}

fn select_meeting_interactive(db: &Database) -> Result<String> {
    use dialoguer::{theme::ColorfulTheme, Select};

    let meetings = db.list_meetings(20)?;

    if meetings.is_empty() {
        return Err(DealscopeError::Config("No meetings found".to_string()));
    }

    let items: Vec<String> = meetings
        .iter()
        .map(|m| {
            let date = m.created_at.format("%Y-%m-%d %H:%M");
            format!("{} | {:<10} | {}", date, m.status, truncate(&m.title, 40))
        })
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select a meeting")
        .items(&items)
        .default(0)
        .interact()
        .map_err(|e| DealscopeError::Config(format!("Selection cancelled: {}", e)))?;

    Ok(meetings[selection].id.0.clone())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
