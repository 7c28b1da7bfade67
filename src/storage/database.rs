use crate::analysis::persist::PersistableAnalysis;
use crate::analysis::FullAnalysisReport;
use crate::error::Result;
use crate::storage::migrations;
use crate::storage::{
    Meeting, MeetingId, MeetingRepository, MeetingStatus, StoredAnalysis, StoredTranscript,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::path::Path;

const MEETING_COLUMNS: &str = "id, title, created_at, status, source_path, notes_path";

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrations::run_migrations(&conn)?;
        Ok(Self { conn })
    }

    pub fn insert_meeting(&self, meeting: &Meeting) -> Result<()> {
        self.conn.execute(
            "INSERT INTO meetings (id, title, created_at, status, source_path, notes_path)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                meeting.id.0,
                meeting.title,
                meeting.created_at.to_rfc3339(),
                meeting.status.to_string(),
                meeting.source_path.as_ref().map(|p| p.to_string_lossy().to_string()),
                meeting.notes_path.as_ref().map(|p| p.to_string_lossy().to_string()),
            ],
        )?;
        Ok(())
    }

    pub fn get_meeting(&self, id: &MeetingId) -> Result<Option<Meeting>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM meetings WHERE id = ?1", MEETING_COLUMNS))?;

        let meeting = stmt.query_row([&id.0], row_to_meeting).optional()?;
        Ok(meeting)
    }

    pub fn update_meeting(&self, meeting: &Meeting) -> Result<()> {
        self.conn.execute(
            "UPDATE meetings SET title = ?2, status = ?3, source_path = ?4, notes_path = ?5
             WHERE id = ?1",
            params![
                meeting.id.0,
                meeting.title,
                meeting.status.to_string(),
                meeting.source_path.as_ref().map(|p| p.to_string_lossy().to_string()),
                meeting.notes_path.as_ref().map(|p| p.to_string_lossy().to_string()),
            ],
        )?;
        Ok(())
    }

    pub fn delete_meeting(&self, id: &MeetingId) -> Result<()> {
        self.conn.execute("DELETE FROM meetings WHERE id = ?1", [&id.0])?;
        Ok(())
    }

    pub fn list_meetings(&self, limit: usize) -> Result<Vec<Meeting>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM meetings ORDER BY created_at DESC LIMIT ?1",
            MEETING_COLUMNS
        ))?;

        let meetings = stmt
            .query_map([limit as i64], row_to_meeting)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(meetings)
    }

    /// Store the raw transcript, replacing a previous one and marking it unprocessed.
    pub fn upsert_transcript(&self, meeting_id: &MeetingId, raw_text: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO transcripts (meeting_id, raw_text, processed, created_at)
             VALUES (?1, ?2, 0, ?3)
             ON CONFLICT(meeting_id) DO UPDATE SET raw_text = excluded.raw_text, processed = 0",
            params![meeting_id.0, raw_text, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get_analysis(&self, meeting_id: &MeetingId) -> Result<Option<StoredAnalysis>> {
        let row = self
            .conn
            .query_row(
                "SELECT script_score, icp_status, executive_summary, report_json, created_at
                 FROM analyses WHERE meeting_id = ?1",
                [&meeting_id.0],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((script_score, icp_status, executive_summary, report_json, created_at)) = row
        else {
            return Ok(None);
        };

        Ok(Some(StoredAnalysis {
            meeting_id: meeting_id.clone(),
            script_score: script_score.clamp(0, 100) as u8,
            icp_status,
            executive_summary,
            report: serde_json::from_str(&report_json)?,
            created_at: parse_time(&created_at),
        }))
    }

    pub fn count_analyses(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM analyses", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl MeetingRepository for Database {
    fn get_transcript_by_id(&self, meeting_id: &MeetingId) -> Result<Option<StoredTranscript>> {
        let transcript = self
            .conn
            .query_row(
                "SELECT meeting_id, raw_text, processed, created_at
                 FROM transcripts WHERE meeting_id = ?1",
                [&meeting_id.0],
                row_to_transcript,
            )
            .optional()?;
        Ok(transcript)
    }

    fn insert_analysis(&self, analysis: &PersistableAnalysis) -> Result<()> {
        self.conn.execute(
            "INSERT INTO analyses (meeting_id, script_score, icp_status, executive_summary,
                                   objections_json, report_json, stats_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(meeting_id) DO UPDATE SET
                script_score = excluded.script_score,
                icp_status = excluded.icp_status,
                executive_summary = excluded.executive_summary,
                objections_json = excluded.objections_json,
                report_json = excluded.report_json,
                stats_json = excluded.stats_json,
                created_at = excluded.created_at",
            params![
                analysis.meeting_id,
                analysis.script_score,
                analysis.icp_status,
                analysis.executive_summary,
                serde_json::to_string(&analysis.objections)?,
                analysis.report.to_string(),
                analysis.stats.to_string(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn mark_transcript_processed(&self, meeting_id: &MeetingId) -> Result<()> {
        self.conn.execute(
            "UPDATE transcripts SET processed = 1 WHERE meeting_id = ?1",
            [&meeting_id.0],
        )?;
        Ok(())
    }

    fn update_meeting_status(&self, meeting_id: &MeetingId, status: MeetingStatus) -> Result<()> {
        self.conn.execute(
            "UPDATE meetings SET status = ?2 WHERE id = ?1",
            params![meeting_id.0, status.to_string()],
        )?;
        Ok(())
    }

    fn find_pending_transcripts(&self, limit: usize) -> Result<Vec<StoredTranscript>> {
        let mut stmt = self.conn.prepare(
            "SELECT meeting_id, raw_text, processed, created_at
             FROM transcripts WHERE processed = 0 ORDER BY created_at ASC LIMIT ?1",
        )?;

        let transcripts = stmt
            .query_map([limit as i64], row_to_transcript)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(transcripts)
    }

    fn has_analysis(&self, meeting_id: &MeetingId) -> Result<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM analyses WHERE meeting_id = ?1)",
            [&meeting_id.0],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn get_latest_report(&self, meeting_id: &MeetingId) -> Result<Option<FullAnalysisReport>> {
        Ok(self.get_analysis(meeting_id)?.map(|a| a.report))
    }
}

fn parse_time(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_meeting(row: &Row<'_>) -> rusqlite::Result<Meeting> {
    Ok(Meeting {
        id: MeetingId::from_string(row.get(0)?),
        title: row.get(1)?,
        created_at: parse_time(&row.get::<_, String>(2)?),
        status: MeetingStatus::parse(&row.get::<_, String>(3)?),
        source_path: row
            .get::<_, Option<String>>(4)?
            .map(std::path::PathBuf::from),
        notes_path: row
            .get::<_, Option<String>>(5)?
            .map(std::path::PathBuf::from),
    })
}

fn row_to_transcript(row: &Row<'_>) -> rusqlite::Result<StoredTranscript> {
    Ok(StoredTranscript {
        meeting_id: MeetingId::from_string(row.get(0)?),
        raw_text: row.get(1)?,
        processed: row.get::<_, i64>(2)? != 0,
        created_at: parse_time(&row.get::<_, String>(3)?),
    })
}

trait OptionalExt<T> {
    fn optional(self) -> std::result::Result<Option<T>, rusqlite::Error>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> std::result::Result<Option<T>, rusqlite::Error> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::validator::{sample_report_json, validate_value};
    use crate::analysis::{PipelineResult, ProcessingStats};
    use crate::storage::record_pipeline_result;
    use std::collections::BTreeMap;

    fn meeting_with_transcript(db: &Database, title: &str) -> Meeting {
        let meeting = Meeting::new(title.to_string());
        db.insert_meeting(&meeting).unwrap();
        db.upsert_transcript(&meeting.id, "00:00:05 - Ana: Olá").unwrap();
        meeting
    }

    fn pipeline_result(meeting_id: &MeetingId, success: bool) -> PipelineResult {
        PipelineResult {
            success,
            meeting_id: meeting_id.0.clone(),
            report: if success {
                validate_value(&sample_report_json()).unwrap()
            } else {
                FullAnalysisReport::empty()
            },
            stats: ProcessingStats::default(),
            raw_analyses: BTreeMap::new(),
            quick_summary: None,
            error: (!success).then(|| "boom".to_string()),
        }
    }

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory();
        assert!(db.is_ok());
    }

    #[test]
    fn test_meeting_crud() {
        let db = Database::open_in_memory().unwrap();

        let meeting = Meeting::new("Discovery Acme".to_string());
        let id = meeting.id.clone();
        db.insert_meeting(&meeting).unwrap();

        let mut loaded = db.get_meeting(&id).unwrap().unwrap();
        assert_eq!(loaded.title, "Discovery Acme");
        assert_eq!(loaded.status, MeetingStatus::Pending);

        loaded.title = "Discovery Acme (2)".to_string();
        db.update_meeting(&loaded).unwrap();
        assert_eq!(db.get_meeting(&id).unwrap().unwrap().title, "Discovery Acme (2)");

        assert_eq!(db.list_meetings(10).unwrap().len(), 1);

        db.delete_meeting(&id).unwrap();
        assert!(db.get_meeting(&id).unwrap().is_none());
    }

    #[test]
    fn test_pending_transcripts_until_processed() {
        let db = Database::open_in_memory().unwrap();
        let a = meeting_with_transcript(&db, "A");
        let b = meeting_with_transcript(&db, "B");

        assert_eq!(db.find_pending_transcripts(10).unwrap().len(), 2);
        assert_eq!(db.find_pending_transcripts(1).unwrap().len(), 1);

        db.mark_transcript_processed(&a.id).unwrap();
        let pending = db.find_pending_transcripts(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].meeting_id, b.id);

        db.upsert_transcript(&a.id, "00:00:05 - Ana: Nova versão").unwrap();
        let transcript = db.get_transcript_by_id(&a.id).unwrap().unwrap();
        assert!(!transcript.processed);
        assert!(transcript.raw_text.contains("Nova versão"));
    }

    #[test]
    fn test_successful_result_replaces_previous_analysis() {
        let db = Database::open_in_memory().unwrap();
        let meeting = meeting_with_transcript(&db, "Acme");

        record_pipeline_result(&db, &pipeline_result(&meeting.id, true)).unwrap();
        record_pipeline_result(&db, &pipeline_result(&meeting.id, true)).unwrap();

        assert_eq!(db.count_analyses().unwrap(), 1);
        assert!(db.has_analysis(&meeting.id).unwrap());
        assert_eq!(
            db.get_meeting(&meeting.id).unwrap().unwrap().status,
            MeetingStatus::Complete
        );
        assert!(db.get_transcript_by_id(&meeting.id).unwrap().unwrap().processed);

        let report = db.get_latest_report(&meeting.id).unwrap().unwrap();
        assert_eq!(report.executive_summary, "Reunião produtiva");
        let stored = db.get_analysis(&meeting.id).unwrap().unwrap();
        assert_eq!(stored.script_score, 70);
        assert_eq!(stored.icp_status, "medium");
    }

    #[test]
    fn test_failed_result_stores_no_report() {
        let db = Database::open_in_memory().unwrap();
        let meeting = meeting_with_transcript(&db, "Acme");

        record_pipeline_result(&db, &pipeline_result(&meeting.id, false)).unwrap();

        assert!(!db.has_analysis(&meeting.id).unwrap());
        assert_eq!(
            db.get_meeting(&meeting.id).unwrap().unwrap().status,
            MeetingStatus::Failed
        );
        assert_eq!(db.find_pending_transcripts(10).unwrap().len(), 1);
    }
}
