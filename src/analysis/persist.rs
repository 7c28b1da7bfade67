use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::pipeline::PipelineResult;
use super::report::{ObjectionItem, SCRIPT_SCORE_MAX};
use crate::error::Result;

/// Objections scored at or above this were handled well.
pub const HANDLED_SCORE_THRESHOLD: f64 = 7.0;

fn quote_timestamp_regex() -> &'static Regex {
    static QUOTE_TS: OnceLock<Regex> = OnceLock::new();
    QUOTE_TS.get_or_init(|| {
        Regex::new(r"\[(\d{1,2}):(\d{2})(?::(\d{2}))?\]").expect("Failed to compile quote timestamp regex")
    })
}

/// Seconds from the first `[mm:ss]` or `[hh:mm:ss]` found anywhere in `text`, else 0.
pub fn quote_timestamp_secs(text: &str) -> u32 {
    let Some(caps) = quote_timestamp_regex().captures(text) else {
        return 0;
    };
    let field = |i: usize| -> u32 {
        caps.get(i)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0)
    };

    match caps.get(3) {
        Some(_) => field(1) * 3600 + field(2) * 60 + field(3),
        None => field(1) * 60 + field(2),
    }
}

/// `high`, `medium` or `low`; anything unrecognised becomes `low`.
pub fn normalize_icp_status(raw: &str) -> &'static str {
    match raw.trim().to_lowercase().as_str() {
        "high" => "high",
        "medium" => "medium",
        _ => "low",
    }
}

pub fn clamp_script_score(score: f64) -> u8 {
    if score.is_nan() {
        return 0;
    }
    score.round().clamp(0.0, SCRIPT_SCORE_MAX) as u8
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistableObjection {
    #[serde(rename = "type")]
    pub objection_type: String,
    pub text: String,
    pub timestamp: u32,
    pub handled: bool,
}

impl PersistableObjection {
    pub fn from_item(item: &ObjectionItem) -> Self {
        Self {
            objection_type: item.category.clone(),
            text: item.client_quote.clone(),
            timestamp: quote_timestamp_secs(&item.client_quote),
            handled: item.evaluation.score >= HANDLED_SCORE_THRESHOLD,
        }
    }
}

/// Flat row shape stored for one analysed meeting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistableAnalysis {
    pub meeting_id: String,
    pub script_score: u8,
    pub icp_status: String,
    pub executive_summary: String,
    pub objections: Vec<PersistableObjection>,
    pub report: Value,
    pub stats: Value,
}

impl PersistableAnalysis {
    pub fn from_result(result: &PipelineResult) -> Result<Self> {
        let report = &result.report;
        Ok(Self {
            meeting_id: result.meeting_id.clone(),
            script_score: clamp_script_score(report.script_adherence.overall_score),
            icp_status: normalize_icp_status(report.icp_fit.status.as_str()).to_string(),
            executive_summary: report.executive_summary.clone(),
            objections: report
                .objections
                .items
                .iter()
                .map(PersistableObjection::from_item)
                .collect(),
            report: serde_json::to_value(report)?,
            stats: serde_json::to_value(&result.stats)?,
        })
    }
}
