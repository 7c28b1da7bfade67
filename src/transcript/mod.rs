use serde::{Deserialize, Serialize};

pub mod parser;

pub use parser::parse_to_segments;

/// One speaker utterance parsed from a raw transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub speaker: Option<String>,
    pub text: String,
    pub start_secs: Option<f64>,
    pub end_secs: Option<f64>,
    /// Timestamp exactly as it appeared in the source, e.g. "00:12:31"
    pub timestamp_label: Option<String>,
}

impl TranscriptSegment {
    pub fn new(speaker: &str, text: &str, start_secs: f64, end_secs: f64) -> Self {
        Self {
            speaker: Some(speaker.to_string()),
            text: text.to_string(),
            start_secs: Some(start_secs),
            end_secs: Some(end_secs),
            timestamp_label: Some(format_timestamp(start_secs)),
        }
    }

    pub fn speaker_or_unknown(&self) -> &str {
        self.speaker.as_deref().unwrap_or("Unknown")
    }

    /// Label used when rendering the segment: the original label if present.
    pub fn display_timestamp(&self) -> String {
        match (&self.timestamp_label, self.start_secs) {
            (Some(label), _) => label.clone(),
            (None, Some(start)) => format_timestamp(start),
            (None, None) => "--:--".to_string(),
        }
    }

    /// `[timestamp] speaker: text`, the line format shared by chunks, prompts and chat.
    pub fn render(&self) -> String {
        format!(
            "[{}] {}: {}",
            self.display_timestamp(),
            self.speaker_or_unknown(),
            self.text
        )
    }
}

pub fn format_timestamp(secs: f64) -> String {
    let total_seconds = secs.max(0.0).floor() as u64;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

/// Parse "MM:SS" or "HH:MM:SS" into seconds.
pub fn parse_timestamp_label(label: &str) -> Option<f64> {
    let parts: Vec<&str> = label.trim().split(':').collect();
    let numbers: Option<Vec<u64>> = parts.iter().map(|p| p.parse::<u64>().ok()).collect();
    let numbers = numbers?;

    match numbers.as_slice() {
        [m, s] if *s < 60 => Some((m * 60 + s) as f64),
        [h, m, s] if *m < 60 && *s < 60 => Some((h * 3600 + m * 60 + s) as f64),
        _ => None,
    }
}
