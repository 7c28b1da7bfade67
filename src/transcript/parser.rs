use crate::transcript::{format_timestamp, parse_timestamp_label, TranscriptSegment};
use regex::Regex;
use std::sync::OnceLock;

/// Duration assigned to the last segment and to every line of an unstructured transcript.
pub const FALLBACK_SEGMENT_SECS: f64 = 30.0;

const UNKNOWN_SPEAKER: &str = "Unknown";

/// `00:12:31 - Speaker: text`
fn hms_dash_regex() -> &'static Regex {
    static HMS_DASH: OnceLock<Regex> = OnceLock::new();
    HMS_DASH.get_or_init(|| {
        Regex::new(r"^(?P<ts>\d{1,2}:\d{2}:\d{2})\s*-\s*(?P<speaker>[^:]+?):\s*(?P<text>.+)$")
            .expect("Failed to compile HH:MM:SS regex")
    })
}

/// `2:31 - Speaker: text`
fn ms_dash_regex() -> &'static Regex {
    static MS_DASH: OnceLock<Regex> = OnceLock::new();
    MS_DASH.get_or_init(|| {
        Regex::new(r"^(?P<ts>\d{1,2}:\d{2})\s*-\s*(?P<speaker>[^:]+?):\s*(?P<text>.+)$")
            .expect("Failed to compile M:SS regex")
    })
}

/// `[00:12:31] Speaker: text`
fn bracketed_regex() -> &'static Regex {
    static BRACKETED: OnceLock<Regex> = OnceLock::new();
    BRACKETED.get_or_init(|| {
        Regex::new(
            r"^\[(?P<ts>(?:\d{1,2}:)?\d{1,2}:\d{2})\]\s*(?P<speaker>[^:\]]+?):\s*(?P<text>.+)$",
        )
        .expect("Failed to compile bracketed timestamp regex")
    })
}

fn patterns() -> [&'static Regex; 3] {
    [hms_dash_regex(), ms_dash_regex(), bracketed_regex()]
}

/// Parse raw transcript text into speaker segments.
///
/// The first timestamp pattern that matches at least one line is used for the whole
/// transcript. Lines that do not match it are treated as continuations of the previous
/// utterance. When no pattern matches, every non-empty line becomes its own segment
/// with a synthetic 30-second timestamp and speaker "Unknown".
pub fn parse_to_segments(raw: &str) -> Vec<TranscriptSegment> {
    let lines: Vec<&str> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    if lines.is_empty() {
        return Vec::new();
    }

    for pattern in patterns() {
        let segments = parse_with_pattern(pattern, &lines);
        if !segments.is_empty() {
            tracing::debug!(
                "Parsed {} segments using pattern {}",
                segments.len(),
                pattern.as_str()
            );
            return segments;
        }
    }

    tracing::warn!(
        "No timestamp pattern matched, falling back to line-based segmentation ({} lines)",
        lines.len()
    );
    line_fallback(&lines)
}

fn parse_with_pattern(pattern: &Regex, lines: &[&str]) -> Vec<TranscriptSegment> {
    let mut segments: Vec<TranscriptSegment> = Vec::new();

    for line in lines {
        match pattern.captures(line) {
            Some(caps) => {
                let label = caps["ts"].to_string();
                segments.push(TranscriptSegment {
                    speaker: Some(caps["speaker"].trim().to_string()),
                    text: caps["text"].trim().to_string(),
                    start_secs: parse_timestamp_label(&label),
                    end_secs: None,
                    timestamp_label: Some(label),
                });
            }
            None => {
                if let Some(last) = segments.last_mut() {
                    last.text.push(' ');
                    last.text.push_str(line);
                }
            }
        }
    }

    fill_end_times(&mut segments);
    segments
}

fn fill_end_times(segments: &mut [TranscriptSegment]) {
    let starts: Vec<Option<f64>> = segments.iter().map(|s| s.start_secs).collect();

    for (i, segment) in segments.iter_mut().enumerate() {
        let Some(start) = segment.start_secs else {
            continue;
        };
        let next_start = starts.get(i + 1).copied().flatten();
        segment.end_secs = Some(match next_start {
            Some(next) if next >= start => next,
            _ => start + FALLBACK_SEGMENT_SECS,
        });
    }
}

fn line_fallback(lines: &[&str]) -> Vec<TranscriptSegment> {
    lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let start = i as f64 * FALLBACK_SEGMENT_SECS;
            TranscriptSegment {
                speaker: Some(UNKNOWN_SPEAKER.to_string()),
                text: line.to_string(),
                start_secs: Some(start),
                end_secs: Some(start + FALLBACK_SEGMENT_SECS),
                timestamp_label: Some(format_timestamp(start)),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_hms_dash_format() {
        let raw = "00:00:05 - Carlos (Vendedor): Bom dia, tudo bem?\n\
                   00:00:12 - Marina: Tudo, obrigada.\n";
        let segments = parse_to_segments(raw);

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].speaker.as_deref(), Some("Carlos (Vendedor)"));
        assert_eq!(segments[0].start_secs, Some(5.0));
        assert_eq!(segments[0].end_secs, Some(12.0));
        assert_eq!(segments[1].end_secs, Some(42.0));
        assert_eq!(segments[1].timestamp_label.as_deref(), Some("00:00:12"));
    }

    #[test]
    fn test_parses_short_dash_format() {
        let raw = "0:05 - Ana: Olá\n1:10 - Bruno: Oi Ana";
        let segments = parse_to_segments(raw);

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1].start_secs, Some(70.0));
        assert_eq!(segments[1].speaker.as_deref(), Some("Bruno"));
    }

    #[test]
    fn test_parses_bracketed_format() {
        let raw = "[00:01:00] Ana: Quanto custa?\n[00:01:30] Bruno: Depende do plano.";
        let segments = parse_to_segments(raw);

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].start_secs, Some(60.0));
        assert_eq!(segments[0].text, "Quanto custa?");
    }

    #[test]
    fn test_continuation_lines_are_appended() {
        let raw = "00:00:05 - Ana: Primeira linha\ncontinua aqui\n00:00:20 - Bruno: Ok";
        let segments = parse_to_segments(raw);

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "Primeira linha continua aqui");
    }

    #[test]
    fn test_unstructured_text_falls_back_to_lines() {
        let raw = "primeira frase\n\nsegunda frase\nterceira frase";
        let segments = parse_to_segments(raw);

        assert_eq!(segments.len(), 3);
        assert!(segments
            .iter()
            .all(|s| s.speaker.as_deref() == Some("Unknown")));
        assert_eq!(segments[2].start_secs, Some(60.0));
        assert_eq!(segments[2].end_secs, Some(90.0));
    }

    #[test]
    fn test_empty_transcript_yields_no_segments() {
        assert!(parse_to_segments("").is_empty());
        assert!(parse_to_segments("   \n\n  ").is_empty());
    }
}
