use std::sync::OnceLock;

use regex::Regex;

use crate::transcript::TranscriptSegment;

const FULL_QUESTION_BONUS: i32 = 5;
const KEYWORD_BONUS: i32 = 2;
const SELLER_PENALTY: i32 = 1;

const STOPWORDS: &[&str] = &[
    "algum", "alguma", "aquele", "aquela", "cliente", "como", "disse", "elas", "eles", "essa",
    "esse", "esta", "está", "estão", "este", "falou", "isso", "mais", "muito", "onde", "para",
    "pela", "pelo", "porque", "quais", "qual", "quando", "quem", "reunião", "sobre", "teve",
    "about", "does", "from", "have", "that", "what", "when", "where", "which", "with",
];

fn seller_regex() -> &'static Regex {
    static SELLER: OnceLock<Regex> = OnceLock::new();
    SELLER.get_or_init(|| {
        Regex::new(r"(?i)\b(vendedor|vendedora|seller|sales|sdr|closer|executivo de vendas|consultor)\b")
            .expect("Failed to compile seller regex")
    })
}

pub fn is_seller(speaker: &str) -> bool {
    seller_regex().is_match(speaker)
}

/// Lowercased question tokens longer than three characters, minus stopwords.
pub fn question_keywords(question: &str) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    for token in question
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 3)
    {
        if !STOPWORDS.contains(&token) && !keywords.iter().any(|k| k == token) {
            keywords.push(token.to_string());
        }
    }
    keywords
}

pub fn score_segment(segment: &TranscriptSegment, question: &str, keywords: &[String]) -> i32 {
    let text = segment.text.to_lowercase();
    let question = question.trim().to_lowercase();

    let mut score = 0;
    if !question.is_empty() && text.contains(&question) {
        score += FULL_QUESTION_BONUS;
    }
    score += KEYWORD_BONUS * keywords.iter().filter(|k| text.contains(k.as_str())).count() as i32;
    if segment.speaker.as_deref().is_some_and(is_seller) {
        score -= SELLER_PENALTY;
    }
    score
}

/// Best `top_n` positively scored segments, highest first with ties in transcript order.
/// When nothing scores above zero, the first `top_n` segments are returned instead.
pub fn rank_segments<'a>(
    question: &str,
    segments: &'a [TranscriptSegment],
    top_n: usize,
) -> Vec<&'a TranscriptSegment> {
    let keywords = question_keywords(question);

    let mut scored: Vec<(i32, usize)> = segments
        .iter()
        .enumerate()
        .map(|(i, segment)| (score_segment(segment, question, &keywords), i))
        .filter(|(score, _)| *score > 0)
        .collect();

    if scored.is_empty() {
        tracing::debug!("No segment matched the question, using the opening segments");
        return segments.iter().take(top_n).collect();
    }

    scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    scored
        .into_iter()
        .take(top_n)
        .map(|(_, i)| &segments[i])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segments() -> Vec<TranscriptSegment> {
        vec![
            TranscriptSegment::new("Carlos (Vendedor)", "Bom dia, vamos falar de preço?", 0.0, 10.0),
            TranscriptSegment::new("Marina", "O preço está caro para nós", 10.0, 20.0),
            TranscriptSegment::new("Marina", "A equipe vive em sobrecarga", 20.0, 30.0),
            TranscriptSegment::new("Carlos (Vendedor)", "Podemos parcelar o preço", 30.0, 40.0),
        ]
    }

    #[test]
    fn test_keywords_skip_short_tokens_and_stopwords() {
        let keywords = question_keywords("Qual foi a objeção sobre o preço?");
        assert_eq!(keywords, vec!["objeção".to_string(), "preço".to_string()]);
    }

    #[test]
    fn test_full_question_match_outweighs_keywords() {
        let segs = segments();
        let keywords = question_keywords("está caro");
        assert_eq!(score_segment(&segs[1], "está caro", &keywords), 5 + 2);
    }

    #[test]
    fn test_seller_segments_rank_below_customer() {
        let segs = segments();
        let ranked = rank_segments("preço", &segs, 8);

        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].text, "O preço está caro para nós");
        assert!(ranked[1..].iter().all(|s| s.speaker.as_deref() == Some("Carlos (Vendedor)")));
    }

    #[test]
    fn test_falls_back_to_opening_segments() {
        let segs = segments();
        let ranked = rank_segments("integração com ERP", &segs, 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].start_secs, Some(0.0));
        assert_eq!(ranked[1].start_secs, Some(10.0));
    }

    #[test]
    fn test_top_n_caps_results() {
        let segs = segments();
        assert_eq!(rank_segments("preço", &segs, 1).len(), 1);
    }
}
