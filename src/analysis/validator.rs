//! Lenient JSON extraction from model output and strict report validation.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::analysis::report::{
    CriterionClassification, CriterionEvaluation, FullAnalysisReport, IcpFit, IcpStatus,
    NextAction, ObjectionItem, ObjectionKpis, ObjectionsSection, OutreachMessage, PursuitStatus,
    ResponseEvaluation, ScriptAdherence, StageEvaluation, Suggestion, WorthPursuing,
    CRITERION_SCORE_MAX, ICP_CRITERIA, ICP_SCORE_MAX, OBJECTION_SCORE_MAX, SCRIPT_SCORE_MAX,
    SCRIPT_STAGES, STAGE_SCORE_MAX,
};
use crate::error::{DealscopeError, Result};

fn code_fence_regex() -> &'static Regex {
    static CODE_FENCE: OnceLock<Regex> = OnceLock::new();
    CODE_FENCE.get_or_init(|| {
        Regex::new(r"(?s)```[a-zA-Z]*\s*\n?(.*?)```").expect("Failed to compile code fence regex")
    })
}

/// Pull a JSON value out of possibly decorated model output.
///
/// Candidates are the body of each Markdown code fence, then the whole text. Each candidate
/// is tried as a direct parse, then every balanced `{...}` / `[...]` block from left to
/// right, each with trailing commas repaired when the plain parse fails. `context` names
/// the caller in the error.
pub fn extract_json(raw: &str, context: &str) -> Result<Value> {
    let trimmed = raw.trim();
    let fenced = code_fence_regex()
        .captures_iter(trimmed)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim());

    for candidate in fenced.chain(std::iter::once(trimmed)) {
        if let Some(value) = parse_candidate(candidate, context) {
            return Ok(value);
        }
    }

    Err(DealscopeError::InvalidAnalysisFormat {
        context: context.to_string(),
        reason: format!("no parseable JSON in {} chars of output", raw.len()),
    })
}

fn parse_candidate(text: &str, context: &str) -> Option<Value> {
    if let Some(value) = parse_lenient(text) {
        return Some(value);
    }

    for (start, _) in text.char_indices().filter(|(_, c)| *c == '{' || *c == '[') {
        if let Some(end) = balanced_end(text, start) {
            if let Some(value) = parse_lenient(&text[start..end]) {
                tracing::debug!("Recovered JSON block for {} at offset {}", context, start);
                return Some(value);
            }
        }
    }
    None
}

fn parse_lenient(text: &str) -> Option<Value> {
    serde_json::from_str::<Value>(text)
        .ok()
        .or_else(|| serde_json::from_str::<Value>(&strip_trailing_commas(text)).ok())
}

/// Drop commas that directly precede a closing bracket, outside string literals.
fn strip_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_comma: Option<String> = None;
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        if let Some(mut held) = pending_comma.take() {
            if c.is_whitespace() {
                held.push(c);
                pending_comma = Some(held);
                continue;
            }
            if c == '}' || c == ']' {
                out.push_str(&held[1..]);
            } else {
                out.push_str(&held);
            }
        }

        match c {
            ',' => pending_comma = Some(String::from(",")),
            '"' => {
                in_string = true;
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    if let Some(held) = pending_comma {
        out.push_str(&held);
    }
    out
}

/// Byte offset just past the bracket closing the one at `start`, ignoring brackets inside
/// string literals.
fn balanced_end(text: &str, start: usize) -> Option<usize> {
    let mut closers: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => closers.push('}'),
            '[' => closers.push(']'),
            '}' | ']' => {
                if closers.pop() != Some(c) {
                    return None;
                }
                if closers.is_empty() {
                    return Some(start + offset + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse and strictly validate a consolidated report.
pub fn validate_report(raw: &str) -> Result<FullAnalysisReport> {
    let value = extract_json(raw, "final_report")?;
    validate_value(&value)
}

pub fn validate_value(value: &Value) -> Result<FullAnalysisReport> {
    let root = Obj::root(value, "report")?;

    Ok(FullAnalysisReport {
        script_adherence: script_adherence(&root.object("script_adherence")?)?,
        icp_fit: icp_fit(&root.object("icp_fit")?)?,
        objections: objections(&root.object("objections")?)?,
        strengths: root.string_list("strengths")?,
        improvement_areas: root.string_list("improvement_areas")?,
        suggestions: root
            .objects("suggestions")?
            .iter()
            .map(|s| {
                Ok(Suggestion {
                    title: s.string("title")?,
                    steps: s.string_list("steps")?,
                    impact: s.opt_string("impact")?,
                })
            })
            .collect::<Result<Vec<_>>>()?,
        executive_summary: root.string("executive_summary")?,
        next_action: {
            let action = root.object("next_action")?;
            NextAction {
                action: action.string("action")?,
                deadline: action.string("deadline")?,
                rationale: action.string("rationale")?,
                conditions: action.opt_string_list("conditions")?,
            }
        },
        outreach_message: {
            let message = root.object("outreach_message")?;
            OutreachMessage {
                text: message.string("text")?,
                rationale: message.string("rationale")?,
            }
        },
        follow_up_checklist: root.string_list("follow_up_checklist")?,
    })
}

fn script_adherence(section: &Obj<'_>) -> Result<ScriptAdherence> {
    let stages_obj = section.object("stages")?;
    stages_obj.reject_unknown_keys(&SCRIPT_STAGES)?;

    let mut stages = BTreeMap::new();
    for name in SCRIPT_STAGES {
        let stage = stages_obj.object(name)?;
        stages.insert(
            name.to_string(),
            StageEvaluation {
                score: stage.number("score", STAGE_SCORE_MAX)?,
                justification: stage.string("justification")?,
                quotes: stage.string_list("quotes")?,
                gaps: stage.string_list("gaps")?,
            },
        );
    }

    Ok(ScriptAdherence {
        overall_score: section.number("overall_score", SCRIPT_SCORE_MAX)?,
        stages,
    })
}

fn icp_fit(section: &Obj<'_>) -> Result<IcpFit> {
    let criteria_obj = section.object("criteria")?;
    criteria_obj.reject_unknown_keys(&ICP_CRITERIA)?;

    let mut criteria = BTreeMap::new();
    for name in ICP_CRITERIA {
        let criterion = criteria_obj.object(name)?;
        criteria.insert(
            name.to_string(),
            CriterionEvaluation {
                classification: criterion.enumerated(
                    "classification",
                    CriterionClassification::parse,
                )?,
                evidence: criterion.string("evidence")?,
                score: criterion.number("score", CRITERION_SCORE_MAX)?,
            },
        );
    }

    let pursuit = section.object("worth_pursuing")?;

    Ok(IcpFit {
        status: section.enumerated("status", IcpStatus::parse)?,
        overall_score: section.number("overall_score", ICP_SCORE_MAX)?,
        criteria,
        worth_pursuing: WorthPursuing {
            recommendation: pursuit.string("recommendation")?,
            conditions: pursuit.string_list("conditions")?,
            status: pursuit.enumerated("status", PursuitStatus::parse)?,
        },
    })
}

fn objections(section: &Obj<'_>) -> Result<ObjectionsSection> {
    let items = section
        .objects("items")?
        .iter()
        .map(|item| {
            let evaluation = item.object("evaluation")?;
            Ok(ObjectionItem {
                category: item.string("category")?,
                client_quote: item.string("client_quote")?,
                seller_response: item.string("seller_response")?,
                evaluation: ResponseEvaluation {
                    score: evaluation.number("score", OBJECTION_SCORE_MAX)?,
                    rationale: evaluation.string("rationale")?,
                },
                suggested_response: item.string("suggested_response")?,
                next_step: item.string("next_step")?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let kpis = section.object("kpis")?;
    let averages = kpis.object("average_score_by_category")?;
    let mut average_score_by_category = BTreeMap::new();
    for key in averages.map.keys() {
        average_score_by_category.insert(key.clone(), averages.number(key, OBJECTION_SCORE_MAX)?);
    }

    Ok(ObjectionsSection {
        items,
        kpis: ObjectionKpis {
            total: kpis.count("total")?,
            handled_well: kpis.count("handled_well")?,
            average_score_by_category,
            top_gaps: kpis.string_list("top_gaps")?,
        },
    })
}

/// A JSON object plus the dotted path used in validation errors.
struct Obj<'a> {
    map: &'a Map<String, Value>,
    path: String,
}

impl<'a> Obj<'a> {
    fn root(value: &'a Value, path: &str) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self {
                map,
                path: path.to_string(),
            }),
            other => Err(schema_error(path, &format!("expected object, got {}", kind(other)))),
        }
    }

    fn child_path(&self, key: &str) -> String {
        format!("{}.{}", self.path, key)
    }

    fn field(&self, key: &str) -> Result<&'a Value> {
        match self.map.get(key) {
            Some(Value::Null) | None => {
                Err(schema_error(&self.child_path(key), "missing required field"))
            }
            Some(value) => Ok(value),
        }
    }

    fn object(&self, key: &str) -> Result<Obj<'a>> {
        Obj::root(self.field(key)?, &self.child_path(key))
    }

    fn objects(&self, key: &str) -> Result<Vec<Obj<'a>>> {
        let path = self.child_path(key);
        match self.field(key)? {
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| Obj::root(item, &format!("{}[{}]", path, i)))
                .collect(),
            other => Err(schema_error(&path, &format!("expected array, got {}", kind(other)))),
        }
    }

    fn string(&self, key: &str) -> Result<String> {
        match self.field(key)? {
            Value::String(s) => Ok(s.clone()),
            other => Err(schema_error(
                &self.child_path(key),
                &format!("expected string, got {}", kind(other)),
            )),
        }
    }

    fn opt_string(&self, key: &str) -> Result<Option<String>> {
        match self.map.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.string(key).map(Some),
        }
    }

    fn string_list(&self, key: &str) -> Result<Vec<String>> {
        let path = self.child_path(key);
        match self.field(key)? {
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| match item {
                    Value::String(s) => Ok(s.clone()),
                    other => Err(schema_error(
                        &format!("{}[{}]", path, i),
                        &format!("expected string, got {}", kind(other)),
                    )),
                })
                .collect(),
            other => Err(schema_error(&path, &format!("expected array, got {}", kind(other)))),
        }
    }

    fn opt_string_list(&self, key: &str) -> Result<Vec<String>> {
        match self.map.get(key) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(_) => self.string_list(key),
        }
    }

    /// Numbers are clamped into `[0, max]`; non-numbers are rejected.
    fn number(&self, key: &str, max: f64) -> Result<f64> {
        let path = self.child_path(key);
        let raw = match self.field(key)? {
            Value::Number(n) => n.as_f64().ok_or_else(|| schema_error(&path, "not finite"))?,
            other => {
                return Err(schema_error(
                    &path,
                    &format!("expected number, got {}", kind(other)),
                ))
            }
        };

        let clamped = raw.clamp(0.0, max);
        if clamped != raw {
            tracing::debug!("Clamped {} from {} to {}", path, raw, clamped);
        }
        Ok(clamped)
    }

    fn count(&self, key: &str) -> Result<u32> {
        Ok(self.number(key, f64::from(u32::MAX))?.round() as u32)
    }

    fn enumerated<T>(&self, key: &str, parse: fn(&str) -> Option<T>) -> Result<T> {
        let raw = self.string(key)?;
        parse(&raw).ok_or_else(|| {
            schema_error(
                &self.child_path(key),
                &format!("unexpected value {:?}", raw),
            )
        })
    }

    fn reject_unknown_keys(&self, allowed: &[&str]) -> Result<()> {
        match self.map.keys().find(|k| !allowed.contains(&k.as_str())) {
            Some(unknown) => Err(schema_error(&self.child_path(unknown), "unknown entry")),
            None => Ok(()),
        }
    }
}

fn schema_error(path: &str, reason: &str) -> DealscopeError {
    DealscopeError::SchemaValidation {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A complete, valid report as JSON. Shared by tests across the crate.
#[cfg(test)]
pub(crate) fn sample_report_json() -> Value {
    use serde_json::json;

    let stages: Map<String, Value> = SCRIPT_STAGES
        .iter()
        .map(|name| {
            (
                name.to_string(),
                json!({
                    "score": 7,
                    "justification": format!("{} ok", name),
                    "quotes": ["[00:01:00] Vendedor: Bom dia"],
                    "gaps": []
                }),
            )
        })
        .collect();

    let criteria: Map<String, Value> = ICP_CRITERIA
        .iter()
        .map(|name| {
            (
                name.to_string(),
                json!({"classification": "medio", "evidence": "", "score": 10}),
            )
        })
        .collect();

    json!({
        "script_adherence": {"overall_score": 70, "stages": stages},
        "icp_fit": {
            "status": "MEDIUM",
            "overall_score": 60,
            "criteria": criteria,
            "worth_pursuing": {
                "recommendation": "Seguir com proposta",
                "conditions": ["Confirmar orçamento"],
                "status": "PURSUE_WITH_CONDITIONS"
            }
        },
        "objections": {
            "items": [{
                "category": "preco",
                "client_quote": "[00:03:10] Cliente: está caro",
                "seller_response": "Podemos parcelar",
                "evaluation": {"score": 8, "rationale": "Resposta objetiva"},
                "suggested_response": "Mostrar ROI",
                "next_step": "Enviar proposta"
            }],
            "kpis": {
                "total": 1,
                "handled_well": 1,
                "average_score_by_category": {"preco": 8},
                "top_gaps": []
            }
        },
        "strengths": ["Boa abertura"],
        "improvement_areas": ["Aprofundar descoberta"],
        "suggestions": [{"title": "Usar ROI", "steps": ["Calcular ROI"], "impact": null}],
        "executive_summary": "Reunião produtiva",
        "next_action": {"action": "Enviar proposta", "deadline": "2 dias", "rationale": "Interesse alto"},
        "outreach_message": {"text": "Olá!", "rationale": "Follow-up"},
        "follow_up_checklist": ["Enviar proposta"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extracts_fenced_json() {
        let value = extract_json("```json\n{\"a\":1}\n```", "script").unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn test_extracts_embedded_json() {
        let value = extract_json("noise {\"a\":1} more noise", "icp").unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn test_braces_inside_strings_are_ignored() {
        let raw = r#"Here: {"quote": "ele disse \"}\" e saiu", "n": [1, 2]} fim"#;
        let value = extract_json(raw, "objections").unwrap();
        assert_eq!(value["n"], json!([1, 2]));
        assert_eq!(value["quote"], json!("ele disse \"}\" e saiu"));
    }

    #[test]
    fn test_skips_unparseable_leading_block() {
        let value = extract_json("use {curly} then {\"ok\": true}", "script").unwrap();
        assert_eq!(value, json!({"ok": true}));
    }

    #[test]
    fn test_non_json_fence_falls_back_to_surrounding_text() {
        let raw = "```text\nnotas soltas da reunião\n```\n{\"a\": 1}";
        let value = extract_json(raw, "icp").unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn test_trailing_commas_are_repaired() {
        let raw = "```json\n{\"a\": [1, 2,], \"b\": \"x,}\",\n}\n```";
        let value = extract_json(raw, "script").unwrap();
        assert_eq!(value, json!({"a": [1, 2], "b": "x,}"}));
    }

    #[test]
    fn test_not_json_names_context() {
        let err = extract_json("not json at all", "objections").unwrap_err();
        match err {
            DealscopeError::InvalidAnalysisFormat { context, .. } => {
                assert_eq!(context, "objections")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_valid_report_passes() {
        let report = validate_value(&sample_report_json()).unwrap();
        assert_eq!(report.script_adherence.stages.len(), 9);
        assert_eq!(report.icp_fit.criteria.len(), 7);
        assert_eq!(report.icp_fit.status, IcpStatus::Medium);
        assert!(report.next_action.conditions.is_empty());
    }

    #[test]
    fn test_scores_are_clamped() {
        let mut value = sample_report_json();
        value["script_adherence"]["overall_score"] = json!(115);
        value["icp_fit"]["criteria"]["orcamento"]["score"] = json!(35);
        value["objections"]["items"][0]["evaluation"]["score"] = json!(-2);
        let report = validate_value(&value).unwrap();
        assert_eq!(report.script_adherence.overall_score, 100.0);
        assert_eq!(report.icp_fit.criteria["orcamento"].score, 20.0);
        assert_eq!(report.objections.items[0].evaluation.score, 0.0);

        value["script_adherence"]["overall_score"] = json!(-5);
        let report = validate_value(&value).unwrap();
        assert_eq!(report.script_adherence.overall_score, 0.0);
    }

    #[test]
    fn test_missing_stage_is_rejected() {
        let mut value = sample_report_json();
        value["script_adherence"]["stages"]
            .as_object_mut()
            .unwrap()
            .remove("fechamento");

        let err = validate_value(&value).unwrap_err();
        match err {
            DealscopeError::SchemaValidation { path, .. } => {
                assert_eq!(path, "report.script_adherence.stages.fechamento")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_bad_enum_and_wrong_type_are_rejected() {
        let mut value = sample_report_json();
        value["icp_fit"]["status"] = json!("MAYBE");
        assert!(validate_value(&value).is_err());

        let mut value = sample_report_json();
        value["script_adherence"]["overall_score"] = json!("70");
        assert!(validate_value(&value).is_err());

        let mut value = sample_report_json();
        value["icp_fit"]["criteria"]["extra"] = json!({"classification": "alto", "evidence": "", "score": 1});
        assert!(validate_value(&value).is_err());
    }

    #[test]
    fn test_validate_report_from_decorated_text() {
        let raw = format!(
            "Segue o relatório:\n```json\n{}\n```",
            serde_json::to_string_pretty(&sample_report_json()).unwrap()
        );
        let report = validate_report(&raw).unwrap();
        assert_eq!(report.executive_summary, "Reunião produtiva");
    }
}
