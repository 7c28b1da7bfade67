use crate::analysis::report::FullAnalysisReport;
use crate::error::Result;
use crate::storage::Meeting;
use std::fs;
use std::path::PathBuf;

/// Writes analysis reports as markdown notes
pub struct ReportWriter {
    notes_dir: PathBuf,
}

impl ReportWriter {
    pub fn new(notes_dir: PathBuf) -> Self {
        Self { notes_dir }
    }

    /// Render the report to `<notes_dir>/<meeting id>.md`, overwriting earlier exports.
    pub fn write(
        &self,
        meeting: &Meeting,
        report: &FullAnalysisReport,
        quick_summary: Option<&str>,
    ) -> Result<PathBuf> {
        fs::create_dir_all(&self.notes_dir)?;

        let content = render_report(meeting, report, quick_summary);
        let notes_path = self.notes_dir.join(format!("{}.md", meeting.id));
        fs::write(&notes_path, content)?;

        tracing::info!("Report for {} written to {:?}", meeting.id, notes_path);
        Ok(notes_path)
    }
}

pub fn render_report(
    meeting: &Meeting,
    report: &FullAnalysisReport,
    quick_summary: Option<&str>,
) -> String {
    let mut content = String::new();

    // YAML frontmatter
    content.push_str("---\n");
    content.push_str(&format!("title: \"{}\"\n", meeting.title.replace('"', "'")));
    content.push_str(&format!(
        "date: {}\n",
        meeting.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    content.push_str(&format!("meeting_id: \"{}\"\n", meeting.id));
    content.push_str(&format!(
        "script_score: {:.0}\n",
        report.script_adherence.overall_score
    ));
    content.push_str(&format!("icp_status: {}\n", report.icp_fit.status));
    content.push_str(&format!(
        "pursuit: {}\n",
        report.icp_fit.worth_pursuing.status.as_str()
    ));
    content.push_str("---\n\n");

    content.push_str(&format!("# {}\n\n", meeting.title));

    content.push_str("## Resumo executivo\n\n");
    content.push_str(&format!("{}\n\n", report.executive_summary));
    if let Some(summary) = quick_summary.filter(|s| !s.trim().is_empty()) {
        content.push_str(&format!("> {}\n\n", summary.trim().replace('\n', "\n> ")));
    }

    content.push_str(&format!(
        "## Aderência ao script ({:.0}/100)\n\n",
        report.script_adherence.overall_score
    ));
    content.push_str("| Etapa | Nota | Justificativa |\n|---|---|---|\n");
    for (stage, evaluation) in &report.script_adherence.stages {
        content.push_str(&format!(
            "| {} | {:.0}/10 | {} |\n",
            stage,
            evaluation.score,
            evaluation.justification.replace('|', "/")
        ));
    }
    content.push('\n');

    content.push_str(&format!(
        "## Fit com ICP: {} ({:.0}/100)\n\n",
        report.icp_fit.status, report.icp_fit.overall_score
    ));
    for (criterion, evaluation) in &report.icp_fit.criteria {
        content.push_str(&format!(
            "- **{}**: {} ({:.0}/20)",
            criterion,
            evaluation.classification.as_str(),
            evaluation.score
        ));
        if !evaluation.evidence.is_empty() {
            content.push_str(&format!(" - {}", evaluation.evidence));
        }
        content.push('\n');
    }
    let pursuing = &report.icp_fit.worth_pursuing;
    content.push_str(&format!(
        "\n**Recomendação** ({}): {}\n\n",
        pursuing.status.as_str(),
        pursuing.recommendation
    ));

    content.push_str(&format!(
        "## Objeções ({} de {} bem tratadas)\n\n",
        report.objections.kpis.handled_well, report.objections.kpis.total
    ));
    for item in &report.objections.items {
        content.push_str(&format!(
            "### {} ({:.0}/10)\n\n- Cliente: {}\n- Vendedor: {}\n- Sugestão: {}\n- Próximo passo: {}\n\n",
            item.category,
            item.evaluation.score,
            item.client_quote,
            item.seller_response,
            item.suggested_response,
            item.next_step
        ));
    }

    push_list(&mut content, "Pontos fortes", &report.strengths);
    push_list(&mut content, "Pontos de melhoria", &report.improvement_areas);

    if !report.suggestions.is_empty() {
        content.push_str("## Sugestões\n\n");
        for suggestion in &report.suggestions {
            content.push_str(&format!("### {}\n\n", suggestion.title));
            for (i, step) in suggestion.steps.iter().enumerate() {
                content.push_str(&format!("{}. {}\n", i + 1, step));
            }
            if let Some(impact) = &suggestion.impact {
                content.push_str(&format!("\nImpacto: {}\n", impact));
            }
            content.push('\n');
        }
    }

    let next = &report.next_action;
    content.push_str("## Próxima ação\n\n");
    content.push_str(&format!(
        "**{}** (prazo: {})\n\n{}\n\n",
        next.action, next.deadline, next.rationale
    ));

    content.push_str("## Mensagem sugerida\n\n");
    content.push_str(&format!("```\n{}\n```\n\n", report.outreach_message.text));

    if !report.follow_up_checklist.is_empty() {
        content.push_str("## Checklist de follow-up\n\n");
        for item in &report.follow_up_checklist {
            content.push_str(&format!("- [ ] {}\n", item));
        }
        content.push('\n');
    }

    content
}

fn push_list(content: &mut String, heading: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    content.push_str(&format!("## {}\n\n", heading));
    for item in items {
        content.push_str(&format!("- {}\n", item));
    }
    content.push('\n');
}
