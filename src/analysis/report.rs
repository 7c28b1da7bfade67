//! Typed shape of the consolidated analysis report.
//!
//! Every report carries all nine script stages and all seven ICP criteria. Instances are
//! only produced by [`crate::analysis::validator::validate_report`] or [`FullAnalysisReport::empty`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The nine script stages, in call order.
pub const SCRIPT_STAGES: [&str; 9] = [
    "abertura",
    "rapport",
    "descoberta",
    "diagnostico_dor",
    "apresentacao_solucao",
    "tratamento_objecoes",
    "proposta_valor",
    "fechamento",
    "proximos_passos",
];

/// The seven ICP criteria.
pub const ICP_CRITERIA: [&str; 7] = [
    "segmento",
    "porte_empresa",
    "dor_principal",
    "orcamento",
    "autoridade_decisao",
    "urgencia",
    "maturidade_digital",
];

pub const SCRIPT_SCORE_MAX: f64 = 100.0;
pub const STAGE_SCORE_MAX: f64 = 10.0;
pub const ICP_SCORE_MAX: f64 = 100.0;
pub const CRITERION_SCORE_MAX: f64 = 20.0;
pub const OBJECTION_SCORE_MAX: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IcpStatus {
    High,
    Medium,
    Low,
}

impl IcpStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "HIGH" => Some(IcpStatus::High),
            "MEDIUM" => Some(IcpStatus::Medium),
            "LOW" => Some(IcpStatus::Low),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IcpStatus::High => "HIGH",
            IcpStatus::Medium => "MEDIUM",
            IcpStatus::Low => "LOW",
        }
    }
}

impl fmt::Display for IcpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriterionClassification {
    Alto,
    Medio,
    Baixo,
    NaoMencionado,
}

impl CriterionClassification {
    /// Accepts case and accent variants such as "Médio" or "não mencionado".
    pub fn parse(raw: &str) -> Option<Self> {
        let folded: String = raw
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| match c {
                'á' | 'à' | 'â' | 'ã' => 'a',
                'é' | 'ê' => 'e',
                'í' => 'i',
                'ó' | 'ô' | 'õ' => 'o',
                'ú' => 'u',
                ' ' | '-' => '_',
                other => other,
            })
            .collect();

        match folded.as_str() {
            "alto" => Some(Self::Alto),
            "medio" => Some(Self::Medio),
            "baixo" => Some(Self::Baixo),
            "nao_mencionado" => Some(Self::NaoMencionado),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alto => "alto",
            Self::Medio => "medio",
            Self::Baixo => "baixo",
            Self::NaoMencionado => "nao_mencionado",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PursuitStatus {
    Pursue,
    PursueWithConditions,
    DoNotPursue,
}

impl PursuitStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().replace([' ', '-'], "_").as_str() {
            "PURSUE" => Some(Self::Pursue),
            "PURSUE_WITH_CONDITIONS" => Some(Self::PursueWithConditions),
            "DO_NOT_PURSUE" => Some(Self::DoNotPursue),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pursue => "PURSUE",
            Self::PursueWithConditions => "PURSUE_WITH_CONDITIONS",
            Self::DoNotPursue => "DO_NOT_PURSUE",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageEvaluation {
    pub score: f64,
    pub justification: String,
    pub quotes: Vec<String>,
    pub gaps: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptAdherence {
    pub overall_score: f64,
    /// Keyed by stage name; always holds every entry of [`SCRIPT_STAGES`].
    pub stages: BTreeMap<String, StageEvaluation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionEvaluation {
    pub classification: CriterionClassification,
    pub evidence: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorthPursuing {
    pub recommendation: String,
    pub conditions: Vec<String>,
    pub status: PursuitStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IcpFit {
    pub status: IcpStatus,
    pub overall_score: f64,
    /// Keyed by criterion name; always holds every entry of [`ICP_CRITERIA`].
    pub criteria: BTreeMap<String, CriterionEvaluation>,
    pub worth_pursuing: WorthPursuing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEvaluation {
    pub score: f64,
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectionItem {
    pub category: String,
    pub client_quote: String,
    pub seller_response: String,
    pub evaluation: ResponseEvaluation,
    pub suggested_response: String,
    pub next_step: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectionKpis {
    pub total: u32,
    pub handled_well: u32,
    pub average_score_by_category: BTreeMap<String, f64>,
    pub top_gaps: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectionsSection {
    pub items: Vec<ObjectionItem>,
    pub kpis: ObjectionKpis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub title: String,
    pub steps: Vec<String>,
    pub impact: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NextAction {
    pub action: String,
    pub deadline: String,
    pub rationale: String,
    pub conditions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutreachMessage {
    pub text: String,
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullAnalysisReport {
    pub script_adherence: ScriptAdherence,
    pub icp_fit: IcpFit,
    pub objections: ObjectionsSection,
    pub strengths: Vec<String>,
    pub improvement_areas: Vec<String>,
    pub suggestions: Vec<Suggestion>,
    pub executive_summary: String,
    pub next_action: NextAction,
    pub outreach_message: OutreachMessage,
    pub follow_up_checklist: Vec<String>,
}

impl FullAnalysisReport {
    /// Zeroed report returned alongside failed pipeline runs.
    pub fn empty() -> Self {
        let stages = SCRIPT_STAGES
            .iter()
            .map(|name| (name.to_string(), StageEvaluation::default()))
            .collect();

        let criteria = ICP_CRITERIA
            .iter()
            .map(|name| {
                (
                    name.to_string(),
                    CriterionEvaluation {
                        classification: CriterionClassification::NaoMencionado,
                        evidence: String::new(),
                        score: 0.0,
                    },
                )
            })
            .collect();

        Self {
            script_adherence: ScriptAdherence {
                overall_score: 0.0,
                stages,
            },
            icp_fit: IcpFit {
                status: IcpStatus::Low,
                overall_score: 0.0,
                criteria,
                worth_pursuing: WorthPursuing {
                    recommendation: String::new(),
                    conditions: Vec::new(),
                    status: PursuitStatus::DoNotPursue,
                },
            },
            objections: ObjectionsSection::default(),
            strengths: Vec::new(),
            improvement_areas: Vec::new(),
            suggestions: Vec::new(),
            executive_summary: String::new(),
            next_action: NextAction::default(),
            outreach_message: OutreachMessage::default(),
            follow_up_checklist: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.executive_summary.is_empty()
            && self.objections.items.is_empty()
            && self.script_adherence.overall_score == 0.0
            && self.icp_fit.overall_score == 0.0
    }

    /// Compact plain-text rendering used as chat context.
    pub fn to_context_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Resumo executivo: {}\n", self.executive_summary));
        out.push_str(&format!(
            "Aderência ao script: {:.0}/100\n",
            self.script_adherence.overall_score
        ));
        for (name, stage) in &self.script_adherence.stages {
            out.push_str(&format!(
                "- {}: {:.0}/10 {}\n",
                name, stage.score, stage.justification
            ));
        }
        out.push_str(&format!(
            "ICP: {} ({:.0}/100)\n",
            self.icp_fit.status, self.icp_fit.overall_score
        ));
        for (name, criterion) in &self.icp_fit.criteria {
            out.push_str(&format!(
                "- {}: {} ({:.0}/20) {}\n",
                name,
                criterion.classification.as_str(),
                criterion.score,
                criterion.evidence
            ));
        }
        out.push_str("Objeções:\n");
        for item in &self.objections.items {
            out.push_str(&format!(
                "- [{}] \"{}\" nota {:.0}/10\n",
                item.category, item.client_quote, item.evaluation.score
            ));
        }
        if !self.next_action.action.is_empty() {
            out.push_str(&format!(
                "Próxima ação: {} (prazo: {})\n",
                self.next_action.action, self.next_action.deadline
            ));
        }
        out
    }
}
