pub mod guidelines;
pub mod persist;
pub mod pipeline;
pub mod report;
pub mod validator;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DealscopeError;

pub use pipeline::{AnalysisPipeline, PipelineOptions, PipelineResult, ProcessingStats};
pub use report::FullAnalysisReport;

/// The specialized analyses run in the second pipeline layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisType {
    Script,
    Icp,
    Objections,
}

impl AnalysisType {
    pub const ALL: [AnalysisType; 3] = [
        AnalysisType::Script,
        AnalysisType::Icp,
        AnalysisType::Objections,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisType::Script => "script",
            AnalysisType::Icp => "icp",
            AnalysisType::Objections => "objections",
        }
    }

    /// Parse a comma-separated list such as "script,icp". Duplicates are dropped.
    pub fn parse_list(raw: &str) -> Result<Vec<AnalysisType>, DealscopeError> {
        let mut types = Vec::new();
        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let parsed: AnalysisType = part.parse()?;
            if !types.contains(&parsed) {
                types.push(parsed);
            }
        }
        Ok(types)
    }
}

impl fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AnalysisType {
    type Err = DealscopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "script" => Ok(AnalysisType::Script),
            "icp" => Ok(AnalysisType::Icp),
            "objections" | "objection" => Ok(AnalysisType::Objections),
            other => Err(DealscopeError::InvalidConfig(format!(
                "Unknown analysis type: {}",
                other
            ))),
        }
    }
}
