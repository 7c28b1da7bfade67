use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::settings::GuidelinesConfig;
use crate::error::Result;

pub const DEFAULT_SCRIPT_GUIDE: &str = "\
1. Abertura: apresentar-se, agradecer o tempo e confirmar a agenda.
2. Rapport: criar conexão com o cliente antes de entrar no produto.
3. Descoberta: perguntas abertas sobre o negócio, processos e metas.
4. Diagnóstico da dor: quantificar o impacto do problema.
5. Apresentação da solução: conectar funcionalidades às dores citadas.
6. Tratamento de objeções: ouvir, validar e responder com evidências.
7. Proposta de valor: ROI e diferenciais frente à situação atual.
8. Fechamento: pedir compromisso claro.
9. Próximos passos: data, responsáveis e entregáveis definidos.";

pub const DEFAULT_ICP_GUIDE: &str = "\
- Segmento: empresas B2B de serviços ou tecnologia.
- Porte: de 20 a 500 funcionários.
- Dor principal: sobrecarga operacional ou processos manuais.
- Orçamento: verba aprovada ou previsível no ano corrente.
- Autoridade: participação de quem decide ou acesso direto a essa pessoa.
- Urgência: problema a resolver em até 3 meses.
- Maturidade digital: já usa ferramentas SaaS no dia a dia.";

/// Script playbook and ICP definition handed to the analyses and to chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guidelines {
    pub script_text: String,
    pub icp_text: String,
}

impl Default for Guidelines {
    fn default() -> Self {
        Self {
            script_text: DEFAULT_SCRIPT_GUIDE.to_string(),
            icp_text: DEFAULT_ICP_GUIDE.to_string(),
        }
    }
}

impl Guidelines {
    /// Both guides in one block, as used by the chat prompt.
    pub fn combined(&self) -> String {
        format!(
            "SCRIPT:\n{}\n\nICP:\n{}",
            self.script_text.trim(),
            self.icp_text.trim()
        )
    }
}

pub trait GuidelineSource: Send + Sync {
    fn active_guidelines(&self) -> Result<Guidelines>;
}

/// Fixed guidelines, mostly for tests and the default setup.
#[derive(Debug, Clone, Default)]
pub struct StaticGuidelineSource(pub Guidelines);

impl GuidelineSource for StaticGuidelineSource {
    fn active_guidelines(&self) -> Result<Guidelines> {
        Ok(self.0.clone())
    }
}

/// Reads the configured playbook files on every call so edits apply to the next run.
#[derive(Debug, Clone, Default)]
pub struct FileGuidelineSource {
    script_path: Option<PathBuf>,
    icp_path: Option<PathBuf>,
}

impl FileGuidelineSource {
    pub fn new(script_path: Option<PathBuf>, icp_path: Option<PathBuf>) -> Self {
        Self {
            script_path,
            icp_path,
        }
    }

    pub fn from_config(config: &GuidelinesConfig) -> Self {
        Self::new(config.script_path.clone(), config.icp_path.clone())
    }
}

impl GuidelineSource for FileGuidelineSource {
    fn active_guidelines(&self) -> Result<Guidelines> {
        Ok(Guidelines {
            script_text: read_or_default(self.script_path.as_deref(), DEFAULT_SCRIPT_GUIDE)?,
            icp_text: read_or_default(self.icp_path.as_deref(), DEFAULT_ICP_GUIDE)?,
        })
    }
}

fn read_or_default(path: Option<&Path>, default: &str) -> Result<String> {
    let Some(path) = path else {
        return Ok(default.to_string());
    };

    if !path.exists() {
        tracing::warn!("Guideline file {:?} not found, using built-in default", path);
        return Ok(default.to_string());
    }

    let text = std::fs::read_to_string(path)?;
    if text.trim().is_empty() {
        tracing::warn!("Guideline file {:?} is empty, using built-in default", path);
        return Ok(default.to_string());
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_without_paths() {
        let guidelines = FileGuidelineSource::default().active_guidelines().unwrap();
        assert_eq!(guidelines, Guidelines::default());
    }

    #[test]
    fn test_reads_configured_files() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("script.md");
        std::fs::write(&script, "Sempre confirmar o orçamento.").unwrap();

        let source = FileGuidelineSource::new(Some(script), Some(dir.path().join("missing.md")));
        let guidelines = source.active_guidelines().unwrap();

        assert_eq!(guidelines.script_text, "Sempre confirmar o orçamento.");
        assert_eq!(guidelines.icp_text, DEFAULT_ICP_GUIDE);
    }

    #[test]
    fn test_combined_contains_both_guides() {
        let combined = Guidelines::default().combined();
        assert!(combined.contains("SCRIPT:"));
        assert!(combined.contains("Maturidade digital"));
    }
}
