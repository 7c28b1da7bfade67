use crate::analysis::report::{ICP_CRITERIA, SCRIPT_STAGES};

/// Headers that open each analysis prompt.
pub const SCRIPT_HEADER: &str = "TAREFA: ANÁLISE DE ADERÊNCIA AO SCRIPT";
pub const ICP_HEADER: &str = "TAREFA: ANÁLISE DE FIT COM O ICP";
pub const OBJECTIONS_HEADER: &str = "TAREFA: ANÁLISE DE OBJEÇÕES";
pub const FINAL_REPORT_HEADER: &str = "TAREFA: RELATÓRIO FINAL CONSOLIDADO";
pub const QUICK_SUMMARY_HEADER: &str = "TAREFA: RESUMO RÁPIDO";
pub const TOPICS_HEADER: &str = "TAREFA: EXTRAÇÃO DE TÓPICOS";
pub const CHAT_HEADER: &str = "TAREFA: PERGUNTA SOBRE A REUNIÃO";

pub const ANALYST_SYSTEM: &str = "Você é um analista sênior de vendas B2B. Responda sempre em português do Brasil e apenas com JSON válido quando JSON for pedido.";

fn bullet_list(items: &[&str]) -> String {
    items
        .iter()
        .map(|item| format!("- {}", item))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn script_analysis_prompt(context: &str, guidelines: Option<&str>) -> String {
    format!(
        r#"{header}

Avalie a aderência do vendedor ao script de vendas nas etapas abaixo.

ETAPAS:
{stages}

GUIA DO SCRIPT:
{guidelines}

TRECHOS DA REUNIÃO:
{context}

Responda APENAS com JSON:
{{
  "overall_score": 0-100,
  "stages": {{
    "<etapa>": {{"score": 0-10, "justification": "...", "quotes": ["[mm:ss] Falante: citação literal"], "gaps": ["o que faltou para nota 10"]}}
  }}
}}

REGRAS:
- Toda citação deve ser literal e copiada dos trechos, com timestamp
- Etapa sem evidência recebe nota 0 e justificativa "sem evidência""#,
        header = SCRIPT_HEADER,
        stages = bullet_list(&SCRIPT_STAGES),
        guidelines = guidelines.unwrap_or("(sem guia específico)"),
        context = context,
    )
}

pub fn icp_analysis_prompt(context: &str, guidelines: Option<&str>) -> String {
    format!(
        r#"{header}

Avalie o quanto o cliente se encaixa no perfil de cliente ideal (ICP).

CRITÉRIOS:
{criteria}

DEFINIÇÃO DO ICP:
{guidelines}

TRECHOS DA REUNIÃO:
{context}

Responda APENAS com JSON:
{{
  "status": "HIGH|MEDIUM|LOW",
  "overall_score": 0-100,
  "criteria": {{
    "<criterio>": {{"classification": "alto|medio|baixo|nao_mencionado", "evidence": "[mm:ss] Falante: citação literal", "score": 0-20}}
  }}
}}

REGRAS:
- Use somente evidências presentes nos trechos
- Critério sem evidência é "nao_mencionado" com nota 0"#,
        header = ICP_HEADER,
        criteria = bullet_list(&ICP_CRITERIA),
        guidelines = guidelines.unwrap_or("(sem definição específica)"),
        context = context,
    )
}

pub fn objections_analysis_prompt(context: &str) -> String {
    format!(
        r#"{header}

Identifique cada objeção levantada pelo cliente e avalie a resposta do vendedor.

TRECHOS DA REUNIÃO:
{context}

Responda APENAS com JSON:
{{
  "items": [
    {{
      "category": "preco|timing|concorrencia|autoridade|necessidade|confianca|outro",
      "client_quote": "[mm:ss] Cliente: citação literal expandida",
      "seller_response": "[mm:ss] Vendedor: citação literal",
      "evaluation": {{"score": 0-10, "rationale": "..."}},
      "suggested_response": "...",
      "next_step": "..."
    }}
  ]
}}

REGRAS:
- Citações literais com timestamp
- Lista vazia se não houver objeções"#,
        header = OBJECTIONS_HEADER,
        context = context,
    )
}

pub fn final_report_prompt(
    script_analysis: &str,
    icp_analysis: &str,
    objections_analysis: &str,
    context: &str,
) -> String {
    format!(
        r#"{header}

Consolide as análises parciais abaixo em um único relatório.

ANÁLISE DE SCRIPT:
{script}

ANÁLISE DE ICP:
{icp}

ANÁLISE DE OBJEÇÕES:
{objections}

EVIDÊNCIAS:
{context}

Responda APENAS com JSON neste formato exato (todas as chaves obrigatórias):
{{
  "script_adherence": {{"overall_score": 0-100, "stages": {{<as 9 etapas: {stages}> : {{"score": 0-10, "justification": "", "quotes": [], "gaps": []}}}}}},
  "icp_fit": {{
    "status": "HIGH|MEDIUM|LOW",
    "overall_score": 0-100,
    "criteria": {{<os 7 critérios: {criteria}> : {{"classification": "alto|medio|baixo|nao_mencionado", "evidence": "", "score": 0-20}}}},
    "worth_pursuing": {{"recommendation": "", "conditions": [], "status": "PURSUE|PURSUE_WITH_CONDITIONS|DO_NOT_PURSUE"}}
  }},
  "objections": {{
    "items": [{{"category": "", "client_quote": "", "seller_response": "", "evaluation": {{"score": 0-10, "rationale": ""}}, "suggested_response": "", "next_step": ""}}],
    "kpis": {{"total": 0, "handled_well": 0, "average_score_by_category": {{}}, "top_gaps": []}}
  }},
  "strengths": [],
  "improvement_areas": [],
  "suggestions": [{{"title": "", "steps": [], "impact": null}}],
  "executive_summary": "",
  "next_action": {{"action": "", "deadline": "", "rationale": "", "conditions": []}},
  "outreach_message": {{"text": "", "rationale": ""}},
  "follow_up_checklist": []
}}"#,
        header = FINAL_REPORT_HEADER,
        script = script_analysis,
        icp = icp_analysis,
        objections = objections_analysis,
        context = context,
        stages = SCRIPT_STAGES.join(", "),
        criteria = ICP_CRITERIA.join(", "),
    )
}

pub fn quick_summary_prompt(context: &str) -> String {
    format!(
        r#"{header}

Resuma a reunião de vendas abaixo em até 5 tópicos curtos: contexto do cliente, dores, objeções, próximos passos e avaliação geral.

TRECHOS:
{context}

Responda em texto simples, sem JSON."#,
        header = QUICK_SUMMARY_HEADER,
        context = context,
    )
}

pub fn topic_extraction_prompt(chunk_content: &str) -> String {
    format!(
        r#"{header}

Liste até 5 tópicos (palavras ou expressões curtas, minúsculas) discutidos no trecho.

TRECHO:
{chunk}

Responda APENAS com um array JSON de strings, por exemplo ["preco", "integracao"]."#,
        header = TOPICS_HEADER,
        chunk = chunk_content,
    )
}

pub struct ChatPromptParts<'a> {
    pub question: &'a str,
    pub report: Option<&'a str>,
    pub excerpts: &'a str,
    pub transcript: Option<&'a str>,
    pub guidelines: &'a str,
    pub max_words: usize,
}

pub fn chat_prompt(parts: &ChatPromptParts<'_>) -> String {
    format!(
        r#"{header}

PERGUNTA:
{question}

RELATÓRIO DA REUNIÃO:
{report}

TRECHOS RELEVANTES:
{excerpts}

TRANSCRIÇÃO (parcial):
{transcript}

REFERÊNCIAS (script e ICP):
{guidelines}

REGRAS:
- Toda afirmação factual deve trazer uma citação literal com timestamp, no formato [mm:ss] Falante: "citação"
- Se não houver evidência, diga explicitamente "Não encontrei evidência na transcrição"
- Não invente informações que não estejam acima
- Máximo de {max_words} palavras"#,
        header = CHAT_HEADER,
        question = parts.question,
        report = parts.report.unwrap_or("(sem relatório)"),
        excerpts = parts.excerpts,
        transcript = parts.transcript.unwrap_or("(indisponível)"),
        guidelines = parts.guidelines,
        max_words = parts.max_words,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_prompt_lists_every_stage() {
        let prompt = script_analysis_prompt("[00:01] Ana: oi", None);
        assert!(prompt.starts_with(SCRIPT_HEADER));
        for stage in SCRIPT_STAGES {
            assert!(prompt.contains(stage));
        }
        assert!(prompt.contains("[00:01] Ana: oi"));
    }

    #[test]
    fn test_final_prompt_includes_partials() {
        let prompt = final_report_prompt("{\"s\":1}", "{\"i\":1}", "{\"o\":1}", "ctx");
        assert!(prompt.contains("{\"s\":1}"));
        assert!(prompt.contains("{\"o\":1}"));
        for criterion in ICP_CRITERIA {
            assert!(prompt.contains(criterion));
        }
    }

    #[test]
    fn test_chat_prompt_caps_words() {
        let prompt = chat_prompt(&ChatPromptParts {
            question: "Qual o orçamento?",
            report: None,
            excerpts: "[00:10] Cliente: temos 10 mil",
            transcript: None,
            guidelines: "",
            max_words: 120,
        });
        assert!(prompt.contains("Máximo de 120 palavras"));
        assert!(prompt.contains("(sem relatório)"));
    }
}
