use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::{ApiStatusError, CompletionRequest, ProviderReply, TokenUsage};

const CLAUDE_API_URL: &str = "https://api.anthropic.com/v1/messages";

#[derive(Debug, Serialize)]
struct ClaudeRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ClaudeMessage>,
}

#[derive(Debug, Serialize)]
struct ClaudeMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    content: Vec<ClaudeContent>,
    #[serde(default)]
    usage: Option<ClaudeUsage>,
}

#[derive(Debug, Deserialize)]
struct ClaudeContent {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ClaudeUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

pub async fn complete(
    client: &reqwest::Client,
    base_url: Option<&str>,
    api_key: &str,
    model: &str,
    request: &CompletionRequest,
) -> Result<ProviderReply> {
    let url = base_url
        .map(|b| format!("{}/messages", b.trim_end_matches('/')))
        .unwrap_or_else(|| CLAUDE_API_URL.to_string());

    let body = ClaudeRequest {
        model: model.to_string(),
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        system: request.system.clone(),
        messages: vec![ClaudeMessage {
            role: "user".to_string(),
            content: request.prompt.clone(),
        }],
    };

    let response = client
        .post(&url)
        .header("x-api-key", api_key)
        .header("anthropic-version", "2023-06-01")
        .header("content-type", "application/json")
        .json(&body)
        .send()
        .await
        .context("Failed to send request to Claude API")?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let error_text = response.text().await.unwrap_or_default();
        return Err(ApiStatusError::new(status, error_text).into());
    }

    let claude_response: ClaudeResponse = response
        .json()
        .await
        .context("Failed to parse Claude API response")?;

    let content = claude_response
        .content
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("");
    if content.is_empty() {
        anyhow::bail!("No content in Claude response");
    }

    let usage = claude_response
        .usage
        .map(|u| TokenUsage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
        })
        .unwrap_or_default();

    Ok(ProviderReply { content, usage })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_structure() {
        let request = ClaudeRequest {
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 4096,
            temperature: 0.2,
            system: None,
            messages: vec![ClaudeMessage {
                role: "user".to_string(),
                content: "test".to_string(),
            }],
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("claude-sonnet-4-20250514"));
        assert!(!json.contains("system"));
    }

    #[test]
    fn test_response_usage_parsing() {
        let raw = r#"{"content":[{"type":"text","text":"{\"ok\":true}"}],"usage":{"input_tokens":12,"output_tokens":3}}"#;
        let parsed: ClaudeResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.content[0].text, "{\"ok\":true}");
        assert_eq!(parsed.usage.unwrap().input_tokens, 12);
    }
}
