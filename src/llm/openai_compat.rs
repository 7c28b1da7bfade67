use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::{ApiStatusError, CompletionRequest, ProviderReply, TokenUsage};

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_completion_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

fn build_request(model: &str, request: &CompletionRequest) -> ChatRequest {
    let mut messages = Vec::new();
    if let Some(system) = &request.system {
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: system.clone(),
        });
    }
    messages.push(ChatMessage {
        role: "user".to_string(),
        content: request.prompt.clone(),
    });

    ChatRequest {
        model: model.to_string(),
        messages,
        max_completion_tokens: request.max_tokens,
        temperature: request.temperature,
        response_format: request.json_output.then_some(ResponseFormat {
            kind: "json_object",
        }),
    }
}

/// Chat completion against any OpenAI-compatible endpoint (OpenAI, Moonshot, OpenRouter,
/// Gemini's compatibility layer).
pub async fn complete(
    client: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    model: &str,
    request: &CompletionRequest,
) -> Result<ProviderReply> {
    let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
    let body = build_request(model, request);

    let response = client
        .post(&url)
        .header("Authorization", format!("Bearer {}", api_key))
        .header("content-type", "application/json")
        .json(&body)
        .send()
        .await
        .with_context(|| format!("Failed to send request to {}", url))?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let error_text = response.text().await.unwrap_or_default();
        return Err(ApiStatusError::new(status, error_text).into());
    }

    let chat_response: ChatResponse = response
        .json()
        .await
        .context("Failed to parse chat completion response")?;

    let content = chat_response
        .choices
        .first()
        .and_then(|c| c.message.content.clone())
        .context("No choices in response")?;

    let usage = chat_response
        .usage
        .map(|u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        })
        .unwrap_or_default();

    Ok(ProviderReply { content, usage })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_structure() {
        let request = CompletionRequest::new("test")
            .with_system("be terse")
            .json();
        let body = build_request("gpt-4o", &request);

        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("gpt-4o"));
        assert!(json.contains("\"role\":\"system\""));
        assert!(json.contains("json_object"));
    }

    #[test]
    fn test_plain_request_omits_response_format() {
        let body = build_request("gpt-4o-mini", &CompletionRequest::new("oi"));
        let json = serde_json::to_string(&body).unwrap();
        assert!(!json.contains("response_format"));
        assert_eq!(body.messages.len(), 1);
    }
}
