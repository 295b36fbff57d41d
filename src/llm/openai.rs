//! OpenAI-compatible chat-completions client (Groq, OpenAI, OpenRouter, ...).

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{
    ChatMessage, ChatResponse, LlmClient, LlmError, ToolCall, ToolDefinition, TOOL_USE_FAILED_CODE,
};

/// Client for `POST {base_url}/chat/completions`.
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AssistantMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<String>,
}

impl OpenAiCompatClient {
    /// Create a client. `base_url` is the API root, without `/chat/completions`.
    pub fn new(api_key: String, base_url: &str, timeout: Duration) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_secs: timeout.as_secs(),
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<ChatResponse, LlmError> {
        let mut body = json!({
            "model": model,
            "messages": messages,
            "temperature": 0,
        });
        if let Some(tools) = tools.filter(|t| !t.is_empty()) {
            body["tools"] = json!(tools);
            body["tool_choice"] = json!("auto");
        }

        tracing::debug!(model, messages = messages.len(), "Sending completion request");

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(self.timeout_secs)
                } else {
                    LlmError::Http(format!("Request failed: {}", e))
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| LlmError::Http(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(parse_api_error(status.as_u16(), &text));
        }

        let parsed: CompletionResponse = serde_json::from_str(&text)
            .map_err(|e| LlmError::InvalidResponse(format!("{}", e)))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("response has no choices".to_string()))?;

        Ok(ChatResponse {
            content: choice.message.content,
            tool_calls: choice.message.tool_calls,
            finish_reason: choice.finish_reason,
        })
    }
}

/// Map a non-2xx body to an error, recognising rejected tool calls.
fn parse_api_error(status: u16, body: &str) -> LlmError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => {
            if envelope.error.code.as_deref() == Some(TOOL_USE_FAILED_CODE) {
                LlmError::ToolUseFailed {
                    code: TOOL_USE_FAILED_CODE.to_string(),
                    message: envelope.error.message,
                }
            } else {
                LlmError::Api {
                    status,
                    message: envelope.error.message,
                }
            }
        }
        Err(_) => LlmError::Api {
            status,
            message: body.chars().take(500).collect(),
        },
    }
}
