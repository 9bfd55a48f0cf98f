use async_trait::async_trait;
use keepsake_common::{Error, Result, Usage};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{
    ChatMessage, ChatRole, ContentBlock, LlmProvider, LlmRequest, LlmResponse, MessagePart,
    extract_text,
};

pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

/// Client for OpenAI-compatible `/chat/completions` endpoints.
#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        let base_url = base_url.unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string());
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn convert_request(&self, request: &LlmRequest) -> Result<OpenAiRequest> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);

        if let Some(system_prompt) = &request.system {
            messages.push(OpenAiMessage::System {
                content: system_prompt.clone(),
            });
        }

        for msg in &request.messages {
            messages.push(convert_message(msg)?);
        }

        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(
                request
                    .tools
                    .iter()
                    .map(|t| OpenAiTool {
                        kind: "function".to_string(),
                        function: OpenAiFunctionDefinition {
                            name: t.name.clone(),
                            description: t.description.clone(),
                            parameters: t.input_schema.clone(),
                        },
                    })
                    .collect(),
            )
        };

        Ok(OpenAiRequest {
            model: request.model.clone(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            tools,
        })
    }

    fn convert_response(&self, response: OpenAiResponse) -> Result<LlmResponse> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Agent("No choices in response".to_string()))?;
        let message = choice.message;

        let mut content_blocks = Vec::new();

        if let Some(text) = message.content.filter(|t| !t.is_empty()) {
            content_blocks.push(ContentBlock::Text { text });
        }

        for tc in message.tool_calls.unwrap_or_default() {
            let input_json = serde_json::from_str(&tc.function.arguments).unwrap_or_else(|e| {
                warn!(
                    tool = %tc.function.name,
                    "tool arguments are not valid JSON: {e}"
                );
                serde_json::Value::String(tc.function.arguments.clone())
            });

            content_blocks.push(ContentBlock::ToolUse {
                id: tc.id,
                name: tc.function.name,
                input: input_json,
            });
        }

        Ok(LlmResponse {
            content: content_blocks,
            model: response.model,
            usage: response.usage.map(|u| Usage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            }),
            stop_reason: choice.finish_reason,
        })
    }
}

fn convert_message(msg: &ChatMessage) -> Result<OpenAiMessage> {
    match msg.role {
        ChatRole::System => Ok(OpenAiMessage::System {
            content: msg.text_content(),
        }),
        ChatRole::User => Ok(OpenAiMessage::User {
            content: msg.text_content(),
        }),
        ChatRole::Assistant => {
            let (content, tool_calls) = match &msg.content {
                MessagePart::Text(t) => (Some(t.clone()), Vec::new()),
                MessagePart::Parts(parts) => {
                    let tool_calls: Vec<OpenAiToolCall> = parts
                        .iter()
                        .filter_map(|part| match part {
                            ContentBlock::ToolUse { id, name, input } => Some(OpenAiToolCall {
                                id: id.clone(),
                                kind: "function".to_string(),
                                function: OpenAiFunctionCall {
                                    name: name.clone(),
                                    arguments: input.to_string(),
                                },
                            }),
                            _ => None,
                        })
                        .collect();
                    let text = extract_text(parts);
                    ((!text.is_empty()).then_some(text), tool_calls)
                }
            };

            Ok(OpenAiMessage::Assistant {
                content,
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
            })
        }
        ChatRole::Tool => {
            let (tool_call_id, content) = match &msg.content {
                MessagePart::Parts(parts) => parts
                    .iter()
                    .find_map(|p| match p {
                        ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                        } => Some((tool_use_id.clone(), content.clone())),
                        _ => None,
                    })
                    .ok_or_else(|| {
                        Error::Agent("Tool message missing ToolResult content".to_string())
                    })?,
                MessagePart::Text(_) => {
                    return Err(Error::Agent(
                        "Tool message must have Parts content with ToolResult".to_string(),
                    ));
                }
            };

            Ok(OpenAiMessage::Tool {
                tool_call_id,
                content,
            })
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn provider_id(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let openai_request = self.convert_request(request)?;

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&openai_request)
            .send()
            .await
            .map_err(|e| Error::Agent(format!("OpenAI request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::Agent(format!(
                "OpenAI API error ({status}): {error_text}"
            )));
        }

        let openai_response: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| Error::Agent(format!("Failed to parse OpenAI response: {}", e)))?;

        self.convert_response(openai_response)
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await;

        match response {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}

// Request Types
#[derive(Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAiTool>>,
}

#[derive(Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
enum OpenAiMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<OpenAiToolCall>>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

#[derive(Serialize, Deserialize, Clone, Debug)]
struct OpenAiToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: OpenAiFunctionCall,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct OpenAiTool {
    #[serde(rename = "type")]
    kind: String,
    function: OpenAiFunctionDefinition,
}

#[derive(Serialize)]
struct OpenAiFunctionDefinition {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// Response Types
#[derive(Deserialize)]
struct OpenAiResponse {
    model: String,
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
