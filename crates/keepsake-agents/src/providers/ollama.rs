use async_trait::async_trait;
use keepsake_common::{Error, Result, Usage};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::{ChatMessage, ChatRole, ContentBlock, LlmProvider, LlmRequest, LlmResponse, MessagePart};

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

#[derive(Clone)]
pub struct OllamaProvider {
    base_url: String,
    client: Client,
}

impl OllamaProvider {
    pub fn new(base_url: Option<String>) -> Self {
        let base_url = base_url.unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    fn build_request_body(&self, request: &LlmRequest) -> Value {
        let mut messages: Vec<Value> = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.extend(request.messages.iter().map(convert_message));

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "stream": false,
        });

        if !request.tools.is_empty() {
            body["tools"] = Value::Array(
                request
                    .tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.input_schema,
                            }
                        })
                    })
                    .collect(),
            );
        }

        let mut options = serde_json::Map::new();
        if let Some(temp) = request.temperature {
            options.insert("temperature".to_string(), json!(temp));
        }
        if let Some(max_tokens) = request.max_tokens {
            options.insert("num_predict".to_string(), json!(max_tokens));
        }
        if !options.is_empty() {
            body["options"] = Value::Object(options);
        }

        body
    }

    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);
        let res = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Agent(format!("Failed to list models: {}", e)))?;

        if !res.status().is_success() {
            return Err(Error::Agent(format!(
                "Ollama error status: {}",
                res.status()
            )));
        }

        let models_res: OllamaModelsResponse = res
            .json()
            .await
            .map_err(|e| Error::Agent(format!("Failed to parse models response: {}", e)))?;

        Ok(models_res.models.into_iter().map(|m| m.name).collect())
    }
}

fn role_name(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
        ChatRole::Tool => "tool",
    }
}

fn convert_message(msg: &ChatMessage) -> Value {
    let parts = match &msg.content {
        MessagePart::Text(text) => {
            return json!({ "role": role_name(msg.role), "content": text });
        }
        MessagePart::Parts(parts) => parts,
    };

    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();
    for part in parts {
        match part {
            ContentBlock::Text { text } => text_parts.push(text.as_str()),
            ContentBlock::ToolUse { name, input, .. } => tool_calls.push(json!({
                "function": { "name": name, "arguments": input }
            })),
            ContentBlock::ToolResult { content, .. } => text_parts.push(content.as_str()),
        }
    }

    let mut obj = json!({
        "role": role_name(msg.role),
        "content": text_parts.join("\n"),
    });
    if !tool_calls.is_empty() {
        obj["tool_calls"] = Value::Array(tool_calls);
    }
    obj
}

#[derive(Deserialize)]
struct OllamaResponse {
    model: String,
    message: Option<OllamaMessage>,
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    eval_count: u32,
    #[serde(default)]
    prompt_eval_count: u32,
}

#[derive(Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<OllamaToolCall>,
}

#[derive(Deserialize)]
struct OllamaToolCall {
    #[serde(default)]
    id: Option<String>,
    function: OllamaFunctionCall,
}

#[derive(Deserialize)]
struct OllamaFunctionCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Deserialize)]
struct OllamaModelsResponse {
    models: Vec<OllamaModel>,
}

#[derive(Deserialize)]
struct OllamaModel {
    name: String,
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn provider_id(&self) -> &str {
        "ollama"
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let body = self.build_request_body(request);
        let url = format!("{}/api/chat", self.base_url);

        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Agent(format!("Ollama request failed: {}", e)))?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(Error::Agent(format!(
                "Ollama error status: {} {}",
                status, text
            )));
        }

        let ollama_res: OllamaResponse = res
            .json()
            .await
            .map_err(|e| Error::Agent(format!("Failed to parse Ollama response: {}", e)))?;

        let mut content = Vec::new();
        if let Some(msg) = ollama_res.message {
            if !msg.content.is_empty() {
                content.push(ContentBlock::Text { text: msg.content });
            }
            for call in msg.tool_calls {
                let arguments = match call.function.arguments {
                    // Some models return the arguments JSON-encoded.
                    Value::String(raw) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
                    Value::Null => json!({}),
                    other => other,
                };
                content.push(ContentBlock::ToolUse {
                    id: call
                        .id
                        .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple())),
                    name: call.function.name,
                    input: arguments,
                });
            }
        }
        debug!(blocks = content.len(), "ollama completion received");

        Ok(LlmResponse {
            content,
            model: ollama_res.model,
            usage: Some(Usage {
                input_tokens: ollama_res.prompt_eval_count,
                output_tokens: ollama_res.eval_count,
            }),
            stop_reason: if ollama_res.done {
                Some(ollama_res.done_reason.unwrap_or_else(|| "stop".to_string()))
            } else {
                None
            },
        })
    }

    async fn health_check(&self) -> Result<bool> {
        match self.list_models().await {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }
}
