use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{BackendConfig, SamplingParams};
use crate::error::{ExtractError, Result};
use crate::prompt::Message;

/// A function the model may call instead of (or alongside) answering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
    Required,
}

/// What a caller asks of the backend for one call.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub response_format: Option<Value>,
    pub tools: Vec<ToolSpec>,
    pub tool_choice: ToolChoice,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages, ..Self::default() }
    }

    pub fn with_response_format(mut self, format: Value) -> Self {
        self.response_format = Some(format);
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>, choice: ToolChoice) -> Self {
        self.tools = tools;
        self.tool_choice = choice;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Value,
}

/// Reply shape depends on whether tools were offered.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    Content(String),
    WithTools {
        content: Option<String>,
        tool_calls: Vec<ToolCall>,
    },
}

impl ModelReply {
    pub fn content(&self) -> &str {
        match self {
            ModelReply::Content(text) => text,
            ModelReply::WithTools { content, .. } => content.as_deref().unwrap_or(""),
        }
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            ModelReply::Content(_) => &[],
            ModelReply::WithTools { tool_calls, .. } => tool_calls,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelOutput {
    pub reply: ModelReply,
    pub total_tokens: u64,
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn invoke(&self, request: ChatRequest) -> Result<ModelOutput>;
}

#[async_trait]
impl<C: ModelClient + ?Sized> ModelClient for Arc<C> {
    async fn invoke(&self, request: ChatRequest) -> Result<ModelOutput> {
        (**self).invoke(request).await
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionTool {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: ToolSpec,
}

/// Body of one chat-completion call. Lives only for that call.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInvocation {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<FunctionTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
}

impl ModelInvocation {
    pub fn new(model: &str, sampling: SamplingParams, request: ChatRequest) -> Self {
        let tool_choice = (!request.tools.is_empty()).then_some(request.tool_choice);
        let tools = request
            .tools
            .into_iter()
            .map(|function| FunctionTool { kind: "function", function })
            .collect();

        Self {
            model: model.to_string(),
            messages: request.messages,
            temperature: sampling.temperature,
            max_tokens: sampling.max_tokens,
            top_p: sampling.top_p,
            response_format: request.response_format,
            tools,
            tool_choice,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<RawToolCall>>,
}

#[derive(Debug, Deserialize)]
struct RawToolCall {
    function: RawFunction,
}

#[derive(Debug, Deserialize)]
struct RawFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: u64,
}

fn classify_response(completion: ChatCompletion, tools_requested: bool) -> Result<ModelOutput> {
    let total_tokens = completion.usage.map(|u| u.total_tokens).unwrap_or(0);
    let message = completion
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message)
        .ok_or_else(|| ExtractError::Backend(anyhow::anyhow!("response contained no choices")))?;

    if !tools_requested {
        return Ok(ModelOutput {
            reply: ModelReply::Content(message.content.unwrap_or_default()),
            total_tokens,
        });
    }

    let mut tool_calls = Vec::new();
    for call in message.tool_calls.unwrap_or_default() {
        match serde_json::from_str::<Value>(&call.function.arguments) {
            Ok(arguments) => tool_calls.push(ToolCall { name: call.function.name, arguments }),
            Err(e) => warn!(
                tool = %call.function.name,
                error = %e,
                "Dropping tool call with undecodable arguments"
            ),
        }
    }

    Ok(ModelOutput {
        reply: ModelReply::WithTools { content: message.content, tool_calls },
        total_tokens,
    })
}

/// Client for OpenAI-compatible chat-completion endpoints.
#[derive(Clone)]
pub struct OpenAiClient {
    base_url: String,
    api_key: Option<String>,
    model: String,
    sampling: SamplingParams,
    client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ExtractError::Config(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            sampling: config.sampling,
            client,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn build_invocation(&self, request: ChatRequest) -> ModelInvocation {
        ModelInvocation::new(&self.model, self.sampling, request)
    }

    async fn send(&self, invocation: &ModelInvocation) -> anyhow::Result<ChatCompletion> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut request = self.client.post(&url).json(invocation);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .context("Failed to send request to model backend")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Model backend request failed: {}: {}", status, body.trim());
        }

        response
            .json()
            .await
            .context("Failed to parse model backend response")
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn invoke(&self, request: ChatRequest) -> Result<ModelOutput> {
        let tools_requested = !request.tools.is_empty();
        let invocation = self.build_invocation(request);

        let completion = self.send(&invocation).await.map_err(ExtractError::Backend)?;
        let output = classify_response(completion, tools_requested)?;

        debug!(model = %self.model, total_tokens = output.total_tokens, "Model call completed");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn completion(value: Value) -> ChatCompletion {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_invocation_carries_sampling_and_schema() {
        let config = BackendConfig { model: "gpt-4o-mini".into(), ..BackendConfig::default() };
        let client = OpenAiClient::new(&config).unwrap();
        let request = ChatRequest::new(vec![Message::system("sys"), Message::user("hi")])
            .with_response_format(json!({"type": "json_schema"}));

        let body = serde_json::to_value(client.build_invocation(request)).unwrap();
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["temperature"], 1.0);
        assert_eq!(body["max_tokens"], 8192);
        assert_eq!(body["top_p"], 1.0);
        assert_eq!(body["messages"][1], json!({"role": "user", "content": "hi"}));
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
    }

    #[test]
    fn test_invocation_with_tools() {
        let tool = ToolSpec {
            name: "record_entity".into(),
            description: "Record one entity".into(),
            parameters: json!({"type": "object"}),
        };
        let request = ChatRequest::new(vec![Message::user("hi")]).with_tools(vec![tool], ToolChoice::Auto);

        let body = serde_json::to_value(ModelInvocation::new("m", SamplingParams::default(), request)).unwrap();
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "record_entity");
        assert_eq!(body["tool_choice"], "auto");
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn test_plain_content_reply() {
        let raw = completion(json!({
            "choices": [{"message": {"role": "assistant", "content": "{\"entities\": []}"}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }));

        let output = classify_response(raw, false).unwrap();
        assert_eq!(output.reply, ModelReply::Content("{\"entities\": []}".into()));
        assert_eq!(output.total_tokens, 15);
    }

    #[test]
    fn test_tool_reply_drops_undecodable_arguments() {
        let raw = completion(json!({
            "choices": [{"message": {
                "content": null,
                "tool_calls": [
                    {"id": "1", "type": "function", "function": {"name": "good", "arguments": "{\"name\": \"IMEI\"}"}},
                    {"id": "2", "type": "function", "function": {"name": "bad", "arguments": "{\"name\": "}}
                ]
            }}],
            "usage": {"total_tokens": 7}
        }));

        let output = classify_response(raw, true).unwrap();
        assert_eq!(output.reply.content(), "");
        assert_eq!(output.reply.tool_calls().len(), 1);
        assert_eq!(output.reply.tool_calls()[0].name, "good");
        assert_eq!(output.reply.tool_calls()[0].arguments, json!({"name": "IMEI"}));
    }

    #[test]
    fn test_empty_choices_is_backend_error() {
        let raw = completion(json!({"choices": []}));
        let err = classify_response(raw, false).unwrap_err();
        assert!(matches!(err, ExtractError::Backend(_)));
    }
}
