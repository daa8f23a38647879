//! OpenAI-compatible chat completions adapter.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::reasoning::model::{
    ChatMessage, LanguageModel, ModelError, ModelReply, ModelRequest, ToolCall,
};

pub struct OpenAiChatModel {
    client: Client,
    api_base: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl OpenAiChatModel {
    pub fn new(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        request_timeout: Duration,
    ) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("crew/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.2,
        })
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    #[instrument(skip_all, fields(model = %self.model, messages = request.messages.len()))]
    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ModelError> {
        let body = request_body(&self.model, self.temperature, request);
        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| ModelError::Unreachable(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => ModelError::Auth(message),
                code => ModelError::Api {
                    status: code,
                    message,
                },
            });
        }

        let payload: ChatResponse = response
            .json()
            .await
            .map_err(|err| ModelError::InvalidResponse(err.to_string()))?;
        let reply = parse_reply(payload)?;
        debug!(
            calls = reply.tool_calls.len(),
            has_content = reply.content.is_some(),
            "model replied"
        );
        Ok(reply)
    }
}

fn message_json(message: &ChatMessage) -> Value {
    let mut json = json!({
        "role": message.role,
        "content": message.content,
    });
    if !message.tool_calls.is_empty() {
        json["tool_calls"] = message
            .tool_calls
            .iter()
            .map(|call| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": {
                        "name": call.name,
                        "arguments": call.arguments.to_string(),
                    }
                })
            })
            .collect::<Vec<_>>()
            .into();
    }
    if let Some(id) = &message.tool_call_id {
        json["tool_call_id"] = json!(id);
    }
    json
}

pub(crate) fn request_body(model: &str, temperature: f32, request: &ModelRequest) -> Value {
    let mut body = json!({
        "model": model,
        "temperature": temperature,
        "messages": request.messages.iter().map(message_json).collect::<Vec<_>>(),
    });
    if !request.functions.is_empty() {
        body["tools"] = request
            .functions
            .iter()
            .map(|f| {
                json!({
                    "type": "function",
                    "function": {
                        "name": f.name,
                        "description": f.description,
                        "parameters": f.parameters,
                    }
                })
            })
            .collect::<Vec<_>>()
            .into();
        body["tool_choice"] = json!("auto");
    }
    body
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ResponseToolCall>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    id: String,
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    arguments: String,
}

pub(crate) fn parse_reply(payload: ChatResponse) -> Result<ModelReply, ModelError> {
    let choice = payload
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ModelError::InvalidResponse("no choices in response".to_string()))?;
    let tool_calls = choice
        .message
        .tool_calls
        .into_iter()
        .map(|call| ToolCall {
            id: call.id,
            name: call.function.name,
            // Malformed arguments reach the agent loop as a call with no query.
            arguments: serde_json::from_str(&call.function.arguments)
                .unwrap_or_else(|_| json!({})),
        })
        .collect();
    Ok(ModelReply {
        content: choice.message.content,
        tool_calls,
    })
}
