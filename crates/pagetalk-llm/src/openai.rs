use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;

use pagetalk_core::{ChatError, ModelService, ModelStream, PromptMessage, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct OpenAiModelService {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiModelService {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            // Connect timeout only: streamed completions run long by design.
            client: Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .build()
                .unwrap_or_else(|_| Client::new()),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn request_body(&self, messages: &[PromptMessage], stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": stream,
        })
    }

    async fn post_completion(&self, body: &serde_json::Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
            .map_err(|error| ChatError::upstream(format!("model request failed: {error}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            log::warn!("chat completion request rejected with HTTP {status}");
            return Err(ChatError::upstream(format!(
                "model returned HTTP {status}: {text}"
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl ModelService for OpenAiModelService {
    async fn generate_response(&self, messages: &[PromptMessage]) -> Result<String> {
        let body = self.request_body(messages, false);
        let response = self.post_completion(&body).await?;
        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|error| ChatError::upstream(format!("malformed completion: {error}")))?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.unwrap_or_default())
            .ok_or_else(|| ChatError::upstream("completion carried no choices"))
    }

    async fn stream_response(&self, messages: &[PromptMessage]) -> Result<ModelStream> {
        let body = self.request_body(messages, true);
        let response = self.post_completion(&body).await?;

        let stream = response
            .bytes_stream()
            .eventsource()
            .map(|event| {
                let event = event
                    .map_err(|error| ChatError::upstream(format!("stream error: {error}")))?;
                if event.data == "[DONE]" {
                    return Ok(None);
                }
                let chunk: StreamChunk = serde_json::from_str(&event.data)
                    .map_err(|error| ChatError::upstream(format!("malformed chunk: {error}")))?;
                Ok(chunk
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.delta.content)
                    .filter(|content| !content.is_empty()))
            })
            .filter_map(|result: Result<Option<String>>| async move {
                match result {
                    Ok(Some(delta)) => Some(Ok(delta)),
                    Ok(None) => None,
                    Err(error) => Some(Err(error)),
                }
            });

        Ok(Box::pin(stream))
    }

    async fn generate_structured_response(
        &self,
        messages: &[PromptMessage],
        schema: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        // json_object mode guarantees well-formed JSON; the schema itself is
        // conveyed as a trailing instruction.
        let mut messages = messages.to_vec();
        messages.push(PromptMessage::system(format!(
            "Respond with a single JSON object matching this schema:\n{schema}"
        )));

        let mut body = self.request_body(&messages, false);
        body["response_format"] = serde_json::json!({ "type": "json_object" });

        let response = self.post_completion(&body).await?;
        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|error| ChatError::upstream(format!("malformed completion: {error}")))?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ChatError::upstream("completion carried no content"))?;

        serde_json::from_str(strip_code_fences(&content))
            .map_err(|error| ChatError::upstream(format!("structured response is not JSON: {error}")))
    }
}

/// Some models wrap JSON in a markdown fence even in json_object mode.
fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
}
