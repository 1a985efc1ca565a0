use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::Role;

/// A flat, prompt-ready message as handed to the language model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Incremental text deltas from a streaming model call.
pub type ModelStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// External language-model collaborator.
#[async_trait]
pub trait ModelService: Send + Sync {
    /// Complete a turn and return the full response text.
    async fn generate_response(&self, messages: &[PromptMessage]) -> Result<String>;

    /// Complete a turn as a stream of text deltas.
    async fn stream_response(&self, messages: &[PromptMessage]) -> Result<ModelStream>;

    /// Complete a turn constrained to a JSON object matching `schema`.
    async fn generate_structured_response(
        &self,
        messages: &[PromptMessage],
        schema: &serde_json::Value,
    ) -> Result<serde_json::Value>;
}
