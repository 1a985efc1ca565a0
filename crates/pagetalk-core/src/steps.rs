use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Thought,
    Action,
    Result,
    Error,
    Timeout,
}

/// One persisted step of an agent invocation.
///
/// Steps for a single user message are totally ordered by `step_number` and
/// written before the next model call, so a crash mid-loop leaves a
/// replayable partial trace. `assistant_message_id` starts out empty and is
/// backfilled exactly once, across all steps of the invocation, when the
/// loop terminates with an answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProcessStep {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub user_message_id: Uuid,
    pub assistant_message_id: Option<Uuid>,
    pub step_number: u32,
    pub step_type: StepType,
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl AgentProcessStep {
    pub fn new(
        conversation_id: Uuid,
        user_message_id: Uuid,
        step_number: u32,
        step_type: StepType,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            user_message_id,
            assistant_message_id: None,
            step_number,
            step_type,
            content: content.into(),
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}
