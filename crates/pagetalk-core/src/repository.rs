use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conversation::{Conversation, ConversationKind};
use crate::error::Result;
use crate::message::Message;
use crate::steps::AgentProcessStep;

/// Criteria for conversation discovery (rabbitholes by block or document).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationQuery {
    pub document_id: Option<Uuid>,
    pub source_block_id: Option<Uuid>,
    pub kind: Option<ConversationKind>,
}

/// Durable store for conversations and their message nodes.
///
/// Messages are append-only with two exceptions: `update_active_child`
/// re-points a parent's branch pointer, and `finalize_message` completes a
/// streaming placeholder. Both must be single atomic writes; callers never
/// get to read-modify-write across an await point.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Persist a conversation together with its root system message.
    async fn create_conversation(&self, conversation: Conversation, root: Message) -> Result<()>;

    async fn get_conversation(&self, id: Uuid) -> Result<Conversation>;

    /// Union `pages` into the conversation's inclusion cache in one atomic
    /// operation, preserving first-inclusion order and skipping duplicates.
    /// Additive so concurrent generations on one conversation never clobber
    /// each other's entries.
    async fn add_included_pages(&self, id: Uuid, pages: &[u32]) -> Result<()>;

    async fn find_conversations(&self, query: &ConversationQuery) -> Result<Vec<Conversation>>;

    async fn insert_message(&self, message: Message) -> Result<()>;

    async fn get_message(&self, id: Uuid) -> Result<Message>;

    /// All messages of a conversation, unordered.
    async fn get_conversation_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>>;

    /// Atomically re-point a message's active-child pointer.
    async fn update_active_child(&self, message_id: Uuid, child_id: Option<Uuid>) -> Result<()>;

    /// Complete a streaming placeholder with its final content and metadata.
    async fn finalize_message(
        &self,
        message_id: Uuid,
        content: String,
        metadata: serde_json::Value,
    ) -> Result<()>;
}

/// Append/query store for agent loop steps.
#[async_trait]
pub trait AgentProcessRepository: Send + Sync {
    async fn append_step(&self, step: AgentProcessStep) -> Result<()>;

    /// Steps ordered by `step_number`.
    async fn steps_for_user_message(&self, user_message_id: Uuid) -> Result<Vec<AgentProcessStep>>;

    /// Steps ordered by `step_number`, looked up by the concluding answer.
    async fn steps_for_assistant_message(
        &self,
        assistant_message_id: Uuid,
    ) -> Result<Vec<AgentProcessStep>>;

    /// Set `assistant_message_id` on every step of an invocation at once.
    /// Returns the number of steps updated.
    async fn backfill_assistant_message(
        &self,
        user_message_id: Uuid,
        assistant_message_id: Uuid,
    ) -> Result<u32>;
}
