use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Well-known metadata keys on [`Message::metadata`].
pub mod meta {
    /// Block the user selected when composing this turn.
    pub const BLOCK_ID: &str = "block_id";
    /// Set while a streaming placeholder has not been finalized.
    pub const PENDING: &str = "pending";
    /// Error description when a generation failed.
    pub const ERROR: &str = "error";
    /// On an agent answer, the user message that triggered the loop.
    pub const USER_MESSAGE_ID: &str = "user_message_id";
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A node in a conversation's message DAG.
///
/// Parent/child links are id references into the message pool, never owning
/// references, so the graph stays an arena keyed by id. Siblings under one
/// parent are alternative versions of a turn; at most one of them is the
/// parent's `active_child_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: Role,
    pub content: String,
    /// None only for the conversation's root system message.
    pub parent_id: Option<Uuid>,
    /// Which child (if any) is on the active thread.
    pub active_child_id: Option<Uuid>,
    /// 1-based version among siblings sharing the same parent.
    pub version: u32,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn new(
        conversation_id: Uuid,
        role: Role,
        content: impl Into<String>,
        parent_id: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            role,
            content: content.into(),
            parent_id,
            active_child_id: None,
            version: 1,
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn system(conversation_id: Uuid, content: impl Into<String>) -> Self {
        Self::new(conversation_id, Role::System, content, None)
    }

    pub fn user(conversation_id: Uuid, content: impl Into<String>, parent_id: Uuid) -> Self {
        Self::new(conversation_id, Role::User, content, Some(parent_id))
    }

    /// Empty assistant message persisted before generation starts, so the
    /// caller can subscribe to its stream while tokens are still arriving.
    pub fn assistant_placeholder(conversation_id: Uuid, parent_id: Uuid) -> Self {
        let mut message = Self::new(conversation_id, Role::Assistant, "", Some(parent_id));
        message.metadata = serde_json::json!({ meta::PENDING: true });
        message
    }

    /// New sibling of `original` carrying edited content. Shares the parent
    /// and metadata; the caller assigns the next version among the siblings.
    pub fn sibling_of(original: &Message, content: impl Into<String>, version: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id: original.conversation_id,
            role: original.role,
            content: content.into(),
            parent_id: original.parent_id,
            active_child_id: None,
            version,
            metadata: original.metadata.clone(),
            created_at: Utc::now(),
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Block reference recorded when the user selected text in the document.
    pub fn block_reference(&self) -> Option<Uuid> {
        self.metadata
            .get(meta::BLOCK_ID)
            .and_then(|value| value.as_str())
            .and_then(|raw| Uuid::parse_str(raw).ok())
    }

    pub fn set_block_reference(&mut self, block_id: Uuid) {
        if !self.metadata.is_object() {
            self.metadata = serde_json::json!({});
        }
        if let Some(map) = self.metadata.as_object_mut() {
            map.insert(
                meta::BLOCK_ID.to_string(),
                serde_json::Value::String(block_id.to_string()),
            );
        }
    }

    pub fn is_pending(&self) -> bool {
        self.metadata
            .get(meta::PENDING)
            .and_then(|value| value.as_bool())
            .unwrap_or(false)
    }

    pub fn error_marker(&self) -> Option<&str> {
        self.metadata.get(meta::ERROR).and_then(|value| value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_is_pending_until_finalized() {
        let conversation_id = Uuid::new_v4();
        let parent = Uuid::new_v4();
        let placeholder = Message::assistant_placeholder(conversation_id, parent);

        assert!(placeholder.is_pending());
        assert_eq!(placeholder.parent_id, Some(parent));
        assert!(placeholder.content.is_empty());
    }

    #[test]
    fn block_reference_round_trips_through_metadata() {
        let mut message = Message::user(Uuid::new_v4(), "what is this?", Uuid::new_v4());
        assert_eq!(message.block_reference(), None);

        let block_id = Uuid::new_v4();
        message.set_block_reference(block_id);
        assert_eq!(message.block_reference(), Some(block_id));
    }

    #[test]
    fn root_system_message_has_no_parent() {
        let root = Message::system(Uuid::new_v4(), "You are reading a document.");
        assert_eq!(root.parent_id, None);
        assert_eq!(root.version, 1);
    }
}
