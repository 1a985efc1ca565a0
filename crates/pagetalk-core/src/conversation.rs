use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    /// Free-form chat, optionally anchored to a document.
    Chat,
    /// Sub-discussion scoped to a highlighted span inside one block.
    Rabbithole,
    /// Rabbithole answered by the tool-using agent loop.
    AgentRabbithole,
}

impl ConversationKind {
    pub fn is_agent(self) -> bool {
        matches!(self, Self::AgentRabbithole)
    }

    /// Rabbithole kinds require a source block anchor.
    pub fn requires_block_anchor(self) -> bool {
        matches!(self, Self::Rabbithole | Self::AgentRabbithole)
    }
}

/// Character offsets of the highlighted span within the source block.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TextSelection {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub kind: ConversationKind,
    /// Always resolves to a parentless system message.
    pub root_message_id: Uuid,
    pub document_id: Option<Uuid>,
    pub source_block_id: Option<Uuid>,
    pub selection: Option<TextSelection>,
    pub selected_text: Option<String>,
    /// Page numbers already supplied as full context, ordered by first
    /// inclusion. Monotonic: pages are recorded once and never removed.
    #[serde(default)]
    pub included_pages: Vec<u32>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(kind: ConversationKind, root_message_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            root_message_id,
            document_id: None,
            source_block_id: None,
            selection: None,
            selected_text: None,
            included_pages: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn has_page(&self, page_number: u32) -> bool {
        self.included_pages.contains(&page_number)
    }

    /// Record a page as included. Returns true when the page was new.
    pub fn record_page(&mut self, page_number: u32) -> bool {
        if self.has_page(page_number) {
            return false;
        }
        self.included_pages.push(page_number);
        true
    }

    pub fn is_agent(&self) -> bool {
        self.kind.is_agent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_page_is_idempotent_and_ordered() {
        let mut conversation = Conversation::new(ConversationKind::Chat, Uuid::new_v4());

        assert!(conversation.record_page(0));
        assert!(conversation.record_page(3));
        assert!(!conversation.record_page(0));
        assert!(conversation.record_page(4));

        assert_eq!(conversation.included_pages, vec![0, 3, 4]);
    }

    #[test]
    fn rabbithole_kinds_require_block_anchor() {
        assert!(!ConversationKind::Chat.requires_block_anchor());
        assert!(ConversationKind::Rabbithole.requires_block_anchor());
        assert!(ConversationKind::AgentRabbithole.requires_block_anchor());
        assert!(ConversationKind::AgentRabbithole.is_agent());
    }
}
