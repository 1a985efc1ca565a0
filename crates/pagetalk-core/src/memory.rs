//! In-memory repository implementations.
//!
//! These back the default server wiring and the test suites. They double as
//! the reference semantics for the relational adapters that live outside
//! this workspace: every mutation here is a single map operation, matching
//! the "atomic pointer write" contract of the traits.

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::conversation::Conversation;
use crate::document::{Block, DocumentRepository, Page};
use crate::error::{ChatError, Result};
use crate::message::Message;
use crate::repository::{AgentProcessRepository, ConversationQuery, ConversationRepository};
use crate::steps::AgentProcessStep;

#[derive(Default)]
pub struct InMemoryConversationRepository {
    conversations: DashMap<Uuid, Conversation>,
    messages: DashMap<Uuid, Message>,
}

impl InMemoryConversationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn create_conversation(&self, conversation: Conversation, root: Message) -> Result<()> {
        if root.parent_id.is_some() {
            return Err(ChatError::precondition("root message must have no parent"));
        }
        self.messages.insert(root.id, root);
        self.conversations.insert(conversation.id, conversation);
        Ok(())
    }

    async fn get_conversation(&self, id: Uuid) -> Result<Conversation> {
        self.conversations
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ChatError::not_found(format!("conversation {id}")))
    }

    async fn add_included_pages(&self, id: Uuid, pages: &[u32]) -> Result<()> {
        let mut entry = self
            .conversations
            .get_mut(&id)
            .ok_or_else(|| ChatError::not_found(format!("conversation {id}")))?;
        for page in pages {
            entry.record_page(*page);
        }
        Ok(())
    }

    async fn find_conversations(&self, query: &ConversationQuery) -> Result<Vec<Conversation>> {
        let mut matches: Vec<Conversation> = self
            .conversations
            .iter()
            .filter(|entry| {
                let conversation = entry.value();
                query
                    .document_id
                    .map_or(true, |id| conversation.document_id == Some(id))
                    && query
                        .source_block_id
                        .map_or(true, |id| conversation.source_block_id == Some(id))
                    && query.kind.map_or(true, |kind| conversation.kind == kind)
            })
            .map(|entry| entry.value().clone())
            .collect();
        matches.sort_by_key(|conversation| conversation.created_at);
        Ok(matches)
    }

    async fn insert_message(&self, message: Message) -> Result<()> {
        self.messages.insert(message.id, message);
        Ok(())
    }

    async fn get_message(&self, id: Uuid) -> Result<Message> {
        self.messages
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ChatError::not_found(format!("message {id}")))
    }

    async fn get_conversation_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>> {
        Ok(self
            .messages
            .iter()
            .filter(|entry| entry.value().conversation_id == conversation_id)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn update_active_child(&self, message_id: Uuid, child_id: Option<Uuid>) -> Result<()> {
        let mut entry = self
            .messages
            .get_mut(&message_id)
            .ok_or_else(|| ChatError::not_found(format!("message {message_id}")))?;
        entry.active_child_id = child_id;
        Ok(())
    }

    async fn finalize_message(
        &self,
        message_id: Uuid,
        content: String,
        metadata: serde_json::Value,
    ) -> Result<()> {
        let mut entry = self
            .messages
            .get_mut(&message_id)
            .ok_or_else(|| ChatError::not_found(format!("message {message_id}")))?;
        entry.content = content;
        entry.metadata = metadata;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryAgentProcessRepository {
    steps: DashMap<Uuid, AgentProcessStep>,
}

impl InMemoryAgentProcessRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn ordered(&self, filter: impl Fn(&AgentProcessStep) -> bool) -> Vec<AgentProcessStep> {
        let mut steps: Vec<AgentProcessStep> = self
            .steps
            .iter()
            .filter(|entry| filter(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        steps.sort_by_key(|step| step.step_number);
        steps
    }
}

#[async_trait]
impl AgentProcessRepository for InMemoryAgentProcessRepository {
    async fn append_step(&self, step: AgentProcessStep) -> Result<()> {
        self.steps.insert(step.id, step);
        Ok(())
    }

    async fn steps_for_user_message(&self, user_message_id: Uuid) -> Result<Vec<AgentProcessStep>> {
        Ok(self.ordered(|step| step.user_message_id == user_message_id))
    }

    async fn steps_for_assistant_message(
        &self,
        assistant_message_id: Uuid,
    ) -> Result<Vec<AgentProcessStep>> {
        Ok(self.ordered(|step| step.assistant_message_id == Some(assistant_message_id)))
    }

    async fn backfill_assistant_message(
        &self,
        user_message_id: Uuid,
        assistant_message_id: Uuid,
    ) -> Result<u32> {
        let mut updated = 0;
        for mut entry in self.steps.iter_mut() {
            if entry.user_message_id == user_message_id {
                entry.assistant_message_id = Some(assistant_message_id);
                updated += 1;
            }
        }
        Ok(updated)
    }
}

#[derive(Default)]
pub struct InMemoryDocumentRepository {
    pages: DashMap<Uuid, Page>,
    blocks: DashMap<Uuid, Block>,
}

impl InMemoryDocumentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_page(&self, page: Page) {
        self.pages.insert(page.id, page);
    }

    pub fn insert_block(&self, block: Block) {
        self.blocks.insert(block.id, block);
    }

    /// Seed a page with one block per content string. Returns the block ids
    /// in order. Convenience for tests and demo wiring.
    pub fn seed_page(&self, document_id: Uuid, page_number: u32, contents: &[&str]) -> Vec<Uuid> {
        let page = Page {
            id: Uuid::new_v4(),
            document_id,
            page_number,
        };
        let page_id = page.id;
        self.insert_page(page);

        contents
            .iter()
            .enumerate()
            .map(|(index, content)| {
                let block = Block {
                    id: Uuid::new_v4(),
                    document_id,
                    page_id,
                    page_number,
                    block_index: index as u32,
                    content: (*content).to_string(),
                };
                let id = block.id;
                self.insert_block(block);
                id
            })
            .collect()
    }
}

#[async_trait]
impl DocumentRepository for InMemoryDocumentRepository {
    async fn get_block(&self, id: Uuid) -> Result<Block> {
        self.blocks
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ChatError::not_found(format!("block {id}")))
    }

    async fn get_page_by_number(&self, document_id: Uuid, page_number: u32) -> Result<Page> {
        self.pages
            .iter()
            .find(|entry| {
                entry.value().document_id == document_id
                    && entry.value().page_number == page_number
            })
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                ChatError::not_found(format!("page {page_number} of document {document_id}"))
            })
    }

    async fn get_page_blocks(&self, page_id: Uuid) -> Result<Vec<Block>> {
        let mut blocks: Vec<Block> = self
            .blocks
            .iter()
            .filter(|entry| entry.value().page_id == page_id)
            .map(|entry| entry.value().clone())
            .collect();
        blocks.sort_by_key(|block| block.block_index);
        Ok(blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::ConversationKind;
    use crate::steps::StepType;

    #[tokio::test]
    async fn conversation_round_trip_and_query() {
        let repo = InMemoryConversationRepository::new();
        let document_id = Uuid::new_v4();
        let block_id = Uuid::new_v4();

        let root = Message::system(Uuid::new_v4(), "root");
        let mut conversation = Conversation::new(ConversationKind::Rabbithole, root.id);
        conversation.document_id = Some(document_id);
        conversation.source_block_id = Some(block_id);
        let conversation_id = conversation.id;

        repo.create_conversation(conversation, root).await.unwrap();

        let loaded = repo.get_conversation(conversation_id).await.unwrap();
        assert_eq!(loaded.source_block_id, Some(block_id));

        let found = repo
            .find_conversations(&ConversationQuery {
                document_id: Some(document_id),
                source_block_id: Some(block_id),
                kind: None,
            })
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        let none = repo
            .find_conversations(&ConversationQuery {
                source_block_id: Some(Uuid::new_v4()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn backfill_updates_every_step_of_the_invocation() {
        let repo = InMemoryAgentProcessRepository::new();
        let conversation_id = Uuid::new_v4();
        let user_message_id = Uuid::new_v4();

        for number in 1..=3 {
            repo.append_step(AgentProcessStep::new(
                conversation_id,
                user_message_id,
                number,
                StepType::Thought,
                format!("step {number}"),
            ))
            .await
            .unwrap();
        }
        // A step from an unrelated invocation must stay untouched.
        let other_user = Uuid::new_v4();
        repo.append_step(AgentProcessStep::new(
            conversation_id,
            other_user,
            1,
            StepType::Thought,
            "other",
        ))
        .await
        .unwrap();

        let assistant_message_id = Uuid::new_v4();
        let updated = repo
            .backfill_assistant_message(user_message_id, assistant_message_id)
            .await
            .unwrap();
        assert_eq!(updated, 3);

        let by_assistant = repo
            .steps_for_assistant_message(assistant_message_id)
            .await
            .unwrap();
        assert_eq!(by_assistant.len(), 3);
        assert_eq!(
            by_assistant.iter().map(|s| s.step_number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );

        let other_steps = repo.steps_for_user_message(other_user).await.unwrap();
        assert_eq!(other_steps[0].assistant_message_id, None);
    }

    #[tokio::test]
    async fn concurrent_page_additions_union_instead_of_overwriting() {
        let repo = std::sync::Arc::new(InMemoryConversationRepository::new());
        let root = Message::system(Uuid::new_v4(), "root");
        let conversation = Conversation::new(ConversationKind::Chat, root.id);
        let conversation_id = conversation.id;
        repo.create_conversation(conversation, root).await.unwrap();

        // Two in-flight generations on sibling branches, each recording the
        // pages its own context build pulled in. Neither may lose the other's.
        let first = tokio::spawn({
            let repo = std::sync::Arc::clone(&repo);
            async move { repo.add_included_pages(conversation_id, &[0]).await }
        });
        let second = tokio::spawn({
            let repo = std::sync::Arc::clone(&repo);
            async move { repo.add_included_pages(conversation_id, &[3, 4]).await }
        });
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        let mut pages = repo
            .get_conversation(conversation_id)
            .await
            .unwrap()
            .included_pages;
        pages.sort_unstable();
        assert_eq!(pages, vec![0, 3, 4]);

        // Re-recording already-included pages changes nothing.
        repo.add_included_pages(conversation_id, &[3, 0])
            .await
            .unwrap();
        let conversation = repo.get_conversation(conversation_id).await.unwrap();
        assert_eq!(conversation.included_pages.len(), 3);
    }

    #[tokio::test]
    async fn page_blocks_come_back_in_reading_order() {
        let repo = InMemoryDocumentRepository::new();
        let document_id = Uuid::new_v4();
        let contents: Vec<String> = (0..8).map(|n| format!("paragraph {n}")).collect();
        let refs: Vec<&str> = contents.iter().map(String::as_str).collect();
        repo.seed_page(document_id, 0, &refs);

        let page = repo.get_page_by_number(document_id, 0).await.unwrap();
        let blocks = repo.get_page_blocks(page.id).await.unwrap();
        let ordered: Vec<&str> = blocks.iter().map(|block| block.content.as_str()).collect();
        assert_eq!(ordered, refs);
    }

    #[tokio::test]
    async fn document_repository_scopes_pages_by_document() {
        let repo = InMemoryDocumentRepository::new();
        let document_id = Uuid::new_v4();
        let block_ids = repo.seed_page(document_id, 0, &["first block", "second block"]);

        let block = repo.get_block(block_ids[0]).await.unwrap();
        assert_eq!(block.page_number, 0);

        let page = repo.get_page_by_number(document_id, 0).await.unwrap();
        let blocks = repo.get_page_blocks(page.id).await.unwrap();
        assert_eq!(blocks.len(), 2);

        let missing = repo.get_page_by_number(Uuid::new_v4(), 0).await;
        assert!(matches!(missing, Err(ChatError::NotFound(_))));
    }
}
