//! Conversation lifecycle and tree mutation.
//!
//! All writes to one conversation go through a per-conversation async mutex,
//! so concurrent sends and edits serialize instead of racing on the
//! active-child pointers. Reads (thread, tree, discovery) take no lock.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Deserialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use pagetalk_agent::AgentOrchestrator;
use pagetalk_context::ContextBuilder;
use pagetalk_core::{
    ChatError, Conversation, ConversationKind, ConversationQuery, ConversationRepository,
    DocumentRepository, Message, ModelService, Result, Role, TextSelection,
};
use pagetalk_stream::StreamBroker;

use crate::generation::PlainGeneration;
use crate::tree::{build_tree, reachable_from, resolve_active_thread, MessageTreeNode};

/// Document anchor supplied when opening a rabbithole on a block.
#[derive(Debug, Clone, Deserialize)]
pub struct AnchorContext {
    pub block_id: Uuid,
    pub selection: Option<TextSelection>,
    pub selected_text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    /// Attach under this message instead of the active thread leaf.
    pub parent_id: Option<Uuid>,
    /// Block the user had selected while composing.
    pub block_id: Option<Uuid>,
    /// Optional branch hint: re-point active-child pointers along this path
    /// before attaching the new turn.
    pub active_thread_ids: Option<Vec<Uuid>>,
}

#[derive(Debug)]
pub struct SendOutcome {
    pub user_message: Message,
    pub assistant_message_id: Uuid,
}

#[derive(Debug)]
pub struct EditOutcome {
    /// The new sibling version carrying the edited content.
    pub message: Message,
    pub assistant_message_id: Uuid,
}

pub struct ConversationTreeManager {
    conversations: Arc<dyn ConversationRepository>,
    documents: Arc<dyn DocumentRepository>,
    model: Arc<dyn ModelService>,
    context: Arc<ContextBuilder>,
    broker: Arc<StreamBroker>,
    orchestrator: Arc<AgentOrchestrator>,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl ConversationTreeManager {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        documents: Arc<dyn DocumentRepository>,
        model: Arc<dyn ModelService>,
        context: Arc<ContextBuilder>,
        broker: Arc<StreamBroker>,
        orchestrator: Arc<AgentOrchestrator>,
    ) -> Self {
        Self {
            conversations,
            documents,
            model,
            context,
            broker,
            orchestrator,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, conversation_id: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .entry(conversation_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Create a conversation with its root system message. Rabbithole kinds
    /// must carry a block anchor; the document scope is derived from it.
    pub async fn create_conversation(
        &self,
        kind: ConversationKind,
        document_id: Option<Uuid>,
        anchor: Option<AnchorContext>,
    ) -> Result<Conversation> {
        if kind.requires_block_anchor() && anchor.is_none() {
            return Err(ChatError::precondition(format!(
                "{kind:?} conversations require a source block anchor"
            )));
        }

        let mut document_id = document_id;
        let mut source_block_id = None;
        let mut selection = None;
        let mut selected_text = None;
        if let Some(anchor) = anchor {
            let block = self.documents.get_block(anchor.block_id).await?;
            document_id = Some(block.document_id);
            source_block_id = Some(block.id);
            selection = anchor.selection;
            selected_text = anchor.selected_text;
        }

        let conversation_id = Uuid::new_v4();
        let root = Message::system(conversation_id, root_prompt(kind, selected_text.as_deref()));
        let mut conversation = Conversation::new(kind, root.id);
        conversation.id = conversation_id;
        conversation.document_id = document_id;
        conversation.source_block_id = source_block_id;
        conversation.selection = selection;
        conversation.selected_text = selected_text;

        self.conversations
            .create_conversation(conversation.clone(), root)
            .await?;
        log::info!("[{conversation_id}] created {kind:?} conversation");
        Ok(conversation)
    }

    pub async fn get_conversation(&self, id: Uuid) -> Result<Conversation> {
        self.conversations.get_conversation(id).await
    }

    pub async fn find_conversations(&self, query: &ConversationQuery) -> Result<Vec<Conversation>> {
        self.conversations.find_conversations(query).await
    }

    /// Rabbitholes anchored to a block, for the document view's margin.
    pub async fn find_rabbitholes(
        &self,
        document_id: Uuid,
        block_id: Uuid,
    ) -> Result<Vec<Conversation>> {
        self.conversations
            .find_conversations(&ConversationQuery {
                document_id: Some(document_id),
                source_block_id: Some(block_id),
                kind: None,
            })
            .await
    }

    pub async fn get_active_thread(&self, conversation_id: Uuid) -> Result<Vec<Message>> {
        let conversation = self.conversations.get_conversation(conversation_id).await?;
        let messages = self
            .conversations
            .get_conversation_messages(conversation_id)
            .await?;
        resolve_active_thread(&messages, conversation.root_message_id)
    }

    pub async fn get_message_tree(&self, conversation_id: Uuid) -> Result<MessageTreeNode> {
        let conversation = self.conversations.get_conversation(conversation_id).await?;
        let messages = self
            .conversations
            .get_conversation_messages(conversation_id)
            .await?;
        build_tree(&messages, conversation.root_message_id)
    }

    /// Append a user turn plus an assistant placeholder, then start
    /// generation in the background. Returns as soon as both are persisted.
    pub async fn send_message(
        &self,
        conversation_id: Uuid,
        request: SendMessageRequest,
    ) -> Result<SendOutcome> {
        let lock = self.lock_for(conversation_id);
        let _guard = lock.lock().await;

        let conversation = self.conversations.get_conversation(conversation_id).await?;
        let mut messages = self
            .conversations
            .get_conversation_messages(conversation_id)
            .await?;

        if let Some(path) = &request.active_thread_ids {
            self.apply_thread_hint(&mut messages, path).await?;
        }

        let parent_id = match request.parent_id {
            Some(parent_id) => parent_id,
            None => resolve_active_thread(&messages, conversation.root_message_id)?
                .last()
                .map(|leaf| leaf.id)
                .ok_or_else(|| ChatError::integrity("conversation has no root message"))?,
        };
        let parent = messages
            .iter()
            .find(|message| message.id == parent_id)
            .ok_or_else(|| ChatError::not_found(format!("parent message {parent_id}")))?;
        if parent.conversation_id != conversation_id {
            return Err(ChatError::precondition(
                "parent message belongs to another conversation",
            ));
        }

        let version = next_sibling_version(&messages, parent_id);
        let mut user =
            Message::user(conversation_id, request.content.clone(), parent_id).with_version(version);
        if let Some(block_id) = request.block_id {
            user.set_block_reference(block_id);
        }
        self.conversations.insert_message(user.clone()).await?;
        self.conversations
            .update_active_child(parent_id, Some(user.id))
            .await?;

        let placeholder = Message::assistant_placeholder(conversation_id, user.id);
        let assistant_message_id = placeholder.id;
        self.conversations.insert_message(placeholder).await?;
        self.conversations
            .update_active_child(user.id, Some(assistant_message_id))
            .await?;

        log::debug!(
            "[{conversation_id}] user turn {} (v{version}) under {parent_id}, placeholder {assistant_message_id}",
            user.id
        );
        self.start_generation(&conversation, &request.content, user.id, assistant_message_id);

        Ok(SendOutcome {
            user_message: user,
            assistant_message_id,
        })
    }

    /// Edit a user turn by creating a new sibling version and re-pointing the
    /// parent at it. The original message is never mutated; the superseded
    /// branch stays reachable through the tree view.
    pub async fn edit_message(&self, message_id: Uuid, new_content: String) -> Result<EditOutcome> {
        let original = self.conversations.get_message(message_id).await?;
        let conversation_id = original.conversation_id;

        let lock = self.lock_for(conversation_id);
        let _guard = lock.lock().await;

        // Re-read under the lock; a concurrent edit may have shifted pointers.
        let original = self.conversations.get_message(message_id).await?;
        let conversation = self.conversations.get_conversation(conversation_id).await?;
        // The root is the only parentless message.
        let Some(parent_id) = original.parent_id else {
            return Err(ChatError::precondition(
                "the root system message cannot be edited",
            ));
        };
        if original.role != Role::User {
            return Err(ChatError::precondition("only user messages can be edited"));
        }

        let messages = self
            .conversations
            .get_conversation_messages(conversation_id)
            .await?;
        let reachable = reachable_from(&messages, conversation.root_message_id)?;
        if !reachable.contains(&message_id) {
            return Err(ChatError::precondition(
                "message is detached from the conversation root",
            ));
        }

        let version = next_sibling_version(&messages, parent_id);
        let edited = Message::sibling_of(&original, new_content.clone(), version);
        self.conversations.insert_message(edited.clone()).await?;
        self.conversations
            .update_active_child(parent_id, Some(edited.id))
            .await?;

        let placeholder = Message::assistant_placeholder(conversation_id, edited.id);
        let assistant_message_id = placeholder.id;
        self.conversations.insert_message(placeholder).await?;
        self.conversations
            .update_active_child(edited.id, Some(assistant_message_id))
            .await?;

        log::debug!(
            "[{conversation_id}] edit of {message_id} created v{version} sibling {}",
            edited.id
        );
        self.start_generation(&conversation, &new_content, edited.id, assistant_message_id);

        Ok(EditOutcome {
            message: edited,
            assistant_message_id,
        })
    }

    fn start_generation(
        &self,
        conversation: &Conversation,
        question: &str,
        user_message_id: Uuid,
        assistant_message_id: Uuid,
    ) {
        if conversation.is_agent() {
            self.orchestrator.spawn_invocation(
                conversation.clone(),
                question.to_string(),
                user_message_id,
                assistant_message_id,
            );
        } else {
            PlainGeneration {
                conversations: Arc::clone(&self.conversations),
                context: Arc::clone(&self.context),
                model: Arc::clone(&self.model),
                broker: Arc::clone(&self.broker),
            }
            .spawn(conversation.id, assistant_message_id);
        }
    }

    /// Re-point active-child pointers along a client-supplied path. Each
    /// consecutive pair must be a real parent/child edge.
    async fn apply_thread_hint(&self, messages: &mut [Message], path: &[Uuid]) -> Result<()> {
        for pair in path.windows(2) {
            let (parent_id, child_id) = (pair[0], pair[1]);
            let child = messages
                .iter()
                .find(|message| message.id == child_id)
                .ok_or_else(|| ChatError::not_found(format!("thread message {child_id}")))?;
            if child.parent_id != Some(parent_id) {
                return Err(ChatError::precondition(format!(
                    "{child_id} is not a child of {parent_id}"
                )));
            }
            self.conversations
                .update_active_child(parent_id, Some(child_id))
                .await?;
            if let Some(parent) = messages.iter_mut().find(|message| message.id == parent_id) {
                parent.active_child_id = Some(child_id);
            }
        }
        Ok(())
    }
}

fn next_sibling_version(messages: &[Message], parent_id: Uuid) -> u32 {
    messages
        .iter()
        .filter(|message| message.parent_id == Some(parent_id))
        .map(|message| message.version)
        .max()
        .map_or(1, |max| max + 1)
}

fn root_prompt(kind: ConversationKind, selected_text: Option<&str>) -> String {
    let mut prompt = match kind {
        ConversationKind::Chat => String::from(
            "You are a helpful assistant discussing a document with its reader. \
Ground your answers in the document content provided in this conversation.",
        ),
        ConversationKind::Rabbithole => String::from(
            "You are a helpful assistant in a focused side-discussion about one \
passage of a document. Keep your answers scoped to that passage and its context.",
        ),
        ConversationKind::AgentRabbithole => String::from(
            "You are a research assistant exploring a document to answer questions \
about one passage. You may consult any page of the document while doing so.",
        ),
    };
    if let Some(selected) = selected_text.filter(|text| !text.is_empty()) {
        prompt.push_str("\n\nThe reader highlighted this passage:\n");
        prompt.push_str(selected);
    }
    prompt
}
