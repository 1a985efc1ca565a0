use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use pagetalk_core::{
    ChatError, Conversation, ConversationKind, DocumentRepository, Message, PromptMessage, Result,
    Role,
};

/// Mutable state threaded through one build: the working copy of the
/// page-inclusion cache, pages newly included by this build, and any
/// degradation warnings. Scoped to the conversation being rendered; renderers
/// never touch shared state outside it.
pub struct RenderContext<'a> {
    pub conversation: &'a Conversation,
    documents: &'a dyn DocumentRepository,
    included: Vec<u32>,
    newly_included: Vec<u32>,
    warnings: Vec<String>,
}

impl<'a> RenderContext<'a> {
    pub fn new(conversation: &'a Conversation, documents: &'a dyn DocumentRepository) -> Self {
        Self {
            conversation,
            documents,
            included: conversation.included_pages.clone(),
            newly_included: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn has_page(&self, page_number: u32) -> bool {
        self.included.contains(&page_number)
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("[{}] context: {}", self.conversation.id, message);
        self.warnings.push(message);
    }

    /// Fetch a page's full text and record it as included. Returns `None`
    /// when the page was already in the cache (idempotent) or cannot be
    /// resolved (degraded with a warning).
    pub async fn include_page(
        &mut self,
        document_id: uuid::Uuid,
        page_number: u32,
    ) -> Result<Option<String>> {
        if self.has_page(page_number) {
            return Ok(None);
        }

        let page = match self.documents.get_page_by_number(document_id, page_number).await {
            Ok(page) => page,
            Err(ChatError::NotFound(_)) => {
                self.warn(format!("page {page_number} not found; context degraded"));
                return Ok(None);
            }
            Err(other) => return Err(other),
        };
        let blocks = self.documents.get_page_blocks(page.id).await?;
        let text = blocks
            .iter()
            .map(|block| block.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        self.included.push(page_number);
        self.newly_included.push(page_number);
        Ok(Some(text))
    }

    pub fn documents(&self) -> &dyn DocumentRepository {
        self.documents
    }

    pub(crate) fn into_parts(self) -> (Vec<u32>, Vec<String>) {
        (self.newly_included, self.warnings)
    }
}

/// Renders one thread message into zero or more prompt messages.
#[async_trait]
pub trait MessageRenderer: Send + Sync {
    async fn render(
        &self,
        message: &Message,
        ctx: &mut RenderContext<'_>,
    ) -> Result<Vec<PromptMessage>>;
}

/// Fallback renderer: emit the message verbatim.
pub struct PassthroughRenderer;

#[async_trait]
impl MessageRenderer for PassthroughRenderer {
    async fn render(
        &self,
        message: &Message,
        _ctx: &mut RenderContext<'_>,
    ) -> Result<Vec<PromptMessage>> {
        Ok(vec![PromptMessage {
            role: message.role,
            content: message.content.clone(),
        }])
    }
}

/// User-turn renderer for document-anchored conversations.
///
/// When the turn carries a block reference, resolves the block's page and
/// applies the inclusion policy: an unseen page is transmitted in full (with
/// a catch-up of the immediately preceding page when that one was never sent
/// either); a page already in the cache contributes only the selected block's
/// text, keeping the prompt bounded.
pub struct BlockAnchoredUserRenderer;

#[async_trait]
impl MessageRenderer for BlockAnchoredUserRenderer {
    async fn render(
        &self,
        message: &Message,
        ctx: &mut RenderContext<'_>,
    ) -> Result<Vec<PromptMessage>> {
        let mut rendered = Vec::new();

        if let Some(block_id) = message.block_reference() {
            match ctx.documents().get_block(block_id).await {
                Ok(block) => {
                    let page_number = block.page_number;
                    if ctx.has_page(page_number) {
                        rendered.push(PromptMessage::system(format!(
                            "Selected block on page {}:\n{}",
                            page_number, block.content
                        )));
                    } else {
                        if page_number > 0 && !ctx.has_page(page_number - 1) {
                            if let Some(text) =
                                ctx.include_page(block.document_id, page_number - 1).await?
                            {
                                rendered.push(PromptMessage::system(format!(
                                    "Content of page {}:\n{}",
                                    page_number - 1,
                                    text
                                )));
                            }
                        }
                        if let Some(text) =
                            ctx.include_page(block.document_id, page_number).await?
                        {
                            rendered.push(PromptMessage::system(format!(
                                "Content of page {}:\n{}",
                                page_number, text
                            )));
                        }
                    }
                }
                Err(ChatError::NotFound(_)) => {
                    ctx.warn(format!("block {block_id} not found; context degraded"));
                    rendered.push(PromptMessage::system(format!(
                        "Selected block {block_id} could not be resolved."
                    )));
                }
                Err(other) => return Err(other),
            }
        }

        rendered.push(PromptMessage::user(message.content.clone()));
        Ok(rendered)
    }
}

/// Dependency-injected renderer lookup keyed by (conversation kind, role).
/// A missing renderer is never an error: lookups fall back to pass-through.
pub struct RendererRegistry {
    renderers: HashMap<(ConversationKind, Role), Arc<dyn MessageRenderer>>,
    fallback: Arc<dyn MessageRenderer>,
}

impl Default for RendererRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RendererRegistry {
    pub fn new() -> Self {
        Self {
            renderers: HashMap::new(),
            fallback: Arc::new(PassthroughRenderer),
        }
    }

    /// Registry with the standard document-chat renderers installed.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let anchored: Arc<dyn MessageRenderer> = Arc::new(BlockAnchoredUserRenderer);
        for kind in [
            ConversationKind::Chat,
            ConversationKind::Rabbithole,
            ConversationKind::AgentRabbithole,
        ] {
            registry.register(kind, Role::User, Arc::clone(&anchored));
        }
        registry
    }

    pub fn register(
        &mut self,
        kind: ConversationKind,
        role: Role,
        renderer: Arc<dyn MessageRenderer>,
    ) {
        self.renderers.insert((kind, role), renderer);
    }

    pub fn get(&self, kind: ConversationKind, role: Role) -> Arc<dyn MessageRenderer> {
        self.renderers
            .get(&(kind, role))
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }
}
