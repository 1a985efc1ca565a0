use std::sync::Arc;

use pagetalk_core::{Conversation, DocumentRepository, Message, PromptMessage, Result};

use crate::renderer::{RenderContext, RendererRegistry};

/// Result of one context build. `newly_included_pages` lists pages this
/// build added to the cache so the caller can persist `included_pages` once;
/// `warnings` flags references that degraded instead of failing.
#[derive(Debug)]
pub struct ContextBuildOutput {
    pub messages: Vec<PromptMessage>,
    pub newly_included_pages: Vec<u32>,
    pub warnings: Vec<String>,
}

impl ContextBuildOutput {
    pub fn degraded(&self) -> bool {
        !self.warnings.is_empty()
    }
}

pub struct ContextBuilder {
    registry: RendererRegistry,
    documents: Arc<dyn DocumentRepository>,
}

impl ContextBuilder {
    pub fn new(registry: RendererRegistry, documents: Arc<dyn DocumentRepository>) -> Self {
        Self {
            registry,
            documents,
        }
    }

    /// Render the thread into the flat prompt sequence. Pending streaming
    /// placeholders are skipped; they carry no content yet.
    pub async fn build(
        &self,
        conversation: &Conversation,
        thread: &[Message],
    ) -> Result<ContextBuildOutput> {
        let mut ctx = RenderContext::new(conversation, self.documents.as_ref());
        let mut messages = Vec::new();

        for message in thread {
            if message.is_pending() {
                continue;
            }
            let renderer = self.registry.get(conversation.kind, message.role);
            messages.extend(renderer.render(message, &mut ctx).await?);
        }

        let (newly_included_pages, warnings) = ctx.into_parts();
        log::debug!(
            "[{}] context built: {} prompt message(s), {} new page(s), {} warning(s)",
            conversation.id,
            messages.len(),
            newly_included_pages.len(),
            warnings.len()
        );

        Ok(ContextBuildOutput {
            messages,
            newly_included_pages,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagetalk_core::{ConversationKind, InMemoryDocumentRepository, Role};
    use uuid::Uuid;

    struct Fixture {
        documents: Arc<InMemoryDocumentRepository>,
        conversation: Conversation,
        root: Message,
        block_on_page: Vec<Vec<Uuid>>,
    }

    fn fixture() -> Fixture {
        let documents = Arc::new(InMemoryDocumentRepository::new());
        let document_id = Uuid::new_v4();
        let block_on_page = (0..5)
            .map(|n| {
                documents.seed_page(
                    document_id,
                    n,
                    &[
                        &format!("page {n} opening paragraph"),
                        &format!("page {n} closing paragraph"),
                    ],
                )
            })
            .collect();

        let root = Message::system(Uuid::new_v4(), "You are discussing a document.");
        let mut conversation = Conversation::new(ConversationKind::Chat, root.id);
        conversation.document_id = Some(document_id);

        Fixture {
            documents,
            conversation,
            root,
            block_on_page,
        }
    }

    fn user_turn(conversation: &Conversation, parent: Uuid, block_id: Uuid) -> Message {
        let mut message = Message::user(conversation.id, "what does this mean?", parent);
        message.set_block_reference(block_id);
        message
    }

    fn builder(documents: Arc<InMemoryDocumentRepository>) -> ContextBuilder {
        ContextBuilder::new(RendererRegistry::with_defaults(), documents)
    }

    fn joined(messages: &[PromptMessage]) -> String {
        messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n---\n")
    }

    #[tokio::test]
    async fn first_reference_includes_full_page_and_catch_up_on_later_pages() {
        let mut fx = fixture();
        let builder = builder(Arc::clone(&fx.documents));

        // Turn one: block on page 0.
        let turn_one = user_turn(&fx.conversation, fx.root.id, fx.block_on_page[0][0]);
        let thread = vec![fx.root.clone(), turn_one.clone()];
        let output = builder.build(&fx.conversation, &thread).await.unwrap();

        assert_eq!(output.newly_included_pages, vec![0]);
        assert!(joined(&output.messages).contains("page 0 opening paragraph"));

        for page in &output.newly_included_pages {
            fx.conversation.record_page(*page);
        }
        assert_eq!(fx.conversation.included_pages, vec![0]);

        // Turn two: block on page 4. Page 3 was never sent, so it catches up.
        let turn_two = user_turn(&fx.conversation, turn_one.id, fx.block_on_page[4][0]);
        let thread = vec![fx.root.clone(), turn_two.clone()];
        let output = builder.build(&fx.conversation, &thread).await.unwrap();

        assert_eq!(output.newly_included_pages, vec![3, 4]);
        let rendered = joined(&output.messages);
        assert!(rendered.contains("Content of page 3"));
        assert!(rendered.contains("Content of page 4"));
        assert!(!rendered.contains("Content of page 0"));

        for page in &output.newly_included_pages {
            fx.conversation.record_page(*page);
        }
        assert_eq!(fx.conversation.included_pages, vec![0, 3, 4]);
    }

    #[tokio::test]
    async fn already_included_page_contributes_only_the_selected_block() {
        let mut fx = fixture();
        let builder = builder(Arc::clone(&fx.documents));
        fx.conversation.record_page(0);

        let turn = user_turn(&fx.conversation, fx.root.id, fx.block_on_page[0][1]);
        let thread = vec![fx.root.clone(), turn];
        let output = builder.build(&fx.conversation, &thread).await.unwrap();

        assert!(output.newly_included_pages.is_empty());
        let rendered = joined(&output.messages);
        assert!(rendered.contains("Selected block on page 0"));
        assert!(rendered.contains("page 0 closing paragraph"));
        assert!(!rendered.contains("Content of page 0"));
    }

    #[tokio::test]
    async fn repeated_reference_to_same_block_is_idempotent() {
        let mut fx = fixture();
        let builder = builder(Arc::clone(&fx.documents));

        let turn_one = user_turn(&fx.conversation, fx.root.id, fx.block_on_page[0][0]);
        let output = builder
            .build(&fx.conversation, &[fx.root.clone(), turn_one.clone()])
            .await
            .unwrap();
        for page in &output.newly_included_pages {
            fx.conversation.record_page(*page);
        }

        let turn_two = user_turn(&fx.conversation, turn_one.id, fx.block_on_page[0][0]);
        let output = builder
            .build(&fx.conversation, &[fx.root.clone(), turn_two])
            .await
            .unwrap();

        assert!(output.newly_included_pages.is_empty());
        assert_eq!(fx.conversation.included_pages, vec![0]);
    }

    #[tokio::test]
    async fn unresolvable_block_degrades_with_warning_instead_of_failing() {
        let fx = fixture();
        let builder = builder(Arc::clone(&fx.documents));

        let turn = user_turn(&fx.conversation, fx.root.id, Uuid::new_v4());
        let output = builder
            .build(&fx.conversation, &[fx.root.clone(), turn])
            .await
            .unwrap();

        assert!(output.degraded());
        assert!(joined(&output.messages).contains("could not be resolved"));
        // The user's own question still made it into the prompt.
        assert!(joined(&output.messages).contains("what does this mean?"));
    }

    #[tokio::test]
    async fn unregistered_key_falls_back_to_passthrough() {
        let fx = fixture();
        // Empty registry: every lookup misses and passes through verbatim.
        let builder = ContextBuilder::new(
            RendererRegistry::new(),
            Arc::clone(&fx.documents) as Arc<dyn DocumentRepository>,
        );

        let mut turn = user_turn(&fx.conversation, fx.root.id, fx.block_on_page[0][0]);
        turn.content = "verbatim question".to_string();
        let output = builder
            .build(&fx.conversation, &[fx.root.clone(), turn])
            .await
            .unwrap();

        assert_eq!(output.messages.len(), 2);
        assert_eq!(output.messages[1].role, Role::User);
        assert_eq!(output.messages[1].content, "verbatim question");
        assert!(output.newly_included_pages.is_empty());
    }

    #[tokio::test]
    async fn pending_placeholders_are_skipped() {
        let fx = fixture();
        let builder = builder(Arc::clone(&fx.documents));

        let turn = Message::user(fx.conversation.id, "hello", fx.root.id);
        let placeholder = Message::assistant_placeholder(fx.conversation.id, turn.id);
        let output = builder
            .build(
                &fx.conversation,
                &[fx.root.clone(), turn, placeholder],
            )
            .await
            .unwrap();

        assert_eq!(output.messages.len(), 2);
    }
}
