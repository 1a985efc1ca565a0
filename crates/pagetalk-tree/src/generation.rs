//! Detached plain-generation turns for non-agent conversations.
//!
//! The send/edit request has already returned the placeholder id by the time
//! this runs; every outcome is reported through the stream broker and the
//! placeholder's final metadata, never through a response body.

use std::sync::Arc;

use futures::StreamExt;
use uuid::Uuid;

use pagetalk_context::ContextBuilder;
use pagetalk_core::message::meta;
use pagetalk_core::{ConversationRepository, ModelService, Result};
use pagetalk_stream::StreamBroker;

use crate::tree::resolve_active_thread;

/// Everything a detached generation task needs, cloned out of the manager.
pub(crate) struct PlainGeneration {
    pub conversations: Arc<dyn ConversationRepository>,
    pub context: Arc<ContextBuilder>,
    pub model: Arc<dyn ModelService>,
    pub broker: Arc<StreamBroker>,
}

impl PlainGeneration {
    pub fn spawn(
        self,
        conversation_id: Uuid,
        assistant_message_id: Uuid,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(error) = self.run(conversation_id, assistant_message_id).await {
                log::error!("[{conversation_id}] generation failed: {error}");
                let metadata = serde_json::json!({ meta::ERROR: error.to_string() });
                if let Err(error) = self
                    .conversations
                    .finalize_message(assistant_message_id, String::new(), metadata)
                    .await
                {
                    log::error!(
                        "[{conversation_id}] failed to record generation failure: {error}"
                    );
                }
                self.broker.fail(assistant_message_id, &error.to_string());
            }
        })
    }

    async fn run(&self, conversation_id: Uuid, assistant_message_id: Uuid) -> Result<()> {
        let conversation = self.conversations.get_conversation(conversation_id).await?;
        let messages = self
            .conversations
            .get_conversation_messages(conversation_id)
            .await?;
        let thread = resolve_active_thread(&messages, conversation.root_message_id)?;

        let output = self.context.build(&conversation, &thread).await?;
        if !output.newly_included_pages.is_empty() {
            self.conversations
                .add_included_pages(conversation_id, &output.newly_included_pages)
                .await?;
        }
        for warning in &output.warnings {
            log::warn!("[{conversation_id}] context degraded: {warning}");
        }

        let mut stream = self.model.stream_response(&output.messages).await?;
        let mut content = String::new();
        while let Some(delta) = stream.next().await {
            let delta = delta?;
            content.push_str(&delta);
            self.broker.publish(assistant_message_id, delta);
        }

        self.conversations
            .finalize_message(assistant_message_id, content, serde_json::json!({}))
            .await?;
        self.broker.close(assistant_message_id);
        log::info!("[{conversation_id}] generation finished for {assistant_message_id}");
        Ok(())
    }
}
