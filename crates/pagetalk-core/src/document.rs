use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// A page of an ingested document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub id: Uuid,
    pub document_id: Uuid,
    pub page_number: u32,
}

/// A laid-out text block on a page. Block extraction itself happens upstream;
/// the conversation core only ever reads these. `block_index` is the block's
/// position within its page and drives reading order when a page is rendered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub id: Uuid,
    pub document_id: Uuid,
    pub page_id: Uuid,
    pub page_number: u32,
    pub block_index: u32,
    pub content: String,
}

/// Read-only accessors over processed document content. Implemented by the
/// storage layer; the Context Builder and agent tools depend on it and must
/// never mutate document state through it.
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    async fn get_block(&self, id: Uuid) -> Result<Block>;

    async fn get_page_by_number(&self, document_id: Uuid, page_number: u32) -> Result<Page>;

    async fn get_page_blocks(&self, page_id: Uuid) -> Result<Vec<Block>>;
}
