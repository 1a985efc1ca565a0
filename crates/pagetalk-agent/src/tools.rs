//! The agent's fixed tool surface: read-only lookups over the document the
//! conversation is scoped to. Tools never mutate document content.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use uuid::Uuid;

use pagetalk_core::{ChatError, DocumentRepository, Result};

/// One read-only document tool. `document_id` scopes every call: a tool must
/// refuse to return content belonging to another document.
#[async_trait]
pub trait DocumentTool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    async fn execute(&self, document_id: Uuid, input: &serde_json::Value) -> Result<String>;
}

pub type SharedDocumentTool = Arc<dyn DocumentTool>;

/// Allow-list of tools the orchestrator may execute.
pub struct DocumentToolRegistry {
    tools: DashMap<String, SharedDocumentTool>,
}

impl Default for DocumentToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: DashMap::new(),
        }
    }

    pub fn register(&self, tool: SharedDocumentTool) -> Result<()> {
        let name = tool.name().trim().to_string();
        if name.is_empty() {
            return Err(ChatError::precondition("tool name cannot be empty"));
        }
        match self.tools.entry(name.clone()) {
            Entry::Occupied(_) => Err(ChatError::precondition(format!(
                "tool '{name}' already registered"
            ))),
            Entry::Vacant(entry) => {
                entry.insert(tool);
                Ok(())
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<SharedDocumentTool> {
        self.tools.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Sorted tool names; doubles as the parser validation allow-list.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    /// One line per tool, for the agent system prompt.
    pub fn describe(&self) -> String {
        let mut lines: Vec<String> = self
            .tools
            .iter()
            .map(|entry| format!("- {}: {}", entry.key(), entry.value().description()))
            .collect();
        lines.sort();
        lines.join("\n")
    }
}

/// Fetch the full text of one page by number.
pub struct PageLookupTool {
    documents: Arc<dyn DocumentRepository>,
}

impl PageLookupTool {
    pub fn new(documents: Arc<dyn DocumentRepository>) -> Self {
        Self { documents }
    }
}

#[async_trait]
impl DocumentTool for PageLookupTool {
    fn name(&self) -> &str {
        "page_lookup"
    }

    fn description(&self) -> &str {
        "Read the full text of a page. Input: {\"page_number\": <number, 1-based>}"
    }

    async fn execute(&self, document_id: Uuid, input: &serde_json::Value) -> Result<String> {
        let page_number = extract_page_number(input).ok_or_else(|| {
            ChatError::precondition("page_lookup requires a numeric 'page_number'")
        })?;
        // The model speaks 1-based page numbers; storage is 0-based.
        let page = self
            .documents
            .get_page_by_number(document_id, page_number.saturating_sub(1))
            .await?;
        let blocks = self.documents.get_page_blocks(page.id).await?;
        if blocks.is_empty() {
            return Ok(format!("Page {page_number} has no extracted text."));
        }
        let text = blocks
            .iter()
            .map(|block| block.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        Ok(format!("Page {page_number}:\n{text}"))
    }
}

fn extract_page_number(input: &serde_json::Value) -> Option<u32> {
    let value = input.get("page_number").or_else(|| input.get("value"))?;
    if let Some(number) = value.as_u64() {
        return u32::try_from(number).ok();
    }
    value.as_str().and_then(|raw| raw.trim().parse().ok())
}

/// Fetch one block's text by id, bounded to the conversation's document.
pub struct BlockLookupTool {
    documents: Arc<dyn DocumentRepository>,
}

impl BlockLookupTool {
    pub fn new(documents: Arc<dyn DocumentRepository>) -> Self {
        Self { documents }
    }
}

#[async_trait]
impl DocumentTool for BlockLookupTool {
    fn name(&self) -> &str {
        "block_lookup"
    }

    fn description(&self) -> &str {
        "Read the text of one block. Input: {\"block_id\": \"<uuid>\"}"
    }

    async fn execute(&self, document_id: Uuid, input: &serde_json::Value) -> Result<String> {
        let block_id = input
            .get("block_id")
            .or_else(|| input.get("value"))
            .and_then(|value| value.as_str())
            .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
            .ok_or_else(|| ChatError::precondition("block_lookup requires a 'block_id' uuid"))?;

        let block = self.documents.get_block(block_id).await?;
        if block.document_id != document_id {
            // Out-of-scope reads look like missing data to the agent.
            return Err(ChatError::not_found(format!("block {block_id}")));
        }
        Ok(format!(
            "Block {} (page {}):\n{}",
            block.id, block.page_number, block.content
        ))
    }
}

/// The standard registry: page and block lookup only.
pub fn default_registry(documents: Arc<dyn DocumentRepository>) -> DocumentToolRegistry {
    let registry = DocumentToolRegistry::new();
    registry
        .register(Arc::new(PageLookupTool::new(Arc::clone(&documents))))
        .expect("fresh registry accepts page_lookup");
    registry
        .register(Arc::new(BlockLookupTool::new(documents)))
        .expect("fresh registry accepts block_lookup");
    registry
}
