//! Core types and collaborator traits for the pagetalk conversation system.
//!
//! Everything stateful the higher crates touch goes through the traits
//! defined here: `ConversationRepository`, `DocumentRepository`,
//! `AgentProcessRepository` and `ModelService`. The in-memory
//! implementations in [`memory`] back the default server wiring and tests.

pub mod conversation;
pub mod document;
pub mod error;
pub mod memory;
pub mod message;
pub mod model;
pub mod repository;
pub mod steps;

pub use conversation::{Conversation, ConversationKind, TextSelection};
pub use document::{Block, DocumentRepository, Page};
pub use error::{ChatError, Result};
pub use memory::{
    InMemoryAgentProcessRepository, InMemoryConversationRepository, InMemoryDocumentRepository,
};
pub use message::{Message, Role};
pub use model::{ModelService, ModelStream, PromptMessage};
pub use repository::{AgentProcessRepository, ConversationQuery, ConversationRepository};
pub use steps::{AgentProcessStep, StepType};
