//! The conversation tree manager: builds and mutates the versioned message
//! DAG, resolves active threads, and drives assistant generation for both
//! plain and agent conversations.

mod generation;
pub mod manager;
pub mod tree;

pub use manager::{
    AnchorContext, ConversationTreeManager, EditOutcome, SendMessageRequest, SendOutcome,
};
pub use tree::{build_tree, resolve_active_thread, MessageTreeNode};
