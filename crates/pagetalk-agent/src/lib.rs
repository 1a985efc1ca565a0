//! Bounded thought → action → observation agent loop.
//!
//! The [`orchestrator::AgentOrchestrator`] drives a ReAct-style loop against
//! a fixed, read-only document tool surface, persisting every step before the
//! next model call. The [`parser`] recovers a decision from raw model text no
//! matter how malformed it is; validation failures and upstream errors become
//! `error` steps rather than aborting the loop.

pub mod orchestrator;
pub mod parser;
pub mod tools;

pub use orchestrator::{AgentOrchestrator, OrchestratorConfig};
pub use parser::{parse, validate, AgentDecision, ValidationError};
pub use tools::{
    default_registry, BlockLookupTool, DocumentTool, DocumentToolRegistry, PageLookupTool,
};
