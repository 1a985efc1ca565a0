//! Context assembly: turns a conversation's active thread into the flat
//! prompt sent to the model.
//!
//! Rendering is driven by a registry of per-(kind, role) renderers with a
//! verbatim pass-through fallback, constructed once at process start and
//! injected into the [`ContextBuilder`]. Document-anchored turns feed the
//! page-inclusion cache so full page content is transmitted at most once per
//! conversation.

pub mod builder;
pub mod renderer;

pub use builder::{ContextBuildOutput, ContextBuilder};
pub use renderer::{
    BlockAnchoredUserRenderer, MessageRenderer, PassthroughRenderer, RenderContext,
    RendererRegistry,
};
