//! OpenAI-compatible [`ModelService`] implementation.
//!
//! Speaks the `/chat/completions` dialect over HTTP, so any provider exposing
//! that surface (OpenAI, a local llama.cpp server, a gateway) works by
//! swapping the base URL.

pub mod openai;

pub use openai::OpenAiModelService;
