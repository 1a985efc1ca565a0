use thiserror::Error;

/// Error taxonomy shared by every pagetalk crate.
///
/// `NotFound` and `PreconditionFailed` surface to callers as rejected
/// operations. `Upstream` covers model/tool failures and is absorbed where
/// the component contract demands forward progress. `DataIntegrity` is fatal:
/// it means the message DAG itself is broken and must not be repaired here.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("data integrity error: {0}")]
    DataIntegrity(String),
}

impl ChatError {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }

    pub fn precondition(reason: impl std::fmt::Display) -> Self {
        Self::PreconditionFailed(reason.to_string())
    }

    pub fn upstream(reason: impl std::fmt::Display) -> Self {
        Self::Upstream(reason.to_string())
    }

    pub fn integrity(reason: impl std::fmt::Display) -> Self {
        Self::DataIntegrity(reason.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
