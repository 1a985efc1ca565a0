//! Best-effort recovery of an agent decision from raw model output.
//!
//! Primary path: a single JSON object carrying `thought` plus either
//! `action`/`action_input` or `answer`. Fallback path: regex extraction of
//! labeled fields. Last resort: a fixed page-1 lookup. `parse` never fails;
//! a separate [`validate`] stage rejects decisions the orchestrator must not
//! execute.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

/// A recovered decision: either invoke a tool or answer the user.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentDecision {
    Action {
        thought: String,
        action: String,
        action_input: serde_json::Value,
    },
    Answer {
        thought: String,
        answer: String,
    },
}

impl AgentDecision {
    pub fn thought(&self) -> &str {
        match self {
            Self::Action { thought, .. } | Self::Answer { thought, .. } => thought,
        }
    }

    /// Deterministic fallback when nothing can be recovered: scan the
    /// document from the beginning rather than halting the loop.
    pub fn fallback() -> Self {
        Self::Action {
            thought: "The previous response was unreadable; scanning the document from the start."
                .to_string(),
            action: "page_lookup".to_string(),
            action_input: serde_json::json!({ "page_number": 1 }),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("unknown action '{0}'")]
    UnknownAction(String),
}

#[derive(Debug, Default, Deserialize)]
struct RawDecision {
    #[serde(default)]
    thought: Option<String>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    action_input: Option<serde_json::Value>,
    #[serde(default)]
    answer: Option<String>,
}

static ANSWER_MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)ANSWER\s+FOR\s+USER:\s*(?P<answer>.+)").expect("valid regex"));
static THOUGHT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^\s*thought:\s*(?P<value>.+)$").expect("valid regex"));
static ACTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^\s*action:\s*(?P<value>\S+)\s*$").expect("valid regex"));
static ACTION_INPUT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^\s*action_input:\s*(?P<value>.+)$").expect("valid regex"));

/// Recover a decision from raw model text. Always returns something.
pub fn parse(raw: &str) -> AgentDecision {
    if let Some(decision) = parse_json(raw) {
        return decision;
    }
    if let Some(decision) = parse_labeled(raw) {
        return decision;
    }
    log::debug!("parser: no decision recoverable, using fallback");
    AgentDecision::fallback()
}

fn parse_json(raw: &str) -> Option<AgentDecision> {
    let candidate = extract_json_object(raw)?;
    let raw_decision: RawDecision = serde_json::from_str(&candidate).ok()?;
    from_raw(raw_decision)
}

/// Pull the outermost `{...}` slice out of surrounding prose or code fences.
fn extract_json_object(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed.to_string());
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| trimmed[start..=end].to_string())
}

fn from_raw(raw: RawDecision) -> Option<AgentDecision> {
    let thought = raw.thought.unwrap_or_default();
    if let Some(answer) = raw.answer.filter(|answer| !answer.trim().is_empty()) {
        return Some(AgentDecision::Answer { thought, answer });
    }
    let action = raw.action.filter(|action| !action.trim().is_empty())?;
    Some(AgentDecision::Action {
        thought,
        action: action.trim().to_string(),
        action_input: raw.action_input.unwrap_or_else(|| serde_json::json!({})),
    })
}

fn parse_labeled(raw: &str) -> Option<AgentDecision> {
    let thought = THOUGHT_RE
        .captures(raw)
        .map(|captures| captures["value"].trim().to_string())
        .unwrap_or_default();

    if let Some(captures) = ANSWER_MARKER_RE.captures(raw) {
        return Some(AgentDecision::Answer {
            thought,
            answer: captures["answer"].trim().to_string(),
        });
    }

    let action = ACTION_RE
        .captures(raw)
        .map(|captures| captures["value"].trim().to_string())?;
    let action_input = ACTION_INPUT_RE
        .captures(raw)
        .map(|captures| parse_input_value(captures["value"].trim()))
        .unwrap_or_else(|| serde_json::json!({}));

    Some(AgentDecision::Action {
        thought,
        action,
        action_input,
    })
}

/// `action_input:` values may be JSON or bare text; keep bare text addressable.
fn parse_input_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::json!({ "value": raw }))
}

/// Reject decisions the orchestrator must not execute: empty answers and
/// actions outside the allow-list. The caller turns the error into an
/// `error` step and falls back.
pub fn validate(decision: &AgentDecision, allowed_actions: &[String]) -> Result<(), ValidationError> {
    match decision {
        AgentDecision::Answer { answer, .. } => {
            if answer.trim().is_empty() {
                return Err(ValidationError::MissingField("answer"));
            }
            Ok(())
        }
        AgentDecision::Action { action, .. } => {
            if action.trim().is_empty() {
                return Err(ValidationError::MissingField("action"));
            }
            if !allowed_actions.iter().any(|name| name == action) {
                return Err(ValidationError::UnknownAction(action.clone()));
            }
            Ok(())
        }
    }
}
