//! The bounded agent loop: THINKING → (ACTING → OBSERVING)* → ANSWERED |
//! TIMED_OUT | ERRORED.
//!
//! Every step is persisted before the next model call so a crash mid-loop
//! leaves an inspectable partial trace. Malformed model output and tool
//! failures become `error` steps and the loop keeps moving; only repeated
//! consecutive model failures end the invocation as errored.

use std::sync::Arc;

use uuid::Uuid;

use pagetalk_core::message::meta;
use pagetalk_core::{
    AgentProcessRepository, AgentProcessStep, ChatError, Conversation, ConversationRepository,
    ModelService, PromptMessage, Result, StepType,
};
use pagetalk_stream::StreamBroker;

use crate::parser::{self, AgentDecision};
use crate::tools::DocumentToolRegistry;

const TIMEOUT_APOLOGY: &str = "I could not reach a confident answer within my exploration budget. \
Here is what I can say: the steps I took are recorded alongside this conversation, and asking a \
more specific question about a particular page or block may help me do better.";

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Hard ceiling on persisted steps per invocation.
    pub max_steps: u32,
    /// Consecutive model-call failures tolerated before giving up.
    pub max_consecutive_failures: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_steps: 30,
            max_consecutive_failures: 3,
        }
    }
}

pub struct AgentOrchestrator {
    model: Arc<dyn ModelService>,
    conversations: Arc<dyn ConversationRepository>,
    steps: Arc<dyn AgentProcessRepository>,
    tools: DocumentToolRegistry,
    broker: Arc<StreamBroker>,
    config: OrchestratorConfig,
}

impl AgentOrchestrator {
    pub fn new(
        model: Arc<dyn ModelService>,
        conversations: Arc<dyn ConversationRepository>,
        steps: Arc<dyn AgentProcessRepository>,
        tools: DocumentToolRegistry,
        broker: Arc<StreamBroker>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            model,
            conversations,
            steps,
            tools,
            broker,
            config,
        }
    }

    /// Run the loop as a detached task. The triggering request returns the
    /// placeholder id immediately; progress is observed through the stream.
    pub fn spawn_invocation(
        self: &Arc<Self>,
        conversation: Conversation,
        question: String,
        user_message_id: Uuid,
        assistant_message_id: Uuid,
    ) -> tokio::task::JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(error) = orchestrator
                .run_invocation(&conversation, &question, user_message_id, assistant_message_id)
                .await
            {
                log::error!("[{}] agent invocation failed: {}", conversation.id, error);
                orchestrator
                    .finish_errored(assistant_message_id, user_message_id, &error.to_string())
                    .await;
            }
        })
    }

    pub async fn run_invocation(
        &self,
        conversation: &Conversation,
        question: &str,
        user_message_id: Uuid,
        assistant_message_id: Uuid,
    ) -> Result<()> {
        let document_id = conversation.document_id.ok_or_else(|| {
            ChatError::precondition("agent conversation has no document scope")
        })?;
        let allowed_actions = self.tools.names();

        let mut trace = StepTrace::new(conversation.id, user_message_id);
        let mut consecutive_failures = 0u32;
        let mut answer: Option<String> = None;

        log::info!(
            "[{}] agent loop started (user message {})",
            conversation.id,
            user_message_id
        );

        while trace.len() < self.config.max_steps {
            let prompt = self.build_transcript(conversation, question, trace.steps());

            let raw = match self.model.generate_response(&prompt).await {
                Ok(raw) => {
                    consecutive_failures = 0;
                    raw
                }
                Err(error) => {
                    consecutive_failures += 1;
                    log::warn!(
                        "[{}] model call failed ({}/{}): {}",
                        conversation.id,
                        consecutive_failures,
                        self.config.max_consecutive_failures,
                        error
                    );
                    self.persist(
                        &mut trace,
                        StepType::Error,
                        format!("model call failed: {error}"),
                        serde_json::Value::Null,
                    )
                    .await?;
                    if consecutive_failures >= self.config.max_consecutive_failures {
                        self.finish_errored(
                            assistant_message_id,
                            user_message_id,
                            "the language model is unavailable",
                        )
                        .await;
                        return Ok(());
                    }
                    continue;
                }
            };

            let mut decision = parser::parse(&raw);
            if let Err(validation) = parser::validate(&decision, &allowed_actions) {
                self.persist(
                    &mut trace,
                    StepType::Error,
                    format!("invalid decision: {validation}"),
                    serde_json::json!({ "raw": raw }),
                )
                .await?;
                decision = AgentDecision::fallback();
            }

            self.persist(
                &mut trace,
                StepType::Thought,
                decision.thought().to_string(),
                serde_json::Value::Null,
            )
            .await?;

            match decision {
                AgentDecision::Answer { answer: text, .. } => {
                    answer = Some(text);
                    break;
                }
                AgentDecision::Action {
                    action,
                    action_input,
                    ..
                } => {
                    self.persist(
                        &mut trace,
                        StepType::Action,
                        format!("{action} {action_input}"),
                        serde_json::json!({ "action": action, "action_input": action_input }),
                    )
                    .await?;

                    // Registry membership was validated above.
                    let tool = match self.tools.get(&action) {
                        Some(tool) => tool,
                        None => {
                            self.persist(
                                &mut trace,
                                StepType::Error,
                                format!("tool '{action}' disappeared from the registry"),
                                serde_json::Value::Null,
                            )
                            .await?;
                            continue;
                        }
                    };
                    match tool.execute(document_id, &action_input).await {
                        Ok(observation) => {
                            self.persist(
                                &mut trace,
                                StepType::Result,
                                observation,
                                serde_json::json!({ "action": action }),
                            )
                            .await?;
                        }
                        Err(error) => {
                            // Absorbed: the loop favors forward progress.
                            self.persist(
                                &mut trace,
                                StepType::Error,
                                format!("tool '{action}' failed: {error}"),
                                serde_json::json!({ "action": action }),
                            )
                            .await?;
                        }
                    }
                }
            }
        }

        let (answer, timed_out) = match answer {
            Some(answer) => (answer, false),
            None => {
                log::warn!(
                    "[{}] agent loop hit the step ceiling ({})",
                    conversation.id,
                    self.config.max_steps
                );
                self.persist(
                    &mut trace,
                    StepType::Timeout,
                    format!("step ceiling of {} reached", self.config.max_steps),
                    serde_json::Value::Null,
                )
                .await?;
                (TIMEOUT_APOLOGY.to_string(), true)
            }
        };

        self.finish_answered(
            conversation,
            assistant_message_id,
            user_message_id,
            answer,
            timed_out,
        )
        .await
    }

    async fn persist(
        &self,
        trace: &mut StepTrace,
        step_type: StepType,
        content: String,
        metadata: serde_json::Value,
    ) -> Result<()> {
        let step = trace.next(step_type, content, metadata);
        self.steps.append_step(step).await
    }

    async fn finish_answered(
        &self,
        conversation: &Conversation,
        assistant_message_id: Uuid,
        user_message_id: Uuid,
        answer: String,
        timed_out: bool,
    ) -> Result<()> {
        let mut metadata = serde_json::json!({
            meta::USER_MESSAGE_ID: user_message_id.to_string(),
        });
        if timed_out {
            metadata["timed_out"] = serde_json::Value::Bool(true);
        }
        self.conversations
            .finalize_message(assistant_message_id, answer.clone(), metadata)
            .await?;
        let updated = self
            .steps
            .backfill_assistant_message(user_message_id, assistant_message_id)
            .await?;
        log::info!(
            "[{}] agent loop finished ({} step(s), timed_out: {})",
            conversation.id,
            updated,
            timed_out
        );
        self.broker.publish(assistant_message_id, answer);
        self.broker.close(assistant_message_id);
        Ok(())
    }

    async fn finish_errored(
        &self,
        assistant_message_id: Uuid,
        user_message_id: Uuid,
        reason: &str,
    ) {
        let metadata = serde_json::json!({
            meta::ERROR: reason,
            meta::USER_MESSAGE_ID: user_message_id.to_string(),
        });
        if let Err(error) = self
            .conversations
            .finalize_message(assistant_message_id, String::new(), metadata)
            .await
        {
            log::error!(
                "[{}] failed to record agent failure: {}",
                assistant_message_id,
                error
            );
        }
        self.broker.fail(assistant_message_id, reason);
    }

    /// Render the invocation so far as a pseudo-dialogue: the question, then
    /// thoughts/actions as assistant turns and observations as user turns.
    fn build_transcript(
        &self,
        conversation: &Conversation,
        question: &str,
        steps: &[AgentProcessStep],
    ) -> Vec<PromptMessage> {
        let mut messages = vec![PromptMessage::system(self.system_prompt(conversation))];
        messages.push(PromptMessage::user(question));
        for step in steps {
            match step.step_type {
                StepType::Thought => {
                    messages.push(PromptMessage::assistant(format!(
                        "Thought: {}",
                        step.content
                    )));
                }
                StepType::Action => {
                    messages.push(PromptMessage::assistant(format!(
                        "Action: {}",
                        step.content
                    )));
                }
                StepType::Result => {
                    messages.push(PromptMessage::user(format!(
                        "Observation: {}",
                        step.content
                    )));
                }
                StepType::Error => {
                    messages.push(PromptMessage::user(format!(
                        "Observation (error): {}",
                        step.content
                    )));
                }
                StepType::Timeout => {}
            }
        }
        messages
    }

    fn system_prompt(&self, conversation: &Conversation) -> String {
        let mut prompt = String::from(
            "You are a research agent exploring one document to answer the user's question. \
You can only read the document; you cannot change it.\n\nAvailable tools:\n",
        );
        prompt.push_str(&self.tools.describe());
        prompt.push_str(
            "\n\nRespond with exactly one JSON object per turn. To use a tool: \
{\"thought\": \"...\", \"action\": \"<tool name>\", \"action_input\": {...}}. \
To answer the user: {\"thought\": \"...\", \"answer\": \"...\"}.",
        );
        if let Some(selected) = conversation
            .selected_text
            .as_deref()
            .filter(|text| !text.is_empty())
        {
            prompt.push_str("\n\nThe user is asking about this highlighted passage:\n");
            prompt.push_str(selected);
        }
        prompt
    }
}

/// Step accumulator for one invocation; owns the monotonic step numbering.
struct StepTrace {
    conversation_id: Uuid,
    user_message_id: Uuid,
    steps: Vec<AgentProcessStep>,
}

impl StepTrace {
    fn new(conversation_id: Uuid, user_message_id: Uuid) -> Self {
        Self {
            conversation_id,
            user_message_id,
            steps: Vec::new(),
        }
    }

    fn len(&self) -> u32 {
        self.steps.len() as u32
    }

    fn steps(&self) -> &[AgentProcessStep] {
        &self.steps
    }

    fn next(
        &mut self,
        step_type: StepType,
        content: String,
        metadata: serde_json::Value,
    ) -> AgentProcessStep {
        let step = AgentProcessStep::new(
            self.conversation_id,
            self.user_message_id,
            self.len() + 1,
            step_type,
            content,
        )
        .with_metadata(metadata);
        self.steps.push(step.clone());
        step
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use pagetalk_core::{
        ConversationKind, InMemoryAgentProcessRepository, InMemoryConversationRepository,
        InMemoryDocumentRepository, Message, ModelStream,
    };
    use pagetalk_stream::StreamChunk;

    use crate::tools::default_registry;

    /// Model that replays scripted responses, then repeats the last one.
    struct ScriptedModel {
        responses: Mutex<VecDeque<std::result::Result<String, String>>>,
        exhausted: std::result::Result<String, String>,
    }

    impl ScriptedModel {
        fn new(responses: Vec<std::result::Result<String, String>>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().collect()),
                exhausted: Ok("no more script".to_string()),
            }
        }

        fn always(response: std::result::Result<String, String>) -> Self {
            Self {
                responses: Mutex::new(VecDeque::new()),
                exhausted: response,
            }
        }
    }

    #[async_trait]
    impl ModelService for ScriptedModel {
        async fn generate_response(&self, _messages: &[PromptMessage]) -> Result<String> {
            let next = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.exhausted.clone());
            next.map_err(ChatError::Upstream)
        }

        async fn stream_response(&self, _messages: &[PromptMessage]) -> Result<ModelStream> {
            Err(ChatError::upstream("streaming not scripted"))
        }

        async fn generate_structured_response(
            &self,
            _messages: &[PromptMessage],
            _schema: &serde_json::Value,
        ) -> Result<serde_json::Value> {
            Err(ChatError::upstream("structured output not scripted"))
        }
    }

    struct Harness {
        orchestrator: AgentOrchestrator,
        conversations: Arc<InMemoryConversationRepository>,
        steps: Arc<InMemoryAgentProcessRepository>,
        broker: Arc<StreamBroker>,
        conversation: Conversation,
        user_message_id: Uuid,
        assistant_message_id: Uuid,
    }

    async fn harness(model: ScriptedModel, config: OrchestratorConfig) -> Harness {
        let documents = Arc::new(InMemoryDocumentRepository::new());
        let conversations = Arc::new(InMemoryConversationRepository::new());
        let steps = Arc::new(InMemoryAgentProcessRepository::new());
        let broker = Arc::new(StreamBroker::new());

        let document_id = Uuid::new_v4();
        documents.seed_page(document_id, 0, &["the opening page text"]);

        let root = Message::system(Uuid::new_v4(), "agent root");
        let mut conversation = Conversation::new(ConversationKind::AgentRabbithole, root.id);
        conversation.document_id = Some(document_id);
        conversations
            .create_conversation(conversation.clone(), root.clone())
            .await
            .unwrap();

        let user = Message::user(conversation.id, "what is on the first page?", root.id);
        let user_message_id = user.id;
        conversations.insert_message(user.clone()).await.unwrap();
        let placeholder = Message::assistant_placeholder(conversation.id, user.id);
        let assistant_message_id = placeholder.id;
        conversations.insert_message(placeholder).await.unwrap();

        let orchestrator = AgentOrchestrator::new(
            Arc::new(model),
            conversations.clone() as Arc<dyn ConversationRepository>,
            steps.clone() as Arc<dyn AgentProcessRepository>,
            default_registry(documents),
            Arc::clone(&broker),
            config,
        );

        Harness {
            orchestrator,
            conversations,
            steps,
            broker,
            conversation,
            user_message_id,
            assistant_message_id,
        }
    }

    #[tokio::test]
    async fn immediate_answer_finalizes_message_and_backfills_steps() {
        let model = ScriptedModel::new(vec![Ok(
            r#"{"thought": "I already know", "answer": "It is the opening page."}"#.to_string(),
        )]);
        let h = harness(model, OrchestratorConfig::default()).await;

        let subscriber = h.broker.subscribe(h.assistant_message_id);
        h.orchestrator
            .run_invocation(
                &h.conversation,
                "what is on the first page?",
                h.user_message_id,
                h.assistant_message_id,
            )
            .await
            .unwrap();

        let message = h.conversations.get_message(h.assistant_message_id).await.unwrap();
        assert_eq!(message.content, "It is the opening page.");
        assert!(!message.is_pending());

        let steps = h
            .steps
            .steps_for_assistant_message(h.assistant_message_id)
            .await
            .unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].step_type, StepType::Thought);

        let chunks: Vec<StreamChunk> = subscriber.collect().await;
        assert_eq!(
            chunks,
            vec![
                StreamChunk::Delta {
                    content: "It is the opening page.".to_string()
                },
                StreamChunk::Done,
            ]
        );
    }

    #[tokio::test]
    async fn action_round_produces_thought_action_result_steps() {
        let model = ScriptedModel::new(vec![
            Ok(r#"{"thought": "read page one", "action": "page_lookup", "action_input": {"page_number": 1}}"#
                .to_string()),
            Ok(r#"{"thought": "done", "answer": "The page describes the opening."}"#.to_string()),
        ]);
        let h = harness(model, OrchestratorConfig::default()).await;

        h.orchestrator
            .run_invocation(
                &h.conversation,
                "what is on the first page?",
                h.user_message_id,
                h.assistant_message_id,
            )
            .await
            .unwrap();

        let steps = h.steps.steps_for_user_message(h.user_message_id).await.unwrap();
        let types: Vec<StepType> = steps.iter().map(|step| step.step_type).collect();
        assert_eq!(
            types,
            vec![
                StepType::Thought,
                StepType::Action,
                StepType::Result,
                StepType::Thought,
            ]
        );
        assert!(steps[2].content.contains("the opening page text"));
        assert!(steps.iter().all(|step| step.assistant_message_id
            == Some(h.assistant_message_id)));
    }

    #[tokio::test]
    async fn malformed_output_still_terminates_within_the_ceiling() {
        let model = ScriptedModel::always(Ok("%%% totally unparseable %%%".to_string()));
        let config = OrchestratorConfig {
            max_steps: 12,
            ..Default::default()
        };
        let h = harness(model, config).await;

        let subscriber = h.broker.subscribe(h.assistant_message_id);
        h.orchestrator
            .run_invocation(
                &h.conversation,
                "what is on the first page?",
                h.user_message_id,
                h.assistant_message_id,
            )
            .await
            .unwrap();

        let steps = h.steps.steps_for_user_message(h.user_message_id).await.unwrap();
        assert!(steps.len() <= 13);
        assert_eq!(steps.last().unwrap().step_type, StepType::Timeout);

        let message = h.conversations.get_message(h.assistant_message_id).await.unwrap();
        assert_eq!(message.content, TIMEOUT_APOLOGY);
        assert_eq!(message.metadata["timed_out"], serde_json::json!(true));

        // Stream still terminated.
        let chunks: Vec<StreamChunk> = subscriber.collect().await;
        assert_eq!(chunks.last(), Some(&StreamChunk::Done));
    }

    #[tokio::test]
    async fn invalid_action_records_error_step_and_falls_back() {
        let model = ScriptedModel::new(vec![
            Ok(r#"{"thought": "let me try", "action": "delete_document", "action_input": {}}"#
                .to_string()),
            Ok(r#"{"thought": "fine", "answer": "Answer after recovery."}"#.to_string()),
        ]);
        let h = harness(model, OrchestratorConfig::default()).await;

        h.orchestrator
            .run_invocation(
                &h.conversation,
                "what is on the first page?",
                h.user_message_id,
                h.assistant_message_id,
            )
            .await
            .unwrap();

        let steps = h.steps.steps_for_user_message(h.user_message_id).await.unwrap();
        assert_eq!(steps[0].step_type, StepType::Error);
        assert!(steps[0].content.contains("delete_document"));
        // The fallback page-1 lookup actually executed.
        assert!(steps
            .iter()
            .any(|step| step.step_type == StepType::Result
                && step.content.contains("the opening page text")));
    }

    #[tokio::test]
    async fn repeated_model_failures_end_the_invocation_as_errored() {
        let model = ScriptedModel::always(Err("connection refused".to_string()));
        let h = harness(model, OrchestratorConfig::default()).await;

        let subscriber = h.broker.subscribe(h.assistant_message_id);
        h.orchestrator
            .run_invocation(
                &h.conversation,
                "what is on the first page?",
                h.user_message_id,
                h.assistant_message_id,
            )
            .await
            .unwrap();

        let message = h.conversations.get_message(h.assistant_message_id).await.unwrap();
        assert!(message.error_marker().is_some());

        let steps = h.steps.steps_for_user_message(h.user_message_id).await.unwrap();
        assert_eq!(steps.len(), 3);
        assert!(steps.iter().all(|step| step.step_type == StepType::Error));
        // No answer, no backfill.
        assert!(steps.iter().all(|step| step.assistant_message_id.is_none()));

        let chunks: Vec<StreamChunk> = subscriber.collect().await;
        assert!(matches!(chunks.last(), Some(StreamChunk::Error { .. })));
    }
}
