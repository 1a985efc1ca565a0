use std::sync::Arc;
use std::time::Duration;

use pagetalk_agent::{default_registry, AgentOrchestrator, OrchestratorConfig};
use pagetalk_context::{ContextBuilder, RendererRegistry};
use pagetalk_core::{
    AgentProcessRepository, ConversationRepository, DocumentRepository,
    InMemoryAgentProcessRepository, InMemoryConversationRepository, InMemoryDocumentRepository,
    ModelService,
};
use pagetalk_llm::OpenAiModelService;
use pagetalk_stream::StreamBroker;
use pagetalk_tree::ConversationTreeManager;

/// Streams idle longer than this are swept by the broker GC.
const STREAM_MAX_IDLE: Duration = Duration::from_secs(300);
const STREAM_GC_INTERVAL: Duration = Duration::from_secs(60);

pub struct AppState {
    pub manager: Arc<ConversationTreeManager>,
    pub conversations: Arc<dyn ConversationRepository>,
    pub steps: Arc<dyn AgentProcessRepository>,
    pub documents: Arc<InMemoryDocumentRepository>,
    pub broker: Arc<StreamBroker>,
}

impl AppState {
    pub fn new_with_config(llm_base_url: String, model: String, api_key: String) -> Self {
        log::info!("Creating OpenAI-compatible model service at {llm_base_url}");
        let model = OpenAiModelService::new(api_key)
            .with_base_url(llm_base_url)
            .with_model(model);
        Self::with_model(Arc::new(model))
    }

    /// Full wiring over in-memory stores; tests inject a mock model here.
    pub fn with_model(model: Arc<dyn ModelService>) -> Self {
        let documents = Arc::new(InMemoryDocumentRepository::new());
        let conversations: Arc<dyn ConversationRepository> =
            Arc::new(InMemoryConversationRepository::new());
        let steps: Arc<dyn AgentProcessRepository> =
            Arc::new(InMemoryAgentProcessRepository::new());
        let broker = Arc::new(StreamBroker::new());
        broker.spawn_gc(STREAM_GC_INTERVAL, STREAM_MAX_IDLE);

        let context = Arc::new(ContextBuilder::new(
            RendererRegistry::with_defaults(),
            documents.clone() as Arc<dyn DocumentRepository>,
        ));
        let orchestrator = Arc::new(AgentOrchestrator::new(
            Arc::clone(&model),
            Arc::clone(&conversations),
            Arc::clone(&steps),
            default_registry(documents.clone() as Arc<dyn DocumentRepository>),
            Arc::clone(&broker),
            OrchestratorConfig::default(),
        ));
        let manager = Arc::new(ConversationTreeManager::new(
            Arc::clone(&conversations),
            documents.clone() as Arc<dyn DocumentRepository>,
            model,
            context,
            Arc::clone(&broker),
            orchestrator,
        ));

        Self {
            manager,
            conversations,
            steps,
            documents,
            broker,
        }
    }
}
