use std::sync::Arc;

use dashmap::DashMap;
use keepsake_common::{ConversationState, Message, Result};
use keepsake_config::{AppConfig, LlmProviderKind};
use keepsake_db::{MemoryStore, SessionStore};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::embeddings::{EmbeddingProvider, OllamaEmbeddings};
use crate::judge::{JudgePolicy, SafetyJudge};
use crate::memory::{LongTermMemory, RecencyDecay};
use crate::providers::{LlmProvider, OllamaProvider, OpenAiProvider};
use crate::tools::{
    AddSymptom, AddTask, CheckCurrentTime, GetDiagnosis, GetListOfSymptoms, GetListOfTasks,
    GetTreatment, KnowledgeGraph, QueryKnowledgeGraph, RetrieveLongTermMemory,
    SaveLongTermMemory, SaveShortTermMemory, ToolExecutor,
};
use crate::turn::{TurnController, TurnSettings};

/// Result of probing the external services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Health {
    pub model: bool,
    /// `None` when long-term memory is disabled.
    pub embeddings: Option<bool>,
}

/// The turn entry point. Keeps one conversation state per session and runs
/// turns of the same session one at a time.
pub struct SessionManager {
    controller: TurnController,
    sessions: DashMap<String, Arc<Mutex<ConversationState>>>,
    checkpoints: Option<Arc<Mutex<SessionStore>>>,
    long_term: Option<LongTermMemory>,
}

impl SessionManager {
    pub fn new(controller: TurnController) -> Self {
        Self {
            controller,
            sessions: DashMap::new(),
            checkpoints: None,
            long_term: None,
        }
    }

    /// Persist each session's state after every committed turn.
    pub fn with_checkpoints(mut self, store: SessionStore) -> Self {
        self.checkpoints = Some(Arc::new(Mutex::new(store)));
        self
    }

    pub fn with_long_term(mut self, long_term: LongTermMemory) -> Self {
        self.long_term = Some(long_term);
        self
    }

    /// Wire providers, memory, tools and the judge from configuration.
    pub fn from_config(
        config: &AppConfig,
        knowledge_graph: Option<Arc<dyn KnowledgeGraph>>,
    ) -> Result<Self> {
        config.validate()?;

        let provider = build_provider(config)?;
        let long_term = if config.memory.mode.long_term_enabled() {
            let store = MemoryStore::open(&config.memory_db_path())?;
            let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(
                OllamaEmbeddings::new(
                    Some(config.embedding.base_url.clone()),
                    config.embedding.model.clone(),
                )
                .with_dimensions(config.embedding.dimensions),
            );
            let decay = RecencyDecay::new(config.memory.recency_decay_rate, config.memory.recency_unit);
            Some(LongTermMemory::new(Arc::new(Mutex::new(store)), embeddings).with_decay(decay))
        } else {
            None
        };

        let tools = build_tools(config, long_term.as_ref(), knowledge_graph);
        let mut controller =
            TurnController::new(provider.clone(), tools, TurnSettings::from_config(config));
        if config.judge.enabled {
            controller = controller.with_judge(SafetyJudge::new(
                provider,
                config.llm.model.clone(),
                JudgePolicy::from_config(&config.judge),
            ));
        }

        let mut manager =
            Self::new(controller).with_checkpoints(SessionStore::open(&config.sessions_db_path())?);
        if let Some(long_term) = long_term {
            manager = manager.with_long_term(long_term);
        }
        info!(
            judge = config.judge.enabled,
            memory_mode = ?config.memory.mode,
            tools = ?manager.controller.tools().names(),
            "session manager ready"
        );
        Ok(manager)
    }

    pub fn controller(&self) -> &TurnController {
        &self.controller
    }

    pub fn long_term(&self) -> Option<&LongTermMemory> {
        self.long_term.as_ref()
    }

    /// Run one turn and return the session's updated message log.
    ///
    /// A failed turn leaves the session state exactly as it was.
    pub async fn handle_message(&self, session_id: &str, user_message: &str) -> Result<Vec<Message>> {
        let slot = self.session(session_id).await?;
        let mut state = slot.lock().await;

        let outcome = self
            .controller
            .run(session_id, state.clone(), user_message)
            .await?;
        *state = outcome.state;

        if let Some(store) = &self.checkpoints {
            if let Err(e) = store.lock().await.save_checkpoint(session_id, &state) {
                warn!(session_id, "failed to save conversation checkpoint: {e}");
            }
        }

        Ok(state.messages.clone())
    }

    /// The committed message log, restoring it from a checkpoint if needed.
    pub async fn history(&self, session_id: &str) -> Result<Vec<Message>> {
        let slot = self.session(session_id).await?;
        let state = slot.lock().await;
        Ok(state.messages.clone())
    }

    /// Current state of a session, if it has been seen.
    pub async fn snapshot(&self, session_id: &str) -> Option<ConversationState> {
        let slot = self.sessions.get(session_id).map(|s| Arc::clone(s.value()))?;
        let state = slot.lock().await;
        Some(state.clone())
    }

    /// Forget a session in memory and on disk.
    pub async fn reset_session(&self, session_id: &str) -> Result<bool> {
        let removed = self.sessions.remove(session_id).is_some();
        let deleted = match &self.checkpoints {
            Some(store) => store.lock().await.delete_checkpoint(session_id)?,
            None => false,
        };
        Ok(removed || deleted)
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    pub async fn health_check(&self) -> Health {
        let model = async {
            self.controller
                .provider()
                .health_check()
                .await
                .unwrap_or_else(|e| {
                    warn!("model health check failed: {e}");
                    false
                })
        };
        let embeddings = async {
            match &self.long_term {
                Some(long_term) => Some(long_term.embeddings().health_check().await.unwrap_or_else(|e| {
                    warn!("embedding health check failed: {e}");
                    false
                })),
                None => None,
            }
        };
        let (model, embeddings) = futures::join!(model, embeddings);
        Health { model, embeddings }
    }

    async fn session(&self, session_id: &str) -> Result<Arc<Mutex<ConversationState>>> {
        if let Some(slot) = self.sessions.get(session_id) {
            return Ok(Arc::clone(slot.value()));
        }

        let restored = match &self.checkpoints {
            Some(store) => store.lock().await.load_checkpoint(session_id)?,
            None => None,
        };
        if restored.is_some() {
            info!(session_id, "restored conversation from checkpoint");
        }

        let slot = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(restored.unwrap_or_default())));
        Ok(Arc::clone(slot.value()))
    }
}

fn build_provider(config: &AppConfig) -> Result<Arc<dyn LlmProvider>> {
    let provider: Arc<dyn LlmProvider> = match config.llm.provider {
        LlmProviderKind::Ollama => Arc::new(OllamaProvider::new(config.llm.base_url.clone())),
        LlmProviderKind::Openai => {
            let api_key = config.llm.api_key.clone().ok_or_else(|| {
                keepsake_common::Error::Config("openai provider requires an api key".into())
            })?;
            Arc::new(OpenAiProvider::new(api_key, config.llm.base_url.clone()))
        }
    };
    Ok(provider)
}

/// Register the built-in tools allowed by the memory mode, then narrow them
/// to the configured list.
pub fn build_tools(
    config: &AppConfig,
    long_term: Option<&LongTermMemory>,
    knowledge_graph: Option<Arc<dyn KnowledgeGraph>>,
) -> ToolExecutor {
    let mut tools = ToolExecutor::new();
    tools.register(Box::new(AddTask));
    tools.register(Box::new(GetListOfTasks));
    tools.register(Box::new(AddSymptom));
    tools.register(Box::new(GetListOfSymptoms));
    tools.register(Box::new(CheckCurrentTime));
    tools.register(Box::new(GetDiagnosis));
    tools.register(Box::new(GetTreatment));

    if config.memory.mode.short_term_enabled() {
        let mut save = SaveShortTermMemory::new(config.memory.short_term_capacity);
        if let Some(long_term) = long_term.filter(|_| config.memory.promote_evicted) {
            save = save.with_promotion(long_term.clone());
        }
        tools.register(Box::new(save));
    }

    if let Some(long_term) = long_term {
        tools.register(Box::new(SaveLongTermMemory::new(long_term.clone())));
        tools.register(Box::new(RetrieveLongTermMemory::new(
            long_term.clone(),
            config.memory.retrieval,
        )));
    }

    if let Some(graph) = knowledge_graph {
        tools.register(Box::new(QueryKnowledgeGraph::new(graph)));
    }

    if let Some(enabled) = &config.agent.tools {
        tools.retain(enabled);
    }
    tools
}
