use super::stop::{StopHandle, StopReason};
use crate::api::{ApiClient, ClientSettings};
use crate::config::Config;
use crate::error::{ChatError, ChatResult, ValidationError};
use crate::state::{MessageHistory, SessionStore};
use crate::storage::{
    get_typed, set_typed, stored_setting, KeyValueStore, API_KEY_KEY, BASE_URL_KEY,
    IMAGE_GENERATION_KEY, LEARNED_FACTS_KEY, LEARNING_KEY, MODEL_KEY, MULTI_TURN_COT_KEY,
    SYSTEM_PROMPT_KEY, TEMPERATURE_KEY, WEB_GROUNDING_KEY,
};
use crate::tools::{refresh_system_prompt, FeatureFlags, ToolRegistry};
use std::sync::Arc;
use tokio::task::JoinSet;

#[derive(Debug, Clone, PartialEq)]
pub enum ConversationStreamUpdate {
    /// A message at `index` is about to receive streamed text.
    AssistantStarted { index: usize },
    Delta { index: usize, text: String },
    ToolProcessing {
        index: usize,
        tool_call_id: String,
        name: String,
    },
    ToolCompleted {
        index: usize,
        tool_call_id: String,
        name: String,
    },
    TurnFinished(TurnOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Stopped(StopReason),
    /// The stream failed; history holds the retry notice (or, for a revamp,
    /// the restored original).
    Failed,
}

pub struct ConversationManager {
    pub(super) client: Option<Arc<ApiClient>>,
    pub(super) config: Config,
    pub(super) storage: Arc<dyn KeyValueStore>,
    pub(super) sessions: SessionStore,
    pub(super) tools: ToolRegistry,
    pub(super) system_prompt: Option<String>,
    pub(super) stop: StopHandle,
    pub(super) naming: JoinSet<(String, String)>,
}

impl ConversationManager {
    /// Loads sessions, the stored system prompt and feature flags. The
    /// completion client is created on first use.
    pub async fn new(config: Config, storage: Arc<dyn KeyValueStore>) -> ChatResult<Self> {
        let store = storage.as_ref();
        let sessions = SessionStore::load(Arc::clone(&storage)).await?;
        let system_prompt = get_typed::<String>(store, SYSTEM_PROMPT_KEY)
            .await?
            .or_else(|| config.system_prompt.clone())
            .filter(|prompt| !prompt.trim().is_empty());

        let mut features = config.features;
        if let Some(enabled) = get_typed::<bool>(store, WEB_GROUNDING_KEY).await? {
            features.web_grounding = enabled;
        }
        if let Some(enabled) = get_typed::<bool>(store, IMAGE_GENERATION_KEY).await? {
            features.image_generation = enabled;
        }
        if let Some(enabled) = get_typed::<bool>(store, LEARNING_KEY).await? {
            features.learning = enabled;
        }
        if let Some(enabled) = get_typed::<bool>(store, MULTI_TURN_COT_KEY).await? {
            features.multi_turn_cot = enabled;
        }
        let mut tools = ToolRegistry::from_config(&config, Arc::clone(&storage));
        tools.set_flags(features);

        Ok(Self {
            client: None,
            config,
            storage,
            sessions,
            tools,
            system_prompt,
            stop: StopHandle::new(),
            naming: JoinSet::new(),
        })
    }

    #[cfg(test)]
    pub async fn new_mock(
        client: ApiClient,
        config: Config,
        storage: Arc<dyn KeyValueStore>,
    ) -> ChatResult<Self> {
        let mut manager = Self::new(config, storage).await?;
        manager.client = Some(Arc::new(client));
        Ok(manager)
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn is_streaming(&self) -> bool {
        self.stop.is_streaming()
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn sessions_mut(&mut self) -> &mut SessionStore {
        &mut self.sessions
    }

    pub fn history(&self) -> Option<&MessageHistory> {
        self.sessions.current().map(|session| &session.messages)
    }

    pub(super) fn history_mut(&mut self) -> Result<&mut MessageHistory, ValidationError> {
        self.sessions
            .current_mut()
            .map(|session| &mut session.messages)
            .ok_or(ValidationError::NoActiveSession)
    }

    pub(super) fn current_history(&self) -> Result<&MessageHistory, ValidationError> {
        self.history().ok_or(ValidationError::NoActiveSession)
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    /// Replaces the base prompt. Stored learned facts are re-applied on top.
    pub async fn set_system_prompt(&mut self, prompt: Option<String>) -> ChatResult<()> {
        let facts: String = get_typed(self.storage.as_ref(), LEARNED_FACTS_KEY)
            .await?
            .unwrap_or_default();
        let prompt = Some(refresh_system_prompt(&prompt.unwrap_or_default(), &facts))
            .filter(|prompt| !prompt.trim().is_empty());
        set_typed(
            self.storage.as_ref(),
            SYSTEM_PROMPT_KEY,
            &prompt.clone().unwrap_or_default(),
        )
        .await?;
        self.system_prompt = prompt;
        Ok(())
    }

    pub fn feature_flags(&self) -> FeatureFlags {
        self.tools.flags()
    }

    pub async fn set_feature_flags(&mut self, flags: FeatureFlags) -> ChatResult<()> {
        let store = self.storage.as_ref();
        set_typed(store, WEB_GROUNDING_KEY, &flags.web_grounding).await?;
        set_typed(store, IMAGE_GENERATION_KEY, &flags.image_generation).await?;
        set_typed(store, LEARNING_KEY, &flags.learning).await?;
        set_typed(store, MULTI_TURN_COT_KEY, &flags.multi_turn_cot).await?;
        self.tools.set_flags(flags);
        Ok(())
    }

    pub async fn save_current_session(&self) -> ChatResult<()> {
        self.sessions.save_current().await?;
        Ok(())
    }

    pub(super) async fn ensure_client(&mut self) -> ChatResult<Arc<ApiClient>> {
        if let Some(client) = &self.client {
            return Ok(Arc::clone(client));
        }

        let settings = self.client_settings().await?;
        let client = ApiClient::new(&settings)
            .map_err(|error| ChatError::Configuration(format!("{error:#}")))?;
        tracing::debug!(url = client.request_url(), model = client.model(), "client ready");

        let client = Arc::new(client);
        self.client = Some(Arc::clone(&client));
        Ok(client)
    }

    /// Stored settings take precedence over the environment.
    async fn client_settings(&self) -> ChatResult<ClientSettings> {
        let store = self.storage.as_ref();

        let api_key = stored_setting(store, API_KEY_KEY)
            .await?
            .or_else(|| self.config.api_key.clone());
        let api_url = stored_setting(store, BASE_URL_KEY)
            .await?
            .unwrap_or_else(|| self.config.api_url.clone());
        let model = stored_setting(store, MODEL_KEY)
            .await?
            .unwrap_or_else(|| self.config.model.clone());
        let temperature = get_typed::<f32>(store, TEMPERATURE_KEY)
            .await?
            .unwrap_or(self.config.temperature);

        Ok(ClientSettings {
            api_key,
            api_url,
            model,
            temperature,
        })
    }
}
