//! Durable key/value persistence for sessions, flags, settings and learned
//! facts. Writes are full overwrites of a key; nothing here is transactional.

mod file_store;
mod memory_store;

pub use file_store::JsonFileStore;
pub use memory_store::MemoryStore;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub const SESSIONS_KEY: &str = "sessions";
pub const CURRENT_SESSION_KEY: &str = "currentSessionId";
pub const LEARNED_FACTS_KEY: &str = "learnedFacts";
pub const SYSTEM_PROMPT_KEY: &str = "systemPrompt";
pub const API_KEY_KEY: &str = "apiKey";
pub const BASE_URL_KEY: &str = "baseUrl";
pub const MODEL_KEY: &str = "model";
pub const TEMPERATURE_KEY: &str = "temperature";
pub const WEB_GROUNDING_KEY: &str = "isWebGroundingEnabled";
pub const IMAGE_GENERATION_KEY: &str = "isImageGenerationEnabled";
pub const LEARNING_KEY: &str = "isLearningEnabled";
pub const MULTI_TURN_COT_KEY: &str = "isMultiTurnCotEnabled";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> StorageResult<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> StorageResult<()>;
}

/// Reads `key` and decodes it as `T`. A missing key yields `None`.
pub async fn get_typed<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> StorageResult<Option<T>> {
    match store.get(key).await? {
        Some(Value::Null) | None => Ok(None),
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
    }
}

pub async fn set_typed<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> StorageResult<()> {
    store.set(key, serde_json::to_value(value)?).await
}

/// A stored string setting. Blank values count as unset so the configured
/// fallback applies.
pub async fn stored_setting(store: &dyn KeyValueStore, key: &str) -> StorageResult<Option<String>> {
    Ok(get_typed::<String>(store, key)
        .await?
        .filter(|value| !value.trim().is_empty()))
}
