use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::history::MessageHistory;
use super::message::{FileContext, Message};
use crate::error::{ChatResult, ValidationError};
use crate::storage::{
    get_typed, set_typed, KeyValueStore, StorageResult, CURRENT_SESSION_KEY, SESSIONS_KEY,
};

pub const PROVISIONAL_SESSION_NAME: &str = "New Chat";

fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(default = "new_session_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub messages: MessageHistory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_context: Option<FileContext>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub generated_images: Vec<String>,
}

impl Session {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: new_session_id(),
            name: name.into(),
            messages: MessageHistory::new(),
            file_context: None,
            generated_images: Vec::new(),
        }
    }

    /// Copy with transient processing markers removed.
    fn persistable(&self) -> Self {
        let mut copy = self.clone();
        copy.messages.remove_transient();
        copy
    }
}

/// Starting point for a session: a name plus seed turns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionTemplate {
    pub name: String,
    pub messages: Vec<Message>,
    pub file_context: Option<FileContext>,
}

/// All sessions plus which one is active. Every mutation is written
/// through to the key/value store.
pub struct SessionStore {
    sessions: Vec<Session>,
    current: Option<usize>,
    store: Arc<dyn KeyValueStore>,
}

impl SessionStore {
    pub async fn load(store: Arc<dyn KeyValueStore>) -> StorageResult<Self> {
        let sessions: Vec<Session> = get_typed(store.as_ref(), SESSIONS_KEY)
            .await?
            .unwrap_or_default();
        let current_id: Option<String> = get_typed(store.as_ref(), CURRENT_SESSION_KEY).await?;
        let current = match current_id {
            Some(id) => sessions.iter().position(|session| session.id == id),
            None => None,
        }
        .or_else(|| (!sessions.is_empty()).then_some(0));

        tracing::debug!(sessions = sessions.len(), ?current, "loaded sessions");
        Ok(Self {
            sessions,
            current,
            store,
        })
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn current(&self) -> Option<&Session> {
        self.current.and_then(|index| self.sessions.get(index))
    }

    pub fn current_mut(&mut self) -> Option<&mut Session> {
        self.current.and_then(|index| self.sessions.get_mut(index))
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|session| session.id == id)
    }

    /// Adds a session, makes it active, and persists. Returns its id.
    pub async fn create(&mut self, name: &str) -> ChatResult<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyContent.into());
        }
        self.insert(Session::new(name)).await
    }

    pub async fn create_from_template(&mut self, template: SessionTemplate) -> ChatResult<String> {
        let name = template.name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyContent.into());
        }
        let session = Session {
            messages: template.messages.into(),
            file_context: template.file_context,
            ..Session::new(name)
        };
        self.insert(session).await
    }

    /// Adds a session under a placeholder name, for the first message sent
    /// with nothing active.
    pub(crate) async fn create_provisional(&mut self) -> ChatResult<String> {
        self.insert(Session::new(PROVISIONAL_SESSION_NAME)).await
    }

    async fn insert(&mut self, session: Session) -> ChatResult<String> {
        let id = session.id.clone();
        self.sessions.push(session);
        self.current = Some(self.sessions.len() - 1);
        self.persist().await?;
        Ok(id)
    }

    pub async fn switch_to(&mut self, index: usize) -> ChatResult<()> {
        self.check_index(index)?;
        self.current = Some(index);
        set_typed(self.store.as_ref(), CURRENT_SESSION_KEY, &self.sessions[index].id).await?;
        Ok(())
    }

    pub async fn rename(&mut self, index: usize, name: &str) -> ChatResult<()> {
        self.check_index(index)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyContent.into());
        }
        self.sessions[index].name = name.to_string();
        self.persist().await?;
        Ok(())
    }

    /// Removes a session. The last remaining session cannot be deleted.
    pub async fn delete(&mut self, index: usize) -> ChatResult<()> {
        self.check_index(index)?;
        if self.sessions.len() <= 1 {
            return Err(ValidationError::LastSession.into());
        }

        let removed = self.sessions.remove(index);
        self.current = match self.current {
            Some(current) if current > index => Some(current - 1),
            Some(current) if current >= self.sessions.len() => Some(self.sessions.len() - 1),
            other => other,
        };
        tracing::debug!(session = %removed.id, "deleted session");
        self.persist().await?;
        Ok(())
    }

    /// Full overwrite of the stored session list, minus transient markers.
    pub async fn save_current(&self) -> StorageResult<()> {
        self.persist().await
    }

    async fn persist(&self) -> StorageResult<()> {
        let sessions: Vec<Session> = self.sessions.iter().map(Session::persistable).collect();
        set_typed(self.store.as_ref(), SESSIONS_KEY, &sessions).await?;
        if let Some(session) = self.current() {
            set_typed(self.store.as_ref(), CURRENT_SESSION_KEY, &session.id).await?;
        }
        Ok(())
    }

    fn check_index(&self, index: usize) -> Result<(), ValidationError> {
        if index >= self.sessions.len() {
            return Err(ValidationError::InvalidIndex {
                index,
                len: self.sessions.len(),
            });
        }
        Ok(())
    }
}
