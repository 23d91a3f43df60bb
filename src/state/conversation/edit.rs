use super::history::revamp_instruction;
use super::streaming::{emit_stream_update, RoundResult};
use super::{ConversationManager, ConversationStreamUpdate, TurnOutcome};
use crate::error::{ChatError, ChatResult, ValidationError};
use crate::state::{Role, UserInput};
use crate::types::WireMessage;
use tokio::sync::mpsc;

impl ConversationManager {
    /// Replaces the latest user message, drops everything after it, and
    /// regenerates the response.
    pub async fn edit_user_message(
        &mut self,
        index: usize,
        input: UserInput,
        stream_delta_tx: Option<&mpsc::UnboundedSender<ConversationStreamUpdate>>,
    ) -> ChatResult<TurnOutcome> {
        let history = self.current_history()?;
        let message = history.get(index).ok_or(ValidationError::InvalidIndex {
            index,
            len: history.len(),
        })?;
        if message.role != Role::User {
            return Err(ValidationError::NotUserMessage { index }.into());
        }
        if !history.is_latest_user_message(index) {
            return Err(ValidationError::NotLatestUserMessage { index }.into());
        }
        if input.is_blank() {
            return Err(ValidationError::EmptyContent.into());
        }

        let guard = self.stop.begin_turn()?;
        let client = self.ensure_client().await?;

        let history = self.history_mut()?;
        if let Some(message) = history.get_mut(index) {
            *message = input.into_message();
        }
        history.truncate_after(index)?;
        self.sessions.save_current().await?;

        self.run_reply(&client, &guard, stream_delta_tx).await
    }

    /// Regenerates from the user message preceding the assistant message at
    /// `index`, discarding that response and everything after it.
    pub async fn redo_assistant_message(
        &mut self,
        index: usize,
        stream_delta_tx: Option<&mpsc::UnboundedSender<ConversationStreamUpdate>>,
    ) -> ChatResult<TurnOutcome> {
        let user_index = self.assistant_target(index)?;
        let user_index = user_index.ok_or(ValidationError::NoPrecedingUserMessage { index })?;

        let guard = self.stop.begin_turn()?;
        let client = self.ensure_client().await?;

        self.history_mut()?.truncate_after(user_index)?;
        self.sessions.save_current().await?;

        self.run_reply(&client, &guard, stream_delta_tx).await
    }

    /// Rewrites one assistant message in place according to `change`. The
    /// original text is restored if the request fails.
    pub async fn revamp_assistant_message(
        &mut self,
        index: usize,
        change: &str,
        stream_delta_tx: Option<&mpsc::UnboundedSender<ConversationStreamUpdate>>,
    ) -> ChatResult<TurnOutcome> {
        self.assistant_target(index)?;
        let change = change.trim();
        if change.is_empty() {
            return Err(ValidationError::EmptyContent.into());
        }

        let guard = self.stop.begin_turn()?;
        let client = self.ensure_client().await?;

        let original = self.current_history()?.as_slice()[index].content.clone();
        let mut messages = self.outbound_messages(Some(index));
        messages.push(WireMessage::user(revamp_instruction(&original, change)));
        let request = client.build_request(messages, None);

        if let Some(message) = self.history_mut()?.get_mut(index) {
            message.content.clear();
        }
        emit_stream_update(
            stream_delta_tx,
            ConversationStreamUpdate::AssistantStarted { index },
        );

        let round = self
            .stream_round(&client, &request, index, &guard, false, stream_delta_tx)
            .await;
        let outcome = match round {
            Ok(RoundResult::Stopped) => {
                self.append_stop_marker(index, &guard);
                TurnOutcome::Stopped(guard.reason())
            }
            Ok(_) if self.content_at(index).trim().is_empty() => {
                tracing::warn!(index, "revamp produced no text; keeping original");
                self.restore_content(index, original)?;
                TurnOutcome::Failed
            }
            Ok(_) => TurnOutcome::Completed,
            Err(ChatError::Stream(error)) => {
                tracing::error!(error = %format!("{error:#}"), "revamp stream failed");
                self.restore_content(index, original)?;
                TurnOutcome::Failed
            }
            Err(error) => {
                self.restore_content(index, original)?;
                return Err(error);
            }
        };

        self.sessions.save_current().await?;
        emit_stream_update(
            stream_delta_tx,
            ConversationStreamUpdate::TurnFinished(outcome),
        );
        Ok(outcome)
    }

    /// Validates an assistant target and returns its preceding user index.
    fn assistant_target(&self, index: usize) -> Result<Option<usize>, ValidationError> {
        let history = self.current_history()?;
        let message = history.get(index).ok_or(ValidationError::InvalidIndex {
            index,
            len: history.len(),
        })?;
        if message.role != Role::Assistant {
            return Err(ValidationError::NotAssistantMessage { index });
        }
        Ok(history.preceding_user_index(index))
    }

    fn content_at(&self, index: usize) -> &str {
        self.history()
            .and_then(|history| history.get(index))
            .map(|message| message.content.as_str())
            .unwrap_or_default()
    }

    fn restore_content(&mut self, index: usize, original: String) -> ChatResult<()> {
        if let Some(message) = self.history_mut()?.get_mut(index) {
            message.content = original;
        }
        Ok(())
    }
}
