use super::stop::TurnGuard;
use super::streaming::{emit_stream_update, RoundResult, STREAM_FAILURE_MESSAGE};
use super::{ConversationManager, ConversationStreamUpdate, TurnOutcome};
use crate::api::ApiClient;
use crate::error::{ChatError, ChatResult, ValidationError};
use crate::state::{Message, UserInput};
use tokio::sync::mpsc;

impl ConversationManager {
    /// Appends the user's message and runs a full turn, including any tool
    /// round-trips. Stream failures are recorded in history and reported via
    /// the outcome; only configuration, validation and storage problems are
    /// returned as errors.
    pub async fn send_message(
        &mut self,
        input: UserInput,
        stream_delta_tx: Option<&mpsc::UnboundedSender<ConversationStreamUpdate>>,
    ) -> ChatResult<TurnOutcome> {
        if input.is_blank() {
            return Err(ValidationError::EmptyContent.into());
        }
        let guard = self.stop.begin_turn()?;
        let client = self.ensure_client().await?;

        let created_session = match self.sessions.current() {
            Some(_) => None,
            None => Some(self.sessions.create_provisional().await?),
        };
        let user_text = input.text.clone();
        self.history_mut()?.append(input.into_message());
        self.sessions.save_current().await?;

        let outcome = self.run_reply(&client, &guard, stream_delta_tx).await?;
        drop(guard);

        if let Some(session_id) = created_session {
            self.spawn_session_naming(client, session_id, user_text);
        }
        Ok(outcome)
    }

    /// Produces the assistant's reply to the history as it stands, through
    /// multi-round reasoning when that mode is on.
    pub(super) async fn run_reply(
        &mut self,
        client: &ApiClient,
        guard: &TurnGuard,
        stream_delta_tx: Option<&mpsc::UnboundedSender<ConversationStreamUpdate>>,
    ) -> ChatResult<TurnOutcome> {
        if self.tools.flags().multi_turn_cot {
            self.run_reasoning_turn(client, guard, stream_delta_tx).await
        } else {
            self.run_turn(client, guard, stream_delta_tx).await
        }
    }

    /// Streams responses until the model answers without calling a tool.
    /// Tools are offered on the first request only; at most
    /// `max_tool_rounds` calls are executed per turn.
    pub(super) async fn run_turn(
        &mut self,
        client: &ApiClient,
        guard: &TurnGuard,
        stream_delta_tx: Option<&mpsc::UnboundedSender<ConversationStreamUpdate>>,
    ) -> ChatResult<TurnOutcome> {
        let max_tool_rounds = self.config.max_tool_rounds.max(1);
        let mut tool_rounds = 0usize;

        let outcome = loop {
            // Stopped while a tool ran: nothing is streaming, so the marker
            // gets a message of its own.
            if guard.is_cancelled() {
                self.append_stop_notice(guard)?;
                break TurnOutcome::Stopped(guard.reason());
            }

            let tools = (tool_rounds == 0).then(|| self.tools.declarations());
            let request = client.build_request(self.outbound_messages(None), tools);
            let index = self.push_assistant_placeholder(stream_delta_tx)?;
            let accept_tools = tool_rounds < max_tool_rounds;

            let round = self
                .stream_round(client, &request, index, guard, accept_tools, stream_delta_tx)
                .await;
            match round {
                Ok(RoundResult::Finished) => break TurnOutcome::Completed,
                Ok(RoundResult::Stopped) => {
                    self.append_stop_marker(index, guard);
                    break TurnOutcome::Stopped(guard.reason());
                }
                Ok(RoundResult::ToolCall(call)) => {
                    self.discard_if_empty(index)?;
                    self.run_tool_call(call, stream_delta_tx).await?;
                    tool_rounds += 1;
                }
                Err(ChatError::Stream(error)) => {
                    self.record_stream_failure(index, &error)?;
                    break TurnOutcome::Failed;
                }
                Err(error) => return Err(error),
            }
        };

        self.finish_turn(outcome, stream_delta_tx).await
    }

    /// Drops transient messages, persists, and reports the outcome.
    pub(super) async fn finish_turn(
        &mut self,
        outcome: TurnOutcome,
        stream_delta_tx: Option<&mpsc::UnboundedSender<ConversationStreamUpdate>>,
    ) -> ChatResult<TurnOutcome> {
        self.history_mut()?.remove_transient();
        self.sessions.save_current().await?;
        emit_stream_update(
            stream_delta_tx,
            ConversationStreamUpdate::TurnFinished(outcome),
        );
        Ok(outcome)
    }

    /// Replaces the partial reply at `index` with the retry notice.
    pub(super) fn record_stream_failure(
        &mut self,
        index: usize,
        error: &anyhow::Error,
    ) -> ChatResult<()> {
        tracing::error!(error = %format!("{error:#}"), "completion stream failed");
        let history = self.history_mut()?;
        history.remove(index);
        history.remove_transient();
        history.append(Message::assistant(STREAM_FAILURE_MESSAGE));
        Ok(())
    }

    pub(super) fn append_stop_notice(&mut self, guard: &TurnGuard) -> ChatResult<()> {
        let marker = guard.reason().marker().trim_start();
        self.history_mut()?.append(Message::assistant(marker));
        Ok(())
    }

    /// Removes the placeholder at `index` when nothing was streamed into it.
    fn discard_if_empty(&mut self, index: usize) -> ChatResult<()> {
        let history = self.history_mut()?;
        if history
            .get(index)
            .is_some_and(|message| message.content.is_empty())
        {
            history.remove(index);
        }
        Ok(())
    }
}
