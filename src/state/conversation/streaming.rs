use super::stop::TurnGuard;
use super::{ConversationManager, ConversationStreamUpdate};
use crate::api::ApiClient;
use crate::error::{ChatError, ChatResult};
use crate::state::Message;
use crate::types::{CompletionRequest, StreamFragment, ToolCallDelta};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;

pub const STREAM_FAILURE_MESSAGE: &str =
    "Sorry, something went wrong while generating a response. Please try again.";

pub(super) fn emit_stream_update(
    stream_delta_tx: Option<&mpsc::UnboundedSender<ConversationStreamUpdate>>,
    update: ConversationStreamUpdate,
) {
    if let Some(tx) = stream_delta_tx {
        let _ = tx.send(update);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct CompletedToolCall {
    pub(super) id: String,
    pub(super) name: String,
    pub(super) arguments: Value,
}

#[derive(Debug, Default)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl PendingToolCall {
    fn try_complete(&self) -> Option<CompletedToolCall> {
        if self.name.is_empty() {
            return None;
        }
        match serde_json::from_str::<Value>(&self.arguments) {
            Ok(arguments @ Value::Object(_)) => Some(CompletedToolCall {
                id: self.id.clone(),
                name: self.name.clone(),
                arguments,
            }),
            _ => None,
        }
    }
}

/// Accumulates tool-call fragments by call id. Fragments without an id
/// continue the call most recently opened.
#[derive(Debug, Default)]
pub(super) struct ToolCallBuffer {
    calls: Vec<PendingToolCall>,
    current: Option<usize>,
}

impl ToolCallBuffer {
    /// Returns the call once its arguments parse as a JSON object.
    pub(super) fn push(&mut self, delta: ToolCallDelta) -> Option<CompletedToolCall> {
        let slot = match delta.id.filter(|id| !id.is_empty()) {
            Some(id) => match self.calls.iter().position(|call| call.id == id) {
                Some(position) => position,
                None => self.open(id),
            },
            None => match self.current {
                Some(position) => position,
                None => self.open(format!("call_{}", uuid::Uuid::new_v4().simple())),
            },
        };
        self.current = Some(slot);

        let call = &mut self.calls[slot];
        if let Some(name) = delta.name.filter(|name| !name.is_empty()) {
            if call.name.is_empty() {
                call.name = name;
            }
        }
        call.arguments.push_str(&delta.arguments);
        call.try_complete()
    }

    pub(super) fn has_pending(&self) -> bool {
        !self.calls.is_empty()
    }

    fn open(&mut self, id: String) -> usize {
        self.calls.push(PendingToolCall {
            id,
            ..PendingToolCall::default()
        });
        self.calls.len() - 1
    }
}

#[derive(Debug)]
pub(super) enum RoundResult {
    Finished,
    Stopped,
    ToolCall(CompletedToolCall),
}

impl ConversationManager {
    pub(super) fn push_assistant_placeholder(
        &mut self,
        stream_delta_tx: Option<&mpsc::UnboundedSender<ConversationStreamUpdate>>,
    ) -> ChatResult<usize> {
        let index = self.history_mut()?.append(Message::assistant(""));
        emit_stream_update(
            stream_delta_tx,
            ConversationStreamUpdate::AssistantStarted { index },
        );
        Ok(index)
    }

    fn append_delta(
        &mut self,
        index: usize,
        text: String,
        stream_delta_tx: Option<&mpsc::UnboundedSender<ConversationStreamUpdate>>,
    ) {
        let Ok(history) = self.history_mut() else {
            return;
        };
        if let Some(message) = history.get_mut(index) {
            message.content.push_str(&text);
            emit_stream_update(
                stream_delta_tx,
                ConversationStreamUpdate::Delta { index, text },
            );
        }
    }

    pub(super) fn append_stop_marker(&mut self, index: usize, guard: &TurnGuard) {
        let marker = guard.reason().marker();
        if let Ok(history) = self.history_mut() {
            if let Some(message) = history.get_mut(index) {
                message.content.push_str(marker);
            }
        }
    }

    /// Consumes one streamed response into the message at `index`. Stops at
    /// the first complete tool call when `accept_tools` is set. Transport and
    /// parse failures come back as `ChatError::Stream`.
    pub(super) async fn stream_round(
        &mut self,
        client: &ApiClient,
        request: &CompletionRequest,
        index: usize,
        guard: &TurnGuard,
        accept_tools: bool,
        stream_delta_tx: Option<&mpsc::UnboundedSender<ConversationStreamUpdate>>,
    ) -> ChatResult<RoundResult> {
        let mut fragments = client
            .stream_fragments(request)
            .await
            .map_err(ChatError::Stream)?;
        let mut tool_calls = ToolCallBuffer::default();
        let mut ignored_tool_fragments = 0usize;

        while let Some(fragment) = fragments.next().await {
            let fragment = fragment.map_err(ChatError::Stream)?;
            if guard.is_cancelled() {
                tracing::debug!(index, "stream stopped");
                return Ok(RoundResult::Stopped);
            }

            match fragment {
                StreamFragment::Content(text) => self.append_delta(index, text, stream_delta_tx),
                StreamFragment::ToolCall(delta) if accept_tools => {
                    if let Some(call) = tool_calls.push(delta) {
                        tracing::debug!(tool = %call.name, id = %call.id, "tool call complete");
                        return Ok(RoundResult::ToolCall(call));
                    }
                }
                StreamFragment::ToolCall(_) => ignored_tool_fragments += 1,
            }
        }

        if ignored_tool_fragments > 0 {
            tracing::warn!(
                fragments = ignored_tool_fragments,
                "tool round limit reached; ignoring further tool calls"
            );
        }
        if tool_calls.has_pending() {
            tracing::warn!("stream ended with an incomplete tool call");
        }
        Ok(RoundResult::Finished)
    }
}
