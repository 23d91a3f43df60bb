use super::streaming::{emit_stream_update, CompletedToolCall};
use super::{ConversationManager, ConversationStreamUpdate};
use crate::error::ChatResult;
use crate::state::Message;
use crate::storage::{set_typed, SYSTEM_PROMPT_KEY};
use crate::tools::{refresh_system_prompt, ToolEffect};
use tokio::sync::mpsc;

impl ConversationManager {
    /// Shows a processing marker, runs the tool, then swaps the marker for
    /// the tool's result message.
    pub(super) async fn run_tool_call(
        &mut self,
        call: CompletedToolCall,
        stream_delta_tx: Option<&mpsc::UnboundedSender<ConversationStreamUpdate>>,
    ) -> ChatResult<usize> {
        let processing_index = self
            .history_mut()?
            .append(Message::tool_processing(&call.name, &call.id));
        emit_stream_update(
            stream_delta_tx,
            ConversationStreamUpdate::ToolProcessing {
                index: processing_index,
                tool_call_id: call.id.clone(),
                name: call.name.clone(),
            },
        );

        let outcome = self.tools.dispatch(&call.name, &call.arguments).await;

        let history = self.history_mut()?;
        history.remove_processing(&call.id);
        let result_index =
            history.append(Message::tool_result(&call.name, &call.id, outcome.content));
        if let Some(effect) = outcome.effect {
            self.apply_tool_effect(effect).await?;
        }

        emit_stream_update(
            stream_delta_tx,
            ConversationStreamUpdate::ToolCompleted {
                index: result_index,
                tool_call_id: call.id,
                name: call.name,
            },
        );
        Ok(result_index)
    }

    pub(super) async fn apply_tool_effect(&mut self, effect: ToolEffect) -> ChatResult<()> {
        match effect {
            ToolEffect::ImageGenerated(url) => {
                let Some(session) = self.sessions.current_mut() else {
                    return Ok(());
                };
                if let Some(index) = session.messages.last_assistant_index() {
                    if let Some(message) = session.messages.get_mut(index) {
                        message.generated_images.push(url.clone());
                    }
                }
                session.generated_images.push(url);
            }
            ToolEffect::LearnedFactsChanged(facts) => {
                let base = self.system_prompt.clone().unwrap_or_default();
                let refreshed = refresh_system_prompt(&base, &facts);
                set_typed(self.storage.as_ref(), SYSTEM_PROMPT_KEY, &refreshed).await?;
                tracing::debug!("system prompt refreshed with learned facts");
                self.system_prompt = Some(refreshed).filter(|prompt| !prompt.trim().is_empty());
            }
        }
        Ok(())
    }
}
