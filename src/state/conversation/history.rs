use super::ConversationManager;
use crate::types::WireMessage;

/// Builds the quoted rewrite request used by revamp.
pub(super) fn revamp_instruction(original: &str, change: &str) -> String {
    format!(
        "Rewrite your previous response below by applying the requested change.\n\n\
         Original response:\n\"\"\"\n{original}\n\"\"\"\n\n\
         Requested change: {change}\n\n\
         Reply with the replacement response only, without any preamble or commentary."
    )
}

impl ConversationManager {
    /// System prompt plus the session's file context, if either is present.
    pub(super) fn system_content(&self) -> Option<String> {
        let prompt = self
            .system_prompt
            .as_deref()
            .map(str::trim)
            .filter(|prompt| !prompt.is_empty());
        let file_block = self
            .sessions
            .current()
            .and_then(|session| session.file_context.as_ref())
            .map(|file| file.context_block());

        match (prompt, file_block) {
            (Some(prompt), Some(block)) => Some(format!("{prompt}{block}")),
            (Some(prompt), None) => Some(prompt.to_string()),
            (None, Some(block)) => Some(block.trim_start().to_string()),
            (None, None) => None,
        }
    }

    /// Outbound messages: system content first, then history up to `end`
    /// (exclusive), or all of it.
    pub(super) fn outbound_messages(&self, end: Option<usize>) -> Vec<WireMessage> {
        let mut messages = Vec::new();
        if let Some(system) = self.system_content() {
            messages.push(WireMessage::system(system));
        }
        if let Some(history) = self.history() {
            match end {
                Some(end) => messages.extend(history.wire_range(end)),
                None => messages.extend(history.to_wire()),
            }
        }
        messages
    }
}
