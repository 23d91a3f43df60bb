use super::ConversationManager;
use crate::api::ApiClient;
use crate::error::ChatResult;
use crate::state::session::PROVISIONAL_SESSION_NAME;
use crate::types::WireMessage;
use crate::util::{first_words, truncate_with_ellipsis};
use std::sync::Arc;
use tokio::task::JoinError;

pub const TITLE_INSTRUCTION: &str = "You name conversations. Reply with a title of one to three \
words that captures the topic of the user's message. Reply with the title only, without quotes \
or trailing punctuation.";
pub const TITLE_MAX_CHARS: usize = 20;

/// Title from the first three words of the user's message.
pub fn fallback_title(user_text: &str) -> String {
    truncate_with_ellipsis(&first_words(user_text, 3), TITLE_MAX_CHARS)
}

fn clean_title(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|line| !line.is_empty())?;
    let title = line
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '*' | '#'))
        .trim_end_matches(&['.', '!'][..])
        .trim();
    (!title.is_empty()).then(|| truncate_with_ellipsis(title, TITLE_MAX_CHARS))
}

impl ConversationManager {
    /// Requests a title on a background task. The turn never waits on it.
    pub(super) fn spawn_session_naming(
        &mut self,
        client: Arc<ApiClient>,
        session_id: String,
        user_text: String,
    ) {
        let request = client.build_request(
            vec![
                WireMessage::system(TITLE_INSTRUCTION),
                WireMessage::user(user_text.clone()),
            ],
            None,
        );
        self.naming.spawn(async move {
            let title = match client.complete_text(&request).await {
                Ok(raw) => clean_title(&raw),
                Err(error) => {
                    tracing::warn!(error = %format!("{error:#}"), "session naming failed");
                    None
                }
            };
            let title = title.unwrap_or_else(|| fallback_title(&user_text));
            (session_id, title)
        });
    }

    /// Applies titles that have already arrived. Returns how many were applied.
    pub async fn apply_session_titles(&mut self) -> ChatResult<usize> {
        let mut finished = Vec::new();
        while let Some(result) = self.naming.try_join_next() {
            finished.push(result);
        }
        self.apply_titles(finished).await
    }

    /// Waits for every outstanding naming task, then applies the titles.
    pub async fn wait_for_session_titles(&mut self) -> ChatResult<usize> {
        let mut finished = Vec::new();
        while let Some(result) = self.naming.join_next().await {
            finished.push(result);
        }
        self.apply_titles(finished).await
    }

    async fn apply_titles(
        &mut self,
        finished: Vec<Result<(String, String), JoinError>>,
    ) -> ChatResult<usize> {
        let mut applied = 0usize;
        for result in finished {
            let (session_id, title) = match result {
                Ok(named) => named,
                Err(error) => {
                    tracing::warn!(error = %error, "session naming task did not finish");
                    continue;
                }
            };
            // A name chosen by the user in the meantime wins.
            match self.sessions.get_mut(&session_id) {
                Some(session) if session.name == PROVISIONAL_SESSION_NAME => {
                    tracing::debug!(session = %session_id, title = %title, "session named");
                    session.name = title;
                    applied += 1;
                }
                _ => {}
            }
        }
        if applied > 0 {
            self.sessions.save_current().await?;
        }
        Ok(applied)
    }
}
