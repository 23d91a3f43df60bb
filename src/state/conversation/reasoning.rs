use super::stop::TurnGuard;
use super::streaming::RoundResult;
use super::{ConversationManager, ConversationStreamUpdate, TurnOutcome};
use crate::api::ApiClient;
use crate::error::{ChatError, ChatResult};
use crate::state::Role;
use crate::types::{CompletionRequest, WireMessage};
use std::collections::HashMap;
use std::ops::ControlFlow;
use tokio::sync::mpsc;

pub const MAX_REASONING_ROUNDS: usize = 5;
/// Rounds this similar to the previous one end the reasoning early.
pub const CONVERGENCE_THRESHOLD: f64 = 0.8;
pub const REASONING_TEMPERATURE: f32 = 0.25;
pub const SYNTHESIS_TEMPERATURE: f32 = 0.5;

pub const INITIAL_REASONING_PROMPT: &str = "You are a highly intelligent assistant, adept at \
logical reasoning and problem-solving. Answer the user's question comprehensively, thinking \
step by step.

<reasoning>
1. [State the first step]
   Explanation: [Explain this step, including any relevant background or logic.]
2. [State the next step]
   Explanation: [Explain how it builds on the previous steps.]
... [Continue with as many steps as needed]
</reasoning>

<answer>
[Give the final answer, derived from the reasoning above.]
</answer>";

const FOLLOWUP_REASONING_PROMPT: &str = "You are an analytical assistant who improves on \
existing solutions. Consider the original question and the previous reasoning below.

Previous reasoning:
{previous}

<critique>
[Evaluate the strengths and weaknesses of the previous reasoning.]
</critique>

<new_reasoning>
1. [State the first step of your revised approach]
   Explanation: [Explain it and what is new or different.]
... [Continue with additional steps as required]
</new_reasoning>

<answer>
[Give the refined answer.]
</answer>

Be critical yet constructive.";

pub const SYNTHESIS_PROMPT: &str = "You are an expert synthesizer. You will receive the \
user's question followed by several turns of reasoning about it. Combine them into a final, \
conclusive answer.

<analysis>
[Summarize each turn's approach, strengths and limitations.]
</analysis>

<final_reasoning>
[Build one integrated line of reasoning from the most compelling points.]
</final_reasoning>

<final_answer>
[Give the final answer, clear and concise.]
</final_answer>";

pub fn followup_prompt(previous: &str) -> String {
    FOLLOWUP_REASONING_PROMPT.replace("{previous}", previous)
}

/// Cosine similarity of the case-folded word counts of `a` and `b`. Zero
/// when either side has no words.
pub fn cosine_similarity(a: &str, b: &str) -> f64 {
    fn word_counts(text: &str) -> HashMap<String, f64> {
        let mut counts = HashMap::new();
        for word in text.split_whitespace() {
            *counts.entry(word.to_lowercase()).or_insert(0.0) += 1.0;
        }
        counts
    }

    let left = word_counts(a);
    let right = word_counts(b);
    let dot: f64 = left
        .iter()
        .filter_map(|(word, count)| right.get(word).map(|other| count * other))
        .sum();
    let magnitude = |counts: &HashMap<String, f64>| counts.values().map(|c| c * c).sum::<f64>().sqrt();
    let (left_len, right_len) = (magnitude(&left), magnitude(&right));
    if left_len == 0.0 || right_len == 0.0 {
        return 0.0;
    }
    dot / (left_len * right_len)
}

fn synthesis_messages(question: &str, rounds: &[String]) -> Vec<WireMessage> {
    let mut messages = vec![
        WireMessage::system(SYNTHESIS_PROMPT),
        WireMessage::user(question),
    ];
    messages.extend(
        rounds
            .iter()
            .enumerate()
            .map(|(round, text)| WireMessage::assistant(format!("Turn {}:\n{text}", round + 1))),
    );
    messages
}

impl ConversationManager {
    /// Answers through repeated reasoning rounds, each critiquing the last,
    /// then a synthesis round. Every round is kept in history.
    pub(super) async fn run_reasoning_turn(
        &mut self,
        client: &ApiClient,
        guard: &TurnGuard,
        stream_delta_tx: Option<&mpsc::UnboundedSender<ConversationStreamUpdate>>,
    ) -> ChatResult<TurnOutcome> {
        let mut rounds: Vec<String> = Vec::new();

        while rounds.len() < MAX_REASONING_ROUNDS {
            let instruction = match rounds.last() {
                Some(previous) => followup_prompt(previous),
                None => INITIAL_REASONING_PROMPT.to_string(),
            };
            let system = match self.system_content() {
                Some(content) => format!("{instruction}\n\n{content}"),
                None => instruction,
            };
            let mut messages = vec![WireMessage::system(system)];
            messages.extend(self.current_history()?.to_wire());
            let mut request = client.build_request(messages, None);
            request.temperature = REASONING_TEMPERATURE;

            let text = match self
                .stream_reasoning_round(client, &request, guard, stream_delta_tx)
                .await?
            {
                ControlFlow::Continue(text) => text,
                ControlFlow::Break(outcome) => return self.finish_turn(outcome, stream_delta_tx).await,
            };
            let converged = rounds
                .last()
                .is_some_and(|previous| cosine_similarity(previous, &text) > CONVERGENCE_THRESHOLD);
            rounds.push(text);
            if converged {
                tracing::debug!(rounds = rounds.len(), "reasoning converged");
                break;
            }
        }

        let question = self
            .current_history()?
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .map(|message| message.content.clone())
            .unwrap_or_default();
        let mut request = client.build_request(synthesis_messages(&question, &rounds), None);
        request.temperature = SYNTHESIS_TEMPERATURE;

        let outcome = match self
            .stream_reasoning_round(client, &request, guard, stream_delta_tx)
            .await?
        {
            ControlFlow::Continue(_) => TurnOutcome::Completed,
            ControlFlow::Break(outcome) => outcome,
        };
        self.finish_turn(outcome, stream_delta_tx).await
    }

    /// Streams one round into a fresh assistant message and returns its
    /// text, or the outcome that ends the turn.
    async fn stream_reasoning_round(
        &mut self,
        client: &ApiClient,
        request: &CompletionRequest,
        guard: &TurnGuard,
        stream_delta_tx: Option<&mpsc::UnboundedSender<ConversationStreamUpdate>>,
    ) -> ChatResult<ControlFlow<TurnOutcome, String>> {
        if guard.is_cancelled() {
            self.append_stop_notice(guard)?;
            return Ok(ControlFlow::Break(TurnOutcome::Stopped(guard.reason())));
        }

        let index = self.push_assistant_placeholder(stream_delta_tx)?;
        match self
            .stream_round(client, request, index, guard, false, stream_delta_tx)
            .await
        {
            Ok(RoundResult::Stopped) => {
                self.append_stop_marker(index, guard);
                Ok(ControlFlow::Break(TurnOutcome::Stopped(guard.reason())))
            }
            Ok(_) => {
                let text = self
                    .current_history()?
                    .get(index)
                    .map(|message| message.content.clone())
                    .unwrap_or_default();
                Ok(ControlFlow::Continue(text))
            }
            Err(ChatError::Stream(error)) => {
                self.record_stream_failure(index, &error)?;
                Ok(ControlFlow::Break(TurnOutcome::Failed))
            }
            Err(error) => Err(error),
        }
    }
}
