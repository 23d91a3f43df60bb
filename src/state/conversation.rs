mod core;
mod edit;
mod history;
mod naming;
mod reasoning;
mod state;
mod stop;
mod streaming;
mod tools;

#[cfg(test)]
mod tests;

pub use naming::{fallback_title, TITLE_INSTRUCTION, TITLE_MAX_CHARS};
pub use reasoning::{
    cosine_similarity, CONVERGENCE_THRESHOLD, INITIAL_REASONING_PROMPT, MAX_REASONING_ROUNDS,
    REASONING_TEMPERATURE, SYNTHESIS_PROMPT, SYNTHESIS_TEMPERATURE,
};
pub use state::{ConversationManager, ConversationStreamUpdate, TurnOutcome};
pub use stop::{StopHandle, StopReason};
pub use streaming::STREAM_FAILURE_MESSAGE;

#[cfg(test)]
use streaming::*;
