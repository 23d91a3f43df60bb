pub mod api;
pub mod config;
pub mod error;
pub mod state;
pub mod storage;
pub mod tools;
pub mod types;
pub mod util;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use error::{ChatError, ChatResult, ValidationError};
pub use state::{ConversationManager, ConversationStreamUpdate, StopHandle, StopReason, TurnOutcome};
