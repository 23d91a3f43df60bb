pub mod conversation;
pub mod history;
pub mod message;
pub mod session;

pub use conversation::{
    ConversationManager, ConversationStreamUpdate, StopHandle, StopReason, TurnOutcome,
};
pub use history::MessageHistory;
pub use message::{FileContext, Message, Role, UserInput};
pub use session::{Session, SessionStore, SessionTemplate, PROVISIONAL_SESSION_NAME};
