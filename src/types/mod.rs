mod api;
mod chunk;

pub use api::{
    CompletionRequest, ContentPart, FunctionDefinition, ImageTurn, ImageUrl, TextTurn,
    ToolDefinition, ToolResultTurn, WireMessage, WireRole,
};
pub use chunk::{ChatCompletionChunk, StreamFragment, ToolCallDelta};
