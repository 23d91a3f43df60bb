//! Model-invocable tools. Each tool declares itself to the model and runs
//! against an external service or the learned-facts block; every failure is
//! turned into text before it reaches history.

mod image;
mod learning;
mod registry;
mod search;

pub use image::ImageTool;
pub use learning::{
    add_fact, refresh_system_prompt, remove_fact, strip_learned_section, LearningTool,
    LEARNED_SECTION_HEADER,
};
pub use registry::ToolRegistry;
pub use search::{format_research_response, ResearchResponse, SearchTool};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::storage::StorageError;
use crate::types::ToolDefinition;

pub const SEARCH_TOOL_NAME: &str = "webgroundtool";
pub const IMAGE_TOOL_NAME: &str = "imagegentool";
pub const LEARNING_TOOL_NAME: &str = "learningtool";

/// Which tools may be offered to the model, plus the multi-round reasoning
/// mode that replaces a plain reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlags {
    pub web_grounding: bool,
    pub image_generation: bool,
    pub learning: bool,
    #[serde(default)]
    pub multi_turn_cot: bool,
}

impl FeatureFlags {
    pub fn enables(&self, tool_name: &str) -> bool {
        match tool_name {
            SEARCH_TOOL_NAME => self.web_grounding,
            IMAGE_TOOL_NAME => self.image_generation,
            LEARNING_TOOL_NAME => self.learning,
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ToolExecutionError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("service returned HTTP {0}")]
    Status(reqwest::StatusCode),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("unknown tool: {0}")]
    UnknownTool(String),
}

/// Side effect a tool asks the orchestrator to apply to session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolEffect {
    /// URL to attach to the latest assistant message.
    ImageGenerated(String),
    /// New learned-facts block; the system prompt must be refreshed.
    LearnedFactsChanged(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub content: String,
    pub effect: Option<ToolEffect>,
}

impl ToolOutcome {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            effect: None,
        }
    }

    pub fn with_effect(content: impl Into<String>, effect: ToolEffect) -> Self {
        Self {
            content: content.into(),
            effect: Some(effect),
        }
    }
}

#[async_trait]
pub trait ChatTool: Send + Sync {
    fn name(&self) -> &'static str;

    fn definition(&self) -> ToolDefinition;

    async fn execute(&self, arguments: &Value) -> Result<ToolOutcome, ToolExecutionError>;

    /// Result text the model receives when `execute` fails.
    fn failure_message(&self, error: &ToolExecutionError) -> String {
        format!("The {} tool failed: {error}", self.name())
    }
}

pub(crate) fn required_str<'a>(
    arguments: &'a Value,
    field: &str,
) -> Result<&'a str, ToolExecutionError> {
    arguments
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ToolExecutionError::InvalidArguments(format!("missing '{field}'")))
}
