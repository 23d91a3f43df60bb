use serde_json::Value;
use std::sync::Arc;

use super::{
    ChatTool, FeatureFlags, ImageTool, LearningTool, SearchTool, ToolExecutionError, ToolOutcome,
};
use crate::config::Config;
use crate::storage::KeyValueStore;
use crate::types::ToolDefinition;

/// Tools known to the engine plus the flags deciding which are live.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn ChatTool>>,
    flags: FeatureFlags,
}

impl ToolRegistry {
    pub fn new(flags: FeatureFlags) -> Self {
        Self {
            tools: Vec::new(),
            flags,
        }
    }

    /// Search, image and learning tools wired from config.
    pub fn from_config(config: &Config, store: Arc<dyn KeyValueStore>) -> Self {
        let http = reqwest::Client::new();
        let mut registry = Self::new(config.features);
        registry.register(Arc::new(SearchTool::new(http.clone(), &config.search_url)));
        registry.register(Arc::new(ImageTool::new(
            http,
            config.image_url.clone(),
            config.image_model.clone(),
            config.api_key.clone(),
            Arc::clone(&store),
        )));
        registry.register(Arc::new(LearningTool::new(store)));
        registry
    }

    /// Later registrations replace earlier ones with the same name.
    pub fn register(&mut self, tool: Arc<dyn ChatTool>) {
        self.tools.retain(|existing| existing.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn flags(&self) -> FeatureFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: FeatureFlags) {
        self.flags = flags;
    }

    /// Declarations for exactly the enabled tools, in registration order.
    pub fn declarations(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .filter(|tool| self.flags.enables(tool.name()))
            .map(|tool| tool.definition())
            .collect()
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn ChatTool>> {
        if !self.flags.enables(name) {
            return None;
        }
        self.tools.iter().find(|tool| tool.name() == name).cloned()
    }

    /// Runs a tool and always produces a textual outcome.
    pub async fn dispatch(&self, name: &str, arguments: &Value) -> ToolOutcome {
        let Some(tool) = self.lookup(name) else {
            let error = ToolExecutionError::UnknownTool(name.to_string());
            tracing::warn!(tool = name, "model called a tool that is not enabled");
            return ToolOutcome::text(format!("Tool error: {error}"));
        };

        match tool.execute(arguments).await {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::warn!(tool = name, error = %error, "tool execution failed");
                ToolOutcome::text(tool.failure_message(&error))
            }
        }
    }
}
