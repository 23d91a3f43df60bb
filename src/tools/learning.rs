use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{
    required_str, ChatTool, ToolEffect, ToolExecutionError, ToolOutcome, LEARNING_TOOL_NAME,
};
use crate::storage::{get_typed, set_typed, KeyValueStore, LEARNED_FACTS_KEY};
use crate::types::ToolDefinition;

pub const LEARNED_SECTION_HEADER: &str = "\n\nLearned information about the user:\n";

/// Appends `fact` on its own line unless the block already contains it.
pub fn add_fact(facts: &str, fact: &str) -> String {
    let fact = fact.trim();
    if fact.is_empty() || facts.contains(fact) {
        return facts.to_string();
    }
    if facts.trim().is_empty() {
        return fact.to_string();
    }
    format!("{}\n{fact}", facts.trim_end_matches('\n'))
}

/// Drops every line containing `target`.
pub fn remove_fact(facts: &str, target: &str) -> String {
    let target = target.trim();
    if target.is_empty() {
        return facts.to_string();
    }
    facts
        .lines()
        .filter(|line| !line.contains(target))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn strip_learned_section(prompt: &str) -> &str {
    match prompt.find(LEARNED_SECTION_HEADER) {
        Some(position) => &prompt[..position],
        None => prompt,
    }
}

/// Replaces any previous learned section with one built from `facts`.
pub fn refresh_system_prompt(prompt: &str, facts: &str) -> String {
    let base = strip_learned_section(prompt);
    if facts.trim().is_empty() {
        return base.to_string();
    }
    format!("{base}{LEARNED_SECTION_HEADER}{}", facts.trim())
}

pub struct LearningTool {
    store: Arc<dyn KeyValueStore>,
}

impl LearningTool {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ChatTool for LearningTool {
    fn name(&self) -> &'static str {
        LEARNING_TOOL_NAME
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            LEARNING_TOOL_NAME,
            "Remember or forget a fact about the user. Use 'add' when the user shares a \
             lasting preference or detail about themselves, and 'remove' when they ask you \
             to forget something.",
            json!({
                "type": "object",
                "properties": {
                    "action": {
                        "type": "string",
                        "enum": ["add", "remove"],
                        "description": "Whether to add or remove the fact"
                    },
                    "fact": {
                        "type": "string",
                        "description": "A short fact, or for 'remove' the text to forget"
                    }
                },
                "required": ["action", "fact"]
            }),
        )
    }

    async fn execute(&self, arguments: &Value) -> Result<ToolOutcome, ToolExecutionError> {
        let action = required_str(arguments, "action")?;
        let fact = required_str(arguments, "fact")?;

        let current: String = get_typed(self.store.as_ref(), LEARNED_FACTS_KEY)
            .await?
            .unwrap_or_default();
        let (updated, summary) = match action {
            "add" => {
                let updated = add_fact(&current, fact);
                let summary = if updated == current {
                    format!("Already known: {fact}")
                } else {
                    format!("Learned: {fact}")
                };
                (updated, summary)
            }
            "remove" => {
                let updated = remove_fact(&current, fact);
                let summary = if updated == current {
                    format!("Nothing matching '{fact}' was stored")
                } else {
                    format!("Forgot facts mentioning '{fact}'")
                };
                (updated, summary)
            }
            other => {
                return Err(ToolExecutionError::InvalidArguments(format!(
                    "unknown action '{other}', expected 'add' or 'remove'"
                )))
            }
        };

        if updated == current {
            return Ok(ToolOutcome::text(summary));
        }
        set_typed(self.store.as_ref(), LEARNED_FACTS_KEY, &updated).await?;
        tracing::debug!(action, "learned facts updated");
        Ok(ToolOutcome::with_effect(
            summary,
            ToolEffect::LearnedFactsChanged(updated),
        ))
    }
}
