use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{required_str, ChatTool, ToolExecutionError, ToolOutcome, SEARCH_TOOL_NAME};
use crate::types::ToolDefinition;

const DEFAULT_MAX_RESULTS: u64 = 5;
const SEARCH_FAILED: &str =
    "Web search is unavailable right now. Answer from your own knowledge and say so.";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResearchResponse {
    #[serde(default)]
    pub results: Vec<ResearchResult>,
    #[serde(default)]
    pub execution_time: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResearchResult {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub snippet: String,
}

/// Numbered `title (url)` / snippet entries, then a count and timing line.
pub fn format_research_response(response: &ResearchResponse) -> String {
    let mut out = String::new();
    for (position, result) in response.results.iter().enumerate() {
        out.push_str(&format!(
            "{}. {} ({})\n{}\n\n",
            position + 1,
            result.title.trim(),
            result.url.trim(),
            result.snippet.trim()
        ));
    }
    match response.execution_time {
        Some(seconds) => out.push_str(&format!(
            "Found {} results in {seconds:.2} seconds.",
            response.results.len()
        )),
        None => out.push_str(&format!("Found {} results.", response.results.len())),
    }
    out
}

/// Posts `{query, max_results}` to `{base}/research`.
pub struct SearchTool {
    http: reqwest::Client,
    research_url: String,
}

impl SearchTool {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            research_url: format!("{}/research", base_url.trim_end_matches('/')),
        }
    }

    pub fn research_url(&self) -> &str {
        &self.research_url
    }
}

#[async_trait]
impl ChatTool for SearchTool {
    fn name(&self) -> &'static str {
        SEARCH_TOOL_NAME
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            SEARCH_TOOL_NAME,
            "Search the web for current information. Use it for recent events, facts you \
             are unsure about, or anything the user asks you to look up.",
            json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The search query"
                    },
                    "max_results": {
                        "type": "integer",
                        "description": "Maximum number of results (default: 5)"
                    }
                },
                "required": ["query"]
            }),
        )
    }

    async fn execute(&self, arguments: &Value) -> Result<ToolOutcome, ToolExecutionError> {
        let query = required_str(arguments, "query")?;
        let max_results = arguments
            .get("max_results")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_MAX_RESULTS);

        tracing::debug!(url = %self.research_url, query, max_results, "web search");
        let response = self
            .http
            .post(&self.research_url)
            .json(&json!({ "query": query, "max_results": max_results }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ToolExecutionError::Status(response.status()));
        }
        let body: ResearchResponse = response.json().await?;
        Ok(ToolOutcome::text(format_research_response(&body)))
    }

    fn failure_message(&self, _error: &ToolExecutionError) -> String {
        SEARCH_FAILED.to_string()
    }
}
