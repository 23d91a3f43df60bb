use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{required_str, ChatTool, ToolEffect, ToolExecutionError, ToolOutcome, IMAGE_TOOL_NAME};
use crate::storage::{stored_setting, KeyValueStore, API_KEY_KEY};
use crate::types::ToolDefinition;

#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    url: Option<String>,
}

pub struct ImageTool {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    store: Arc<dyn KeyValueStore>,
}

impl ImageTool {
    /// `api_key` is the configured fallback; a stored `apiKey` wins, as it
    /// does for the completion client.
    pub fn new(
        http: reqwest::Client,
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key,
            store,
        }
    }

    async fn resolve_api_key(&self) -> Result<Option<String>, ToolExecutionError> {
        Ok(stored_setting(self.store.as_ref(), API_KEY_KEY)
            .await?
            .or_else(|| self.api_key.clone()))
    }
}

fn first_image_url(body: ImageResponse) -> Option<String> {
    body.data
        .into_iter()
        .filter_map(|item| item.url)
        .find(|url| !url.trim().is_empty())
}

#[async_trait]
impl ChatTool for ImageTool {
    fn name(&self) -> &'static str {
        IMAGE_TOOL_NAME
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            IMAGE_TOOL_NAME,
            "Generate an image from a text description when the user asks for a picture.",
            json!({
                "type": "object",
                "properties": {
                    "prompt": {
                        "type": "string",
                        "description": "Detailed description of the image to generate"
                    }
                },
                "required": ["prompt"]
            }),
        )
    }

    async fn execute(&self, arguments: &Value) -> Result<ToolOutcome, ToolExecutionError> {
        let prompt = required_str(arguments, "prompt")?;
        tracing::debug!(endpoint = %self.endpoint, model = %self.model, "image generation");

        let mut request = self
            .http
            .post(&self.endpoint)
            .json(&json!({ "model": self.model, "prompt": prompt, "n": 1 }));
        if let Some(api_key) = self.resolve_api_key().await? {
            request = request.header("authorization", format!("Bearer {api_key}"));
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ToolExecutionError::Status(response.status()));
        }

        let body: ImageResponse = response.json().await?;
        let url = first_image_url(body).ok_or_else(|| {
            ToolExecutionError::UnexpectedResponse("no image URL in response".to_string())
        })?;
        Ok(ToolOutcome::with_effect(
            url.clone(),
            ToolEffect::ImageGenerated(url),
        ))
    }

    fn failure_message(&self, error: &ToolExecutionError) -> String {
        format!("Image generation failed: {error}")
    }
}
