use super::logging::{debug_payload_enabled, emit_debug_payload};
use super::stream::StreamParser;
use crate::types::{CompletionRequest, StreamFragment, ToolDefinition, WireMessage};
use crate::util::is_local_endpoint_url;
use anyhow::{anyhow, bail, Result};
use bytes::Bytes;
use futures::{stream, Stream, StreamExt};
use std::pin::Pin;
#[cfg(test)]
use std::sync::Arc;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<StreamFragment>> + Send>>;

#[cfg(test)]
pub trait MockStreamProducer: Send + Sync {
    fn create_mock_stream(&self, request: &CompletionRequest) -> Result<ByteStream>;
}

/// Everything needed to talk to one completion endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub api_key: Option<String>,
    pub api_url: String,
    pub model: String,
    pub temperature: f32,
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    api_key: Option<String>,
    request_url: String,
    model: String,
    temperature: f32,
    #[cfg(test)]
    mock_stream_producer: Option<Arc<dyn MockStreamProducer>>,
}

impl ApiClient {
    pub fn new(settings: &ClientSettings) -> Result<Self> {
        let api_url = settings.api_url.trim();
        if !api_url.starts_with("http://") && !api_url.starts_with("https://") {
            bail!("invalid completion endpoint '{api_url}': expected http:// or https:// URL");
        }
        let api_key = settings
            .api_key
            .as_ref()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());
        if api_key.is_none() && !is_local_endpoint_url(api_url) {
            bail!("no API key configured for '{api_url}'; add one in settings");
        }
        if settings.model.trim().is_empty() {
            bail!("no model selected");
        }

        Ok(Self {
            http: reqwest::Client::new(),
            api_key,
            request_url: adapt_to_chat_completions_url(api_url),
            model: settings.model.clone(),
            temperature: settings.temperature,
            #[cfg(test)]
            mock_stream_producer: None,
        })
    }

    #[cfg(test)]
    pub fn new_mock(mock_producer: Arc<dyn MockStreamProducer>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: None,
            request_url: "http://localhost:8000/v1/chat/completions".to_string(),
            model: "mock-model".to_string(),
            temperature: 0.75,
            mock_stream_producer: Some(mock_producer),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn request_url(&self) -> &str {
        &self.request_url
    }

    pub fn build_request(
        &self,
        messages: Vec<WireMessage>,
        tools: Option<Vec<ToolDefinition>>,
    ) -> CompletionRequest {
        CompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            stream: true,
            tools: tools.filter(|tools| !tools.is_empty()),
        }
    }

    pub async fn create_stream(&self, request: &CompletionRequest) -> Result<ByteStream> {
        #[cfg(test)]
        {
            if let Some(producer) = &self.mock_stream_producer {
                return producer.create_mock_stream(request);
            }
        }

        let request_url = self.request_url.clone();
        if debug_payload_enabled() {
            emit_debug_payload(&request_url, request);
        }

        let mut http_request = self
            .http
            .post(&request_url)
            .header("content-type", "application/json")
            .header("accept", "text/event-stream")
            .json(request);
        if let Some(api_key) = &self.api_key {
            http_request = http_request.header("authorization", format!("Bearer {api_key}"));
        }

        let response = http_request
            .send()
            .await
            .map_err(|error| map_api_request_error(error, &request_url))?
            .error_for_status()
            .map_err(|error| map_api_request_error(error, &request_url))?;

        let stream = response.bytes_stream().map(move |item| {
            item.map_err(|error| map_api_request_error(error, &request_url))
        });
        Ok(Box::pin(stream))
    }

    /// Opens the stream and decodes it lazily into content and tool-call
    /// fragments.
    pub async fn stream_fragments(&self, request: &CompletionRequest) -> Result<FragmentStream> {
        let bytes = self.create_stream(request).await?;
        let mut parser = StreamParser::new();
        let fragments = bytes.flat_map(move |item| {
            let batch: Vec<Result<StreamFragment>> = match item {
                Ok(chunk) => match parser.process(&chunk) {
                    Ok(fragments) => fragments.into_iter().map(Ok).collect(),
                    Err(error) => vec![Err(error)],
                },
                Err(error) => vec![Err(error)],
            };
            stream::iter(batch)
        });
        Ok(Box::pin(fragments))
    }

    /// Streams a request to the end and returns only the concatenated text.
    pub async fn complete_text(&self, request: &CompletionRequest) -> Result<String> {
        let mut fragments = self.stream_fragments(request).await?;
        let mut text = String::new();
        while let Some(fragment) = fragments.next().await {
            if let StreamFragment::Content(delta) = fragment? {
                text.push_str(&delta);
            }
        }
        Ok(text)
    }
}

fn map_api_request_error(error: reqwest::Error, request_url: &str) -> anyhow::Error {
    if error.is_connect() && is_local_endpoint_url(request_url) {
        return anyhow!(
            "cannot reach local API endpoint '{}': {}. Start your local server or update CHATWRIGHT_API_URL.",
            request_url,
            error
        );
    }
    if error.is_connect() {
        return anyhow!("cannot reach API endpoint '{}': {}", request_url, error);
    }
    if error.is_timeout() {
        return anyhow!("API request to '{}' timed out: {}", request_url, error);
    }
    if let Some(status) = error.status() {
        return anyhow!(
            "API endpoint '{}' returned HTTP {}: {}",
            request_url,
            status,
            error
        );
    }
    anyhow!("API request to '{}' failed: {}", request_url, error)
}

fn adapt_to_chat_completions_url(api_url: &str) -> String {
    let normalized = api_url.trim_end_matches('/');
    if normalized.ends_with("/chat/completions") {
        return normalized.to_string();
    }
    format!("{normalized}/chat/completions")
}
