use crate::api::client::{ByteStream, MockStreamProducer};
use crate::types::CompletionRequest;
use anyhow::Result;
use bytes::Bytes;
use futures::stream;
use serde_json::json;
use std::sync::{Arc, Mutex};

/// Replays scripted SSE responses, one per request, and remembers every
/// request it was handed.
#[derive(Clone)]
pub struct MockApiClient {
    responses: Arc<Mutex<Vec<Vec<String>>>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl MockApiClient {
    pub fn new(responses: Vec<Vec<String>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl MockStreamProducer for MockApiClient {
    fn create_mock_stream(&self, request: &CompletionRequest) -> Result<ByteStream> {
        self.requests.lock().unwrap().push(request.clone());

        let mut responses_guard = self.responses.lock().unwrap();
        if responses_guard.is_empty() {
            return Err(anyhow::anyhow!(
                "MockApiClient: No more responses configured"
            ));
        }
        let current_sse_chunks = responses_guard.remove(0);
        Ok(frame_sse_chunks(current_sse_chunks))
    }
}

pub fn frame_sse_chunks(chunks: Vec<String>) -> ByteStream {
    let sse_byte_chunks: Vec<Result<Bytes>> = chunks
        .into_iter()
        .map(|s| {
            let framed = if s.ends_with("\n\n") {
                s
            } else {
                format!("{s}\n\n")
            };
            Ok(Bytes::from(framed))
        })
        .collect();

    Box::pin(stream::iter(sse_byte_chunks))
}

pub fn content_event(text: &str) -> String {
    format!(
        "data: {}",
        json!({ "choices": [{ "index": 0, "delta": { "content": text } }] })
    )
}

pub fn tool_call_event(id: Option<&str>, name: Option<&str>, arguments: &str) -> String {
    let mut call = json!({
        "index": 0,
        "type": "function",
        "function": { "arguments": arguments }
    });
    if let Some(id) = id {
        call["id"] = json!(id);
    }
    if let Some(name) = name {
        call["function"]["name"] = json!(name);
    }
    format!(
        "data: {}",
        json!({ "choices": [{ "index": 0, "delta": { "tool_calls": [call] } }] })
    )
}

pub fn done_event() -> String {
    "data: [DONE]".to_string()
}

/// A complete text-only response.
pub fn text_response(parts: &[&str]) -> Vec<String> {
    let mut events: Vec<String> = parts.iter().map(|part| content_event(part)).collect();
    events.push(done_event());
    events
}
