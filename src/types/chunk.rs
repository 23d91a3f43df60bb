use serde::Deserialize;

/// One `data:` payload of an OpenAI-compatible streamed chat completion.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallChunk>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolCallChunk {
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<FunctionChunk>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FunctionChunk {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

/// Partial tool invocation; `arguments` is a slice of a JSON string that
/// accumulates across fragments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallDelta {
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFragment {
    Content(String),
    ToolCall(ToolCallDelta),
}

impl ChatCompletionChunk {
    /// Flattens the first choice into fragments, content before tool call.
    ///
    /// Only `tool_calls[0]` is read: one tool call per stream is supported,
    /// and any parallel calls in the same delta are dropped.
    pub fn into_fragments(self) -> Vec<StreamFragment> {
        let Some(choice) = self.choices.into_iter().next() else {
            return Vec::new();
        };

        let mut fragments = Vec::new();
        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
            fragments.push(StreamFragment::Content(content));
        }

        let first_call = choice
            .delta
            .tool_calls
            .and_then(|calls| calls.into_iter().next());
        if let Some(call) = first_call {
            let (name, arguments) = call
                .function
                .map(|f| (f.name, f.arguments.unwrap_or_default()))
                .unwrap_or((None, String::new()));
            fragments.push(StreamFragment::ToolCall(ToolCallDelta {
                id: call.id.filter(|id| !id.is_empty()),
                name: name.filter(|n| !n.is_empty()),
                arguments,
            }));
        }

        fragments
    }
}
