use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WireRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One outbound chat message. Each shape serialises differently, so the
/// variants carry their own structs instead of a bag of optional fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WireMessage {
    Text(TextTurn),
    Image(ImageTurn),
    ToolResult(ToolResultTurn),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextTurn {
    pub role: WireRole,
    pub content: String,
}

/// Text plus an attached image, sent as a two-part content array.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageTurn {
    pub role: WireRole,
    pub content: Vec<ContentPart>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResultTurn {
    pub role: WireRole,
    pub name: String,
    pub tool_call_id: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

impl WireMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::Text(TextTurn {
            role: WireRole::System,
            content: content.into(),
        })
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::Text(TextTurn {
            role: WireRole::User,
            content: content.into(),
        })
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Text(TextTurn {
            role: WireRole::Assistant,
            content: content.into(),
        })
    }

    pub fn with_image(role: WireRole, text: impl Into<String>, url: impl Into<String>) -> Self {
        Self::Image(ImageTurn {
            role,
            content: vec![
                ContentPart::Text { text: text.into() },
                ContentPart::ImageUrl {
                    image_url: ImageUrl { url: url.into() },
                },
            ],
        })
    }

    pub fn role(&self) -> WireRole {
        match self {
            Self::Text(turn) => turn.role,
            Self::Image(turn) => turn.role,
            Self::ToolResult(turn) => turn.role,
        }
    }

    /// Plain-text view of the content, ignoring image parts.
    pub fn text(&self) -> &str {
        match self {
            Self::Text(turn) => &turn.content,
            Self::ToolResult(turn) => &turn.content,
            Self::Image(turn) => turn
                .content
                .iter()
                .find_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .unwrap_or(""),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: FunctionDefinition,
}

impl ToolDefinition {
    pub fn function(name: &str, description: &str, parameters: Value) -> Self {
        Self {
            kind: "function",
            function: FunctionDefinition {
                name: name.to_string(),
                description: description.to_string(),
                parameters,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    pub temperature: f32,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
}
