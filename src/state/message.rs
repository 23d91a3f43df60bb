use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{TextTurn, ToolResultTurn, WireMessage, WireRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

impl From<Role> for WireRole {
    fn from(role: Role) -> Self {
        match role {
            Role::User => WireRole::User,
            Role::Assistant => WireRole::Assistant,
            Role::Tool => WireRole::Tool,
        }
    }
}

/// Extracted text of an attached document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContext {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
}

impl FileContext {
    /// Delimited block appended after message or prompt text.
    pub fn context_block(&self) -> String {
        format!(
            "\n\nFile Context - Title: {}\nContent: {}",
            self.name, self.content
        )
    }

    pub fn inline_into(&self, text: &str) -> String {
        format!("{text}{}", self.context_block())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileContext>,
    #[serde(rename = "tool_call_id", default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_tool_call_in_progress: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub generated_images: Vec<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            image: None,
            file: None,
            tool_call_id: None,
            name: None,
            is_tool_call_in_progress: false,
            generated_images: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Assistant-role carrier for a tool's textual result.
    pub fn tool_result(name: &str, tool_call_id: &str, content: impl Into<String>) -> Self {
        Self {
            name: Some(name.to_string()),
            tool_call_id: Some(tool_call_id.to_string()),
            ..Self::new(Role::Assistant, content)
        }
    }

    /// Transient marker shown while a tool runs. Never persisted.
    pub fn tool_processing(name: &str, tool_call_id: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            tool_call_id: Some(tool_call_id.to_string()),
            is_tool_call_in_progress: true,
            ..Self::new(Role::Tool, format!("Using {name}..."))
        }
    }

    pub fn is_transient(&self) -> bool {
        self.is_tool_call_in_progress
    }

    pub fn is_tool_result(&self) -> bool {
        self.role == Role::Assistant && self.tool_call_id.is_some()
    }

    pub fn to_wire(&self) -> WireMessage {
        let role = WireRole::from(self.role);
        if let (Some(name), Some(tool_call_id)) = (&self.name, &self.tool_call_id) {
            return WireMessage::ToolResult(ToolResultTurn {
                role,
                name: name.clone(),
                tool_call_id: tool_call_id.clone(),
                content: self.content.clone(),
            });
        }
        match &self.image {
            Some(url) if !url.is_empty() => WireMessage::with_image(role, &self.content, url),
            _ => WireMessage::Text(TextTurn {
                role,
                content: self.content.clone(),
            }),
        }
    }
}

/// What the user typed plus optional attachments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserInput {
    pub text: String,
    pub image: Option<String>,
    pub file: Option<FileContext>,
}

impl UserInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty() && self.image.is_none() && self.file.is_none()
    }

    /// Message content with any file inlined as a delimited suffix.
    pub fn rendered_content(&self) -> String {
        match &self.file {
            Some(file) => file.inline_into(&self.text),
            None => self.text.clone(),
        }
    }

    pub fn into_message(self) -> Message {
        let content = self.rendered_content();
        Message {
            image: self.image,
            file: self.file,
            ..Message::user(content)
        }
    }
}
