//! Chat message model
//!
//! Messages are the unit of conversation history: what the device said, what
//! the model answered, which tools ran. Streaming LLM output arrives as
//! [`ChatDelta`]s; one aggregated assistant [`Message`] is produced per
//! stream via [`MessageAggregator`].

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "tool" => Ok(Role::Tool),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON arguments as emitted by the model
    pub arguments: String,
}

/// One part of a multi-modal message body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

/// A single conversation message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub multi_content: Vec<ContentPart>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub message_id: Uuid,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            multi_content: Vec::new(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            message_id: Uuid::new_v4(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// A tool result message paired to the tool call it answers.
    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(Role::Tool, content)
        }
    }

    pub fn with_message_id(mut self, id: Uuid) -> Self {
        self.message_id = id;
        self
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = calls;
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// A streamed fragment of the model's response
#[derive(Debug, Clone, Default)]
pub struct ChatDelta {
    /// Text fragment, if this delta carries text
    pub text: Option<String>,
    /// Tool calls surfaced by this delta
    pub tool_calls: Vec<ToolCall>,
}

impl ChatDelta {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_call(call: ToolCall) -> Self {
        Self {
            text: None,
            tool_calls: vec![call],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.as_deref().unwrap_or("").is_empty() && self.tool_calls.is_empty()
    }
}

/// Tool description handed to the model for binding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: serde_json::Value,
}

/// Folds a delta stream into one assistant message.
///
/// Text fragments are concatenated; tool calls are unioned in arrival order.
/// The aggregated message is appended to history only after the stream
/// closes, never from partial output.
#[derive(Debug, Default)]
pub struct MessageAggregator {
    content: String,
    tool_calls: Vec<ToolCall>,
}

impl MessageAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, delta: &ChatDelta) {
        if let Some(text) = &delta.text {
            self.content.push_str(text);
        }
        self.tool_calls.extend(delta.tool_calls.iter().cloned());
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        &self.tool_calls
    }

    /// Finish aggregation. Returns `None` when the stream produced neither
    /// text nor tool calls, so empty assistant messages never reach history.
    pub fn finish(self) -> Option<Message> {
        if self.content.is_empty() && self.tool_calls.is_empty() {
            return None;
        }
        Some(Message::assistant(self.content).with_tool_calls(self.tool_calls))
    }
}
