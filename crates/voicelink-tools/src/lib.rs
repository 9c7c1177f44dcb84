//! Tools exposed to the dialogue graph
//!
//! Local session-bound tools and remote (MCP) tools share one capability:
//! `invoke(args) → ToolOutcome`. The outcome kind replaces the stringly
//! `[STOP]` content sentinel with a typed field; the wire prefix is kept for
//! cross-process tool compatibility.

pub mod local;
pub mod mcp;
pub mod registry;
pub mod weather;

pub use local::{ClearHistoryTool, CloseChatTool, SessionOps};
pub use mcp::{register_mcp_tools, McpClient, RemoteTool};
pub use registry::ToolRegistry;
pub use weather::{
    AmapWeatherProvider, ForecastDay, WeatherForecast, WeatherNow, WeatherProvider,
    WeatherTool, WeatherForecastTool,
};

use async_trait::async_trait;
use thiserror::Error;

/// Wire prefix marking a terminal tool result.
pub const STOP_PREFIX: &str = "[STOP]";

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool {0} timed out after {1}s")]
    Timeout(String, u64),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool failed: {0}")]
    Invoke(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// How a tool result feeds back into the dialogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    /// Ordinary result: hand it back to the LLM.
    Feedback,
    /// The tool already acted on the device (played audio, showed UI);
    /// the graph ends after delivering this result.
    Terminal,
}

/// Result of one tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub kind: OutcomeKind,
    pub payload: String,
}

impl ToolOutcome {
    pub fn feedback(payload: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Feedback,
            payload: payload.into(),
        }
    }

    pub fn terminal(payload: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Terminal,
            payload: payload.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind == OutcomeKind::Terminal
    }

    /// Encode for cross-process transport: terminal results carry the
    /// `[STOP]` prefix.
    pub fn to_wire(&self) -> String {
        match self.kind {
            OutcomeKind::Feedback => self.payload.clone(),
            OutcomeKind::Terminal => format!("{STOP_PREFIX}{}", self.payload),
        }
    }

    /// Decode a wire result, honoring the `[STOP]` prefix.
    pub fn from_wire(content: &str) -> Self {
        match content.strip_prefix(STOP_PREFIX) {
            Some(rest) => Self::terminal(rest),
            None => Self::feedback(content),
        }
    }
}

/// The single tool capability shared by local and remote tools.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the arguments object.
    fn parameters(&self) -> serde_json::Value;

    async fn invoke(&self, arguments: &str) -> Result<ToolOutcome, ToolError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_round_trip() {
        let feedback = ToolOutcome::feedback("{\"ok\":true}");
        assert_eq!(ToolOutcome::from_wire(&feedback.to_wire()), feedback);

        let terminal = ToolOutcome::terminal("已为你播放");
        let wire = terminal.to_wire();
        assert!(wire.starts_with(STOP_PREFIX));
        assert_eq!(ToolOutcome::from_wire(&wire), terminal);
    }

    #[test]
    fn test_plain_content_is_feedback() {
        let outcome = ToolOutcome::from_wire("just text");
        assert_eq!(outcome.kind, OutcomeKind::Feedback);
        assert_eq!(outcome.payload, "just text");
    }
}
