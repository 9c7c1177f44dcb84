//! Remote (MCP) tools
//!
//! Devices can announce tools over a secondary transport. The protocol is
//! opaque here: a connected MCP endpoint is anything implementing
//! [`McpClient`]. Announced tools are wrapped as [`RemoteTool`]s and merged
//! into the registry under the owning `(device_id, agent_id)`.

use std::sync::Arc;

use async_trait::async_trait;
use voicelink_core::ToolSpec;

use crate::registry::ToolRegistry;
use crate::{Tool, ToolError, ToolOutcome};

/// A connected remote tool endpoint.
#[async_trait]
pub trait McpClient: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolError>;

    /// Invoke a remote tool. The returned content uses the wire encoding
    /// (`[STOP]` prefix for terminal results).
    async fn call_tool(&self, name: &str, arguments: &str) -> Result<String, ToolError>;
}

/// One announced remote tool.
pub struct RemoteTool {
    spec: ToolSpec,
    client: Arc<dyn McpClient>,
}

impl RemoteTool {
    pub fn new(spec: ToolSpec, client: Arc<dyn McpClient>) -> Self {
        Self { spec, client }
    }
}

#[async_trait]
impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    fn parameters(&self) -> serde_json::Value {
        self.spec.parameters.clone()
    }

    async fn invoke(&self, arguments: &str) -> Result<ToolOutcome, ToolError> {
        let content = self.client.call_tool(&self.spec.name, arguments).await?;
        Ok(ToolOutcome::from_wire(&content))
    }
}

/// List the endpoint's tools and register them for the device/agent pair.
/// Returns how many tools were registered.
pub async fn register_mcp_tools(
    registry: &ToolRegistry,
    device_id: &str,
    agent_id: &str,
    client: Arc<dyn McpClient>,
) -> Result<usize, ToolError> {
    let specs = client.list_tools().await?;
    let count = specs.len();
    for spec in specs {
        tracing::debug!(tool = %spec.name, device_id, "Registering remote tool");
        registry.register_scoped(
            device_id,
            agent_id,
            Arc::new(RemoteTool::new(spec, client.clone())),
        );
    }
    tracing::info!(count, device_id, agent_id, "Remote tools registered");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OutcomeKind;

    struct PlayMusicEndpoint;

    #[async_trait]
    impl McpClient for PlayMusicEndpoint {
        async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolError> {
            Ok(vec![ToolSpec {
                name: "play_music".into(),
                description: "播放音乐".into(),
                parameters: serde_json::json!({"type": "object"}),
            }])
        }
        async fn call_tool(&self, name: &str, _arguments: &str) -> Result<String, ToolError> {
            assert_eq!(name, "play_music");
            // Device-side playback already happened: terminal on the wire.
            Ok("[STOP]已为你播放".into())
        }
    }

    #[tokio::test]
    async fn test_remote_registration_and_terminal_decode() {
        let registry = ToolRegistry::new();
        let count = register_mcp_tools(
            &registry,
            "dev-1",
            "agent-1",
            Arc::new(PlayMusicEndpoint),
        )
        .await
        .unwrap();
        assert_eq!(count, 1);

        let outcome = registry
            .invoke("dev-1", "agent-1", "play_music", "{}")
            .await
            .unwrap();
        assert_eq!(outcome.kind, OutcomeKind::Terminal);
        assert_eq!(outcome.payload, "已为你播放");
    }
}
