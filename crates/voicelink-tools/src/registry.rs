//! Tool registry
//!
//! Merges session-local tools with remote tools registered per
//! `(device_id, agent_id)`. Invocation is timeout-guarded; a slow remote
//! tool must not wedge the dialogue run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use voicelink_core::ToolSpec;

use crate::{Tool, ToolError, ToolOutcome};

/// Default per-invocation timeout.
const TOOL_TIMEOUT_SECS: u64 = 30;

type ToolMap = HashMap<String, Arc<dyn Tool>>;

/// Process-wide registry; read-mostly, copy-on-read for lookups.
#[derive(Default)]
pub struct ToolRegistry {
    local: RwLock<ToolMap>,
    remote: RwLock<HashMap<(String, String), ToolMap>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_global(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.local.write().insert(name, tool);
    }

    pub fn register_scoped(&self, device_id: &str, agent_id: &str, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.remote
            .write()
            .entry((device_id.to_string(), agent_id.to_string()))
            .or_default()
            .insert(name, tool);
    }

    /// Drop every remote tool of a device/agent pair (transport closed).
    pub fn unregister_scoped(&self, device_id: &str, agent_id: &str) {
        self.remote
            .write()
            .remove(&(device_id.to_string(), agent_id.to_string()));
    }

    /// Snapshot of the tools visible to one session. Remote tools shadow
    /// local ones on a name collision.
    pub fn tools_for(&self, device_id: &str, agent_id: &str) -> ToolMap {
        let mut merged = self.local.read().clone();
        if let Some(remote) = self
            .remote
            .read()
            .get(&(device_id.to_string(), agent_id.to_string()))
        {
            for (name, tool) in remote {
                merged.insert(name.clone(), tool.clone());
            }
        }
        merged
    }

    /// Tool specs for LLM binding.
    pub fn specs_for(&self, device_id: &str, agent_id: &str) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self
            .tools_for(device_id, agent_id)
            .values()
            .map(|t| ToolSpec {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters(),
            })
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Invoke by name with the default timeout.
    pub async fn invoke(
        &self,
        device_id: &str,
        agent_id: &str,
        name: &str,
        arguments: &str,
    ) -> Result<ToolOutcome, ToolError> {
        let tool = self
            .tools_for(device_id, agent_id)
            .get(name)
            .cloned()
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        tracing::debug!(tool = name, "Invoking tool");
        match tokio::time::timeout(
            Duration::from_secs(TOOL_TIMEOUT_SECS),
            tool.invoke(arguments),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout(name.to_string(), TOOL_TIMEOUT_SECS)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its arguments"
        }
        fn parameters(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}})
        }
        async fn invoke(&self, arguments: &str) -> Result<ToolOutcome, ToolError> {
            Ok(ToolOutcome::feedback(arguments))
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "never returns"
        }
        fn parameters(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn invoke(&self, _arguments: &str) -> Result<ToolOutcome, ToolError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_local_tool_lookup_and_invoke() {
        let registry = ToolRegistry::new();
        registry.register_global(Arc::new(EchoTool));

        let outcome = registry
            .invoke("dev-1", "agent-1", "echo", "{\"a\":1}")
            .await
            .unwrap();
        assert_eq!(outcome.payload, "{\"a\":1}");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_not_found() {
        let registry = ToolRegistry::new();
        let err = registry.invoke("dev-1", "agent-1", "nope", "{}").await;
        assert!(matches!(err, Err(ToolError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_remote_tools_scoped_to_device() {
        let registry = ToolRegistry::new();
        registry.register_scoped("dev-1", "agent-1", Arc::new(EchoTool));

        assert_eq!(registry.tools_for("dev-1", "agent-1").len(), 1);
        assert!(registry.tools_for("dev-2", "agent-1").is_empty());

        registry.unregister_scoped("dev-1", "agent-1");
        assert!(registry.tools_for("dev-1", "agent-1").is_empty());
    }

    #[tokio::test]
    async fn test_specs_sorted_by_name() {
        let registry = ToolRegistry::new();
        registry.register_global(Arc::new(EchoTool));
        registry.register_global(Arc::new(SlowTool));

        let specs = registry.specs_for("dev-1", "agent-1");
        let names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["echo", "slow"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invoke_times_out() {
        let registry = ToolRegistry::new();
        registry.register_global(Arc::new(SlowTool));

        let err = registry.invoke("dev-1", "agent-1", "slow", "{}").await;
        assert!(matches!(err, Err(ToolError::Timeout(_, _))));
    }
}
