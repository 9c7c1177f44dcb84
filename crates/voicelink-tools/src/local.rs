//! Session-bound local tools
//!
//! These act on the owning session through the `SessionOps` trait, which
//! breaks the dependency cycle between the tools and the session manager.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{Tool, ToolError, ToolOutcome};

/// Operations a local tool may perform on its session.
#[async_trait]
pub trait SessionOps: Send + Sync {
    /// Tear the session down after the current run delivers its result.
    async fn close_chat(&self) -> Result<(), ToolError>;

    /// Wipe the conversation history of the session.
    async fn clear_history(&self) -> Result<(), ToolError>;
}

/// `close_chat`: ends the conversation on user request.
pub struct CloseChatTool {
    ops: Arc<dyn SessionOps>,
}

impl CloseChatTool {
    pub fn new(ops: Arc<dyn SessionOps>) -> Self {
        Self { ops }
    }
}

#[async_trait]
impl Tool for CloseChatTool {
    fn name(&self) -> &str {
        "close_chat"
    }

    fn description(&self) -> &str {
        "结束本次对话并关闭连接。当用户明确表示再见或要求结束对话时调用。"
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn invoke(&self, _arguments: &str) -> Result<ToolOutcome, ToolError> {
        self.ops.close_chat().await?;
        // The device needs no further LLM turn; the goodbye already played.
        Ok(ToolOutcome::terminal("对话已结束"))
    }
}

/// `clear_history`: resets the conversation memory.
pub struct ClearHistoryTool {
    ops: Arc<dyn SessionOps>,
}

impl ClearHistoryTool {
    pub fn new(ops: Arc<dyn SessionOps>) -> Self {
        Self { ops }
    }
}

#[async_trait]
impl Tool for ClearHistoryTool {
    fn name(&self) -> &str {
        "clear_history"
    }

    fn description(&self) -> &str {
        "清空当前会话的历史对话记录。"
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn invoke(&self, _arguments: &str) -> Result<ToolOutcome, ToolError> {
        self.ops.clear_history().await?;
        Ok(ToolOutcome::feedback(
            serde_json::json!({"success": true, "message": "历史对话已清空"}).to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct RecordingOps {
        closed: AtomicBool,
        cleared: AtomicBool,
    }

    #[async_trait]
    impl SessionOps for RecordingOps {
        async fn close_chat(&self) -> Result<(), ToolError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn clear_history(&self) -> Result<(), ToolError> {
            self.cleared.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_close_chat_is_terminal() {
        let ops = Arc::new(RecordingOps::default());
        let tool = CloseChatTool::new(ops.clone());

        let outcome = tool.invoke("{}").await.unwrap();
        assert!(outcome.is_terminal());
        assert!(ops.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_clear_history_feeds_back() {
        let ops = Arc::new(RecordingOps::default());
        let tool = ClearHistoryTool::new(ops.clone());

        let outcome = tool.invoke("{}").await.unwrap();
        assert!(!outcome.is_terminal());
        assert!(ops.cleared.load(Ordering::SeqCst));
    }
}
