use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use juggernaut_core::requests::{ToolRequest, SLACK_POST};
use juggernaut_core::tools::{Tool, ToolContext, ToolError, ToolOutcome};

use super::remote::{forward, ToolExecutor};

const MAX_TEXT_CHARS: usize = 4_000;

pub struct SlackPostTool {
    executor: Arc<dyn ToolExecutor>,
}

impl SlackPostTool {
    pub fn new(executor: Arc<dyn ToolExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Tool for SlackPostTool {
    fn name(&self) -> &str {
        SLACK_POST
    }

    fn description(&self) -> &str {
        "Post a message to a Slack channel"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["channel", "text"],
            "properties": {
                "channel": {"type": "string", "description": "Channel name such as #ops"},
                "text": {"type": "string", "description": "Message body, Slack mrkdwn"}
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutcome, ToolError> {
        let request = ToolRequest::parse(SLACK_POST, &args)?;
        if let ToolRequest::SlackPost(post) = &request {
            if post.text.chars().count() > MAX_TEXT_CHARS {
                return Err(ToolError::InvalidArguments(format!(
                    "text exceeds {MAX_TEXT_CHARS} characters"
                )));
            }
        }
        forward(self.executor.as_ref(), request, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::remote::testing::ScriptedExecutor;
    use crate::tools::testing::test_ctx;

    #[tokio::test]
    async fn posts_through_executor() {
        let executor = Arc::new(ScriptedExecutor::new(vec![Ok(ToolOutcome::success(json!({"ok": true})))]));
        let tool = SlackPostTool::new(executor.clone());
        let outcome = tool
            .execute(json!({"channel": "#ops", "text": "deploy done"}), &test_ctx())
            .await
            .unwrap();
        assert!(outcome.is_success());
        assert_eq!(executor.requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn oversized_text_rejected() {
        let tool = SlackPostTool::new(Arc::new(ScriptedExecutor::default()));
        let err = tool
            .execute(json!({"channel": "#ops", "text": "x".repeat(MAX_TEXT_CHARS + 1)}), &test_ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn cancelled_session_short_circuits() {
        let tool = SlackPostTool::new(Arc::new(ScriptedExecutor::default()));
        let ctx = test_ctx();
        ctx.abort_signal.cancel();
        let err = tool
            .execute(json!({"channel": "#ops", "text": "hi"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Cancelled));
    }
}
