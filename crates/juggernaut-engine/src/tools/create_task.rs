use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use juggernaut_core::requests::{ToolRequest, CREATE_TASK};
use juggernaut_core::tools::{Tool, ToolContext, ToolError, ToolOutcome};
use juggernaut_store::NewFallbackTask;

use crate::fallback::FallbackSink;

/// Error code on tasks the model opened itself.
pub const MODEL_REQUESTED: &str = "MODEL_REQUESTED";

/// Records a follow-up task for a human. Runs locally.
pub struct CreateTaskTool {
    sink: Arc<dyn FallbackSink>,
}

impl CreateTaskTool {
    pub fn new(sink: Arc<dyn FallbackSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl Tool for CreateTaskTool {
    fn name(&self) -> &str {
        CREATE_TASK
    }

    fn description(&self) -> &str {
        "Create a follow-up task for a human operator when something cannot be finished automatically"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["title", "description"],
            "properties": {
                "title": {"type": "string"},
                "description": {"type": "string"},
                "priority": {"type": "string", "enum": ["low", "medium", "high", "critical"]}
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutcome, ToolError> {
        let ToolRequest::CreateTask(task) = ToolRequest::parse(CREATE_TASK, &args)? else {
            return Err(ToolError::InvalidArguments("expected create_task arguments".into()));
        };
        let row = self
            .sink
            .record(NewFallbackTask {
                session_id: ctx.session_id.clone(),
                tool_name: CREATE_TASK.to_string(),
                arguments: args,
                error: task.description,
                error_code: MODEL_REQUESTED.to_string(),
                title: task.title,
                priority: task.priority.unwrap_or_default(),
            })
            .map_err(|e| ToolError::ExecutionFailed(format!("failed to record task: {e}")))?;

        info!(task_id = %row.id, session_id = %ctx.session_id, "follow-up task created");
        Ok(ToolOutcome::success(json!({
            "task_id": row.id,
            "status": row.status,
            "priority": row.task.priority,
        })))
    }
}
