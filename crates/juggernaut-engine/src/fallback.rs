//! Follow-up records for failed tool calls.

use parking_lot::Mutex;

use juggernaut_core::ids::{FallbackTaskId, SessionId};
use juggernaut_core::requests::{TaskPriority, FALLBACK_TOOL_NAME};
use juggernaut_core::tools::ToolCallRecord;
use juggernaut_store::fallback_tasks::TOOL_EXECUTION_ERROR;
use juggernaut_store::{FallbackTaskRepo, FallbackTaskRow, NewFallbackTask, StoreError, TaskStatus};

/// Destination for follow-up tasks. Writes are synchronous and short.
pub trait FallbackSink: Send + Sync {
    fn record(&self, task: NewFallbackTask) -> Result<FallbackTaskRow, StoreError>;
    fn list_for_session(&self, session_id: &SessionId) -> Result<Vec<FallbackTaskRow>, StoreError>;
}

pub struct StoreFallbackSink {
    repo: FallbackTaskRepo,
}

impl StoreFallbackSink {
    pub fn new(repo: FallbackTaskRepo) -> Self {
        Self { repo }
    }
}

impl FallbackSink for StoreFallbackSink {
    fn record(&self, task: NewFallbackTask) -> Result<FallbackTaskRow, StoreError> {
        self.repo.create(&task)
    }

    fn list_for_session(&self, session_id: &SessionId) -> Result<Vec<FallbackTaskRow>, StoreError> {
        self.repo.list_for_session(session_id)
    }
}

/// In-process sink for tests and store-less runs.
#[derive(Default)]
pub struct MemoryFallbackSink {
    tasks: Mutex<Vec<FallbackTaskRow>>,
}

impl MemoryFallbackSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tasks(&self) -> Vec<FallbackTaskRow> {
        self.tasks.lock().clone()
    }
}

impl FallbackSink for MemoryFallbackSink {
    fn record(&self, task: NewFallbackTask) -> Result<FallbackTaskRow, StoreError> {
        let row = FallbackTaskRow {
            id: FallbackTaskId::new(),
            task,
            status: TaskStatus::Open,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        self.tasks.lock().push(row.clone());
        Ok(row)
    }

    fn list_for_session(&self, session_id: &SessionId) -> Result<Vec<FallbackTaskRow>, StoreError> {
        Ok(self
            .tasks
            .lock()
            .iter()
            .filter(|t| &t.task.session_id == session_id)
            .cloned()
            .collect())
    }
}

/// The follow-up owed for a finished call, if any.
///
/// Successful calls and failures of the task-creation tool itself produce none.
pub fn fallback_task_for(session_id: &SessionId, record: &ToolCallRecord) -> Option<NewFallbackTask> {
    if record.success || record.tool_name == FALLBACK_TOOL_NAME {
        return None;
    }
    let error = record.outcome.error().unwrap_or("unknown error").to_string();
    Some(NewFallbackTask {
        session_id: session_id.clone(),
        tool_name: record.tool_name.clone(),
        arguments: record.arguments.clone(),
        title: format!("Follow up on failed {} call", record.tool_name),
        error,
        error_code: TOOL_EXECUTION_ERROR.to_string(),
        priority: TaskPriority::Medium,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use juggernaut_core::ids::ToolCallId;
    use juggernaut_core::tools::ToolOutcome;
    use juggernaut_store::Database;
    use serde_json::json;
    use std::time::Duration;

    fn record(name: &str, outcome: ToolOutcome) -> ToolCallRecord {
        ToolCallRecord {
            tool_call_id: ToolCallId::new(),
            tool_name: name.into(),
            arguments: json!({"query": "select 1"}),
            success: outcome.is_success(),
            outcome,
            call_key: String::new(),
            failure_fingerprint: None,
            duration: Duration::ZERO,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn failure_produces_task() {
        let sid = SessionId::new();
        let task = fallback_task_for(&sid, &record("sql_query", ToolOutcome::failure("x"))).unwrap();
        assert_eq!(task.error, "x");
        assert_eq!(task.error_code, TOOL_EXECUTION_ERROR);
        assert_eq!(task.tool_name, "sql_query");
        assert_eq!(task.arguments, json!({"query": "select 1"}));
    }

    #[test]
    fn success_and_create_task_failures_produce_none() {
        let sid = SessionId::new();
        assert!(fallback_task_for(&sid, &record("sql_query", ToolOutcome::success(1))).is_none());
        assert!(fallback_task_for(&sid, &record(FALLBACK_TOOL_NAME, ToolOutcome::failure("x"))).is_none());
    }

    #[test]
    fn memory_sink_filters_by_session() {
        let sink = MemoryFallbackSink::new();
        let a = SessionId::new();
        let b = SessionId::new();
        for sid in [&a, &a, &b] {
            let task = fallback_task_for(sid, &record("slack_post", ToolOutcome::failure("x"))).unwrap();
            sink.record(task).unwrap();
        }
        assert_eq!(sink.list_for_session(&a).unwrap().len(), 2);
        assert_eq!(sink.tasks().len(), 3);
    }

    #[test]
    fn store_sink_persists() {
        let db = Database::in_memory().unwrap();
        let sink = StoreFallbackSink::new(FallbackTaskRepo::new(db));
        let sid = SessionId::new();
        let task = fallback_task_for(&sid, &record("sql_query", ToolOutcome::failure("boom"))).unwrap();
        let row = sink.record(task).unwrap();
        assert_eq!(row.status, TaskStatus::Open);
        let listed = sink.list_for_session(&sid).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].task.error, "boom");
    }
}
