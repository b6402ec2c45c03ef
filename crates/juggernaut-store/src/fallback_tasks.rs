use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

use juggernaut_core::ids::{FallbackTaskId, SessionId};
use juggernaut_core::requests::TaskPriority;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::RowReader;

/// Error code attached to every task created for a failed tool call.
pub const TOOL_EXECUTION_ERROR: &str = "TOOL_EXECUTION_ERROR";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    Done,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Done => write!(f, "done"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "done" => Ok(Self::Done),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// Follow-up work recorded when a tool call fails, or when the model asks for one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewFallbackTask {
    pub session_id: SessionId,
    pub tool_name: String,
    pub arguments: Value,
    pub error: String,
    pub error_code: String,
    pub title: String,
    pub priority: TaskPriority,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FallbackTaskRow {
    pub id: FallbackTaskId,
    #[serde(flatten)]
    pub task: NewFallbackTask,
    pub status: TaskStatus,
    pub created_at: String,
}

const SELECT_COLUMNS: &str = "SELECT id, session_id, tool_name, arguments, error, error_code,
        title, priority, status, created_at
 FROM fallback_tasks";

pub struct FallbackTaskRepo {
    db: Database,
}

impl FallbackTaskRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, task), fields(session_id = %task.session_id, tool_name = %task.tool_name))]
    pub fn create(&self, task: &NewFallbackTask) -> Result<FallbackTaskRow, StoreError> {
        let id = FallbackTaskId::new();
        let arguments = serde_json::to_string(&task.arguments)?;
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO fallback_tasks
                    (id, session_id, tool_name, arguments, error, error_code, title, priority, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'open', ?9)",
                rusqlite::params![
                    id.as_str(),
                    task.session_id.as_str(),
                    task.tool_name,
                    arguments,
                    task.error,
                    task.error_code,
                    task.title,
                    task.priority.as_str(),
                    now,
                ],
            )?;
            Ok(FallbackTaskRow {
                id,
                task: task.clone(),
                status: TaskStatus::Open,
                created_at: now,
            })
        })
    }

    /// Creation order.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn list_for_session(&self, session_id: &SessionId) -> Result<Vec<FallbackTaskRow>, StoreError> {
        self.query(
            &format!("{SELECT_COLUMNS} WHERE session_id = ?1 ORDER BY created_at ASC, rowid ASC"),
            rusqlite::params![session_id.as_str()],
        )
    }

    #[instrument(skip(self))]
    pub fn list_open(&self, limit: u32) -> Result<Vec<FallbackTaskRow>, StoreError> {
        self.query(
            &format!("{SELECT_COLUMNS} WHERE status = 'open' ORDER BY created_at ASC, rowid ASC LIMIT ?1"),
            rusqlite::params![limit],
        )
    }

    #[instrument(skip(self), fields(task_id = %id))]
    pub fn mark_done(&self, id: &FallbackTaskId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE fallback_tasks SET status = 'done' WHERE id = ?1",
                [id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("fallback task {id}")));
            }
            Ok(())
        })
    }

    fn query(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::types::ToSql],
    ) -> Result<Vec<FallbackTaskRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let mut rows = stmt.query(params)?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_task(row)?);
            }
            Ok(results)
        })
    }
}

fn row_to_task(row: &rusqlite::Row<'_>) -> Result<FallbackTaskRow, StoreError> {
    let r = RowReader::new(row, "fallback_tasks");
    Ok(FallbackTaskRow {
        id: FallbackTaskId::from_raw(r.get::<String>(0, "id")?),
        task: NewFallbackTask {
            session_id: SessionId::from_raw(r.get::<String>(1, "session_id")?),
            tool_name: r.get(2, "tool_name")?,
            arguments: r.json(3, "arguments")?,
            error: r.get(4, "error")?,
            error_code: r.get(5, "error_code")?,
            title: r.get(6, "title")?,
            priority: r.parsed(7, "priority")?,
        },
        status: r.parsed(8, "status")?,
        created_at: r.get(9, "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(session_id: &SessionId, tool: &str) -> NewFallbackTask {
        NewFallbackTask {
            session_id: session_id.clone(),
            tool_name: tool.into(),
            arguments: json!({"query": "select 1"}),
            error: "x".into(),
            error_code: TOOL_EXECUTION_ERROR.into(),
            title: format!("Follow up on failed {tool}"),
            priority: TaskPriority::High,
        }
    }

    #[test]
    fn create_and_list_for_session() {
        let repo = FallbackTaskRepo::new(Database::in_memory().unwrap());
        let session = SessionId::new();
        let created = repo.create(&task(&session, "sql_query")).unwrap();
        repo.create(&task(&session, "slack_post")).unwrap();
        repo.create(&task(&SessionId::new(), "sql_query")).unwrap();

        assert!(created.id.as_str().starts_with("task_"));
        let rows = repo.list_for_session(&session).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].task.tool_name, "sql_query");
        assert_eq!(rows[0].task.priority, TaskPriority::High);
        assert_eq!(rows[0].task.arguments, json!({"query": "select 1"}));
        assert_eq!(rows[1].task.tool_name, "slack_post");
        assert_eq!(rows[0].status, TaskStatus::Open);
    }

    #[test]
    fn list_open_excludes_done() {
        let repo = FallbackTaskRepo::new(Database::in_memory().unwrap());
        let session = SessionId::new();
        let first = repo.create(&task(&session, "sql_query")).unwrap();
        repo.create(&task(&session, "github_get_file")).unwrap();

        repo.mark_done(&first.id).unwrap();
        let open = repo.list_open(10).unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].task.tool_name, "github_get_file");
    }

    #[test]
    fn mark_done_unknown_is_not_found() {
        let repo = FallbackTaskRepo::new(Database::in_memory().unwrap());
        let err = repo.mark_done(&FallbackTaskId::new()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn row_serializes_flat() {
        let repo = FallbackTaskRepo::new(Database::in_memory().unwrap());
        let row = repo.create(&task(&SessionId::new(), "sql_query")).unwrap();
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["error_code"], "TOOL_EXECUTION_ERROR");
        assert_eq!(json["status"], "open");
        assert_eq!(json["priority"], "high");
    }
}
