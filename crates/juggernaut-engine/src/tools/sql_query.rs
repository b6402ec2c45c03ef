use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use juggernaut_core::requests::{ToolRequest, SQL_QUERY};
use juggernaut_core::tools::{Tool, ToolContext, ToolError, ToolOutcome};

use super::remote::{forward, ToolExecutor};

const DEFAULT_MAX_ROWS: u32 = 200;
const MAX_ROWS_LIMIT: u32 = 5_000;

const READ_ONLY_LEADS: &[&str] = &["select", "with", "explain", "show"];
const WRITE_KEYWORDS: &[&str] = &[
    "insert", "update", "delete", "drop", "alter", "truncate", "create", "grant", "revoke",
    "merge", "copy", "vacuum",
];

pub struct SqlQueryTool {
    executor: Arc<dyn ToolExecutor>,
}

impl SqlQueryTool {
    pub fn new(executor: Arc<dyn ToolExecutor>) -> Self {
        Self { executor }
    }
}

/// Reject anything but a single read-only statement.
pub fn check_read_only(query: &str) -> Result<(), ToolError> {
    let body = query.trim().trim_end_matches(';').trim();
    if body.contains(';') {
        return Err(ToolError::InvalidArguments(
            "sql_query accepts a single statement".into(),
        ));
    }
    let lower = body.to_lowercase();
    let mut words = lower
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty());
    match words.next() {
        Some(lead) if READ_ONLY_LEADS.contains(&lead) => {}
        Some(lead) => {
            return Err(ToolError::InvalidArguments(format!(
                "sql_query is read-only; statement starts with {lead:?}"
            )))
        }
        None => return Err(ToolError::InvalidArguments("query must not be empty".into())),
    }
    if let Some(word) = words.find(|w| WRITE_KEYWORDS.contains(w)) {
        return Err(ToolError::InvalidArguments(format!(
            "sql_query is read-only; found {word:?}"
        )));
    }
    Ok(())
}

#[async_trait]
impl Tool for SqlQueryTool {
    fn name(&self) -> &str {
        SQL_QUERY
    }

    fn description(&self) -> &str {
        "Run a read-only SQL query against the operational database and return the rows as JSON"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "required": ["query"],
            "properties": {
                "query": {
                    "type": "string",
                    "description": "A single SELECT (or WITH ... SELECT) statement"
                },
                "max_rows": {
                    "type": "integer",
                    "description": "Row limit, default 200"
                }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutcome, ToolError> {
        let mut request = ToolRequest::parse(SQL_QUERY, &args)?;
        if let ToolRequest::SqlQuery(sql) = &mut request {
            check_read_only(&sql.query)?;
            sql.max_rows = Some(sql.max_rows.unwrap_or(DEFAULT_MAX_ROWS).min(MAX_ROWS_LIMIT));
        }
        forward(self.executor.as_ref(), request, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::remote::testing::ScriptedExecutor;
    use crate::tools::testing::test_ctx;
    use juggernaut_core::requests::SqlQueryArgs;
    use serde_json::json;

    #[test]
    fn read_only_accepts_queries() {
        assert!(check_read_only("SELECT * FROM orders").is_ok());
        assert!(check_read_only("  with t as (select 1) select * from t;").is_ok());
        assert!(check_read_only("select created_at, updated_by from users").is_ok());
    }

    #[test]
    fn read_only_rejects_writes() {
        assert!(check_read_only("DELETE FROM orders").is_err());
        assert!(check_read_only("select 1; drop table orders").is_err());
        assert!(check_read_only("with x as (delete from t returning *) select * from x").is_err());
        assert!(check_read_only("").is_err());
    }

    #[tokio::test]
    async fn forwards_with_default_row_limit() {
        let executor = Arc::new(ScriptedExecutor::new(vec![Ok(ToolOutcome::success(json!([{"n": 41}])))]));
        let tool = SqlQueryTool::new(executor.clone());
        let outcome = tool
            .execute(json!({"query": "select count(*) as n from orders"}), &test_ctx())
            .await
            .unwrap();
        assert!(outcome.is_success());
        assert_eq!(
            executor.requests.lock()[0],
            ToolRequest::SqlQuery(SqlQueryArgs {
                query: "select count(*) as n from orders".into(),
                max_rows: Some(DEFAULT_MAX_ROWS),
            })
        );
    }

    #[tokio::test]
    async fn write_never_reaches_executor() {
        let executor = Arc::new(ScriptedExecutor::default());
        let tool = SqlQueryTool::new(executor.clone());
        let err = tool
            .execute(json!({"query": "update orders set paid = true"}), &test_ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
        assert!(executor.requests.lock().is_empty());
    }
}
