use chrono::Utc;
use serde::Serialize;
use tracing::instrument;

use juggernaut_core::ids::SessionId;
use juggernaut_core::messages::Message;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::RowReader;

/// One persisted conversation entry. `content` is the flat log text; `message`
/// is the full role-tagged message it was derived from.
#[derive(Clone, Debug, Serialize)]
pub struct MessageRow {
    pub session_id: SessionId,
    pub sequence: i64,
    pub role: String,
    pub content: String,
    pub tool_call_id: Option<String>,
    pub message: Message,
    pub timestamp: String,
}

/// Append-only message log. There is no update or delete.
pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append at the next sequence number and return it.
    #[instrument(skip(self, message), fields(session_id = %session_id, role = message.role()))]
    pub fn append(&self, session_id: &SessionId, message: &Message) -> Result<i64, StoreError> {
        let payload = serde_json::to_string(message)?;
        let now = Utc::now().to_rfc3339();

        self.db.with_tx(|tx| {
            let sequence: i64 = tx.query_row(
                "SELECT COALESCE(MAX(sequence), -1) + 1 FROM messages WHERE session_id = ?1",
                [session_id.as_str()],
                |row| row.get(0),
            )?;
            tx.execute(
                "INSERT INTO messages (session_id, sequence, role, content, tool_call_id, payload, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    session_id.as_str(),
                    sequence,
                    message.role(),
                    message.log_content(),
                    message.tool_call_id().map(|id| id.as_str()),
                    payload,
                    now,
                ],
            )?;
            Ok(sequence)
        })
    }

    /// Messages in append order.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn list(&self, session_id: &SessionId) -> Result<Vec<MessageRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id, sequence, role, content, tool_call_id, payload, timestamp
                 FROM messages WHERE session_id = ?1 ORDER BY sequence ASC",
            )?;
            let mut rows = stmt.query([session_id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_message(row)?);
            }
            Ok(results)
        })
    }

    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn count(&self, session_id: &SessionId) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE session_id = ?1",
                [session_id.as_str()],
                |row| row.get(0),
            )?)
        })
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<MessageRow, StoreError> {
    let r = RowReader::new(row, "messages");
    Ok(MessageRow {
        session_id: SessionId::from_raw(r.get::<String>(0, "session_id")?),
        sequence: r.get(1, "sequence")?,
        role: r.get(2, "role")?,
        content: r.get(3, "content")?,
        tool_call_id: r.opt(4, "tool_call_id")?,
        message: r.json(5, "payload")?,
        timestamp: r.get(6, "timestamp")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::SessionRepo;
    use juggernaut_core::ids::ToolCallId;
    use juggernaut_core::messages::{AssistantMessage, ToolCallBlock};
    use juggernaut_core::mode::AgentMode;
    use serde_json::json;

    fn setup() -> (MessageRepo, SessionId) {
        let db = Database::in_memory().unwrap();
        let id = SessionId::new();
        SessionRepo::new(db.clone())
            .create(&id, AgentMode::Normal, "m", "p")
            .unwrap();
        (MessageRepo::new(db), id)
    }

    #[test]
    fn append_assigns_increasing_sequence() {
        let (repo, id) = setup();
        assert_eq!(repo.append(&id, &Message::system("sys")).unwrap(), 0);
        assert_eq!(repo.append(&id, &Message::user("hello")).unwrap(), 1);
        assert_eq!(repo.append(&id, &Message::assistant_text("hi")).unwrap(), 2);
        assert_eq!(repo.count(&id).unwrap(), 3);
    }

    #[test]
    fn list_preserves_order_and_payload() {
        let (repo, id) = setup();
        let call_id = ToolCallId::new();
        let assistant = Message::Assistant(AssistantMessage {
            text: String::new(),
            tool_calls: vec![ToolCallBlock {
                id: call_id.clone(),
                name: "sql_query".into(),
                arguments: json!({"query": "select count(*) from users"}),
            }],
            usage: None,
        });
        repo.append(&id, &Message::user("count users")).unwrap();
        repo.append(&id, &assistant).unwrap();
        repo.append(&id, &Message::tool_result(call_id.clone(), "sql_query", "42")).unwrap();

        let rows = repo.list(&id).unwrap();
        let roles: Vec<&str> = rows.iter().map(|r| r.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "assistant", "tool"]);
        assert!(rows[1].content.contains("sql_query"));
        assert_eq!(rows[1].message, assistant);
        assert_eq!(rows[2].tool_call_id.as_deref(), Some(call_id.as_str()));
        assert_eq!(rows[2].content, "42");
    }

    #[test]
    fn sessions_have_independent_sequences() {
        let db = Database::in_memory().unwrap();
        let sessions = SessionRepo::new(db.clone());
        let a = SessionId::new();
        let b = SessionId::new();
        sessions.create(&a, AgentMode::Normal, "m", "a").unwrap();
        sessions.create(&b, AgentMode::Normal, "m", "b").unwrap();

        let repo = MessageRepo::new(db);
        repo.append(&a, &Message::user("1")).unwrap();
        repo.append(&a, &Message::user("2")).unwrap();
        assert_eq!(repo.append(&b, &Message::user("1")).unwrap(), 0);
        assert!(repo.list(&SessionId::new()).unwrap().is_empty());
    }

    #[test]
    fn append_to_unknown_session_violates_foreign_key() {
        let repo = MessageRepo::new(Database::in_memory().unwrap());
        let err = repo.append(&SessionId::new(), &Message::user("x")).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }
}
