use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use juggernaut_core::ids::SessionId;
use juggernaut_core::mode::AgentMode;
use juggernaut_core::stop::StopReason;
use juggernaut_core::tokens::AccumulatedTokens;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::RowReader;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    Stopped,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "stopped" => Ok(Self::Stopped),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionRow {
    pub id: SessionId,
    pub mode: AgentMode,
    pub model: String,
    pub status: SessionStatus,
    pub prompt: String,
    pub final_answer: Option<String>,
    pub stop_reason: Option<StopReason>,
    pub iterations: u32,
    pub usage: AccumulatedTokens,
    pub created_at: String,
    pub updated_at: String,
}

/// Terminal fields written once when a session ends.
#[derive(Clone, Debug)]
pub struct SessionFinish<'a> {
    pub final_answer: Option<&'a str>,
    pub stop_reason: Option<&'a StopReason>,
    pub iterations: u32,
    pub usage: &'a AccumulatedTokens,
}

const SELECT_COLUMNS: &str = "SELECT id, mode, model, status, prompt, final_answer, stop_reason,
        iterations, prompt_tokens, completion_tokens, cost_usd, created_at, updated_at
 FROM sessions";

pub struct SessionRepo {
    db: Database,
}

impl SessionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, prompt), fields(session_id = %id, mode = %mode, model))]
    pub fn create(
        &self,
        id: &SessionId,
        mode: AgentMode,
        model: &str,
        prompt: &str,
    ) -> Result<SessionRow, StoreError> {
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, mode, model, status, prompt, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'running', ?4, ?5, ?6)",
                rusqlite::params![id.as_str(), mode.as_str(), model, prompt, now, now],
            )?;

            Ok(SessionRow {
                id: id.clone(),
                mode,
                model: model.to_string(),
                status: SessionStatus::Running,
                prompt: prompt.to_string(),
                final_answer: None,
                stop_reason: None,
                iterations: 0,
                usage: AccumulatedTokens::default(),
                created_at: now.clone(),
                updated_at: now,
            })
        })
    }

    #[instrument(skip(self), fields(session_id = %id))]
    pub fn get(&self, id: &SessionId) -> Result<SessionRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} WHERE id = ?1"))?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_session(row),
                None => Err(StoreError::NotFound(format!("session {id}"))),
            }
        })
    }

    /// Record the outcome. A session with a stop reason is `stopped`, otherwise `completed`.
    #[instrument(skip(self, finish), fields(session_id = %id, iterations = finish.iterations))]
    pub fn finish(&self, id: &SessionId, finish: SessionFinish<'_>) -> Result<(), StoreError> {
        let status = if finish.stop_reason.is_some() {
            SessionStatus::Stopped
        } else {
            SessionStatus::Completed
        };
        let stop_reason = finish.stop_reason.map(serde_json::to_string).transpose()?;

        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            let changed = conn.execute(
                "UPDATE sessions SET
                    status = ?1,
                    final_answer = ?2,
                    stop_reason = ?3,
                    iterations = ?4,
                    prompt_tokens = ?5,
                    completion_tokens = ?6,
                    cost_usd = ?7,
                    updated_at = ?8
                 WHERE id = ?9",
                rusqlite::params![
                    status.to_string(),
                    finish.final_answer,
                    stop_reason,
                    finish.iterations,
                    finish.usage.prompt_tokens as i64,
                    finish.usage.completion_tokens as i64,
                    finish.usage.cost_usd,
                    now,
                    id.as_str(),
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("session {id}")));
            }
            Ok(())
        })
    }

    /// Newest first.
    #[instrument(skip(self))]
    pub fn list_recent(&self, limit: u32) -> Result<Vec<SessionRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_COLUMNS} ORDER BY created_at DESC, rowid DESC LIMIT ?1"
            ))?;
            let mut rows = stmt.query([limit])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_session(row)?);
            }
            Ok(results)
        })
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> Result<SessionRow, StoreError> {
    let r = RowReader::new(row, "sessions");
    Ok(SessionRow {
        id: SessionId::from_raw(r.get::<String>(0, "id")?),
        mode: r.parsed(1, "mode")?,
        model: r.get(2, "model")?,
        status: r.parsed(3, "status")?,
        prompt: r.get(4, "prompt")?,
        final_answer: r.opt(5, "final_answer")?,
        stop_reason: r.opt_json(6, "stop_reason")?,
        iterations: r.get(7, "iterations")?,
        usage: AccumulatedTokens {
            prompt_tokens: r.count(8, "prompt_tokens")?,
            completion_tokens: r.count(9, "completion_tokens")?,
            cost_usd: r.get(10, "cost_usd")?,
            llm_calls: 0,
        },
        created_at: r.get(11, "created_at")?,
        updated_at: r.get(12, "updated_at")?,
    })
}
