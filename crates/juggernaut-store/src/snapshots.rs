use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::instrument;

use juggernaut_core::ids::SessionId;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::RowReader;

/// Final budget and guardrail state of a session, in serialized form.
#[derive(Clone, Debug)]
pub struct SnapshotRow<B, G> {
    pub session_id: SessionId,
    pub budget: B,
    pub guardrails: G,
    pub created_at: String,
}

pub struct SnapshotRepo {
    db: Database,
}

impl SnapshotRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace the snapshot for a session.
    #[instrument(skip(self, budget, guardrails), fields(session_id = %session_id))]
    pub fn save<B: Serialize, G: Serialize>(
        &self,
        session_id: &SessionId,
        budget: &B,
        guardrails: &G,
    ) -> Result<(), StoreError> {
        let budget = serde_json::to_string(budget)?;
        let guardrails = serde_json::to_string(guardrails)?;
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO session_snapshots (session_id, budget, guardrails, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(session_id) DO UPDATE SET
                    budget = excluded.budget,
                    guardrails = excluded.guardrails,
                    created_at = excluded.created_at",
                rusqlite::params![session_id.as_str(), budget, guardrails, now],
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn load<B: DeserializeOwned, G: DeserializeOwned>(
        &self,
        session_id: &SessionId,
    ) -> Result<SnapshotRow<B, G>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id, budget, guardrails, created_at
                 FROM session_snapshots WHERE session_id = ?1",
            )?;
            let mut rows = stmt.query([session_id.as_str()])?;
            let Some(row) = rows.next()? else {
                return Err(StoreError::NotFound(format!("snapshot for session {session_id}")));
            };
            let r = RowReader::new(row, "session_snapshots");
            Ok(SnapshotRow {
                session_id: SessionId::from_raw(r.get::<String>(0, "session_id")?),
                budget: r.json(1, "budget")?,
                guardrails: r.json(2, "guardrails")?,
                created_at: r.get(3, "created_at")?,
            })
        })
    }
}
