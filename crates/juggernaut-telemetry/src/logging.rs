use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{span, Level};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    level TEXT NOT NULL,
    target TEXT NOT NULL,
    message TEXT NOT NULL,
    fields TEXT,
    session_id TEXT,
    tool_name TEXT
);
CREATE INDEX IF NOT EXISTS idx_logs_level ON logs(level);
CREATE INDEX IF NOT EXISTS idx_logs_session ON logs(session_id);
CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs(timestamp);
";

/// One persisted warn+ event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: i64,
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    pub fields: Option<String>,
    pub session_id: Option<String>,
    pub tool_name: Option<String>,
}

/// Filters for [`SqliteLogSink::query`]. Unset filters match everything.
#[derive(Clone, Debug, Default)]
pub struct LogQuery {
    pub level: Option<String>,
    pub session_id: Option<String>,
    /// RFC 3339 lower bound on `timestamp`.
    pub since: Option<String>,
    pub limit: Option<u32>,
}

const DEFAULT_QUERY_LIMIT: u32 = 100;

const SELECT_LOGS: &str = "
SELECT id, timestamp, level, target, message, fields, session_id, tool_name
FROM logs
WHERE (?1 IS NULL OR level = ?1)
  AND (?2 IS NULL OR session_id = ?2)
  AND (?3 IS NULL OR timestamp >= ?3)
ORDER BY id DESC
LIMIT ?4";

/// Persists warn+ events to a `logs` table.
pub struct SqliteLogSink {
    conn: Mutex<Connection>,
}

impl SqliteLogSink {
    pub fn new(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            // Connection::open reports the real error if this fails.
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self, rusqlite::Error> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, rusqlite::Error> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Write errors are dropped; logging must never fail the caller.
    fn write(&self, record: &LogRecord) {
        let _ = self.conn.lock().execute(
            "INSERT INTO logs (timestamp, level, target, message, fields, session_id, tool_name)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                record.timestamp,
                record.level,
                record.target,
                record.message,
                record.fields,
                record.session_id,
                record.tool_name,
            ],
        );
    }

    /// Matching records, newest first.
    pub fn query(&self, q: &LogQuery) -> Result<Vec<LogRecord>, rusqlite::Error> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(SELECT_LOGS)?;
        let level = q.level.as_deref().map(str::to_uppercase);
        let rows = stmt.query_map(
            rusqlite::params![
                level,
                q.session_id,
                q.since,
                q.limit.unwrap_or(DEFAULT_QUERY_LIMIT)
            ],
            |row| {
                Ok(LogRecord {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                    level: row.get(2)?,
                    target: row.get(3)?,
                    message: row.get(4)?,
                    fields: row.get(5)?,
                    session_id: row.get(6)?,
                    tool_name: row.get(7)?,
                })
            },
        )?;
        rows.collect()
    }

    pub fn count(&self) -> Result<i64, rusqlite::Error> {
        self.conn
            .lock()
            .query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))
    }
}

/// Writes every WARN and ERROR event to a [`SqliteLogSink`].
pub struct SqliteLogLayer {
    sink: Arc<SqliteLogSink>,
}

impl SqliteLogLayer {
    pub fn new(sink: Arc<SqliteLogSink>) -> Self {
        Self { sink }
    }
}

/// Keys used to find every log line for one session or tool.
#[derive(Clone, Default)]
struct Correlation {
    session_id: Option<String>,
    tool_name: Option<String>,
}

impl Correlation {
    fn is_empty(&self) -> bool {
        self.session_id.is_none() && self.tool_name.is_none()
    }

    fn is_complete(&self) -> bool {
        self.session_id.is_some() && self.tool_name.is_some()
    }

    /// Fill unset keys from `outer`. Inner values win.
    fn inherit(&mut self, outer: &Correlation) {
        if self.session_id.is_none() {
            self.session_id.clone_from(&outer.session_id);
        }
        if self.tool_name.is_none() {
            self.tool_name.clone_from(&outer.tool_name);
        }
    }
}

#[derive(Default)]
struct Captured {
    message: Option<String>,
    keys: Correlation,
    extra: Map<String, Value>,
}

impl Captured {
    fn text(&mut self, name: &str, value: String) {
        match name {
            "message" => self.message = Some(value),
            "session_id" => self.keys.session_id = Some(value),
            "tool_name" | "tool" => self.keys.tool_name = Some(value),
            _ => {
                self.extra.insert(name.to_owned(), Value::String(value));
            }
        }
    }

    fn extra_json(&self) -> Option<String> {
        if self.extra.is_empty() {
            return None;
        }
        serde_json::to_string(&self.extra).ok()
    }
}

impl Visit for Captured {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.text(field.name(), value.to_owned());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let rendered = format!("{value:?}");
        self.text(field.name(), rendered.trim_matches('"').to_owned());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.extra.insert(field.name().to_owned(), value.into());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.extra.insert(field.name().to_owned(), value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.extra.insert(field.name().to_owned(), value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        // NaN and infinities have no JSON form.
        if let Some(number) = serde_json::Number::from_f64(value) {
            self.extra.insert(field.name().to_owned(), Value::Number(number));
        }
    }
}

impl<S> Layer<S> for SqliteLogLayer
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut captured = Captured::default();
        attrs.record(&mut captured);
        if captured.keys.is_empty() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(captured.keys);
        }
    }

    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let meta = event.metadata();
        if *meta.level() > Level::WARN {
            return;
        }

        let mut captured = Captured::default();
        event.record(&mut captured);

        // Innermost span first.
        for span in ctx.event_scope(event).into_iter().flatten() {
            if captured.keys.is_complete() {
                break;
            }
            if let Some(outer) = span.extensions().get::<Correlation>() {
                captured.keys.inherit(outer);
            }
        }

        let fields = captured.extra_json();
        self.sink.write(&LogRecord {
            id: 0,
            timestamp: Utc::now().to_rfc3339(),
            level: meta.level().as_str().to_owned(),
            target: meta.target().to_owned(),
            message: captured.message.unwrap_or_default(),
            fields,
            session_id: captured.keys.session_id,
            tool_name: captured.keys.tool_name,
        });
    }
}
