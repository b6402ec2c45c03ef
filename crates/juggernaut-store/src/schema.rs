//! DDL, applied as ordered migrations. `PRAGMA user_version` records how many have run.

pub const PRAGMAS: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
";

/// Append only. Never edit a migration that has shipped.
pub const MIGRATIONS: &[&str] = &[
    // 1: sessions, append-only message log, final snapshots, fallback tasks
    "
    CREATE TABLE sessions (
        id TEXT PRIMARY KEY,
        mode TEXT NOT NULL,
        model TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'running',
        prompt TEXT NOT NULL,
        final_answer TEXT,
        stop_reason TEXT,
        iterations INTEGER NOT NULL DEFAULT 0,
        prompt_tokens INTEGER NOT NULL DEFAULT 0,
        completion_tokens INTEGER NOT NULL DEFAULT 0,
        cost_usd REAL NOT NULL DEFAULT 0.0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE INDEX idx_sessions_created ON sessions(created_at);

    CREATE TABLE messages (
        session_id TEXT NOT NULL REFERENCES sessions(id),
        sequence INTEGER NOT NULL,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        tool_call_id TEXT,
        payload TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        PRIMARY KEY (session_id, sequence)
    );

    CREATE TABLE session_snapshots (
        session_id TEXT PRIMARY KEY REFERENCES sessions(id),
        budget TEXT NOT NULL,
        guardrails TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE TABLE fallback_tasks (
        id TEXT PRIMARY KEY,
        session_id TEXT NOT NULL,
        tool_name TEXT NOT NULL,
        arguments TEXT NOT NULL,
        error TEXT NOT NULL,
        error_code TEXT NOT NULL,
        title TEXT NOT NULL,
        priority TEXT NOT NULL DEFAULT 'medium',
        status TEXT NOT NULL DEFAULT 'open',
        created_at TEXT NOT NULL
    );
    CREATE INDEX idx_fallback_session ON fallback_tasks(session_id);
    CREATE INDEX idx_fallback_status ON fallback_tasks(status);
    ",
];

/// Schema version of a fully migrated database.
pub fn latest_version() -> u32 {
    MIGRATIONS.len() as u32
}
