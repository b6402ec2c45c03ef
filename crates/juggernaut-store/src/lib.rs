pub mod database;
pub mod error;
pub mod fallback_tasks;
pub mod messages;
pub mod row_helpers;
pub mod schema;
pub mod sessions;
pub mod snapshots;

pub use database::Database;
pub use error::StoreError;
pub use fallback_tasks::{FallbackTaskRepo, FallbackTaskRow, NewFallbackTask, TaskStatus};
pub use messages::{MessageRepo, MessageRow};
pub use sessions::{SessionFinish, SessionRepo, SessionRow, SessionStatus};
pub use snapshots::{SnapshotRepo, SnapshotRow};
