/// Failures outside a session's own stop reasons. A session that ends badly still
/// produces a [`SessionOutcome`](crate::SessionOutcome); these are the cases where it could not.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The stop notification could not be delivered.
    #[error("notification failed: {0}")]
    Notify(String),

    /// The session task panicked or was dropped before reporting an outcome.
    #[error("session task failed: {0}")]
    Internal(String),
}
