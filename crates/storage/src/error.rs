use uuid::Uuid;

/// All errors that can be returned by a ParafStorage implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Optimistic concurrency control conflict -- another transaction
    /// modified the letter concurrently. The expected version was not found.
    #[error("concurrent conflict on letter {letter_id}: expected version {expected_version}")]
    ConcurrentConflict {
        letter_id: Uuid,
        expected_version: i64,
    },

    /// A staged rule's amount range overlaps a rule committed after this
    /// snapshot's reads. The losing save must be retried against the
    /// current rule set.
    #[error("rule {rule_id} amount range collides with a concurrently saved rule")]
    RuleRangeConflict { rule_id: Uuid },

    /// No letter with the given id.
    #[error("letter not found: {letter_id}")]
    LetterNotFound { letter_id: Uuid },

    /// No rule with the given id.
    #[error("rule not found: {rule_id}")]
    RuleNotFound { rule_id: Uuid },

    /// No role with the given id.
    #[error("role not found: {role_id}")]
    RoleNotFound { role_id: Uuid },

    /// No unit with the given id.
    #[error("unit not found: {unit_id}")]
    UnitNotFound { unit_id: Uuid },

    /// No user with the given id.
    #[error("user not found: {user_id}")]
    UserNotFound { user_id: Uuid },

    /// An insert collided with an existing record of the same kind and id.
    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: &'static str, id: Uuid },

    /// A backend-specific storage error (DB connection, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}
