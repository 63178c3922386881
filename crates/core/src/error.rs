//! Engine error type and storage-to-engine error mapping.

use std::fmt;

use paraf_storage::StorageError;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

/// One field-level validation problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldIssue {
    pub field: String,
    pub message: String,
}

impl FieldIssue {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// All errors the domain engine can return.
///
/// Every mutating operation either commits fully or surfaces one of these;
/// nothing is swallowed. Storage errors cross into this type at the
/// executor boundary via [`storage_err`].
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Malformed input: bad rule ranges or steps, bad letter fields, or a
    /// missing required comment.
    Validation(Vec<FieldIssue>),
    /// More than one rule's amount range contains the nominal.
    AmbiguousRule {
        nominal: Decimal,
        rule_names: Vec<String>,
    },
    /// No rule's amount range contains the nominal.
    NoMatchingRule { nominal: Decimal },
    /// The actor's role does not match the role required to act.
    UnauthorizedActor { reason: String },
    /// The letter is not in a state that admits the attempted operation.
    InvalidState { reason: String },
    /// A referenced rule, letter, role, unit, or user does not exist.
    NotFound { kind: &'static str, id: Uuid },
    /// Lost a concurrency race: a letter OCC update or a rule-range save
    /// that another transaction beat to commit.
    Conflict { id: Uuid },
    /// The storage backend failed.
    Storage(String),
}

impl EngineError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        EngineError::Validation(vec![FieldIssue::new(field, message)])
    }

    /// Stable machine-readable code, used by the HTTP error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "VALIDATION_ERROR",
            EngineError::AmbiguousRule { .. } => "AMBIGUOUS_RULE",
            EngineError::NoMatchingRule { .. } => "NO_MATCHING_RULE",
            EngineError::UnauthorizedActor { .. } => "UNAUTHORIZED_ACTOR",
            EngineError::InvalidState { .. } => "INVALID_STATE",
            EngineError::NotFound { .. } => "NOT_FOUND",
            EngineError::Conflict { .. } => "CONFLICT",
            EngineError::Storage(_) => "STORAGE_ERROR",
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Validation(issues) => {
                write!(f, "validation failed:")?;
                for issue in issues {
                    write!(f, " [{}: {}]", issue.field, issue.message)?;
                }
                Ok(())
            }
            EngineError::AmbiguousRule {
                nominal,
                rule_names,
            } => write!(
                f,
                "amount {nominal} is covered by more than one rule: {}",
                rule_names.join(", ")
            ),
            EngineError::NoMatchingRule { nominal } => {
                write!(f, "no approval rule covers amount {nominal}")
            }
            EngineError::UnauthorizedActor { reason } => {
                write!(f, "actor not authorized: {reason}")
            }
            EngineError::InvalidState { reason } => write!(f, "invalid state: {reason}"),
            EngineError::NotFound { kind, id } => write!(f, "{kind} not found: {id}"),
            EngineError::Conflict { id } => {
                write!(f, "concurrent update on {id}, retry")
            }
            EngineError::Storage(msg) => write!(f, "storage error: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

/// Map a storage error into the engine taxonomy.
///
/// `ConcurrentConflict` and `RuleRangeConflict` become `Conflict` (the
/// caller lost a commit race and may retry); the per-kind not-found
/// variants collapse into `NotFound`; everything else is a backend
/// failure.
pub fn storage_err(e: StorageError) -> EngineError {
    match e {
        StorageError::ConcurrentConflict { letter_id, .. } => {
            EngineError::Conflict { id: letter_id }
        }
        StorageError::RuleRangeConflict { rule_id } => EngineError::Conflict { id: rule_id },
        StorageError::LetterNotFound { letter_id } => EngineError::NotFound {
            kind: "letter",
            id: letter_id,
        },
        StorageError::RuleNotFound { rule_id } => EngineError::NotFound {
            kind: "rule",
            id: rule_id,
        },
        StorageError::RoleNotFound { role_id } => EngineError::NotFound {
            kind: "role",
            id: role_id,
        },
        StorageError::UnitNotFound { unit_id } => EngineError::NotFound {
            kind: "unit",
            id: unit_id,
        },
        StorageError::UserNotFound { user_id } => EngineError::NotFound {
            kind: "user",
            id: user_id,
        },
        StorageError::AlreadyExists { kind, id } => {
            EngineError::Storage(format!("{kind} id collision: {id}"))
        }
        StorageError::Backend(msg) => EngineError::Storage(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_conflict_maps_to_engine_conflict() {
        let letter_id = Uuid::new_v4();
        let mapped = storage_err(StorageError::ConcurrentConflict {
            letter_id,
            expected_version: 3,
        });
        assert_eq!(mapped, EngineError::Conflict { id: letter_id });
        assert_eq!(mapped.code(), "CONFLICT");
    }

    #[test]
    fn rule_range_race_maps_to_engine_conflict() {
        let rule_id = Uuid::new_v4();
        let mapped = storage_err(StorageError::RuleRangeConflict { rule_id });
        assert_eq!(mapped, EngineError::Conflict { id: rule_id });
        assert_eq!(mapped.code(), "CONFLICT");
    }

    #[test]
    fn not_found_variants_collapse_with_kind() {
        let id = Uuid::new_v4();
        let mapped = storage_err(StorageError::RoleNotFound { role_id: id });
        assert_eq!(mapped, EngineError::NotFound { kind: "role", id });
    }

    #[test]
    fn display_names_every_failed_field() {
        let err = EngineError::Validation(vec![
            FieldIssue::new("letterNumber", "must not be empty"),
            FieldIssue::new("nominal", "must be greater than zero"),
        ]);
        let text = err.to_string();
        assert!(text.contains("letterNumber"));
        assert!(text.contains("nominal"));
    }
}
