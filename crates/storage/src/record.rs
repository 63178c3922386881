use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a procurement letter.
///
/// `Draft` exists only inside the creation transaction: a letter is
/// committed already at `PendingReview`, with the `CREATED` and `SUBMITTED`
/// log entries recording the draft being born and submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LetterStatus {
    Draft,
    PendingReview,
    NeedsRevision,
    Approved,
    Rejected,
}

impl LetterStatus {
    /// Terminal statuses admit no further decisions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LetterStatus::Approved | LetterStatus::Rejected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LetterStatus::Draft => "DRAFT",
            LetterStatus::PendingReview => "PENDING_REVIEW",
            LetterStatus::NeedsRevision => "NEEDS_REVISION",
            LetterStatus::Approved => "APPROVED",
            LetterStatus::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for LetterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stage of an approval route. Every rule carries exactly one step of
/// each kind, ordered CREATE(1) -> REVIEW(2) -> APPROVE(3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepKind {
    Create,
    Review,
    Approve,
}

impl StepKind {
    /// Canonical 1-based order of this step within a rule.
    pub fn order(&self) -> u8 {
        match self {
            StepKind::Create => 1,
            StepKind::Review => 2,
            StepKind::Approve => 3,
        }
    }

    /// All step kinds in canonical order.
    pub fn all() -> [StepKind; 3] {
        [StepKind::Create, StepKind::Review, StepKind::Approve]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Create => "CREATE",
            StepKind::Review => "REVIEW",
            StepKind::Approve => "APPROVE",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action recorded by one audit log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogAction {
    Created,
    Submitted,
    Reviewed,
    Approved,
    Rejected,
    RevisionRequested,
    Revised,
    Commented,
}

impl LogAction {
    /// Whether this entry records an approver's decision (as opposed to the
    /// creator's submission activity). Used by the per-actor history query.
    pub fn is_decision(&self) -> bool {
        matches!(
            self,
            LogAction::Reviewed
                | LogAction::Approved
                | LogAction::Rejected
                | LogAction::RevisionRequested
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogAction::Created => "CREATED",
            LogAction::Submitted => "SUBMITTED",
            LogAction::Reviewed => "REVIEWED",
            LogAction::Approved => "APPROVED",
            LogAction::Rejected => "REJECTED",
            LogAction::RevisionRequested => "REVISION_REQUESTED",
            LogAction::Revised => "REVISED",
            LogAction::Commented => "COMMENTED",
        }
    }
}

impl fmt::Display for LogAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of a stored rule: order, kind, and the role bound to act.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub id: Uuid,
    pub step_order: u8,
    pub step_type: StepKind,
    pub role_id: Uuid,
}

/// A stored approval rule: a nominal-amount range and its three steps.
///
/// `max_amount = None` means unbounded above. Both bounds are inclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleRecord {
    pub id: Uuid,
    pub name: String,
    pub min_amount: Decimal,
    pub max_amount: Option<Decimal>,
    pub steps: Vec<StepRecord>,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub created_at: String,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub updated_at: String,
}

/// One step of a route snapshot frozen onto a letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteStep {
    pub step_type: StepKind,
    pub role_id: Uuid,
}

/// The rule bindings a letter was submitted against, captured at submission
/// time. Later rule edits or deletions never alter this snapshot, so the
/// audit trail stays explainable against the route that was actually in
/// force.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSnapshot {
    pub rule_id: Uuid,
    pub rule_name: String,
    pub steps: Vec<RouteStep>,
}

impl RouteSnapshot {
    /// Role bound to the given step kind, if the snapshot carries it.
    pub fn role_for(&self, step: StepKind) -> Option<Uuid> {
        self.steps
            .iter()
            .find(|s| s.step_type == step)
            .map(|s| s.role_id)
    }
}

/// A stored procurement letter.
///
/// `version` is the optimistic concurrency counter: every committed
/// `update_letter` increments it, and updates carrying a stale expected
/// version fail with `ConcurrentConflict`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LetterRecord {
    pub id: Uuid,
    pub letter_number: String,
    pub letter_about: String,
    pub nominal: Decimal,
    /// Calendar date string, `YYYY-MM-DD`.
    pub incoming_letter_date: String,
    pub unit_id: Uuid,
    /// Stored file name under the letter-file directory.
    pub letter_file: String,
    pub status: LetterStatus,
    /// The step whose role must act next.
    pub current_step: StepKind,
    pub route: RouteSnapshot,
    pub created_by: Uuid,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub created_at: String,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub updated_at: String,
    pub version: i64,
}

/// One append-only audit log entry.
///
/// `seq` is assigned by storage, monotonic per letter; entries order by
/// `(timestamp, seq)` so same-second entries keep their append order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: Uuid,
    pub letter_id: Uuid,
    pub seq: i64,
    pub action: LogAction,
    pub actor_id: Uuid,
    pub comment: Option<String>,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub timestamp: String,
}

/// An organizational unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitRecord {
    pub id: Uuid,
    pub name: String,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub created_at: String,
}

/// A role users hold and rule steps bind to. Referenced by id everywhere;
/// the name is a display label only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleRecord {
    pub id: Uuid,
    pub name: String,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub created_at: String,
}

/// A directory user, bound to one role and one unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: Uuid,
    pub name: String,
    pub role_id: Uuid,
    pub unit_id: Uuid,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub created_at: String,
}

/// Current UTC time as an ISO 8601 string with second precision.
pub fn now_iso8601() -> String {
    let now = time::OffsetDateTime::now_utc();
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        now.year(),
        now.month() as u8,
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}
