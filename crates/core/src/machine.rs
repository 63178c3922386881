//! Procurement state machine.
//!
//! Pure transition logic: given a letter's status and current step and an
//! actor's decision, compute the next status, next step, and the log action
//! that records the transition. The executors in `submit` and `decide` are
//! the only writers; this module never touches storage.
//!
//! Statuses: DRAFT -> PENDING_REVIEW -> {NEEDS_REVISION | APPROVED |
//! REJECTED}, with NEEDS_REVISION -> PENDING_REVIEW on resubmission. DRAFT
//! exists only inside the creation transaction; a letter commits already at
//! PENDING_REVIEW with CREATED and SUBMITTED logged.

use paraf_storage::{LetterStatus, LogAction, StepKind};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// An approver's verdict at the current step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Approve,
    Reject,
    RequestRevision,
}

/// Outcome of one transition: the letter's next status and step, and the
/// audit action recording it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub status: LetterStatus,
    pub current_step: StepKind,
    pub action: LogAction,
}

/// Apply a decision to a letter at (status, step).
///
/// Only PENDING_REVIEW letters at a decision step (REVIEW or APPROVE)
/// admit decisions. REJECT and REQUEST_REVISION behave identically from
/// either decision step; APPROVE advances REVIEW -> APPROVE and terminates
/// at APPROVE.
pub fn apply_decision(
    status: LetterStatus,
    current_step: StepKind,
    decision: Decision,
) -> Result<Transition, EngineError> {
    if status != LetterStatus::PendingReview {
        return Err(EngineError::InvalidState {
            reason: format!("letter is {status}, decisions require PENDING_REVIEW"),
        });
    }
    if current_step == StepKind::Create {
        // A PENDING_REVIEW letter always sits at REVIEW or APPROVE; CREATE
        // here means corrupted state, not a caller mistake.
        return Err(EngineError::InvalidState {
            reason: "letter is pending review but parked at the CREATE step".to_string(),
        });
    }

    let transition = match decision {
        Decision::Approve => match current_step {
            StepKind::Review => Transition {
                status: LetterStatus::PendingReview,
                current_step: StepKind::Approve,
                action: LogAction::Reviewed,
            },
            _ => Transition {
                status: LetterStatus::Approved,
                current_step: StepKind::Approve,
                action: LogAction::Approved,
            },
        },
        Decision::Reject => Transition {
            status: LetterStatus::Rejected,
            current_step,
            action: LogAction::Rejected,
        },
        Decision::RequestRevision => Transition {
            status: LetterStatus::NeedsRevision,
            current_step: StepKind::Create,
            action: LogAction::RevisionRequested,
        },
    };
    Ok(transition)
}

/// Transition for a creator resubmitting after NEEDS_REVISION.
///
/// The workflow restarts at the first review step unconditionally.
pub fn apply_resubmission(status: LetterStatus) -> Result<Transition, EngineError> {
    if status != LetterStatus::NeedsRevision {
        return Err(EngineError::InvalidState {
            reason: format!("letter is {status}, resubmission requires NEEDS_REVISION"),
        });
    }
    Ok(Transition {
        status: LetterStatus::PendingReview,
        current_step: StepKind::Review,
        action: LogAction::Revised,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approve_at_review_advances_to_approve_step() {
        let t = apply_decision(
            LetterStatus::PendingReview,
            StepKind::Review,
            Decision::Approve,
        )
        .unwrap();
        assert_eq!(t.status, LetterStatus::PendingReview);
        assert_eq!(t.current_step, StepKind::Approve);
        assert_eq!(t.action, LogAction::Reviewed);
    }

    #[test]
    fn approve_at_approve_terminates() {
        let t = apply_decision(
            LetterStatus::PendingReview,
            StepKind::Approve,
            Decision::Approve,
        )
        .unwrap();
        assert_eq!(t.status, LetterStatus::Approved);
        assert_eq!(t.action, LogAction::Approved);
    }

    #[test]
    fn reject_terminates_identically_from_every_decision_step() {
        for step in [StepKind::Review, StepKind::Approve] {
            let t = apply_decision(LetterStatus::PendingReview, step, Decision::Reject).unwrap();
            assert_eq!(t.status, LetterStatus::Rejected);
            assert_eq!(t.action, LogAction::Rejected);
        }
    }

    #[test]
    fn request_revision_resets_to_create_from_every_decision_step() {
        for step in [StepKind::Review, StepKind::Approve] {
            let t = apply_decision(LetterStatus::PendingReview, step, Decision::RequestRevision)
                .unwrap();
            assert_eq!(t.status, LetterStatus::NeedsRevision);
            assert_eq!(t.current_step, StepKind::Create);
            assert_eq!(t.action, LogAction::RevisionRequested);
        }
    }

    #[test]
    fn decisions_rejected_outside_pending_review() {
        for status in [
            LetterStatus::Draft,
            LetterStatus::NeedsRevision,
            LetterStatus::Approved,
            LetterStatus::Rejected,
        ] {
            let err =
                apply_decision(status, StepKind::Review, Decision::Approve).unwrap_err();
            assert!(matches!(err, EngineError::InvalidState { .. }));
        }
    }

    #[test]
    fn pending_letter_at_create_step_is_invalid() {
        let err = apply_decision(
            LetterStatus::PendingReview,
            StepKind::Create,
            Decision::Approve,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState { .. }));
    }

    #[test]
    fn resubmission_restarts_at_review() {
        let t = apply_resubmission(LetterStatus::NeedsRevision).unwrap();
        assert_eq!(t.status, LetterStatus::PendingReview);
        assert_eq!(t.current_step, StepKind::Review);
        assert_eq!(t.action, LogAction::Revised);
    }

    #[test]
    fn resubmission_requires_needs_revision() {
        for status in [
            LetterStatus::PendingReview,
            LetterStatus::Approved,
            LetterStatus::Rejected,
        ] {
            let err = apply_resubmission(status).unwrap_err();
            assert!(matches!(err, EngineError::InvalidState { .. }));
        }
    }

    #[test]
    fn decision_parses_screaming_snake() {
        let d: Decision = serde_json::from_str("\"REQUEST_REVISION\"").unwrap();
        assert_eq!(d, Decision::RequestRevision);
    }
}
