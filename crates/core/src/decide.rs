//! Decision processor.
//!
//! Validates and applies one approver decision against a letter's current
//! step: role authorization, comment requirements, the state machine
//! transition, and the audit entry, all inside one storage snapshot with an
//! OCC version check on the letter row. Two approvers racing on the same
//! step cannot both succeed; the loser observes `InvalidState` (state
//! already advanced) or `Conflict` (stale version at commit).

use paraf_storage::{
    now_iso8601, LetterRecord, LogRecord, ParafStorage, UserRecord,
};
use uuid::Uuid;

use crate::error::{storage_err, EngineError};
use crate::machine::{apply_decision, Decision};

/// Longest accepted decision comment.
const MAX_COMMENT_LEN: usize = 1000;

/// Apply `actor`'s decision to the letter's current step.
///
/// `comment` is required (non-empty) for REJECT and REQUEST_REVISION,
/// optional for APPROVE.
pub async fn decide<S: ParafStorage>(
    storage: &S,
    actor: &UserRecord,
    letter_id: Uuid,
    decision: Decision,
    comment: Option<String>,
) -> Result<LetterRecord, EngineError> {
    let comment = normalize_comment(decision, comment)?;

    let mut snap = storage.begin_snapshot().await.map_err(storage_err)?;
    let staged = async {
        let mut letter = storage
            .get_letter_for_update(&mut snap, letter_id)
            .await
            .map_err(storage_err)?;

        let transition = apply_decision(letter.status, letter.current_step, decision)?;

        let required_role = letter.route.role_for(letter.current_step).ok_or_else(|| {
            EngineError::Storage(format!(
                "route snapshot is missing the {} step",
                letter.current_step
            ))
        })?;
        if actor.role_id != required_role {
            return Err(EngineError::UnauthorizedActor {
                reason: format!(
                    "the {} step of rule \"{}\" is owned by a different role",
                    letter.current_step, letter.route.rule_name
                ),
            });
        }

        let expected_version = letter.version;
        letter.status = transition.status;
        letter.current_step = transition.current_step;
        letter.updated_at = now_iso8601();

        storage
            .update_letter(&mut snap, letter.clone(), expected_version)
            .await
            .map_err(storage_err)?;
        storage
            .append_log(
                &mut snap,
                LogRecord {
                    id: Uuid::new_v4(),
                    letter_id,
                    seq: 0, // assigned by storage
                    action: transition.action,
                    actor_id: actor.id,
                    comment,
                    timestamp: now_iso8601(),
                },
            )
            .await
            .map_err(storage_err)?;
        letter.version = expected_version + 1;
        Ok::<LetterRecord, EngineError>(letter)
    }
    .await;

    match staged {
        Ok(letter) => {
            storage.commit_snapshot(snap).await.map_err(storage_err)?;
            tracing::info!(
                %letter_id,
                actor_id = %actor.id,
                decision = ?decision,
                status = %letter.status,
                "decision recorded"
            );
            Ok(letter)
        }
        Err(e) => {
            let _ = storage.abort_snapshot(snap).await;
            tracing::debug!(%letter_id, actor_id = %actor.id, error = %e, "decision rejected");
            Err(e)
        }
    }
}

fn normalize_comment(
    decision: Decision,
    comment: Option<String>,
) -> Result<Option<String>, EngineError> {
    let comment = comment
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());
    match &comment {
        Some(c) if c.chars().count() > MAX_COMMENT_LEN => Err(EngineError::validation(
            "comment",
            format!("must be at most {MAX_COMMENT_LEN} characters"),
        )),
        None if matches!(decision, Decision::Reject | Decision::RequestRevision) => {
            Err(EngineError::validation(
                "comment",
                "required when rejecting or requesting revision",
            ))
        }
        _ => Ok(comment),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use paraf_storage::{LetterStatus, LogAction, StepKind};

    use crate::submit::tests::{draft, fixture};
    use crate::submit::{resubmit, submit, RevisionDraft};

    #[tokio::test]
    async fn full_approval_path_yields_four_log_entries() {
        let fx = fixture().await;
        let letter = submit(&fx.storage, &fx.staf, draft(fx.unit_id, 10_000_000))
            .await
            .unwrap();

        let after_review = decide(&fx.storage, &fx.manajer, letter.id, Decision::Approve, None)
            .await
            .unwrap();
        assert_eq!(after_review.status, LetterStatus::PendingReview);
        assert_eq!(after_review.current_step, StepKind::Approve);

        let done = decide(&fx.storage, &fx.gm, letter.id, Decision::Approve, None)
            .await
            .unwrap();
        assert_eq!(done.status, LetterStatus::Approved);

        let logs = fx.storage.list_logs(letter.id).await.unwrap();
        let actions: Vec<LogAction> = logs.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![
                LogAction::Created,
                LogAction::Submitted,
                LogAction::Reviewed,
                LogAction::Approved,
            ]
        );
    }

    #[tokio::test]
    async fn wrong_role_for_current_step_is_unauthorized() {
        let fx = fixture().await;
        let letter = submit(&fx.storage, &fx.staf, draft(fx.unit_id, 10_000_000))
            .await
            .unwrap();

        // The GM may not act while the letter sits at REVIEW.
        let err = decide(&fx.storage, &fx.gm, letter.id, Decision::Approve, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnauthorizedActor { .. }));

        // Neither may the creator.
        let err = decide(&fx.storage, &fx.staf, letter.id, Decision::Approve, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnauthorizedActor { .. }));
    }

    #[tokio::test]
    async fn reject_requires_comment_and_terminates() {
        let fx = fixture().await;
        let letter = submit(&fx.storage, &fx.staf, draft(fx.unit_id, 10_000_000))
            .await
            .unwrap();

        let err = decide(&fx.storage, &fx.manajer, letter.id, Decision::Reject, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        // A whitespace comment does not count.
        let err = decide(
            &fx.storage,
            &fx.manajer,
            letter.id,
            Decision::Reject,
            Some("   ".to_string()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let done = decide(
            &fx.storage,
            &fx.manajer,
            letter.id,
            Decision::Reject,
            Some("anggaran tidak tersedia".to_string()),
        )
        .await
        .unwrap();
        assert_eq!(done.status, LetterStatus::Rejected);

        // Terminal: any further decision is an invalid state.
        let err = decide(&fx.storage, &fx.gm, letter.id, Decision::Approve, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn revision_loop_resets_and_resubmits() {
        let fx = fixture().await;
        let letter = submit(&fx.storage, &fx.staf, draft(fx.unit_id, 10_000_000))
            .await
            .unwrap();

        let revised = decide(
            &fx.storage,
            &fx.manajer,
            letter.id,
            Decision::RequestRevision,
            Some("perbaiki nominal".to_string()),
        )
        .await
        .unwrap();
        assert_eq!(revised.status, LetterStatus::NeedsRevision);
        assert_eq!(revised.current_step, StepKind::Create);

        let resubmitted = resubmit(
            &fx.storage,
            &fx.staf,
            letter.id,
            RevisionDraft {
                letter_number: letter.letter_number.clone(),
                letter_about: letter.letter_about.clone(),
                nominal: letter.nominal,
                incoming_letter_date: letter.incoming_letter_date.clone(),
                letter_file: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(resubmitted.status, LetterStatus::PendingReview);
        assert_eq!(resubmitted.current_step, StepKind::Review);

        let logs = fx.storage.list_logs(letter.id).await.unwrap();
        let actions: Vec<LogAction> = logs.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![
                LogAction::Created,
                LogAction::Submitted,
                LogAction::RevisionRequested,
                LogAction::Revised,
            ]
        );
        let revision_entry = &logs[2];
        assert_eq!(revision_entry.comment.as_deref(), Some("perbaiki nominal"));

        // The revision loop can run again from the first review step.
        let again = decide(&fx.storage, &fx.manajer, letter.id, Decision::Approve, None)
            .await
            .unwrap();
        assert_eq!(again.current_step, StepKind::Approve);
    }

    #[tokio::test]
    async fn request_revision_reachable_from_final_step() {
        let fx = fixture().await;
        let letter = submit(&fx.storage, &fx.staf, draft(fx.unit_id, 10_000_000))
            .await
            .unwrap();
        decide(&fx.storage, &fx.manajer, letter.id, Decision::Approve, None)
            .await
            .unwrap();

        let revised = decide(
            &fx.storage,
            &fx.gm,
            letter.id,
            Decision::RequestRevision,
            Some("lampiran kurang".to_string()),
        )
        .await
        .unwrap();
        assert_eq!(revised.status, LetterStatus::NeedsRevision);
        assert_eq!(revised.current_step, StepKind::Create);
    }

    #[tokio::test]
    async fn comment_over_limit_rejected() {
        let fx = fixture().await;
        let letter = submit(&fx.storage, &fx.staf, draft(fx.unit_id, 10_000_000))
            .await
            .unwrap();
        let long = "x".repeat(1001);
        let err = decide(
            &fx.storage,
            &fx.manajer,
            letter.id,
            Decision::Approve,
            Some(long),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn racing_decisions_yield_one_transition_and_one_entry() {
        let fx = fixture().await;
        let letter = submit(&fx.storage, &fx.staf, draft(fx.unit_id, 10_000_000))
            .await
            .unwrap();
        decide(&fx.storage, &fx.manajer, letter.id, Decision::Approve, None)
            .await
            .unwrap();

        // Race duplicate final approvals: exactly one commits, every loser
        // sees the state already advanced or a stale-version conflict.
        let storage = Arc::new(fx.storage.clone());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let storage = storage.clone();
            let gm = fx.gm.clone();
            let letter_id = letter.id;
            handles.push(tokio::spawn(async move {
                decide(&*storage, &gm, letter_id, Decision::Approve, None).await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(EngineError::InvalidState { .. }) | Err(EngineError::Conflict { .. }) => {}
                Err(other) => panic!("unexpected race outcome: {other}"),
            }
        }
        assert_eq!(winners, 1);

        let committed = fx.storage.get_letter(letter.id).await.unwrap();
        assert_eq!(committed.status, LetterStatus::Approved);
        assert_eq!(committed.version, 2);
        let logs = fx.storage.list_logs(letter.id).await.unwrap();
        let approvals = logs
            .iter()
            .filter(|e| e.action == LogAction::Approved)
            .count();
        assert_eq!(approvals, 1);
    }
}
