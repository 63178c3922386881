//! Letter submission and revision-resubmission executors.
//!
//! `submit` runs the whole creation transaction: field validation, rule
//! matching against the snapshot's rule set, CREATE-step authorization,
//! route snapshot capture, and the CREATED + SUBMITTED log entries, all
//! committed as one unit. The letter lands already at PENDING_REVIEW with
//! the REVIEW step owed; DRAFT never escapes the transaction.
//!
//! `resubmit` re-enters a NEEDS_REVISION letter: creator-only, re-runs the
//! matcher against the possibly-edited nominal, refreshes the route
//! snapshot, and appends REVISED.

use paraf_storage::{
    now_iso8601, LetterRecord, LetterStatus, LogAction, LogRecord, ParafStorage, RouteSnapshot,
    RouteStep, StepKind, UserRecord,
};
use rust_decimal::Decimal;
use time::format_description::FormatItem;
use time::macros::format_description;
use uuid::Uuid;

use crate::error::{storage_err, EngineError, FieldIssue};
use crate::machine;
use crate::rules::match_rule;

const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Fields of a new letter submission.
#[derive(Debug, Clone)]
pub struct LetterDraft {
    pub letter_number: String,
    pub letter_about: String,
    pub nominal: Decimal,
    /// Calendar date, `YYYY-MM-DD`.
    pub incoming_letter_date: String,
    pub unit_id: Uuid,
    /// Stored file name, as returned by the letter file store.
    pub letter_file: String,
}

/// Field edits applied on resubmission. The unit and creator never change;
/// the letter file is replaced only when a new one was uploaded.
#[derive(Debug, Clone)]
pub struct RevisionDraft {
    pub letter_number: String,
    pub letter_about: String,
    pub nominal: Decimal,
    pub incoming_letter_date: String,
    pub letter_file: Option<String>,
}

fn validate_fields(
    letter_number: &str,
    letter_about: &str,
    nominal: Decimal,
    incoming_letter_date: &str,
) -> Result<(), EngineError> {
    let mut issues = Vec::new();
    if letter_number.trim().is_empty() {
        issues.push(FieldIssue::new("letterNumber", "must not be empty"));
    }
    if letter_about.trim().is_empty() {
        issues.push(FieldIssue::new("letterAbout", "must not be empty"));
    }
    if nominal <= Decimal::ZERO {
        issues.push(FieldIssue::new("nominal", "must be greater than zero"));
    } else if !nominal.fract().is_zero() {
        // Rule ranges are whole currency units; a fractional nominal could
        // fall between two adjacent ranges and match nothing.
        issues.push(FieldIssue::new("nominal", "must be a whole amount"));
    }
    if time::Date::parse(incoming_letter_date, DATE_FORMAT).is_err() {
        issues.push(FieldIssue::new(
            "incomingLetterDate",
            "must be a calendar date in YYYY-MM-DD form",
        ));
    }
    if issues.is_empty() {
        Ok(())
    } else {
        Err(EngineError::Validation(issues))
    }
}

fn route_from(rule: &paraf_storage::RuleRecord) -> RouteSnapshot {
    RouteSnapshot {
        rule_id: rule.id,
        rule_name: rule.name.clone(),
        steps: rule
            .steps
            .iter()
            .map(|s| RouteStep {
                step_type: s.step_type,
                role_id: s.role_id,
            })
            .collect(),
    }
}

fn log_entry(
    letter_id: Uuid,
    actor_id: Uuid,
    action: LogAction,
    comment: Option<String>,
) -> LogRecord {
    LogRecord {
        id: Uuid::new_v4(),
        letter_id,
        seq: 0, // assigned by storage
        action,
        actor_id,
        comment,
        timestamp: now_iso8601(),
    }
}

/// Submit a new letter on behalf of `actor`.
///
/// The actor's role must equal the matched rule's CREATE-step role. The
/// matcher runs against the rule set visible inside the submission
/// snapshot, so a concurrent rule edit cannot slip an ambiguous match past
/// the save-time overlap check.
pub async fn submit<S: ParafStorage>(
    storage: &S,
    actor: &UserRecord,
    draft: LetterDraft,
) -> Result<LetterRecord, EngineError> {
    validate_fields(
        &draft.letter_number,
        &draft.letter_about,
        draft.nominal,
        &draft.incoming_letter_date,
    )?;
    if draft.letter_file.trim().is_empty() {
        return Err(EngineError::validation("letterFile", "must not be empty"));
    }
    storage.get_unit(draft.unit_id).await.map_err(storage_err)?;

    let mut snap = storage.begin_snapshot().await.map_err(storage_err)?;
    let staged = async {
        let rules = storage
            .list_rules_in(&mut snap)
            .await
            .map_err(storage_err)?;
        let rule = match_rule(&rules, draft.nominal)?;
        let create_role = rule
            .steps
            .iter()
            .find(|s| s.step_type == StepKind::Create)
            .map(|s| s.role_id)
            .ok_or_else(|| EngineError::Storage("rule is missing its CREATE step".to_string()))?;
        if actor.role_id != create_role {
            return Err(EngineError::UnauthorizedActor {
                reason: format!(
                    "submitting amount {} requires the CREATE role of rule \"{}\"",
                    draft.nominal, rule.name
                ),
            });
        }

        let now = now_iso8601();
        let letter = LetterRecord {
            id: Uuid::new_v4(),
            letter_number: draft.letter_number.trim().to_string(),
            letter_about: draft.letter_about.trim().to_string(),
            nominal: draft.nominal,
            incoming_letter_date: draft.incoming_letter_date.clone(),
            unit_id: draft.unit_id,
            letter_file: draft.letter_file.clone(),
            status: LetterStatus::PendingReview,
            current_step: StepKind::Review,
            route: route_from(rule),
            created_by: actor.id,
            created_at: now.clone(),
            updated_at: now,
            version: 0,
        };
        storage
            .insert_letter(&mut snap, letter.clone())
            .await
            .map_err(storage_err)?;
        storage
            .append_log(&mut snap, log_entry(letter.id, actor.id, LogAction::Created, None))
            .await
            .map_err(storage_err)?;
        storage
            .append_log(
                &mut snap,
                log_entry(letter.id, actor.id, LogAction::Submitted, None),
            )
            .await
            .map_err(storage_err)?;
        Ok::<LetterRecord, EngineError>(letter)
    }
    .await;

    match staged {
        Ok(letter) => {
            storage.commit_snapshot(snap).await.map_err(storage_err)?;
            tracing::info!(
                letter_id = %letter.id,
                letter_number = %letter.letter_number,
                rule = %letter.route.rule_name,
                "letter submitted"
            );
            Ok(letter)
        }
        Err(e) => {
            let _ = storage.abort_snapshot(snap).await;
            tracing::debug!(actor_id = %actor.id, error = %e, "submission rejected");
            Err(e)
        }
    }
}

/// Revise and resubmit a NEEDS_REVISION letter.
///
/// Only the creator may resubmit. The matcher re-runs against the edited
/// nominal and the route snapshot is refreshed for the new pass; prior log
/// entries keep recording the route that was in force when they were
/// written.
pub async fn resubmit<S: ParafStorage>(
    storage: &S,
    actor: &UserRecord,
    letter_id: Uuid,
    draft: RevisionDraft,
) -> Result<LetterRecord, EngineError> {
    validate_fields(
        &draft.letter_number,
        &draft.letter_about,
        draft.nominal,
        &draft.incoming_letter_date,
    )?;

    let mut snap = storage.begin_snapshot().await.map_err(storage_err)?;
    let staged = async {
        let mut letter = storage
            .get_letter_for_update(&mut snap, letter_id)
            .await
            .map_err(storage_err)?;
        if letter.created_by != actor.id {
            return Err(EngineError::UnauthorizedActor {
                reason: "only the creator may revise and resubmit a letter".to_string(),
            });
        }
        let transition = machine::apply_resubmission(letter.status)?;

        let rules = storage
            .list_rules_in(&mut snap)
            .await
            .map_err(storage_err)?;
        let rule = match_rule(&rules, draft.nominal)?;

        let expected_version = letter.version;
        letter.letter_number = draft.letter_number.trim().to_string();
        letter.letter_about = draft.letter_about.trim().to_string();
        letter.nominal = draft.nominal;
        letter.incoming_letter_date = draft.incoming_letter_date.clone();
        if let Some(file) = &draft.letter_file {
            letter.letter_file = file.clone();
        }
        letter.status = transition.status;
        letter.current_step = transition.current_step;
        letter.route = route_from(rule);
        letter.updated_at = now_iso8601();

        storage
            .update_letter(&mut snap, letter.clone(), expected_version)
            .await
            .map_err(storage_err)?;
        storage
            .append_log(
                &mut snap,
                log_entry(letter.id, actor.id, transition.action, None),
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
            tracing::info!(letter_id = %letter.id, "letter resubmitted");
            Ok(letter)
        }
        Err(e) => {
            let _ = storage.abort_snapshot(snap).await;
            tracing::debug!(%letter_id, error = %e, "resubmission rejected");
            Err(e)
        }
    }
}
