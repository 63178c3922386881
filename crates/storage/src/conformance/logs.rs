//! Audit log conformance tests.
//!
//! The log is append-only and coupled to its letter: seq numbers are
//! storage-assigned and monotonic per letter, entries for unknown letters
//! are rejected, and a status change never becomes visible without the log
//! entry written in the same snapshot.

use std::future::Future;

use super::{make_letter, make_log, TestResult};
use crate::record::{LetterStatus, LogAction};
use crate::{ParafStorage, StorageError};

pub(super) async fn run_log_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "logs",
        "append_assigns_monotonic_seq",
        append_assigns_monotonic_seq(factory).await,
    ));
    results.push(TestResult::from_result(
        "logs",
        "seq_is_per_letter",
        seq_is_per_letter(factory).await,
    ));
    results.push(TestResult::from_result(
        "logs",
        "append_for_unknown_letter_rejected",
        append_for_unknown_letter_rejected(factory).await,
    ));
    results.push(TestResult::from_result(
        "logs",
        "append_visible_for_letter_staged_in_same_snapshot",
        append_visible_for_letter_staged_in_same_snapshot(factory).await,
    ));
    results.push(TestResult::from_result(
        "logs",
        "list_logs_orders_by_timestamp_then_seq",
        list_logs_orders_by_timestamp_then_seq(factory).await,
    ));
    results.push(TestResult::from_result(
        "logs",
        "list_logs_unknown_letter_not_found",
        list_logs_unknown_letter_not_found(factory).await,
    ));
    results.push(TestResult::from_result(
        "logs",
        "status_change_and_log_entry_commit_together",
        status_change_and_log_entry_commit_together(factory).await,
    ));
    results.push(TestResult::from_result(
        "logs",
        "aborted_log_entries_discarded",
        aborted_log_entries_discarded(factory).await,
    ));

    results
}

// ── Test implementations ──────────────────────────────────────────────────────

/// Appends within one snapshot and across snapshots produce seq 0, 1, 2, ...
async fn append_assigns_monotonic_seq<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let letter = make_letter("401/SPB/2025");
    let id = letter.id;
    let actor = letter.created_by;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_letter(&mut snap, letter)
        .await
        .map_err(|e| e.to_string())?;
    let s0 = s
        .append_log(&mut snap, make_log(id, actor, LogAction::Created))
        .await
        .map_err(|e| e.to_string())?;
    let s1 = s
        .append_log(&mut snap, make_log(id, actor, LogAction::Submitted))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut snap2 = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let s2 = s
        .append_log(&mut snap2, make_log(id, actor, LogAction::Reviewed))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap2).await.map_err(|e| e.to_string())?;

    if (s0, s1, s2) != (0, 1, 2) {
        return Err(format!("expected seq (0, 1, 2), got ({s0}, {s1}, {s2})"));
    }
    Ok(())
}

/// Each letter has its own seq counter.
async fn seq_is_per_letter<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let first = make_letter("402/SPB/2025");
    let second = make_letter("403/SPB/2025");
    let actor = first.created_by;
    let (first_id, second_id) = (first.id, second.id);

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_letter(&mut snap, first)
        .await
        .map_err(|e| e.to_string())?;
    s.insert_letter(&mut snap, second)
        .await
        .map_err(|e| e.to_string())?;
    s.append_log(&mut snap, make_log(first_id, actor, LogAction::Created))
        .await
        .map_err(|e| e.to_string())?;
    s.append_log(&mut snap, make_log(first_id, actor, LogAction::Submitted))
        .await
        .map_err(|e| e.to_string())?;
    let other = s
        .append_log(&mut snap, make_log(second_id, actor, LogAction::Created))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    if other != 0 {
        return Err(format!(
            "expected the second letter's first entry at seq 0, got {other}"
        ));
    }
    Ok(())
}

/// Appending a log entry for a letter that does not exist must fail.
async fn append_for_unknown_letter_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let phantom = make_letter("404/SPB/2025");

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s
        .append_log(
            &mut snap,
            make_log(phantom.id, phantom.created_by, LogAction::Created),
        )
        .await;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    match result {
        Err(ref e) if matches!(e, StorageError::LetterNotFound { .. }) => Ok(()),
        Err(e) => Err(format!("expected LetterNotFound, got: {e}")),
        Ok(_) => Err("append for unknown letter should fail".to_string()),
    }
}

/// A letter staged earlier in the same snapshot satisfies the append's
/// letter-exists check.
async fn append_visible_for_letter_staged_in_same_snapshot<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let letter = make_letter("405/SPB/2025");
    let id = letter.id;
    let actor = letter.created_by;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_letter(&mut snap, letter)
        .await
        .map_err(|e| e.to_string())?;
    s.append_log(&mut snap, make_log(id, actor, LogAction::Created))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let logs = s.list_logs(id).await.map_err(|e| e.to_string())?;
    if logs.len() != 1 {
        return Err(format!("expected 1 log entry, got {}", logs.len()));
    }
    Ok(())
}

/// list_logs orders entries by timestamp, with seq breaking same-timestamp
/// ties in append order.
async fn list_logs_orders_by_timestamp_then_seq<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let letter = make_letter("406/SPB/2025");
    let id = letter.id;
    let actor = letter.created_by;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_letter(&mut snap, letter)
        .await
        .map_err(|e| e.to_string())?;
    // Same timestamp for all three: order must come from seq.
    let mut created = make_log(id, actor, LogAction::Created);
    created.timestamp = "2025-01-01T09:00:00Z".to_string();
    let mut submitted = make_log(id, actor, LogAction::Submitted);
    submitted.timestamp = "2025-01-01T09:00:00Z".to_string();
    let mut reviewed = make_log(id, actor, LogAction::Reviewed);
    reviewed.timestamp = "2025-01-01T09:00:00Z".to_string();
    s.append_log(&mut snap, created)
        .await
        .map_err(|e| e.to_string())?;
    s.append_log(&mut snap, submitted)
        .await
        .map_err(|e| e.to_string())?;
    s.append_log(&mut snap, reviewed)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let logs = s.list_logs(id).await.map_err(|e| e.to_string())?;
    let actions: Vec<LogAction> = logs.iter().map(|e| e.action).collect();
    if actions
        != vec![
            LogAction::Created,
            LogAction::Submitted,
            LogAction::Reviewed,
        ]
    {
        return Err(format!("unexpected log order: {actions:?}"));
    }
    Ok(())
}

/// list_logs for an unknown letter id must fail rather than return an empty
/// list, so the public progress endpoint can distinguish missing letters.
async fn list_logs_unknown_letter_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    match s.list_logs(uuid::Uuid::new_v4()).await {
        Err(ref e) if matches!(e, StorageError::LetterNotFound { .. }) => Ok(()),
        Err(e) => Err(format!("expected LetterNotFound, got: {e}")),
        Ok(_) => Err("expected LetterNotFound for unknown letter".to_string()),
    }
}

/// A status update and its log entry written in one snapshot become visible
/// together at commit; before commit neither is visible.
async fn status_change_and_log_entry_commit_together<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let letter = make_letter("407/SPB/2025");
    let id = letter.id;
    let actor = letter.created_by;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_letter(&mut snap, letter)
        .await
        .map_err(|e| e.to_string())?;
    s.append_log(&mut snap, make_log(id, actor, LogAction::Created))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut snap2 = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let mut rec = s
        .get_letter_for_update(&mut snap2, id)
        .await
        .map_err(|e| e.to_string())?;
    rec.status = LetterStatus::Rejected;
    s.update_letter(&mut snap2, rec, 0)
        .await
        .map_err(|e| e.to_string())?;
    s.append_log(&mut snap2, make_log(id, actor, LogAction::Rejected))
        .await
        .map_err(|e| e.to_string())?;

    // Before commit: old status, one log entry.
    let mid = s.get_letter(id).await.map_err(|e| e.to_string())?;
    let mid_logs = s.list_logs(id).await.map_err(|e| e.to_string())?;
    if mid.status != LetterStatus::PendingReview || mid_logs.len() != 1 {
        return Err(format!(
            "uncommitted transition leaked: status {:?}, {} log entries",
            mid.status,
            mid_logs.len()
        ));
    }

    s.commit_snapshot(snap2).await.map_err(|e| e.to_string())?;

    // After commit: new status and its entry, as one unit.
    let after = s.get_letter(id).await.map_err(|e| e.to_string())?;
    let after_logs = s.list_logs(id).await.map_err(|e| e.to_string())?;
    if after.status != LetterStatus::Rejected {
        return Err(format!("expected Rejected, got {:?}", after.status));
    }
    if after_logs.len() != 2 || after_logs[1].action != LogAction::Rejected {
        return Err(format!(
            "expected REJECTED entry with the status change, got {:?}",
            after_logs.iter().map(|e| e.action).collect::<Vec<_>>()
        ));
    }
    Ok(())
}

/// Log entries staged in an aborted snapshot must never appear.
async fn aborted_log_entries_discarded<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let letter = make_letter("408/SPB/2025");
    let id = letter.id;
    let actor = letter.created_by;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_letter(&mut snap, letter)
        .await
        .map_err(|e| e.to_string())?;
    s.append_log(&mut snap, make_log(id, actor, LogAction::Created))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut doomed = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.append_log(&mut doomed, make_log(id, actor, LogAction::Reviewed))
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(doomed).await.map_err(|e| e.to_string())?;

    let logs = s.list_logs(id).await.map_err(|e| e.to_string())?;
    if logs.len() != 1 {
        return Err(format!(
            "expected 1 entry after abort, got {}",
            logs.len()
        ));
    }
    Ok(())
}
