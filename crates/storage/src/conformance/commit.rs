use std::future::Future;

use super::{make_letter, make_log, make_rule, TestResult};
use crate::record::LogAction;
use crate::{ParafStorage, StorageError};

pub(super) async fn run_commit_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "commit",
        "letter_and_logs_commit_atomically",
        letter_and_logs_commit_atomically(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "failed_commit_applies_nothing",
        failed_commit_applies_nothing(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "abort_discards_all_staged_writes",
        abort_discards_all_staged_writes(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "independent_snapshots_commit_in_any_order",
        independent_snapshots_commit_in_any_order(factory).await,
    ));

    results
}

// ── Test implementations ──────────────────────────────────────────────────────

/// A letter inserted together with its creation logs must land as one unit:
/// after commit, both the letter and all log entries are visible.
async fn letter_and_logs_commit_atomically<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let letter = make_letter("201/SPB/2025");
    let id = letter.id;
    let creator = letter.created_by;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_letter(&mut snap, letter)
        .await
        .map_err(|e| e.to_string())?;
    s.append_log(&mut snap, make_log(id, creator, LogAction::Created))
        .await
        .map_err(|e| e.to_string())?;
    s.append_log(&mut snap, make_log(id, creator, LogAction::Submitted))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    s.get_letter(id).await.map_err(|e| e.to_string())?;
    let logs = s.list_logs(id).await.map_err(|e| e.to_string())?;
    if logs.len() != 2 {
        return Err(format!("expected 2 log entries, got {}", logs.len()));
    }
    if logs[0].action != LogAction::Created || logs[1].action != LogAction::Submitted {
        return Err(format!(
            "expected [Created, Submitted], got [{:?}, {:?}]",
            logs[0].action, logs[1].action
        ));
    }
    Ok(())
}

/// When a commit fails its OCC re-validation, none of the snapshot's writes
/// may land, including writes that would have been valid on their own.
async fn failed_commit_applies_nothing<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let letter = make_letter("202/SPB/2025");
    let id = letter.id;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_letter(&mut snap, letter)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    // Two snapshots read the same version; the first one commits.
    let mut winner = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let mut loser = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let rec_w = s
        .get_letter_for_update(&mut winner, id)
        .await
        .map_err(|e| e.to_string())?;
    let rec_l = s
        .get_letter_for_update(&mut loser, id)
        .await
        .map_err(|e| e.to_string())?;
    s.update_letter(&mut winner, rec_w, 0)
        .await
        .map_err(|e| e.to_string())?;
    s.update_letter(&mut loser, rec_l, 0)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(winner).await.map_err(|e| e.to_string())?;

    // The loser also staged an unrelated insert; it must not survive the
    // failed commit.
    let bystander = make_letter("203/SPB/2025");
    let bystander_id = bystander.id;
    s.insert_letter(&mut loser, bystander)
        .await
        .map_err(|e| e.to_string())?;

    match s.commit_snapshot(loser).await {
        Err(StorageError::ConcurrentConflict { .. }) => {}
        Err(e) => return Err(format!("expected ConcurrentConflict, got: {e}")),
        Ok(()) => return Err("expected losing commit to fail".to_string()),
    }

    match s.get_letter(bystander_id).await {
        Err(ref e) if matches!(e, StorageError::LetterNotFound { .. }) => {}
        Err(e) => return Err(format!("expected LetterNotFound, got: {e}")),
        Ok(_) => return Err("write from a failed commit leaked into the store".to_string()),
    }

    // The winner's version increment survived.
    let rec = s.get_letter(id).await.map_err(|e| e.to_string())?;
    if rec.version != 1 {
        return Err(format!("expected version 1, got {}", rec.version));
    }
    Ok(())
}

/// An aborted snapshot discards every staged record kind at once.
async fn abort_discards_all_staged_writes<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let letter = make_letter("204/SPB/2025");
    let letter_id = letter.id;
    let creator = letter.created_by;
    let rule = make_rule("besar", 100_000_000, None);
    let rule_id = rule.id;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_letter(&mut snap, letter)
        .await
        .map_err(|e| e.to_string())?;
    s.append_log(&mut snap, make_log(letter_id, creator, LogAction::Created))
        .await
        .map_err(|e| e.to_string())?;
    s.insert_rule(&mut snap, rule).await.map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    if s.get_letter(letter_id).await.is_ok() {
        return Err("aborted letter is still visible".to_string());
    }
    if s.get_rule(rule_id).await.is_ok() {
        return Err("aborted rule is still visible".to_string());
    }
    Ok(())
}

/// Snapshots touching different letters commit independently, in either order.
async fn independent_snapshots_commit_in_any_order<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let first = make_letter("205/SPB/2025");
    let second = make_letter("206/SPB/2025");
    let first_id = first.id;
    let second_id = second.id;

    let mut snap_a = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let mut snap_b = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_letter(&mut snap_a, first)
        .await
        .map_err(|e| e.to_string())?;
    s.insert_letter(&mut snap_b, second)
        .await
        .map_err(|e| e.to_string())?;

    // Commit in the opposite order from creation.
    s.commit_snapshot(snap_b).await.map_err(|e| e.to_string())?;
    s.commit_snapshot(snap_a).await.map_err(|e| e.to_string())?;

    s.get_letter(first_id).await.map_err(|e| e.to_string())?;
    s.get_letter(second_id).await.map_err(|e| e.to_string())?;
    Ok(())
}
