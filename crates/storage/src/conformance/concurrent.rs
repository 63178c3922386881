//! Concurrency conformance tests.
//!
//! Unlike the sequential OCC checks in the `version` module, these spawn
//! real tokio tasks that race open snapshots against each other and assert
//! exactly-one-winner semantics.

use std::future::Future;
use std::sync::Arc;

use super::{make_letter, make_log, make_rule, TestResult};
use crate::record::{LetterStatus, LogAction, StepKind};
use crate::{ParafStorage, StorageError};

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "concurrent",
        "racing_updates_exactly_one_wins",
        racing_updates_exactly_one_wins(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "racing_inserts_exactly_one_wins",
        racing_inserts_exactly_one_wins(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "updates_to_different_letters_all_succeed",
        updates_to_different_letters_all_succeed(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "racing_transitions_yield_one_log_entry",
        racing_transitions_yield_one_log_entry(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "interleaved_rule_saves_exactly_one_wins",
        interleaved_rule_saves_exactly_one_wins(factory).await,
    ));

    results
}

// ── Test implementations ──────────────────────────────────────────────────────

/// N tasks each open a snapshot and attempt to update the same letter from
/// version 0. Exactly one commit succeeds; the rest observe
/// ConcurrentConflict and the letter ends at version 1.
async fn racing_updates_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    let letter = make_letter("501/SPB/2025");
    let id = letter.id;

    {
        let mut snap = storage
            .begin_snapshot()
            .await
            .map_err(|e| format!("begin: {e}"))?;
        storage
            .insert_letter(&mut snap, letter)
            .await
            .map_err(|e| format!("insert: {e}"))?;
        storage
            .commit_snapshot(snap)
            .await
            .map_err(|e| format!("commit seed: {e}"))?;
    }

    let mut handles = Vec::new();
    for _ in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            let rec = match s.get_letter_for_update(&mut snap, id).await {
                Ok(rec) => rec,
                Err(e) => {
                    let _ = s.abort_snapshot(snap).await;
                    return Err(e);
                }
            };
            match s.update_letter(&mut snap, rec, 0).await {
                Ok(_) => match s.commit_snapshot(snap).await {
                    Ok(()) => Ok(true),
                    Err(StorageError::ConcurrentConflict { .. }) => Ok(false),
                    Err(e) => Err(e),
                },
                Err(StorageError::ConcurrentConflict { .. }) => {
                    s.abort_snapshot(snap).await?;
                    Ok(false)
                }
                Err(e) => {
                    let _ = s.abort_snapshot(snap).await;
                    Err(e)
                }
            }
        }));
    }

    let mut winners = 0usize;
    for handle in handles {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e: StorageError| format!("storage error: {e}"))?;
        if won {
            winners += 1;
        }
    }

    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }
    let committed = storage.get_letter(id).await.map_err(|e| e.to_string())?;
    if committed.version != 1 {
        return Err(format!(
            "expected final version 1, got {}",
            committed.version
        ));
    }
    Ok(())
}

/// N tasks race to insert a letter with the same id. Exactly one wins; the
/// rest observe AlreadyExists at insert or commit.
async fn racing_inserts_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    let template = make_letter("502/SPB/2025");
    let id = template.id;

    let mut handles = Vec::new();
    for _ in 0..N {
        let s = storage.clone();
        let letter = template.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            match s.insert_letter(&mut snap, letter).await {
                Ok(()) => match s.commit_snapshot(snap).await {
                    Ok(()) => Ok(true),
                    Err(StorageError::AlreadyExists { .. }) => Ok(false),
                    Err(e) => Err(e),
                },
                Err(StorageError::AlreadyExists { .. }) => {
                    s.abort_snapshot(snap).await?;
                    Ok(false)
                }
                Err(e) => {
                    let _ = s.abort_snapshot(snap).await;
                    Err(e)
                }
            }
        }));
    }

    let mut winners = 0usize;
    for handle in handles {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e: StorageError| format!("storage error: {e}"))?;
        if won {
            winners += 1;
        }
    }

    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }
    storage
        .get_letter(id)
        .await
        .map_err(|e| format!("letter missing after race: {e}"))?;
    Ok(())
}

/// Concurrent updates to N distinct letters must all succeed: OCC serializes
/// per letter, not globally.
async fn updates_to_different_letters_all_succeed<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    let mut ids = Vec::new();

    {
        let mut snap = storage
            .begin_snapshot()
            .await
            .map_err(|e| format!("begin: {e}"))?;
        for i in 0..N {
            let letter = make_letter(&format!("503-{i}/SPB/2025"));
            ids.push(letter.id);
            storage
                .insert_letter(&mut snap, letter)
                .await
                .map_err(|e| format!("insert: {e}"))?;
        }
        storage
            .commit_snapshot(snap)
            .await
            .map_err(|e| format!("commit seed: {e}"))?;
    }

    let mut handles = Vec::new();
    for id in ids.clone() {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            let rec = s.get_letter_for_update(&mut snap, id).await?;
            s.update_letter(&mut snap, rec, 0).await?;
            s.commit_snapshot(snap).await
        }));
    }

    for handle in handles {
        handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e: StorageError| format!("update failed: {e}"))?;
    }

    for id in ids {
        let rec = storage.get_letter(id).await.map_err(|e| e.to_string())?;
        if rec.version != 1 {
            return Err(format!(
                "letter {id} expected version 1, got {}",
                rec.version
            ));
        }
    }
    Ok(())
}

/// N tasks race to record a terminal transition (status update + log entry
/// in one snapshot). Exactly one transition commits and the letter ends
/// with exactly one decision entry, never a torn pair.
async fn racing_transitions_yield_one_log_entry<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    let letter = make_letter("504/SPB/2025");
    let id = letter.id;
    let actor = letter.created_by;

    {
        let mut snap = storage
            .begin_snapshot()
            .await
            .map_err(|e| format!("begin: {e}"))?;
        storage
            .insert_letter(&mut snap, letter)
            .await
            .map_err(|e| format!("insert: {e}"))?;
        storage
            .append_log(&mut snap, make_log(id, actor, LogAction::Created))
            .await
            .map_err(|e| format!("append: {e}"))?;
        storage
            .commit_snapshot(snap)
            .await
            .map_err(|e| format!("commit seed: {e}"))?;
    }

    let mut handles = Vec::new();
    for _ in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            let mut rec = match s.get_letter_for_update(&mut snap, id).await {
                Ok(rec) => rec,
                Err(e) => {
                    let _ = s.abort_snapshot(snap).await;
                    return Err(e);
                }
            };
            rec.status = LetterStatus::Approved;
            rec.current_step = StepKind::Approve;
            let staged = async {
                s.update_letter(&mut snap, rec, 0).await?;
                s.append_log(&mut snap, make_log(id, actor, LogAction::Approved))
                    .await?;
                Ok::<(), StorageError>(())
            }
            .await;
            match staged {
                Ok(()) => match s.commit_snapshot(snap).await {
                    Ok(()) => Ok(true),
                    Err(StorageError::ConcurrentConflict { .. }) => Ok(false),
                    Err(e) => Err(e),
                },
                Err(StorageError::ConcurrentConflict { .. }) => {
                    s.abort_snapshot(snap).await?;
                    Ok(false)
                }
                Err(e) => {
                    let _ = s.abort_snapshot(snap).await;
                    Err(e)
                }
            }
        }));
    }

    let mut winners = 0usize;
    for handle in handles {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e: StorageError| format!("storage error: {e}"))?;
        if won {
            winners += 1;
        }
    }
    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }

    let committed = storage.get_letter(id).await.map_err(|e| e.to_string())?;
    if committed.status != LetterStatus::Approved || committed.version != 1 {
        return Err(format!(
            "expected one committed transition, got status {:?} version {}",
            committed.status, committed.version
        ));
    }
    let logs = storage.list_logs(id).await.map_err(|e| e.to_string())?;
    let approvals = logs
        .iter()
        .filter(|e| e.action == LogAction::Approved)
        .count();
    if approvals != 1 {
        return Err(format!(
            "expected exactly 1 APPROVED entry, got {approvals}"
        ));
    }
    Ok(())
}

/// Two snapshots each read the rule set, see no collision, and stage rules
/// with intersecting amount ranges. Commit must re-validate ranges against
/// the committed set: exactly one save wins and the loser fails with
/// RuleRangeConflict, so no interleaving can commit ambiguous coverage.
async fn interleaved_rule_saves_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);

    let mut first = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin first: {e}"))?;
    let mut second = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin second: {e}"))?;

    // Both reads happen before either commit, so neither snapshot can see
    // the other's rule.
    for snap in [&mut first, &mut second] {
        let visible = storage
            .list_rules_in(snap)
            .await
            .map_err(|e| format!("list: {e}"))?;
        if !visible.is_empty() {
            return Err(format!("expected empty rule view, got {}", visible.len()));
        }
    }

    storage
        .insert_rule(&mut first, make_rule("kecil", 0, Some(100_000_000)))
        .await
        .map_err(|e| format!("insert first: {e}"))?;
    storage
        .insert_rule(&mut second, make_rule("tengah", 50_000_000, Some(200_000_000)))
        .await
        .map_err(|e| format!("insert second: {e}"))?;

    storage
        .commit_snapshot(first)
        .await
        .map_err(|e| format!("first commit must win: {e}"))?;
    match storage.commit_snapshot(second).await {
        Err(StorageError::RuleRangeConflict { .. }) => {}
        Ok(()) => return Err("overlapping rule save committed; expected RuleRangeConflict".into()),
        Err(e) => return Err(format!("expected RuleRangeConflict, got: {e}")),
    }

    let (committed, total) = storage
        .list_rules(0, 0)
        .await
        .map_err(|e| format!("list committed: {e}"))?;
    if total != 1 || committed[0].name != "kecil" {
        return Err(format!("expected only the winning rule, got {total}"));
    }
    Ok(())
}
