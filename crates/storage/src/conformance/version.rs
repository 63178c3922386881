//! Optimistic concurrency conformance tests.
//!
//! Sequential OCC checks: version chains, stale expected versions, and the
//! commit-time re-check that makes exactly one of two overlapping snapshots
//! win. Real racing tasks live in the `concurrent` module.

use std::future::Future;

use super::{make_letter, TestResult};
use crate::record::LetterStatus;
use crate::{ParafStorage, StorageError};

pub(super) async fn run_version_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "version",
        "update_increments_version",
        update_increments_version(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "sequential_updates_chain_versions",
        sequential_updates_chain_versions(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "stale_expected_version_rejected",
        stale_expected_version_rejected(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "conflict_error_names_letter_and_version",
        conflict_error_names_letter_and_version(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "record_version_field_ignored_on_update",
        record_version_field_ignored_on_update(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "update_unknown_letter_not_found",
        update_unknown_letter_not_found(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "overlapping_snapshots_second_commit_conflicts",
        overlapping_snapshots_second_commit_conflicts(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "failed_update_leaves_committed_state_untouched",
        failed_update_leaves_committed_state_untouched(factory).await,
    ));

    results
}

// ── Helpers ──────────────────────────────────────────────────────────────────

async fn seed_letter<S: ParafStorage>(
    s: &S,
    number: &str,
) -> Result<crate::record::LetterRecord, String> {
    let letter = make_letter(number);
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_letter(&mut snap, letter.clone())
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;
    Ok(letter)
}

// ── Test implementations ──────────────────────────────────────────────────────

/// A committed OCC update moves the letter from version 0 to version 1, and
/// the update call reports the new version.
async fn update_increments_version<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let letter = seed_letter(&s, "301/SPB/2025").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let rec = s
        .get_letter_for_update(&mut snap, letter.id)
        .await
        .map_err(|e| e.to_string())?;
    let new_version = s
        .update_letter(&mut snap, rec, 0)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    if new_version != 1 {
        return Err(format!(
            "expected update to return version 1, got {new_version}"
        ));
    }
    let committed = s.get_letter(letter.id).await.map_err(|e| e.to_string())?;
    if committed.version != 1 {
        return Err(format!(
            "expected committed version 1, got {}",
            committed.version
        ));
    }
    Ok(())
}

/// Three updates in a row chain the version 0 -> 1 -> 2 -> 3, each expecting
/// the version the previous one produced.
async fn sequential_updates_chain_versions<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let letter = seed_letter(&s, "302/SPB/2025").await?;

    let mut expected = 0i64;
    for _ in 0..3 {
        let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
        let rec = s
            .get_letter_for_update(&mut snap, letter.id)
            .await
            .map_err(|e| e.to_string())?;
        if rec.version != expected {
            return Err(format!(
                "expected to read version {expected}, got {}",
                rec.version
            ));
        }
        let new_version = s
            .update_letter(&mut snap, rec, expected)
            .await
            .map_err(|e| e.to_string())?;
        s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;
        expected = new_version;
    }

    if expected != 3 {
        return Err(format!("expected final version 3, got {expected}"));
    }
    Ok(())
}

/// An update expecting a version that was already surpassed must fail with
/// ConcurrentConflict.
async fn stale_expected_version_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let letter = seed_letter(&s, "303/SPB/2025").await?;

    // Advance to version 1.
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let rec = s
        .get_letter_for_update(&mut snap, letter.id)
        .await
        .map_err(|e| e.to_string())?;
    s.update_letter(&mut snap, rec.clone(), 0)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    // A second writer still expecting version 0 must lose, at the update
    // call or at commit.
    let mut stale = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = match s.update_letter(&mut stale, rec, 0).await {
        Ok(_) => s.commit_snapshot(stale).await,
        Err(e) => {
            let _ = s.abort_snapshot(stale).await;
            Err(e)
        }
    };

    match result {
        Err(ref e) if matches!(e, StorageError::ConcurrentConflict { .. }) => Ok(()),
        Err(e) => Err(format!("expected ConcurrentConflict, got: {e}")),
        Ok(()) => Err("stale update should not commit".to_string()),
    }
}

/// The conflict error must carry the letter id and the stale expected version.
async fn conflict_error_names_letter_and_version<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let letter = seed_letter(&s, "304/SPB/2025").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let rec = s
        .get_letter_for_update(&mut snap, letter.id)
        .await
        .map_err(|e| e.to_string())?;
    s.update_letter(&mut snap, rec.clone(), 0)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut stale = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = match s.update_letter(&mut stale, rec, 0).await {
        Ok(_) => s.commit_snapshot(stale).await,
        Err(e) => {
            let _ = s.abort_snapshot(stale).await;
            Err(e)
        }
    };

    match result {
        Err(StorageError::ConcurrentConflict {
            letter_id,
            expected_version,
        }) => {
            if letter_id != letter.id {
                return Err(format!("expected letter id {}, got {letter_id}", letter.id));
            }
            if expected_version != 0 {
                return Err(format!("expected stale version 0, got {expected_version}"));
            }
            Ok(())
        }
        Err(e) => Err(format!("expected ConcurrentConflict, got: {e}")),
        Ok(()) => Err("stale update should not commit".to_string()),
    }
}

/// The `version` field on the record passed to update_letter is not trusted:
/// only `expected_version` drives the check, and the stored version becomes
/// `expected_version + 1`.
async fn record_version_field_ignored_on_update<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let letter = seed_letter(&s, "305/SPB/2025").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let mut rec = s
        .get_letter_for_update(&mut snap, letter.id)
        .await
        .map_err(|e| e.to_string())?;
    rec.version = 99;
    let new_version = s
        .update_letter(&mut snap, rec, 0)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    if new_version != 1 {
        return Err(format!("expected new version 1, got {new_version}"));
    }
    let committed = s.get_letter(letter.id).await.map_err(|e| e.to_string())?;
    if committed.version != 1 {
        return Err(format!(
            "expected stored version 1, got {}",
            committed.version
        ));
    }
    Ok(())
}

/// Updating a letter that does not exist must return LetterNotFound.
async fn update_unknown_letter_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let phantom = make_letter("306/SPB/2025");

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s.update_letter(&mut snap, phantom, 0).await;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    match result {
        Err(ref e) if matches!(e, StorageError::LetterNotFound { .. }) => Ok(()),
        Err(e) => Err(format!("expected LetterNotFound, got: {e}")),
        Ok(_) => Err("update of unknown letter should fail".to_string()),
    }
}

/// Two snapshots both read version 0 before either commits. The first
/// commit wins; the second must observe ConcurrentConflict at its update
/// call or at commit, and the committed letter ends at version 1.
async fn overlapping_snapshots_second_commit_conflicts<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let letter = seed_letter(&s, "307/SPB/2025").await?;

    let mut snap_a = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let mut snap_b = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let rec_a = s
        .get_letter_for_update(&mut snap_a, letter.id)
        .await
        .map_err(|e| e.to_string())?;
    let rec_b = s
        .get_letter_for_update(&mut snap_b, letter.id)
        .await
        .map_err(|e| e.to_string())?;

    // A wins.
    s.update_letter(&mut snap_a, rec_a, 0)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap_a).await.map_err(|e| e.to_string())?;

    // B must lose.
    let result = match s.update_letter(&mut snap_b, rec_b, 0).await {
        Ok(_) => s.commit_snapshot(snap_b).await,
        Err(e) => {
            let _ = s.abort_snapshot(snap_b).await;
            Err(e)
        }
    };
    match result {
        Err(ref e) if matches!(e, StorageError::ConcurrentConflict { .. }) => {}
        Err(e) => return Err(format!("expected ConcurrentConflict, got: {e}")),
        Ok(()) => return Err("both overlapping snapshots committed".to_string()),
    }

    let committed = s.get_letter(letter.id).await.map_err(|e| e.to_string())?;
    if committed.version != 1 {
        return Err(format!(
            "expected exactly one committed update (version 1), got version {}",
            committed.version
        ));
    }
    Ok(())
}

/// A snapshot whose update conflicts must leave the committed record exactly
/// as the winner wrote it.
async fn failed_update_leaves_committed_state_untouched<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let letter = seed_letter(&s, "308/SPB/2025").await?;

    // Winner marks the letter approved.
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let mut rec = s
        .get_letter_for_update(&mut snap, letter.id)
        .await
        .map_err(|e| e.to_string())?;
    rec.status = LetterStatus::Approved;
    s.update_letter(&mut snap, rec, 0)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    // Loser tries to mark it rejected from the stale version.
    let mut stale = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let mut rec = letter.clone();
    rec.status = LetterStatus::Rejected;
    let result = match s.update_letter(&mut stale, rec, 0).await {
        Ok(_) => s.commit_snapshot(stale).await,
        Err(e) => {
            let _ = s.abort_snapshot(stale).await;
            Err(e)
        }
    };
    if result.is_ok() {
        return Err("stale update should not commit".to_string());
    }

    let committed = s.get_letter(letter.id).await.map_err(|e| e.to_string())?;
    if committed.status != LetterStatus::Approved {
        return Err(format!(
            "expected status Approved from the winning update, got {:?}",
            committed.status
        ));
    }
    Ok(())
}
