//! Snapshot isolation conformance tests.
//!
//! Verifies that uncommitted writes are invisible outside a snapshot,
//! committed writes are visible, aborted writes are discarded, and a
//! snapshot reads its own staged writes.

use std::future::Future;

use super::{make_letter, make_rule, TestResult};
use crate::{LetterQuery, ParafStorage, StorageError};

pub(super) async fn run_snapshot_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "snapshot",
        "uncommitted_letter_invisible_to_get",
        uncommitted_letter_invisible_to_get(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "uncommitted_letter_invisible_to_list",
        uncommitted_letter_invisible_to_list(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "reads_do_not_block_while_snapshot_open",
        reads_do_not_block_while_snapshot_open(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "aborted_letter_discarded",
        aborted_letter_discarded(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "snapshot_reads_own_staged_insert",
        snapshot_reads_own_staged_insert(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "snapshot_reads_own_staged_update",
        snapshot_reads_own_staged_update(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "snapshots_do_not_see_each_other",
        snapshots_do_not_see_each_other(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "uncommitted_rule_invisible_to_list_rules",
        uncommitted_rule_invisible_to_list_rules(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "staged_rules_visible_inside_snapshot",
        staged_rules_visible_inside_snapshot(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "staged_rule_delete_hides_rule_inside_snapshot",
        staged_rule_delete_hides_rule_inside_snapshot(factory).await,
    ));

    results
}

// ── Test implementations ──────────────────────────────────────────────────────

/// A letter staged in an open snapshot must not be visible to get_letter.
async fn uncommitted_letter_invisible_to_get<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let letter = make_letter("101/SPB/2025");
    let id = letter.id;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_letter(&mut snap, letter)
        .await
        .map_err(|e| e.to_string())?;

    // Snapshot is still open -- the letter must not leak out.
    let result = s.get_letter(id).await;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    match result {
        Err(ref e) if matches!(e, StorageError::LetterNotFound { .. }) => Ok(()),
        Err(e) => Err(format!("expected LetterNotFound, got: {e}")),
        Ok(_) => Err("letter should not be visible before commit".to_string()),
    }
}

/// A staged letter must not appear in list_letters or its count.
async fn uncommitted_letter_invisible_to_list<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let letter = make_letter("102/SPB/2025");

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_letter(&mut snap, letter)
        .await
        .map_err(|e| e.to_string())?;

    let (items, total) = s
        .list_letters(&LetterQuery::default(), 0, 0)
        .await
        .map_err(|e| e.to_string())?;
    let count = s
        .count_letters(&LetterQuery::default())
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    if !items.is_empty() || total != 0 || count != 0 {
        return Err(format!(
            "expected empty listing, got {} items (total {total}, count {count})",
            items.len()
        ));
    }
    Ok(())
}

/// Committed data stays readable while an unrelated snapshot is open.
/// Read paths must not block on open snapshots.
async fn reads_do_not_block_while_snapshot_open<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let committed = make_letter("103/SPB/2025");
    let committed_id = committed.id;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_letter(&mut snap, committed)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut open = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_letter(&mut open, make_letter("104/SPB/2025"))
        .await
        .map_err(|e| e.to_string())?;

    // The earlier commit must be readable right now.
    let rec = s.get_letter(committed_id).await.map_err(|e| e.to_string())?;
    s.abort_snapshot(open).await.map_err(|e| e.to_string())?;

    if rec.id != committed_id {
        return Err("read returned the wrong letter".to_string());
    }
    Ok(())
}

/// After insert + abort, the letter must not exist.
async fn aborted_letter_discarded<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let letter = make_letter("105/SPB/2025");
    let id = letter.id;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_letter(&mut snap, letter)
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    match s.get_letter(id).await {
        Err(ref e) if matches!(e, StorageError::LetterNotFound { .. }) => Ok(()),
        Err(e) => Err(format!("expected LetterNotFound, got: {e}")),
        Ok(_) => Err("letter should not be visible after abort".to_string()),
    }
}

/// get_letter_for_update must see a letter staged earlier in the same snapshot.
async fn snapshot_reads_own_staged_insert<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let letter = make_letter("106/SPB/2025");
    let id = letter.id;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_letter(&mut snap, letter)
        .await
        .map_err(|e| e.to_string())?;
    let rec = s
        .get_letter_for_update(&mut snap, id)
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    if rec.id != id {
        return Err("staged letter not visible within its own snapshot".to_string());
    }
    Ok(())
}

/// A staged update must be reflected by a later read in the same snapshot.
async fn snapshot_reads_own_staged_update<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let letter = make_letter("107/SPB/2025");
    let id = letter.id;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_letter(&mut snap, letter)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut snap2 = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let mut rec = s
        .get_letter_for_update(&mut snap2, id)
        .await
        .map_err(|e| e.to_string())?;
    rec.letter_about = "updated subject".to_string();
    let new_version = s
        .update_letter(&mut snap2, rec, 0)
        .await
        .map_err(|e| e.to_string())?;
    let reread = s
        .get_letter_for_update(&mut snap2, id)
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap2).await.map_err(|e| e.to_string())?;

    if reread.letter_about != "updated subject" {
        return Err(format!(
            "expected staged update to be visible, got \"{}\"",
            reread.letter_about
        ));
    }
    if reread.version != new_version {
        return Err(format!(
            "expected staged version {new_version}, got {}",
            reread.version
        ));
    }
    Ok(())
}

/// A letter staged in one snapshot must be invisible to another open snapshot.
async fn snapshots_do_not_see_each_other<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let letter = make_letter("108/SPB/2025");
    let id = letter.id;

    let mut snap_a = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let mut snap_b = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_letter(&mut snap_a, letter)
        .await
        .map_err(|e| e.to_string())?;

    let result = s.get_letter_for_update(&mut snap_b, id).await;
    s.abort_snapshot(snap_a).await.map_err(|e| e.to_string())?;
    s.abort_snapshot(snap_b).await.map_err(|e| e.to_string())?;

    match result {
        Err(ref e) if matches!(e, StorageError::LetterNotFound { .. }) => Ok(()),
        Err(e) => Err(format!("expected LetterNotFound, got: {e}")),
        Ok(_) => Err("snapshot b saw a letter staged only in snapshot a".to_string()),
    }
}

/// A rule staged in an open snapshot must not appear in the committed listing.
async fn uncommitted_rule_invisible_to_list_rules<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let rule = make_rule("kecil", 0, Some(50_000_000));

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_rule(&mut snap, rule).await.map_err(|e| e.to_string())?;
    let (rules, total) = s.list_rules(0, 0).await.map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    if !rules.is_empty() || total != 0 {
        return Err(format!("expected no committed rules, got {}", rules.len()));
    }
    Ok(())
}

/// list_rules_in must overlay staged inserts over the committed rule set.
async fn staged_rules_visible_inside_snapshot<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let committed = make_rule("kecil", 0, Some(50_000_000));
    let committed_id = committed.id;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_rule(&mut snap, committed)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut snap2 = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let staged = make_rule("besar", 50_000_001, None);
    let staged_id = staged.id;
    s.insert_rule(&mut snap2, staged)
        .await
        .map_err(|e| e.to_string())?;
    let view = s.list_rules_in(&mut snap2).await.map_err(|e| e.to_string())?;
    s.abort_snapshot(snap2).await.map_err(|e| e.to_string())?;

    if view.len() != 2 {
        return Err(format!("expected 2 rules in snapshot view, got {}", view.len()));
    }
    if !view.iter().any(|r| r.id == committed_id) || !view.iter().any(|r| r.id == staged_id) {
        return Err("snapshot view is missing a committed or staged rule".to_string());
    }
    Ok(())
}

/// A staged delete must hide the rule from the snapshot view while the
/// committed listing still shows it.
async fn staged_rule_delete_hides_rule_inside_snapshot<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let rule = make_rule("sedang", 10_000_000, Some(100_000_000));
    let id = rule.id;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_rule(&mut snap, rule).await.map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut snap2 = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.delete_rule(&mut snap2, id).await.map_err(|e| e.to_string())?;
    let view = s.list_rules_in(&mut snap2).await.map_err(|e| e.to_string())?;
    let (committed, _) = s.list_rules(0, 0).await.map_err(|e| e.to_string())?;
    s.abort_snapshot(snap2).await.map_err(|e| e.to_string())?;

    if !view.is_empty() {
        return Err("deleted rule still present in snapshot view".to_string());
    }
    if committed.len() != 1 {
        return Err("staged delete leaked into committed listing".to_string());
    }
    Ok(())
}
