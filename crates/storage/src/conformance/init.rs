use std::future::Future;

use super::{make_letter, make_role, make_unit, make_user, TestResult};
use crate::{ParafStorage, StorageError};

pub(super) async fn run_init_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "init",
        "insert_letter_commits_at_version_0",
        insert_letter_commits_at_version_0(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "inserted_letter_fields_roundtrip",
        inserted_letter_fields_roundtrip(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "insert_normalizes_nonzero_version",
        insert_normalizes_nonzero_version(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "duplicate_letter_rejected_in_same_snapshot",
        duplicate_letter_rejected_in_same_snapshot(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "duplicate_letter_rejected_across_snapshots",
        duplicate_letter_rejected_across_snapshots(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "already_exists_error_names_the_letter",
        already_exists_error_names_the_letter(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "directory_records_roundtrip",
        directory_records_roundtrip(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "user_requires_existing_role_and_unit",
        user_requires_existing_role_and_unit(factory).await,
    ));

    results
}

// ── Test implementations ──────────────────────────────────────────────────────

/// After insert + commit, the letter version must be 0.
async fn insert_letter_commits_at_version_0<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let letter = make_letter("001/SPB/2025");
    let id = letter.id;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_letter(&mut snap, letter)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let rec = s.get_letter(id).await.map_err(|e| e.to_string())?;
    if rec.version != 0 {
        return Err(format!("expected version 0, got {}", rec.version));
    }
    Ok(())
}

/// Persisted letter fields must match what was inserted.
async fn inserted_letter_fields_roundtrip<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let letter = make_letter("002/SPB/2025");
    let expected = letter.clone();

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_letter(&mut snap, letter)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let rec = s.get_letter(expected.id).await.map_err(|e| e.to_string())?;
    if rec.letter_number != expected.letter_number {
        return Err(format!(
            "expected letter_number \"{}\", got \"{}\"",
            expected.letter_number, rec.letter_number
        ));
    }
    if rec.status != expected.status {
        return Err(format!(
            "expected status {:?}, got {:?}",
            expected.status, rec.status
        ));
    }
    if rec.current_step != expected.current_step {
        return Err(format!(
            "expected current_step {:?}, got {:?}",
            expected.current_step, rec.current_step
        ));
    }
    if rec.nominal != expected.nominal {
        return Err(format!(
            "expected nominal {}, got {}",
            expected.nominal, rec.nominal
        ));
    }
    if rec.route.steps.len() != 3 {
        return Err(format!(
            "expected 3 route steps, got {}",
            rec.route.steps.len()
        ));
    }
    Ok(())
}

/// The backend owns the version counter: an insert carrying a nonzero
/// version must still land at version 0.
async fn insert_normalizes_nonzero_version<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut letter = make_letter("003/SPB/2025");
    letter.version = 7;
    let id = letter.id;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_letter(&mut snap, letter)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let rec = s.get_letter(id).await.map_err(|e| e.to_string())?;
    if rec.version != 0 {
        return Err(format!("expected version 0, got {}", rec.version));
    }
    Ok(())
}

/// Inserting the same letter id twice in one snapshot must return AlreadyExists.
async fn duplicate_letter_rejected_in_same_snapshot<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let letter = make_letter("004/SPB/2025");
    let dup = letter.clone();

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_letter(&mut snap, letter)
        .await
        .map_err(|e| e.to_string())?;
    let result = s.insert_letter(&mut snap, dup).await;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    match result {
        Err(ref e) if matches!(e, StorageError::AlreadyExists { .. }) => Ok(()),
        Err(e) => Err(format!("expected AlreadyExists, got: {e}")),
        Ok(()) => Err("expected AlreadyExists error, but got Ok".to_string()),
    }
}

/// Inserting the same letter id in a second snapshot after committing the
/// first must return AlreadyExists.
async fn duplicate_letter_rejected_across_snapshots<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let letter = make_letter("005/SPB/2025");
    let dup = letter.clone();

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_letter(&mut snap, letter)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut snap2 = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s.insert_letter(&mut snap2, dup).await;
    s.abort_snapshot(snap2).await.map_err(|e| e.to_string())?;

    match result {
        Err(ref e) if matches!(e, StorageError::AlreadyExists { .. }) => Ok(()),
        Err(e) => Err(format!("expected AlreadyExists, got: {e}")),
        Ok(()) => Err("expected AlreadyExists error, but got Ok".to_string()),
    }
}

/// The AlreadyExists error must carry the record kind and the colliding id.
async fn already_exists_error_names_the_letter<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let letter = make_letter("006/SPB/2025");
    let dup = letter.clone();
    let expected_id = letter.id;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_letter(&mut snap, letter)
        .await
        .map_err(|e| e.to_string())?;
    let result = s.insert_letter(&mut snap, dup).await;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    match result {
        Err(StorageError::AlreadyExists { kind, id }) => {
            if kind != "letter" {
                return Err(format!("expected kind \"letter\", got \"{kind}\""));
            }
            if id != expected_id {
                return Err(format!("expected id {expected_id}, got {id}"));
            }
            Ok(())
        }
        Err(e) => Err(format!("expected AlreadyExists, got: {e}")),
        Ok(()) => Err("expected AlreadyExists error, but got Ok".to_string()),
    }
}

/// Units, roles, and users commit together and read back by id.
async fn directory_records_roundtrip<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let unit = make_unit("Bagian Umum");
    let role = make_role("Kasubbag");
    let user = make_user("Sari", role.id, unit.id);

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_unit(&mut snap, unit.clone())
        .await
        .map_err(|e| e.to_string())?;
    s.insert_role(&mut snap, role.clone())
        .await
        .map_err(|e| e.to_string())?;
    s.insert_user(&mut snap, user.clone())
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let got_unit = s.get_unit(unit.id).await.map_err(|e| e.to_string())?;
    if got_unit.name != unit.name {
        return Err(format!(
            "expected unit name \"{}\", got \"{}\"",
            unit.name, got_unit.name
        ));
    }
    let got_user = s.get_user(user.id).await.map_err(|e| e.to_string())?;
    if got_user.role_id != role.id || got_user.unit_id != unit.id {
        return Err("user references do not match inserted role/unit".to_string());
    }
    let holders = s
        .list_users_by_role(role.id)
        .await
        .map_err(|e| e.to_string())?;
    if holders.len() != 1 || holders[0].id != user.id {
        return Err(format!("expected 1 role holder, got {}", holders.len()));
    }
    Ok(())
}

/// Inserting a user whose role does not exist must return RoleNotFound.
async fn user_requires_existing_role_and_unit<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let unit = make_unit("Bagian Keuangan");
    let role = make_role("Kabag");
    let orphan = make_user("Dewi", role.id, unit.id);

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s.insert_user(&mut snap, orphan).await;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    match result {
        Err(ref e) if matches!(e, StorageError::RoleNotFound { .. }) => Ok(()),
        Err(e) => Err(format!("expected RoleNotFound, got: {e}")),
        Ok(()) => Err("expected RoleNotFound error, but got Ok".to_string()),
    }
}
