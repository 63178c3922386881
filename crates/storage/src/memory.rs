//! In-memory reference backend for `ParafStorage`.
//!
//! Snapshots stage their writes locally and apply them under a single lock
//! at commit time, re-validating every OCC expectation and staged rule
//! range against the committed state. Non-snapshot reads therefore never
//! block on an open snapshot, uncommitted writes stay invisible, and of
//! two racing letter updates (or overlapping rule saves) exactly one
//! commits.
//!
//! Intended for tests, `paraf serve`'s default store, and as the semantic
//! model a SQL backend must match (the conformance suite pins it down).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::StorageError;
use crate::record::{
    LetterRecord, LogRecord, RoleRecord, RuleRecord, UnitRecord, UserRecord,
};
use crate::traits::{LetterQuery, ParafStorage};

/// Committed state. Cloned as scratch space during commit so a failed
/// commit leaves nothing behind.
#[derive(Default, Clone)]
struct MemoryInner {
    letters: HashMap<Uuid, LetterRecord>,
    /// Log entries per letter in append order; `seq` equals the index.
    logs: HashMap<Uuid, Vec<LogRecord>>,
    rules: HashMap<Uuid, RuleRecord>,
    units: HashMap<Uuid, UnitRecord>,
    roles: HashMap<Uuid, RoleRecord>,
    users: HashMap<Uuid, UserRecord>,
}

/// One staged write, applied in order at commit.
enum StagedWrite {
    InsertLetter(LetterRecord),
    UpdateLetter {
        record: LetterRecord,
        expected_version: i64,
    },
    AppendLog(LogRecord),
    InsertRule(RuleRecord),
    UpdateRule(RuleRecord),
    DeleteRule(Uuid),
    InsertUnit(UnitRecord),
    InsertRole(RoleRecord),
    InsertUser(UserRecord),
}

/// An open transaction: a buffered write set.
///
/// Dropping a snapshot without committing discards it, which is exactly
/// rollback for a buffered write set.
pub struct MemorySnapshot {
    staged: Vec<StagedWrite>,
}

impl MemorySnapshot {
    /// The letter as this snapshot sees it, if this snapshot wrote it.
    fn staged_letter(&self, letter_id: Uuid) -> Option<&LetterRecord> {
        self.staged.iter().rev().find_map(|w| match w {
            StagedWrite::InsertLetter(r) if r.id == letter_id => Some(r),
            StagedWrite::UpdateLetter { record, .. } if record.id == letter_id => Some(record),
            _ => None,
        })
    }

    fn staged_log_count(&self, letter_id: Uuid) -> usize {
        self.staged
            .iter()
            .filter(|w| matches!(w, StagedWrite::AppendLog(r) if r.letter_id == letter_id))
            .count()
    }

    /// Rule set as this snapshot sees it: committed rules with staged
    /// inserts, updates, and deletes applied in order.
    fn rules_view(&self, committed: &HashMap<Uuid, RuleRecord>) -> Vec<RuleRecord> {
        let mut view = committed.clone();
        for w in &self.staged {
            match w {
                StagedWrite::InsertRule(r) | StagedWrite::UpdateRule(r) => {
                    view.insert(r.id, r.clone());
                }
                StagedWrite::DeleteRule(id) => {
                    view.remove(id);
                }
                _ => {}
            }
        }
        let mut rules: Vec<RuleRecord> = view.into_values().collect();
        rules.sort_by(|a, b| a.min_amount.cmp(&b.min_amount).then(a.id.cmp(&b.id)));
        rules
    }

    fn rule_in_view(&self, committed: &HashMap<Uuid, RuleRecord>, rule_id: Uuid) -> bool {
        self.rules_view(committed).iter().any(|r| r.id == rule_id)
    }

    fn unit_in_view(&self, committed: &HashMap<Uuid, UnitRecord>, unit_id: Uuid) -> bool {
        committed.contains_key(&unit_id)
            || self
                .staged
                .iter()
                .any(|w| matches!(w, StagedWrite::InsertUnit(r) if r.id == unit_id))
    }

    fn role_in_view(&self, committed: &HashMap<Uuid, RoleRecord>, role_id: Uuid) -> bool {
        committed.contains_key(&role_id)
            || self
                .staged
                .iter()
                .any(|w| matches!(w, StagedWrite::InsertRole(r) if r.id == role_id))
    }

    fn user_in_view(&self, committed: &HashMap<Uuid, UserRecord>, user_id: Uuid) -> bool {
        committed.contains_key(&user_id)
            || self
                .staged
                .iter()
                .any(|w| matches!(w, StagedWrite::InsertUser(r) if r.id == user_id))
    }
}

/// In-memory `ParafStorage` backend.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_inner(&self) -> Result<MutexGuard<'_, MemoryInner>, StorageError> {
        self.inner
            .lock()
            .map_err(|_| StorageError::Backend("poisoned store lock".to_string()))
    }
}

/// Whether two inclusive amount ranges share at least one point (`None`
/// max = unbounded).
fn ranges_intersect(
    a_min: Decimal,
    a_max: Option<Decimal>,
    b_min: Decimal,
    b_max: Option<Decimal>,
) -> bool {
    let a_before_b = matches!(a_max, Some(max) if max < b_min);
    let b_before_a = matches!(b_max, Some(max) if max < a_min);
    !(a_before_b || b_before_a)
}

/// Re-validate a staged rule's range against the rule set the commit is
/// building. Catches rules committed between this snapshot's reads and its
/// commit; two racing rule saves with intersecting ranges therefore have
/// exactly one winner, same as letter OCC.
fn check_rule_range(
    rules: &HashMap<Uuid, RuleRecord>,
    record: &RuleRecord,
) -> Result<(), StorageError> {
    let collides = rules.values().any(|r| {
        r.id != record.id
            && ranges_intersect(
                r.min_amount,
                r.max_amount,
                record.min_amount,
                record.max_amount,
            )
    });
    if collides {
        return Err(StorageError::RuleRangeConflict { rule_id: record.id });
    }
    Ok(())
}

/// Apply one staged write to the scratch copy, with full validation.
fn apply_write(work: &mut MemoryInner, write: StagedWrite) -> Result<(), StorageError> {
    match write {
        StagedWrite::InsertLetter(mut record) => {
            if work.letters.contains_key(&record.id) {
                return Err(StorageError::AlreadyExists {
                    kind: "letter",
                    id: record.id,
                });
            }
            record.version = 0;
            work.logs.entry(record.id).or_default();
            work.letters.insert(record.id, record);
        }
        StagedWrite::UpdateLetter {
            mut record,
            expected_version,
        } => {
            let current = work
                .letters
                .get(&record.id)
                .ok_or(StorageError::LetterNotFound {
                    letter_id: record.id,
                })?;
            if current.version != expected_version {
                return Err(StorageError::ConcurrentConflict {
                    letter_id: record.id,
                    expected_version,
                });
            }
            record.version = expected_version + 1;
            work.letters.insert(record.id, record);
        }
        StagedWrite::AppendLog(mut record) => {
            if !work.letters.contains_key(&record.letter_id) {
                return Err(StorageError::LetterNotFound {
                    letter_id: record.letter_id,
                });
            }
            let entries = work.logs.entry(record.letter_id).or_default();
            record.seq = entries.len() as i64;
            entries.push(record);
        }
        StagedWrite::InsertRule(record) => {
            if work.rules.contains_key(&record.id) {
                return Err(StorageError::AlreadyExists {
                    kind: "rule",
                    id: record.id,
                });
            }
            check_rule_range(&work.rules, &record)?;
            work.rules.insert(record.id, record);
        }
        StagedWrite::UpdateRule(record) => {
            if !work.rules.contains_key(&record.id) {
                return Err(StorageError::RuleNotFound { rule_id: record.id });
            }
            check_rule_range(&work.rules, &record)?;
            work.rules.insert(record.id, record);
        }
        StagedWrite::DeleteRule(rule_id) => {
            if work.rules.remove(&rule_id).is_none() {
                return Err(StorageError::RuleNotFound { rule_id });
            }
        }
        StagedWrite::InsertUnit(record) => {
            if work.units.contains_key(&record.id) {
                return Err(StorageError::AlreadyExists {
                    kind: "unit",
                    id: record.id,
                });
            }
            work.units.insert(record.id, record);
        }
        StagedWrite::InsertRole(record) => {
            if work.roles.contains_key(&record.id) {
                return Err(StorageError::AlreadyExists {
                    kind: "role",
                    id: record.id,
                });
            }
            work.roles.insert(record.id, record);
        }
        StagedWrite::InsertUser(record) => {
            if work.users.contains_key(&record.id) {
                return Err(StorageError::AlreadyExists {
                    kind: "user",
                    id: record.id,
                });
            }
            if !work.roles.contains_key(&record.role_id) {
                return Err(StorageError::RoleNotFound {
                    role_id: record.role_id,
                });
            }
            if !work.units.contains_key(&record.unit_id) {
                return Err(StorageError::UnitNotFound {
                    unit_id: record.unit_id,
                });
            }
            work.users.insert(record.id, record);
        }
    }
    Ok(())
}

/// Slice `items` to `(page, total)` where `limit` 0 means no limit.
fn page_of<T: Clone>(items: Vec<T>, offset: usize, limit: usize) -> (Vec<T>, usize) {
    let total = items.len();
    let page: Vec<T> = if limit == 0 {
        items.into_iter().skip(offset).collect()
    } else {
        items.into_iter().skip(offset).take(limit).collect()
    };
    (page, total)
}

fn matches_query(letter: &LetterRecord, query: &LetterQuery) -> bool {
    if let Some(unit_id) = query.unit_id {
        if letter.unit_id != unit_id {
            return false;
        }
    }
    if let Some(status) = query.status {
        if letter.status != status {
            return false;
        }
    }
    if let Some(created_by) = query.created_by {
        if letter.created_by != created_by {
            return false;
        }
    }
    if let Some(ref search) = query.search {
        let needle = search.to_lowercase();
        if !needle.is_empty()
            && !letter.letter_number.to_lowercase().contains(&needle)
            && !letter.letter_about.to_lowercase().contains(&needle)
        {
            return false;
        }
    }
    true
}

fn newest_first(letters: &mut [LetterRecord]) {
    letters.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

#[async_trait]
impl ParafStorage for MemoryStore {
    type Snapshot = MemorySnapshot;

    // ── Snapshot lifecycle ────────────────────────────────────────────────────

    async fn begin_snapshot(&self) -> Result<Self::Snapshot, StorageError> {
        Ok(MemorySnapshot { staged: Vec::new() })
    }

    async fn commit_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError> {
        let mut inner = self.lock_inner()?;
        // Validate and apply against a scratch copy; swap in only on full
        // success so a failed commit leaves the store untouched.
        let mut work = inner.clone();
        for write in snapshot.staged {
            apply_write(&mut work, write)?;
        }
        *inner = work;
        Ok(())
    }

    async fn abort_snapshot(&self, _snapshot: Self::Snapshot) -> Result<(), StorageError> {
        // Dropping the write set is the rollback.
        Ok(())
    }

    // ── Letter operations (within snapshot) ───────────────────────────────────

    async fn insert_letter(
        &self,
        snapshot: &mut Self::Snapshot,
        mut record: LetterRecord,
    ) -> Result<(), StorageError> {
        let inner = self.lock_inner()?;
        if inner.letters.contains_key(&record.id) || snapshot.staged_letter(record.id).is_some() {
            return Err(StorageError::AlreadyExists {
                kind: "letter",
                id: record.id,
            });
        }
        drop(inner);
        record.version = 0;
        snapshot.staged.push(StagedWrite::InsertLetter(record));
        Ok(())
    }

    async fn get_letter_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        letter_id: Uuid,
    ) -> Result<LetterRecord, StorageError> {
        if let Some(staged) = snapshot.staged_letter(letter_id) {
            return Ok(staged.clone());
        }
        let inner = self.lock_inner()?;
        inner
            .letters
            .get(&letter_id)
            .cloned()
            .ok_or(StorageError::LetterNotFound { letter_id })
    }

    async fn update_letter(
        &self,
        snapshot: &mut Self::Snapshot,
        mut record: LetterRecord,
        expected_version: i64,
    ) -> Result<i64, StorageError> {
        // Fast-fail against the currently visible version. The commit-time
        // re-check is the authoritative one for true races.
        let current_version = match snapshot.staged_letter(record.id) {
            Some(staged) => staged.version,
            None => {
                let inner = self.lock_inner()?;
                inner
                    .letters
                    .get(&record.id)
                    .ok_or(StorageError::LetterNotFound {
                        letter_id: record.id,
                    })?
                    .version
            }
        };
        if current_version != expected_version {
            return Err(StorageError::ConcurrentConflict {
                letter_id: record.id,
                expected_version,
            });
        }
        let new_version = expected_version + 1;
        record.version = new_version;
        snapshot.staged.push(StagedWrite::UpdateLetter {
            record,
            expected_version,
        });
        Ok(new_version)
    }

    async fn append_log(
        &self,
        snapshot: &mut Self::Snapshot,
        mut record: LogRecord,
    ) -> Result<i64, StorageError> {
        let committed_count = {
            let inner = self.lock_inner()?;
            if snapshot.staged_letter(record.letter_id).is_none()
                && !inner.letters.contains_key(&record.letter_id)
            {
                return Err(StorageError::LetterNotFound {
                    letter_id: record.letter_id,
                });
            }
            inner
                .logs
                .get(&record.letter_id)
                .map(|entries| entries.len())
                .unwrap_or(0)
        };
        let seq = (committed_count + snapshot.staged_log_count(record.letter_id)) as i64;
        record.seq = seq;
        snapshot.staged.push(StagedWrite::AppendLog(record));
        Ok(seq)
    }

    // ── Rule operations ───────────────────────────────────────────────────────

    async fn insert_rule(
        &self,
        snapshot: &mut Self::Snapshot,
        record: RuleRecord,
    ) -> Result<(), StorageError> {
        let inner = self.lock_inner()?;
        if snapshot.rule_in_view(&inner.rules, record.id) {
            return Err(StorageError::AlreadyExists {
                kind: "rule",
                id: record.id,
            });
        }
        drop(inner);
        snapshot.staged.push(StagedWrite::InsertRule(record));
        Ok(())
    }

    async fn update_rule(
        &self,
        snapshot: &mut Self::Snapshot,
        record: RuleRecord,
    ) -> Result<(), StorageError> {
        let inner = self.lock_inner()?;
        if !snapshot.rule_in_view(&inner.rules, record.id) {
            return Err(StorageError::RuleNotFound { rule_id: record.id });
        }
        drop(inner);
        snapshot.staged.push(StagedWrite::UpdateRule(record));
        Ok(())
    }

    async fn delete_rule(
        &self,
        snapshot: &mut Self::Snapshot,
        rule_id: Uuid,
    ) -> Result<(), StorageError> {
        let inner = self.lock_inner()?;
        if !snapshot.rule_in_view(&inner.rules, rule_id) {
            return Err(StorageError::RuleNotFound { rule_id });
        }
        drop(inner);
        snapshot.staged.push(StagedWrite::DeleteRule(rule_id));
        Ok(())
    }

    async fn list_rules_in(
        &self,
        snapshot: &mut Self::Snapshot,
    ) -> Result<Vec<RuleRecord>, StorageError> {
        let inner = self.lock_inner()?;
        Ok(snapshot.rules_view(&inner.rules))
    }

    async fn get_rule(&self, rule_id: Uuid) -> Result<RuleRecord, StorageError> {
        let inner = self.lock_inner()?;
        inner
            .rules
            .get(&rule_id)
            .cloned()
            .ok_or(StorageError::RuleNotFound { rule_id })
    }

    async fn list_rules(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<RuleRecord>, usize), StorageError> {
        let inner = self.lock_inner()?;
        let mut rules: Vec<RuleRecord> = inner.rules.values().cloned().collect();
        rules.sort_by(|a, b| a.min_amount.cmp(&b.min_amount).then(a.id.cmp(&b.id)));
        Ok(page_of(rules, offset, limit))
    }

    // ── Directory operations ──────────────────────────────────────────────────

    async fn insert_unit(
        &self,
        snapshot: &mut Self::Snapshot,
        record: UnitRecord,
    ) -> Result<(), StorageError> {
        let inner = self.lock_inner()?;
        if snapshot.unit_in_view(&inner.units, record.id) {
            return Err(StorageError::AlreadyExists {
                kind: "unit",
                id: record.id,
            });
        }
        drop(inner);
        snapshot.staged.push(StagedWrite::InsertUnit(record));
        Ok(())
    }

    async fn insert_role(
        &self,
        snapshot: &mut Self::Snapshot,
        record: RoleRecord,
    ) -> Result<(), StorageError> {
        let inner = self.lock_inner()?;
        if snapshot.role_in_view(&inner.roles, record.id) {
            return Err(StorageError::AlreadyExists {
                kind: "role",
                id: record.id,
            });
        }
        drop(inner);
        snapshot.staged.push(StagedWrite::InsertRole(record));
        Ok(())
    }

    async fn insert_user(
        &self,
        snapshot: &mut Self::Snapshot,
        record: UserRecord,
    ) -> Result<(), StorageError> {
        let inner = self.lock_inner()?;
        if snapshot.user_in_view(&inner.users, record.id) {
            return Err(StorageError::AlreadyExists {
                kind: "user",
                id: record.id,
            });
        }
        if !snapshot.role_in_view(&inner.roles, record.role_id) {
            return Err(StorageError::RoleNotFound {
                role_id: record.role_id,
            });
        }
        if !snapshot.unit_in_view(&inner.units, record.unit_id) {
            return Err(StorageError::UnitNotFound {
                unit_id: record.unit_id,
            });
        }
        drop(inner);
        snapshot.staged.push(StagedWrite::InsertUser(record));
        Ok(())
    }

    async fn get_unit(&self, unit_id: Uuid) -> Result<UnitRecord, StorageError> {
        let inner = self.lock_inner()?;
        inner
            .units
            .get(&unit_id)
            .cloned()
            .ok_or(StorageError::UnitNotFound { unit_id })
    }

    async fn get_role(&self, role_id: Uuid) -> Result<RoleRecord, StorageError> {
        let inner = self.lock_inner()?;
        inner
            .roles
            .get(&role_id)
            .cloned()
            .ok_or(StorageError::RoleNotFound { role_id })
    }

    async fn get_user(&self, user_id: Uuid) -> Result<UserRecord, StorageError> {
        let inner = self.lock_inner()?;
        inner
            .users
            .get(&user_id)
            .cloned()
            .ok_or(StorageError::UserNotFound { user_id })
    }

    async fn list_units(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<UnitRecord>, usize), StorageError> {
        let inner = self.lock_inner()?;
        let mut units: Vec<UnitRecord> = inner.units.values().cloned().collect();
        units.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(page_of(units, offset, limit))
    }

    async fn list_roles(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<RoleRecord>, usize), StorageError> {
        let inner = self.lock_inner()?;
        let mut roles: Vec<RoleRecord> = inner.roles.values().cloned().collect();
        roles.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(page_of(roles, offset, limit))
    }

    async fn list_users(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<UserRecord>, usize), StorageError> {
        let inner = self.lock_inner()?;
        let mut users: Vec<UserRecord> = inner.users.values().cloned().collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(page_of(users, offset, limit))
    }

    async fn list_users_by_role(&self, role_id: Uuid) -> Result<Vec<UserRecord>, StorageError> {
        let inner = self.lock_inner()?;
        let mut users: Vec<UserRecord> = inner
            .users
            .values()
            .filter(|u| u.role_id == role_id)
            .cloned()
            .collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(users)
    }

    // ── Query operations (committed data only) ────────────────────────────────

    async fn get_letter(&self, letter_id: Uuid) -> Result<LetterRecord, StorageError> {
        let inner = self.lock_inner()?;
        inner
            .letters
            .get(&letter_id)
            .cloned()
            .ok_or(StorageError::LetterNotFound { letter_id })
    }

    async fn list_letters(
        &self,
        query: &LetterQuery,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<LetterRecord>, usize), StorageError> {
        let inner = self.lock_inner()?;
        let mut letters: Vec<LetterRecord> = inner
            .letters
            .values()
            .filter(|l| matches_query(l, query))
            .cloned()
            .collect();
        newest_first(&mut letters);
        Ok(page_of(letters, offset, limit))
    }

    async fn count_letters(&self, query: &LetterQuery) -> Result<usize, StorageError> {
        let inner = self.lock_inner()?;
        Ok(inner
            .letters
            .values()
            .filter(|l| matches_query(l, query))
            .count())
    }

    async fn list_logs(&self, letter_id: Uuid) -> Result<Vec<LogRecord>, StorageError> {
        let inner = self.lock_inner()?;
        if !inner.letters.contains_key(&letter_id) {
            return Err(StorageError::LetterNotFound { letter_id });
        }
        let mut entries = inner.logs.get(&letter_id).cloned().unwrap_or_default();
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.seq.cmp(&b.seq)));
        Ok(entries)
    }

    async fn list_letters_decided_by(
        &self,
        user_id: Uuid,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<LetterRecord>, usize), StorageError> {
        let inner = self.lock_inner()?;
        let mut letters: Vec<LetterRecord> = inner
            .letters
            .values()
            .filter(|l| {
                inner
                    .logs
                    .get(&l.id)
                    .map(|entries| {
                        entries
                            .iter()
                            .any(|e| e.actor_id == user_id && e.action.is_decision())
                    })
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        newest_first(&mut letters);
        Ok(page_of(letters, offset, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{
        now_iso8601, LetterStatus, LogAction, RouteSnapshot, RouteStep, StepKind,
    };
    use rust_decimal::Decimal;

    fn make_route() -> RouteSnapshot {
        RouteSnapshot {
            rule_id: Uuid::new_v4(),
            rule_name: "standard".to_string(),
            steps: StepKind::all()
                .iter()
                .map(|k| RouteStep {
                    step_type: *k,
                    role_id: Uuid::new_v4(),
                })
                .collect(),
        }
    }

    fn make_letter(number: &str, created_at: &str) -> LetterRecord {
        LetterRecord {
            id: Uuid::new_v4(),
            letter_number: number.to_string(),
            letter_about: "pengadaan ATK".to_string(),
            nominal: Decimal::new(10_000_000, 0),
            incoming_letter_date: "2025-03-01".to_string(),
            unit_id: Uuid::new_v4(),
            letter_file: "abc.pdf".to_string(),
            status: LetterStatus::PendingReview,
            current_step: StepKind::Review,
            route: make_route(),
            created_by: Uuid::new_v4(),
            created_at: created_at.to_string(),
            updated_at: created_at.to_string(),
            version: 0,
        }
    }

    fn make_log(letter_id: Uuid, actor_id: Uuid, action: LogAction) -> LogRecord {
        LogRecord {
            id: Uuid::new_v4(),
            letter_id,
            seq: 0,
            action,
            actor_id,
            comment: None,
            timestamp: now_iso8601(),
        }
    }

    async fn commit_letter(store: &MemoryStore, letter: LetterRecord) {
        let mut snap = store.begin_snapshot().await.unwrap();
        store.insert_letter(&mut snap, letter.clone()).await.unwrap();
        store
            .append_log(&mut snap, make_log(letter.id, letter.created_by, LogAction::Created))
            .await
            .unwrap();
        store.commit_snapshot(snap).await.unwrap();
    }

    #[tokio::test]
    async fn list_letters_newest_first_with_search() {
        let store = MemoryStore::new();
        let older = make_letter("001/SPB/2025", "2025-01-01T08:00:00Z");
        let newer = make_letter("002/SPB/2025", "2025-02-01T08:00:00Z");
        commit_letter(&store, older.clone()).await;
        commit_letter(&store, newer.clone()).await;

        let (all, total) = store
            .list_letters(&LetterQuery::default(), 0, 0)
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(all[0].id, newer.id);
        assert_eq!(all[1].id, older.id);

        let query = LetterQuery {
            search: Some("001/spb".to_string()),
            ..Default::default()
        };
        let (found, total) = store.list_letters(&query, 0, 0).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(found[0].id, older.id);
    }

    #[tokio::test]
    async fn log_seq_is_per_letter_and_monotonic() {
        let store = MemoryStore::new();
        let letter = make_letter("003/SPB/2025", "2025-03-01T08:00:00Z");
        let actor = letter.created_by;
        commit_letter(&store, letter.clone()).await;

        let mut snap = store.begin_snapshot().await.unwrap();
        let s1 = store
            .append_log(&mut snap, make_log(letter.id, actor, LogAction::Submitted))
            .await
            .unwrap();
        let s2 = store
            .append_log(&mut snap, make_log(letter.id, actor, LogAction::Reviewed))
            .await
            .unwrap();
        store.commit_snapshot(snap).await.unwrap();

        assert_eq!(s1, 1);
        assert_eq!(s2, 2);
        let logs = store.list_logs(letter.id).await.unwrap();
        let seqs: Vec<i64> = logs.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn stale_version_rejected_at_update_call() {
        let store = MemoryStore::new();
        let letter = make_letter("004/SPB/2025", "2025-03-01T08:00:00Z");
        commit_letter(&store, letter.clone()).await;

        // Bump the letter once.
        let mut snap = store.begin_snapshot().await.unwrap();
        let current = store
            .get_letter_for_update(&mut snap, letter.id)
            .await
            .unwrap();
        store
            .update_letter(&mut snap, current.clone(), current.version)
            .await
            .unwrap();
        store.commit_snapshot(snap).await.unwrap();

        // An update still expecting version 0 must fail.
        let mut stale = store.begin_snapshot().await.unwrap();
        let err = store
            .update_letter(&mut stale, current, 0)
            .await
            .unwrap_err();
        match err {
            StorageError::ConcurrentConflict {
                letter_id,
                expected_version,
            } => {
                assert_eq!(letter_id, letter.id);
                assert_eq!(expected_version, 0);
            }
            other => panic!("expected ConcurrentConflict, got {other:?}"),
        }
        store.abort_snapshot(stale).await.unwrap();
    }

    #[tokio::test]
    async fn decided_by_joins_logs_to_letters() {
        let store = MemoryStore::new();
        let letter = make_letter("005/SPB/2025", "2025-03-01T08:00:00Z");
        let reviewer = Uuid::new_v4();
        commit_letter(&store, letter.clone()).await;

        // A non-decision entry does not place the letter in history.
        let mut snap = store.begin_snapshot().await.unwrap();
        store
            .append_log(
                &mut snap,
                make_log(letter.id, reviewer, LogAction::Commented),
            )
            .await
            .unwrap();
        store.commit_snapshot(snap).await.unwrap();
        let (history, total) = store.list_letters_decided_by(reviewer, 0, 0).await.unwrap();
        assert!(history.is_empty());
        assert_eq!(total, 0);

        let mut snap = store.begin_snapshot().await.unwrap();
        store
            .append_log(&mut snap, make_log(letter.id, reviewer, LogAction::Reviewed))
            .await
            .unwrap();
        store.commit_snapshot(snap).await.unwrap();
        let (history, total) = store.list_letters_decided_by(reviewer, 0, 0).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(history[0].id, letter.id);
    }

    #[tokio::test]
    async fn user_insert_enforces_role_and_unit_references() {
        let store = MemoryStore::new();
        let role = RoleRecord {
            id: Uuid::new_v4(),
            name: "Staf".to_string(),
            created_at: now_iso8601(),
        };
        let unit = UnitRecord {
            id: Uuid::new_v4(),
            name: "Bagian Umum".to_string(),
            created_at: now_iso8601(),
        };

        // Missing role reference fails before anything is staged deeper.
        let mut snap = store.begin_snapshot().await.unwrap();
        let err = store
            .insert_user(
                &mut snap,
                UserRecord {
                    id: Uuid::new_v4(),
                    name: "Budi".to_string(),
                    role_id: role.id,
                    unit_id: unit.id,
                    created_at: now_iso8601(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::RoleNotFound { .. }));
        store.abort_snapshot(snap).await.unwrap();

        // Role and unit staged in the same snapshot satisfy the reference.
        let mut snap = store.begin_snapshot().await.unwrap();
        store.insert_role(&mut snap, role.clone()).await.unwrap();
        store.insert_unit(&mut snap, unit.clone()).await.unwrap();
        store
            .insert_user(
                &mut snap,
                UserRecord {
                    id: Uuid::new_v4(),
                    name: "Budi".to_string(),
                    role_id: role.id,
                    unit_id: unit.id,
                    created_at: now_iso8601(),
                },
            )
            .await
            .unwrap();
        store.commit_snapshot(snap).await.unwrap();

        let holders = store.list_users_by_role(role.id).await.unwrap();
        assert_eq!(holders.len(), 1);
        assert_eq!(holders[0].name, "Budi");
    }

    #[tokio::test]
    async fn rules_view_applies_staged_writes() {
        let store = MemoryStore::new();
        let rule = RuleRecord {
            id: Uuid::new_v4(),
            name: "kecil".to_string(),
            min_amount: Decimal::ZERO,
            max_amount: Some(Decimal::new(50_000_000, 0)),
            steps: Vec::new(),
            created_at: now_iso8601(),
            updated_at: now_iso8601(),
        };
        let mut snap = store.begin_snapshot().await.unwrap();
        store.insert_rule(&mut snap, rule.clone()).await.unwrap();

        // Visible inside the snapshot, invisible outside it.
        let in_view = store.list_rules_in(&mut snap).await.unwrap();
        assert_eq!(in_view.len(), 1);
        let (committed, _) = store.list_rules(0, 0).await.unwrap();
        assert!(committed.is_empty());

        store.delete_rule(&mut snap, rule.id).await.unwrap();
        let in_view = store.list_rules_in(&mut snap).await.unwrap();
        assert!(in_view.is_empty());
        store.commit_snapshot(snap).await.unwrap();
    }

    fn make_rule(name: &str, min: i64, max: Option<i64>) -> RuleRecord {
        RuleRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            min_amount: Decimal::from(min),
            max_amount: max.map(Decimal::from),
            steps: Vec::new(),
            created_at: now_iso8601(),
            updated_at: now_iso8601(),
        }
    }

    #[tokio::test]
    async fn interleaved_rule_inserts_cannot_both_commit_overlap() {
        let store = MemoryStore::new();

        // Both snapshots read an empty rule set, then stage intersecting
        // ranges. The commit-time range check must fail the second commit.
        let mut first = store.begin_snapshot().await.unwrap();
        let mut second = store.begin_snapshot().await.unwrap();
        assert!(store.list_rules_in(&mut first).await.unwrap().is_empty());
        assert!(store.list_rules_in(&mut second).await.unwrap().is_empty());

        store
            .insert_rule(&mut first, make_rule("a", 0, Some(100)))
            .await
            .unwrap();
        let loser = make_rule("b", 50, Some(200));
        store.insert_rule(&mut second, loser.clone()).await.unwrap();

        store.commit_snapshot(first).await.unwrap();
        let err = store.commit_snapshot(second).await.unwrap_err();
        match err {
            StorageError::RuleRangeConflict { rule_id } => assert_eq!(rule_id, loser.id),
            other => panic!("expected RuleRangeConflict, got {other:?}"),
        }

        let (committed, total) = store.list_rules(0, 0).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(committed[0].name, "a");
    }

    #[tokio::test]
    async fn rule_update_range_rechecked_at_commit() {
        let store = MemoryStore::new();
        let target = make_rule("kecil", 0, Some(100));
        let mut snap = store.begin_snapshot().await.unwrap();
        store.insert_rule(&mut snap, target.clone()).await.unwrap();
        store.commit_snapshot(snap).await.unwrap();

        // An edit staged against the old state races a fresh insert.
        let mut edit = store.begin_snapshot().await.unwrap();
        let mut widened = target.clone();
        widened.max_amount = Some(Decimal::from(300));
        store.update_rule(&mut edit, widened).await.unwrap();

        let mut other = store.begin_snapshot().await.unwrap();
        store
            .insert_rule(&mut other, make_rule("besar", 101, Some(400)))
            .await
            .unwrap();
        store.commit_snapshot(other).await.unwrap();

        let err = store.commit_snapshot(edit).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::RuleRangeConflict { rule_id } if rule_id == target.id
        ));
        // The losing edit left the original range intact.
        let committed = store.get_rule(target.id).await.unwrap();
        assert_eq!(committed.max_amount, Some(Decimal::from(100)));
    }
}
