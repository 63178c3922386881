use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StorageError;
use crate::record::{
    LetterRecord, LetterStatus, LogRecord, RoleRecord, RuleRecord, UnitRecord, UserRecord,
};

/// Filter for letter listing and counting queries.
///
/// All fields are AND-combined; `search` is a case-insensitive substring
/// match over letter number and subject.
#[derive(Debug, Clone, Default)]
pub struct LetterQuery {
    pub unit_id: Option<Uuid>,
    pub status: Option<LetterStatus>,
    pub search: Option<String>,
    pub created_by: Option<Uuid>,
}

/// The storage trait for procurement approval backends.
///
/// A `ParafStorage` implementation provides durable, transactional storage
/// for letters, their append-only audit logs, approval rules, and the
/// unit/role/user directory.
///
/// ## Snapshot Semantics
///
/// All mutating operations take `&mut Self::Snapshot`, a type representing
/// an in-progress transaction. The lifecycle is:
///
/// 1. `begin_snapshot()` -- start a transaction, returns a `Snapshot`
/// 2. Call mutating methods with `&mut snapshot`
/// 3. `commit_snapshot(snapshot)` -- commit and consume the transaction
///    OR `abort_snapshot(snapshot)` -- roll back and consume the transaction
///
/// If a `Snapshot` is dropped without committing, the underlying transaction
/// MUST be rolled back (drop semantics on the underlying DB transaction).
/// Uncommitted writes are invisible to the non-snapshot query methods, and
/// those methods never block on an open snapshot.
///
/// ## OCC Conflict Detection
///
/// `update_letter` performs an optimistic concurrency check:
/// `UPDATE WHERE version = expected_version`. A backend may detect the
/// conflict at the update call or defer it to `commit_snapshot`; either way
/// exactly one of two racing snapshots commits and the other observes
/// `Err(StorageError::ConcurrentConflict { .. })`.
///
/// ## Log Coupling
///
/// A status change and its audit log entry must land in the same snapshot.
/// Callers write both before committing; backends must not expose one
/// without the other.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` to be used in axum
/// application state and across async task boundaries.
#[async_trait]
pub trait ParafStorage: Send + Sync + 'static {
    /// The snapshot (transaction) type used by this storage backend.
    ///
    /// Must be `Send` to allow passing across async task boundaries.
    type Snapshot: Send;

    // ── Snapshot lifecycle ────────────────────────────────────────────────────

    /// Begin a new snapshot (transaction).
    async fn begin_snapshot(&self) -> Result<Self::Snapshot, StorageError>;

    /// Commit a snapshot, making all mutations durable atomically.
    ///
    /// Fails with `ConcurrentConflict` when a deferred OCC check finds that
    /// another snapshot committed a conflicting letter update first, and
    /// with `RuleRangeConflict` when a staged rule's amount range intersects
    /// a rule committed after this snapshot's reads. In either case nothing
    /// from this snapshot becomes visible.
    async fn commit_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    /// Abort (roll back) a snapshot, discarding all mutations.
    async fn abort_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    // ── Letter operations (within snapshot) ───────────────────────────────────

    /// Insert a new letter at version 0.
    ///
    /// Returns `Err(StorageError::AlreadyExists)` if a letter with this id
    /// exists (committed or staged in this snapshot).
    async fn insert_letter(
        &self,
        snapshot: &mut Self::Snapshot,
        record: LetterRecord,
    ) -> Result<(), StorageError>;

    /// Read a letter's current record, locking the row for update.
    ///
    /// Uses `SELECT ... FOR UPDATE` semantics where the backend supports it;
    /// OCC on `update_letter` covers backends that do not. Sees this
    /// snapshot's own staged writes.
    ///
    /// Returns `Err(StorageError::LetterNotFound)` if the letter does not exist.
    async fn get_letter_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        letter_id: Uuid,
    ) -> Result<LetterRecord, StorageError>;

    /// Apply a version-validated UPDATE to a letter (OCC).
    ///
    /// The update is conditional on `version = expected_version`; the
    /// record's own `version` field is ignored and the stored version
    /// becomes `expected_version + 1`, which is returned. A stale expected
    /// version yields `Err(StorageError::ConcurrentConflict)`, at this call
    /// or at commit.
    async fn update_letter(
        &self,
        snapshot: &mut Self::Snapshot,
        record: LetterRecord,
        expected_version: i64,
    ) -> Result<i64, StorageError>;

    /// Append one audit log entry for a letter.
    ///
    /// The record's `seq` field is ignored: storage assigns the next
    /// monotonic per-letter sequence number and returns it. Must be called
    /// in the SAME snapshot as the letter mutation it records -- no status
    /// change may become visible without its log entry.
    ///
    /// Returns `Err(StorageError::LetterNotFound)` if the letter does not
    /// exist (committed or staged).
    async fn append_log(
        &self,
        snapshot: &mut Self::Snapshot,
        record: LogRecord,
    ) -> Result<i64, StorageError>;

    // ── Rule operations ───────────────────────────────────────────────────────

    /// Insert a new rule.
    ///
    /// Returns `Err(StorageError::AlreadyExists)` on id collision. The
    /// rule's amount range is re-validated at commit against rules
    /// committed since this snapshot began (`RuleRangeConflict`).
    async fn insert_rule(
        &self,
        snapshot: &mut Self::Snapshot,
        record: RuleRecord,
    ) -> Result<(), StorageError>;

    /// Replace a rule's record wholesale.
    ///
    /// Returns `Err(StorageError::RuleNotFound)` if absent. Like
    /// `insert_rule`, the new range is re-validated at commit
    /// (`RuleRangeConflict`).
    async fn update_rule(
        &self,
        snapshot: &mut Self::Snapshot,
        record: RuleRecord,
    ) -> Result<(), StorageError>;

    /// Delete a rule.
    ///
    /// Returns `Err(StorageError::RuleNotFound)` if absent. Letters carry
    /// route snapshots, so deleting a rule never dangles an in-flight letter.
    async fn delete_rule(
        &self,
        snapshot: &mut Self::Snapshot,
        rule_id: Uuid,
    ) -> Result<(), StorageError>;

    /// List all rules as visible to this snapshot (committed plus staged).
    ///
    /// Overlap validation and rule matching run against this view so that a
    /// concurrent rule write cannot introduce ambiguous coverage unseen.
    async fn list_rules_in(
        &self,
        snapshot: &mut Self::Snapshot,
    ) -> Result<Vec<RuleRecord>, StorageError>;

    /// Read a rule without a snapshot.
    async fn get_rule(&self, rule_id: Uuid) -> Result<RuleRecord, StorageError>;

    /// List committed rules ordered by ascending `min_amount` (id as
    /// tiebreak). `limit` 0 means no limit. Returns the page and the total
    /// count before paging.
    async fn list_rules(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<RuleRecord>, usize), StorageError>;

    // ── Directory operations ──────────────────────────────────────────────────

    /// Insert a unit. `Err(AlreadyExists)` on id collision.
    async fn insert_unit(
        &self,
        snapshot: &mut Self::Snapshot,
        record: UnitRecord,
    ) -> Result<(), StorageError>;

    /// Insert a role. `Err(AlreadyExists)` on id collision.
    async fn insert_role(
        &self,
        snapshot: &mut Self::Snapshot,
        record: RoleRecord,
    ) -> Result<(), StorageError>;

    /// Insert a user.
    ///
    /// The referenced role and unit must exist in this snapshot's view;
    /// otherwise `Err(RoleNotFound)` / `Err(UnitNotFound)`.
    async fn insert_user(
        &self,
        snapshot: &mut Self::Snapshot,
        record: UserRecord,
    ) -> Result<(), StorageError>;

    async fn get_unit(&self, unit_id: Uuid) -> Result<UnitRecord, StorageError>;

    async fn get_role(&self, role_id: Uuid) -> Result<RoleRecord, StorageError>;

    async fn get_user(&self, user_id: Uuid) -> Result<UserRecord, StorageError>;

    /// List units ordered by `created_at` then id. `limit` 0 = no limit.
    async fn list_units(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<UnitRecord>, usize), StorageError>;

    /// List roles ordered by `created_at` then id. `limit` 0 = no limit.
    async fn list_roles(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<RoleRecord>, usize), StorageError>;

    /// List users ordered by `created_at` then id. `limit` 0 = no limit.
    async fn list_users(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<UserRecord>, usize), StorageError>;

    /// All users currently holding the given role. Used to resolve the
    /// approver pool for a letter's current step.
    async fn list_users_by_role(&self, role_id: Uuid) -> Result<Vec<UserRecord>, StorageError>;

    // ── Query operations (outside snapshot, committed data only) ──────────────

    /// Read a letter without locking.
    ///
    /// Returns `Err(StorageError::LetterNotFound)` if the letter does not exist.
    async fn get_letter(&self, letter_id: Uuid) -> Result<LetterRecord, StorageError>;

    /// List letters matching `query`, newest first by `created_at` (id as
    /// tiebreak). `limit` 0 = no limit. Returns the page and the total
    /// matching count before paging.
    async fn list_letters(
        &self,
        query: &LetterQuery,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<LetterRecord>, usize), StorageError>;

    /// Count letters matching `query`.
    async fn count_letters(&self, query: &LetterQuery) -> Result<usize, StorageError>;

    /// A letter's audit log, ascending by `(timestamp, seq)`.
    ///
    /// Returns `Err(StorageError::LetterNotFound)` for an unknown letter id
    /// (an existing letter always has at least its CREATED entry).
    async fn list_logs(&self, letter_id: Uuid) -> Result<Vec<LogRecord>, StorageError>;

    /// Letters on which the given user has recorded at least one decision
    /// entry (REVIEWED, APPROVED, REJECTED, or REVISION_REQUESTED), newest
    /// first. `limit` 0 = no limit.
    async fn list_letters_decided_by(
        &self,
        user_id: Uuid,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<LetterRecord>, usize), StorageError>;
}
