//! Read-only projections: progress timeline, letter listings, per-actor
//! decision history, and the unit dashboard.
//!
//! Everything here is a pure read over committed data. The views carry
//! camelCase field names and decimal-string amounts, matching the wire
//! contract, so the HTTP layer serializes them as-is.

use std::collections::HashMap;

use paraf_storage::{LetterQuery, LetterRecord, LetterStatus, LogAction, ParafStorage, StepKind};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{storage_err, EngineError};

/// 1-based page request. `limit` is clamped to `MAX_LIMIT`.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    pub page: usize,
    pub limit: usize,
}

/// Largest accepted page size.
pub const MAX_LIMIT: usize = 100;

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 1, limit: 10 }
    }
}

impl PageRequest {
    pub fn new(page: usize, limit: usize) -> Self {
        Self {
            page: page.max(1),
            limit: limit.clamp(1, MAX_LIMIT),
        }
    }

    fn offset(&self) -> usize {
        (self.page - 1) * self.limit
    }
}

/// Pagination envelope of a listing response.
#[derive(Debug, Clone, Serialize)]
pub struct Pagination {
    pub total_data: usize,
    pub page: usize,
    pub limit: usize,
    pub total_page: usize,
}

impl Pagination {
    pub fn new(total: usize, request: PageRequest) -> Self {
        Self {
            total_data: total,
            page: request.page,
            limit: request.limit,
            total_page: total.div_ceil(request.limit),
        }
    }
}

/// The single user expected to act next, when the approver pool has exactly
/// one member.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproverView {
    pub id: Uuid,
    pub name: String,
    pub role_id: Uuid,
}

/// A letter as presented to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LetterView {
    pub id: Uuid,
    pub letter_number: String,
    pub letter_about: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub nominal: Decimal,
    pub incoming_letter_date: String,
    pub unit_id: Uuid,
    pub unit_name: String,
    pub letter_file: String,
    pub status: LetterStatus,
    pub current_step: StepKind,
    pub rule_name: String,
    pub created_by: Uuid,
    pub current_approver: Option<ApproverView>,
    pub created_at: String,
    pub updated_at: String,
    pub version: i64,
}

/// One audit log entry as presented to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogView {
    pub id: Uuid,
    pub seq: i64,
    pub action: LogAction,
    pub actor_id: Uuid,
    pub actor_name: Option<String>,
    pub comment: Option<String>,
    pub timestamp: String,
}

/// The progress timeline for one letter.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressView {
    pub letter: LetterView,
    pub logs: Vec<LogView>,
}

/// Per-unit dashboard counts.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardView {
    pub total_in_unit: usize,
    pub total_approved: usize,
    pub total_rejected: usize,
}

/// Resolve who acts next on a letter.
///
/// While PENDING_REVIEW the users holding the current step's role form the
/// approver pool; only a pool of exactly one yields a named approver
/// (otherwise the pool is a queue and any holder may act, first wins).
/// NEEDS_REVISION letters report the creator; terminal letters report
/// nobody. Derived at read time, never stored, so directory changes need
/// no letter writes.
pub async fn derive_approver<S: ParafStorage>(
    storage: &S,
    letter: &LetterRecord,
) -> Result<Option<ApproverView>, EngineError> {
    match letter.status {
        LetterStatus::PendingReview => {
            let Some(role_id) = letter.route.role_for(letter.current_step) else {
                return Ok(None);
            };
            let pool = storage
                .list_users_by_role(role_id)
                .await
                .map_err(storage_err)?;
            Ok(match pool.as_slice() {
                [only] => Some(ApproverView {
                    id: only.id,
                    name: only.name.clone(),
                    role_id: only.role_id,
                }),
                _ => None,
            })
        }
        LetterStatus::NeedsRevision => {
            let creator = storage
                .get_user(letter.created_by)
                .await
                .map_err(storage_err)?;
            Ok(Some(ApproverView {
                id: creator.id,
                name: creator.name,
                role_id: creator.role_id,
            }))
        }
        _ => Ok(None),
    }
}

/// Assemble the client view of one letter record.
pub async fn letter_view<S: ParafStorage>(
    storage: &S,
    letter: LetterRecord,
) -> Result<LetterView, EngineError> {
    let current_approver = derive_approver(storage, &letter).await?;
    let unit_name = storage
        .get_unit(letter.unit_id)
        .await
        .map(|u| u.name)
        .unwrap_or_default();
    Ok(LetterView {
        id: letter.id,
        letter_number: letter.letter_number,
        letter_about: letter.letter_about,
        nominal: letter.nominal,
        incoming_letter_date: letter.incoming_letter_date,
        unit_id: letter.unit_id,
        unit_name,
        letter_file: letter.letter_file,
        status: letter.status,
        current_step: letter.current_step,
        rule_name: letter.route.rule_name,
        created_by: letter.created_by,
        current_approver,
        created_at: letter.created_at,
        updated_at: letter.updated_at,
        version: letter.version,
    })
}

/// Project one letter's full timeline.
///
/// Pure read scoped strictly to the requested id; this also backs the
/// public no-login tracking link, which is why it exposes no listing or
/// enumeration capability.
pub async fn project<S: ParafStorage>(
    storage: &S,
    letter_id: Uuid,
) -> Result<ProgressView, EngineError> {
    let letter = storage.get_letter(letter_id).await.map_err(storage_err)?;
    let logs = storage.list_logs(letter_id).await.map_err(storage_err)?;

    // Resolve actor names once per distinct actor.
    let mut names: HashMap<Uuid, Option<String>> = HashMap::new();
    let mut views = Vec::with_capacity(logs.len());
    for entry in logs {
        let actor_name = match names.get(&entry.actor_id) {
            Some(cached) => cached.clone(),
            None => {
                let name = storage.get_user(entry.actor_id).await.ok().map(|u| u.name);
                names.insert(entry.actor_id, name.clone());
                name
            }
        };
        views.push(LogView {
            id: entry.id,
            seq: entry.seq,
            action: entry.action,
            actor_id: entry.actor_id,
            actor_name,
            comment: entry.comment,
            timestamp: entry.timestamp,
        });
    }

    Ok(ProgressView {
        letter: letter_view(storage, letter).await?,
        logs: views,
    })
}

/// List letters matching `query`, newest first.
pub async fn list<S: ParafStorage>(
    storage: &S,
    query: &LetterQuery,
    page: PageRequest,
) -> Result<(Vec<LetterView>, Pagination), EngineError> {
    let (records, total) = storage
        .list_letters(query, page.offset(), page.limit)
        .await
        .map_err(storage_err)?;
    let mut views = Vec::with_capacity(records.len());
    for record in records {
        views.push(letter_view(storage, record).await?);
    }
    Ok((views, Pagination::new(total, page)))
}

/// Letters the actor has recorded at least one decision on, newest first.
pub async fn history<S: ParafStorage>(
    storage: &S,
    actor_id: Uuid,
    page: PageRequest,
) -> Result<(Vec<LetterView>, Pagination), EngineError> {
    let (records, total) = storage
        .list_letters_decided_by(actor_id, page.offset(), page.limit)
        .await
        .map_err(storage_err)?;
    let mut views = Vec::with_capacity(records.len());
    for record in records {
        views.push(letter_view(storage, record).await?);
    }
    Ok((views, Pagination::new(total, page)))
}

/// Dashboard counts for one unit.
pub async fn dashboard<S: ParafStorage>(
    storage: &S,
    unit_id: Uuid,
) -> Result<DashboardView, EngineError> {
    storage.get_unit(unit_id).await.map_err(storage_err)?;
    let in_unit = LetterQuery {
        unit_id: Some(unit_id),
        ..Default::default()
    };
    let approved = LetterQuery {
        unit_id: Some(unit_id),
        status: Some(LetterStatus::Approved),
        ..Default::default()
    };
    let rejected = LetterQuery {
        unit_id: Some(unit_id),
        status: Some(LetterStatus::Rejected),
        ..Default::default()
    };
    Ok(DashboardView {
        total_in_unit: storage.count_letters(&in_unit).await.map_err(storage_err)?,
        total_approved: storage
            .count_letters(&approved)
            .await
            .map_err(storage_err)?,
        total_rejected: storage
            .count_letters(&rejected)
            .await
            .map_err(storage_err)?,
    })
}
