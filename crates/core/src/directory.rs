//! Unit, role, and user directory.
//!
//! Rules bind steps to roles by id and letters carry their creator's id, so
//! the directory is the ground truth everything else references. Records
//! here are create-and-read only; there is no rename or delete, which keeps
//! route snapshots and audit entries resolvable forever.
//!
//! Drafts accept an optional explicit id so seed files can pin well-known
//! ids (the actor header references users by id); omitted ids are minted.

use paraf_storage::{now_iso8601, ParafStorage, RoleRecord, UnitRecord, UserRecord};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{storage_err, EngineError};

#[derive(Debug, Clone, Deserialize)]
pub struct UnitDraft {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoleDraft {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDraft {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub name: String,
    pub role_id: Uuid,
    pub unit_id: Uuid,
}

fn require_name(name: &str) -> Result<String, EngineError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(EngineError::validation("name", "must not be empty"));
    }
    Ok(trimmed.to_string())
}

pub async fn create_unit<S: ParafStorage>(
    storage: &S,
    draft: UnitDraft,
) -> Result<UnitRecord, EngineError> {
    let record = UnitRecord {
        id: draft.id.unwrap_or_else(Uuid::new_v4),
        name: require_name(&draft.name)?,
        created_at: now_iso8601(),
    };

    let mut snap = storage.begin_snapshot().await.map_err(storage_err)?;
    match storage.insert_unit(&mut snap, record.clone()).await {
        Ok(()) => {
            storage.commit_snapshot(snap).await.map_err(storage_err)?;
            tracing::info!(unit_id = %record.id, name = %record.name, "unit created");
            Ok(record)
        }
        Err(e) => {
            let _ = storage.abort_snapshot(snap).await;
            Err(storage_err(e))
        }
    }
}

pub async fn create_role<S: ParafStorage>(
    storage: &S,
    draft: RoleDraft,
) -> Result<RoleRecord, EngineError> {
    let record = RoleRecord {
        id: draft.id.unwrap_or_else(Uuid::new_v4),
        name: require_name(&draft.name)?,
        created_at: now_iso8601(),
    };

    let mut snap = storage.begin_snapshot().await.map_err(storage_err)?;
    match storage.insert_role(&mut snap, record.clone()).await {
        Ok(()) => {
            storage.commit_snapshot(snap).await.map_err(storage_err)?;
            tracing::info!(role_id = %record.id, name = %record.name, "role created");
            Ok(record)
        }
        Err(e) => {
            let _ = storage.abort_snapshot(snap).await;
            Err(storage_err(e))
        }
    }
}

/// Create a user holding one role in one unit. The referenced role and unit
/// must already exist.
pub async fn create_user<S: ParafStorage>(
    storage: &S,
    draft: UserDraft,
) -> Result<UserRecord, EngineError> {
    let record = UserRecord {
        id: draft.id.unwrap_or_else(Uuid::new_v4),
        name: require_name(&draft.name)?,
        role_id: draft.role_id,
        unit_id: draft.unit_id,
        created_at: now_iso8601(),
    };

    let mut snap = storage.begin_snapshot().await.map_err(storage_err)?;
    match storage.insert_user(&mut snap, record.clone()).await {
        Ok(()) => {
            storage.commit_snapshot(snap).await.map_err(storage_err)?;
            tracing::info!(user_id = %record.id, name = %record.name, "user created");
            Ok(record)
        }
        Err(e) => {
            let _ = storage.abort_snapshot(snap).await;
            Err(storage_err(e))
        }
    }
}
