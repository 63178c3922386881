//! Seed file loading.
//!
//! A seed file is JSON declaring roles, units, users, and rules. Role and
//! unit references inside it are by name; names are local labels resolved
//! to UUIDs once, at load. Entries may pin an explicit `id` (useful for
//! scripted clients that pass `X-Actor-Id`), otherwise one is minted.

use std::collections::HashMap;
use std::path::Path;

use paraf_core::{
    create_role, create_rule, create_unit, create_user, RoleDraft, RuleDraft, StepDraft,
    UnitDraft, UserDraft,
};
use paraf_storage::{ParafStorage, StepKind};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SeedFile {
    #[serde(default)]
    pub(crate) roles: Vec<SeedRole>,
    #[serde(default)]
    pub(crate) units: Vec<SeedUnit>,
    #[serde(default)]
    pub(crate) users: Vec<SeedUser>,
    #[serde(default)]
    pub(crate) rules: Vec<SeedRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SeedRole {
    #[serde(default)]
    pub(crate) id: Option<Uuid>,
    pub(crate) name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SeedUnit {
    #[serde(default)]
    pub(crate) id: Option<Uuid>,
    pub(crate) name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SeedUser {
    #[serde(default)]
    pub(crate) id: Option<Uuid>,
    pub(crate) name: String,
    /// Role name, resolved against this file's `roles`.
    pub(crate) role: String,
    /// Unit name, resolved against this file's `units`.
    pub(crate) unit: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SeedRule {
    pub(crate) name: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub(crate) min_amount: Decimal,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub(crate) max_amount: Option<Decimal>,
    pub(crate) steps: Vec<SeedStep>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SeedStep {
    pub(crate) step_order: u8,
    pub(crate) step_type: StepKind,
    /// Role name, resolved against this file's `roles`.
    pub(crate) role: String,
}

#[derive(Debug, Default)]
pub(crate) struct SeedSummary {
    pub(crate) roles: usize,
    pub(crate) units: usize,
    pub(crate) users: usize,
    pub(crate) rules: usize,
}

pub(crate) fn parse(path: &Path) -> Result<SeedFile, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("error reading '{}': {}", path.display(), e))?;
    serde_json::from_str(&text)
        .map_err(|e| format!("error parsing JSON in '{}': {}", path.display(), e))
}

/// Apply a seed file through the normal create executors, so every seeded
/// record passes the same validation as API-created ones.
pub(crate) async fn load<S: ParafStorage>(
    storage: &S,
    file: &SeedFile,
) -> Result<SeedSummary, String> {
    let mut summary = SeedSummary::default();
    let mut role_ids: HashMap<String, Uuid> = HashMap::new();
    let mut unit_ids: HashMap<String, Uuid> = HashMap::new();

    for role in &file.roles {
        let record = create_role(
            storage,
            RoleDraft {
                id: role.id,
                name: role.name.clone(),
            },
        )
        .await
        .map_err(|e| format!("role '{}': {}", role.name, e))?;
        role_ids.insert(role.name.clone(), record.id);
        summary.roles += 1;
    }

    for unit in &file.units {
        let record = create_unit(
            storage,
            UnitDraft {
                id: unit.id,
                name: unit.name.clone(),
            },
        )
        .await
        .map_err(|e| format!("unit '{}': {}", unit.name, e))?;
        unit_ids.insert(unit.name.clone(), record.id);
        summary.units += 1;
    }

    for user in &file.users {
        let role_id = *role_ids
            .get(&user.role)
            .ok_or_else(|| format!("user '{}': unknown role '{}'", user.name, user.role))?;
        let unit_id = *unit_ids
            .get(&user.unit)
            .ok_or_else(|| format!("user '{}': unknown unit '{}'", user.name, user.unit))?;
        create_user(
            storage,
            UserDraft {
                id: user.id,
                name: user.name.clone(),
                role_id,
                unit_id,
            },
        )
        .await
        .map_err(|e| format!("user '{}': {}", user.name, e))?;
        summary.users += 1;
    }

    for rule in &file.rules {
        let mut steps = Vec::with_capacity(rule.steps.len());
        for step in &rule.steps {
            let role_id = *role_ids
                .get(&step.role)
                .ok_or_else(|| format!("rule '{}': unknown role '{}'", rule.name, step.role))?;
            steps.push(StepDraft {
                step_order: step.step_order,
                step_type: step.step_type,
                role_id,
            });
        }
        create_rule(
            storage,
            RuleDraft {
                name: rule.name.clone(),
                min_amount: rule.min_amount,
                max_amount: rule.max_amount,
                steps,
            },
        )
        .await
        .map_err(|e| format!("rule '{}': {}", rule.name, e))?;
        summary.rules += 1;
    }

    Ok(summary)
}
