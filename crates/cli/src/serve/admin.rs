//! Authenticated `/admin` handlers: procurement letters, the rule
//! repository, and the directory.
//!
//! Every handler extracts the resolved actor from the request extensions
//! (attached by `actor_middleware`) and passes it explicitly to the
//! engine executors. Entity responses use camelCase views with amounts as
//! decimal strings.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::Extension;
use axum::Json;
use paraf_core::progress::{self, PageRequest};
use paraf_core::{
    decide, directory, resubmit, rules, submit, Decision, LetterDraft, RevisionDraft, RoleDraft,
    RuleDraft, StepRebind, UnitDraft, UserDraft,
};
use paraf_storage::{
    LetterQuery, LetterStatus, ParafStorage, RoleRecord, RuleRecord, UnitRecord, UserRecord,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::handlers::{data, paged, ApiError};
use super::state::AppState;

// ── Views ─────────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StepView {
    id: Uuid,
    step_order: u8,
    step_type: paraf_storage::StepKind,
    role_id: Uuid,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RuleView {
    id: Uuid,
    name: String,
    #[serde(with = "rust_decimal::serde::str")]
    min_amount: Decimal,
    #[serde(with = "rust_decimal::serde::str_option")]
    max_amount: Option<Decimal>,
    steps: Vec<StepView>,
    created_at: String,
    updated_at: String,
}

impl From<RuleRecord> for RuleView {
    fn from(r: RuleRecord) -> Self {
        Self {
            id: r.id,
            name: r.name,
            min_amount: r.min_amount,
            max_amount: r.max_amount,
            steps: r
                .steps
                .into_iter()
                .map(|s| StepView {
                    id: s.id,
                    step_order: s.step_order,
                    step_type: s.step_type,
                    role_id: s.role_id,
                })
                .collect(),
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UnitView {
    id: Uuid,
    name: String,
    created_at: String,
}

impl From<UnitRecord> for UnitView {
    fn from(r: UnitRecord) -> Self {
        Self {
            id: r.id,
            name: r.name,
            created_at: r.created_at,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RoleView {
    id: Uuid,
    name: String,
    created_at: String,
}

impl From<RoleRecord> for RoleView {
    fn from(r: RoleRecord) -> Self {
        Self {
            id: r.id,
            name: r.name,
            created_at: r.created_at,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UserView {
    id: Uuid,
    name: String,
    role_id: Uuid,
    unit_id: Uuid,
    created_at: String,
}

impl From<UserRecord> for UserView {
    fn from(r: UserRecord) -> Self {
        Self {
            id: r.id,
            name: r.name,
            role_id: r.role_id,
            unit_id: r.unit_id,
            created_at: r.created_at,
        }
    }
}

// ── Query / body types ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct ListParams {
    page: Option<usize>,
    limit: Option<usize>,
    search: Option<String>,
    status: Option<String>,
    #[serde(rename = "createdBy")]
    created_by: Option<Uuid>,
}

impl ListParams {
    fn page_request(&self) -> PageRequest {
        PageRequest::new(self.page.unwrap_or(1), self.limit.unwrap_or(10))
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct DecisionBody {
    decision: Decision,
    comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StepsBody {
    steps: Vec<StepRebind>,
}

// ── Multipart extraction ──────────────────────────────────────────────────

struct LetterForm {
    fields: HashMap<String, String>,
    file: Option<Vec<u8>>,
}

async fn read_letter_form(mut multipart: Multipart) -> Result<LetterForm, ApiError> {
    let mut fields = HashMap::new();
    let mut file = None;
    while let Some(part) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("malformed multipart body: {}", e)))?
    {
        let name = match part.name() {
            Some(n) => n.to_string(),
            None => continue,
        };
        if name == "letter_file" {
            let bytes = part
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(format!("reading letter_file: {}", e)))?;
            file = Some(bytes.to_vec());
        } else {
            let text = part
                .text()
                .await
                .map_err(|e| ApiError::bad_request(format!("reading field {}: {}", name, e)))?;
            fields.insert(name, text);
        }
    }
    Ok(LetterForm { fields, file })
}

impl LetterForm {
    fn require(&self, name: &str) -> Result<&str, ApiError> {
        self.fields
            .get(name)
            .map(|s| s.as_str())
            .ok_or_else(|| ApiError::bad_request(format!("missing field {}", name)))
    }

    fn nominal(&self) -> Result<Decimal, ApiError> {
        Decimal::from_str(self.require("nominal")?.trim())
            .map_err(|_| ApiError::bad_request("nominal must be a decimal amount"))
    }
}

// ── Letter handlers ───────────────────────────────────────────────────────

pub(crate) async fn handle_submit(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<UserRecord>,
    multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    let form = read_letter_form(multipart).await?;
    let file_bytes = form
        .file
        .as_deref()
        .ok_or_else(|| ApiError::bad_request("missing file part letter_file"))?;
    let unit_id = Uuid::parse_str(form.require("unitId")?.trim())
        .map_err(|_| ApiError::bad_request("unitId must be a UUID"))?;

    let stored_name = state.files.store(file_bytes).await?;
    let draft = LetterDraft {
        letter_number: form.require("letterNumber")?.to_string(),
        letter_about: form.require("letterAbout")?.to_string(),
        nominal: form.nominal()?,
        incoming_letter_date: form.require("incomingLetterDate")?.trim().to_string(),
        unit_id,
        letter_file: stored_name.clone(),
    };
    let letter = match submit(&state.store, &actor, draft).await {
        Ok(letter) => letter,
        Err(e) => {
            // The letter never committed; its file must not linger.
            state.files.discard(&stored_name).await;
            return Err(e.into());
        }
    };
    Ok(data(progress::letter_view(&state.store, letter).await?))
}

pub(crate) async fn handle_resubmit(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<UserRecord>,
    Path(id): Path<Uuid>,
    multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    let form = read_letter_form(multipart).await?;
    let letter_file = match form.file.as_deref() {
        Some(bytes) => Some(state.files.store(bytes).await?),
        None => None,
    };
    let draft = RevisionDraft {
        letter_number: form.require("letterNumber")?.to_string(),
        letter_about: form.require("letterAbout")?.to_string(),
        nominal: form.nominal()?,
        incoming_letter_date: form.require("incomingLetterDate")?.trim().to_string(),
        letter_file: letter_file.clone(),
    };
    let letter = match resubmit(&state.store, &actor, id, draft).await {
        Ok(letter) => letter,
        Err(e) => {
            if let Some(name) = &letter_file {
                state.files.discard(name).await;
            }
            return Err(e.into());
        }
    };
    Ok(data(progress::letter_view(&state.store, letter).await?))
}

pub(crate) async fn handle_decision(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<UserRecord>,
    Path(id): Path<Uuid>,
    Json(body): Json<DecisionBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let letter = decide(&state.store, &actor, id, body.decision, body.comment).await?;
    Ok(data(progress::letter_view(&state.store, letter).await?))
}

pub(crate) async fn handle_list_letters(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let status = match &params.status {
        Some(raw) => Some(parse_status(raw)?),
        None => None,
    };
    let query = LetterQuery {
        status,
        search: params.search.clone(),
        created_by: params.created_by,
        ..Default::default()
    };
    let (items, pagination) =
        progress::list(&state.store, &query, params.page_request()).await?;
    Ok(paged(items, pagination))
}

fn parse_status(raw: &str) -> Result<LetterStatus, ApiError> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|_| ApiError::bad_request(format!("unknown status: {}", raw)))
}

pub(crate) async fn handle_history(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<UserRecord>,
    Query(params): Query<ListParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (items, pagination) =
        progress::history(&state.store, actor.id, params.page_request()).await?;
    Ok(paged(items, pagination))
}

pub(crate) async fn handle_get_letter(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let record = state
        .store
        .get_letter(id)
        .await
        .map_err(paraf_core::storage_err)?;
    Ok(data(progress::letter_view(&state.store, record).await?))
}

pub(crate) async fn handle_dashboard(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<UserRecord>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let view = progress::dashboard(&state.store, actor.unit_id).await?;
    Ok(data(view))
}

// ── Rule handlers ─────────────────────────────────────────────────────────

pub(crate) async fn handle_create_rule(
    State(state): State<Arc<AppState>>,
    Json(draft): Json<RuleDraft>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let record = rules::create_rule(&state.store, draft).await?;
    Ok(data(RuleView::from(record)))
}

pub(crate) async fn handle_list_rules(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let page = params.page_request();
    let (records, total) = state
        .store
        .list_rules((page.page - 1) * page.limit, page.limit)
        .await
        .map_err(paraf_core::storage_err)?;
    let items: Vec<RuleView> = records.into_iter().map(RuleView::from).collect();
    Ok(paged(items, paginate(total, page)))
}

pub(crate) async fn handle_get_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let record = state
        .store
        .get_rule(id)
        .await
        .map_err(paraf_core::storage_err)?;
    Ok(data(RuleView::from(record)))
}

pub(crate) async fn handle_update_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(draft): Json<RuleDraft>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let record = rules::update_rule(&state.store, id, draft).await?;
    Ok(data(RuleView::from(record)))
}

pub(crate) async fn handle_delete_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    rules::delete_rule(&state.store, id).await?;
    Ok(data(serde_json::json!({ "id": id })))
}

pub(crate) async fn handle_update_rule_steps(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<StepsBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let record = rules::update_rule_steps(&state.store, id, body.steps).await?;
    Ok(data(RuleView::from(record)))
}

// ── Directory handlers ────────────────────────────────────────────────────

pub(crate) async fn handle_create_unit(
    State(state): State<Arc<AppState>>,
    Json(draft): Json<UnitDraft>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let record = directory::create_unit(&state.store, draft).await?;
    Ok(data(UnitView::from(record)))
}

pub(crate) async fn handle_list_units(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let page = params.page_request();
    let (records, total) = state
        .store
        .list_units((page.page - 1) * page.limit, page.limit)
        .await
        .map_err(paraf_core::storage_err)?;
    let items: Vec<UnitView> = records.into_iter().map(UnitView::from).collect();
    Ok(paged(items, paginate(total, page)))
}

pub(crate) async fn handle_get_unit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let record = state
        .store
        .get_unit(id)
        .await
        .map_err(paraf_core::storage_err)?;
    Ok(data(UnitView::from(record)))
}

pub(crate) async fn handle_create_role(
    State(state): State<Arc<AppState>>,
    Json(draft): Json<RoleDraft>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let record = directory::create_role(&state.store, draft).await?;
    Ok(data(RoleView::from(record)))
}

pub(crate) async fn handle_list_roles(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let page = params.page_request();
    let (records, total) = state
        .store
        .list_roles((page.page - 1) * page.limit, page.limit)
        .await
        .map_err(paraf_core::storage_err)?;
    let items: Vec<RoleView> = records.into_iter().map(RoleView::from).collect();
    Ok(paged(items, paginate(total, page)))
}

pub(crate) async fn handle_get_role(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let record = state
        .store
        .get_role(id)
        .await
        .map_err(paraf_core::storage_err)?;
    Ok(data(RoleView::from(record)))
}

pub(crate) async fn handle_create_user(
    State(state): State<Arc<AppState>>,
    Json(draft): Json<UserDraft>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let record = directory::create_user(&state.store, draft).await?;
    Ok(data(UserView::from(record)))
}

pub(crate) async fn handle_list_users(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let page = params.page_request();
    let (records, total) = state
        .store
        .list_users((page.page - 1) * page.limit, page.limit)
        .await
        .map_err(paraf_core::storage_err)?;
    let items: Vec<UserView> = records.into_iter().map(UserView::from).collect();
    Ok(paged(items, paginate(total, page)))
}

pub(crate) async fn handle_get_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let record = state
        .store
        .get_user(id)
        .await
        .map_err(paraf_core::storage_err)?;
    Ok(data(UserView::from(record)))
}

fn paginate(total: usize, page: PageRequest) -> progress::Pagination {
    progress::Pagination::new(total, page)
}
