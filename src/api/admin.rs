use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Multipart, Path, Query, State},
    http::header,
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::application::{ApplicationStatus, ReviewAction};
use crate::models::policy::{complete_policies, PolicyUpdate};
use crate::models::settings::SettingsKey;
use crate::models::stats::Statistics;
use crate::models::student::{normalize_batch, NewStudent};
use crate::models::student_csv::parse_student_csv;
use crate::permit::stamp;
use crate::review;
use crate::roster;
use crate::AppState;

/// Largest accepted principal stamp image.
const MAX_STAMP_BYTES: usize = 5 * 1024 * 1024;

const STAMP_FILE_STEM: &str = "principal-stamp";

// ── Request DTOs ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ListApplicationsQuery {
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct ReviewRequest {
    pub action: Option<String>,
    #[serde(rename = "rejectionReason", alias = "rejection_reason")]
    pub rejection_reason: Option<String>,
    #[serde(rename = "approvalNumber", alias = "approval_number")]
    pub approval_number: Option<String>,
}

#[derive(Deserialize)]
pub struct PolicyRequest {
    pub policy_key: Option<String>,
    pub mode: Option<String>,
    pub delay_minutes: Option<f64>,
}

#[derive(Deserialize)]
pub struct StudentsQuery {
    pub mode: Option<String>,
}

#[derive(Deserialize)]
pub struct BulkStudentsRequest {
    pub students: Vec<NewStudent>,
}

#[derive(Deserialize)]
pub struct DeleteStudentsQuery {
    pub all: Option<bool>,
}

#[derive(Deserialize)]
pub struct SettingRequest {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

fn internal(op: &'static str) -> impl Fn(anyhow::Error) -> AppError {
    move |e| {
        tracing::error!("{} failed: {:#}", op, e);
        AppError::Internal(e)
    }
}

// ── Applications ─────────────────────────────────────────────

/// GET /api/admin/applications?status=all|pending|approved|rejected|auto_approved
pub async fn list_applications(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListApplicationsQuery>,
) -> Result<Json<Value>, AppError> {
    let status = match query.status.as_deref().map(str::trim) {
        None | Some("") | Some("all") => None,
        Some(raw) => Some(
            raw.parse::<ApplicationStatus>()
                .map_err(AppError::BadRequest)?,
        ),
    };
    let items = state
        .db
        .list_applications(status)
        .await
        .map_err(internal("list_applications"))?;
    Ok(Json(json!({ "items": items })))
}

/// PATCH /api/admin/applications/:id: approve, reject or reset
pub async fn review_application(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(payload): Json<ReviewRequest>,
) -> Result<Json<review::ReviewOutcome>, AppError> {
    let action = ReviewAction::parse(
        payload.action.as_deref(),
        payload.rejection_reason,
        payload.approval_number,
    )
    .map_err(AppError::BadRequest)?;

    let outcome = review::review_application(
        &state.db,
        Some(state.roster_sync()),
        id,
        &action,
        &user.email,
    )
    .await
    .map_err(internal("review_application"))?
    .ok_or_else(|| AppError::NotFound(format!("application {} not found", id)))?;

    Ok(Json(outcome))
}

// ── Approval Policies ────────────────────────────────────────

/// GET /api/admin/policies
pub async fn list_policies(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let stored = state
        .db
        .list_policies()
        .await
        .map_err(internal("list_policies"))?;
    Ok(Json(json!({ "items": complete_policies(stored) })))
}

/// PATCH /api/admin/policies
pub async fn update_policy(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PolicyRequest>,
) -> Result<Json<Value>, AppError> {
    let update = PolicyUpdate::parse(
        payload.policy_key.as_deref(),
        payload.mode.as_deref(),
        payload.delay_minutes,
    )
    .map_err(AppError::BadRequest)?;

    let item = state
        .db
        .upsert_policy(&update)
        .await
        .map_err(internal("upsert_policy"))?;
    tracing::info!(
        policy = update.policy_key.as_str(),
        mode = update.mode.as_str(),
        delay_minutes = update.delay_minutes,
        "approval policy updated"
    );
    Ok(Json(json!({ "item": item })))
}

/// POST /api/admin/policies/run-auto-approval
pub async fn run_auto_approval(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, AppError> {
    let count = state
        .db
        .run_auto_approval()
        .await
        .map_err(internal("run_auto_approval"))?;
    tracing::info!(count, "manual auto-approval run");
    Ok(Json(json!({ "updated_count": count })))
}

// ── Students ─────────────────────────────────────────────────

/// GET /api/admin/students
pub async fn list_students(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let items = state
        .db
        .list_students()
        .await
        .map_err(internal("list_students"))?;
    Ok(Json(json!({ "items": items })))
}

/// POST /api/admin/students: single upsert, or `?mode=bulk` with `{students}`
pub async fn create_students(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StudentsQuery>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, AppError> {
    if query.mode.as_deref() == Some("bulk") {
        let req: BulkStudentsRequest = serde_json::from_value(body)
            .map_err(|e| AppError::BadRequest(format!("invalid students payload: {}", e)))?;
        let students = normalize_batch(req.students).map_err(AppError::BadRequest)?;
        let count = state
            .db
            .upsert_students(&students)
            .await
            .map_err(internal("upsert_students"))?;
        tracing::info!(count, "bulk student upload");
        return Ok(Json(json!({ "count": count })));
    }

    let student: NewStudent = serde_json::from_value(body)
        .map_err(|e| AppError::BadRequest(format!("invalid student payload: {}", e)))?;
    let student = student.normalized().map_err(AppError::BadRequest)?;
    let item = state
        .db
        .upsert_student(&student)
        .await
        .map_err(internal("upsert_student"))?;
    Ok(Json(json!({ "item": item })))
}

/// POST /api/admin/students/csv: raw CSV body, UTF-8 or EUC-KR
pub async fn import_students_csv(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let students = parse_student_csv(&body).map_err(|e| AppError::BadRequest(e.to_string()))?;
    let count = state
        .db
        .upsert_students(&students)
        .await
        .map_err(internal("import_students_csv"))?;
    tracing::info!(count, "student CSV imported");
    Ok(Json(json!({ "count": count })))
}

/// DELETE /api/admin/students?all=true
pub async fn delete_students(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DeleteStudentsQuery>,
) -> Result<Json<Value>, AppError> {
    if query.all != Some(true) {
        return Err(AppError::BadRequest(
            "pass all=true to delete every student".into(),
        ));
    }
    let deleted = state
        .db
        .delete_all_students()
        .await
        .map_err(internal("delete_all_students"))?;
    tracing::warn!(deleted, "student roster cleared");
    Ok(Json(json!({ "ok": true, "deleted": deleted })))
}

/// DELETE /api/admin/students/:student_id
pub async fn delete_student(
    State(state): State<Arc<AppState>>,
    Path(student_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let deleted = state
        .db
        .delete_student(student_id.trim())
        .await
        .map_err(internal("delete_student"))?;
    if !deleted {
        return Err(AppError::NotFound(format!("student {} not found", student_id)));
    }
    Ok(Json(json!({ "ok": true })))
}

// ── Settings ─────────────────────────────────────────────────

/// GET /api/admin/settings
pub async fn get_settings(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let item = state
        .db
        .load_settings()
        .await
        .map_err(internal("load_settings"))?;
    Ok(Json(json!({ "item": item })))
}

/// PATCH /api/admin/settings: `{key, value}`
pub async fn update_setting(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SettingRequest>,
) -> Result<Json<Value>, AppError> {
    let key: SettingsKey = payload.key.parse().map_err(AppError::BadRequest)?;
    let value = key.validate(&payload.value).map_err(AppError::BadRequest)?;

    state
        .db
        .set_setting(key, &value)
        .await
        .map_err(internal("set_setting"))?;
    let item = state
        .db
        .load_settings()
        .await
        .map_err(internal("load_settings"))?;
    Ok(Json(json!({ "item": item })))
}

fn image_extension(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("jpg")
    } else {
        None
    }
}

fn stamp_path(upload_dir: &std::path::Path, ext: &str) -> PathBuf {
    upload_dir.join(format!("{}.{}", STAMP_FILE_STEM, ext))
}

async fn remove_stamp_files(upload_dir: &std::path::Path) -> std::io::Result<()> {
    for ext in ["png", "jpg"] {
        match tokio::fs::remove_file(stamp_path(upload_dir, ext)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// GET /api/admin/settings/principal-stamp: the stored image
pub async fn get_principal_stamp(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let value = state
        .db
        .get_setting(SettingsKey::PrincipalStampPath)
        .await
        .map_err(internal("get_setting"))?;
    let bytes = stamp::load_stamp(&value, &state.config.upload_dir, &state.config.form_dirs)
        .ok_or_else(|| AppError::NotFound("no principal stamp uploaded".into()))?;
    let content_type = match image_extension(&bytes) {
        Some("png") => "image/png",
        Some(_) => "image/jpeg",
        None => "application/octet-stream",
    };
    Ok(([(header::CONTENT_TYPE, content_type)], bytes))
}

/// POST /api/admin/settings/principal-stamp: multipart `file` (PNG or JPEG)
pub async fn upload_principal_stamp(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<Value>, AppError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("invalid multipart body: {}", e)))?
    {
        if field.name() == Some("file") {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| AppError::BadRequest(format!("failed to read upload: {}", e)))?;
            upload = Some(bytes);
            break;
        }
    }

    let bytes = upload.ok_or_else(|| AppError::BadRequest("file field is required".into()))?;
    if bytes.is_empty() {
        return Err(AppError::BadRequest("uploaded file is empty".into()));
    }
    if bytes.len() > MAX_STAMP_BYTES {
        return Err(AppError::PayloadTooLarge);
    }
    let ext = image_extension(&bytes)
        .ok_or_else(|| AppError::BadRequest("stamp must be a PNG or JPEG image".into()))?;

    let upload_dir = &state.config.upload_dir;
    let write = async {
        tokio::fs::create_dir_all(upload_dir).await?;
        remove_stamp_files(upload_dir).await?;
        tokio::fs::write(stamp_path(upload_dir, ext), &bytes).await
    };
    write.await.map_err(|e| {
        tracing::error!("principal stamp write failed: {}", e);
        AppError::Internal(e.into())
    })?;

    let public_path = format!("/uploads/{}.{}", STAMP_FILE_STEM, ext);
    state
        .db
        .set_setting(SettingsKey::PrincipalStampPath, &public_path)
        .await
        .map_err(internal("set_setting"))?;
    tracing::info!(path = %public_path, bytes = bytes.len(), "principal stamp uploaded");
    Ok(Json(json!({ "path": public_path })))
}

/// DELETE /api/admin/settings/principal-stamp
pub async fn delete_principal_stamp(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, AppError> {
    remove_stamp_files(&state.config.upload_dir)
        .await
        .map_err(|e| {
            tracing::error!("principal stamp delete failed: {}", e);
            AppError::Internal(e.into())
        })?;
    state
        .db
        .set_setting(SettingsKey::PrincipalStampPath, "")
        .await
        .map_err(internal("set_setting"))?;
    Ok(Json(json!({ "ok": true })))
}

// ── Gate Roster ──────────────────────────────────────────────

/// GET /api/admin/gate-roster
pub async fn gate_roster(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let records = state
        .db
        .gate_roster_records()
        .await
        .map_err(internal("gate_roster_records"))?;
    let gate_sheet_url = state
        .db
        .get_setting(SettingsKey::GateSheetUrl)
        .await
        .map_err(internal("get_setting"))?;
    Ok(Json(json!({
        "items": roster::roster_entries(&records),
        "gate_sheet_url": gate_sheet_url,
    })))
}

/// POST /api/admin/gate-roster/sync
pub async fn sync_gate_roster(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let count = roster::sync_roster(
        &state.db,
        &state.sheets,
        state.config.sheet_webapp_url.as_deref(),
    )
    .await
    .map_err(|e| {
        tracing::warn!("gate roster sync failed: {:#}", e);
        AppError::Upstream(e.to_string())
    })?;
    Ok(Json(json!({ "count": count })))
}

// ── Statistics ───────────────────────────────────────────────

/// GET /api/admin/stats
pub async fn stats(State(state): State<Arc<AppState>>) -> Result<Json<Statistics>, AppError> {
    let grades = state
        .db
        .student_grades()
        .await
        .map_err(internal("student_grades"))?;
    let facts = state
        .db
        .application_facts()
        .await
        .map_err(internal("application_facts"))?;
    Ok(Json(Statistics::compute(&grades, &facts)))
}
