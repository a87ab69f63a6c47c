use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::application::{Application, ApplicationKind, ApplicationStatus};
use crate::models::consent::ConsentStatus;
use crate::models::policy::{complete_policies, ApprovalPolicy, PolicyKey, PolicyMode};
use crate::permit;
use crate::AppState;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Deserialize)]
pub struct CreateApplicationRequest {
    #[serde(rename = "applicationType", alias = "application_type")]
    pub application_type: Option<String>,
    pub reason: Option<String>,
    /// Gate schedule JSON, either as an object or as an encoded string.
    #[serde(rename = "extraInfo", alias = "extra_info")]
    pub extra_info: Option<Value>,
}

#[derive(Deserialize, Default)]
pub struct AgreeRequest {
    pub document_id: Option<i64>,
}

/// An application as the student sees it, with the policy outlook for
/// pending rows.
#[derive(Serialize)]
pub struct StudentApplication {
    #[serde(flatten)]
    pub application: Application,
    pub approval_mode: Option<PolicyMode>,
    pub auto_approve_at: Option<DateTime<Utc>>,
}

impl StudentApplication {
    pub fn new(application: Application, policies: &[ApprovalPolicy]) -> Self {
        let policy = PolicyKey::for_kind(application.application_type)
            .and_then(|key| policies.iter().find(|p| p.policy_key == key));
        let approval_mode = policy.map(|p| p.mode);
        let auto_approve_at = match (policy, application.status) {
            (Some(p), ApplicationStatus::Pending) => p.eligible_at(application.submitted_at),
            _ => None,
        };
        Self {
            application,
            approval_mode,
            auto_approve_at,
        }
    }
}

/// Normalize the submitted schedule into the stored text form.
fn extra_info_text(raw: Option<Value>) -> Option<String> {
    match raw? {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

fn internal(op: &'static str) -> impl Fn(anyhow::Error) -> AppError {
    move |e| {
        tracing::error!("{} failed: {:#}", op, e);
        AppError::Internal(e)
    }
}

// ── Applications ─────────────────────────────────────────────

/// GET /api/parent/applications
pub async fn list_applications(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Value>, AppError> {
    let rows = state
        .db
        .list_applications_for_student(user.student_id())
        .await
        .map_err(internal("list_applications_for_student"))?;
    let policies = complete_policies(
        state
            .db
            .list_policies()
            .await
            .map_err(internal("list_policies"))?,
    );
    let items: Vec<StudentApplication> = rows
        .into_iter()
        .map(|a| StudentApplication::new(a, &policies))
        .collect();
    Ok(Json(json!({ "items": items })))
}

/// POST /api/parent/applications
pub async fn create_application(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<CreateApplicationRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let kind: ApplicationKind = payload
        .application_type
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(AppError::BadRequest)?;
    let reason = payload.reason.as_deref().map(str::trim).unwrap_or_default();
    if reason.is_empty() {
        return Err(AppError::BadRequest("reason is required".into()));
    }

    let consent = state
        .db
        .consent_status(user.student_id())
        .await
        .map_err(internal("consent_status"))?;
    if !consent.is_satisfied() {
        return Err(AppError::Forbidden(
            "the required consent has not been agreed to".into(),
        ));
    }

    let on_roster = state
        .db
        .get_student(user.student_id())
        .await
        .map_err(internal("get_student"))?
        .is_some();
    if !on_roster {
        return Err(AppError::Forbidden(
            "this account is not registered as a student".into(),
        ));
    }

    let extra_info = extra_info_text(payload.extra_info);
    let item = state
        .db
        .insert_application(user.student_id(), kind, reason, extra_info.as_deref())
        .await
        .map_err(internal("insert_application"))?
        .ok_or_else(|| {
            AppError::Conflict(format!("a {} application already exists", kind.as_str()))
        })?;

    tracing::info!(
        id = item.id,
        student = %item.student_id,
        kind = kind.as_str(),
        "application submitted"
    );
    Ok((StatusCode::CREATED, Json(json!({ "item": item }))))
}

/// DELETE /api/parent/applications/:id/cancel
pub async fn cancel_application(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    let cancelled = state
        .db
        .cancel_application(id, user.student_id())
        .await
        .map_err(internal("cancel_application"))?;
    if !cancelled {
        return Err(AppError::NotFound(format!(
            "no cancellable application {}",
            id
        )));
    }
    tracing::info!(id, student = %user.student_id(), "application cancelled");
    Ok(Json(json!({ "ok": true })))
}

/// GET /api/parent/applications/:id/pdf
pub async fn download_permit(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let app = state
        .db
        .get_student_application(id, user.student_id())
        .await
        .map_err(internal("get_student_application"))?
        .ok_or_else(|| AppError::NotFound(format!("application {} not found", id)))?;
    if !app.status.is_approved() {
        return Err(AppError::BadRequest(
            "only approved applications can be printed".into(),
        ));
    }

    let student = state
        .db
        .get_student(user.student_id())
        .await
        .map_err(internal("get_student"))?;
    let settings = match state.db.load_settings().await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("settings unavailable, using defaults: {}", e);
            Default::default()
        }
    };

    let assets = permit::PermitAssets::from_config(&state.config);
    let rendered = tokio::task::spawn_blocking(move || {
        permit::render_permit(&assets, &app, student.as_ref(), &settings)
    })
    .await
    .map_err(|e| AppError::Internal(e.into()))?
    .map_err(internal("render_permit"))?;

    let disposition = format!("attachment; filename=\"{}\"", rendered.filename);
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        rendered.bytes,
    ))
}

// ── Consent ──────────────────────────────────────────────────

/// GET /api/parent/consent/status
pub async fn consent_status(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<ConsentStatus>, AppError> {
    let status = state
        .db
        .consent_status(user.student_id())
        .await
        .map_err(internal("consent_status"))?;
    Ok(Json(status))
}

/// POST /api/parent/consent/agree
pub async fn agree_consent(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    headers: HeaderMap,
    payload: Option<Json<AgreeRequest>>,
) -> Result<Json<Value>, AppError> {
    let Json(payload) = payload.unwrap_or_default();
    let latest = state
        .db
        .latest_required_consent()
        .await
        .map_err(internal("latest_required_consent"))?;
    let Some(document) = latest else {
        return Ok(Json(json!({ "ok": true, "required": false })));
    };
    if payload.document_id.is_some_and(|id| id != document.id) {
        return Err(AppError::BadRequest(
            "consent document is no longer current".into(),
        ));
    }

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok());
    let agreed_at = state
        .db
        .record_consent(
            user.student_id(),
            document.id,
            client_ip(&headers).as_deref(),
            user_agent,
        )
        .await
        .map_err(internal("record_consent"))?;
    tracing::info!(user = %user.student_id(), document = document.id, "consent recorded");
    Ok(Json(json!({ "ok": true, "agreed_at": agreed_at })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn application(kind: ApplicationKind, status: ApplicationStatus) -> Application {
        Application {
            id: 7,
            student_id: "10101@ds.es.kr".into(),
            application_type: kind,
            reason: "r".into(),
            extra_info: None,
            status,
            approval_number: None,
            submitted_at: "2026-03-04T08:00:00Z".parse().unwrap(),
            approved_at: None,
            approved_by: None,
            approved_source: None,
            rejection_reason: None,
        }
    }

    fn delayed_pass() -> Vec<ApprovalPolicy> {
        let mut policies = complete_policies(vec![]);
        for p in policies.iter_mut() {
            if p.policy_key == PolicyKey::Pass {
                p.mode = PolicyMode::Delayed;
                p.delay_minutes = 10;
            }
        }
        policies
    }

    #[test]
    fn test_pending_gate_shows_auto_approve_time() {
        let item = StudentApplication::new(
            application(ApplicationKind::Gate, ApplicationStatus::Pending),
            &delayed_pass(),
        );
        assert_eq!(item.approval_mode, Some(PolicyMode::Delayed));
        assert_eq!(
            item.auto_approve_at,
            Some("2026-03-04T08:10:00Z".parse().unwrap())
        );

        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["approval_mode"], "delayed");
    }

    #[test]
    fn test_manual_or_decided_has_no_auto_time() {
        let manual = StudentApplication::new(
            application(ApplicationKind::Phone, ApplicationStatus::Pending),
            &delayed_pass(),
        );
        assert_eq!(manual.approval_mode, Some(PolicyMode::Manual));
        assert!(manual.auto_approve_at.is_none());

        let approved = StudentApplication::new(
            application(ApplicationKind::Gate, ApplicationStatus::Approved),
            &delayed_pass(),
        );
        assert!(approved.auto_approve_at.is_none());

        let other = StudentApplication::new(
            application(ApplicationKind::Other, ApplicationStatus::Pending),
            &delayed_pass(),
        );
        assert!(other.approval_mode.is_none());
    }

    #[test]
    fn test_extra_info_text() {
        assert_eq!(extra_info_text(None), None);
        assert_eq!(extra_info_text(Some(Value::Null)), None);
        assert_eq!(extra_info_text(Some(json!("  "))), None);
        assert_eq!(
            extra_info_text(Some(json!({"morningDays": ["월"]}))),
            Some(r#"{"morningDays":["월"]}"#.to_string())
        );
    }

    #[test]
    fn test_client_ip_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers), Some("203.0.113.9".into()));
        assert_eq!(client_ip(&HeaderMap::new()), None);
    }
}
