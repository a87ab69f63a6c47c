use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, patch, post},
    Router,
};

use crate::auth::{bearer_token, AuthUser};
use crate::errors::AppError;
use crate::AppState;

pub mod admin;
pub mod parent;

/// Request bodies above this are rejected; covers CSV imports and stamp uploads.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Administrator routes, mounted under `/api/admin`.
pub fn admin_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/applications", get(admin::list_applications))
        .route("/applications/:id", patch(admin::review_application))
        .route(
            "/policies",
            get(admin::list_policies).patch(admin::update_policy),
        )
        .route("/policies/run-auto-approval", post(admin::run_auto_approval))
        .route(
            "/students",
            get(admin::list_students)
                .post(admin::create_students)
                .delete(admin::delete_students),
        )
        .route("/students/csv", post(admin::import_students_csv))
        .route("/students/:student_id", delete(admin::delete_student))
        .route(
            "/settings",
            get(admin::get_settings).patch(admin::update_setting),
        )
        .route(
            "/settings/principal-stamp",
            get(admin::get_principal_stamp)
                .post(admin::upload_principal_stamp)
                .delete(admin::delete_principal_stamp),
        )
        .route("/gate-roster", get(admin::gate_roster))
        .route("/gate-roster/sync", post(admin::sync_gate_roster))
        .route("/stats", get(admin::stats))
        .layer(middleware::from_fn_with_state(state, require_admin))
        .fallback(fallback_404)
}

/// Student routes, mounted under `/api/parent`.
pub fn parent_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/applications",
            get(parent::list_applications).post(parent::create_application),
        )
        .route("/applications/:id/cancel", delete(parent::cancel_application))
        .route("/applications/:id/pdf", get(parent::download_permit))
        .route("/consent/status", get(parent::consent_status))
        .route("/consent/agree", post(parent::agree_consent))
        .layer(middleware::from_fn_with_state(state, require_user))
        .fallback(fallback_404)
}

/// The full application router, without CORS (configured by the binary).
pub fn app_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readiness_check))
        .nest("/api/admin", admin_router(state.clone()))
        .nest("/api/parent", parent_router(state.clone()))
        .fallback(fallback_404)
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
        .layer(middleware::from_fn(security_headers_middleware))
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn readiness_check(State(state): State<Arc<AppState>>) -> Result<&'static str, StatusCode> {
    state.db.ping().await.map_err(|e| {
        tracing::warn!("readiness check failed: {}", e);
        StatusCode::SERVICE_UNAVAILABLE
    })?;
    Ok("ok")
}

fn authenticate(state: &AppState, req: &Request) -> Result<AuthUser, AppError> {
    let header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let token = bearer_token(header).ok_or_else(|| {
        tracing::debug!("missing bearer token");
        AppError::Unauthorized
    })?;
    state.verifier.verify(token).map_err(|e| {
        tracing::warn!("rejected bearer token: {}", e);
        AppError::Unauthorized
    })
}

/// Middleware: any authenticated user. Inserts [`AuthUser`] into extensions.
async fn require_user(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user = authenticate(&state, &req)?;
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

/// Middleware: authenticated administrators only.
async fn require_admin(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user = authenticate(&state, &req)?;
    if !user.is_admin {
        tracing::warn!(email = %user.email, "non-admin attempted admin API");
        return Err(AppError::Forbidden("administrator access required".into()));
    }
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

/// Middleware: injects a unique X-Request-Id into every response.
async fn request_id_middleware(req: Request, next: Next) -> Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

/// Middleware: security headers on every response.
async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers
        .entry(header::CACHE_CONTROL)
        .or_insert(HeaderValue::from_static("no-store"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("no-referrer"),
    );
    headers.remove(header::SERVER);
    resp
}
