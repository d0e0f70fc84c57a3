/// Registration, login and admin self-service endpoints
use crate::{
    admin::{Admin, AdminStatusView, LoginOutcome, RegistrationRequest},
    auth::{ApprovedAdminContext, SelfServiceContext},
    context::AppContext,
    error::{RegistryError, RegistryResult},
    mosque::{CodeValidation, Mosque},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

/// Build account routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/v1/mosques/:mosque_id/register", post(register))
        .route("/api/v1/mosques/:mosque_id/validate-code", post(validate_code))
        .route("/api/v1/login", post(login))
        .route("/api/v1/me/status", get(my_status))
        .route("/api/v1/me/reapply", post(reapply))
        .route("/api/v1/me/reverify", post(reverify))
        .route("/api/v1/me/mosque", get(my_mosque))
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    code: String,
    #[serde(flatten)]
    admin: RegistrationRequest,
}

/// Register as a prospective admin of a mosque
async fn register(
    State(ctx): State<AppContext>,
    Path(mosque_id): Path<String>,
    Json(req): Json<RegisterRequest>,
) -> RegistryResult<(StatusCode, Json<Admin>)> {
    let admin = ctx.lifecycle.register(&mosque_id, &req.code, req.admin).await?;
    Ok((StatusCode::CREATED, Json(admin)))
}

#[derive(Debug, Deserialize)]
struct CodeRequest {
    code: String,
}

/// Pre-check a verification code; an unknown mosque reads as an invalid code
async fn validate_code(
    State(ctx): State<AppContext>,
    Path(mosque_id): Path<String>,
    Json(req): Json<CodeRequest>,
) -> RegistryResult<Json<CodeValidation>> {
    match ctx.codes.validate(&mosque_id, &req.code).await {
        Ok(validation) => Ok(Json(validation)),
        Err(RegistryError::NotFound(_)) => Ok(Json(CodeValidation {
            valid: false,
            expired: false,
        })),
        Err(e) => Err(e),
    }
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

/// Resolve credentials to a success or a structured denial
async fn login(
    State(ctx): State<AppContext>,
    Json(req): Json<LoginRequest>,
) -> RegistryResult<Json<LoginOutcome>> {
    Ok(Json(ctx.login.login(&req.email, &req.password).await?))
}

/// Own status, reachable with a status-scoped token
async fn my_status(
    State(ctx): State<AppContext>,
    auth: SelfServiceContext,
) -> RegistryResult<Json<AdminStatusView>> {
    Ok(Json(ctx.login.status_view(&auth.admin_id).await?))
}

#[derive(Debug, Deserialize)]
struct ReapplyRequest {
    code: String,
    application_notes: Option<String>,
}

async fn reapply(
    State(ctx): State<AppContext>,
    auth: SelfServiceContext,
    Json(req): Json<ReapplyRequest>,
) -> RegistryResult<Json<Admin>> {
    let admin = ctx
        .lifecycle
        .reapply(&auth.admin_id, &req.code, req.application_notes)
        .await?;
    Ok(Json(admin))
}

/// Submit the regenerated code to restore full access
async fn reverify(
    State(ctx): State<AppContext>,
    auth: SelfServiceContext,
    Json(req): Json<CodeRequest>,
) -> RegistryResult<Json<Admin>> {
    Ok(Json(ctx.lifecycle.reverify(&auth.admin_id, &req.code).await?))
}

/// The mosque an approved admin manages, including its current code
async fn my_mosque(
    State(ctx): State<AppContext>,
    auth: ApprovedAdminContext,
) -> RegistryResult<Json<Mosque>> {
    Ok(Json(ctx.login.managed_mosque(&auth.admin).await?))
}
