/// Super-admin endpoints: mosque lifecycle, admin review and the audit log
use crate::{
    admin::{Admin, AuditEntry, MosqueDeletion, RegeneratedCode, TargetType},
    auth::SuperAdminContext,
    context::AppContext,
    error::{RegistryError, RegistryResult},
    mosque::{Mosque, MosqueBatchResult},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

const DEFAULT_AUDIT_LIMIT: i64 = 100;
const MAX_AUDIT_LIMIT: i64 = 1000;

/// Build super-admin routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        // Mosques
        .route("/api/v1/admin/mosques", post(create_mosque).get(list_mosques))
        .route("/api/v1/admin/mosques/bulk-delete", post(bulk_delete_mosques))
        .route(
            "/api/v1/admin/mosques/bulk-regenerate-codes",
            post(bulk_regenerate_codes),
        )
        .route("/api/v1/admin/mosques/:mosque_id/delete", post(delete_mosque))
        .route(
            "/api/v1/admin/mosques/:mosque_id/regenerate-code",
            post(regenerate_code),
        )
        // Admin review
        .route("/api/v1/admin/admins/pending", get(list_pending))
        .route("/api/v1/admin/admins/:admin_id", get(get_admin))
        .route("/api/v1/admin/admins/:admin_id/approve", post(approve))
        .route("/api/v1/admin/admins/:admin_id/reject", post(reject))
        .route("/api/v1/admin/admins/:admin_id/remove", post(remove))
        .route("/api/v1/admin/admins/:admin_id/allow-reapply", post(allow_reapply))
        .route("/api/v1/admin/admins/:admin_id/deny-reapply", post(deny_reapply))
        // Audit
        .route("/api/v1/admin/audit", get(list_audit))
        .route("/api/v1/admin/audit/:target_type/:target_id", get(audit_for_target))
}

#[derive(Debug, Serialize)]
struct BatchResponse<T> {
    results: Vec<MosqueBatchResult<T>>,
}

// ============================================================================
// Mosques
// ============================================================================

#[derive(Debug, Deserialize)]
struct CreateMosqueRequest {
    name: String,
    location: String,
    expiry_days: Option<i64>,
}

async fn create_mosque(
    State(ctx): State<AppContext>,
    auth: SuperAdminContext,
    Json(req): Json<CreateMosqueRequest>,
) -> RegistryResult<(StatusCode, Json<Mosque>)> {
    let expiry_days = req
        .expiry_days
        .unwrap_or(ctx.config.verification.default_expiry_days);

    let mosque = ctx
        .mosques
        .create_mosque(&req.name, &req.location, expiry_days, &auth.subject)
        .await?;
    Ok((StatusCode::CREATED, Json(mosque)))
}

async fn list_mosques(
    State(ctx): State<AppContext>,
    _auth: SuperAdminContext,
) -> RegistryResult<Json<Vec<Mosque>>> {
    Ok(Json(ctx.mosques.list_mosques().await?))
}

#[derive(Debug, Deserialize)]
struct DeleteMosqueRequest {
    reason: String,
    #[serde(default = "default_can_reapply")]
    can_reapply: bool,
}

fn default_can_reapply() -> bool {
    true
}

async fn delete_mosque(
    State(ctx): State<AppContext>,
    auth: SuperAdminContext,
    Path(mosque_id): Path<String>,
    Json(req): Json<DeleteMosqueRequest>,
) -> RegistryResult<Json<MosqueDeletion>> {
    let deletion = ctx
        .cascade
        .delete_mosque(&mosque_id, &auth.subject, &req.reason, req.can_reapply)
        .await?;
    Ok(Json(deletion))
}

#[derive(Debug, Deserialize)]
struct BulkDeleteRequest {
    mosque_ids: Vec<String>,
    reason: String,
    #[serde(default = "default_can_reapply")]
    can_reapply: bool,
}

async fn bulk_delete_mosques(
    State(ctx): State<AppContext>,
    auth: SuperAdminContext,
    Json(req): Json<BulkDeleteRequest>,
) -> RegistryResult<Json<BatchResponse<MosqueDeletion>>> {
    require_ids(&req.mosque_ids)?;

    let results = ctx
        .cascade
        .bulk_delete_mosques(&req.mosque_ids, &auth.subject, &req.reason, req.can_reapply)
        .await;
    Ok(Json(BatchResponse { results }))
}

#[derive(Debug, Deserialize)]
struct RegenerateRequest {
    expiry_days: Option<i64>,
}

async fn regenerate_code(
    State(ctx): State<AppContext>,
    auth: SuperAdminContext,
    Path(mosque_id): Path<String>,
    Json(req): Json<RegenerateRequest>,
) -> RegistryResult<Json<RegeneratedCode>> {
    let expiry_days = req
        .expiry_days
        .unwrap_or(ctx.config.verification.default_expiry_days);

    let regenerated = ctx
        .cascade
        .regenerate_code(&mosque_id, expiry_days, &auth.subject)
        .await?;
    Ok(Json(regenerated))
}

#[derive(Debug, Deserialize)]
struct BulkRegenerateRequest {
    mosque_ids: Vec<String>,
    expiry_days: Option<i64>,
}

async fn bulk_regenerate_codes(
    State(ctx): State<AppContext>,
    auth: SuperAdminContext,
    Json(req): Json<BulkRegenerateRequest>,
) -> RegistryResult<Json<BatchResponse<RegeneratedCode>>> {
    require_ids(&req.mosque_ids)?;
    let expiry_days = req
        .expiry_days
        .unwrap_or(ctx.config.verification.default_expiry_days);

    let results = ctx
        .cascade
        .bulk_regenerate_codes(&req.mosque_ids, expiry_days, &auth.subject)
        .await;
    Ok(Json(BatchResponse { results }))
}

fn require_ids(ids: &[String]) -> RegistryResult<()> {
    if ids.is_empty() {
        return Err(RegistryError::Validation(
            "mosque_ids cannot be empty".to_string(),
        ));
    }
    Ok(())
}

// ============================================================================
// Admin review
// ============================================================================

async fn list_pending(
    State(ctx): State<AppContext>,
    _auth: SuperAdminContext,
) -> RegistryResult<Json<Vec<Admin>>> {
    Ok(Json(ctx.lifecycle.pending().await?))
}

async fn get_admin(
    State(ctx): State<AppContext>,
    _auth: SuperAdminContext,
    Path(admin_id): Path<String>,
) -> RegistryResult<Json<Admin>> {
    Ok(Json(ctx.admins.require(&admin_id).await?))
}

async fn approve(
    State(ctx): State<AppContext>,
    auth: SuperAdminContext,
    Path(admin_id): Path<String>,
) -> RegistryResult<Json<Admin>> {
    Ok(Json(ctx.lifecycle.approve(&admin_id, &auth.subject).await?))
}

#[derive(Debug, Deserialize)]
struct ReasonRequest {
    reason: String,
}

async fn reject(
    State(ctx): State<AppContext>,
    auth: SuperAdminContext,
    Path(admin_id): Path<String>,
    Json(req): Json<ReasonRequest>,
) -> RegistryResult<Json<Admin>> {
    let admin = ctx
        .lifecycle
        .reject(&admin_id, &auth.subject, &req.reason)
        .await?;
    Ok(Json(admin))
}

async fn remove(
    State(ctx): State<AppContext>,
    auth: SuperAdminContext,
    Path(admin_id): Path<String>,
    Json(req): Json<ReasonRequest>,
) -> RegistryResult<Json<Admin>> {
    let admin = ctx
        .lifecycle
        .remove(&admin_id, &auth.subject, &req.reason)
        .await?;
    Ok(Json(admin))
}

async fn allow_reapply(
    State(ctx): State<AppContext>,
    auth: SuperAdminContext,
    Path(admin_id): Path<String>,
) -> RegistryResult<Json<Admin>> {
    Ok(Json(ctx.lifecycle.allow_reapply(&admin_id, &auth.subject).await?))
}

async fn deny_reapply(
    State(ctx): State<AppContext>,
    auth: SuperAdminContext,
    Path(admin_id): Path<String>,
) -> RegistryResult<Json<Admin>> {
    Ok(Json(ctx.lifecycle.deny_reapply(&admin_id, &auth.subject).await?))
}

// ============================================================================
// Audit
// ============================================================================

#[derive(Debug, Deserialize)]
struct AuditQuery {
    limit: Option<i64>,
}

async fn list_audit(
    State(ctx): State<AppContext>,
    _auth: SuperAdminContext,
    Query(query): Query<AuditQuery>,
) -> RegistryResult<Json<Vec<AuditEntry>>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_AUDIT_LIMIT)
        .clamp(1, MAX_AUDIT_LIMIT);
    Ok(Json(ctx.audit.list_recent(limit).await?))
}

async fn audit_for_target(
    State(ctx): State<AppContext>,
    _auth: SuperAdminContext,
    Path((target_type, target_id)): Path<(String, String)>,
) -> RegistryResult<Json<Vec<AuditEntry>>> {
    let target_type = TargetType::from_str(&target_type)
        .map_err(|_| RegistryError::Validation(format!("Unknown target type: {}", target_type)))?;
    Ok(Json(ctx.audit.for_target(target_type, &target_id).await?))
}
