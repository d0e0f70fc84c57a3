/// Append-only audit trail of state-changing registry events
use crate::error::{RegistryError, RegistryResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection, SqlitePool};

/// Closed vocabulary of audited actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    AdminRegistered,
    AdminApproved,
    AdminRejected,
    AdminReapplyAllowed,
    AdminReapplyDenied,
    AdminReapplication,
    AdminRemoved,
    AdminReverified,
    /// Cascade outcome applied to a single admin
    AdminStatusChanged,
    MosqueCreated,
    MosqueDeleted,
    CodeRegenerated,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::AdminRegistered => "admin_registered",
            AuditAction::AdminApproved => "admin_approved",
            AuditAction::AdminRejected => "admin_rejected",
            AuditAction::AdminReapplyAllowed => "admin_reapply_allowed",
            AuditAction::AdminReapplyDenied => "admin_reapply_denied",
            AuditAction::AdminReapplication => "admin_reapplication",
            AuditAction::AdminRemoved => "admin_removed",
            AuditAction::AdminReverified => "admin_reverified",
            AuditAction::AdminStatusChanged => "admin_status_changed",
            AuditAction::MosqueCreated => "mosque_created",
            AuditAction::MosqueDeleted => "mosque_deleted",
            AuditAction::CodeRegenerated => "code_regenerated",
        }
    }

    pub fn from_str(s: &str) -> RegistryResult<Self> {
        match s {
            "admin_registered" => Ok(AuditAction::AdminRegistered),
            "admin_approved" => Ok(AuditAction::AdminApproved),
            "admin_rejected" => Ok(AuditAction::AdminRejected),
            "admin_reapply_allowed" => Ok(AuditAction::AdminReapplyAllowed),
            "admin_reapply_denied" => Ok(AuditAction::AdminReapplyDenied),
            "admin_reapplication" => Ok(AuditAction::AdminReapplication),
            "admin_removed" => Ok(AuditAction::AdminRemoved),
            "admin_reverified" => Ok(AuditAction::AdminReverified),
            "admin_status_changed" => Ok(AuditAction::AdminStatusChanged),
            "mosque_created" => Ok(AuditAction::MosqueCreated),
            "mosque_deleted" => Ok(AuditAction::MosqueDeleted),
            "code_regenerated" => Ok(AuditAction::CodeRegenerated),
            _ => Err(RegistryError::Internal(format!("Unknown audit action: {}", s))),
        }
    }
}

/// Kind of entity an audit entry is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Admin,
    Mosque,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Admin => "admin",
            TargetType::Mosque => "mosque",
        }
    }

    pub fn from_str(s: &str) -> RegistryResult<Self> {
        match s {
            "admin" => Ok(TargetType::Admin),
            "mosque" => Ok(TargetType::Mosque),
            _ => Err(RegistryError::Internal(format!("Unknown audit target: {}", s))),
        }
    }
}

/// Outcome recorded on an audit entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Success,
    Failed,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Success => "success",
            AuditStatus::Failed => "failed",
        }
    }
}

/// Immutable audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub action_type: AuditAction,
    pub actor: String,
    pub target_type: TargetType,
    pub target_id: String,
    pub status: AuditStatus,
    pub timestamp: DateTime<Utc>,
    pub detail: Option<String>,
}

/// Entry about to be appended
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub action_type: AuditAction,
    pub actor: String,
    pub target_type: TargetType,
    pub target_id: String,
    pub status: AuditStatus,
    pub detail: Option<String>,
}

impl NewAuditEntry {
    pub fn success(
        action_type: AuditAction,
        actor: &str,
        target_type: TargetType,
        target_id: &str,
        detail: Option<String>,
    ) -> Self {
        Self {
            action_type,
            actor: actor.to_string(),
            target_type,
            target_id: target_id.to_string(),
            status: AuditStatus::Success,
            detail,
        }
    }

    pub fn failed(
        action_type: AuditAction,
        actor: &str,
        target_type: TargetType,
        target_id: &str,
        reason: String,
    ) -> Self {
        Self {
            action_type,
            actor: actor.to_string(),
            target_type,
            target_id: target_id.to_string(),
            status: AuditStatus::Failed,
            detail: Some(reason),
        }
    }
}

/// Audit trail; entries are only ever inserted
#[derive(Clone)]
pub struct AuditTrail {
    db: SqlitePool,
}

impl AuditTrail {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Append an entry as part of the caller's transaction
    pub async fn record_in(
        conn: &mut SqliteConnection,
        entry: &NewAuditEntry,
    ) -> RegistryResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO audit_log (action_type, actor, target_type, target_id, status, timestamp, detail)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.action_type.as_str())
        .bind(&entry.actor)
        .bind(entry.target_type.as_str())
        .bind(&entry.target_id)
        .bind(entry.status.as_str())
        .bind(Utc::now())
        .bind(&entry.detail)
        .execute(conn)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Append a standalone entry (used for audited failures)
    pub async fn record(&self, entry: &NewAuditEntry) -> RegistryResult<i64> {
        let mut conn = self.db.acquire().await?;
        let id = Self::record_in(&mut conn, entry).await?;

        if entry.status == AuditStatus::Failed {
            tracing::warn!(
                action = entry.action_type.as_str(),
                target_id = %entry.target_id,
                detail = ?entry.detail,
                "Audited failed transition"
            );
        }

        Ok(id)
    }

    /// Most recent entries first
    pub async fn list_recent(&self, limit: i64) -> RegistryResult<Vec<AuditEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, action_type, actor, target_type, target_id, status, timestamp, detail
            FROM audit_log
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(parse_entry).collect()
    }

    /// All entries about one entity, oldest first
    pub async fn for_target(
        &self,
        target_type: TargetType,
        target_id: &str,
    ) -> RegistryResult<Vec<AuditEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, action_type, actor, target_type, target_id, status, timestamp, detail
            FROM audit_log
            WHERE target_type = ? AND target_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(target_type.as_str())
        .bind(target_id)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(parse_entry).collect()
    }
}

fn parse_entry(row: &SqliteRow) -> RegistryResult<AuditEntry> {
    let action: String = row.try_get("action_type")?;
    let target_type: String = row.try_get("target_type")?;
    let status: String = row.try_get("status")?;

    Ok(AuditEntry {
        id: row.try_get("id")?,
        action_type: AuditAction::from_str(&action)?,
        actor: row.try_get("actor")?,
        target_type: TargetType::from_str(&target_type)?,
        target_id: row.try_get("target_id")?,
        status: if status == "success" {
            AuditStatus::Success
        } else {
            AuditStatus::Failed
        },
        timestamp: row.try_get("timestamp")?,
        detail: row.try_get("detail")?,
    })
}
