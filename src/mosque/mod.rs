/// Mosque records and their verification codes
///
/// Only the fields the verification lifecycle depends on live here; the
/// descriptive directory data (prayer times and so on) is owned elsewhere.

pub mod codes;

pub use codes::{CodeState, CodeValidation, IssuedCode, VerificationCodeIssuer};

use crate::{
    admin::audit::{AuditAction, AuditTrail, NewAuditEntry, TargetType},
    error::{is_unique_violation, RegistryError, RegistryResult},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

/// Mosque record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mosque {
    pub id: String,
    pub name: String,
    pub location: String,
    pub verification_code: Option<String>,
    pub verification_code_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Per-mosque slot of a bulk operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MosqueBatchResult<T> {
    pub mosque_id: String,
    #[serde(flatten)]
    pub outcome: BatchOutcome<T>,
}

/// Success or failure of one batch item
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum BatchOutcome<T> {
    Success { result: T },
    Error { code: String, message: String },
}

impl<T> BatchOutcome<T> {
    pub fn success(result: T) -> Self {
        BatchOutcome::Success { result }
    }

    pub fn error(err: &RegistryError) -> Self {
        BatchOutcome::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, BatchOutcome::Success { .. })
    }

    pub fn result(&self) -> Option<&T> {
        match self {
            BatchOutcome::Success { result } => Some(result),
            BatchOutcome::Error { .. } => None,
        }
    }
}

/// Mosque manager
#[derive(Clone)]
pub struct MosqueManager {
    db: SqlitePool,
}

impl MosqueManager {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Create a mosque and issue its first verification code
    pub async fn create_mosque(
        &self,
        name: &str,
        location: &str,
        expiry_days: i64,
        actor: &str,
    ) -> RegistryResult<Mosque> {
        if name.trim().is_empty() {
            return Err(RegistryError::Validation("Mosque name cannot be empty".to_string()));
        }

        let expires_at = VerificationCodeIssuer::expiry_from_now(expiry_days)?;
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        for _ in 0..3 {
            let code = VerificationCodeIssuer::generate_code();
            let mut tx = self.db.begin().await?;

            let inserted = sqlx::query(
                r#"
                INSERT INTO mosque (id, name, location, verification_code, verification_code_expires_at, code_version, created_at)
                VALUES (?, ?, ?, ?, ?, 0, ?)
                "#,
            )
            .bind(&id)
            .bind(name)
            .bind(location)
            .bind(&code)
            .bind(expires_at)
            .bind(now)
            .execute(&mut *tx)
            .await;

            match inserted {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => continue,
                Err(e) => return Err(e.into()),
            }

            AuditTrail::record_in(
                &mut tx,
                &NewAuditEntry::success(
                    AuditAction::MosqueCreated,
                    actor,
                    TargetType::Mosque,
                    &id,
                    Some(format!("{} ({})", name, location)),
                ),
            )
            .await?;
            tx.commit().await?;

            tracing::info!(mosque_id = %id, "Created mosque");

            return Ok(Mosque {
                id,
                name: name.to_string(),
                location: location.to_string(),
                verification_code: Some(code),
                verification_code_expires_at: Some(expires_at),
                created_at: now,
            });
        }

        Err(RegistryError::Internal(
            "Could not generate a unique verification code".to_string(),
        ))
    }

    /// Get mosque by id
    pub async fn get_mosque(&self, id: &str) -> RegistryResult<Option<Mosque>> {
        let mut conn = self.db.acquire().await?;
        Self::get_in(&mut conn, id).await
    }

    /// Get mosque by id on the caller's connection
    pub async fn get_in(conn: &mut SqliteConnection, id: &str) -> RegistryResult<Option<Mosque>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, location, verification_code, verification_code_expires_at, created_at
            FROM mosque
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(conn)
        .await?;

        row.as_ref().map(parse_mosque).transpose()
    }

    /// List all mosques
    pub async fn list_mosques(&self) -> RegistryResult<Vec<Mosque>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, location, verification_code, verification_code_expires_at, created_at
            FROM mosque
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(parse_mosque).collect()
    }

    /// Delete the mosque row only if no admin is still bound to it.
    ///
    /// Returns false when a bound admin is found.
    pub async fn delete_if_unbound_in(
        conn: &mut SqliteConnection,
        id: &str,
    ) -> RegistryResult<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM mosque
            WHERE id = ?
              AND NOT EXISTS (SELECT 1 FROM admin WHERE admin.mosque_id = mosque.id)
            "#,
        )
        .bind(id)
        .execute(conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn parse_mosque(row: &SqliteRow) -> RegistryResult<Mosque> {
    Ok(Mosque {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        location: row.try_get("location")?,
        verification_code: row.try_get("verification_code")?,
        verification_code_expires_at: row.try_get("verification_code_expires_at")?,
        created_at: row.try_get("created_at")?,
    })
}
