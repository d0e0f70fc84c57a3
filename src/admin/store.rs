/// Admin record store
///
/// Reads are free-standing; every write happens on a caller-supplied
/// connection so it can share a transaction with its audit entry. Updates
/// are compare-and-set on `version`.
use crate::{
    admin::status::{Admin, AdminStatus, StatusDetails},
    error::{RegistryError, RegistryResult},
};
use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection, SqlitePool};

const ADMIN_COLUMNS: &str = "id, name, email, password_hash, status, mosque_id, status_details, \
                             rejection_count, version, created_at, updated_at";

/// Admin record store
#[derive(Clone)]
pub struct AdminStore {
    db: SqlitePool,
}

impl AdminStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Get admin by id
    pub async fn get(&self, id: &str) -> RegistryResult<Option<Admin>> {
        let mut conn = self.db.acquire().await?;
        Self::get_in(&mut conn, id).await
    }

    /// Get admin by id on the caller's connection
    pub async fn get_in(conn: &mut SqliteConnection, id: &str) -> RegistryResult<Option<Admin>> {
        let row = sqlx::query(&format!("SELECT {} FROM admin WHERE id = ?", ADMIN_COLUMNS))
            .bind(id)
            .fetch_optional(conn)
            .await?;

        row.as_ref().map(parse_admin).transpose()
    }

    /// Get admin by id, failing if missing
    pub async fn require(&self, id: &str) -> RegistryResult<Admin> {
        self.get(id)
            .await?
            .ok_or_else(|| RegistryError::NotFound(format!("Admin {} not found", id)))
    }

    /// Find admin by login email
    pub async fn find_by_email(&self, email: &str) -> RegistryResult<Option<Admin>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM admin WHERE email = ? COLLATE NOCASE",
            ADMIN_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(parse_admin).transpose()
    }

    /// Check if email exists
    pub async fn email_exists(&self, email: &str) -> RegistryResult<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM admin WHERE email = ? COLLATE NOCASE")
                .bind(email)
                .fetch_one(&self.db)
                .await?;

        Ok(count > 0)
    }

    /// Admins currently bound (pending or approved) to a mosque
    pub async fn list_bound_to_mosque(&self, mosque_id: &str) -> RegistryResult<Vec<Admin>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM admin WHERE mosque_id = ? ORDER BY created_at ASC",
            ADMIN_COLUMNS
        ))
        .bind(mosque_id)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(parse_admin).collect()
    }

    /// The approved admin of a mosque, if any
    pub async fn approved_for_mosque(&self, mosque_id: &str) -> RegistryResult<Option<Admin>> {
        let mut conn = self.db.acquire().await?;
        Self::approved_for_mosque_in(&mut conn, mosque_id).await
    }

    /// The approved admin of a mosque on the caller's connection
    pub async fn approved_for_mosque_in(
        conn: &mut SqliteConnection,
        mosque_id: &str,
    ) -> RegistryResult<Option<Admin>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM admin WHERE mosque_id = ? AND status = 'approved'",
            ADMIN_COLUMNS
        ))
        .bind(mosque_id)
        .fetch_optional(conn)
        .await?;

        row.as_ref().map(parse_admin).transpose()
    }

    /// List admins with a given status
    pub async fn list_by_status(&self, status: AdminStatus) -> RegistryResult<Vec<Admin>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM admin WHERE status = ? ORDER BY updated_at DESC",
            ADMIN_COLUMNS
        ))
        .bind(status.as_str())
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(parse_admin).collect()
    }

    /// Insert a freshly registered admin
    pub async fn insert_in(conn: &mut SqliteConnection, admin: &Admin) -> RegistryResult<()> {
        let details = encode_details(&admin.details)?;

        sqlx::query(
            r#"
            INSERT INTO admin (id, name, email, password_hash, status, mosque_id, status_details,
                               rejection_count, version, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&admin.id)
        .bind(&admin.name)
        .bind(&admin.email)
        .bind(&admin.password_hash)
        .bind(admin.status().as_str())
        .bind(admin.mosque_id())
        .bind(details)
        .bind(admin.rejection_count)
        .bind(admin.version)
        .bind(admin.created_at)
        .bind(admin.updated_at)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Replace status metadata if the stored version still equals `expected_version`.
    ///
    /// Returns the stored record on success and `None` if the row moved on.
    pub async fn compare_and_set_in(
        conn: &mut SqliteConnection,
        current: &Admin,
        details: StatusDetails,
        rejection_count: i64,
    ) -> RegistryResult<Option<Admin>> {
        if rejection_count < current.rejection_count {
            return Err(RegistryError::Internal(
                "rejection_count may never decrease".to_string(),
            ));
        }

        let encoded = encode_details(&details)?;
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE admin
            SET status = ?,
                mosque_id = ?,
                status_details = ?,
                rejection_count = ?,
                version = version + 1,
                updated_at = ?
            WHERE id = ? AND version = ? AND rejection_count <= ?
            "#,
        )
        .bind(details.status().as_str())
        .bind(details.mosque_id())
        .bind(encoded)
        .bind(rejection_count)
        .bind(now)
        .bind(&current.id)
        .bind(current.version)
        .bind(rejection_count)
        .execute(conn)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        Ok(Some(Admin {
            details,
            rejection_count,
            version: current.version + 1,
            updated_at: now,
            ..current.clone()
        }))
    }
}

fn encode_details(details: &StatusDetails) -> RegistryResult<String> {
    serde_json::to_string(details)
        .map_err(|e| RegistryError::Internal(format!("Failed to encode status details: {}", e)))
}

fn parse_admin(row: &SqliteRow) -> RegistryResult<Admin> {
    let id: String = row.try_get("id")?;
    let status_str: String = row.try_get("status")?;
    let status = AdminStatus::from_str(&status_str)?;

    let details_json: String = row.try_get("status_details")?;
    let details: StatusDetails = serde_json::from_str(&details_json).map_err(|e| {
        RegistryError::Internal(format!("Corrupt status details for admin {}: {}", id, e))
    })?;

    if details.status() != status {
        return Err(RegistryError::Internal(format!(
            "Admin {} has status {} but {} metadata",
            id,
            status,
            details.status()
        )));
    }

    let mosque_id: Option<String> = row.try_get("mosque_id")?;
    if mosque_id.as_deref() != details.mosque_id() {
        return Err(RegistryError::Internal(format!(
            "Admin {} mosque binding disagrees with its metadata",
            id
        )));
    }

    Ok(Admin {
        id,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        details,
        rejection_count: row.try_get("rejection_count")?,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db::test_pool, mosque::MosqueManager};
    use chrono::Utc;

    fn pending_admin(id: &str, email: &str, mosque_id: &str) -> Admin {
        let now = Utc::now();
        Admin {
            id: id.to_string(),
            name: "Yusuf".to_string(),
            email: email.to_string(),
            password_hash: "hash".to_string(),
            details: StatusDetails::Pending {
                mosque_id: mosque_id.to_string(),
                verification_code_used: "MSQ-1".to_string(),
                application_notes: None,
                submitted_at: now,
            },
            rejection_count: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_insert_and_compare_and_set() {
        let db = test_pool().await;
        let mosque = MosqueManager::new(db.clone())
            .create_mosque("Masjid", "Leeds", 30, "root")
            .await
            .unwrap();
        let store = AdminStore::new(db.clone());

        let admin = pending_admin("a1", "yusuf@example.com", &mosque.id);
        let mut conn = db.acquire().await.unwrap();
        AdminStore::insert_in(&mut conn, &admin).await.unwrap();
        drop(conn);

        let stored = store.require("a1").await.unwrap();
        assert_eq!(stored.mosque_id(), Some(mosque.id.as_str()));
        assert!(store.email_exists("YUSUF@example.com").await.unwrap());

        let rejected = StatusDetails::Rejected {
            rejection_reason: "incomplete".to_string(),
            rejection_date: Utc::now(),
            can_reapply: true,
        };

        let mut conn = db.acquire().await.unwrap();
        let updated = AdminStore::compare_and_set_in(&mut conn, &stored, rejected.clone(), 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.version, 1);

        // Stale version loses
        let lost = AdminStore::compare_and_set_in(&mut conn, &stored, rejected, 1)
            .await
            .unwrap();
        assert!(lost.is_none());
        drop(conn);

        let fresh = store.require("a1").await.unwrap();
        assert_eq!(fresh.status(), AdminStatus::Rejected);
        assert_eq!(fresh.mosque_id(), None);
        assert_eq!(fresh.rejection_count, 1);
    }

    #[tokio::test]
    async fn test_binding_constraint_enforced_by_schema() {
        let db = test_pool().await;

        let result = sqlx::query(
            r#"
            INSERT INTO admin (id, name, email, password_hash, status, mosque_id, status_details,
                               rejection_count, version, created_at, updated_at)
            VALUES ('a2', 'X', 'x@example.com', 'h', 'removed', NULL, '{}', 0, 0, '', '')
            "#,
        )
        .execute(&db)
        .await;
        assert!(result.is_ok());

        let result = sqlx::query(
            r#"
            INSERT INTO admin (id, name, email, password_hash, status, mosque_id, status_details,
                               rejection_count, version, created_at, updated_at)
            VALUES ('a3', 'Y', 'y@example.com', 'h', 'pending', NULL, '{}', 0, 0, '', '')
            "#,
        )
        .execute(&db)
        .await;
        assert!(result.is_err());
    }
}
