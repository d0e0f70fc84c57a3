/// Per-mosque verification codes
///
/// Each mosque row carries exactly one current code. Reissuing overwrites it
/// with a compare-and-set on `code_version`, so the previous code stops
/// validating in the same write that makes the new one valid.
use crate::error::{is_unique_violation, RegistryError, RegistryResult};
use chrono::{DateTime, Duration, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use subtle::ConstantTimeEq;

/// Retry budget for compare-and-set and code collisions
const MAX_ISSUE_ATTEMPTS: usize = 5;

/// Longest allowed code lifetime
pub const MAX_EXPIRY_DAYS: i64 = 365;

/// Result of issuing a code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedCode {
    pub mosque_id: String,
    pub old_code: Option<String>,
    pub new_code: String,
    pub new_expiry: DateTime<Utc>,
}

/// Result of validating a code; a pure read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeValidation {
    pub valid: bool,
    pub expired: bool,
}

/// Snapshot of a mosque's code used as the compare-and-set baseline
#[derive(Debug, Clone)]
pub struct CodeState {
    pub mosque_id: String,
    pub code: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub code_version: i64,
}

impl CodeState {
    /// Classify a presented code against this state at `now`
    pub fn validate(&self, presented: &str, now: DateTime<Utc>) -> CodeValidation {
        let expired = self.expires_at.map_or(false, |exp| now > exp);
        let matches = self
            .code
            .as_deref()
            .map_or(false, |current| codes_equal(current, presented));

        CodeValidation {
            valid: matches && !expired,
            expired,
        }
    }

    /// Turn a validation into the registration error taxonomy
    pub fn check(&self, presented: &str, now: DateTime<Utc>) -> RegistryResult<()> {
        let validation = self.validate(presented, now);
        if validation.valid {
            return Ok(());
        }

        let matches = self
            .code
            .as_deref()
            .map_or(false, |current| codes_equal(current, presented));
        if matches && validation.expired {
            Err(RegistryError::ExpiredCode)
        } else {
            Err(RegistryError::InvalidCode)
        }
    }
}

fn codes_equal(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Verification code issuer
#[derive(Clone)]
pub struct VerificationCodeIssuer {
    db: SqlitePool,
}

impl VerificationCodeIssuer {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Generate a new opaque code
    pub fn generate_code() -> String {
        let code: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(10)
            .map(char::from)
            .collect();

        format!("MSQ-{}", code.to_uppercase())
    }

    /// Expiry timestamp for a lifetime in days
    pub fn expiry_from_now(expiry_days: i64) -> RegistryResult<DateTime<Utc>> {
        if !(1..=MAX_EXPIRY_DAYS).contains(&expiry_days) {
            return Err(RegistryError::Validation(format!(
                "Expiry must be between 1 and {} days",
                MAX_EXPIRY_DAYS
            )));
        }

        Ok(Utc::now() + Duration::days(expiry_days))
    }

    /// Read the current code state of a mosque
    pub async fn current_state(&self, mosque_id: &str) -> RegistryResult<CodeState> {
        let mut conn = self.db.acquire().await?;
        Self::current_state_in(&mut conn, mosque_id).await
    }

    /// Read the current code state using the caller's connection
    pub async fn current_state_in(
        conn: &mut SqliteConnection,
        mosque_id: &str,
    ) -> RegistryResult<CodeState> {
        let row = sqlx::query(
            r#"
            SELECT id, verification_code, verification_code_expires_at, code_version
            FROM mosque
            WHERE id = ?
            "#,
        )
        .bind(mosque_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| RegistryError::NotFound(format!("Mosque {} not found", mosque_id)))?;

        Ok(CodeState {
            mosque_id: row.try_get("id")?,
            code: row.try_get("verification_code")?,
            expires_at: row.try_get("verification_code_expires_at")?,
            code_version: row.try_get("code_version")?,
        })
    }

    /// Resolve the mosque whose current code is `code`.
    ///
    /// Expiry is not considered here; callers run [`CodeState::check`].
    pub async fn find_by_code(&self, code: &str) -> RegistryResult<Option<CodeState>> {
        let row = sqlx::query(
            r#"
            SELECT id, verification_code, verification_code_expires_at, code_version
            FROM mosque
            WHERE verification_code = ?
            "#,
        )
        .bind(code)
        .fetch_optional(&self.db)
        .await?;

        row.map(|row| {
            Ok(CodeState {
                mosque_id: row.try_get("id")?,
                code: row.try_get("verification_code")?,
                expires_at: row.try_get("verification_code_expires_at")?,
                code_version: row.try_get("code_version")?,
            })
        })
        .transpose()
    }

    /// Validate a presented code. No side effects.
    pub async fn validate(&self, mosque_id: &str, code: &str) -> RegistryResult<CodeValidation> {
        let state = self.current_state(mosque_id).await?;
        Ok(state.validate(code, Utc::now()))
    }

    /// Validate a presented code, mapping every failure to a registration error.
    ///
    /// A missing mosque is reported as an invalid code.
    pub async fn check(&self, mosque_id: &str, code: &str) -> RegistryResult<()> {
        let mut conn = self.db.acquire().await?;
        Self::check_in(&mut conn, mosque_id, code).await
    }

    /// Same as [`check`](Self::check) on the caller's connection
    pub async fn check_in(
        conn: &mut SqliteConnection,
        mosque_id: &str,
        code: &str,
    ) -> RegistryResult<()> {
        match Self::current_state_in(conn, mosque_id).await {
            Ok(state) => state.check(code, Utc::now()),
            Err(RegistryError::NotFound(_)) => Err(RegistryError::InvalidCode),
            Err(e) => Err(e),
        }
    }

    /// Overwrite the mosque's code if it still matches `expected`.
    ///
    /// Returns `Ok(None)` when another writer got there first.
    pub async fn compare_and_issue_in(
        conn: &mut SqliteConnection,
        expected: &CodeState,
        new_code: &str,
        new_expiry: DateTime<Utc>,
    ) -> RegistryResult<Option<IssuedCode>> {
        let result = sqlx::query(
            r#"
            UPDATE mosque
            SET verification_code = ?,
                verification_code_expires_at = ?,
                code_version = code_version + 1
            WHERE id = ? AND code_version = ?
            "#,
        )
        .bind(new_code)
        .bind(new_expiry)
        .bind(&expected.mosque_id)
        .bind(expected.code_version)
        .execute(conn)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        Ok(Some(IssuedCode {
            mosque_id: expected.mosque_id.clone(),
            old_code: expected.code.clone(),
            new_code: new_code.to_string(),
            new_expiry,
        }))
    }

    /// Issue a fresh code for a mosque, invalidating its previous one.
    ///
    /// The write is returned inside its open transaction; it takes effect
    /// when the caller commits, so records tied to the new code can join it.
    pub async fn issue(
        &self,
        mosque_id: &str,
        expiry_days: i64,
    ) -> RegistryResult<(Transaction<'static, Sqlite>, IssuedCode)> {
        let new_expiry = Self::expiry_from_now(expiry_days)?;

        for attempt in 1..=MAX_ISSUE_ATTEMPTS {
            let expected = self.current_state(mosque_id).await?;
            let new_code = Self::generate_code();

            let mut tx = self.db.begin().await?;
            match Self::compare_and_issue_in(&mut *tx, &expected, &new_code, new_expiry).await {
                Ok(Some(issued)) => {
                    tracing::debug!(mosque_id, "Issued new verification code");
                    return Ok((tx, issued));
                }
                Ok(None) => {
                    tx.rollback().await?;
                    tracing::debug!(mosque_id, attempt, "Code changed concurrently, retrying issue");
                }
                Err(RegistryError::Database(e)) if is_unique_violation(&e) => {
                    tx.rollback().await?;
                    tracing::debug!(mosque_id, attempt, "Generated code collided, retrying issue");
                }
                Err(e) => return Err(e),
            }
        }

        Err(RegistryError::ConcurrentModification(format!(
            "verification code of mosque {}",
            mosque_id
        )))
    }

    /// Mosques whose current code has passed its expiry
    pub async fn expired_codes(&self) -> RegistryResult<Vec<CodeState>> {
        let rows = sqlx::query(
            r#"
            SELECT id, verification_code, verification_code_expires_at, code_version
            FROM mosque
            WHERE verification_code IS NOT NULL
            ORDER BY id
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        let now = Utc::now();
        let mut expired = Vec::new();
        for row in rows {
            let state = CodeState {
                mosque_id: row.try_get("id")?,
                code: row.try_get("verification_code")?,
                expires_at: row.try_get("verification_code_expires_at")?,
                code_version: row.try_get("code_version")?,
            };
            if state.expires_at.map_or(false, |exp| now > exp) {
                expired.push(state);
            }
        }

        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db::test_pool, mosque::MosqueManager};

    async fn setup() -> (SqlitePool, VerificationCodeIssuer, MosqueManager) {
        let db = test_pool().await;
        let issuer = VerificationCodeIssuer::new(db.clone());
        let mosques = MosqueManager::new(db.clone());
        (db, issuer, mosques)
    }

    #[test]
    fn test_generate_code() {
        let code = VerificationCodeIssuer::generate_code();
        assert!(code.starts_with("MSQ-"));
        assert_eq!(code.len(), 14);
        assert!(code[4..].chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_state_validation_rules() {
        let now = Utc::now();
        let state = CodeState {
            mosque_id: "m1".to_string(),
            code: Some("MSQ-ABC".to_string()),
            expires_at: Some(now + Duration::days(1)),
            code_version: 0,
        };
        assert_eq!(
            state.validate("MSQ-ABC", now),
            CodeValidation {
                valid: true,
                expired: false
            }
        );
        assert!(!state.validate("MSQ-XYZ", now).valid);

        let later = now + Duration::days(2);
        assert_eq!(
            state.validate("MSQ-ABC", later),
            CodeValidation {
                valid: false,
                expired: true
            }
        );
        assert!(matches!(
            state.check("MSQ-ABC", later),
            Err(RegistryError::ExpiredCode)
        ));
        assert!(matches!(
            state.check("MSQ-XYZ", later),
            Err(RegistryError::InvalidCode)
        ));
    }

    #[test]
    fn test_expiry_bounds() {
        assert!(VerificationCodeIssuer::expiry_from_now(0).is_err());
        assert!(VerificationCodeIssuer::expiry_from_now(MAX_EXPIRY_DAYS + 1).is_err());
        assert!(VerificationCodeIssuer::expiry_from_now(7).is_ok());
    }

    #[tokio::test]
    async fn test_reissue_invalidates_previous_code() {
        let (_db, issuer, mosques) = setup().await;
        let mosque = mosques
            .create_mosque("Masjid Al-Noor", "Leeds", 30, "root@registry")
            .await
            .unwrap();
        let original = mosque.verification_code.clone().unwrap();

        let (tx, first) = issuer.issue(&mosque.id, 30).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(first.old_code.as_deref(), Some(original.as_str()));
        let (tx, second) = issuer.issue(&mosque.id, 30).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(second.old_code.as_deref(), Some(first.new_code.as_str()));

        let stale = issuer.validate(&mosque.id, &first.new_code).await.unwrap();
        assert!(!stale.valid);
        assert!(issuer.find_by_code(&first.new_code).await.unwrap().is_none());
        let found = issuer.find_by_code(&second.new_code).await.unwrap().unwrap();
        assert_eq!(found.mosque_id, mosque.id);
        let current = issuer.validate(&mosque.id, &second.new_code).await.unwrap();
        assert!(current.valid);
    }

    #[tokio::test]
    async fn test_validate_unknown_mosque() {
        let (_db, issuer, _mosques) = setup().await;
        assert!(matches!(
            issuer.validate("missing", "MSQ-ANY").await,
            Err(RegistryError::NotFound(_))
        ));
        assert!(matches!(
            issuer.check("missing", "MSQ-ANY").await,
            Err(RegistryError::InvalidCode)
        ));
    }

    #[tokio::test]
    async fn test_uncommitted_issue_leaves_old_code_valid() {
        let (_db, issuer, mosques) = setup().await;
        let mosque = mosques
            .create_mosque("Masjid A", "Bradford", 30, "root@registry")
            .await
            .unwrap();
        let original = mosque.verification_code.clone().unwrap();

        let (tx, issued) = issuer.issue(&mosque.id, 14).await.unwrap();
        tx.rollback().await.unwrap();

        assert!(issuer.validate(&mosque.id, &original).await.unwrap().valid);
        assert!(!issuer.validate(&mosque.id, &issued.new_code).await.unwrap().valid);
    }

    #[tokio::test]
    async fn test_expired_codes_listing() {
        let (db, issuer, mosques) = setup().await;
        let mosque = mosques
            .create_mosque("Masjid B", "Leicester", 30, "root@registry")
            .await
            .unwrap();

        assert!(issuer.expired_codes().await.unwrap().is_empty());

        sqlx::query("UPDATE mosque SET verification_code_expires_at = ? WHERE id = ?")
            .bind(Utc::now() - Duration::days(1))
            .bind(&mosque.id)
            .execute(&db)
            .await
            .unwrap();

        let expired = issuer.expired_codes().await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].mosque_id, mosque.id);
    }
}
