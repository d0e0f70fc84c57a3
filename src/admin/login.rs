/// Login resolution
///
/// After the password checks out, an admin gets a full-access token only
/// when approved under the mosque's current code. Every other state yields a
/// denial carrying a status-scoped token and only that state's details.
use crate::{
    admin::{
        lifecycle::MAX_TRANSITION_ATTEMPTS,
        status::{Admin, StatusDetails},
        store::AdminStore,
    },
    auth::{dummy_password_hash, verify_password, Claims, TokenManager, TokenScope},
    error::{RegistryError, RegistryResult},
    mosque::{Mosque, MosqueManager},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use subtle::ConstantTimeEq;

const REVERIFY_INSTRUCTION: &str =
    "Your mosque's verification code has been regenerated. Submit the new code to restore access.";

/// Result of a login attempt with valid credentials
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LoginOutcome {
    Success {
        token: String,
        admin: Admin,
    },
    Denied {
        /// Status-scoped token
        token: String,
        #[serde(flatten)]
        denial: Denial,
    },
}

/// Why a login was denied, with the details appropriate to that state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Denial {
    CodeRegeneratedNeedsCode {
        mosque_name: String,
        mosque_location: String,
        instruction: String,
    },
    PendingApproval {
        submitted_at: DateTime<Utc>,
    },
    AccountRejected {
        rejection_reason: String,
        rejection_date: DateTime<Utc>,
        can_reapply: bool,
    },
    MosqueDeleted {
        deletion_reason: String,
        deletion_date: DateTime<Utc>,
        deleted_mosque_name: String,
        deleted_mosque_location: String,
        can_reapply: bool,
    },
    AdminRemoved {
        removal_reason: String,
        can_reapply: bool,
    },
}

impl Denial {
    pub fn code(&self) -> &'static str {
        match self {
            Denial::CodeRegeneratedNeedsCode { .. } => "CODE_REGENERATED_NEEDS_CODE",
            Denial::PendingApproval { .. } => "PENDING_APPROVAL",
            Denial::AccountRejected { .. } => "ACCOUNT_REJECTED",
            Denial::MosqueDeleted { .. } => "MOSQUE_DELETED",
            Denial::AdminRemoved { .. } => "ADMIN_REMOVED",
        }
    }
}

/// What an admin sees about themselves through a status token
#[derive(Debug, Clone, Serialize)]
pub struct AdminStatusView {
    pub admin: Admin,
    /// Approved, but bound to a code the mosque no longer uses
    pub needs_new_code: bool,
}

/// Login resolver
#[derive(Clone)]
pub struct LoginResolver {
    store: AdminStore,
    mosques: MosqueManager,
    tokens: TokenManager,
}

impl LoginResolver {
    pub fn new(db: SqlitePool, tokens: TokenManager) -> Self {
        Self {
            store: AdminStore::new(db.clone()),
            mosques: MosqueManager::new(db),
            tokens,
        }
    }

    /// Resolve credentials to exactly one outcome
    pub async fn login(&self, email: &str, password: &str) -> RegistryResult<LoginOutcome> {
        let found = self.store.find_by_email(email.trim()).await?;

        // Unknown emails pay for a full verification too
        let hash = match &found {
            Some(admin) => admin.password_hash.as_str(),
            None => dummy_password_hash(),
        };
        let verified = verify_password(password, hash);

        let admin = match found {
            Some(admin) if verified => admin,
            _ => {
                tracing::debug!("Login refused: invalid credentials");
                return Err(RegistryError::Authentication(
                    "Invalid credentials".to_string(),
                ));
            }
        };

        let (admin, denial) = self.resolve(admin).await?;
        let denial = match denial {
            None => {
                let token = self.tokens.issue(&admin.id, TokenScope::Admin)?;
                tracing::info!(admin_id = %admin.id, "Admin logged in");
                return Ok(LoginOutcome::Success { token, admin });
            }
            Some(denial) => denial,
        };

        tracing::info!(admin_id = %admin.id, code = denial.code(), "Login denied");
        let token = self.tokens.issue(&admin.id, TokenScope::Status)?;
        Ok(LoginOutcome::Denied { token, denial })
    }

    /// Admin behind a token, if it may use approved-only operations right now
    pub async fn authorize_approved(&self, claims: &Claims) -> RegistryResult<Admin> {
        if claims.scope != TokenScope::Admin {
            return Err(RegistryError::Authorization(
                "Approved admin access required".to_string(),
            ));
        }

        let admin = self
            .store
            .get(&claims.sub)
            .await?
            .ok_or_else(|| RegistryError::Authentication("Unknown admin".to_string()))?;

        match self.resolve(admin).await? {
            (admin, None) => Ok(admin),
            (admin, Some(denial)) => {
                tracing::debug!(admin_id = %admin.id, code = denial.code(), "Approved-only access refused");
                Err(RegistryError::Authorization(format!(
                    "Access revoked: {}",
                    denial.code()
                )))
            }
        }
    }

    /// Self-service status view
    pub async fn status_view(&self, admin_id: &str) -> RegistryResult<AdminStatusView> {
        let admin = self.store.require(admin_id).await?;
        let (admin, denial) = self.resolve(admin).await?;
        let needs_new_code = matches!(denial, Some(Denial::CodeRegeneratedNeedsCode { .. }));

        Ok(AdminStatusView {
            admin,
            needs_new_code,
        })
    }

    /// The mosque an approved admin manages
    pub async fn managed_mosque(&self, admin: &Admin) -> RegistryResult<Mosque> {
        let mosque_id = admin.mosque_id().ok_or_else(|| RegistryError::NotApproved {
            current: admin.status().to_string(),
        })?;

        self.mosques
            .get_mosque(mosque_id)
            .await?
            .ok_or_else(|| RegistryError::NotFound(format!("Mosque {} not found", mosque_id)))
    }

    /// Classify an admin, re-reading it while its snapshot is stale.
    ///
    /// An approved snapshot whose mosque is gone was taken before a cascade
    /// moved the admin; the fresh row carries the cascade's outcome.
    pub(crate) async fn resolve(&self, admin: Admin) -> RegistryResult<(Admin, Option<Denial>)> {
        let mut admin = admin;

        for attempt in 1..=MAX_TRANSITION_ATTEMPTS {
            if let Some(denial) = self.classify(&admin).await? {
                return Ok((admin, denial));
            }

            tracing::debug!(admin_id = %admin.id, attempt, "Admin snapshot stale, re-reading");
            admin = self.store.require(&admin.id).await?;
        }

        Err(RegistryError::ConcurrentModification(format!("admin {}", admin.id)))
    }

    /// Outer `None` when the snapshot points at a mosque that no longer
    /// exists; inner `None` when the admin has full access.
    async fn classify(&self, admin: &Admin) -> RegistryResult<Option<Option<Denial>>> {
        let denial = match &admin.details {
            StatusDetails::Approved {
                mosque_id,
                bound_code,
                ..
            } => {
                let mosque = match self.mosques.get_mosque(mosque_id).await? {
                    Some(mosque) => mosque,
                    None => return Ok(None),
                };

                let current = mosque.verification_code.as_deref().unwrap_or_default();
                if bool::from(current.as_bytes().ct_eq(bound_code.as_bytes())) {
                    return Ok(Some(None));
                }

                Denial::CodeRegeneratedNeedsCode {
                    mosque_name: mosque.name,
                    mosque_location: mosque.location,
                    instruction: REVERIFY_INSTRUCTION.to_string(),
                }
            }
            StatusDetails::Pending { submitted_at, .. } => Denial::PendingApproval {
                submitted_at: *submitted_at,
            },
            StatusDetails::Rejected {
                rejection_reason,
                rejection_date,
                can_reapply,
            } => Denial::AccountRejected {
                rejection_reason: rejection_reason.clone(),
                rejection_date: *rejection_date,
                can_reapply: *can_reapply,
            },
            StatusDetails::MosqueDeleted {
                mosque_deletion_reason,
                mosque_deletion_date,
                deleted_mosque_name,
                deleted_mosque_location,
                can_reapply,
            } => Denial::MosqueDeleted {
                deletion_reason: mosque_deletion_reason.clone(),
                deletion_date: *mosque_deletion_date,
                deleted_mosque_name: deleted_mosque_name.clone(),
                deleted_mosque_location: deleted_mosque_location.clone(),
                can_reapply: *can_reapply,
            },
            StatusDetails::Removed {
                removal_reason,
                can_reapply,
                ..
            } => Denial::AdminRemoved {
                removal_reason: removal_reason.clone(),
                can_reapply: *can_reapply,
            },
        };

        Ok(Some(Some(denial)))
    }
}
