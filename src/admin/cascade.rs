/// Mosque-level events that re-classify every admin bound to the mosque
///
/// Each admin is moved in its own transaction; a cascade never rolls back
/// admins it already moved. Bulk operations report one result per mosque.
use crate::{
    admin::{
        audit::{AuditAction, AuditTrail, NewAuditEntry, TargetType},
        lifecycle::{LifecycleStateMachine, Transition, MAX_TRANSITION_ATTEMPTS},
        status::{Admin, StatusDetails},
        store::AdminStore,
    },
    error::{RegistryError, RegistryResult},
    mosque::{BatchOutcome, Mosque, MosqueBatchResult, MosqueManager, VerificationCodeIssuer},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

/// Times the coordinator re-sweeps a mosque that gained admins mid-cascade
const MAX_CASCADE_ROUNDS: usize = 3;

/// Outcome of deleting one mosque
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MosqueDeletion {
    pub mosque_id: String,
    pub cascaded_admin_ids: Vec<String>,
    /// Admins still bound because their transition failed; retry these
    pub failed_admin_ids: Vec<String>,
    pub mosque_removed: bool,
}

/// Outcome of regenerating one mosque's code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegeneratedCode {
    pub mosque_id: String,
    pub old_code: Option<String>,
    pub new_code: String,
    pub new_expiry: DateTime<Utc>,
    /// Approved admin whose binding is now stale
    pub affected_admin: Option<Admin>,
}

/// Cascade coordinator
#[derive(Clone)]
pub struct CascadeCoordinator {
    db: SqlitePool,
    store: AdminStore,
    mosques: MosqueManager,
    codes: VerificationCodeIssuer,
    lifecycle: LifecycleStateMachine,
}

impl CascadeCoordinator {
    pub fn new(db: SqlitePool) -> Self {
        Self {
            store: AdminStore::new(db.clone()),
            mosques: MosqueManager::new(db.clone()),
            codes: VerificationCodeIssuer::new(db.clone()),
            lifecycle: LifecycleStateMachine::new(db.clone()),
            db,
        }
    }

    /// Move every bound admin to `mosque_deleted`, then delete the mosque.
    ///
    /// The mosque row is kept when any admin could not be moved.
    pub async fn delete_mosque(
        &self,
        mosque_id: &str,
        actor: &str,
        reason: &str,
        can_reapply: bool,
    ) -> RegistryResult<MosqueDeletion> {
        if reason.trim().is_empty() {
            return Err(RegistryError::Validation("A reason is required".to_string()));
        }

        // Snapshot before anything is removed
        let mosque = self
            .mosques
            .get_mosque(mosque_id)
            .await?
            .ok_or_else(|| RegistryError::NotFound(format!("Mosque {} not found", mosque_id)))?;

        let mut cascaded_admin_ids = Vec::new();
        let mut failed_admin_ids = Vec::new();

        for round in 1..=MAX_CASCADE_ROUNDS {
            failed_admin_ids.clear();

            for admin in self.store.list_bound_to_mosque(mosque_id).await? {
                match self
                    .detach_admin(&admin.id, &mosque, actor, reason, can_reapply)
                    .await
                {
                    Ok(Some(moved)) => cascaded_admin_ids.push(moved.id),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(mosque_id, admin_id = %admin.id, error = %e, "Cascade failed for admin");
                        failed_admin_ids.push(admin.id);
                    }
                }
            }

            if !failed_admin_ids.is_empty() {
                break;
            }

            let mut tx = self.db.begin().await?;
            if MosqueManager::delete_if_unbound_in(&mut *tx, mosque_id).await? {
                AuditTrail::record_in(
                    &mut *tx,
                    &NewAuditEntry::success(
                        AuditAction::MosqueDeleted,
                        actor,
                        TargetType::Mosque,
                        mosque_id,
                        Some(format!(
                            "{} ({}): {}; {} admin(s) re-classified",
                            mosque.name,
                            mosque.location,
                            reason,
                            cascaded_admin_ids.len()
                        )),
                    ),
                )
                .await?;
                tx.commit().await?;

                tracing::info!(
                    mosque_id,
                    cascaded = cascaded_admin_ids.len(),
                    "Mosque deleted"
                );

                return Ok(MosqueDeletion {
                    mosque_id: mosque_id.to_string(),
                    cascaded_admin_ids,
                    failed_admin_ids,
                    mosque_removed: true,
                });
            }

            if MosqueManager::get_in(&mut *tx, mosque_id).await?.is_none() {
                return Err(RegistryError::NotFound(format!("Mosque {} not found", mosque_id)));
            }
            tx.rollback().await?;

            tracing::debug!(mosque_id, round, "Admin bound during cascade, sweeping again");
        }

        let detail = if failed_admin_ids.is_empty() {
            "admins kept binding to the mosque during the cascade".to_string()
        } else {
            format!("cascade failed for admins {}", failed_admin_ids.join(", "))
        };
        self.record_failure(AuditAction::MosqueDeleted, actor, mosque_id, detail)
            .await;

        if failed_admin_ids.is_empty() {
            return Err(RegistryError::ConcurrentModification(format!(
                "mosque {}",
                mosque_id
            )));
        }

        Ok(MosqueDeletion {
            mosque_id: mosque_id.to_string(),
            cascaded_admin_ids,
            failed_admin_ids,
            mosque_removed: false,
        })
    }

    /// Delete many mosques independently
    pub async fn bulk_delete_mosques(
        &self,
        mosque_ids: &[String],
        actor: &str,
        reason: &str,
        can_reapply: bool,
    ) -> Vec<MosqueBatchResult<MosqueDeletion>> {
        let mut results = Vec::with_capacity(mosque_ids.len());

        for mosque_id in mosque_ids {
            let outcome = match self.delete_mosque(mosque_id, actor, reason, can_reapply).await {
                Ok(deletion) if deletion.mosque_removed => BatchOutcome::success(deletion),
                Ok(deletion) => BatchOutcome::error(&RegistryError::CascadeIncomplete {
                    mosque_id: deletion.mosque_id,
                    failed_admins: deletion.failed_admin_ids,
                }),
                Err(e) => {
                    tracing::warn!(mosque_id = %mosque_id, error = %e, "Bulk delete item failed");
                    BatchOutcome::error(&e)
                }
            };
            results.push(MosqueBatchResult {
                mosque_id: mosque_id.clone(),
                outcome,
            });
        }

        results
    }

    /// Issue a new code and flag the approved admin, if any, as stale
    pub async fn regenerate_code(
        &self,
        mosque_id: &str,
        expiry_days: i64,
        actor: &str,
    ) -> RegistryResult<RegeneratedCode> {
        let (mut tx, issued) = self.codes.issue(mosque_id, expiry_days).await?;

        let affected_admin = AdminStore::approved_for_mosque_in(&mut *tx, mosque_id).await?;

        AuditTrail::record_in(
            &mut *tx,
            &NewAuditEntry::success(
                AuditAction::CodeRegenerated,
                actor,
                TargetType::Mosque,
                mosque_id,
                Some(format!("new code expires {}", issued.new_expiry.to_rfc3339())),
            ),
        )
        .await?;

        if let Some(admin) = &affected_admin {
            AuditTrail::record_in(
                &mut *tx,
                &NewAuditEntry::success(
                    AuditAction::AdminStatusChanged,
                    actor,
                    TargetType::Admin,
                    &admin.id,
                    Some(format!(
                        "mosque {} code regenerated; re-verification required",
                        mosque_id
                    )),
                ),
            )
            .await?;
        }
        tx.commit().await?;

        tracing::info!(
            mosque_id,
            affected_admin = ?affected_admin.as_ref().map(|a| a.id.as_str()),
            "Verification code regenerated"
        );

        Ok(RegeneratedCode {
            mosque_id: issued.mosque_id,
            old_code: issued.old_code,
            new_code: issued.new_code,
            new_expiry: issued.new_expiry,
            affected_admin,
        })
    }

    /// Regenerate codes for many mosques independently
    pub async fn bulk_regenerate_codes(
        &self,
        mosque_ids: &[String],
        expiry_days: i64,
        actor: &str,
    ) -> Vec<MosqueBatchResult<RegeneratedCode>> {
        let mut results = Vec::with_capacity(mosque_ids.len());

        for mosque_id in mosque_ids {
            let outcome = match self.regenerate_code(mosque_id, expiry_days, actor).await {
                Ok(regenerated) => BatchOutcome::success(regenerated),
                Err(e) => {
                    tracing::warn!(mosque_id = %mosque_id, error = %e, "Bulk regenerate item failed");
                    BatchOutcome::error(&e)
                }
            };
            results.push(MosqueBatchResult {
                mosque_id: mosque_id.clone(),
                outcome,
            });
        }

        results
    }

    /// Move one admin off a deleted mosque. `None` if it is no longer bound there.
    async fn detach_admin(
        &self,
        admin_id: &str,
        mosque: &Mosque,
        actor: &str,
        reason: &str,
        can_reapply: bool,
    ) -> RegistryResult<Option<Admin>> {
        for _ in 0..MAX_TRANSITION_ATTEMPTS {
            let current = match self.store.get(admin_id).await? {
                Some(admin) => admin,
                None => return Ok(None),
            };
            if current.mosque_id() != Some(mosque.id.as_str()) {
                return Ok(None);
            }

            let transition = Transition {
                action: AuditAction::AdminStatusChanged,
                actor: actor.to_string(),
                details: StatusDetails::MosqueDeleted {
                    mosque_deletion_reason: reason.to_string(),
                    mosque_deletion_date: Utc::now(),
                    deleted_mosque_name: mosque.name.clone(),
                    deleted_mosque_location: mosque.location.clone(),
                    can_reapply,
                },
                rejection_count: current.rejection_count,
                detail: Some(format!(
                    "{} -> mosque_deleted: mosque {} deleted",
                    current.status(),
                    mosque.id
                )),
                code_check: None,
            };

            if let Some(moved) = self.lifecycle.commit(&current, transition).await? {
                return Ok(Some(moved));
            }
        }

        Err(RegistryError::ConcurrentModification(format!("admin {}", admin_id)))
    }

    async fn record_failure(&self, action: AuditAction, actor: &str, mosque_id: &str, detail: String) {
        let entry = NewAuditEntry::failed(action, actor, TargetType::Mosque, mosque_id, detail);
        if let Err(e) = AuditTrail::new(self.db.clone()).record(&entry).await {
            tracing::error!(mosque_id, error = %e, "Failed to audit cascade failure");
        }
    }
}
