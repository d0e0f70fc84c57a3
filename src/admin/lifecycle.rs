/// Admin lifecycle state machine
///
/// ```text
/// register ──▶ pending ──approve──▶ approved ──remove──▶ removed
///                 │                    │
///                 └──reject──▶ rejected│
///                                      └──(mosque deleted)──▶ mosque_deleted
///
/// rejected | mosque_deleted | removed ──reapply──▶ pending
/// ```
///
/// Every transition is a compare-and-set on the admin's `version` that
/// commits together with exactly one audit entry. A transition whose
/// precondition fails is audited as `failed` and the error returned.
use crate::{
    admin::{
        audit::{AuditAction, AuditTrail, NewAuditEntry, TargetType},
        status::{Admin, AdminStatus, StatusDetails},
        store::AdminStore,
    },
    auth::hash_password,
    error::{is_foreign_key_violation, is_unique_violation, RegistryError, RegistryResult},
    mosque::VerificationCodeIssuer,
};
use chrono::Utc;
use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;
use validator::Validate;

/// Attempts before a transition gives up on a contended admin
pub const MAX_TRANSITION_ATTEMPTS: usize = 5;

/// Fields supplied by a prospective admin
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegistrationRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8, max = 256))]
    pub password: String,
    #[validate(length(max = 2000))]
    pub application_notes: Option<String>,
}

/// Event applied to a single existing admin
#[derive(Debug, Clone)]
enum Event<'a> {
    Approve { actor: &'a str },
    Reject { actor: &'a str, reason: &'a str },
    Remove { actor: &'a str, reason: &'a str },
    SetReapply { actor: &'a str, allowed: bool },
    Reapply { code: &'a str, notes: Option<String> },
    Reverify { code: &'a str },
}

impl Event<'_> {
    fn action(&self) -> AuditAction {
        match self {
            Event::Approve { .. } => AuditAction::AdminApproved,
            Event::Reject { .. } => AuditAction::AdminRejected,
            Event::Remove { .. } => AuditAction::AdminRemoved,
            Event::SetReapply { allowed: true, .. } => AuditAction::AdminReapplyAllowed,
            Event::SetReapply { allowed: false, .. } => AuditAction::AdminReapplyDenied,
            Event::Reapply { .. } => AuditAction::AdminReapplication,
            Event::Reverify { .. } => AuditAction::AdminReverified,
        }
    }

    /// Who is recorded as acting; self-service events act as the admin
    fn actor<'s>(&'s self, admin_id: &'s str) -> &'s str {
        match self {
            Event::Approve { actor }
            | Event::Reject { actor, .. }
            | Event::Remove { actor, .. }
            | Event::SetReapply { actor, .. } => *actor,
            Event::Reapply { .. } | Event::Reverify { .. } => admin_id,
        }
    }
}

/// Change decided against one snapshot of an admin
#[derive(Debug, Clone)]
pub(crate) struct Transition {
    pub action: AuditAction,
    pub actor: String,
    pub details: StatusDetails,
    pub rejection_count: i64,
    pub detail: Option<String>,
    /// Mosque id and code that must still validate when the write commits
    pub code_check: Option<(String, String)>,
}

/// Lifecycle state machine
#[derive(Clone)]
pub struct LifecycleStateMachine {
    db: SqlitePool,
    store: AdminStore,
    codes: VerificationCodeIssuer,
    audit: AuditTrail,
}

impl LifecycleStateMachine {
    pub fn new(db: SqlitePool) -> Self {
        Self {
            store: AdminStore::new(db.clone()),
            codes: VerificationCodeIssuer::new(db.clone()),
            audit: AuditTrail::new(db.clone()),
            db,
        }
    }

    /// Create a pending admin bound to `mosque_id`
    pub async fn register(
        &self,
        mosque_id: &str,
        code: &str,
        request: RegistrationRequest,
    ) -> RegistryResult<Admin> {
        request
            .validate()
            .map_err(|e| RegistryError::Validation(e.to_string()))?;

        let email = request.email.trim().to_lowercase();
        self.codes.check(mosque_id, code).await?;

        if self.store.email_exists(&email).await? {
            return Err(RegistryError::Conflict(
                "Email already registered".to_string(),
            ));
        }

        let password_hash = hash_password(&request.password)?;
        let now = Utc::now();
        let admin = Admin {
            id: Uuid::new_v4().to_string(),
            name: request.name.trim().to_string(),
            email,
            password_hash,
            details: StatusDetails::Pending {
                mosque_id: mosque_id.to_string(),
                verification_code_used: code.to_string(),
                application_notes: request.application_notes,
                submitted_at: now,
            },
            rejection_count: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.db.begin().await?;
        match AdminStore::insert_in(&mut *tx, &admin).await {
            Ok(()) => {}
            Err(RegistryError::Database(e)) if is_unique_violation(&e) => {
                return Err(RegistryError::Conflict(
                    "Email already registered".to_string(),
                ));
            }
            Err(RegistryError::Database(e)) if is_foreign_key_violation(&e) => {
                return Err(RegistryError::InvalidCode);
            }
            Err(e) => return Err(e),
        }

        // The code may have been regenerated since the first check
        VerificationCodeIssuer::check_in(&mut *tx, mosque_id, code).await?;

        AuditTrail::record_in(
            &mut *tx,
            &NewAuditEntry::success(
                AuditAction::AdminRegistered,
                &admin.id,
                TargetType::Admin,
                &admin.id,
                Some(format!("registered for mosque {}", mosque_id)),
            ),
        )
        .await?;
        tx.commit().await?;

        tracing::info!(admin_id = %admin.id, mosque_id, "Admin registered, pending approval");
        Ok(admin)
    }

    /// Approve a pending admin
    pub async fn approve(&self, admin_id: &str, actor: &str) -> RegistryResult<Admin> {
        self.apply(admin_id, Event::Approve { actor }).await
    }

    /// Reject a pending admin
    pub async fn reject(&self, admin_id: &str, actor: &str, reason: &str) -> RegistryResult<Admin> {
        require_reason(reason)?;
        self.apply(admin_id, Event::Reject { actor, reason }).await
    }

    /// Remove an approved admin from their mosque
    pub async fn remove(&self, admin_id: &str, actor: &str, reason: &str) -> RegistryResult<Admin> {
        require_reason(reason)?;
        self.apply(admin_id, Event::Remove { actor, reason }).await
    }

    /// Permit an unbound admin to reapply
    pub async fn allow_reapply(&self, admin_id: &str, actor: &str) -> RegistryResult<Admin> {
        self.apply(
            admin_id,
            Event::SetReapply {
                actor,
                allowed: true,
            },
        )
        .await
    }

    /// Forbid an unbound admin from reapplying
    pub async fn deny_reapply(&self, admin_id: &str, actor: &str) -> RegistryResult<Admin> {
        self.apply(
            admin_id,
            Event::SetReapply {
                actor,
                allowed: false,
            },
        )
        .await
    }

    /// Bind an unbound admin to the mosque whose current code is `code`
    pub async fn reapply(
        &self,
        admin_id: &str,
        code: &str,
        notes: Option<String>,
    ) -> RegistryResult<Admin> {
        self.apply(admin_id, Event::Reapply { code, notes }).await
    }

    /// Refresh an approved admin's binding after their mosque's code changed
    pub async fn reverify(&self, admin_id: &str, code: &str) -> RegistryResult<Admin> {
        self.apply(admin_id, Event::Reverify { code }).await
    }

    async fn apply(&self, admin_id: &str, event: Event<'_>) -> RegistryResult<Admin> {
        let action = event.action();
        let actor = event.actor(admin_id).to_string();

        for attempt in 1..=MAX_TRANSITION_ATTEMPTS {
            let current = self.store.require(admin_id).await?;

            let transition = match self.plan(&current, &event).await {
                Ok(transition) => transition,
                Err(e) => return Err(self.audit_failure(action, &actor, admin_id, e).await),
            };

            match self.commit(&current, transition).await {
                Ok(Some(updated)) => return Ok(updated),
                Ok(None) => {
                    tracing::debug!(admin_id, attempt, "Admin changed concurrently, re-reading");
                }
                Err(e) => return Err(self.audit_failure(action, &actor, admin_id, e).await),
            }
        }

        let err = RegistryError::ConcurrentModification(format!("admin {}", admin_id));
        Err(self.audit_failure(action, &actor, admin_id, err).await)
    }

    /// Decide the next state from a fresh snapshot
    async fn plan(&self, admin: &Admin, event: &Event<'_>) -> RegistryResult<Transition> {
        let now = Utc::now();
        let action = event.action();
        let actor = event.actor(&admin.id).to_string();

        let (details, rejection_count, detail, code_check) = match (event, &admin.details) {
            (Event::Approve { actor }, StatusDetails::Pending { mosque_id, .. }) => {
                if let Some(holder) = self.store.approved_for_mosque(mosque_id).await? {
                    if holder.id != admin.id {
                        return Err(RegistryError::AlreadyApprovedForMosque {
                            mosque_id: mosque_id.clone(),
                        });
                    }
                }

                let state = self.codes.current_state(mosque_id).await?;
                let bound_code = state.code.ok_or_else(|| {
                    RegistryError::Internal(format!("Mosque {} has no verification code", mosque_id))
                })?;

                (
                    StatusDetails::Approved {
                        mosque_id: mosque_id.clone(),
                        approved_at: now,
                        approved_by: actor.to_string(),
                        bound_code,
                    },
                    admin.rejection_count,
                    Some(format!("approved for mosque {}", mosque_id)),
                    None,
                )
            }
            (Event::Reject { reason, .. }, StatusDetails::Pending { .. }) => (
                StatusDetails::Rejected {
                    rejection_reason: reason.to_string(),
                    rejection_date: now,
                    can_reapply: true,
                },
                admin.rejection_count + 1,
                Some(reason.to_string()),
                None,
            ),
            (Event::Approve { .. }, _) | (Event::Reject { .. }, _) => {
                return Err(RegistryError::NotPending {
                    current: admin.status().to_string(),
                });
            }
            (Event::Remove { reason, .. }, StatusDetails::Approved { .. }) => (
                StatusDetails::Removed {
                    removal_reason: reason.to_string(),
                    removal_date: now,
                    can_reapply: true,
                },
                admin.rejection_count,
                Some(reason.to_string()),
                None,
            ),
            (Event::Remove { .. }, _) => {
                return Err(RegistryError::NotApproved {
                    current: admin.status().to_string(),
                });
            }
            (Event::SetReapply { allowed, .. }, details) => {
                let next = details.with_can_reapply(*allowed).ok_or_else(|| {
                    RegistryError::Conflict(format!(
                        "Admin is {}; only unbound admins carry a reapplication flag",
                        admin.status()
                    ))
                })?;
                (next, admin.rejection_count, None, None)
            }
            (Event::Reapply { code, notes }, details) => {
                match details.can_reapply() {
                    None => {
                        return Err(RegistryError::CannotReapply(format!(
                            "admin is already {}",
                            admin.status()
                        )))
                    }
                    Some(false) => {
                        return Err(RegistryError::CannotReapply(
                            "reapplication has been disabled for this admin".to_string(),
                        ))
                    }
                    Some(true) => {}
                }

                let state = self
                    .codes
                    .find_by_code(code)
                    .await?
                    .ok_or(RegistryError::InvalidCode)?;
                state.check(code, now)?;

                (
                    StatusDetails::Pending {
                        mosque_id: state.mosque_id.clone(),
                        verification_code_used: code.to_string(),
                        application_notes: notes.clone(),
                        submitted_at: now,
                    },
                    admin.rejection_count,
                    Some(format!(
                        "reapplied from {} to mosque {}",
                        admin.status(),
                        state.mosque_id
                    )),
                    Some((state.mosque_id, code.to_string())),
                )
            }
            (
                Event::Reverify { code },
                StatusDetails::Approved {
                    mosque_id,
                    approved_at,
                    approved_by,
                    ..
                },
            ) => {
                self.codes.current_state(mosque_id).await?.check(code, now)?;

                (
                    StatusDetails::Approved {
                        mosque_id: mosque_id.clone(),
                        approved_at: *approved_at,
                        approved_by: approved_by.clone(),
                        bound_code: code.to_string(),
                    },
                    admin.rejection_count,
                    Some(format!("re-verified for mosque {}", mosque_id)),
                    Some((mosque_id.clone(), code.to_string())),
                )
            }
            (Event::Reverify { .. }, _) => {
                return Err(RegistryError::NotApproved {
                    current: admin.status().to_string(),
                });
            }
        };

        Ok(Transition {
            action,
            actor,
            details,
            rejection_count,
            detail,
            code_check,
        })
    }

    /// Write one transition and its audit entry in a single transaction.
    ///
    /// Returns `Ok(None)` when the admin's version moved since `current` was read.
    pub(crate) async fn commit(
        &self,
        current: &Admin,
        transition: Transition,
    ) -> RegistryResult<Option<Admin>> {
        let mut tx = self.db.begin().await?;

        let written = AdminStore::compare_and_set_in(
            &mut *tx,
            current,
            transition.details,
            transition.rejection_count,
        )
        .await;

        let updated = match written {
            Ok(Some(updated)) => updated,
            Ok(None) => {
                tx.rollback().await?;
                return Ok(None);
            }
            Err(RegistryError::Database(e)) if is_unique_violation(&e) => {
                return Err(RegistryError::AlreadyApprovedForMosque {
                    mosque_id: current.mosque_id().unwrap_or_default().to_string(),
                });
            }
            Err(RegistryError::Database(e)) if is_foreign_key_violation(&e) => {
                return Err(RegistryError::InvalidCode);
            }
            Err(e) => return Err(e),
        };

        if let Some((mosque_id, code)) = &transition.code_check {
            VerificationCodeIssuer::check_in(&mut *tx, mosque_id, code).await?;
        }

        AuditTrail::record_in(
            &mut *tx,
            &NewAuditEntry::success(
                transition.action,
                &transition.actor,
                TargetType::Admin,
                &current.id,
                transition.detail,
            ),
        )
        .await?;
        tx.commit().await?;

        tracing::info!(
            admin_id = %current.id,
            from = %current.status(),
            to = %updated.status(),
            action = transition.action.as_str(),
            "Admin transition committed"
        );

        Ok(Some(updated))
    }

    /// Record a refused transition, then hand the error back
    pub(crate) async fn audit_failure(
        &self,
        action: AuditAction,
        actor: &str,
        admin_id: &str,
        err: RegistryError,
    ) -> RegistryError {
        if !is_audited(&err) {
            return err;
        }

        tracing::warn!(admin_id, action = action.as_str(), error = %err, "Transition refused");

        let entry = NewAuditEntry::failed(action, actor, TargetType::Admin, admin_id, err.to_string());
        if let Err(e) = self.audit.record(&entry).await {
            tracing::error!(admin_id, error = %e, "Failed to audit refused transition");
        }

        err
    }

    /// Admins currently waiting for review
    pub async fn pending(&self) -> RegistryResult<Vec<Admin>> {
        self.store.list_by_status(AdminStatus::Pending).await
    }
}

/// Precondition and conflict errors leave a `failed` audit entry
fn is_audited(err: &RegistryError) -> bool {
    matches!(
        err,
        RegistryError::NotPending { .. }
            | RegistryError::NotApproved { .. }
            | RegistryError::AlreadyApprovedForMosque { .. }
            | RegistryError::CannotReapply(_)
            | RegistryError::InvalidCode
            | RegistryError::ExpiredCode
            | RegistryError::Conflict(_)
            | RegistryError::ConcurrentModification(_)
    )
}

fn require_reason(reason: &str) -> RegistryResult<()> {
    if reason.trim().is_empty() {
        return Err(RegistryError::Validation("A reason is required".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::{
        audit::AuditStatus,
        test_support::{assert_binding_invariant, registration, setup},
    };
    use chrono::Duration;

    #[tokio::test]
    async fn test_register_creates_pending_admin() {
        let (db, mosque) = setup().await;
        let lifecycle = LifecycleStateMachine::new(db.clone());
        let code = mosque.verification_code.clone().unwrap();

        let admin = lifecycle
            .register(&mosque.id, &code, registration("Aisha@Example.com"))
            .await
            .unwrap();

        assert_eq!(admin.status(), AdminStatus::Pending);
        assert_eq!(admin.mosque_id(), Some(mosque.id.as_str()));
        assert_eq!(admin.email, "aisha@example.com");
        assert_ne!(admin.password_hash, "a-long-password");

        let entries = AuditTrail::new(db.clone())
            .for_target(TargetType::Admin, &admin.id)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action_type, AuditAction::AdminRegistered);
        assert_binding_invariant(&db).await;
    }

    #[tokio::test]
    async fn test_register_rejects_bad_codes() {
        let (db, mosque) = setup().await;
        let lifecycle = LifecycleStateMachine::new(db.clone());
        let code = mosque.verification_code.clone().unwrap();

        let err = lifecycle
            .register(&mosque.id, "MSQ-WRONG", registration("a@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidCode));

        let err = lifecycle
            .register("no-such-mosque", &code, registration("a@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidCode));

        sqlx::query("UPDATE mosque SET verification_code_expires_at = ? WHERE id = ?")
            .bind(Utc::now() - Duration::hours(1))
            .bind(&mosque.id)
            .execute(&db)
            .await
            .unwrap();
        let err = lifecycle
            .register(&mosque.id, &code, registration("a@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::ExpiredCode));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM admin")
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_register_validates_fields_and_email_uniqueness() {
        let (db, mosque) = setup().await;
        let lifecycle = LifecycleStateMachine::new(db.clone());
        let code = mosque.verification_code.clone().unwrap();

        let mut short = registration("b@example.com");
        short.password = "short".to_string();
        assert!(matches!(
            lifecycle.register(&mosque.id, &code, short).await,
            Err(RegistryError::Validation(_))
        ));

        lifecycle
            .register(&mosque.id, &code, registration("b@example.com"))
            .await
            .unwrap();
        assert!(matches!(
            lifecycle
                .register(&mosque.id, &code, registration("B@example.com"))
                .await,
            Err(RegistryError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_approve_twice_is_refused_and_audited() {
        let (db, mosque) = setup().await;
        let lifecycle = LifecycleStateMachine::new(db.clone());
        let code = mosque.verification_code.clone().unwrap();
        let admin = lifecycle
            .register(&mosque.id, &code, registration("c@example.com"))
            .await
            .unwrap();

        let approved = lifecycle.approve(&admin.id, "root@registry").await.unwrap();
        assert_eq!(approved.status(), AdminStatus::Approved);
        match &approved.details {
            StatusDetails::Approved {
                approved_by,
                bound_code,
                ..
            } => {
                assert_eq!(approved_by, "root@registry");
                assert_eq!(bound_code, &code);
            }
            other => panic!("unexpected details {:?}", other),
        }

        let err = lifecycle.approve(&admin.id, "root@registry").await.unwrap_err();
        assert!(matches!(err, RegistryError::NotPending { .. }));

        let entries = AuditTrail::new(db.clone())
            .for_target(TargetType::Admin, &admin.id)
            .await
            .unwrap();
        let last = entries.last().unwrap();
        assert_eq!(last.action_type, AuditAction::AdminApproved);
        assert_eq!(last.status, AuditStatus::Failed);
    }

    #[tokio::test]
    async fn test_approve_conflict_leaves_both_admins_unchanged() {
        let (db, mosque) = setup().await;
        let lifecycle = LifecycleStateMachine::new(db.clone());
        let store = AdminStore::new(db.clone());
        let code = mosque.verification_code.clone().unwrap();

        let first = lifecycle
            .register(&mosque.id, &code, registration("first@example.com"))
            .await
            .unwrap();
        let second = lifecycle
            .register(&mosque.id, &code, registration("second@example.com"))
            .await
            .unwrap();
        let first = lifecycle.approve(&first.id, "root@registry").await.unwrap();

        let err = lifecycle.approve(&second.id, "root@registry").await.unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyApprovedForMosque { .. }));
        assert_eq!(err.code(), "ALREADY_APPROVED_FOR_MOSQUE");

        let first_after = store.require(&first.id).await.unwrap();
        let second_after = store.require(&second.id).await.unwrap();
        assert_eq!(first_after.version, first.version);
        assert_eq!(first_after.details, first.details);
        assert_eq!(second_after.version, second.version);
        assert_eq!(second_after.status(), AdminStatus::Pending);
        assert_binding_invariant(&db).await;
    }

    #[tokio::test]
    async fn test_concurrent_approvals_admit_exactly_one() {
        let (db, mosque) = setup().await;
        let lifecycle = LifecycleStateMachine::new(db.clone());
        let code = mosque.verification_code.clone().unwrap();

        let a = lifecycle
            .register(&mosque.id, &code, registration("race-a@example.com"))
            .await
            .unwrap();
        let b = lifecycle
            .register(&mosque.id, &code, registration("race-b@example.com"))
            .await
            .unwrap();

        let (ra, rb) = futures::join!(
            lifecycle.approve(&a.id, "root@registry"),
            lifecycle.approve(&b.id, "root@registry")
        );

        assert_eq!(ra.is_ok() as u8 + rb.is_ok() as u8, 1);
        let loser = if ra.is_ok() { rb } else { ra };
        assert!(matches!(
            loser,
            Err(RegistryError::AlreadyApprovedForMosque { .. })
        ));
        assert_binding_invariant(&db).await;
    }

    #[tokio::test]
    async fn test_rejection_count_survives_reapplication() {
        let (db, mosque) = setup().await;
        let lifecycle = LifecycleStateMachine::new(db.clone());
        let code = mosque.verification_code.clone().unwrap();
        let admin = lifecycle
            .register(&mosque.id, &code, registration("d@example.com"))
            .await
            .unwrap();

        let rejected = lifecycle
            .reject(&admin.id, "root@registry", "missing documents")
            .await
            .unwrap();
        assert_eq!(rejected.rejection_count, 1);
        assert_eq!(rejected.mosque_id(), None);
        assert_eq!(rejected.details.can_reapply(), Some(true));
        assert_binding_invariant(&db).await;

        let pending = lifecycle
            .reapply(&admin.id, &code, Some("now with documents".to_string()))
            .await
            .unwrap();
        assert_eq!(pending.status(), AdminStatus::Pending);
        assert_eq!(pending.mosque_id(), Some(mosque.id.as_str()));
        assert_eq!(pending.rejection_count, 1);

        let rejected_again = lifecycle
            .reject(&admin.id, "root@registry", "still incomplete")
            .await
            .unwrap();
        assert_eq!(rejected_again.rejection_count, 2);
        assert_binding_invariant(&db).await;
    }

    #[tokio::test]
    async fn test_removed_admin_without_reapply_flag_cannot_reapply() {
        let (db, mosque) = setup().await;
        let lifecycle = LifecycleStateMachine::new(db.clone());
        let store = AdminStore::new(db.clone());
        let code = mosque.verification_code.clone().unwrap();
        let admin = lifecycle
            .register(&mosque.id, &code, registration("e@example.com"))
            .await
            .unwrap();
        lifecycle.approve(&admin.id, "root@registry").await.unwrap();

        let removed = lifecycle
            .remove(&admin.id, "root@registry", "stepped down")
            .await
            .unwrap();
        assert_eq!(removed.status(), AdminStatus::Removed);
        assert_eq!(removed.mosque_id(), None);

        lifecycle.deny_reapply(&admin.id, "root@registry").await.unwrap();

        let err = lifecycle.reapply(&admin.id, &code, None).await.unwrap_err();
        assert!(matches!(err, RegistryError::CannotReapply(_)));
        assert_eq!(err.code(), "CANNOT_REAPPLY");
        assert_eq!(
            store.require(&admin.id).await.unwrap().status(),
            AdminStatus::Removed
        );

        lifecycle.allow_reapply(&admin.id, "root@registry").await.unwrap();
        let pending = lifecycle.reapply(&admin.id, &code, None).await.unwrap();
        assert_eq!(pending.status(), AdminStatus::Pending);
        assert_binding_invariant(&db).await;
    }

    #[tokio::test]
    async fn test_wrong_state_transitions() {
        let (db, mosque) = setup().await;
        let lifecycle = LifecycleStateMachine::new(db.clone());
        let code = mosque.verification_code.clone().unwrap();
        let admin = lifecycle
            .register(&mosque.id, &code, registration("f@example.com"))
            .await
            .unwrap();

        assert!(matches!(
            lifecycle.remove(&admin.id, "root@registry", "no").await,
            Err(RegistryError::NotApproved { .. })
        ));
        assert!(matches!(
            lifecycle.reapply(&admin.id, &code, None).await,
            Err(RegistryError::CannotReapply(_))
        ));
        assert!(matches!(
            lifecycle.allow_reapply(&admin.id, "root@registry").await,
            Err(RegistryError::Conflict(_))
        ));
        assert!(matches!(
            lifecycle.reject(&admin.id, "root@registry", "  ").await,
            Err(RegistryError::Validation(_))
        ));
        assert!(matches!(
            lifecycle.approve("missing", "root@registry").await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reapply_with_invalid_code_keeps_status() {
        let (db, mosque) = setup().await;
        let lifecycle = LifecycleStateMachine::new(db.clone());
        let code = mosque.verification_code.clone().unwrap();
        let admin = lifecycle
            .register(&mosque.id, &code, registration("g@example.com"))
            .await
            .unwrap();
        lifecycle
            .reject(&admin.id, "root@registry", "wrong mosque")
            .await
            .unwrap();

        let err = lifecycle
            .reapply(&admin.id, "MSQ-NOTACODE", None)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidCode));

        let after = AdminStore::new(db.clone()).require(&admin.id).await.unwrap();
        assert_eq!(after.status(), AdminStatus::Rejected);
    }

    #[tokio::test]
    async fn test_reverify_refreshes_bound_code() {
        let (db, mosque) = setup().await;
        let lifecycle = LifecycleStateMachine::new(db.clone());
        let codes = VerificationCodeIssuer::new(db.clone());
        let code = mosque.verification_code.clone().unwrap();
        let admin = lifecycle
            .register(&mosque.id, &code, registration("h@example.com"))
            .await
            .unwrap();
        let approved = lifecycle.approve(&admin.id, "root@registry").await.unwrap();

        let (tx, issued) = codes.issue(&mosque.id, 30).await.unwrap();
        tx.commit().await.unwrap();

        assert!(matches!(
            lifecycle.reverify(&admin.id, &code).await,
            Err(RegistryError::InvalidCode)
        ));

        let reverified = lifecycle.reverify(&admin.id, &issued.new_code).await.unwrap();
        match (&approved.details, &reverified.details) {
            (
                StatusDetails::Approved { approved_at: before, .. },
                StatusDetails::Approved {
                    approved_at: after,
                    bound_code,
                    ..
                },
            ) => {
                assert_eq!(before, after);
                assert_eq!(bound_code, &issued.new_code);
            }
            other => panic!("unexpected details {:?}", other),
        }
    }
}
