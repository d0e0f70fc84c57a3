/// Admin status and the metadata each status carries
use crate::error::{RegistryError, RegistryResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Admin lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminStatus {
    Pending,
    Approved,
    Rejected,
    MosqueDeleted,
    Removed,
}

impl AdminStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdminStatus::Pending => "pending",
            AdminStatus::Approved => "approved",
            AdminStatus::Rejected => "rejected",
            AdminStatus::MosqueDeleted => "mosque_deleted",
            AdminStatus::Removed => "removed",
        }
    }

    pub fn from_str(s: &str) -> RegistryResult<Self> {
        match s {
            "pending" => Ok(AdminStatus::Pending),
            "approved" => Ok(AdminStatus::Approved),
            "rejected" => Ok(AdminStatus::Rejected),
            "mosque_deleted" => Ok(AdminStatus::MosqueDeleted),
            "removed" => Ok(AdminStatus::Removed),
            _ => Err(RegistryError::Internal(format!("Invalid admin status: {}", s))),
        }
    }

    /// Whether an admin in this status is bound to a mosque
    pub fn is_bound(&self) -> bool {
        matches!(self, AdminStatus::Pending | AdminStatus::Approved)
    }
}

impl std::fmt::Display for AdminStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status-specific metadata.
///
/// The mosque binding lives inside the two bound variants, so an unbound
/// admin cannot carry a mosque id and a bound one cannot lack it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StatusDetails {
    Pending {
        mosque_id: String,
        verification_code_used: String,
        application_notes: Option<String>,
        submitted_at: DateTime<Utc>,
    },
    Approved {
        mosque_id: String,
        approved_at: DateTime<Utc>,
        approved_by: String,
        /// Mosque code current when the admin was approved or last re-verified
        bound_code: String,
    },
    Rejected {
        rejection_reason: String,
        rejection_date: DateTime<Utc>,
        can_reapply: bool,
    },
    MosqueDeleted {
        mosque_deletion_reason: String,
        mosque_deletion_date: DateTime<Utc>,
        deleted_mosque_name: String,
        deleted_mosque_location: String,
        can_reapply: bool,
    },
    Removed {
        removal_reason: String,
        removal_date: DateTime<Utc>,
        can_reapply: bool,
    },
}

impl StatusDetails {
    pub fn status(&self) -> AdminStatus {
        match self {
            StatusDetails::Pending { .. } => AdminStatus::Pending,
            StatusDetails::Approved { .. } => AdminStatus::Approved,
            StatusDetails::Rejected { .. } => AdminStatus::Rejected,
            StatusDetails::MosqueDeleted { .. } => AdminStatus::MosqueDeleted,
            StatusDetails::Removed { .. } => AdminStatus::Removed,
        }
    }

    pub fn mosque_id(&self) -> Option<&str> {
        match self {
            StatusDetails::Pending { mosque_id, .. } | StatusDetails::Approved { mosque_id, .. } => {
                Some(mosque_id.as_str())
            }
            _ => None,
        }
    }

    /// `None` for bound statuses, where reapplying does not apply
    pub fn can_reapply(&self) -> Option<bool> {
        match self {
            StatusDetails::Rejected { can_reapply, .. }
            | StatusDetails::MosqueDeleted { can_reapply, .. }
            | StatusDetails::Removed { can_reapply, .. } => Some(*can_reapply),
            _ => None,
        }
    }

    /// Copy with `can_reapply` replaced; `None` for bound statuses
    pub fn with_can_reapply(&self, allowed: bool) -> Option<StatusDetails> {
        let mut next = self.clone();
        if let StatusDetails::Rejected { can_reapply, .. }
        | StatusDetails::MosqueDeleted { can_reapply, .. }
        | StatusDetails::Removed { can_reapply, .. } = &mut next
        {
            *can_reapply = allowed;
        } else {
            return None;
        }
        Some(next)
    }
}

/// Admin record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Admin {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub details: StatusDetails,
    /// Survives reapplication cycles; never decreases
    pub rejection_count: i64,
    /// Compare-and-set token, bumped on every committed change
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Admin {
    pub fn status(&self) -> AdminStatus {
        self.details.status()
    }

    pub fn mosque_id(&self) -> Option<&str> {
        self.details.mosque_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            AdminStatus::Pending,
            AdminStatus::Approved,
            AdminStatus::Rejected,
            AdminStatus::MosqueDeleted,
            AdminStatus::Removed,
        ] {
            assert_eq!(AdminStatus::from_str(status.as_str()).unwrap(), status);
        }
        assert!(AdminStatus::from_str("suspended").is_err());
    }

    #[test]
    fn test_mosque_binding_follows_status() {
        let now = Utc::now();
        let pending = StatusDetails::Pending {
            mosque_id: "m1".to_string(),
            verification_code_used: "MSQ-1".to_string(),
            application_notes: None,
            submitted_at: now,
        };
        let removed = StatusDetails::Removed {
            removal_reason: "left post".to_string(),
            removal_date: now,
            can_reapply: true,
        };

        assert_eq!(pending.mosque_id(), Some("m1"));
        assert!(pending.status().is_bound());
        assert_eq!(removed.mosque_id(), None);
        assert!(!removed.status().is_bound());
    }

    #[test]
    fn test_can_reapply_only_on_unbound() {
        let now = Utc::now();
        let rejected = StatusDetails::Rejected {
            rejection_reason: "wrong mosque".to_string(),
            rejection_date: now,
            can_reapply: true,
        };
        let denied = rejected.with_can_reapply(false).unwrap();
        assert_eq!(denied.can_reapply(), Some(false));

        let approved = StatusDetails::Approved {
            mosque_id: "m1".to_string(),
            approved_at: now,
            approved_by: "root".to_string(),
            bound_code: "MSQ-1".to_string(),
        };
        assert_eq!(approved.can_reapply(), None);
        assert!(approved.with_can_reapply(true).is_none());
    }

    #[test]
    fn test_details_serialize_with_status_tag() {
        let details = StatusDetails::MosqueDeleted {
            mosque_deletion_reason: "merged".to_string(),
            mosque_deletion_date: Utc::now(),
            deleted_mosque_name: "Masjid".to_string(),
            deleted_mosque_location: "Leeds".to_string(),
            can_reapply: true,
        };
        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["status"], "mosque_deleted");
        assert_eq!(json["deleted_mosque_name"], "Masjid");

        let back: StatusDetails = serde_json::from_value(json).unwrap();
        assert_eq!(back, details);
    }
}
