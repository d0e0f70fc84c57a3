/// Admin verification and lifecycle
///
/// Admin records bound to mosques, the state machine that moves them between
/// statuses, the mosque-level cascades that re-classify them, and the login
/// resolution that routes each admin to the right recovery flow.

pub mod audit;
pub mod cascade;
pub mod lifecycle;
pub mod login;
pub mod status;
pub mod store;

pub use audit::{AuditAction, AuditEntry, AuditStatus, AuditTrail, NewAuditEntry, TargetType};
pub use cascade::{CascadeCoordinator, MosqueDeletion, RegeneratedCode};
pub use lifecycle::{LifecycleStateMachine, RegistrationRequest, MAX_TRANSITION_ATTEMPTS};
pub use login::{AdminStatusView, Denial, LoginOutcome, LoginResolver};
pub use status::{Admin, AdminStatus, StatusDetails};
pub use store::AdminStore;
