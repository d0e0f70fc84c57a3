/// Application context shared by handlers and jobs
use crate::{
    admin::{AdminStore, AuditTrail, CascadeCoordinator, LifecycleStateMachine, LoginResolver},
    auth::TokenManager,
    config::ServerConfig,
    db,
    error::RegistryResult,
    mosque::{MosqueManager, VerificationCodeIssuer},
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub tokens: Arc<TokenManager>,
    pub audit: Arc<AuditTrail>,
    pub mosques: Arc<MosqueManager>,
    pub codes: Arc<VerificationCodeIssuer>,
    pub admins: Arc<AdminStore>,
    pub lifecycle: Arc<LifecycleStateMachine>,
    pub cascade: Arc<CascadeCoordinator>,
    pub login: Arc<LoginResolver>,
}

impl AppContext {
    /// Open the database described by `config` and build every service on it
    pub async fn new(config: ServerConfig) -> RegistryResult<Self> {
        config.validate()?;

        if !config.storage.data_directory.exists() {
            tokio::fs::create_dir_all(&config.storage.data_directory).await?;
        }

        let pool = db::create_pool(&config.storage.registry_db, db::DatabaseOptions::default()).await?;
        db::run_migrations(&pool).await?;
        db::test_connection(&pool).await?;

        Ok(Self::from_pool(config, pool))
    }

    /// Build services on an already migrated pool
    pub fn from_pool(config: ServerConfig, db: SqlitePool) -> Self {
        let tokens = TokenManager::new(&config.authentication);

        Self {
            tokens: Arc::new(tokens.clone()),
            audit: Arc::new(AuditTrail::new(db.clone())),
            mosques: Arc::new(MosqueManager::new(db.clone())),
            codes: Arc::new(VerificationCodeIssuer::new(db.clone())),
            admins: Arc::new(AdminStore::new(db.clone())),
            lifecycle: Arc::new(LifecycleStateMachine::new(db.clone())),
            cascade: Arc::new(CascadeCoordinator::new(db.clone())),
            login: Arc::new(LoginResolver::new(db.clone(), tokens)),
            config: Arc::new(config),
            db,
        }
    }

    /// Get service URL
    pub fn service_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.config.service.hostname, self.config.service.port
        )
    }
}
