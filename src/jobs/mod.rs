use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{error, info};

/// Job scheduler for background tasks
pub struct JobScheduler {
    context: Arc<crate::context::AppContext>,
}

impl JobScheduler {
    pub fn new(context: Arc<crate::context::AppContext>) -> Self {
        Self { context }
    }

    /// Start all background jobs
    pub fn start(self: Arc<Self>) {
        info!("Starting background job scheduler");

        tokio::spawn(Self::expired_code_sweep_job(Arc::clone(&self)));

        info!("Background jobs started");
    }

    /// Report mosques whose verification code has expired
    async fn expired_code_sweep_job(scheduler: Arc<Self>) {
        let period = scheduler.context.config.verification.sweep_interval;
        let mut interval = interval(Duration::from_secs(period));

        loop {
            interval.tick().await;

            match scheduler.sweep_expired_codes().await {
                Ok(0) => {}
                Ok(count) => info!("{} mosque(s) have an expired verification code", count),
                Err(e) => error!("Expired code sweep failed: {}", e),
            }
        }
    }

    /// Log every mosque with an expired code. Never mutates state.
    async fn sweep_expired_codes(&self) -> crate::error::RegistryResult<usize> {
        let expired = self.context.codes.expired_codes().await?;

        for state in &expired {
            info!(
                mosque_id = %state.mosque_id,
                expired_at = ?state.expires_at,
                "Verification code expired; regenerate to admit new admins"
            );
        }

        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::ServerConfig, context::AppContext, db::test_pool};
    use chrono::{Duration as ChronoDuration, Utc};

    #[tokio::test]
    async fn test_sweep_counts_expired_codes_without_changing_them() {
        let ctx = AppContext::from_pool(ServerConfig::for_tests(), test_pool().await);
        let mosque = ctx
            .mosques
            .create_mosque("Masjid Bilal", "Luton", 30, "root@registry")
            .await
            .unwrap();
        let scheduler = JobScheduler::new(Arc::new(ctx.clone()));

        assert_eq!(scheduler.sweep_expired_codes().await.unwrap(), 0);

        sqlx::query("UPDATE mosque SET verification_code_expires_at = ? WHERE id = ?")
            .bind(Utc::now() - ChronoDuration::days(2))
            .bind(&mosque.id)
            .execute(&ctx.db)
            .await
            .unwrap();

        assert_eq!(scheduler.sweep_expired_codes().await.unwrap(), 1);
        let after = ctx.mosques.get_mosque(&mosque.id).await.unwrap().unwrap();
        assert_eq!(after.verification_code, mosque.verification_code);
    }
}
