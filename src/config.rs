/// Configuration management for the mosque registry
use crate::error::{RegistryError, RegistryResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub authentication: AuthConfig,
    pub verification: VerificationConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub version: String,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub registry_db: PathBuf,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    /// Subjects allowed to act as super-admin (comma-separated in env)
    pub super_admins: Vec<String>,
    /// Lifetime of full-access tokens, in seconds
    pub access_token_ttl: i64,
    /// Lifetime of status-only tokens issued on login denial, in seconds
    pub status_token_ttl: i64,
}

/// Verification code configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Expiry applied to codes when no explicit value is given
    pub default_expiry_days: i64,
    /// How often the expired-code sweep runs, in seconds
    pub sweep_interval: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> RegistryResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("REGISTRY_HOSTNAME").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("REGISTRY_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| RegistryError::Validation("Invalid port number".to_string()))?;
        let version = env::var("REGISTRY_VERSION")
            .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string());

        let data_directory: PathBuf = env::var("REGISTRY_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let registry_db = env::var("REGISTRY_DB_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("registry.sqlite"));

        let jwt_secret = env::var("REGISTRY_JWT_SECRET")
            .map_err(|_| RegistryError::Validation("JWT secret required".to_string()))?;

        let super_admins = env::var("REGISTRY_SUPER_ADMINS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<String>>();

        let access_token_ttl = env::var("REGISTRY_ACCESS_TOKEN_TTL")
            .unwrap_or_else(|_| "3600".to_string())
            .parse()
            .unwrap_or(3600);
        let status_token_ttl = env::var("REGISTRY_STATUS_TOKEN_TTL")
            .unwrap_or_else(|_| "900".to_string())
            .parse()
            .unwrap_or(900);

        let default_expiry_days = env::var("REGISTRY_CODE_EXPIRY_DAYS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .unwrap_or(30);
        let sweep_interval = env::var("REGISTRY_CODE_SWEEP_INTERVAL")
            .unwrap_or_else(|_| "3600".to_string())
            .parse()
            .unwrap_or(3600);

        let log_level = env::var("RUST_LOG")
            .unwrap_or_else(|_| "mosque_registry=debug,tower_http=debug".to_string());
        let log_json = env::var("REGISTRY_LOG_FORMAT")
            .map(|f| f.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                version,
            },
            storage: StorageConfig {
                data_directory,
                registry_db,
            },
            authentication: AuthConfig {
                jwt_secret,
                super_admins,
                access_token_ttl,
                status_token_ttl,
            },
            verification: VerificationConfig {
                default_expiry_days,
                sweep_interval,
            },
            logging: LoggingConfig {
                level: log_level,
                json: log_json,
            },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> RegistryResult<()> {
        if self.service.hostname.is_empty() {
            return Err(RegistryError::Validation("Hostname cannot be empty".to_string()));
        }

        if self.authentication.jwt_secret.len() < 32 {
            return Err(RegistryError::Validation(
                "JWT secret must be at least 32 characters".to_string(),
            ));
        }

        if self.authentication.access_token_ttl <= 0 || self.authentication.status_token_ttl <= 0 {
            return Err(RegistryError::Validation(
                "Token lifetimes must be positive".to_string(),
            ));
        }

        if self.verification.default_expiry_days <= 0 {
            return Err(RegistryError::Validation(
                "Verification code expiry must be at least one day".to_string(),
            ));
        }

        if self.verification.default_expiry_days > crate::mosque::codes::MAX_EXPIRY_DAYS {
            return Err(RegistryError::Validation(format!(
                "Verification code expiry cannot exceed {} days",
                crate::mosque::codes::MAX_EXPIRY_DAYS
            )));
        }

        if self.verification.sweep_interval == 0 {
            return Err(RegistryError::Validation(
                "Code sweep interval must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Minimal configuration for tests
    #[cfg(test)]
    pub fn for_tests() -> Self {
        ServerConfig {
            service: ServiceConfig {
                hostname: "localhost".to_string(),
                port: 3000,
                version: "0.1.0".to_string(),
            },
            storage: StorageConfig {
                data_directory: PathBuf::from("./data"),
                registry_db: PathBuf::from(":memory:"),
            },
            authentication: AuthConfig {
                jwt_secret: "test-secret-key-for-testing-only-0123456789".to_string(),
                super_admins: vec!["root@registry".to_string()],
                access_token_ttl: 3600,
                status_token_ttl: 900,
            },
            verification: VerificationConfig {
                default_expiry_days: 30,
                sweep_interval: 3600,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                json: false,
            },
        }
    }
}
