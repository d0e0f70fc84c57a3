/// Credentials, scoped tokens and the request extractors built on them
use crate::{
    admin::Admin,
    api::middleware::extract_bearer_token,
    config::AuthConfig,
    context::AppContext,
    error::{RegistryError, RegistryResult},
};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Hash a password with Argon2id
pub fn hash_password(password: &str) -> RegistryResult<String> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| RegistryError::Internal(format!("Failed to hash password: {}", e)))
}

/// Verify a password against a stored hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Stand-in hash verified when no account matches, so a failed login costs
/// the same whether or not the email exists
pub fn dummy_password_hash() -> &'static str {
    static DUMMY_HASH: OnceLock<String> = OnceLock::new();

    DUMMY_HASH.get_or_init(|| {
        hash_password("no-such-account-password").unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to build dummy password hash");
            String::new()
        })
    })
}

/// What a token lets its bearer do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenScope {
    /// Full access for an approved admin
    Admin,
    /// Short-lived: read own status and reapply
    Status,
    /// Registry operator
    SuperAdmin,
}

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub scope: TokenScope,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and verifies HS256 tokens
#[derive(Clone)]
pub struct TokenManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl: Duration,
    status_ttl: Duration,
}

impl TokenManager {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            access_ttl: Duration::seconds(config.access_token_ttl),
            status_ttl: Duration::seconds(config.status_token_ttl),
        }
    }

    /// Issue a token for `sub` with the given scope
    pub fn issue(&self, sub: &str, scope: TokenScope) -> RegistryResult<String> {
        let ttl = match scope {
            TokenScope::Status => self.status_ttl,
            TokenScope::Admin | TokenScope::SuperAdmin => self.access_ttl,
        };
        let now = Utc::now();

        let claims = Claims {
            sub: sub.to_string(),
            scope,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| RegistryError::Jwt(format!("Failed to sign token: {}", e)))
    }

    /// Verify signature and expiry
    pub fn verify(&self, token: &str) -> RegistryResult<Claims> {
        let validation = Validation::new(Algorithm::HS256);

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!("JWT verification failed: {}", e);
                match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                        RegistryError::Authentication("Token has expired".to_string())
                    }
                    jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                        RegistryError::Authentication("Invalid token signature".to_string())
                    }
                    _ => RegistryError::Authentication("Invalid token".to_string()),
                }
            })
    }
}

fn bearer_claims(parts: &Parts, state: &AppContext) -> RegistryResult<Claims> {
    let token = extract_bearer_token(&parts.headers)
        .ok_or_else(|| RegistryError::Authentication("Missing authorization header".to_string()))?;

    state.tokens.verify(&token)
}

/// Approved admin with a live, matching mosque binding
#[derive(Debug, Clone)]
pub struct ApprovedAdminContext {
    pub admin: Admin,
}

#[async_trait]
impl FromRequestParts<AppContext> for ApprovedAdminContext {
    type Rejection = RegistryError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let claims = bearer_claims(parts, state)?;
        let admin = state.login.authorize_approved(&claims).await?;

        Ok(ApprovedAdminContext { admin })
    }
}

/// Any admin reading or acting on their own record
#[derive(Debug, Clone)]
pub struct SelfServiceContext {
    pub admin_id: String,
}

#[async_trait]
impl FromRequestParts<AppContext> for SelfServiceContext {
    type Rejection = RegistryError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let claims = bearer_claims(parts, state)?;

        match claims.scope {
            TokenScope::Admin | TokenScope::Status => Ok(SelfServiceContext {
                admin_id: claims.sub,
            }),
            TokenScope::SuperAdmin => Err(RegistryError::Authorization(
                "Admin token required".to_string(),
            )),
        }
    }
}

/// Registry operator
#[derive(Debug, Clone)]
pub struct SuperAdminContext {
    pub subject: String,
}

#[async_trait]
impl FromRequestParts<AppContext> for SuperAdminContext {
    type Rejection = RegistryError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let claims = bearer_claims(parts, state)?;

        if claims.scope != TokenScope::SuperAdmin {
            return Err(RegistryError::Authorization(
                "Super-admin token required".to_string(),
            ));
        }

        if !state
            .config
            .authentication
            .super_admins
            .iter()
            .any(|s| s == &claims.sub)
        {
            tracing::warn!(subject = %claims.sub, "Super-admin token for unlisted subject");
            return Err(RegistryError::Authorization(
                "Super-admin role required".to_string(),
            ));
        }

        Ok(SuperAdminContext {
            subject: claims.sub,
        })
    }
}
