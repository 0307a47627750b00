// Bearer token validation against an external token store

use crate::types::ScopeSet;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Failure reported by a token store backend
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct StoreError(pub String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Authentication required")]
    MissingToken,

    #[error("Invalid or expired access token")]
    UnknownToken,

    #[error("Access token expired")]
    Expired,

    #[error("Access token revoked")]
    Revoked,

    #[error("Insufficient scope: requires {}", .missing.join(" "))]
    InsufficientScope { missing: Vec<String> },

    #[error("token store unavailable: {0}")]
    Store(#[from] StoreError),
}

impl AuthError {
    /// RFC 6750 error code for the `WWW-Authenticate` challenge
    pub fn challenge_code(&self) -> &'static str {
        match self {
            Self::InsufficientScope { .. } => "insufficient_scope",
            _ => "invalid_token",
        }
    }
}

/// Stored state of an issued access token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub scopes: ScopeSet,
}

/// Owner of a validated token and what it was granted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub scopes: ScopeSet,
}

impl Principal {
    /// Fail unless every scope in `required` was granted
    pub fn authorize(&self, required: &ScopeSet) -> Result<(), AuthError> {
        let missing: Vec<String> = required.difference(&self.scopes).cloned().collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(AuthError::InsufficientScope { missing })
        }
    }
}

/// Lookup contract for the external token store
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn lookup(&self, token: &str) -> Result<Option<TokenRecord>, StoreError>;
}

/// Token store held in process memory, for tests and local runs
#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    tokens: RwLock<HashMap<String, TokenRecord>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, token: impl Into<String>, record: TokenRecord) {
        self.tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token.into(), record);
    }

    /// Mark a token revoked. Returns false if the token is unknown.
    pub fn revoke(&self, token: &str) -> bool {
        match self
            .tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(token)
        {
            Some(record) => {
                record.revoked = true;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn lookup(&self, token: &str) -> Result<Option<TokenRecord>, StoreError> {
        let tokens = self.tokens.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tokens.get(token).cloned())
    }
}

/// Short stable identifier for a token, safe to put in logs
pub fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(&digest[..6])
}

/// Validates bearer tokens. Every call goes to the store: nothing is cached,
/// so a revocation is visible on the very next request.
#[derive(Clone)]
pub struct TokenValidator {
    store: Arc<dyn TokenStore>,
}

impl TokenValidator {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self { store }
    }

    pub async fn validate(&self, token: &str) -> Result<Principal, AuthError> {
        self.validate_at(token, Utc::now()).await
    }

    /// Validate as of `now`. A token is usable iff `now < expires_at` and it
    /// is not revoked.
    pub async fn validate_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Principal, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let fingerprint = token_fingerprint(token);
        let record = match self.store.lookup(token).await? {
            Some(record) => record,
            None => {
                tracing::info!(token = %fingerprint, "Unknown access token");
                return Err(AuthError::UnknownToken);
            }
        };

        if record.expires_at <= now {
            tracing::info!(token = %fingerprint, user_id = %record.user_id, expires_at = %record.expires_at, "Expired access token");
            return Err(AuthError::Expired);
        }

        if record.revoked {
            tracing::info!(token = %fingerprint, user_id = %record.user_id, "Revoked access token");
            return Err(AuthError::Revoked);
        }

        tracing::debug!(token = %fingerprint, user_id = %record.user_id, "Access token validated");

        Ok(Principal {
            user_id: record.user_id,
            scopes: record.scopes,
        })
    }
}
