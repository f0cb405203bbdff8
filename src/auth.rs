//! Caller authentication for plan submission.
//!
//! Two credentials are accepted:
//!
//! - the shared internal secret in the `x-internal-secret` header, for
//!   trusted callers such as a dashboard backend;
//! - a project access token `tdp_<project_id>_<secret>` as a bearer token,
//!   for CI pipelines. Only the sha256 of a token is stored.

use anyhow::Result;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::sqlite_store::SqliteStore;

pub const TOKEN_PREFIX: &str = "tdp";
pub const INTERNAL_SECRET_HEADER: &str = "x-internal-secret";

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    /// Holder of the internal secret; not scoped to a project.
    Internal,
    /// Holder of a token issued for this project.
    Project(String),
}

impl Caller {
    pub fn project_id(&self) -> Option<&str> {
        match self {
            Caller::Internal => None,
            Caller::Project(id) => Some(id),
        }
    }
}

/// A freshly issued token. `token` is shown once and never stored.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub hash: String,
    pub prefix: String,
}

pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

pub fn issue_token(project_id: &str) -> IssuedToken {
    let token = format!("{}_{}_{}", TOKEN_PREFIX, project_id, Uuid::new_v4().simple());
    IssuedToken {
        hash: hash_token(&token),
        prefix: format!("{}...", &token[..10.min(token.len())]),
        token,
    }
}

/// Project id embedded in a well-formed token.
pub fn token_project(token: &str) -> Option<&str> {
    let mut parts = token.split('_');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(TOKEN_PREFIX), Some(project), Some(secret), None)
            if !project.is_empty() && !secret.is_empty() =>
        {
            Some(project)
        }
        _ => None,
    }
}

/// Resolve request credentials to a caller. `Ok(None)` means unauthorized.
pub async fn authenticate(
    store: &SqliteStore,
    config: &AuthConfig,
    internal_secret: Option<&str>,
    authorization: Option<&str>,
) -> Result<Option<Caller>> {
    if let (Some(expected), Some(given)) = (config.internal_secret.as_deref(), internal_secret) {
        if hash_token(expected) == hash_token(given) {
            tracing::debug!("authenticated via internal secret");
            return Ok(Some(Caller::Internal));
        }
    }

    let Some(token) = authorization.and_then(|h| h.strip_prefix("Bearer ")) else {
        return Ok(None);
    };
    let token = token.trim();
    let Some(project_id) = token_project(token) else {
        tracing::warn!("malformed access token");
        return Ok(None);
    };

    if store.token_matches(project_id, &hash_token(token)).await? {
        tracing::debug!(project = project_id, "authenticated via access token");
        Ok(Some(Caller::Project(project_id.to_string())))
    } else {
        tracing::warn!(project = project_id, "access token not recognised");
        Ok(None)
    }
}
