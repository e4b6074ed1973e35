//! Request authentication.
//!
//! Project callers present `Authorization: Bearer <key>`; the key is hashed
//! (SHA-256, hex) and matched against the active-key index; plaintext keys
//! are never stored or compared. Admin endpoints use separate static READ and
//! WRITE tokens from configuration; the write token also grants read.
//!
//! Authentication produces an explicit [`AuthenticatedContext`] value that
//! handlers thread through, rather than decorating the request.

use crate::api::error::{api_forbidden, api_unauthorized, ApiError};
use crate::app::AppState;
use axum::http::HeaderMap;
use courier_engine::model::{Project, ProjectStatus};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use uuid::Uuid;

/// Identity established for one request.
#[derive(Debug, Clone)]
pub struct AuthenticatedContext {
    pub project_id: Uuid,
    pub api_key_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminScope {
    Read,
    Write,
}

/// SHA-256 hex digest of a raw API key; the stored and compared form.
pub fn hash_api_key(raw: &str) -> String {
    let digest = Sha256::digest(raw.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Generate a fresh API key. Returned to the caller exactly once at issue
/// time; only the hash survives.
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut out = String::with_capacity(3 + bytes.len() * 2);
    out.push_str("ck_");
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Resolve the bearer key to a project. Revoked or unknown keys are 401;
/// a suspended project is 403 with the `project_suspended` error kind.
pub async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<(AuthenticatedContext, Project), ApiError> {
    let token = bearer_token(headers).ok_or_else(|| api_unauthorized("missing bearer token"))?;
    let key = state
        .store
        .find_active_api_key(&hash_api_key(token))
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "api key lookup failed");
            crate::api::error::api_internal_message("authentication unavailable")
        })?
        .ok_or_else(|| api_unauthorized("invalid api key"))?;

    let project = state
        .store
        .get_project(key.project_id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "project lookup failed");
            crate::api::error::api_internal_message("authentication unavailable")
        })?
        .ok_or_else(|| api_unauthorized("invalid api key"))?;

    if project.status != ProjectStatus::Active {
        return Err(api_forbidden("project_suspended", "project is suspended"));
    }

    if let Err(err) = state.store.touch_api_key(key.id).await {
        tracing::debug!(error = ?err, "failed to update key last_used_at");
    }

    Ok((
        AuthenticatedContext {
            project_id: project.id,
            api_key_id: key.id,
        },
        project,
    ))
}

/// Guard an admin endpoint; returns the actor label recorded in the audit
/// log. With no tokens configured the admin plane is disabled entirely.
pub fn require_admin(
    state: &AppState,
    headers: &HeaderMap,
    scope: AdminScope,
) -> Result<String, ApiError> {
    let token = bearer_token(headers).ok_or_else(|| api_unauthorized("missing bearer token"))?;

    if let Some(write_token) = &state.admin_api_key_write {
        if token == write_token {
            return Ok("admin:write".to_string());
        }
    }
    if scope == AdminScope::Read {
        if let Some(read_token) = &state.admin_api_key_read {
            if token == read_token {
                return Ok("admin:read".to_string());
            }
        }
    }
    Err(api_unauthorized("invalid admin token"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_hex_sha256() {
        // Known vector for the empty string.
        assert_eq!(
            hash_api_key(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(hash_api_key("secret").len(), 64);
        assert_eq!(hash_api_key("secret"), hash_api_key("secret"));
        assert_ne!(hash_api_key("secret"), hash_api_key("secret2"));
    }

    #[test]
    fn generated_keys_are_prefixed_and_unique() {
        let first = generate_api_key();
        let second = generate_api_key();
        assert!(first.starts_with("ck_"));
        assert_eq!(first.len(), 3 + 48);
        assert_ne!(first, second);
    }

    #[test]
    fn bearer_token_parses_the_scheme() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_none());

        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Bearer ck_abc".parse().unwrap(),
        );
        assert_eq!(bearer_token(&headers), Some("ck_abc"));

        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Basic dXNlcjpwYXNz".parse().unwrap(),
        );
        assert!(bearer_token(&headers).is_none());
    }
}
