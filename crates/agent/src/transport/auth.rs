//! Connection authentication and session minting.
//!
//! With no token configured, every connection is admitted. With a token,
//! the client presents a bearer token (query parameter or Authorization
//! header) and a mismatch rejects the connection before any protocol
//! traffic. Session ids are 128 random bits as lowercase hex, never reused.

use std::collections::HashMap;

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use ad_domain::error::{AgentError, Result};

/// Compare a presented bearer token against the configured secret without
/// leaking where they diverge: both sides are reduced to fixed-width
/// SHA-256 digests first, so the constant-time comparison always runs over
/// 32 bytes regardless of what the client sent.
fn token_eq(presented: &str, expected: &str) -> bool {
    let presented = Sha256::digest(presented.as_bytes());
    let expected = Sha256::digest(expected.as_bytes());
    bool::from(presented.ct_eq(&expected))
}

/// Bearer token from `?token=` or `Authorization: Bearer …`.
pub fn extract_token(query_token: Option<&str>, headers: &HeaderMap) -> Option<String> {
    if let Some(token) = query_token {
        return Some(token.to_string());
    }
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

/// An authenticated association between a client and the agent.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub client_id: String,
    pub established_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

pub struct Authenticator {
    token: Option<String>,
    sessions: RwLock<HashMap<String, Session>>,
}

impl Authenticator {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    fn new_session_id() -> String {
        let mut bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// Admit or reject a connection; minting a session on success.
    pub fn authenticate(&self, presented: Option<&str>, client_id: &str) -> Result<Session> {
        if let Some(expected) = &self.token {
            let ok = presented.map(|p| token_eq(p, expected)).unwrap_or(false);
            if !ok {
                tracing::warn!(client_id = %client_id, "authentication rejected");
                return Err(AgentError::auth_failed("invalid or missing token"));
            }
        }
        let now = Utc::now();
        let session = Session {
            id: Self::new_session_id(),
            client_id: client_id.to_string(),
            established_at: now,
            last_activity: now,
        };
        self.sessions
            .write()
            .insert(session.id.clone(), session.clone());
        tracing::debug!(session_id = %session.id, client_id = %client_id, "session established");
        Ok(session)
    }

    /// Check a session handle and refresh its activity stamp.
    pub fn validate(&self, session_id: &str) -> bool {
        match self.sessions.write().get_mut(session_id) {
            Some(session) => {
                session.last_activity = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Explicit invalidation or disconnect cleanup.
    pub fn invalidate(&self, session_id: &str) -> bool {
        self.sessions.write().remove(session_id).is_some()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_mode_admits_everyone() {
        let auth = Authenticator::new(None);
        assert!(auth.authenticate(None, "c1").is_ok());
        assert!(auth.authenticate(Some("whatever"), "c2").is_ok());
        assert_eq!(auth.session_count(), 2);
    }

    #[test]
    fn token_mode_rejects_mismatch_and_absence() {
        let auth = Authenticator::new(Some("sekrit".into()));
        assert_eq!(
            auth.authenticate(None, "c1").unwrap_err().code,
            ad_domain::error::codes::AUTH_FAILED
        );
        assert!(auth.authenticate(Some("wrong"), "c1").is_err());
        assert!(auth.authenticate(Some("sekrit"), "c1").is_ok());
    }

    #[test]
    fn session_ids_are_lowercase_hex_and_unique() {
        let auth = Authenticator::new(None);
        let a = auth.authenticate(None, "c").unwrap();
        let b = auth.authenticate(None, "c").unwrap();
        assert_ne!(a.id, b.id);
        for id in [&a.id, &b.id] {
            assert_eq!(id.len(), 32);
            assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
    }

    #[test]
    fn validate_touches_and_invalidate_removes() {
        let auth = Authenticator::new(None);
        let session = auth.authenticate(None, "c").unwrap();
        assert!(auth.validate(&session.id));
        assert!(auth.invalidate(&session.id));
        assert!(!auth.validate(&session.id));
        assert!(!auth.invalidate(&session.id));
        assert_eq!(auth.session_count(), 0);
    }

    #[test]
    fn header_token_extraction() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_token(Some("q"), &headers).as_deref(), Some("q"));
        assert!(extract_token(None, &headers).is_none());
        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Bearer abc".parse().unwrap(),
        );
        assert_eq!(extract_token(None, &headers).as_deref(), Some("abc"));
        // Query parameter wins over the header.
        assert_eq!(extract_token(Some("q"), &headers).as_deref(), Some("q"));
    }
}
