//! Request authentication helpers.
//!
//! Auth is either loopback-trusted or `Authorization: Bearer
//! <session_token>`; session issuance is additionally gated by
//! `X-Engram-Admin-Key` when `ENGRAM_ADMIN_KEY` is set. The admin key is
//! compared in constant time against its SHA-256 digest.

use std::net::SocketAddr;

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use engram_domain::error::{Error, Result};
use engram_kernel::RequestContext;

use crate::state::AppState;

/// Extract the bearer token from the Authorization header.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(String::from)
}

pub fn is_loopback(addr: &SocketAddr) -> bool {
    addr.ip().is_loopback()
}

/// Resolve the request into a kernel [`RequestContext`].
pub fn request_context(
    state: &AppState,
    headers: &HeaderMap,
    addr: &SocketAddr,
) -> Result<RequestContext> {
    let token = bearer_token(headers);
    state
        .kernel
        .authenticate(token.as_deref(), is_loopback(addr))
}

/// Enforce `X-Engram-Admin-Key` on session issuance when an admin key is
/// configured.
pub fn require_admin_key(state: &AppState, headers: &HeaderMap) -> Result<()> {
    let Some(expected) = state.config.server.admin_key.as_deref() else {
        return Ok(());
    };
    let provided = headers
        .get("x-engram-admin-key")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    // Compare fixed-length digests so the comparison leaks neither
    // content nor length.
    let expected_hash = Sha256::digest(expected.as_bytes());
    let provided_hash = Sha256::digest(provided.as_bytes());
    if !bool::from(expected_hash.ct_eq(&provided_hash)) {
        return Err(Error::AdminKeyRequired);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer egm_abc"));
        assert_eq!(bearer_token(&headers), Some("egm_abc".to_string()));

        headers.insert("authorization", HeaderValue::from_static("Basic xyz"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn loopback_detection() {
        let local: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        let remote: SocketAddr = "10.1.2.3:9999".parse().unwrap();
        assert!(is_loopback(&local));
        assert!(!is_loopback(&remote));
    }
}
