//! Credential checks for connecting parties
//!
//! Two paths in: an end-user bearer token validated against the external
//! identity service, or a shared server-to-server key with a declared role.
//! Socketless callers present a separate sandbox token checked through the
//! virtual-key validation endpoint. Everything fails closed.

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("room access denied")]
    RoomAccessDenied,
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::RoomAccessDenied => StatusCode::FORBIDDEN,
        }
    }
}

#[derive(Debug, Serialize)]
struct SandboxValidateRequest<'a> {
    #[serde(rename = "sandboxToken")]
    sandbox_token: &'a str,
    #[serde(rename = "roomId")]
    room_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct SandboxValidateResponse {
    valid: bool,
}

#[derive(Debug, Deserialize)]
struct IdentityResponse {
    sub: String,
}

/// Client for the external identity / virtual-key endpoints
pub struct AuthClient {
    http: reqwest::Client,
    identity_url: String,
    sandbox_validate_url: String,
    service_key: Option<String>,
}

impl AuthClient {
    pub fn new(
        identity_url: String,
        sandbox_validate_url: String,
        service_key: Option<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            identity_url,
            sandbox_validate_url,
            service_key,
        }
    }

    /// Validate an end-user bearer token and return its subject id.
    /// Any transport or decode failure is treated as unauthorized.
    pub async fn verify_user_token(&self, token: &str) -> Result<String, AuthError> {
        let response = self
            .http
            .get(&self.identity_url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                warn!("Identity endpoint unreachable: {}", e);
                AuthError::Unauthorized
            })?;

        if !response.status().is_success() {
            return Err(AuthError::Unauthorized);
        }

        let identity: IdentityResponse = response.json().await.map_err(|e| {
            warn!("Identity response malformed: {}", e);
            AuthError::Unauthorized
        })?;
        Ok(identity.sub)
    }

    /// Server-to-server path: shared key plus a declared role, bypassing the
    /// identity callout.
    pub fn verify_service_key(&self, api_key: &str, role: &str) -> Result<(), AuthError> {
        let expected = self.service_key.as_deref().ok_or(AuthError::Unauthorized)?;
        if api_key == expected && !role.is_empty() {
            Ok(())
        } else {
            Err(AuthError::Unauthorized)
        }
    }

    /// Validate a sandbox callback token for a room via the external
    /// virtual-key endpoint.
    pub async fn validate_sandbox_token(&self, token: &str, room_id: &str) -> bool {
        let request = SandboxValidateRequest {
            sandbox_token: token,
            room_id,
        };
        let response = match self
            .http
            .post(&self.sandbox_validate_url)
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Sandbox validation endpoint unreachable: {}", e);
                return false;
            }
        };
        if !response.status().is_success() {
            return false;
        }
        response
            .json::<SandboxValidateResponse>()
            .await
            .map(|r| r.valid)
            .unwrap_or(false)
    }
}

/// Short sha256 fingerprint of a token, safe to log
pub fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(&digest[..4])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_with_key(key: Option<&str>) -> AuthClient {
        AuthClient::new(
            "http://localhost:9/id".to_string(),
            "http://localhost:9/vk".to_string(),
            key.map(String::from),
        )
    }

    #[test]
    fn test_service_key_match() {
        let client = client_with_key(Some("s3cret"));
        assert!(client.verify_service_key("s3cret", "voice").is_ok());
    }

    #[test]
    fn test_service_key_mismatch() {
        let client = client_with_key(Some("s3cret"));
        assert!(client.verify_service_key("wrong", "voice").is_err());
    }

    #[test]
    fn test_service_key_requires_role() {
        let client = client_with_key(Some("s3cret"));
        assert!(client.verify_service_key("s3cret", "").is_err());
    }

    #[test]
    fn test_service_key_unconfigured_fails_closed() {
        let client = client_with_key(None);
        assert!(client.verify_service_key("anything", "voice").is_err());
    }

    #[test]
    fn test_fingerprint_is_stable_and_short() {
        assert_eq!(token_fingerprint("abc"), token_fingerprint("abc"));
        assert_ne!(token_fingerprint("abc"), token_fingerprint("abd"));
        assert_eq!(token_fingerprint("abc").len(), 8);
    }

    #[test]
    fn test_auth_error_statuses() {
        assert_eq!(AuthError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::RoomAccessDenied.status(), StatusCode::FORBIDDEN);
    }
}
