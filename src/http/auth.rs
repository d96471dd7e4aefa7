use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::app::App;
use crate::domain::error_codes::ErrorCode;
use crate::domain::types::UserId;
use crate::domain::user::UserRole;

use super::error::ApiError;

type HmacSha256 = Hmac<Sha256>;

/// Authenticated caller, attached to the request by the middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: UserId,
    pub role: UserRole,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("token is malformed")]
    Malformed,
    #[error("token signature mismatch")]
    BadSignature,
    #[error("token has expired")]
    Expired,
}

#[derive(Debug, Serialize, Deserialize)]
struct TokenClaims {
    sub: UserId,
    role: UserRole,
    exp: i64,
}

/// Validates (and, for tooling and tests, mints) HMAC-SHA256 signed bearer
/// tokens. Token issuance for real users lives in the identity service; this
/// server only shares its secret.
#[derive(Clone)]
pub struct TokenVerifier {
    secret: Arc<Vec<u8>>,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: Arc::new(secret.as_bytes().to_vec()),
        }
    }

    /// Mint a token: `<payload-b64>.<mac-b64>`.
    pub fn issue(&self, user_id: UserId, role: UserRole, ttl: Duration) -> String {
        let claims = TokenClaims {
            sub: user_id,
            role,
            exp: (Utc::now() + ttl).timestamp(),
        };
        // Serialization of a plain struct cannot fail.
        let payload = serde_json::to_vec(&claims).unwrap_or_default();
        let payload_b64 = URL_SAFE_NO_PAD.encode(payload);
        let mac_b64 = URL_SAFE_NO_PAD.encode(self.sign(payload_b64.as_bytes()));
        format!("{payload_b64}.{mac_b64}")
    }

    pub fn verify(&self, token: &str) -> Result<AuthUser, AuthError> {
        let (payload_b64, mac_b64) = token.split_once('.').ok_or(AuthError::Malformed)?;
        let presented_mac = URL_SAFE_NO_PAD
            .decode(mac_b64)
            .map_err(|_| AuthError::Malformed)?;
        let expected_mac = self.sign(payload_b64.as_bytes());
        if expected_mac.ct_eq(&presented_mac).unwrap_u8() != 1 {
            return Err(AuthError::BadSignature);
        }

        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| AuthError::Malformed)?;
        let claims: TokenClaims =
            serde_json::from_slice(&payload).map_err(|_| AuthError::Malformed)?;
        if DateTime::from_timestamp(claims.exp, 0).is_none_or(|exp| exp < Utc::now()) {
            return Err(AuthError::Expired);
        }
        Ok(AuthUser {
            user_id: claims.sub,
            role: claims.role,
        })
    }

    fn sign(&self, data: &[u8]) -> Vec<u8> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key length");
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }
}

/// Bearer-token middleware for every authenticated route.
pub async fn require_auth(
    State(app): State<Arc<App>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header_token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    let Some(token) = header_token else {
        return Err(ApiError::from_code(ErrorCode::AuthRequired));
    };

    match app.verifier.verify(token) {
        Ok(auth) => {
            request.extensions_mut().insert(auth);
            Ok(next.run(request).await)
        }
        Err(err) => Err(ApiError::new(ErrorCode::AuthInvalidToken, err.to_string())),
    }
}

/// Admin-only guard used inside handlers.
pub fn ensure_admin(auth: &AuthUser) -> Result<(), ApiError> {
    if auth.is_admin() {
        Ok(())
    } else {
        Err(ApiError::from_code(ErrorCode::Forbidden))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn issue_verify_roundtrip() {
        let verifier = TokenVerifier::new("test-secret");
        let user = Uuid::new_v4();
        let token = verifier.issue(user, UserRole::Player, Duration::hours(1));
        let auth = verifier.verify(&token).unwrap();
        assert_eq!(auth.user_id, user);
        assert_eq!(auth.role, UserRole::Player);
        assert!(!auth.is_admin());
    }

    #[test]
    fn admin_role_survives_roundtrip() {
        let verifier = TokenVerifier::new("test-secret");
        let token = verifier.issue(Uuid::new_v4(), UserRole::Admin, Duration::hours(1));
        assert!(verifier.verify(&token).unwrap().is_admin());
    }

    #[test]
    fn rejects_wrong_secret() {
        let minted_by = TokenVerifier::new("secret-a");
        let verifier = TokenVerifier::new("secret-b");
        let token = minted_by.issue(Uuid::new_v4(), UserRole::Player, Duration::hours(1));
        assert_eq!(verifier.verify(&token), Err(AuthError::BadSignature));
    }

    #[test]
    fn rejects_expired_token() {
        let verifier = TokenVerifier::new("test-secret");
        let token = verifier.issue(Uuid::new_v4(), UserRole::Player, Duration::seconds(-10));
        assert_eq!(verifier.verify(&token), Err(AuthError::Expired));
    }

    #[test]
    fn rejects_garbage() {
        let verifier = TokenVerifier::new("test-secret");
        assert_eq!(verifier.verify("no-dot"), Err(AuthError::Malformed));
        assert_eq!(verifier.verify("a.b"), Err(AuthError::Malformed));
        assert_eq!(verifier.verify(""), Err(AuthError::Malformed));
    }

    #[test]
    fn tampered_payload_fails_signature() {
        let verifier = TokenVerifier::new("test-secret");
        let token = verifier.issue(Uuid::new_v4(), UserRole::Player, Duration::hours(1));
        let (payload, mac) = token.split_once('.').unwrap();
        let mut bytes = URL_SAFE_NO_PAD.decode(payload).unwrap();
        bytes[10] ^= 0x01;
        let forged = format!("{}.{}", URL_SAFE_NO_PAD.encode(bytes), mac);
        assert_eq!(verifier.verify(&forged), Err(AuthError::BadSignature));
    }
}
