//! Authentication and Authorization
//!
//! - bcrypt password hashing
//! - HS256 JWT issue/verify
//! - `Caller` identity passed explicitly into core operations

use axum::http::HeaderMap;
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store::{Role, User};

/// Token lifetime, matching the 7-day sessions of the web frontend.
const TOKEN_TTL_DAYS: i64 = 7;

/// JWT claims carried by every session token.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: Uuid,
    pub role: Role,
    pub exp: i64,
    pub iat: i64,
}

/// The authenticated identity a core operation acts on behalf of.
///
/// Role checks happen at the start of each operation, not in middleware,
/// so the workflows stay pure and independently testable.
#[derive(Debug, Clone, Copy)]
pub struct Caller {
    pub user_id: Uuid,
    pub role: Role,
}

impl Caller {
    pub fn new(user_id: Uuid, role: Role) -> Self {
        Self { user_id, role }
    }
}

pub fn hash_password(password: &str) -> Result<String> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST)
        .map_err(|e| Error::Storage(anyhow::anyhow!("password hashing failed: {e}")))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

/// Issue a signed session token for a user.
pub fn issue_token(user: &User, secret: &str) -> Result<String> {
    let now = Utc::now();
    let claims = Claims {
        sub: user.id,
        role: user.role,
        exp: (now + chrono::Duration::days(TOKEN_TTL_DAYS)).timestamp(),
        iat: now.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| Error::Storage(anyhow::anyhow!("token encoding failed: {e}")))
}

/// Verify a token and return the caller it identifies.
pub fn verify_token(token: &str, secret: &str) -> Result<Caller> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| {
        debug!("token verification failed: {e}");
        Error::Unauthorized("invalid or expired token".into())
    })?;

    Ok(Caller::new(data.claims.sub, data.claims.role))
}

/// Extract the caller from an `Authorization: Bearer <token>` header.
pub fn caller_from_headers(headers: &HeaderMap, secret: &str) -> Result<Caller> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::Unauthorized("no token provided".into()))?;

    let token = header.strip_prefix("Bearer ").unwrap_or(header);
    verify_token(token, secret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user(role: Role) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            name: "Priya Sharma".to_string(),
            email: "priya.sharma@sece.ac.in".to_string(),
            password_hash: String::new(),
            role,
            department: None,
            year: None,
            eco_points: 0,
            badges: vec![],
            challenges_completed: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn password_roundtrip() {
        let hash = bcrypt::hash("password123", 4).unwrap();
        assert!(verify_password("password123", &hash));
        assert!(!verify_password("wrong", &hash));
    }

    #[test]
    fn token_roundtrip() {
        let u = user(Role::Faculty);
        let token = issue_token(&u, "test-secret").unwrap();

        let caller = verify_token(&token, "test-secret").unwrap();
        assert_eq!(caller.user_id, u.id);
        assert_eq!(caller.role, Role::Faculty);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let u = user(Role::Student);
        let token = issue_token(&u, "secret-a").unwrap();
        assert!(verify_token(&token, "secret-b").is_err());
    }

    #[test]
    fn bearer_prefix_is_stripped() {
        let u = user(Role::Admin);
        let token = issue_token(&u, "s").unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            format!("Bearer {token}").parse().unwrap(),
        );

        let caller = caller_from_headers(&headers, "s").unwrap();
        assert_eq!(caller.user_id, u.id);
    }

    #[test]
    fn missing_header_is_unauthorized() {
        let headers = HeaderMap::new();
        assert!(matches!(
            caller_from_headers(&headers, "s").unwrap_err(),
            Error::Unauthorized(_)
        ));
    }

    #[test]
    fn review_roles() {
        assert!(Role::Admin.can_review());
        assert!(Role::Faculty.can_review());
        assert!(!Role::Student.can_review());
    }
}
