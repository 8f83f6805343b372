use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Authenticated caller, resolved from a bearer token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub member_id: i64,
    pub login_id: String,
}

impl Principal {
    pub fn new(member_id: i64, login_id: impl Into<String>) -> Self {
        Self {
            member_id,
            login_id: login_id.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub member_id: i64,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn new(principal: &Principal, expiry_hours: u64) -> Self {
        let now = Utc::now();
        let exp = (now + Duration::hours(expiry_hours as i64)).timestamp();

        Self {
            sub: principal.login_id.clone(),
            member_id: principal.member_id,
            exp,
            iat: now.timestamp(),
        }
    }
}

impl From<Claims> for Principal {
    fn from(claims: Claims) -> Self {
        Principal::new(claims.member_id, claims.sub)
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("JWT generation error: {0}")]
    TokenGeneration(String),

    #[error("Invalid JWT token: {0}")]
    InvalidToken(String),

    #[error("JWT secret not configured")]
    InvalidSecret,
}

pub fn generate_jwt(claims: &Claims, secret: &str) -> Result<String, AuthError> {
    if secret.is_empty() {
        return Err(AuthError::InvalidSecret);
    }

    let encoding_key = EncodingKey::from_secret(secret.as_bytes());
    encode(&Header::default(), claims, &encoding_key)
        .map_err(|e| AuthError::TokenGeneration(e.to_string()))
}

pub fn validate_jwt(token: &str, secret: &str) -> Result<Claims, AuthError> {
    if secret.is_empty() {
        return Err(AuthError::InvalidSecret);
    }

    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    let token_data = decode::<Claims>(token, &decoding_key, &Validation::default())
        .map_err(|e| AuthError::InvalidToken(e.to_string()))?;

    Ok(token_data.claims)
}

/// Hex SHA-256 digest used for stored credentials
pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    hash_password(password).eq_ignore_ascii_case(stored_hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trip_yields_principal() {
        let principal = Principal::new(7, "alice");
        let token = generate_jwt(&Claims::new(&principal, 1), "secret").unwrap();

        let claims = validate_jwt(&token, "secret").unwrap();
        assert_eq!(Principal::from(claims), principal);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = generate_jwt(&Claims::new(&Principal::new(1, "bob"), 1), "one").unwrap();
        assert!(matches!(validate_jwt(&token, "two"), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn empty_secret_is_rejected() {
        let claims = Claims::new(&Principal::new(1, "bob"), 1);
        assert!(matches!(generate_jwt(&claims, ""), Err(AuthError::InvalidSecret)));
    }

    #[test]
    fn password_digest_is_hex_sha256() {
        assert_eq!(
            hash_password("password"),
            "5e884898da28047151d0e56f8dc6292773603d0d6aabbdd62a11ef721d1542d8"
        );
        assert!(verify_password("password", &hash_password("password")));
        assert!(!verify_password("Password", &hash_password("password")));
    }
}
