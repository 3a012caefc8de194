use std::{fmt, time::Duration};

use anyhow::ensure;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;

use crate::auth::{
    claims::{Claims, RawClaims},
    repo_types::User,
};

const ALGORITHM: Algorithm = Algorithm::HS256;

/// Longest lifetime a token may be issued with.
pub const MAX_TOKEN_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token signature is invalid")]
    InvalidSignature,
    #[error("token has expired")]
    Expired,
    #[error("token is malformed")]
    Malformed,
    #[error("token carries no usable identity")]
    MissingIdentity,
    #[error("token signing failed: {0}")]
    Signing(String),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            // A foreign algorithm is treated like a bad signature.
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => TokenError::InvalidSignature,
            _ => TokenError::Malformed,
        }
    }
}

/// Signs and verifies HS256 bearer tokens with a single symmetric secret.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer").field("ttl", &self.ttl).finish_non_exhaustive()
    }
}

impl TokenIssuer {
    /// Fails on an empty secret; there is no fallback key.
    pub fn new(secret: &str, ttl: Duration) -> anyhow::Result<Self> {
        ensure!(!secret.trim().is_empty(), "token signing secret must not be empty");
        ensure!(!ttl.is_zero(), "token ttl must be positive");
        ensure!(
            ttl <= MAX_TOKEN_TTL,
            "token ttl must not exceed {} hours",
            MAX_TOKEN_TTL.as_secs() / 3600
        );
        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        })
    }

    pub fn issue(&self, user: &User) -> Result<String, TokenError> {
        self.issue_at(user, OffsetDateTime::now_utc())
    }

    /// Issue a token as if at `now`; `exp = now + ttl`.
    pub fn issue_at(&self, user: &User, now: OffsetDateTime) -> Result<String, TokenError> {
        let exp = TimeDuration::try_from(self.ttl)
            .ok()
            .and_then(|ttl| now.checked_add(ttl))
            .ok_or_else(|| TokenError::Signing("token expiry is out of range".into()))?;
        let claims = Claims {
            id: user.id,
            email: user.email.clone(),
            role: user.role,
            iat: now.unix_timestamp(),
            exp: exp.unix_timestamp(),
        };
        let token = encode(&Header::new(ALGORITHM), &claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))?;
        debug!(user_id = user.id, role = %user.role, "jwt signed");
        Ok(token)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        let data = decode::<RawClaims>(token, &self.decoding, &validation)?;
        let claims = data.claims.into_claims().ok_or(TokenError::MissingIdentity)?;
        debug!(user_id = claims.id, role = %claims.role, "jwt verified");
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::Role;
    use serde_json::json;

    const SECRET: &str = "dev-secret";

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(SECRET, Duration::from_secs(24 * 3600)).expect("issuer")
    }

    fn user(role: Role) -> User {
        User {
            id: 42,
            name: "Ana".into(),
            email: "ana@x.com".into(),
            password_hash: String::new(),
            role,
            is_active: true,
            reset_code: None,
            reset_code_expires_at: None,
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    fn sign_raw(alg: Algorithm, secret: &str, payload: serde_json::Value) -> String {
        encode(&Header::new(alg), &payload, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    fn future_exp() -> i64 {
        OffsetDateTime::now_utc().unix_timestamp() + 3600
    }

    #[test]
    fn issue_and_verify_roundtrip() {
        let keys = issuer();
        let token = keys.issue(&user(Role::Admin)).expect("issue");
        let claims = keys.verify(&token).expect("verify");
        assert_eq!(claims.id, 42);
        assert_eq!(claims.email, "ana@x.com");
        assert_eq!(claims.role, Role::Admin);
        assert_eq!(claims.exp - claims.iat, 24 * 3600);
    }

    #[test]
    fn token_expires_after_ttl() {
        let keys = issuer();
        let issued = OffsetDateTime::now_utc() - TimeDuration::hours(25);
        let token = keys.issue_at(&user(Role::User), issued).unwrap();
        assert_eq!(keys.verify(&token).unwrap_err(), TokenError::Expired);
    }

    #[test]
    fn oversized_ttl_is_rejected() {
        assert!(TokenIssuer::new(SECRET, MAX_TOKEN_TTL).is_ok());
        assert!(TokenIssuer::new(SECRET, MAX_TOKEN_TTL + Duration::from_secs(1)).is_err());
        assert!(TokenIssuer::new(SECRET, Duration::from_secs(1_000_000_000_000 * 3600)).is_err());
    }

    #[test]
    fn expiry_past_calendar_end_is_an_error() {
        let keys = issuer();
        let near_end = time::macros::datetime!(9999-12-31 12:00 UTC);
        let err = keys.issue_at(&user(Role::User), near_end).unwrap_err();
        assert!(matches!(err, TokenError::Signing(_)));
    }

    #[test]
    fn empty_secret_is_rejected() {
        assert!(TokenIssuer::new("", Duration::from_secs(60)).is_err());
        assert!(TokenIssuer::new("  ", Duration::from_secs(60)).is_err());
    }

    #[test]
    fn wrong_secret_is_invalid_signature() {
        let token = issuer().issue(&user(Role::User)).unwrap();
        let other = TokenIssuer::new("another-secret", Duration::from_secs(60)).unwrap();
        assert_eq!(other.verify(&token).unwrap_err(), TokenError::InvalidSignature);
    }

    #[test]
    fn foreign_algorithm_is_rejected() {
        let token = sign_raw(
            Algorithm::HS512,
            SECRET,
            json!({"id": 1, "email": "a@x.com", "role": "admin", "iat": 0, "exp": future_exp()}),
        );
        assert_eq!(issuer().verify(&token).unwrap_err(), TokenError::InvalidSignature);
    }

    #[test]
    fn garbage_is_malformed() {
        assert_eq!(issuer().verify("not.a.jwt").unwrap_err(), TokenError::Malformed);
        assert_eq!(issuer().verify("").unwrap_err(), TokenError::Malformed);
    }

    #[test]
    fn missing_or_mistyped_identity_is_distinct() {
        let keys = issuer();
        let no_id = sign_raw(ALGORITHM, SECRET, json!({"email": "a@x.com", "exp": future_exp()}));
        assert_eq!(keys.verify(&no_id).unwrap_err(), TokenError::MissingIdentity);

        let str_id = sign_raw(ALGORITHM, SECRET, json!({"id": "42", "exp": future_exp()}));
        assert_eq!(keys.verify(&str_id).unwrap_err(), TokenError::MissingIdentity);
    }

    #[test]
    fn absent_role_defaults_to_user() {
        let token = sign_raw(ALGORITHM, SECRET, json!({"id": 5, "email": "b@x.com", "exp": future_exp()}));
        let claims = issuer().verify(&token).unwrap();
        assert_eq!(claims.id, 5);
        assert_eq!(claims.role, Role::User);
    }
}
