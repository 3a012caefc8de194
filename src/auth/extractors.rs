use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use tracing::{debug, warn};

use crate::{
    auth::{
        claims::Role,
        jwt::{TokenError, TokenIssuer},
    },
    error::AuthError,
    state::AppState,
};

/// Why a request was turned away by the session gate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionRejection {
    #[error("missing Authorization header")]
    NoHeader,
    #[error("Authorization header is not `Bearer <token>`")]
    MalformedHeader,
    #[error("token rejected: {0}")]
    TokenInvalid(TokenError),
    #[error("token carries no identity")]
    MissingIdentity,
}

/// Identity attached to an authenticated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: i64,
    pub role: Role,
}

impl CurrentUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Run the header through the gate: exactly `Bearer <token>`, then a verified
/// token with an identity.
pub fn authenticate(headers: &HeaderMap, tokens: &TokenIssuer) -> Result<CurrentUser, SessionRejection> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(SessionRejection::NoHeader)?
        .to_str()
        .map_err(|_| SessionRejection::MalformedHeader)?;

    let parts: Vec<&str> = value.split(' ').collect();
    let token = match parts.as_slice() {
        ["Bearer", token] if !token.is_empty() => *token,
        _ => return Err(SessionRejection::MalformedHeader),
    };

    let claims = tokens.verify(token).map_err(|e| match e {
        TokenError::MissingIdentity => SessionRejection::MissingIdentity,
        other => SessionRejection::TokenInvalid(other),
    })?;

    Ok(CurrentUser {
        id: claims.id,
        role: claims.role,
    })
}

/// Extracts and validates the bearer token, yielding the caller's identity.
pub struct AuthUser(pub CurrentUser);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<CurrentUser>() {
            return Ok(AuthUser(user.clone()));
        }

        match authenticate(&parts.headers, &state.tokens) {
            Ok(user) => {
                parts.extensions.insert(user.clone());
                Ok(AuthUser(user))
            }
            Err(rejection) => {
                if state.config.debug {
                    debug!(reason = %rejection, "session rejected");
                } else {
                    warn!("session rejected");
                }
                Err(AuthError::Unauthorized(rejection))
            }
        }
    }
}

/// [`AuthUser`] restricted to the admin role.
pub struct AdminUser(pub CurrentUser);

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            warn!(user_id = user.id, "admin route denied");
            return Err(AuthError::Forbidden);
        }
        Ok(AdminUser(user))
    }
}
