use std::{sync::Arc, time::Duration};

use lazy_static::lazy_static;
use regex::Regex;
use time::OffsetDateTime;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    auth::{
        claims::Role,
        email::{DeliveryError, EmailSender},
        jwt::TokenIssuer,
        password::{
            hash_password_blocking, verify_password_blocking, PasswordError, MIN_PASSWORD_LENGTH,
        },
        repo::CredentialStore,
        repo_types::{NewUser, User},
        reset_code::{is_expired, ResetCode},
    },
    config::Environment,
    error::AuthError,
};

/// A freshly drawn code that another user already holds is redrawn this many times.
const RESET_CODE_ATTEMPTS: usize = 5;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub token: String,
    pub user: User,
}

/// Orchestrates credential, token and reset-code operations over a
/// [`CredentialStore`].
pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    tokens: Arc<TokenIssuer>,
    mailer: Arc<dyn EmailSender>,
    clock: Arc<dyn Clock>,
    environment: Environment,
    mail_timeout: Duration,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        tokens: Arc<TokenIssuer>,
        mailer: Arc<dyn EmailSender>,
        environment: Environment,
        mail_timeout: Duration,
    ) -> Self {
        Self {
            store,
            tokens,
            mailer,
            clock: Arc::new(SystemClock),
            environment,
            mail_timeout,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[instrument(skip(self, email, password), fields(email = %email.trim()))]
    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<User, AuthError> {
        let name = required(name, "name is required")?;
        let email = valid_email(email)?;
        check_password_length(password)?;

        if self.store.find_by_email(email).await?.is_some() {
            warn!("email already registered");
            return Err(AuthError::EmailTaken);
        }

        let hash = hash_password_blocking(password.to_string())
            .await
            .map_err(internal)?;
        let user = self
            .store
            .create(NewUser {
                name,
                email,
                password_hash: &hash,
                role: Role::User,
            })
            .await?;

        info!(user_id = user.id, "user registered");
        Ok(user)
    }

    /// Every failure mode collapses into [`AuthError::InvalidCredentials`];
    /// only the log tells them apart.
    #[instrument(skip(self, email, password), fields(email = %email.trim()))]
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome, AuthError> {
        let user = match self.store.find_by_email(email.trim()).await? {
            Some(u) if u.is_active => u,
            Some(u) => {
                warn!(user_id = u.id, "login on inactive account");
                return Err(AuthError::InvalidCredentials);
            }
            None => {
                warn!("login unknown email");
                return Err(AuthError::InvalidCredentials);
            }
        };

        match verify_password_blocking(password.to_string(), user.password_hash.clone()).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(user_id = user.id, "login invalid password");
                return Err(AuthError::InvalidCredentials);
            }
            Err(PasswordError::MalformedHash(e)) => {
                error!(user_id = user.id, error = %e, "stored password hash is unreadable");
                return Err(AuthError::InvalidCredentials);
            }
            Err(e) => return Err(internal(e)),
        }

        let token = self.tokens.issue(&user).map_err(internal)?;
        info!(user_id = user.id, "user logged in");
        Ok(LoginOutcome { token, user })
    }

    /// Unknown or inactive addresses succeed without side effects.
    #[instrument(skip(self, email), fields(email = %email.trim()))]
    pub async fn forgot_password(&self, email: &str) -> Result<(), AuthError> {
        let email = required(email, "email is required")?;
        let user = match self.store.find_by_email(email).await? {
            Some(u) if u.is_active => u,
            _ => {
                debug!("reset requested for unknown email");
                return Ok(());
            }
        };

        let code = self.issue_reset_code(user.id).await?;
        self.store
            .set_reset_code(user.id, &code.code, code.expires_at)
            .await?;
        info!(user_id = user.id, expires_at = %code.expires_at, "reset code issued");

        match self.deliver(&user.email, &code.code).await {
            Ok(()) => Ok(()),
            Err(e) if self.environment.is_development() => {
                warn!(user_id = user.id, error = %e, "reset code delivery failed; ignored in development");
                Ok(())
            }
            Err(e) => Err(AuthError::Delivery(e)),
        }
    }

    #[instrument(skip(self, code))]
    pub async fn verify_reset_code(&self, code: &str) -> Result<(), AuthError> {
        let user = self.held_code(code).await?;
        debug!(user_id = user.id, "reset code verified");
        Ok(())
    }

    #[instrument(skip(self, code, new_password))]
    pub async fn reset_password(&self, code: &str, new_password: &str) -> Result<(), AuthError> {
        required(code, "reset code is required")?;
        check_password_length(new_password)?;
        let user = self.held_code(code).await?;

        let hash = hash_password_blocking(new_password.to_string())
            .await
            .map_err(internal)?;
        let applied = self
            .store
            .reset_password(user.id, code.trim(), &hash, self.clock.now())
            .await?;
        if !applied {
            warn!(user_id = user.id, "reset code consumed or expired during reset");
            return Err(AuthError::ResetCodeNotFound);
        }

        info!(user_id = user.id, "password reset");
        Ok(())
    }

    #[instrument(skip(self, old_password, new_password))]
    pub async fn change_password(
        &self,
        user_id: i64,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        check_password_length(new_password)?;
        if old_password == new_password {
            return Err(AuthError::Validation(
                "new password must differ from the old one".into(),
            ));
        }
        let user = self.active_user(user_id).await?;

        match verify_password_blocking(old_password.to_string(), user.password_hash.clone()).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(user_id, "change password with wrong old password");
                return Err(AuthError::InvalidCredentials);
            }
            Err(PasswordError::MalformedHash(e)) => {
                error!(user_id, error = %e, "stored password hash is unreadable");
                return Err(AuthError::InvalidCredentials);
            }
            Err(e) => return Err(internal(e)),
        }

        let hash = hash_password_blocking(new_password.to_string())
            .await
            .map_err(internal)?;
        self.store.update_password(user_id, &hash).await?;
        info!(user_id, "password changed");
        Ok(())
    }

    /// Removes the user and every dependent row, or nothing at all.
    #[instrument(skip(self))]
    pub async fn delete_user(&self, user_id: i64) -> Result<(), AuthError> {
        if !self.store.delete_cascade(user_id).await? {
            return Err(AuthError::UserNotFound);
        }
        info!(user_id, "user deleted");
        Ok(())
    }

    pub async fn get_profile(&self, user_id: i64) -> Result<User, AuthError> {
        self.active_user(user_id).await
    }

    #[instrument(skip(self, name, email))]
    pub async fn update_profile(
        &self,
        user_id: i64,
        name: &str,
        email: &str,
    ) -> Result<User, AuthError> {
        let name = required(name, "name is required")?;
        let email = valid_email(email)?;
        let user = self.active_user(user_id).await?;

        if email != user.email {
            if let Some(other) = self.store.find_by_email(email).await? {
                if other.id != user_id {
                    warn!(user_id, "profile email already in use");
                    return Err(AuthError::EmailTaken);
                }
            }
        }

        let updated = self.store.update_profile(user_id, name, email).await?;
        info!(user_id, "profile updated");
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn set_active(&self, user_id: i64, active: bool) -> Result<(), AuthError> {
        if !self.store.set_active(user_id, active).await? {
            return Err(AuthError::UserNotFound);
        }
        info!(user_id, active, "user active flag changed");
        Ok(())
    }

    async fn active_user(&self, user_id: i64) -> Result<User, AuthError> {
        match self.store.find_by_id(user_id).await? {
            Some(u) if u.is_active => Ok(u),
            _ => Err(AuthError::UserNotFound),
        }
    }

    /// The user currently holding `code`, provided it has not expired.
    async fn held_code(&self, code: &str) -> Result<User, AuthError> {
        let code = required(code, "reset code is required")?;
        let user = self
            .store
            .find_by_reset_code(code)
            .await?
            .filter(|u| u.is_active)
            .ok_or(AuthError::ResetCodeNotFound)?;
        let expires_at = user
            .reset_code_expires_at
            .ok_or(AuthError::ResetCodeNotFound)?;
        if is_expired(expires_at, self.clock.now()) {
            return Err(AuthError::ResetCodeExpired);
        }
        Ok(user)
    }

    async fn issue_reset_code(&self, user_id: i64) -> Result<ResetCode, AuthError> {
        for _ in 0..RESET_CODE_ATTEMPTS {
            let code = ResetCode::generate(self.clock.now());
            match self.store.find_by_reset_code(&code.code).await? {
                Some(holder) if holder.id != user_id => {
                    debug!("reset code collision, drawing again");
                }
                _ => return Ok(code),
            }
        }
        Err(AuthError::Internal("could not draw an unused reset code".into()))
    }

    async fn deliver(&self, to: &str, code: &str) -> Result<(), DeliveryError> {
        match tokio::time::timeout(self.mail_timeout, self.mailer.send_reset_code(to, code)).await {
            Ok(res) => res,
            Err(_) => Err(DeliveryError::Timeout(self.mail_timeout)),
        }
    }
}

fn internal(e: impl std::fmt::Display) -> AuthError {
    AuthError::Internal(e.to_string())
}

fn required<'a>(value: &'a str, message: &str) -> Result<&'a str, AuthError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AuthError::Validation(message.to_string()));
    }
    Ok(value)
}

fn valid_email(email: &str) -> Result<&str, AuthError> {
    let email = email.trim();
    if !is_valid_email(email) {
        return Err(AuthError::Validation("invalid email".into()));
    }
    Ok(email)
}

fn check_password_length(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(())
}
