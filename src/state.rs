use std::sync::Arc;

use crate::{
    auth::{
        email::{sender_from_config, EmailSender},
        jwt::TokenIssuer,
        rate_limit::{InMemoryRateLimiter, RateLimiter},
        repo::{CredentialStore, PgCredentialStore},
        services::{AuthService, Clock, SystemClock},
    },
    config::AppConfig,
    db,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub auth: Arc<AuthService>,
    pub tokens: Arc<TokenIssuer>,
    pub limiter: Arc<dyn RateLimiter>,
}

impl AppState {
    /// Connect to PostgreSQL, apply migrations and wire the production collaborators.
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let pool = db::connect(&config.database_url).await?;
        db::migrate(&pool).await?;

        let store = Arc::new(PgCredentialStore::new(pool));
        let mailer = sender_from_config(&config.mail, config.environment)?;
        Self::from_parts(config, store, mailer, Arc::new(SystemClock))
    }

    pub fn from_parts(
        config: AppConfig,
        store: Arc<dyn CredentialStore>,
        mailer: Arc<dyn EmailSender>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let tokens = Arc::new(TokenIssuer::new(&config.jwt.secret, config.jwt.ttl())?);
        let auth = AuthService::new(
            store,
            tokens.clone(),
            mailer,
            config.environment,
            config.mail.timeout(),
        )
        .with_clock(clock);

        Ok(Self {
            config: Arc::new(config),
            auth: Arc::new(auth),
            tokens,
            limiter: Arc::new(InMemoryRateLimiter::new()),
        })
    }
}
