use std::{fmt, str::FromStr, time::Duration};

use anyhow::{bail, Context};
use serde::Deserialize;

const DEFAULT_TOKEN_TTL_HOURS: i64 = 24;
/// One year.
pub const MAX_TOKEN_TTL_HOURS: i64 = 24 * 365;

/// Deployment environment. Controls whether reset-code delivery failures are
/// swallowed (development) or surfaced to the caller (production).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn is_development(self) -> bool {
        matches!(self, Environment::Development)
    }
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => bail!("unknown ENVIRONMENT value: {other}"),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => f.write_str("development"),
            Environment::Production => f.write_str("production"),
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub ttl_hours: i64,
}

impl fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"<redacted>")
            .field("ttl_hours", &self.ttl_hours)
            .finish()
    }
}

impl JwtConfig {
    pub fn ttl(&self) -> Duration {
        let hours = self.ttl_hours.clamp(0, MAX_TOKEN_TTL_HOURS) as u64;
        Duration::from_secs(hours * 60 * 60)
    }
}

#[derive(Clone, Deserialize)]
pub struct MailConfig {
    /// Mail relay endpoint; without one, codes are only recorded in the log.
    /// Required in production.
    pub relay_url: Option<String>,
    /// Bearer credential presented to the relay.
    pub relay_token: Option<String>,
    pub from: String,
    pub timeout_secs: u64,
}

impl fmt::Debug for MailConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailConfig")
            .field("relay_url", &self.relay_url)
            .field("relay_token", &self.relay_token.as_ref().map(|_| "<redacted>"))
            .field("from", &self.from)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl MailConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub environment: Environment,
    pub debug: bool,
    pub jwt: JwtConfig,
    pub mail: MailConfig,
    pub rate_limit_sweep_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url = var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let secret = var("JWT_SECRET").context("JWT_SECRET must be set to a non-empty value")?;

        let ttl_hours = var("JWT_TTL_HOURS")
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|h| *h > 0)
            .unwrap_or(DEFAULT_TOKEN_TTL_HOURS);
        if ttl_hours > MAX_TOKEN_TTL_HOURS {
            bail!("JWT_TTL_HOURS must be at most {MAX_TOKEN_TTL_HOURS}, got {ttl_hours}");
        }

        let environment = match var("ENVIRONMENT") {
            Some(v) => v.parse()?,
            None => Environment::Development,
        };

        let port = match var("APP_PORT") {
            Some(v) => v.parse::<u16>().with_context(|| format!("invalid APP_PORT: {v}"))?,
            None => 8080,
        };

        let relay_url = var("MAIL_RELAY_URL");
        if environment == Environment::Production && relay_url.is_none() {
            bail!("MAIL_RELAY_URL must be set in production; reset codes would never be delivered");
        }

        Ok(Self {
            database_url,
            host: var("APP_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            environment,
            debug: var("DEBUG").map(|v| parse_bool(&v)).unwrap_or(false),
            jwt: JwtConfig { secret, ttl_hours },
            mail: MailConfig {
                relay_url,
                relay_token: var("MAIL_RELAY_TOKEN"),
                from: var("MAIL_FROM").unwrap_or_else(|| "no-reply@localhost".into()),
                timeout_secs: var("MAIL_TIMEOUT_SECS")
                    .and_then(|v| v.parse::<u64>().ok())
                    .filter(|s| *s > 0)
                    .unwrap_or(10),
            },
            rate_limit_sweep_secs: var("RATE_LIMIT_SWEEP_SECS")
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|s| *s > 0)
                .unwrap_or(5 * 60),
        })
    }
}

fn parse_bool(v: &str) -> bool {
    matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
