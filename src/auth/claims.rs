use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Account role. Stored as lowercase text and carried in the token.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Bearer token payload: `{id, email, role, iat, exp}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub id: i64,      // user ID
    pub email: String,
    pub role: Role,
    pub iat: i64,     // issued at (unix timestamp)
    pub exp: i64,     // expires at (unix timestamp)
}

/// Loosely typed view of a decoded payload, narrowed into [`Claims`] once.
#[derive(Debug, Deserialize)]
pub(crate) struct RawClaims {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<serde_json::Value>,
    #[serde(default)]
    pub iat: Option<i64>,
    pub exp: i64,
}

impl RawClaims {
    /// `None` when the identity claim is absent or not a whole number.
    pub(crate) fn into_claims(self) -> Option<Claims> {
        let id = match self.id? {
            serde_json::Value::Number(n) => n.as_i64().or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f <= i64::MAX as f64)
                    .map(|f| f as i64)
            })?,
            _ => return None,
        };
        let role = self
            .role
            .and_then(|v| v.as_str().and_then(|s| s.parse().ok()))
            .unwrap_or_default();

        Some(Claims {
            id,
            email: self.email.unwrap_or_default(),
            role,
            iat: self.iat.unwrap_or_default(),
            exp: self.exp,
        })
    }
}
