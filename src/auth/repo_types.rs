use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

use crate::auth::claims::Role;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,                            // unique
    #[serde(skip_serializing)]
    pub password_hash: String,                    // Argon2 PHC string, not exposed in JSON
    #[sqlx(try_from = "String")]
    pub role: Role,
    pub is_active: bool,
    #[serde(skip_serializing)]
    pub reset_code: Option<String>,               // set and cleared together with its expiry
    #[serde(skip_serializing)]
    pub reset_code_expires_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Values needed to insert a new user.
#[derive(Debug, Clone)]
pub struct NewUser<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub role: Role,
}
