//! User registration and password authentication, the first two AC operations from spec §4.4.

use super::store::{is_unique_violation, StoreError};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Utc};
use error::*;
use rand_core::OsRng;
use result::Result;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Error, GatewayError, Kind, HttpCode, Debug)]
#[code(Status::Conflict)]
#[error("a user with email '{email}' is already registered")]
pub struct Duplicate {
    pub email: String,
}

#[derive(Error, GatewayError, Kind, HttpCode, Debug)]
#[code(Status::Unauthorized)]
#[error("invalid email or password")]
pub struct InvalidCredentials;

fn hash_password(password: &str) -> std::result::Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

fn verify_password(password: &str, hash: &str) -> bool {
    let parsed = match PasswordHash::new(hash) {
        Ok(parsed) => parsed,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Registers a user. Email is normalized to lowercase before the uniqueness check, matching
/// the "case-insensitive" invariant on `users.email` in spec §3.
pub async fn register_user(
    pool: &PgPool,
    email: &str,
    password: &str,
    first_name: &str,
    last_name: &str,
) -> Result<User> {
    let email = email.to_lowercase();
    let password_hash =
        hash_password(password).map_err(|_| -> Box<dyn GatewayError> { InvalidCredentials.into() })?;
    let row: User = sqlx::query_as(
        r#"INSERT INTO users (id, email, password_hash, first_name, last_name, is_active, created_at)
           VALUES ($1, $2, $3, $4, $5, true, now())
           RETURNING id, email, password_hash, first_name, last_name, is_active, created_at"#,
    )
    .bind(Uuid::new_v4())
    .bind(&email)
    .bind(&password_hash)
    .bind(first_name)
    .bind(last_name)
    .fetch_one(pool)
    .await
    .map_err(|err| -> Box<dyn GatewayError> {
        if is_unique_violation(&err) {
            Duplicate { email: email.clone() }.into()
        } else {
            StoreError::from(err).into()
        }
    })?;
    Ok(row)
}

/// Authenticates a user by email/password. Inactive users are treated as unknown, and the
/// password comparison always runs (even against a dummy hash) so that a nonexistent email
/// takes the same wall-clock path as a wrong password.
pub async fn authenticate_user(pool: &PgPool, email: &str, password: &str) -> Result<User> {
    let email = email.to_lowercase();
    let row: Option<User> = sqlx::query_as(
        r#"SELECT id, email, password_hash, first_name, last_name, is_active, created_at
           FROM users WHERE email = $1"#,
    )
    .bind(&email)
    .fetch_optional(pool)
    .await
    .map_err(StoreError::from)?;

    const DUMMY_HASH: &str = "$argon2id$v=19$m=4096,t=3,p=1$c29tZXNhbHQ$RdescudvJCsgt3ub+b+dWRWJTmaaJObG";
    match row {
        Some(user) if user.is_active && verify_password(password, &user.password_hash) => Ok(user),
        Some(_) => {
            let _ = verify_password(password, DUMMY_HASH);
            Err(InvalidCredentials.into())
        }
        None => {
            let _ = verify_password(password, DUMMY_HASH);
            Err(InvalidCredentials.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_password_rejects_garbage_hashes() {
        assert!(!verify_password("hunter2", "not-a-real-hash"));
    }

    #[test]
    fn hash_and_verify_round_trip() {
        let hash = hash_password("hunter2").unwrap();
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("wrong", &hash));
    }
}
