//! API keys: `CreateAPIKey` / `ValidateAPIKey` from spec §4.4.
//!
//! The raw key is shown to the caller exactly once, at creation. Only its SHA-256 hash and
//! an 8-char display prefix are ever persisted, per spec §3's `APIKey` invariant.

use super::store::StoreError;
use chrono::{DateTime, Utc};
use error::*;
use rand::RngCore;
use result::Result;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

const KEY_TAG: &str = "sk";

#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct ApiKey {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    #[serde(skip_serializing)]
    pub key_hash: String,
    pub key_prefix: String,
    pub scopes: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
}

#[derive(Error, GatewayError, Kind, HttpCode, Debug)]
#[code(Status::Unauthorized)]
#[error("the supplied API key is not valid")]
pub struct Invalid;

#[derive(Error, GatewayError, Kind, HttpCode, Debug)]
#[code(Status::Unauthorized)]
#[error("the supplied API key has expired")]
pub struct Expired;

fn display_key() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{}_{}", KEY_TAG, hex::encode(bytes))
}

fn hash_key(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// Creates an API key and returns `(record, raw_key)`. The raw key is never persisted or
/// recoverable after this call returns.
pub async fn create_api_key(
    pool: &PgPool,
    organization_id: Uuid,
    name: &str,
    scopes: Vec<String>,
) -> Result<(ApiKey, String)> {
    let raw = display_key();
    let key_hash = hash_key(&raw);
    let key_prefix: String = raw.chars().take(8).collect();
    let row: ApiKey = sqlx::query_as(
        r#"INSERT INTO api_keys (id, organization_id, name, key_hash, key_prefix, scopes, expires_at, last_used_at)
           VALUES ($1, $2, $3, $4, $5, $6, NULL, NULL)
           RETURNING id, organization_id, name, key_hash, key_prefix, scopes, expires_at, last_used_at"#,
    )
    .bind(Uuid::new_v4())
    .bind(organization_id)
    .bind(name)
    .bind(&key_hash)
    .bind(&key_prefix)
    .bind(&scopes)
    .fetch_one(pool)
    .await
    .map_err(StoreError::from)?;
    Ok((row, raw))
}

/// Validates a raw API key against the stored hash, rejects expired keys, and updates
/// `lastUsedAt` on success, per spec §4.4.
pub async fn validate_api_key(pool: &PgPool, raw: &str) -> Result<ApiKey> {
    let key_hash = hash_key(raw);
    let row: Option<ApiKey> = sqlx::query_as(
        r#"SELECT id, organization_id, name, key_hash, key_prefix, scopes, expires_at, last_used_at
           FROM api_keys WHERE key_hash = $1"#,
    )
    .bind(&key_hash)
    .fetch_optional(pool)
    .await
    .map_err(StoreError::from)?;

    let key = row.ok_or_else(|| -> Box<dyn GatewayError> { Invalid.into() })?;
    if let Some(expires_at) = key.expires_at {
        if expires_at <= Utc::now() {
            return Err(Expired.into());
        }
    }
    sqlx::query("UPDATE api_keys SET last_used_at = now() WHERE id = $1")
        .bind(key.id)
        .execute(pool)
        .await
        .map_err(StoreError::from)?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_key_carries_the_product_tag_prefix() {
        let raw = display_key();
        assert!(raw.starts_with("sk_"));
    }

    #[test]
    fn mutating_a_single_character_changes_the_hash() {
        let raw = display_key();
        let mut mutated = raw.clone();
        let last = mutated.pop().unwrap();
        mutated.push(if last == 'a' { 'b' } else { 'a' });
        assert_ne!(hash_key(&raw), hash_key(&mutated));
    }
}
