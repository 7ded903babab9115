//! Claimable sessions: opaque, short-lived credentials a browser exchanges for scoped
//! access, per spec §4.4 and the state machine `Unclaimed -> Claimed -> (expiry) Expired`.

use super::store::StoreError;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use error::*;
use rand::RngCore;
use result::Result;
use sqlx::PgPool;
use uuid::Uuid;

const SESSION_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct ClaimableSession {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub session_token: String,
    pub organization_id: Uuid,
    pub email: Option<String>,
    pub user_id: Option<Uuid>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct SessionResource {
    pub session_id: Uuid,
    pub resource_type: String,
    pub resource_id: String,
    pub permissions: Vec<String>,
}

impl ClaimableSession {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed_at.is_some()
    }
}

#[derive(Error, GatewayError, Kind, HttpCode, Debug)]
#[code(Status::NotFound)]
#[error("no claimable session with id '{session_id}' was found")]
pub struct NotFound {
    pub session_id: Uuid,
}

#[derive(Error, GatewayError, Kind, HttpCode, Debug)]
#[code(Status::Unauthorized)]
#[error("the supplied session token is invalid or expired")]
pub struct InvalidToken;

#[derive(Error, GatewayError, Kind, HttpCode, Debug)]
#[code(Status::Conflict)]
#[error("session resources can only be added to an unclaimed, unexpired session")]
pub struct NotMutable;

fn opaque_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub async fn create_claimable_session(
    pool: &PgPool,
    organization_id: Uuid,
    email: Option<String>,
    metadata: serde_json::Value,
) -> Result<ClaimableSession> {
    let token = opaque_token();
    let expires_at = Utc::now() + ChronoDuration::hours(SESSION_TTL_HOURS);
    let row: ClaimableSession = sqlx::query_as(
        r#"INSERT INTO claimable_sessions
               (id, session_token, organization_id, email, user_id, claimed_at, metadata, expires_at)
           VALUES ($1, $2, $3, $4, NULL, NULL, $5, $6)
           RETURNING id, session_token, organization_id, email, user_id, claimed_at, metadata, expires_at"#,
    )
    .bind(Uuid::new_v4())
    .bind(&token)
    .bind(organization_id)
    .bind(&email)
    .bind(&metadata)
    .bind(expires_at)
    .fetch_one(pool)
    .await
    .map_err(StoreError::from)?;
    Ok(row)
}

pub async fn get_claimable_session(pool: &PgPool, session_id: Uuid) -> Result<ClaimableSession> {
    sqlx::query_as(
        r#"SELECT id, session_token, organization_id, email, user_id, claimed_at, metadata, expires_at
           FROM claimable_sessions WHERE id = $1"#,
    )
    .bind(session_id)
    .fetch_optional(pool)
    .await
    .map_err(StoreError::from)?
    .ok_or_else(|| NotFound { session_id }.into())
}

/// Validates an opaque session token: exists and unexpired. Claimed sessions remain usable
/// until expiry, matching the state machine in spec §4.4.
pub async fn validate_session_token(pool: &PgPool, token: &str) -> Result<ClaimableSession> {
    let row: Option<ClaimableSession> = sqlx::query_as(
        r#"SELECT id, session_token, organization_id, email, user_id, claimed_at, metadata, expires_at
           FROM claimable_sessions WHERE session_token = $1"#,
    )
    .bind(token)
    .fetch_optional(pool)
    .await
    .map_err(StoreError::from)?;
    match row {
        Some(session) if !session.is_expired() => Ok(session),
        _ => Err(InvalidToken.into()),
    }
}

/// Scope narrowing: only permitted on unclaimed, unexpired sessions.
pub async fn add_resource_to_session(
    pool: &PgPool,
    session_id: Uuid,
    resource_type: &str,
    resource_id: &str,
    permissions: Vec<String>,
) -> Result<SessionResource> {
    let session = get_claimable_session(pool, session_id).await?;
    if session.is_claimed() || session.is_expired() {
        return Err(NotMutable.into());
    }
    let row: SessionResource = sqlx::query_as(
        r#"INSERT INTO claimable_session_resources (session_id, resource_type, resource_id, permissions)
           VALUES ($1, $2, $3, $4)
           RETURNING session_id, resource_type, resource_id, permissions"#,
    )
    .bind(session_id)
    .bind(resource_type)
    .bind(resource_id)
    .bind(&permissions)
    .fetch_one(pool)
    .await
    .map_err(StoreError::from)?;
    Ok(row)
}

pub async fn resources_for_session(pool: &PgPool, session_id: Uuid) -> Result<Vec<SessionResource>> {
    let rows: Vec<SessionResource> = sqlx::query_as(
        "SELECT session_id, resource_type, resource_id, permissions FROM claimable_session_resources WHERE session_id = $1",
    )
    .bind(session_id)
    .fetch_all(pool)
    .await
    .map_err(StoreError::from)?;
    Ok(rows)
}

/// Atomically sets `(userId, claimedAt)` where currently null, per spec §4.4.
pub async fn claim_session(pool: &PgPool, session_id: Uuid, user_id: Uuid) -> Result<ClaimableSession> {
    let row: Option<ClaimableSession> = sqlx::query_as(
        r#"UPDATE claimable_sessions
           SET user_id = $2, claimed_at = now()
           WHERE id = $1 AND claimed_at IS NULL AND expires_at > now()
           RETURNING id, session_token, organization_id, email, user_id, claimed_at, metadata, expires_at"#,
    )
    .bind(session_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .map_err(StoreError::from)?;
    row.ok_or_else(|| NotFound { session_id }.into())
}

/// Claims every unclaimed, unexpired session matching `email`, used when a user registers
/// or logs in after having been invited via one or more claimable sessions.
pub async fn claim_all_sessions_by_email(pool: &PgPool, email: &str, user_id: Uuid) -> Result<u64> {
    let email = email.to_lowercase();
    let result = sqlx::query(
        r#"UPDATE claimable_sessions
           SET user_id = $2, claimed_at = now()
           WHERE email = $1 AND claimed_at IS NULL AND expires_at > now()"#,
    )
    .bind(&email)
    .bind(user_id)
    .execute(pool)
    .await
    .map_err(StoreError::from)?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_check_uses_wall_clock() {
        let session = ClaimableSession {
            id: Uuid::new_v4(),
            session_token: "t".to_string(),
            organization_id: Uuid::new_v4(),
            email: None,
            user_id: None,
            claimed_at: None,
            metadata: serde_json::json!({}),
            expires_at: Utc::now() - ChronoDuration::seconds(1),
        };
        assert!(session.is_expired());
        assert!(!session.is_claimed());
    }
}
