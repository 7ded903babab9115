//! Organizations and membership, backing the org scoping used throughout AC and GFE.

use super::store::StoreError;
use chrono::{DateTime, Utc};
use error::*;
use result::Result;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    Member,
}

#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct OrganizationMember {
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub role: String,
}

#[derive(Error, GatewayError, Kind, HttpCode, Debug)]
#[code(Status::NotFound)]
#[error("no organization with id '{organization_id}' was found")]
pub struct NotFound {
    pub organization_id: Uuid,
}

pub async fn create_organization(pool: &PgPool, name: &str, owner: Uuid) -> Result<Organization> {
    let mut tx = pool.begin().await.map_err(StoreError::from)?;
    let org: Organization = sqlx::query_as(
        "INSERT INTO organizations (id, name, created_at) VALUES ($1, $2, now()) RETURNING id, name, created_at",
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .fetch_one(&mut tx)
    .await
    .map_err(StoreError::from)?;

    sqlx::query(
        "INSERT INTO organization_members (user_id, organization_id, role) VALUES ($1, $2, 'owner')",
    )
    .bind(owner)
    .bind(org.id)
    .execute(&mut tx)
    .await
    .map_err(StoreError::from)?;

    tx.commit().await.map_err(StoreError::from)?;
    Ok(org)
}

pub async fn get_organization(pool: &PgPool, organization_id: Uuid) -> Result<Organization> {
    sqlx::query_as("SELECT id, name, created_at FROM organizations WHERE id = $1")
        .bind(organization_id)
        .fetch_optional(pool)
        .await
        .map_err(StoreError::from)?
        .ok_or_else(|| NotFound { organization_id }.into())
}

pub async fn is_member(pool: &PgPool, organization_id: Uuid, user_id: Uuid) -> Result<bool> {
    let row: Option<(i32,)> = sqlx::query_as(
        "SELECT 1 FROM organization_members WHERE organization_id = $1 AND user_id = $2",
    )
    .bind(organization_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .map_err(StoreError::from)?;
    Ok(row.is_some())
}
