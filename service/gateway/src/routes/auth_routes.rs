use crate::auth::{self, Identity, TokenFactory};
use error::*;
use kind::Kind;
use response::Response;
use result::Result;
use rocket::serde::json::Json;
use rocket::{get, post, State};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub organization_name: Option<String>,
}

#[derive(Serialize, Kind)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub organization_id: Option<Uuid>,
}

/// `POST /auth/register`.
#[post("/auth/register", data = "<body>")]
pub async fn register(
    pool: &State<PgPool>,
    factory: &State<TokenFactory>,
    body: Json<RegisterRequest>,
) -> Result<Response<TokenPair>> {
    let body = body.into_inner();
    let user = auth::users::register_user(
        pool,
        &body.email,
        &body.password,
        &body.first_name,
        &body.last_name,
    )
    .await?;
    auth::sessions::claim_all_sessions_by_email(pool, &user.email, user.id).await?;

    let organization_id = match body.organization_name {
        Some(name) => Some(auth::organizations::create_organization(pool, &name, user.id).await?.id),
        None => None,
    };

    let (access_token, refresh_token) =
        factory.generate_user_tokens(user.id, organization_id, vec!["read".to_string(), "write".to_string()])?;
    Ok(TokenPair {
        access_token,
        refresh_token,
        organization_id,
    }
    .into())
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub organization_id: Option<Uuid>,
}

/// `POST /auth/login`.
#[post("/auth/login", data = "<body>")]
pub async fn login(
    pool: &State<PgPool>,
    factory: &State<TokenFactory>,
    body: Json<LoginRequest>,
) -> Result<Response<TokenPair>> {
    let body = body.into_inner();
    let user = auth::users::authenticate_user(pool, &body.email, &body.password).await?;

    let organization_id = match body.organization_id {
        Some(organization_id) => {
            if auth::organizations::is_member(pool, organization_id, user.id).await? {
                Some(organization_id)
            } else {
                return Err(auth::Forbidden.into());
            }
        }
        None => None,
    };

    let (access_token, refresh_token) =
        factory.generate_user_tokens(user.id, organization_id, vec!["read".to_string(), "write".to_string()])?;
    Ok(TokenPair {
        access_token,
        refresh_token,
        organization_id,
    }
    .into())
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// `POST /auth/refresh`.
#[post("/auth/refresh", data = "<body>")]
pub async fn refresh(
    factory: &State<TokenFactory>,
    body: Json<RefreshRequest>,
) -> Result<Response<TokenPair>> {
    let claims = factory.validate_token(&body.refresh_token)?;
    let user_id = claims
        .user_id
        .ok_or_else(|| -> Box<dyn GatewayError> { auth::tokens::InvalidToken.into() })?;
    let (access_token, refresh_token) =
        factory.generate_user_tokens(user_id, claims.organization_id, claims.scopes)?;
    Ok(TokenPair {
        access_token,
        refresh_token,
        organization_id: claims.organization_id,
    }
    .into())
}

#[derive(Deserialize)]
pub struct CreateApiKeyRequest {
    pub name: String,
    pub scopes: Vec<String>,
}

#[derive(Serialize, Kind)]
pub struct ApiKeyCreated {
    pub id: Uuid,
    pub key_prefix: String,
    pub raw_key: String,
}

/// `POST /auth/api-keys`, org-scoped: the caller must carry an org-attached user bearer.
#[post("/auth/api-keys", data = "<body>")]
pub async fn create_api_key(
    pool: &State<PgPool>,
    identity: Identity,
    body: Json<CreateApiKeyRequest>,
) -> Result<Response<ApiKeyCreated>> {
    let organization_id = identity
        .0
        .organization_id
        .ok_or_else(|| -> Box<dyn GatewayError> { auth::Forbidden.into() })?;
    let body = body.into_inner();
    let (record, raw_key) =
        auth::api_keys::create_api_key(pool, organization_id, &body.name, body.scopes).await?;
    Ok(ApiKeyCreated {
        id: record.id,
        key_prefix: record.key_prefix,
        raw_key,
    }
    .into())
}

#[derive(Deserialize)]
pub struct CreateSessionRequest {
    pub organization_id: Uuid,
    pub email: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Serialize, Kind)]
pub struct SessionCreated {
    pub id: Uuid,
    pub token: String,
}

/// `POST /auth/sessions`. The caller must be a member of the target organization.
#[post("/auth/sessions", data = "<body>")]
pub async fn create_session(
    pool: &State<PgPool>,
    identity: Identity,
    body: Json<CreateSessionRequest>,
) -> Result<Response<SessionCreated>> {
    let body = body.into_inner();
    let user_id = identity
        .0
        .user_id
        .ok_or_else(|| -> Box<dyn GatewayError> { auth::Forbidden.into() })?;
    if !auth::organizations::is_member(pool, body.organization_id, user_id).await? {
        return Err(auth::Forbidden.into());
    }
    let session = auth::sessions::create_claimable_session(
        pool,
        body.organization_id,
        body.email,
        body.metadata.unwrap_or_else(|| serde_json::json!({})),
    )
    .await?;
    Ok(SessionCreated {
        id: session.id,
        token: session.session_token.clone(),
    }
    .into())
}

#[derive(Serialize, Kind)]
pub struct SessionClaimed {
    pub id: Uuid,
    pub claimed: bool,
}

/// `POST /auth/sessions/:id/claim`: requires a user bearer, sets `userID` on the session.
#[post("/auth/sessions/<id>/claim")]
pub async fn claim_session(
    pool: &State<PgPool>,
    identity: Identity,
    id: Uuid,
) -> Result<Response<SessionClaimed>> {
    let user_id = identity
        .0
        .user_id
        .ok_or_else(|| -> Box<dyn GatewayError> { auth::Forbidden.into() })?;
    auth::sessions::claim_session(pool, id, user_id).await?;
    Ok(SessionClaimed { id, claimed: true }.into())
}

#[derive(Serialize, Kind)]
pub struct AuthStatus {
    pub kind: String,
    pub user_id: Option<Uuid>,
    pub organization_id: Option<Uuid>,
    pub scopes: Vec<String>,
}

/// `GET /auth/status`: introspection of the bearer presented on the request.
#[get("/auth/status")]
pub async fn status(identity: Identity) -> Result<Response<AuthStatus>> {
    Ok(AuthStatus {
        kind: format!("{:?}", identity.0.kind),
        user_id: identity.0.user_id,
        organization_id: identity.0.organization_id,
        scopes: identity.0.scopes,
    }
    .into())
}

#[derive(Serialize, Kind)]
pub struct AuthInfo {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// `GET /auth/info`: resolves the bearer's user record, when the bearer is `kind:user`.
#[get("/auth/info")]
pub async fn info(pool: &State<PgPool>, identity: Identity) -> Result<Response<AuthInfo>> {
    match identity.0.user_id {
        Some(user_id) => {
            let user: auth::users::User = sqlx::query_as(
                "SELECT id, email, password_hash, first_name, last_name, is_active, created_at FROM users WHERE id = $1",
            )
            .bind(user_id)
            .fetch_one(pool.inner())
            .await
            .map_err(auth::store::StoreError::from)?;
            Ok(AuthInfo {
                email: Some(user.email),
                first_name: Some(user.first_name),
                last_name: Some(user.last_name),
            }
            .into())
        }
        None => Ok(AuthInfo {
            email: None,
            first_name: None,
            last_name: None,
        }
        .into()),
    }
}
