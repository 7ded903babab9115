//! Signed bearer tokens with typed claims, per spec §4.4/§6: HMAC-SHA256, `kind` one of
//! `user | api_key | end_user`, `exp` a unix-seconds integer, `iss` the configured issuer.

use chrono::{Duration as ChronoDuration, Utc};
use error::*;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use result::Result;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const ACCESS_TOKEN_TTL_MINUTES: i64 = 15;
pub const REFRESH_TOKEN_TTL_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    User,
    ApiKey,
    EndUser,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub kind: SubjectKind,
    pub user_id: Option<Uuid>,
    pub api_key_id: Option<Uuid>,
    pub session_id: Option<Uuid>,
    pub organization_id: Option<Uuid>,
    pub scopes: Vec<String>,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

#[derive(Error, GatewayError, Kind, HttpCode, Debug)]
#[code(Status::Unauthorized)]
#[error("the supplied bearer token is malformed or its signature does not verify")]
pub struct InvalidToken;

#[derive(Error, GatewayError, Kind, HttpCode, Debug)]
#[code(Status::Unauthorized)]
#[error("the supplied bearer token has expired")]
pub struct ExpiredToken;

pub struct TokenFactory {
    secret: String,
    issuer: String,
}

impl TokenFactory {
    pub fn new(secret: impl Into<String>, issuer: impl Into<String>) -> Self {
        TokenFactory {
            secret: secret.into(),
            issuer: issuer.into(),
        }
    }

    fn sign(&self, kind: SubjectKind, ttl: ChronoDuration, claims: ClaimsBuilder) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            kind,
            user_id: claims.user_id,
            api_key_id: claims.api_key_id,
            session_id: claims.session_id,
            organization_id: claims.organization_id,
            scopes: claims.scopes,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            iss: self.issuer.clone(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|_| InvalidToken.into())
    }

    /// `GenerateUserTokens`: returns `(access, refresh)` per spec §4.4's TTLs.
    pub fn generate_user_tokens(
        &self,
        user_id: Uuid,
        organization_id: Option<Uuid>,
        scopes: Vec<String>,
    ) -> Result<(String, String)> {
        let access = self.sign(
            SubjectKind::User,
            ChronoDuration::minutes(ACCESS_TOKEN_TTL_MINUTES),
            ClaimsBuilder {
                user_id: Some(user_id),
                api_key_id: None,
                session_id: None,
                organization_id,
                scopes: scopes.clone(),
            },
        )?;
        let refresh = self.sign(
            SubjectKind::User,
            ChronoDuration::days(REFRESH_TOKEN_TTL_DAYS),
            ClaimsBuilder {
                user_id: Some(user_id),
                api_key_id: None,
                session_id: None,
                organization_id,
                scopes,
            },
        )?;
        Ok((access, refresh))
    }

    /// `GenerateAPIKeyToken`: no expiry beyond the bound of the key record itself, so a long
    /// TTL is used in the token while the key's own `expiresAt`/revocation is the real bound.
    pub fn generate_api_key_token(
        &self,
        api_key_id: Uuid,
        organization_id: Uuid,
        scopes: Vec<String>,
    ) -> Result<String> {
        self.sign(
            SubjectKind::ApiKey,
            ChronoDuration::days(365),
            ClaimsBuilder {
                user_id: None,
                api_key_id: Some(api_key_id),
                session_id: None,
                organization_id: Some(organization_id),
                scopes,
            },
        )
    }

    /// `GenerateEndUserToken`: TTL bounded by the remaining lifetime of the claimable session.
    pub fn generate_end_user_token(
        &self,
        session_id: Uuid,
        organization_id: Uuid,
        session_remaining: ChronoDuration,
        scopes: Vec<String>,
    ) -> Result<String> {
        self.sign(
            SubjectKind::EndUser,
            session_remaining,
            ClaimsBuilder {
                user_id: None,
                api_key_id: None,
                session_id: Some(session_id),
                organization_id: Some(organization_id),
                scopes,
            },
        )
    }

    /// `ValidateToken`: verifies signature and issuer, rejects an expired `exp`. jsonwebtoken
    /// already rejects expired tokens during `decode`, surfaced here as the spec's distinct
    /// `ExpiredToken` vs `InvalidToken` taxonomy entries.
    pub fn validate_token(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.iss = Some(self.issuer.clone());
        match decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        ) {
            Ok(data) => Ok(data.claims),
            Err(err) => match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => Err(ExpiredToken.into()),
                _ => Err(InvalidToken.into()),
            },
        }
    }
}

struct ClaimsBuilder {
    user_id: Option<Uuid>,
    api_key_id: Option<Uuid>,
    session_id: Option<Uuid>,
    organization_id: Option<Uuid>,
    scopes: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_user_claims() {
        let factory = TokenFactory::new("s3cr3t", "compute-gateway");
        let user_id = Uuid::new_v4();
        let (access, _) = factory
            .generate_user_tokens(user_id, None, vec!["read".to_string()])
            .unwrap();
        let claims = factory.validate_token(&access).unwrap();
        assert_eq!(claims.user_id, Some(user_id));
        assert_eq!(claims.kind, SubjectKind::User);
    }

    #[test]
    fn rejects_tokens_signed_with_a_different_secret() {
        let a = TokenFactory::new("secret-a", "compute-gateway");
        let b = TokenFactory::new("secret-b", "compute-gateway");
        let (access, _) = a
            .generate_user_tokens(Uuid::new_v4(), None, vec![])
            .unwrap();
        assert!(b.validate_token(&access).is_err());
    }

    #[test]
    fn rejects_an_expired_token() {
        let factory = TokenFactory::new("s3cr3t", "compute-gateway");
        let token = factory
            .sign(
                SubjectKind::User,
                ChronoDuration::seconds(-1),
                ClaimsBuilder {
                    user_id: Some(Uuid::new_v4()),
                    api_key_id: None,
                    session_id: None,
                    organization_id: None,
                    scopes: vec![],
                },
            )
            .unwrap();
        assert!(factory.validate_token(&token).is_err());
    }
}
