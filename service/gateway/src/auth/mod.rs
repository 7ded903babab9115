//! Authentication Core (AC): users, organizations, API keys, claimable sessions, and signed
//! bearer tokens, per spec §4.4.

pub mod api_keys;
pub mod organizations;
pub mod sessions;
pub mod store;
pub mod tokens;
pub mod users;

pub use tokens::{Claims, SubjectKind, TokenFactory};

use error::*;
use result::Result;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use rocket::Request;

/// The `Authorization: Bearer <token>` admission guard from spec §4.8. A route taking
/// `Identity` as a parameter requires a valid bearer token; routes that don't simply omit it.
pub struct Identity(pub Claims);

#[derive(Error, GatewayError, Kind, HttpCode, Debug)]
#[code(Status::Unauthorized)]
#[error("the request carried no Authorization: Bearer header")]
pub struct Unauthenticated;

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Identity {
    type Error = Box<dyn GatewayError>;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let factory: &TokenFactory = match req.rocket().state() {
            Some(factory) => factory,
            None => {
                return Outcome::Failure((
                    Status::InternalServerError,
                    StringError::from("token factory not managed by this rocket instance").into(),
                ))
            }
        };
        let header = match req.headers().get_one("Authorization") {
            Some(header) => header,
            None => {
                return Outcome::Failure((Status::Unauthorized, Unauthenticated.into()));
            }
        };
        let token = match header.strip_prefix("Bearer ") {
            Some(token) => token,
            None => return Outcome::Failure((Status::Unauthorized, Unauthenticated.into())),
        };
        match factory.validate_token(token) {
            Ok(claims) => Outcome::Success(Identity(claims)),
            Err(err) => Outcome::Failure((Status::Unauthorized, err)),
        }
    }
}

/// Checks that an `end_user` bearer's claimable-session resource grants cover the target
/// compute id, per spec §4.8's admission rule for preview traffic.
pub async fn authorize_end_user_for_compute(
    pool: &sqlx::PgPool,
    claims: &Claims,
    compute_id: &str,
) -> Result<()> {
    let session_id = match claims.session_id {
        Some(id) => id,
        None => return Err(Unauthenticated.into()),
    };
    let resources = sessions::resources_for_session(pool, session_id).await?;
    let permitted = resources
        .iter()
        .any(|r| r.resource_type == "compute" && r.resource_id == compute_id);
    if permitted {
        Ok(())
    } else {
        Err(Forbidden.into())
    }
}

#[derive(Error, GatewayError, Kind, HttpCode, Debug)]
#[code(Status::Forbidden)]
#[error("this session is not granted access to the requested compute")]
pub struct Forbidden;
