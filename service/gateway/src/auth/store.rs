//! Thin error-translation seam between `sqlx` and the workspace's `GatewayError` stack.

use error::*;

#[derive(Error, GatewayError, Kind, HttpCode, Debug)]
#[code(Status::InternalServerError)]
#[error("the auth store rejected the request")]
pub struct StoreError {
    #[source]
    pub source: sqlx::Error,
}

impl From<sqlx::Error> for StoreError {
    fn from(source: sqlx::Error) -> Self {
        StoreError { source }
    }
}

/// True when a unique-constraint violation was the cause, used to translate `sqlx::Error`
/// into the `Duplicate` taxonomy entry from spec §4.4 without string-matching Postgres error
/// text elsewhere in the crate.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505")
    )
}
