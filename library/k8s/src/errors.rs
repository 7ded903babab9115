use error::*;

#[derive(Error, Kind, GatewayError, HttpCode, Debug)]
pub enum ApiError {
    #[error("The Kubernetes API server rejected our request")]
    #[code(Status::InternalServerError)]
    Api(#[source] kube::Error),
    #[error("Failed to connect to the Kubernetes API server")]
    #[code(Status::InternalServerError)]
    Connection(#[source] kube::Error),
    #[error("The Kubernetes API server rejected our request")]
    #[code(Status::InternalServerError)]
    Rest(#[source] kube::Error),
}

impl From<kube::Error> for ApiError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(_) => ApiError::Api(err),
            kube::Error::Connection(_) => ApiError::Connection(err),
            _ => ApiError::Rest(err),
        }
    }
}

/// Surfaced by [crate::retry::with_backoff] once the backoff budget is exhausted against a
/// transient failure, or immediately for a non-transient one.
#[derive(Error, Kind, GatewayError, HttpCode, Debug)]
#[code(Status::ServiceUnavailable)]
#[error(
    "The container platform did not respond successfully after repeated attempts with \
backoff. The cluster may be unhealthy or unreachable."
)]
pub struct UpstreamUnavailable {
    #[source]
    pub source: kube::Error,
}
