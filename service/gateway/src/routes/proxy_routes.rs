use crate::auth::{self, TokenFactory};
use crate::config::ServeArgs;
use crate::proxy::{http as hp, ws as wp};
use error::*;
use k8s::ContainerPlatform;
use reqwest::Method;
use result::Result;
use rocket::data::Data;
use rocket::request::Request;
use rocket::{get, route, State};
use std::sync::Arc;

/// Optionally validates an `Authorization: Bearer` header against `factory`, and when the
/// bearer is `kind:end_user`, checks its claimable-session resource grant against
/// `compute_id`, per spec §4.8's admission rule. A request with no bearer at all is let
/// through unauthenticated, matching the "everything else ... handed to HP" routing rule,
/// which names no blanket auth requirement for preview traffic.
async fn admit(
    pool: &sqlx::PgPool,
    factory: &TokenFactory,
    authorization: Option<&str>,
    compute_id: &str,
) -> Result<()> {
    let header = match authorization {
        Some(header) => header,
        None => return Ok(()),
    };
    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| -> Box<dyn GatewayError> { auth::tokens::InvalidToken.into() })?;
    let claims = factory.validate_token(token)?;
    if claims.kind == auth::tokens::SubjectKind::EndUser {
        auth::authorize_end_user_for_compute(pool, &claims, compute_id).await?;
    }
    Ok(())
}

/// `GET /preview/<...>` or any request on a `preview` host: HTTP traffic goes through HP.
/// Declared with the `rocket::route` attribute rather than `#[get]`/`#[post]` so a single
/// handler can answer every HTTP method, matching HP's "method-agnostic forwarder" role
/// from spec §4.6.
#[route(
    "/<path..>",
    method = "GET",
    method = "POST",
    method = "PUT",
    method = "PATCH",
    method = "DELETE",
    method = "HEAD",
    rank = 100,
    data = "<body>"
)]
pub async fn proxy_catchall(
    req: &Request<'_>,
    path: std::path::PathBuf,
    body: Data<'_>,
    config: &State<hp::ProxyConfig>,
    pool: &State<sqlx::PgPool>,
    factory: &State<TokenFactory>,
    platform: &State<Arc<dyn ContainerPlatform>>,
) -> Result<hp::ProxiedResponse> {
    let host = req
        .headers()
        .get_one("Host")
        .unwrap_or_default()
        .to_string();
    let path_and_query = match req.uri().query() {
        Some(q) => format!("/{}?{}", path.display(), q),
        None => format!("/{}", path.display()),
    };

    let identity = crate::identity::extract(&host, &path_and_query, &config.preview_domain)
        .ok_or_else(|| -> Box<dyn GatewayError> { hp::MissingComputeId.into() })?;

    admit(
        pool.inner(),
        factory.inner(),
        req.headers().get_one("Authorization"),
        &identity.compute_id,
    )
    .await?;

    let method = match req.method() {
        rocket::http::Method::Get => Method::GET,
        rocket::http::Method::Post => Method::POST,
        rocket::http::Method::Put => Method::PUT,
        rocket::http::Method::Patch => Method::PATCH,
        rocket::http::Method::Delete => Method::DELETE,
        rocket::http::Method::Head => Method::HEAD,
        _ => Method::GET,
    };

    let limit = req
        .limits()
        .get("bytes")
        .unwrap_or_else(|| rocket::data::ByteUnit::Mebibyte(8));
    let body_stream = body.open(limit);

    let forwarded_headers: Vec<(String, String)> = req
        .headers()
        .iter()
        .filter(|h| !h.name().as_str().eq_ignore_ascii_case("host"))
        .map(|h| (h.name().to_string(), h.value().to_string()))
        .collect();

    hp::forward(
        config.inner(),
        platform.as_ref().as_ref(),
        method,
        &host,
        &path_and_query,
        body_stream,
        forwarded_headers,
    )
    .await
}

/// Upgrade requests on the preview surface are handed to WP instead of HP.
#[get("/preview/<path..>", rank = 1)]
pub async fn websocket_upgrade<'r>(
    ws: rocket_ws::WebSocket,
    path: std::path::PathBuf,
    req: &'r Request<'_>,
    config: &State<hp::ProxyConfig>,
    args: &State<ServeArgs>,
    platform: &State<Arc<dyn ContainerPlatform>>,
) -> Result<rocket_ws::Channel<'r>> {
    let host = req
        .headers()
        .get_one("Host")
        .unwrap_or_default()
        .to_string();
    let path_and_query = format!("/preview/{}", path.display());
    let identity = crate::identity::extract(&host, &path_and_query, &config.preview_domain)
        .ok_or_else(|| -> Box<dyn GatewayError> { hp::MissingComputeId.into() })?;

    let pod = crate::compute::get_pod(platform.as_ref().as_ref(), &identity.compute_id)
        .await
        .map_err(|_| -> Box<dyn GatewayError> { hp::PodNotFound.into() })?;
    let ip = pod
        .pod_ip
        .clone()
        .ok_or_else(|| -> Box<dyn GatewayError> { hp::PodNotReady.into() })?;
    let port = identity.port.unwrap_or(pod.port as u16);

    // Dial the daemon and let a failure surface its own status (or 500) before the client
    // connection is upgraded at all, per spec §4.7 step 2.
    let upstream = wp::dial(&ip, port).await?;

    let teardown = Arc::new(wp::TeardownConfig {
        enabled: args.enable_teardown,
        delay: args.teardown_delay,
    });
    let compute_id = identity.compute_id;
    let platform = platform.inner().clone();

    Ok(ws.channel(move |stream| {
        Box::pin(wp::bridge(stream, upstream, compute_id, teardown, platform))
    }))
}
