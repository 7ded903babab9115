//! WebSocket Proxy (WP): per spec §4.7. Tracks a per-`computeId` connection set and
//! schedules delayed teardown when it empties, in the spirit of the teacher's
//! `garbage_collector`/`event_watcher` coroutine-based lifecycle management.

use error::*;
use futures_util::{SinkExt, StreamExt};
use k8s::ContainerPlatform;
use lazy_static::lazy_static;
use log::{debug, info, warn};
use result::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use term_colors::*;
use tokio::sync::RwLock;

/// `rocket_ws` re-exports the same `tungstenite` frame type `tokio_tungstenite` uses
/// upstream, so client and daemon frames can be forwarded without per-variant conversion.
type WsFrame = tokio_tungstenite::tungstenite::Message;

/// The live `computeId -> connection count` map WP consults to decide when to schedule
/// (or cancel) an auto-teardown, matching spec §5's "Connection map in WP: guarded by a
/// read/write lock".
lazy_static! {
    static ref CONNECTIONS: RwLock<HashMap<String, u64>> = RwLock::new(HashMap::new());
}

pub struct TeardownConfig {
    pub enabled: bool,
    pub delay: Duration,
}

/// The daemon's side of a bridged connection, already upgraded by [dial] before the
/// client's own connection is accepted.
pub type UpstreamStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Carries the daemon's own HTTP status when the dial failed at the upgrade handshake
/// (e.g. the daemon answered 404/503 instead of 101), falling back to 500 for anything
/// lower-level (connection refused, DNS failure, timeout), per spec §4.7 step 2.
#[derive(Error, GatewayError, Kind, Debug)]
#[error("failed to dial the daemon websocket endpoint at {uri}")]
pub struct DialError {
    pub uri: String,
    pub status: Option<u16>,
    #[source]
    pub source: tokio_tungstenite::tungstenite::Error,
}

impl HttpCode for DialError {
    fn http_code(&self) -> Status {
        self.status
            .and_then(Status::from_code)
            .unwrap_or(Status::InternalServerError)
    }
}

/// Dials the daemon at `ws://<ip>:<port>/ws`, per spec §4.7 step 2. Must complete
/// successfully before the client's own connection is upgraded (step 3); a caller must not
/// call `ws.channel(...)` until this returns `Ok`.
pub async fn dial(ip: &str, port: u16) -> Result<UpstreamStream> {
    let uri = format!("ws://{}:{}/ws", ip, port);
    match tokio_tungstenite::connect_async(&uri).await {
        Ok((socket, _)) => Ok(socket),
        Err(err) => {
            let status = match &err {
                tokio_tungstenite::tungstenite::Error::Http(response) => {
                    Some(response.status().as_u16())
                }
                _ => None,
            };
            warn!("failed to dial daemon websocket at {}: {:?}", cyan(&uri), err);
            Err(DialError { uri, status, source: err }.into())
        }
    }
}

async fn track(compute_id: &str) -> u64 {
    let mut map = CONNECTIONS.write().await;
    let count = map.entry(compute_id.to_string()).or_insert(0);
    *count += 1;
    let value = *count;
    debug!("compute {} now has {} tracked connection(s)", cyan(compute_id), value);
    value
}

async fn untrack(compute_id: &str) -> u64 {
    let mut map = CONNECTIONS.write().await;
    let remaining = match map.get_mut(compute_id) {
        Some(count) if *count > 1 => {
            *count -= 1;
            *count
        }
        Some(_) => {
            map.remove(compute_id);
            0
        }
        None => 0,
    };
    debug!(
        "compute {} now has {} tracked connection(s)",
        cyan(compute_id),
        remaining
    );
    remaining
}

async fn connection_count(compute_id: &str) -> u64 {
    CONNECTIONS.read().await.get(compute_id).copied().unwrap_or(0)
}

/// Bridges an already-upgraded client `rocket_ws` connection to an already-dialed daemon
/// connection (see [dial]), tracks the connection for the duration of the bridge, and
/// schedules auto-teardown once the connection set for this compute empties, per spec §4.7
/// steps 4-6.
pub async fn bridge(
    stream: rocket_ws::stream::DuplexStream,
    upstream: UpstreamStream,
    compute_id: String,
    teardown: Arc<TeardownConfig>,
    platform: Arc<dyn ContainerPlatform>,
) {
    track(&compute_id).await;

    let (mut client_write, mut client_read) = stream.split();
    let (mut upstream_write, mut upstream_read) = upstream.split();

    let client_to_upstream = async {
        while let Some(Ok(message)) = client_read.next().await {
            if message.is_close() {
                break;
            }
            if upstream_write.send(message).await.is_err() {
                break;
            }
        }
    };

    let upstream_to_client = async {
        while let Some(Ok(message)) = upstream_read.next().await {
            if message.is_close() {
                break;
            }
            if client_write.send(message).await.is_err() {
                break;
            }
        }
    };

    // Either direction exiting tears down both; message order within a direction is
    // preserved by the sequential `.next()`/`.send()` loop above, per spec §5.
    tokio::select! {
        _ = client_to_upstream => {}
        _ = upstream_to_client => {}
    }

    let remaining = untrack(&compute_id).await;
    if remaining == 0 && teardown.enabled {
        schedule_teardown(compute_id, teardown.delay, platform);
    }
}

/// Schedules `CM.DeleteCompute` after `delay`, re-checking the connection set immediately
/// before firing and canceling if a new connection arrived in the interim, per spec §4.7
/// step 6 and the literal scenario in spec §8 (`T+200ms` fire, canceled by a `T+100ms`
/// reconnect).
fn schedule_teardown(compute_id: String, delay: Duration, platform: Arc<dyn ContainerPlatform>) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if connection_count(&compute_id).await > 0 {
            debug!(
                "teardown for compute {} canceled: a new connection arrived during the delay",
                cyan(&compute_id)
            );
            return;
        }
        match crate::compute::delete_compute(platform.as_ref(), &compute_id).await {
            Ok(()) => info!("auto-teardown deleted idle compute {}", cyan(&compute_id)),
            Err(err) => {
                warn!(
                    "auto-teardown failed for compute {}, rescheduling once: {:?}",
                    cyan(&compute_id),
                    err
                );
                tokio::time::sleep(Duration::from_secs(30)).await;
                if connection_count(&compute_id).await == 0 {
                    let _ = crate::compute::delete_compute(platform.as_ref(), &compute_id).await;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dial_failure_yields_an_internal_server_error_when_no_upstream_status_is_available() {
        // Port 0 never accepts a connection, so this exercises the low-level (non-HTTP)
        // failure branch where no upstream status is available to propagate.
        let err = dial("127.0.0.1", 0).await.unwrap_err();
        assert_eq!(err.http_code(), httpcode::Status::InternalServerError);
    }

    #[tokio::test]
    async fn tracking_and_untracking_is_symmetric() {
        let id = "test-compute-ws";
        assert_eq!(track(id).await, 1);
        assert_eq!(track(id).await, 2);
        assert_eq!(untrack(id).await, 1);
        assert_eq!(untrack(id).await, 0);
        assert_eq!(connection_count(id).await, 0);
    }

    /// Scenario 6 from the testable-properties list: a single client disconnects, teardown
    /// fires at `T+200ms`; a reconnect at `T+100ms` cancels it.
    #[tokio::test]
    async fn a_reconnect_during_the_teardown_delay_cancels_it() {
        use k8s::platform::fake::FakePlatform;
        let platform: Arc<dyn ContainerPlatform> = Arc::new(FakePlatform::default());
        let compute_id = "teardown-scenario-6";
        platform
            .create_workload(&k8s::WorkloadSpec {
                compute_id: compute_id.to_string(),
                preset_id: "default-development".to_string(),
                image: "registry.example.com/compute/runtime:latest".to_string(),
                cpu: None,
                memory: None,
                env: vec![],
                role: k8s::WorkloadRole::Compute,
            })
            .await
            .unwrap();

        track(compute_id).await;
        untrack(compute_id).await;
        schedule_teardown(compute_id.to_string(), Duration::from_millis(200), platform.clone());

        tokio::time::sleep(Duration::from_millis(100)).await;
        track(compute_id).await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        untrack(compute_id).await;

        assert!(platform.get_pod_by_compute_id(compute_id).await.unwrap().is_some());
    }
}
