//! Exercises the literal HTTP proxy scenarios from the testable-properties list end to
//! end: a real TCP listener stands in for the daemon, and a `FakePlatform` stands in for
//! the container platform, so no live cluster or Postgres instance is required.

use compute_gateway::proxy::http::{self as hp, ProxyConfig};
use httpcode::HttpCode;
use k8s::platform::fake::FakePlatform;
use k8s::{ContainerPlatform, PodPhase, PodRecord, WorkloadSpec};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Spawns a one-shot daemon stand-in that answers a single request with `body`, and hands
/// back the request's `Host` and `X-Compute-ID` headers for assertion.
async fn spawn_fake_daemon(body: &'static str) -> (u16, tokio::sync::oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 4096];
        let n = socket.read(&mut buf).await.unwrap();
        let request = String::from_utf8_lossy(&buf[..n]).to_string();
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        let _ = tx.send(request);
    });
    (port, rx)
}

fn fake_platform_with_pod(compute_id: &str, port: u16, phase: PodPhase, ip: Option<&str>) -> Arc<dyn ContainerPlatform> {
    let record = PodRecord {
        compute_id: compute_id.to_string(),
        preset_id: "default-development".to_string(),
        phase,
        pod_ip: ip.map(|ip| ip.to_string()),
        port: port as i32,
        role: k8s::WorkloadRole::Compute,
        created_at: None,
    };
    Arc::new(OverridePlatform {
        inner: FakePlatform::default(),
        record,
    })
}

/// Wraps a [FakePlatform] so individual scenarios can force a specific [PodRecord] rather
/// than the one [FakePlatform::create_workload] assigns deterministically.
struct OverridePlatform {
    inner: FakePlatform,
    record: PodRecord,
}

#[async_trait::async_trait]
impl ContainerPlatform for OverridePlatform {
    async fn create_workload(
        &self,
        spec: &WorkloadSpec,
    ) -> result::Result<k8s_openapi::api::apps::v1::Deployment> {
        self.inner.create_workload(spec).await
    }

    async fn get_pod_by_compute_id(&self, compute_id: &str) -> result::Result<Option<PodRecord>> {
        if compute_id == self.record.compute_id {
            Ok(Some(self.record.clone()))
        } else {
            Ok(None)
        }
    }

    async fn list_pods_by_preset(&self, preset_id: &str) -> result::Result<Vec<PodRecord>> {
        self.inner.list_pods_by_preset(preset_id).await
    }

    async fn delete_workload_by_compute_id(&self, compute_id: &str) -> result::Result<()> {
        self.inner.delete_workload_by_compute_id(compute_id).await
    }
}

fn config() -> ProxyConfig {
    ProxyConfig {
        preview_domain: "preview.example.com".to_string(),
        ..Default::default()
    }
}

/// Scenario 1: a ready pod on its default port; the daemon sees `X-Compute-ID` and a
/// rewritten `Host`, and the response body passes through unchanged.
#[tokio::test]
async fn scenario_1_healthy_request_round_trips_with_forwarding_headers() {
    let (port, daemon_saw) = spawn_fake_daemon("ok").await;
    let platform = fake_platform_with_pod("abc123", port, PodPhase::Running, Some("127.0.0.1"));

    let response = hp::forward(
        &config(),
        platform.as_ref(),
        reqwest::Method::GET,
        "abc123.preview.example.com",
        "/health",
        tokio::io::empty(),
        vec![],
    )
    .await
    .unwrap();

    assert_eq!(response.status, 200);
    let mut body = Vec::new();
    let mut reader = response.reader;
    reader.read_to_end(&mut body).await.unwrap();
    assert_eq!(body, b"ok");

    let request = daemon_saw.await.unwrap();
    assert!(request.contains(&format!("Host: 127.0.0.1:{}", port)));
    assert!(request.contains("X-Compute-ID: abc123"));
}

/// Scenario 2: the port-prefixed host form targets the daemon's listening port instead of
/// the pod's default.
#[tokio::test]
async fn scenario_2_port_prefixed_host_targets_the_requested_port() {
    let (port, daemon_saw) = spawn_fake_daemon("app").await;
    let platform = fake_platform_with_pod("abc123", port, PodPhase::Running, Some("127.0.0.1"));

    let host = format!("{}-abc123.preview.example.com", port);
    let response = hp::forward(
        &config(),
        platform.as_ref(),
        reqwest::Method::GET,
        &host,
        "/app",
        tokio::io::empty(),
        vec![],
    )
    .await
    .unwrap();

    assert_eq!(response.status, 200);
    let request = daemon_saw.await.unwrap();
    assert!(request.contains(&format!(":{}", port)));
}

/// Scenario 3: no compute exists under the requested id.
#[tokio::test]
async fn scenario_3_unknown_compute_yields_404() {
    let platform: Arc<dyn ContainerPlatform> = Arc::new(FakePlatform::default());
    let err = hp::forward(
        &config(),
        platform.as_ref(),
        reqwest::Method::GET,
        "nosuch.preview.example.com",
        "/",
        tokio::io::empty(),
        vec![],
    )
    .await
    .unwrap_err();

    assert_eq!(err.http_code(), httpcode::Status::NotFound);
}

/// Scenario 4: the pod exists but has not reported an IP yet, i.e. isn't ready.
#[tokio::test]
async fn scenario_4_not_ready_pod_yields_503() {
    let platform = fake_platform_with_pod("xyz789", 8080, PodPhase::Pending, None);
    let err = hp::forward(
        &config(),
        platform.as_ref(),
        reqwest::Method::GET,
        "gateway.internal",
        "/preview/8080-xyz789",
        tokio::io::empty(),
        vec![],
    )
    .await
    .unwrap_err();

    assert_eq!(err.http_code(), httpcode::Status::ServiceUnavailable);
}
