//! Intra-Compute Daemon Contract (DC): typed client wrappers over the daemon's HTTP+WS
//! surface, per SPEC_FULL.md §4.9. This is not business logic the gateway re-implements;
//! it is the Rust surface GFE route handlers and the WP bridge use to speak the daemon's
//! wire protocol, per spec §1 "specified only at the contract level."

use error::*;
use result::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Error, GatewayError, Kind, HttpCode, Debug)]
#[code(Status::BadGateway)]
#[error("the daemon at {base_url} did not respond successfully")]
pub struct DaemonUnavailable {
    pub base_url: String,
    #[source]
    pub source: reqwest::Error,
}

#[derive(Error, GatewayError, Kind, HttpCode, Debug)]
#[code(Status::GatewayTimeout)]
#[error("timed out waiting for {operation} to reach a terminal state")]
pub struct PollTimeout {
    pub operation: String,
}

/// A thin handle to one compute's daemon, dialed at `http(s)://<ip>:<port>`.
pub struct DaemonClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
pub struct RunCommandRequest {
    pub command: String,
    pub cwd: Option<String>,
    pub env: Option<std::collections::BTreeMap<String, String>>,
    pub background: bool,
    pub stream: bool,
    pub wait_for_completion: bool,
}

#[derive(Debug, Deserialize)]
pub struct RunCommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct StreamedCommandHandle {
    pub cmd_id: String,
    pub channel: String,
}

#[derive(Debug, Deserialize)]
pub enum RunCommandResponse {
    Completed(RunCommandResult),
    Streamed(StreamedCommandHandle),
}

#[derive(Debug, Serialize)]
pub struct CreateTerminalRequest {
    pub pty: bool,
    pub shell: Option<String>,
    pub encoding: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TerminalHandle {
    pub id: String,
    pub pty: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    Never,
    OnFailure,
    Always,
}

#[derive(Debug, Serialize)]
pub struct CreateServerRequest {
    pub slug: String,
    pub install: Option<String>,
    pub start: String,
    pub path: Option<String>,
    pub port: Option<u16>,
    pub strict_port: bool,
    pub autostart: bool,
    pub env_file: Option<String>,
    pub environment: Option<std::collections::BTreeMap<String, String>>,
    pub restart_policy: RestartPolicy,
    pub max_restarts: u32,
    pub restart_delay_ms: u64,
    pub stop_timeout_ms: u64,
    pub depends_on: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ServerStatus {
    pub slug: String,
    pub state: String,
}

#[derive(Debug, Serialize)]
pub struct CreateOverlayRequest {
    pub source: String,
    pub target: String,
    pub ignore: Vec<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OverlayState {
    Pending,
    InProgress,
    Complete,
    Failed,
}

#[derive(Debug, Deserialize)]
pub struct OverlayStatus {
    pub id: String,
    pub state: OverlayState,
}

impl DaemonClient {
    pub fn new(ip: &str, port: u16) -> Self {
        DaemonClient {
            base_url: format!("http://{}:{}", ip, port),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn wrap_err(&self, source: reqwest::Error) -> Box<dyn GatewayError> {
        DaemonUnavailable {
            base_url: self.base_url.clone(),
            source,
        }
        .into()
    }

    /// `POST /run/command`. A `stream:true` request returns a pending `cmdId`/`channel`
    /// before the caller subscribes over WS and sends `command:start`, per the two-phase
    /// protocol in spec §4.9.
    pub async fn run_command(&self, req: RunCommandRequest) -> Result<RunCommandResponse> {
        let streamed = req.stream;
        let response = self
            .client
            .post(self.url("/run/command"))
            .json(&req)
            .send()
            .await
            .map_err(|e| self.wrap_err(e))?;
        if streamed {
            Ok(RunCommandResponse::Streamed(
                response.json().await.map_err(|e| self.wrap_err(e))?,
            ))
        } else {
            Ok(RunCommandResponse::Completed(
                response.json().await.map_err(|e| self.wrap_err(e))?,
            ))
        }
    }

    pub async fn fs_read(&self, path: &str) -> Result<Vec<u8>> {
        Ok(self
            .client
            .get(self.url("/fs/read"))
            .query(&[("path", path)])
            .send()
            .await
            .map_err(|e| self.wrap_err(e))?
            .bytes()
            .await
            .map_err(|e| self.wrap_err(e))?
            .to_vec())
    }

    pub async fn fs_write(&self, path: &str, contents: Vec<u8>) -> Result<()> {
        self.client
            .put(self.url("/fs/write"))
            .query(&[("path", path)])
            .body(contents)
            .send()
            .await
            .map_err(|e| self.wrap_err(e))?;
        Ok(())
    }

    pub async fn fs_mkdir(&self, path: &str) -> Result<()> {
        self.client
            .post(self.url("/fs/mkdir"))
            .query(&[("path", path)])
            .send()
            .await
            .map_err(|e| self.wrap_err(e))?;
        Ok(())
    }

    pub async fn fs_readdir(&self, path: &str) -> Result<Vec<String>> {
        Ok(self
            .client
            .get(self.url("/fs/readdir"))
            .query(&[("path", path)])
            .send()
            .await
            .map_err(|e| self.wrap_err(e))?
            .json()
            .await
            .map_err(|e| self.wrap_err(e))?)
    }

    pub async fn fs_exists(&self, path: &str) -> Result<bool> {
        Ok(self
            .client
            .get(self.url("/fs/exists"))
            .query(&[("path", path)])
            .send()
            .await
            .map_err(|e| self.wrap_err(e))?
            .json()
            .await
            .map_err(|e| self.wrap_err(e))?)
    }

    pub async fn fs_remove(&self, path: &str) -> Result<()> {
        self.client
            .delete(self.url("/fs/remove"))
            .query(&[("path", path)])
            .send()
            .await
            .map_err(|e| self.wrap_err(e))?;
        Ok(())
    }

    pub async fn fs_batch_write(&self, files: Vec<(String, Vec<u8>)>) -> Result<()> {
        #[derive(Serialize)]
        struct Entry {
            path: String,
            contents: String,
        }
        let entries: Vec<Entry> = files
            .into_iter()
            .map(|(path, contents)| Entry {
                path,
                contents: base64::encode(&contents),
            })
            .collect();
        self.client
            .post(self.url("/fs/batch-write"))
            .json(&entries)
            .send()
            .await
            .map_err(|e| self.wrap_err(e))?;
        Ok(())
    }

    pub async fn create_terminal(&self, req: CreateTerminalRequest) -> Result<TerminalHandle> {
        Ok(self
            .client
            .post(self.url("/terminals"))
            .json(&req)
            .send()
            .await
            .map_err(|e| self.wrap_err(e))?
            .json()
            .await
            .map_err(|e| self.wrap_err(e))?)
    }

    pub async fn write_terminal(&self, id: &str, data: Vec<u8>) -> Result<()> {
        self.client
            .post(self.url(&format!("/terminals/{}/write", id)))
            .body(data)
            .send()
            .await
            .map_err(|e| self.wrap_err(e))?;
        Ok(())
    }

    pub async fn resize_terminal(&self, id: &str, cols: u16, rows: u16) -> Result<()> {
        self.client
            .post(self.url(&format!("/terminals/{}/resize?cols={}&rows={}", id, cols, rows)))
            .send()
            .await
            .map_err(|e| self.wrap_err(e))?;
        Ok(())
    }

    /// Destroying a PTY terminal sends SIGHUP per spec §4.9; that is the daemon's concern,
    /// this client merely issues the destroy call.
    pub async fn destroy_terminal(&self, id: &str) -> Result<()> {
        self.client
            .delete(self.url(&format!("/terminals/{}", id)))
            .send()
            .await
            .map_err(|e| self.wrap_err(e))?;
        Ok(())
    }

    pub async fn create_server(&self, req: CreateServerRequest) -> Result<ServerStatus> {
        Ok(self
            .client
            .post(self.url("/servers"))
            .json(&req)
            .send()
            .await
            .map_err(|e| self.wrap_err(e))?
            .json()
            .await
            .map_err(|e| self.wrap_err(e))?)
    }

    pub async fn start_server(&self, slug: &str) -> Result<ServerStatus> {
        Ok(self
            .client
            .post(self.url(&format!("/servers/{}/start", slug)))
            .send()
            .await
            .map_err(|e| self.wrap_err(e))?
            .json()
            .await
            .map_err(|e| self.wrap_err(e))?)
    }

    /// Graceful stop: the daemon sends SIGTERM, waits `stop_timeout_ms`, then SIGKILL, per
    /// spec §4.9; this client only issues the request.
    pub async fn stop_server(&self, slug: &str) -> Result<ServerStatus> {
        Ok(self
            .client
            .post(self.url(&format!("/servers/{}/stop", slug)))
            .send()
            .await
            .map_err(|e| self.wrap_err(e))?
            .json()
            .await
            .map_err(|e| self.wrap_err(e))?)
    }

    pub async fn server_status(&self, slug: &str) -> Result<ServerStatus> {
        Ok(self
            .client
            .get(self.url(&format!("/servers/{}", slug)))
            .send()
            .await
            .map_err(|e| self.wrap_err(e))?
            .json()
            .await
            .map_err(|e| self.wrap_err(e))?)
    }

    pub async fn create_overlay(&self, req: CreateOverlayRequest) -> Result<OverlayStatus> {
        Ok(self
            .client
            .post(self.url("/overlays"))
            .json(&req)
            .send()
            .await
            .map_err(|e| self.wrap_err(e))?
            .json()
            .await
            .map_err(|e| self.wrap_err(e))?)
    }

    pub async fn overlay_status(&self, id: &str) -> Result<OverlayStatus> {
        Ok(self
            .client
            .get(self.url(&format!("/overlays/{}", id)))
            .send()
            .await
            .map_err(|e| self.wrap_err(e))?
            .json()
            .await
            .map_err(|e| self.wrap_err(e))?)
    }

    /// Polls overlay status with the exponential backoff from spec §9 (500ms -> 5s, factor
    /// 1.5, max 60 attempts) until it reaches `Complete`/`Failed`, or returns [PollTimeout].
    pub async fn wait_for_overlay(&self, id: &str) -> Result<OverlayStatus> {
        let mut delay = Duration::from_millis(500);
        let max_delay = Duration::from_secs(5);
        for _ in 0..60 {
            let status = self.overlay_status(id).await?;
            if matches!(status.state, OverlayState::Complete | OverlayState::Failed) {
                return Ok(status);
            }
            tokio::time::sleep(delay).await;
            delay = std::cmp::min(max_delay, Duration::from_millis((delay.as_millis() as f64 * 1.5) as u64));
        }
        Err(PollTimeout {
            operation: format!("overlay {}", id),
        }
        .into())
    }

    /// Subscribes to a path's filesystem change events, returned as `change|add|remove`
    /// events over the daemon's WS channel per spec §4.9. Route handlers consume this frame
    /// to open the subscription; the actual streaming happens over the WP bridge.
    pub fn watch_path_frame(&self, path: &str) -> serde_json::Value {
        serde_json::json!({ "type": "subscribe", "channel": "watch", "path": path })
    }

    /// The dedicated signal channel subscription frame (`port-open|port-close|server-ready|error`).
    pub fn signals_frame(&self) -> serde_json::Value {
        serde_json::json!({ "type": "subscribe", "channel": "signals" })
    }

    pub async fn session_info(&self) -> Result<SessionInfo> {
        Ok(self
            .client
            .get(self.url("/session"))
            .send()
            .await
            .map_err(|e| self.wrap_err(e))?
            .json()
            .await
            .map_err(|e| self.wrap_err(e))?)
    }

    pub async fn magic_link(&self) -> Result<String> {
        #[derive(Deserialize)]
        struct MagicLinkResponse {
            url: String,
        }
        Ok(self
            .client
            .get(self.url("/session/magic-link"))
            .send()
            .await
            .map_err(|e| self.wrap_err(e))?
            .json::<MagicLinkResponse>()
            .await
            .map_err(|e| self.wrap_err(e))?
            .url)
    }
}

#[derive(Debug, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub organization_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_encode_matches_known_vector() {
        assert_eq!(base64::encode(b"Hello"), "SGVsbG8=");
    }
}
