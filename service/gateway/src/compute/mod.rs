//! Compute Manager (CM): lifecycle of compute instances backed by a single pod each.
//! State is read-through from the container platform client; CM caches nothing beyond
//! the request per spec §5 "Preset and compute caches ... strictly read-through".

use crate::preset;
use error::*;
use k8s::{ContainerPlatform, PodPhase, PodRecord, WorkloadRole};
use kind::Kind;
use log::info;
use result::Result;
use sqlx::PgPool;
use std::collections::BTreeMap;
use std::time::Duration;
use term_colors::*;

#[derive(Debug, Clone, serde::Serialize, Kind)]
pub struct ComputeInfo {
    pub compute_id: String,
    pub preset_id: String,
    pub ready: bool,
    pub phase: String,
    pub pod_ip: Option<String>,
    pub port: i32,
}

impl From<PodRecord> for ComputeInfo {
    fn from(pod: PodRecord) -> Self {
        let ready = matches!(pod.phase, PodPhase::Running) && pod.pod_ip.is_some();
        ComputeInfo {
            compute_id: pod.compute_id.clone(),
            preset_id: pod.preset_id.clone(),
            phase: format!("{:?}", pod.phase),
            pod_ip: pod.pod_ip.clone(),
            port: pod.port,
            ready,
        }
    }
}

#[derive(Default)]
pub struct CreateComputeRequest {
    pub compute_id: Option<String>,
    pub preset_id: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub cpu_override: Option<String>,
    pub memory_override: Option<String>,
}

#[derive(Error, GatewayError, Kind, HttpCode, Debug)]
#[code(Status::NotFound)]
#[error("no compute with id '{compute_id}' was found")]
pub struct NotFound {
    pub compute_id: String,
}

#[derive(Error, GatewayError, Kind, HttpCode, Debug)]
#[code(Status::NotFound)]
#[error("preset '{preset_id}' referenced by this compute does not exist")]
pub struct PresetNotFound {
    pub preset_id: String,
}

/// Generates a URL-safe, 12-character compute id, matching the `[A-Za-z0-9-]`, 6-32 char
/// identity format used in hostnames per spec §6.
fn generate_compute_id() -> String {
    names::uuid().chars().take(12).collect()
}

/// Creates a compute. Idempotent on the `computeId` label: if a live pod already exists
/// under that id, it is returned as-is rather than erroring. If a pod exists but is still
/// terminating, this waits up to 5s and retries the create once, per spec §4.3.
pub async fn create_compute(
    pool: &PgPool,
    platform: &dyn ContainerPlatform,
    req: CreateComputeRequest,
) -> Result<ComputeInfo> {
    let compute_id = req.compute_id.unwrap_or_else(generate_compute_id);
    let preset_id = req
        .preset_id
        .unwrap_or_else(|| preset::DEFAULT_PRESET_ID.to_string());
    let resolved = preset::get_preset(pool, &preset_id)
        .await
        .map_err(|_| -> Box<dyn GatewayError> {
            PresetNotFound {
                preset_id: preset_id.clone(),
            }
            .into()
        })?;

    let spec = k8s::WorkloadSpec {
        compute_id: compute_id.clone(),
        preset_id: preset_id.clone(),
        image: resolved.image.clone(),
        cpu: req.cpu_override.or(resolved.cpu_request.clone()),
        memory: req.memory_override.or(resolved.memory_request.clone()),
        env: vec![],
        role: WorkloadRole::Compute,
    };

    match platform.create_workload(&spec).await {
        Ok(_) => {}
        Err(_) => {
            // The pod may still be terminating from a prior delete of the same id.
            // Give it a moment and retry once, per spec §4.3.
            tokio::time::sleep(Duration::from_secs(5)).await;
            platform.create_workload(&spec).await?;
        }
    }
    info!("compute {} materialized from preset {}", cyan(&compute_id), cyan(&preset_id));

    let pod = platform.get_pod_by_compute_id(&compute_id).await?;
    Ok(match pod {
        Some(record) => record.into(),
        None => ComputeInfo {
            compute_id,
            preset_id,
            ready: false,
            phase: "Pending".to_string(),
            pod_ip: None,
            port: 8080,
        },
    })
}

/// Readiness: a compute is ready when its pod reports Running and carries an IP. This is
/// recomputed from CPC on every call, never cached.
pub async fn get_compute(platform: &dyn ContainerPlatform, compute_id: &str) -> Result<ComputeInfo> {
    platform
        .get_pod_by_compute_id(compute_id)
        .await?
        .map(ComputeInfo::from)
        .ok_or_else(|| {
            NotFound {
                compute_id: compute_id.to_string(),
            }
            .into()
        })
}

pub async fn get_pod(platform: &dyn ContainerPlatform, compute_id: &str) -> Result<PodRecord> {
    platform
        .get_pod_by_compute_id(compute_id)
        .await?
        .ok_or_else(|| {
            NotFound {
                compute_id: compute_id.to_string(),
            }
            .into()
        })
}

pub async fn list_computes(
    platform: &dyn ContainerPlatform,
    preset_id: &str,
) -> Result<Vec<ComputeInfo>> {
    Ok(platform
        .list_pods_by_preset(preset_id)
        .await?
        .into_iter()
        .map(ComputeInfo::from)
        .collect())
}

/// Deletes a compute. Idempotent: deleting an id with no backing pod still returns success.
pub async fn delete_compute(platform: &dyn ContainerPlatform, compute_id: &str) -> Result<()> {
    platform.delete_workload_by_compute_id(compute_id).await?;
    info!("compute {} deleted", cyan(compute_id));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_compute_ids_are_in_range() {
        let id = generate_compute_id();
        assert!(id.len() >= 6 && id.len() <= 32);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
    }

    #[test]
    fn compute_info_is_ready_only_when_running_with_an_ip() {
        let pod = PodRecord {
            compute_id: "c1".to_string(),
            preset_id: "p1".to_string(),
            phase: PodPhase::Running,
            pod_ip: Some("10.0.0.5".to_string()),
            port: 8080,
            role: WorkloadRole::Compute,
            created_at: None,
        };
        assert!(ComputeInfo::from(pod).ready);

        let pending = PodRecord {
            compute_id: "c1".to_string(),
            preset_id: "p1".to_string(),
            phase: PodPhase::Pending,
            pod_ip: None,
            port: 8080,
            role: WorkloadRole::Compute,
            created_at: None,
        };
        assert!(!ComputeInfo::from(pending).ready);
    }

    #[tokio::test]
    async fn list_computes_reflects_creates_and_deletes_against_the_fake_platform() {
        let platform = k8s::platform::fake::FakePlatform::default();
        platform
            .create_workload(&k8s::WorkloadSpec {
                compute_id: "c1".to_string(),
                preset_id: "web-server".to_string(),
                image: "registry.example.com/compute/web:latest".to_string(),
                cpu: None,
                memory: None,
                env: vec![],
                role: WorkloadRole::Compute,
            })
            .await
            .unwrap();

        let listed = list_computes(&platform, "web-server").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].compute_id, "c1");

        delete_compute(&platform, "c1").await.unwrap();
        let listed = list_computes(&platform, "web-server").await.unwrap();
        assert!(listed.is_empty());
    }

    /// Regression for the bug where `list_computes` (via `list_pods_by_preset`) surfaced a
    /// preset's own baseline workload alongside real computes materialized from it.
    #[tokio::test]
    async fn list_computes_does_not_surface_the_preset_baseline_workload() {
        let platform = k8s::platform::fake::FakePlatform::default();
        platform
            .create_workload(&k8s::WorkloadSpec {
                compute_id: "preset-web-server".to_string(),
                preset_id: "web-server".to_string(),
                image: "registry.example.com/compute/web:latest".to_string(),
                cpu: None,
                memory: None,
                env: vec![],
                role: WorkloadRole::PresetBaseline,
            })
            .await
            .unwrap();
        platform
            .create_workload(&k8s::WorkloadSpec {
                compute_id: "c1".to_string(),
                preset_id: "web-server".to_string(),
                image: "registry.example.com/compute/web:latest".to_string(),
                cpu: None,
                memory: None,
                env: vec![],
                role: WorkloadRole::Compute,
            })
            .await
            .unwrap();

        let listed = list_computes(&platform, "web-server").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].compute_id, "c1");
    }
}
