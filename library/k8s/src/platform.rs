//! The seam CM and PM talk through, so their tests can run against an in-memory double
//! instead of a live cluster. The free functions in [crate] remain the concrete
//! implementation backing [K8sPlatform] below, mirroring the teacher's pattern of swapping
//! the live `kube::Api` for a typed stand-in at the module boundary.

use crate::{PodRecord, WorkloadRole, WorkloadSpec};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use result::Result;

#[async_trait]
pub trait ContainerPlatform: Send + Sync {
    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<Deployment>;
    async fn get_pod_by_compute_id(&self, compute_id: &str) -> Result<Option<PodRecord>>;
    async fn list_pods_by_preset(&self, preset_id: &str) -> Result<Vec<PodRecord>>;
    async fn delete_workload_by_compute_id(&self, compute_id: &str) -> Result<()>;
}

/// The live implementation, delegating to the module-level functions that talk to the
/// real cluster through `kube`.
pub struct K8sPlatform;

#[async_trait]
impl ContainerPlatform for K8sPlatform {
    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<Deployment> {
        crate::create_workload(spec).await
    }

    async fn get_pod_by_compute_id(&self, compute_id: &str) -> Result<Option<PodRecord>> {
        crate::get_pod_by_compute_id(compute_id).await
    }

    async fn list_pods_by_preset(&self, preset_id: &str) -> Result<Vec<PodRecord>> {
        crate::list_pods_by_preset(preset_id).await
    }

    async fn delete_workload_by_compute_id(&self, compute_id: &str) -> Result<()> {
        crate::delete_workload_by_compute_id(compute_id).await
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use super::*;
    use crate::PodPhase;
    use std::collections::HashMap;
    use tokio::sync::RwLock;

    /// An in-memory [ContainerPlatform] double: workloads are materialized immediately as
    /// `Running` pods carrying a deterministic fake IP, with no real scheduling delay.
    #[derive(Default)]
    pub struct FakePlatform {
        pods: RwLock<HashMap<String, PodRecord>>,
    }

    #[async_trait]
    impl ContainerPlatform for FakePlatform {
        async fn create_workload(&self, spec: &WorkloadSpec) -> Result<Deployment> {
            let mut pods = self.pods.write().await;
            pods.entry(spec.compute_id.clone()).or_insert_with(|| PodRecord {
                compute_id: spec.compute_id.clone(),
                preset_id: spec.preset_id.clone(),
                phase: PodPhase::Running,
                pod_ip: Some(format!("10.42.{}.1", pods.len() as u8 + 1)),
                port: 8080,
                role: spec.role,
                created_at: Some(chrono::Utc::now()),
            });
            Ok(crate::workload::new(spec)?)
        }

        async fn get_pod_by_compute_id(&self, compute_id: &str) -> Result<Option<PodRecord>> {
            Ok(self.pods.read().await.get(compute_id).cloned())
        }

        async fn list_pods_by_preset(&self, preset_id: &str) -> Result<Vec<PodRecord>> {
            let mut records: Vec<PodRecord> = self
                .pods
                .read()
                .await
                .values()
                .filter(|pod| pod.preset_id == preset_id && pod.role == WorkloadRole::Compute)
                .cloned()
                .collect();
            records.sort_by_key(|record| record.created_at);
            Ok(records)
        }

        async fn delete_workload_by_compute_id(&self, compute_id: &str) -> Result<()> {
            self.pods.write().await.remove(compute_id);
            Ok(())
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let platform = FakePlatform::default();
        let spec = WorkloadSpec {
            compute_id: "c1".to_string(),
            preset_id: "p1".to_string(),
            image: "registry.example.com/compute/runtime:latest".to_string(),
            cpu: None,
            memory: None,
            env: vec![],
            role: WorkloadRole::Compute,
        };
        platform.create_workload(&spec).await.unwrap();
        let pod = platform.get_pod_by_compute_id("c1").await.unwrap();
        assert!(pod.is_some());
        assert_eq!(pod.unwrap().preset_id, "p1");
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let platform = FakePlatform::default();
        platform.delete_workload_by_compute_id("missing").await.unwrap();
        platform.delete_workload_by_compute_id("missing").await.unwrap();
    }

    /// A preset's own baseline workload carries the same `preset_id` as real computes
    /// materialized from it, but must never be surfaced by `list_pods_by_preset` — that
    /// list backs both `compute::list_computes` and `preset::delete_preset`'s in-use check,
    /// and a baseline artifact isn't a compute referencing the preset.
    #[tokio::test]
    async fn list_pods_by_preset_excludes_the_preset_baseline_workload() {
        let platform = FakePlatform::default();
        platform
            .create_workload(&WorkloadSpec {
                compute_id: "baseline-p1".to_string(),
                preset_id: "p1".to_string(),
                image: "registry.example.com/compute/runtime:latest".to_string(),
                cpu: None,
                memory: None,
                env: vec![],
                role: WorkloadRole::PresetBaseline,
            })
            .await
            .unwrap();
        platform
            .create_workload(&WorkloadSpec {
                compute_id: "real-compute".to_string(),
                preset_id: "p1".to_string(),
                image: "registry.example.com/compute/runtime:latest".to_string(),
                cpu: None,
                memory: None,
                env: vec![],
                role: WorkloadRole::Compute,
            })
            .await
            .unwrap();

        let pods = platform.list_pods_by_preset("p1").await.unwrap();
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].compute_id, "real-compute");
    }

    #[tokio::test]
    async fn list_pods_by_preset_orders_by_creation_time() {
        let platform = FakePlatform::default();
        for id in ["first", "second", "third"] {
            platform
                .create_workload(&WorkloadSpec {
                    compute_id: id.to_string(),
                    preset_id: "p1".to_string(),
                    image: "registry.example.com/compute/runtime:latest".to_string(),
                    cpu: None,
                    memory: None,
                    env: vec![],
                    role: WorkloadRole::Compute,
                })
                .await
                .unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let pods = platform.list_pods_by_preset("p1").await.unwrap();
        let ids: Vec<&str> = pods.iter().map(|p| p.compute_id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }
}
