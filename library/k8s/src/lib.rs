pub mod client;
pub mod errors;
pub mod platform;
pub mod workload;

pub use platform::{ContainerPlatform, K8sPlatform};
pub use workload::{PodExt, PodPhase, PodRecord, WorkloadRole, WorkloadSpec};

use errors::{ApiError, UpstreamUnavailable};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::Api;
use result::Result;
use std::future::Future;
use std::time::Duration;

/// The namespace every compute workload is deployed into.
pub const COMPUTE_NAMESPACE: &str = "compute";

/// Runs `op` with the backoff parameters the routing and compute layers use whenever they
/// talk to the container platform: an initial interval of 200ms, a 5 second cap, and at
/// most 5 attempts with full jitter between them.
///
/// [kube::Error::Api] responses are treated as non-transient (they indicate the cluster
/// rejected the request outright, retrying won't help) and are returned immediately.
/// Everything else is retried until the budget above is exhausted, at which point an
/// [UpstreamUnavailable] is returned instead of the raw [kube::Error].
async fn with_backoff<F, Fut, T>(op: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = std::result::Result<T, kube::Error>>,
{
    use backoff::{future::retry, ExponentialBackoff};
    let backoff = ExponentialBackoff {
        initial_interval: Duration::from_millis(200),
        max_interval: Duration::from_secs(5),
        max_elapsed_time: None,
        ..ExponentialBackoff::default()
    };
    let mut attempts = 0u32;
    retry(backoff, || {
        attempts += 1;
        let fut = op();
        async move {
            fut.await.map_err(|err| match err {
                kube::Error::Api(_) => backoff::Error::Permanent(err),
                _ if attempts >= 5 => backoff::Error::Permanent(err),
                _ => backoff::Error::Transient(err),
            })
        }
    })
    .await
    .map_err(|err| -> Box<dyn error::GatewayError> {
        match err {
            kube::Error::Api(_) => ApiError::from(err).into(),
            _ => UpstreamUnavailable { source: err }.into(),
        }
    })
}

/// Materializes a workload for the given spec. If a deployment already exists bearing the
/// same compute ID label, that existing deployment is returned instead of erroring, making
/// this operation idempotent under retry.
pub async fn create_workload(spec: &WorkloadSpec) -> Result<Deployment> {
    if let Some(existing) = find_deployment_by_compute_id(&spec.compute_id).await? {
        return Ok(existing);
    }
    let deployment = workload::new(spec)?;
    let client: Api<Deployment> = client::new().await;
    with_backoff(|| {
        let client = client.clone();
        let deployment = deployment.clone();
        async move { client.create(&PostParams::default(), &deployment).await }
    })
    .await
}

async fn find_deployment_by_compute_id(compute_id: &str) -> Result<Option<Deployment>> {
    let client: Api<Deployment> = client::new().await;
    let list_params = ListParams::default().labels(&format!(
        "{}={}",
        workload::COMPUTE_ID_LABEL,
        compute_id
    ));
    let mut found = with_backoff(|| {
        let client = client.clone();
        let list_params = list_params.clone();
        async move { client.list(&list_params).await }
    })
    .await?;
    Ok(found.items.pop())
}

/// Returns the pod record backing a compute, if one has been scheduled yet. `None` is
/// returned both when no pod exists and when the pod exists but has not yet been assigned
/// an IP, since from the caller's perspective neither is routable.
pub async fn get_pod_by_compute_id(compute_id: &str) -> Result<Option<PodRecord>> {
    let client: Api<Pod> = client::new().await;
    let list_params =
        ListParams::default().labels(&format!("{}={}", workload::COMPUTE_ID_LABEL, compute_id));
    let mut found = with_backoff(|| {
        let client = client.clone();
        let list_params = list_params.clone();
        async move { client.list(&list_params).await }
    })
    .await?;
    Ok(found.items.pop().and_then(|pod| workload::to_record(&pod)))
}

/// Lists the pod records for every *compute* materialized from a given preset, ordered by
/// creation time. Excludes the preset's own baseline workload (see
/// `workload::WorkloadRole::PresetBaseline`), which carries the same `PRESET_ID_LABEL` but
/// does not represent a compute referencing the preset.
pub async fn list_pods_by_preset(preset_id: &str) -> Result<Vec<PodRecord>> {
    let client: Api<Pod> = client::new().await;
    let list_params = ListParams::default().labels(&format!(
        "{}={},{}={}",
        workload::PRESET_ID_LABEL,
        preset_id,
        workload::ROLE_LABEL,
        WorkloadRole::Compute.label_value()
    ));
    let found = with_backoff(|| {
        let client = client.clone();
        let list_params = list_params.clone();
        async move { client.list(&list_params).await }
    })
    .await?;
    let mut records: Vec<PodRecord> = found.items.iter().filter_map(workload::to_record).collect();
    records.sort_by_key(|record| record.created_at);
    Ok(records)
}

/// Tears down the deployment backing a compute. Deleting a compute ID that has no backing
/// deployment is not an error, since the compute lifecycle manager may call this more than
/// once while reconciling garbage collection.
pub async fn delete_workload_by_compute_id(compute_id: &str) -> Result<()> {
    let deployment = match find_deployment_by_compute_id(compute_id).await? {
        Some(deployment) => deployment,
        None => return Ok(()),
    };
    let name = deployment
        .metadata
        .name
        .clone()
        .unwrap_or_else(|| compute_id.to_string());
    let client: Api<Deployment> = client::new().await;
    with_backoff(|| {
        let client = client.clone();
        let name = name.clone();
        async move {
            match client.delete(&name, &DeleteParams::default()).await {
                Ok(_) => Ok(()),
                Err(kube::Error::Api(response)) if response.code == 404 => Ok(()),
                Err(err) => Err(err),
            }
        }
    })
    .await
}
