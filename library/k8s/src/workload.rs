use error::*;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus};
use k8s_openapi::api::core::v1::{
    ContainerState, ContainerStateTerminated, ContainerStateWaiting, Pod, PodStatus,
};
use result::Result;
use serde_json;

/// The label applied to every [Deployment] and [Pod] this crate creates, carrying the
/// compute ID that [crate::get_pod_by_compute_id] and [crate::delete_workload_by_compute_id]
/// key off of.
pub const COMPUTE_ID_LABEL: &str = "gateway.computeId";
/// The label carrying the preset ID a workload was materialized from.
pub const PRESET_ID_LABEL: &str = "gateway.presetId";
/// Distinguishes a preset's own self-materialized baseline workload from a real compute, so
/// [crate::list_pods_by_preset] can scan by `PRESET_ID_LABEL` without surfacing the baseline
/// as if it were a compute referencing the preset.
pub const ROLE_LABEL: &str = "gateway.role";

/// What a materialized workload represents: an end user's compute, or a preset's own
/// baseline workload kept around to validate/warm the preset's image ahead of real use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadRole {
    Compute,
    PresetBaseline,
}

impl WorkloadRole {
    pub(crate) fn label_value(self) -> &'static str {
        match self {
            WorkloadRole::Compute => "compute",
            WorkloadRole::PresetBaseline => "preset-baseline",
        }
    }

    fn from_label_value(value: &str) -> Self {
        match value {
            "preset-baseline" => WorkloadRole::PresetBaseline,
            _ => WorkloadRole::Compute,
        }
    }
}

#[derive(GatewayError, Error, Kind, HttpCode, Debug)]
#[error(
    "Failed to serialize a workload manifest for compute '{compute_id}' with image \
    reference '{reference}'. This should be reported, since it may indicate a malformed \
    preset definition."
)]
#[code(Status::InternalServerError)]
pub struct WorkloadSerializationError {
    compute_id: String,
    reference: String,
    #[source]
    source: serde_json::Error,
}

/// A fully resolved request to materialize a workload on the container platform. A
/// [WorkloadSpec] is produced by combining a preset's baseline container image and
/// resource requirements with a specific compute's identity.
pub struct WorkloadSpec {
    pub compute_id: String,
    pub preset_id: String,
    pub image: String,
    pub cpu: Option<String>,
    pub memory: Option<String>,
    pub env: Vec<(String, String)>,
    pub role: WorkloadRole,
}

/// Renders a [WorkloadSpec] into a single-replica [Deployment] manifest. The deployment's
/// name is derived from the compute ID, sanitized through [names::rfc1123_subdomain].
pub fn new(spec: &WorkloadSpec) -> Result<Deployment> {
    let name = names::rfc1123_subdomain(&spec.compute_id);
    let env: Vec<serde_json::Value> = spec
        .env
        .iter()
        .map(|(k, v)| serde_json::json!({"name": k, "value": v}))
        .collect();
    let resources = serde_json::json!({
        "requests": {
            "cpu": spec.cpu.clone().unwrap_or_else(|| "250m".to_string()),
            "memory": spec.memory.clone().unwrap_or_else(|| "256Mi".to_string()),
        }
    });
    let deployment: Deployment = serde_json::from_value(serde_json::json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {
            "name": name,
            "namespace": super::COMPUTE_NAMESPACE,
            "labels": {
                COMPUTE_ID_LABEL: spec.compute_id,
                PRESET_ID_LABEL: spec.preset_id,
                ROLE_LABEL: spec.role.label_value(),
            }
        },
        "spec": {
            "replicas": 1,
            "selector": {
                "matchLabels": { COMPUTE_ID_LABEL: spec.compute_id }
            },
            "template": {
                "metadata": {
                    "labels": {
                        COMPUTE_ID_LABEL: spec.compute_id,
                        PRESET_ID_LABEL: spec.preset_id,
                        ROLE_LABEL: spec.role.label_value(),
                    }
                },
                "spec": {
                    "containers": [
                        {
                            "name": name,
                            "image": spec.image,
                            "env": env,
                            "imagePullPolicy": "IfNotPresent",
                            "resources": resources,
                            "ports": [
                                { "containerPort": 8080, "protocol": "TCP" }
                            ]
                        }
                    ]
                }
            }
        }
    }))
    .map_err(|source| WorkloadSerializationError {
        compute_id: spec.compute_id.clone(),
        reference: spec.image.clone(),
        source,
    })?;
    Ok(deployment)
}

/// A point-in-time readiness snapshot of the pod backing a compute, returned by the routing
/// core when it needs an address to proxy against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Crashed,
    Terminated,
}

/// A resolved record of the single pod backing a compute, as read through the container
/// platform client.
#[derive(Debug, Clone)]
pub struct PodRecord {
    pub compute_id: String,
    pub preset_id: String,
    pub phase: PodPhase,
    pub pod_ip: Option<String>,
    pub port: i32,
    pub role: WorkloadRole,
    /// `None` only for records synthesized without a backing Kubernetes object (e.g. a test
    /// double that never set one); real pods always carry a creation timestamp.
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl PodRecord {
    /// Returns the address the routing core should dial, if the pod is ready to receive
    /// traffic.
    pub fn address(&self) -> Option<String> {
        match (&self.phase, &self.pod_ip) {
            (PodPhase::Running, Some(ip)) => Some(format!("{}:{}", ip, self.port)),
            _ => None,
        }
    }
}

/// PodExt answers common readiness questions about a pod returned directly from the
/// Kubernetes API, independent of the [PodRecord] projection above.
pub trait PodExt {
    fn compute_id(&self) -> Option<String>;
    fn preset_id(&self) -> Option<String>;
    fn role(&self) -> WorkloadRole;
    fn pod_ip(&self) -> Option<String>;
    fn port(&self) -> Result<i32>;
    fn running(&self) -> bool;
    fn crashed(&self) -> bool;
    fn terminated(&self) -> bool;
    fn terminated_reason(&self) -> Option<String>;
    fn terminated_message(&self) -> Option<String>;
    fn was_err_image_pull(&self) -> bool;
    fn err_image_pull(&self) -> Result<()>;
    fn phase(&self) -> PodPhase;
    fn created_at(&self) -> Option<chrono::DateTime<chrono::Utc>>;
}

impl PodExt for Pod {
    fn compute_id(&self) -> Option<String> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(COMPUTE_ID_LABEL))
            .cloned()
    }

    fn preset_id(&self) -> Option<String> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(PRESET_ID_LABEL))
            .cloned()
    }

    fn role(&self) -> WorkloadRole {
        self.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(ROLE_LABEL))
            .map(|value| WorkloadRole::from_label_value(value))
            .unwrap_or(WorkloadRole::Compute)
    }

    fn created_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.metadata.creation_timestamp.as_ref().map(|t| t.0)
    }

    fn pod_ip(&self) -> Option<String> {
        self.status.as_ref().and_then(|s| s.pod_ip.clone())
    }

    fn port(&self) -> Result<i32> {
        Ok(self
            .spec
            .as_ref()
            .ok_or_else(|| PodHasNoSpec {
                op: "retrieving its listening port number".to_string(),
            })?
            .containers
            .get(0)
            .as_ref()
            .ok_or_else(|| PodHasNoContainers {
                op: "retrieving its listening port number".to_string(),
            })?
            .ports
            .as_ref()
            .ok_or_else(|| ContainerHasNoPorts {
                op: "retrieving its listening port number".to_string(),
            })?
            .get(0)
            .as_ref()
            .ok_or_else(|| ContainerHasNoPorts {
                op: "retrieving its listening port number".to_string(),
            })?
            .container_port)
    }

    fn running(&self) -> bool {
        let default_state = ContainerState::default();
        let default_status = PodStatus::default();
        let default_statuses = vec![];
        self.status
            .as_ref()
            .unwrap_or(&default_status)
            .container_statuses
            .as_ref()
            .unwrap_or(&default_statuses)
            .iter()
            .any(|status| {
                let state = status.state.as_ref().unwrap_or(&default_state);
                state.running.is_some()
            })
    }

    fn terminated(&self) -> bool {
        let default_state = ContainerState::default();
        let default_status = PodStatus::default();
        let default_statuses = vec![];
        self.status
            .as_ref()
            .unwrap_or(&default_status)
            .container_statuses
            .as_ref()
            .unwrap_or(&default_statuses)
            .iter()
            .any(|status| {
                let state = status.state.as_ref().unwrap_or(&default_state);
                state.terminated.is_some()
            })
    }

    fn was_err_image_pull(&self) -> bool {
        let default_state = ContainerState::default();
        let default_status = PodStatus::default();
        let default_statuses = vec![];
        let status = self
            .status
            .as_ref()
            .unwrap_or(&default_status)
            .container_statuses
            .as_ref()
            .unwrap_or(&default_statuses)
            .iter()
            .find(|status| {
                let state = status.state.as_ref().unwrap_or(&default_state);
                matches!(
                    state.waiting.as_ref(),
                    Some(ContainerStateWaiting { reason: Some(reason), .. }) if reason == "ErrImagePull"
                )
            });
        status.is_some()
    }

    fn err_image_pull(&self) -> Result<()> {
        let default_state = ContainerState::default();
        let default_status = PodStatus::default();
        let default_statuses = vec![];
        let status = self
            .status
            .as_ref()
            .unwrap_or(&default_status)
            .container_statuses
            .as_ref()
            .unwrap_or(&default_statuses)
            .iter()
            .find(|status| {
                let state = status.state.as_ref().unwrap_or(&default_state);
                matches!(
                    state.waiting.as_ref(),
                    Some(ContainerStateWaiting { reason: Some(reason), .. }) if reason == "ErrImagePull"
                )
            });
        if let Some(problem) = status {
            Err(ErrImagePull {
                message: ErrImagePullCause {
                    message: problem
                        .state
                        .as_ref()
                        .unwrap()
                        .waiting
                        .as_ref()
                        .unwrap()
                        .message
                        .as_ref()
                        .unwrap()
                        .into(),
                },
            }
            .into())
        } else {
            Ok(())
        }
    }

    fn crashed(&self) -> bool {
        let default_state = ContainerState::default();
        let default_status = PodStatus::default();
        let default_statuses = vec![];
        let status = self
            .status
            .as_ref()
            .unwrap_or(&default_status)
            .container_statuses
            .as_ref()
            .unwrap_or(&default_statuses)
            .iter()
            .find(|status| {
                let state = status.state.as_ref().unwrap_or(&default_state);
                matches!(
                    state.waiting.as_ref(),
                    Some(ContainerStateWaiting { reason: Some(reason), .. }) if reason == "CrashLoopBackOff"
                )
            });
        status.is_some()
    }

    fn terminated_reason(&self) -> Option<String> {
        let default_state = ContainerState::default();
        let default_status = PodStatus::default();
        let default_statuses = vec![];
        self.status
            .as_ref()
            .unwrap_or(&default_status)
            .container_statuses
            .as_ref()
            .unwrap_or(&default_statuses)
            .iter()
            .find_map(|status| {
                let state = status.state.as_ref().unwrap_or(&default_state);
                match state {
                    ContainerState {
                        terminated:
                            Some(ContainerStateTerminated {
                                reason: Some(reason),
                                ..
                            }),
                        ..
                    } => Some(reason.clone()),
                    _ => None,
                }
            })
    }

    fn terminated_message(&self) -> Option<String> {
        let default_state = ContainerState::default();
        let default_status = PodStatus::default();
        let default_statuses = vec![];
        self.status
            .as_ref()
            .unwrap_or(&default_status)
            .container_statuses
            .as_ref()
            .unwrap_or(&default_statuses)
            .iter()
            .find_map(|status| {
                let state = status.state.as_ref().unwrap_or(&default_state);
                match state {
                    ContainerState {
                        terminated:
                            Some(ContainerStateTerminated {
                                message: Some(message),
                                ..
                            }),
                        ..
                    } => Some(message.clone()),
                    _ => None,
                }
            })
    }

    fn phase(&self) -> PodPhase {
        if self.crashed() {
            PodPhase::Crashed
        } else if self.terminated() {
            PodPhase::Terminated
        } else if self.running() {
            PodPhase::Running
        } else {
            PodPhase::Pending
        }
    }
}

/// Projects a raw [Pod] into the [PodRecord] the rest of the gateway operates on. Returns
/// `None` if the pod carries no compute ID label, which should never happen for pods this
/// crate created.
pub fn to_record(pod: &Pod) -> Option<PodRecord> {
    let compute_id = pod.compute_id()?;
    let preset_id = pod.preset_id().unwrap_or_default();
    let port = pod.port().unwrap_or(8080);
    Some(PodRecord {
        compute_id,
        preset_id,
        phase: pod.phase(),
        pod_ip: pod.pod_ip(),
        port,
        role: pod.role(),
        created_at: pod.created_at(),
    })
}

/// Reduces a [DeploymentStatus] to a coarse readiness phase, used while a pod has not yet
/// appeared for a freshly created deployment.
pub fn deployment_phase(status: Option<&DeploymentStatus>) -> PodPhase {
    match status {
        Some(status) if status.ready_replicas.unwrap_or(0) > 0 => PodPhase::Running,
        _ => PodPhase::Pending,
    }
}

#[derive(Error, GatewayError, HttpCode, Kind, Debug)]
#[error(
    "The image for the compute's workload failed to get pulled from the configured image \
registry. Perhaps the image doesn't exist or the connection to the registry couldn't be \
established?"
)]
#[code(error::Status::NotFound)]
struct ErrImagePull {
    #[source]
    message: ErrImagePullCause,
}

#[derive(Error, GatewayError, HttpCode, Kind, Debug)]
#[error("{message}")]
#[code(error::Status::NotFound)]
struct ErrImagePullCause {
    message: String,
}

#[derive(Error, GatewayError, HttpCode, Kind, Debug)]
#[code(error::Status::InternalServerError)]
#[error(
    "An attempt was made to retrieve the spec of a pod object while {op}, however the \
object had no spec associated with it. This was likely a premature call to a pod object \
that had not yet been provisioned in Kubernetes."
)]
struct PodHasNoSpec {
    op: String,
}

#[derive(Error, GatewayError, HttpCode, Kind, Debug)]
#[code(error::Status::InternalServerError)]
#[error(
"An attempt was made to retrieve at least one container associated with a pod object while \
{op}, however the object had no containers associated with it. This was likely a premature call to a \
pod object that had not yet been provisioned in Kubernetes."
)]
struct PodHasNoContainers {
    op: String,
}

#[derive(Error, GatewayError, HttpCode, Kind, Debug)]
#[code(error::Status::InternalServerError)]
#[error(
"An attempt was made to retrieve at least one listening port associated with a container object while \
{op}, however the object had no listening ports associated with it. This was likely a premature call to a \
pod object that had not yet been provisioned in Kubernetes."
)]
struct ContainerHasNoPorts {
    op: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> WorkloadSpec {
        WorkloadSpec {
            compute_id: "c-0001".to_string(),
            preset_id: "p-default".to_string(),
            image: "registry.example.com/runtime:latest".to_string(),
            cpu: None,
            memory: None,
            env: vec![("PORT".to_string(), "8080".to_string())],
            role: WorkloadRole::Compute,
        }
    }

    #[test]
    fn renders_a_single_replica_deployment() {
        let deployment = new(&spec()).unwrap();
        assert_eq!(deployment.spec.unwrap().replicas, Some(1));
    }

    #[test]
    fn sanitizes_names_that_are_not_rfc1123_compliant() {
        let mut s = spec();
        s.compute_id = "Not A Valid Name!!".to_string();
        new(&s).unwrap();
    }

    #[test]
    fn role_label_distinguishes_computes_from_preset_baselines() {
        let mut s = spec();
        s.role = WorkloadRole::PresetBaseline;
        let deployment = new(&s).unwrap();
        let labels = deployment.metadata.labels.unwrap();
        assert_eq!(labels.get(ROLE_LABEL).map(String::as_str), Some("preset-baseline"));

        let deployment = new(&spec()).unwrap();
        let labels = deployment.metadata.labels.unwrap();
        assert_eq!(labels.get(ROLE_LABEL).map(String::as_str), Some("compute"));
    }
}
