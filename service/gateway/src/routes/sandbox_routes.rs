use crate::compute::{self, ComputeInfo, CreateComputeRequest};
use k8s::ContainerPlatform;
use kind::Kind;
use response::Response;
use result::Result;
use rocket::serde::json::Json;
use rocket::{delete, get, post, State};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Deserialize, Default)]
pub struct CreateSandboxRequest {
    pub compute_id: Option<String>,
    pub preset_id: Option<String>,
    pub cpu: Option<String>,
    pub memory: Option<String>,
}

impl From<CreateSandboxRequest> for CreateComputeRequest {
    fn from(req: CreateSandboxRequest) -> Self {
        CreateComputeRequest {
            compute_id: req.compute_id,
            preset_id: req.preset_id,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            cpu_override: req.cpu,
            memory_override: req.memory,
        }
    }
}

/// `POST /v1/sandboxes`.
#[post("/v1/sandboxes", data = "<body>")]
pub async fn create_sandbox(
    pool: &State<PgPool>,
    platform: &State<Arc<dyn ContainerPlatform>>,
    body: Json<CreateSandboxRequest>,
) -> Result<Response<ComputeInfo>> {
    let created =
        compute::create_compute(pool, platform.as_ref().as_ref(), body.into_inner().into())
            .await?;
    Ok(created.into())
}

/// `GET /v1/sandboxes/:id`.
#[get("/v1/sandboxes/<id>")]
pub async fn get_sandbox(
    platform: &State<Arc<dyn ContainerPlatform>>,
    id: String,
) -> Result<Response<ComputeInfo>> {
    Ok(compute::get_compute(platform.as_ref().as_ref(), &id).await?.into())
}

#[derive(Serialize, Kind)]
pub struct SandboxDeleted {
    pub compute_id: String,
}

/// `DELETE /v1/sandboxes/:id`.
#[delete("/v1/sandboxes/<id>")]
pub async fn delete_sandbox(
    platform: &State<Arc<dyn ContainerPlatform>>,
    id: String,
) -> Result<Response<SandboxDeleted>> {
    compute::delete_compute(platform.as_ref().as_ref(), &id).await?;
    Ok(SandboxDeleted { compute_id: id }.into())
}

#[derive(Deserialize)]
pub struct FindOrCreateRequest {
    pub compute_id: String,
    pub preset_id: Option<String>,
}

/// `POST /v1/sandboxes/find-or-create`: returns the existing compute if present, otherwise
/// creates it under the requested id.
#[post("/v1/sandboxes/find-or-create", data = "<body>")]
pub async fn find_or_create_sandbox(
    pool: &State<PgPool>,
    platform: &State<Arc<dyn ContainerPlatform>>,
    body: Json<FindOrCreateRequest>,
) -> Result<Response<ComputeInfo>> {
    let body = body.into_inner();
    match compute::get_compute(platform.as_ref().as_ref(), &body.compute_id).await {
        Ok(info) => Ok(info.into()),
        Err(_) => {
            let created = compute::create_compute(
                pool,
                platform.as_ref().as_ref(),
                CreateComputeRequest {
                    compute_id: Some(body.compute_id),
                    preset_id: body.preset_id,
                    labels: BTreeMap::new(),
                    annotations: BTreeMap::new(),
                    cpu_override: None,
                    memory_override: None,
                },
            )
            .await?;
            Ok(created.into())
        }
    }
}

#[derive(Deserialize)]
pub struct FindSandboxRequest {
    pub compute_id: String,
}

/// `POST /v1/sandboxes/find`.
#[post("/v1/sandboxes/find", data = "<body>")]
pub async fn find_sandbox(
    platform: &State<Arc<dyn ContainerPlatform>>,
    body: Json<FindSandboxRequest>,
) -> Result<Response<ComputeInfo>> {
    Ok(compute::get_compute(platform.as_ref().as_ref(), &body.compute_id)
        .await?
        .into())
}

#[derive(Serialize, Kind)]
pub struct SandboxExtended {
    pub compute_id: String,
}

/// `POST /v1/sandboxes/:id/extend`. CM tracks no per-compute TTL of its own (auto-teardown
/// is driven entirely by the WP connection count); extending only confirms the compute is
/// still live, since there is no separate clock to reset.
#[post("/v1/sandboxes/<id>/extend")]
pub async fn extend_sandbox(
    platform: &State<Arc<dyn ContainerPlatform>>,
    id: String,
) -> Result<Response<SandboxExtended>> {
    compute::get_compute(platform.as_ref().as_ref(), &id).await?;
    Ok(SandboxExtended { compute_id: id }.into())
}
