use crate::preset::{self, Preset};
use k8s::ContainerPlatform;
use kind::Kind;
use response::Response;
use result::Result;
use rocket::serde::json::Json;
use rocket::{delete, get, post, State};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Serialize, Kind)]
pub struct PresetList {
    pub presets: Vec<Preset>,
}

/// `GET /presets`, optionally filtered by `name`/`version`.
#[get("/presets?<name>&<version>")]
pub async fn list_presets(
    pool: &State<PgPool>,
    name: Option<String>,
    version: Option<i32>,
) -> Result<Response<PresetList>> {
    let presets = preset::list_presets(pool, preset::ListFilters { name, version }).await?;
    Ok(PresetList { presets }.into())
}

#[derive(Deserialize)]
pub struct CreatePresetRequest {
    pub preset_id: String,
    pub name: String,
    pub description: Option<String>,
    pub image: String,
    pub env: std::collections::BTreeMap<String, String>,
    pub cpu_request: Option<String>,
    pub memory_request: Option<String>,
    pub cpu_limit: Option<String>,
    pub memory_limit: Option<String>,
    pub base_replicas: Option<i32>,
}

/// `POST /presets`.
#[post("/presets", data = "<body>")]
pub async fn create_preset(
    pool: &State<PgPool>,
    platform: &State<Arc<dyn ContainerPlatform>>,
    body: Json<CreatePresetRequest>,
) -> Result<Response<Preset>> {
    let body = body.into_inner();
    let created = preset::create_preset(
        pool,
        platform.as_ref().as_ref(),
        preset::PresetSpec {
            preset_id: body.preset_id,
            name: body.name,
            description: body.description,
            image: body.image,
            env: body.env,
            cpu_request: body.cpu_request,
            memory_request: body.memory_request,
            cpu_limit: body.cpu_limit,
            memory_limit: body.memory_limit,
            base_replicas: body.base_replicas,
            labels: std::collections::BTreeMap::new(),
            annotations: std::collections::BTreeMap::new(),
        },
    )
    .await?;
    Ok(created.into())
}

#[derive(Serialize, Kind)]
pub struct PresetDeleted {
    pub preset_id: String,
}

/// `DELETE /presets/:id`.
#[delete("/presets/<id>")]
pub async fn delete_preset(
    pool: &State<PgPool>,
    platform: &State<Arc<dyn ContainerPlatform>>,
    id: String,
) -> Result<Response<PresetDeleted>> {
    preset::delete_preset(pool, platform.as_ref().as_ref(), &id).await?;
    Ok(PresetDeleted { preset_id: id }.into())
}
