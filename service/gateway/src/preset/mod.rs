//! Preset Manager (PM): CRUD over preset records, plus materialization of a preset's
//! baseline workload on first use and the default-preset bootstrap at process start.

use chrono::{DateTime, Utc};
use error::*;
use k8s::{ContainerPlatform, WorkloadRole, WorkloadSpec};
use kind::Kind;
use result::Result;
use serde::{Deserialize, Serialize};
use log::{debug, info};
use sqlx::PgPool;
use std::collections::BTreeMap;
use term_colors::*;

/// The fixed default preset id substituted whenever a compute create omits `presetId`.
pub const DEFAULT_PRESET_ID: &str = "default-development";

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, Kind)]
pub struct Preset {
    pub preset_id: String,
    pub name: String,
    pub description: Option<String>,
    pub version: i32,
    pub image: String,
    pub env: serde_json::Value,
    pub cpu_request: Option<String>,
    pub memory_request: Option<String>,
    pub cpu_limit: Option<String>,
    pub memory_limit: Option<String>,
    pub base_replicas: i32,
    pub labels: serde_json::Value,
    pub annotations: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Preset {
    pub fn deployment_name(&self) -> String {
        format!("preset-{}", self.preset_id)
    }

    fn env_pairs(&self) -> Vec<(String, String)> {
        match self.env.as_object() {
            Some(map) => map
                .iter()
                .map(|(k, v)| (k.clone(), v.as_str().unwrap_or_default().to_string()))
                .collect(),
            None => vec![],
        }
    }
}

pub struct PresetSpec {
    pub preset_id: String,
    pub name: String,
    pub description: Option<String>,
    pub image: String,
    pub env: BTreeMap<String, String>,
    pub cpu_request: Option<String>,
    pub memory_request: Option<String>,
    pub cpu_limit: Option<String>,
    pub memory_limit: Option<String>,
    pub base_replicas: Option<i32>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

#[derive(Error, GatewayError, Kind, HttpCode, Debug)]
#[code(Status::Conflict)]
#[error("a preset with id '{preset_id}' already exists")]
pub struct AlreadyExists {
    pub preset_id: String,
}

#[derive(Error, GatewayError, Kind, HttpCode, Debug)]
#[code(Status::NotFound)]
#[error("no preset with id '{preset_id}' was found")]
pub struct NotFound {
    pub preset_id: String,
}

#[derive(Error, GatewayError, Kind, HttpCode, Debug)]
#[code(Status::Conflict)]
#[error("preset '{preset_id}' is still referenced by at least one compute and cannot be deleted")]
pub struct InUse {
    pub preset_id: String,
}

#[derive(Error, GatewayError, Kind, HttpCode, Debug)]
#[code(Status::InternalServerError)]
#[error("the preset store rejected the request")]
pub struct StoreError {
    #[source]
    pub source: sqlx::Error,
}

impl From<sqlx::Error> for StoreError {
    fn from(source: sqlx::Error) -> Self {
        StoreError { source }
    }
}

/// The built-in presets materialized by [initialize_defaults] on every process start,
/// configured here rather than hard-coded per spec §9's open question on the default set.
pub fn builtin_presets() -> Vec<PresetSpec> {
    vec![
        PresetSpec {
            preset_id: "default-development".to_string(),
            name: "Default Development".to_string(),
            description: Some("General-purpose development runtime".to_string()),
            image: "registry.example.com/compute/runtime:latest".to_string(),
            env: BTreeMap::new(),
            cpu_request: Some("250m".to_string()),
            memory_request: Some("256Mi".to_string()),
            cpu_limit: None,
            memory_limit: None,
            base_replicas: Some(1),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        },
        PresetSpec {
            preset_id: "default-staging".to_string(),
            name: "Default Staging".to_string(),
            description: None,
            image: "registry.example.com/compute/runtime:latest".to_string(),
            env: BTreeMap::new(),
            cpu_request: Some("500m".to_string()),
            memory_request: Some("512Mi".to_string()),
            cpu_limit: None,
            memory_limit: None,
            base_replicas: Some(1),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        },
        PresetSpec {
            preset_id: "default-production".to_string(),
            name: "Default Production".to_string(),
            description: None,
            image: "registry.example.com/compute/runtime:latest".to_string(),
            env: BTreeMap::new(),
            cpu_request: Some("1".to_string()),
            memory_request: Some("1Gi".to_string()),
            cpu_limit: Some("2".to_string()),
            memory_limit: Some("2Gi".to_string()),
            base_replicas: Some(1),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        },
        PresetSpec {
            preset_id: "web-server".to_string(),
            name: "Web Server".to_string(),
            description: None,
            image: "registry.example.com/compute/web:latest".to_string(),
            env: BTreeMap::new(),
            cpu_request: Some("250m".to_string()),
            memory_request: Some("256Mi".to_string()),
            cpu_limit: None,
            memory_limit: None,
            base_replicas: Some(1),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        },
        PresetSpec {
            preset_id: "database".to_string(),
            name: "Database".to_string(),
            description: None,
            image: "registry.example.com/compute/database:latest".to_string(),
            env: BTreeMap::new(),
            cpu_request: Some("500m".to_string()),
            memory_request: Some("1Gi".to_string()),
            cpu_limit: None,
            memory_limit: None,
            base_replicas: Some(1),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        },
        PresetSpec {
            preset_id: "python-only".to_string(),
            name: "Python Only".to_string(),
            description: None,
            image: "registry.example.com/compute/python:latest".to_string(),
            env: BTreeMap::new(),
            cpu_request: Some("250m".to_string()),
            memory_request: Some("256Mi".to_string()),
            cpu_limit: None,
            memory_limit: None,
            base_replicas: Some(1),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        },
        PresetSpec {
            preset_id: "node-only".to_string(),
            name: "Node Only".to_string(),
            description: None,
            image: "registry.example.com/compute/node:latest".to_string(),
            env: BTreeMap::new(),
            cpu_request: Some("250m".to_string()),
            memory_request: Some("256Mi".to_string()),
            cpu_limit: None,
            memory_limit: None,
            base_replicas: Some(1),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        },
    ]
}

/// Creates any member of [builtin_presets] that is missing from the store. Idempotent:
/// running twice produces no additional presets, and an existing preset is never mutated.
pub async fn initialize_defaults(pool: &PgPool, platform: &dyn ContainerPlatform) -> Result<()> {
    for spec in builtin_presets() {
        match get_preset(pool, &spec.preset_id).await {
            Ok(_) => continue,
            Err(_) => {
                info!("materializing missing default preset {}", cyan(&spec.preset_id));
                match create_preset(pool, platform, spec).await {
                    Ok(_) => {}
                    Err(err) => {
                        // A concurrent process start may have won the race; treat conflicts as
                        // success since the end state (preset exists) is what we asked for.
                        debug!("default preset bootstrap raced another initializer: {:?}", err);
                    }
                }
            }
        }
    }
    Ok(())
}

pub async fn create_preset(
    pool: &PgPool,
    platform: &dyn ContainerPlatform,
    spec: PresetSpec,
) -> Result<Preset> {
    if get_preset(pool, &spec.preset_id).await.is_ok() {
        return Err(AlreadyExists {
            preset_id: spec.preset_id,
        }
        .into());
    }
    let env = serde_json::to_value(&spec.env).unwrap_or_default();
    let labels = serde_json::to_value(&spec.labels).unwrap_or_default();
    let annotations = serde_json::to_value(&spec.annotations).unwrap_or_default();
    let row: Preset = sqlx::query_as(
        r#"
        INSERT INTO presets
            (preset_id, name, description, version, image, env,
             cpu_request, memory_request, cpu_limit, memory_limit,
             base_replicas, labels, annotations, created_at, updated_at)
        VALUES ($1, $2, $3, 1, $4, $5, $6, $7, $8, $9, $10, $11, $12, now(), now())
        RETURNING preset_id, name, description, version, image, env,
                  cpu_request, memory_request, cpu_limit, memory_limit,
                  base_replicas, labels, annotations, created_at, updated_at
        "#,
    )
    .bind(&spec.preset_id)
    .bind(&spec.name)
    .bind(&spec.description)
    .bind(&spec.image)
    .bind(&env)
    .bind(&spec.cpu_request)
    .bind(&spec.memory_request)
    .bind(&spec.cpu_limit)
    .bind(&spec.memory_limit)
    .bind(spec.base_replicas.unwrap_or(1))
    .bind(&labels)
    .bind(&annotations)
    .fetch_one(pool)
    .await
    .map_err(StoreError::from)?;

    // Tagged as a baseline, not a compute, so list_pods_by_preset (and therefore
    // delete_preset's in-use check and compute::list_computes) never mistakes this for a
    // live compute referencing the preset.
    let workload = WorkloadSpec {
        compute_id: row.deployment_name(),
        preset_id: row.preset_id.clone(),
        image: row.image.clone(),
        cpu: row.cpu_request.clone(),
        memory: row.memory_request.clone(),
        env: row.env_pairs(),
        role: WorkloadRole::PresetBaseline,
    };
    platform.create_workload(&workload).await?;
    Ok(row)
}

pub async fn get_preset(pool: &PgPool, preset_id: &str) -> Result<Preset> {
    sqlx::query_as(
        r#"SELECT preset_id, name, description, version, image, env,
                  cpu_request, memory_request, cpu_limit, memory_limit,
                  base_replicas, labels, annotations, created_at, updated_at
           FROM presets WHERE preset_id = $1"#,
    )
    .bind(preset_id)
    .fetch_optional(pool)
    .await
    .map_err(StoreError::from)?
    .ok_or_else(|| {
        NotFound {
            preset_id: preset_id.to_string(),
        }
        .into()
    })
}

pub struct ListFilters {
    pub name: Option<String>,
    pub version: Option<i32>,
}

pub async fn list_presets(pool: &PgPool, filters: ListFilters) -> Result<Vec<Preset>> {
    let rows: Vec<Preset> = sqlx::query_as(
        r#"SELECT preset_id, name, description, version, image, env,
                  cpu_request, memory_request, cpu_limit, memory_limit,
                  base_replicas, labels, annotations, created_at, updated_at
           FROM presets
           WHERE ($1::text IS NULL OR name = $1)
             AND ($2::int IS NULL OR version = $2)
           ORDER BY created_at"#,
    )
    .bind(&filters.name)
    .bind(&filters.version)
    .fetch_all(pool)
    .await
    .map_err(StoreError::from)?;
    Ok(rows)
}

/// Deletes a preset. Fails with [InUse] when any compute still references it.
pub async fn delete_preset(
    pool: &PgPool,
    platform: &dyn ContainerPlatform,
    preset_id: &str,
) -> Result<()> {
    get_preset(pool, preset_id).await?;
    let live = platform.list_pods_by_preset(preset_id).await?;
    if !live.is_empty() {
        return Err(InUse {
            preset_id: preset_id.to_string(),
        }
        .into());
    }
    sqlx::query("DELETE FROM presets WHERE preset_id = $1")
        .bind(preset_id)
        .execute(pool)
        .await
        .map_err(StoreError::from)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_presets_includes_the_default_development_preset() {
        let presets = builtin_presets();
        assert!(presets.iter().any(|p| p.preset_id == DEFAULT_PRESET_ID));
    }

    #[test]
    fn deployment_name_is_prefixed_with_preset() {
        let preset = Preset {
            preset_id: "abc".to_string(),
            name: "".to_string(),
            description: None,
            version: 1,
            image: "".to_string(),
            env: serde_json::json!({}),
            cpu_request: None,
            memory_request: None,
            cpu_limit: None,
            memory_limit: None,
            base_replicas: 1,
            labels: serde_json::json!({}),
            annotations: serde_json::json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(preset.deployment_name(), "preset-abc");
    }
}
