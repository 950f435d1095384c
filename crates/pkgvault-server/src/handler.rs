use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json};
use bytes::Bytes;
use pkgvault_storage::{PackageStorageExt, StorageError, StorageResult, StoragePlugin};
use pkgvault_types::{validate_package_name, validate_tarball_name, Manifest};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::{ServerError, ServerResult};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn StoragePlugin>,
}

pub async fn ping() -> Json<Value> {
    Json(json!({}))
}

/// Names in the package index.
pub async fn list_packages(State(state): State<AppState>) -> ServerResult<Json<Vec<String>>> {
    Ok(Json(state.storage.list().await?))
}

pub async fn get_package(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ServerResult<Json<Manifest>> {
    validate_package_name(&name)?;
    let manifest = state.storage.package_storage(&name).read_package().await?;
    Ok(Json(manifest))
}

/// First publish of a package. Fails with 409 if it already exists.
pub async fn create_package(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(manifest): Json<Manifest>,
) -> ServerResult<impl IntoResponse> {
    validate_package_name(&name)?;
    if manifest.name != name {
        return Err(ServerError::BadRequest(format!(
            "manifest name {:?} does not match {name:?}",
            manifest.name
        )));
    }
    state
        .storage
        .package_storage(&name)
        .create_package(&normalize_manifest(manifest)?)
        .await?;
    info!(package = %name, "package published");
    Ok((StatusCode::CREATED, Json(json!({ "ok": "created new package" }))))
}

pub async fn delete_package(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ServerResult<Json<Value>> {
    validate_package_name(&name)?;
    state.storage.package_storage(&name).delete_package().await?;
    info!(package = %name, "package removed");
    Ok(Json(json!({ "ok": "package removed" })))
}

/// Point `tag` at an existing version.
pub async fn set_dist_tag(
    State(state): State<AppState>,
    Path((name, tag)): Path<(String, String)>,
    Json(version): Json<String>,
) -> ServerResult<Json<Value>> {
    validate_package_name(&name)?;
    let saver = state.storage.package_storage(&name);
    state
        .storage
        .package_storage(&name)
        .update_package(
            move |mut manifest| {
                if !manifest.versions.contains_key(&version) {
                    return Err(StorageError::NotFound(format!("version {version} not found")));
                }
                manifest.tag(tag, version);
                Ok(manifest)
            },
            normalize_manifest,
            move |_, manifest| async move { saver.save_package(&manifest).await },
        )
        .await?;
    Ok(Json(json!({ "ok": "dist-tags updated" })))
}

pub async fn delete_dist_tag(
    State(state): State<AppState>,
    Path((name, tag)): Path<(String, String)>,
) -> ServerResult<Json<Value>> {
    validate_package_name(&name)?;
    let saver = state.storage.package_storage(&name);
    state
        .storage
        .package_storage(&name)
        .update_package(
            move |mut manifest| match manifest.dist_tags.remove(&tag) {
                Some(_) => Ok(manifest),
                None => Err(StorageError::NotFound(format!("dist-tag {tag} not found"))),
            },
            normalize_manifest,
            move |_, manifest| async move { saver.save_package(&manifest).await },
        )
        .await?;
    Ok(Json(json!({ "ok": "dist-tags updated" })))
}

pub async fn get_tarball(
    State(state): State<AppState>,
    Path((name, filename)): Path<(String, String)>,
) -> ServerResult<impl IntoResponse> {
    validate_package_name(&name)?;
    validate_tarball_name(&filename)?;
    let mut reader = state
        .storage
        .package_storage(&name)
        .read_tarball(&filename)
        .await?;
    let body = reader.read_to_end().await?;
    debug!(package = %name, file = %filename, bytes = body.len(), "tarball served");
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], body))
}

pub async fn put_tarball(
    State(state): State<AppState>,
    Path((name, filename)): Path<(String, String)>,
    body: Bytes,
) -> ServerResult<impl IntoResponse> {
    validate_package_name(&name)?;
    validate_tarball_name(&filename)?;
    let mut writer = state
        .storage
        .package_storage(&name)
        .write_tarball(&filename)
        .await?;
    writer.write(body).await?;
    writer.done().await?;
    info!(package = %name, file = %filename, bytes = writer.bytes_written(), "tarball stored");
    Ok((StatusCode::CREATED, Json(json!({ "ok": "tarball uploaded" }))))
}

pub async fn delete_tarball(
    State(state): State<AppState>,
    Path((name, filename)): Path<(String, String)>,
) -> ServerResult<Json<Value>> {
    validate_package_name(&name)?;
    validate_tarball_name(&filename)?;
    state
        .storage
        .package_storage(&name)
        .remove_tarball(&filename)
        .await?;
    Ok(Json(json!({ "ok": "tarball removed" })))
}

/// Drop dist-tags that point at versions the manifest no longer has.
pub fn normalize_manifest(mut manifest: Manifest) -> StorageResult<Manifest> {
    let dangling: Vec<String> = manifest
        .dangling_tags()
        .into_iter()
        .map(String::from)
        .collect();
    for tag in dangling {
        manifest.dist_tags.remove(&tag);
    }
    Ok(manifest)
}
