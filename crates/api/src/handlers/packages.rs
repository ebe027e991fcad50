use std::collections::HashMap;

use axum::{
    extract::{Multipart, Path, State},
    http::header,
    response::IntoResponse,
};
use broker_core::models::{NewPackage, NewPackageFile, UrlPackageFile};
use serde::Deserialize;

use crate::{
    error::{ApiError, ApiResult},
    response::{created, success, ApiResponse},
    routes::AppState,
};

/// 创建包时 `manifest` 字段的内容
#[derive(Debug, Deserialize)]
pub struct CreatePackageManifest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub files: Vec<ManifestEntry>,
    #[serde(default)]
    pub url_files: Vec<UrlPackageFile>,
}

#[derive(Debug, Deserialize)]
pub struct ManifestEntry {
    pub destination: String,
    pub file_mode: String,
}

/// 创建包
///
/// multipart字段：`manifest` 为JSON清单，其余每个字段以安装路径命名，内容为文件本身。
pub async fn create_package(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let mut manifest: Option<CreatePackageManifest> = None;
    let mut contents: HashMap<String, Vec<u8>> = HashMap::new();

    while let Some(field) = multipart.next_field().await? {
        let name = field
            .name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::bad_request("multipart字段缺少名称"))?;
        let bytes = field.bytes().await?;
        if name == "manifest" {
            manifest = Some(serde_json::from_slice(&bytes).map_err(|e| {
                ApiError::bad_request(format!("manifest字段不是有效的JSON: {e}"))
            })?);
        } else {
            contents.insert(name, bytes.to_vec());
        }
    }

    let manifest = manifest.ok_or_else(|| ApiError::bad_request("缺少manifest字段"))?;
    let files = manifest
        .files
        .into_iter()
        .map(|entry| {
            let content = contents.remove(&entry.destination).ok_or_else(|| {
                ApiError::bad_request(format!("缺少文件内容: {}", entry.destination))
            })?;
            Ok(NewPackageFile {
                destination: entry.destination,
                file_mode: entry.file_mode,
                content,
            })
        })
        .collect::<ApiResult<Vec<_>>>()?;

    let package = state
        .broker
        .packages
        .create(NewPackage {
            name: manifest.name,
            version: manifest.version,
            files,
            url_files: manifest.url_files,
        })
        .await?;
    Ok(created(package))
}

/// 获取包清单，每个文件都带可直接下载的URL
pub async fn get_package(
    State(state): State<AppState>,
    Path((name, version)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let manifest = state.broker.packages.manifest(&name, &version).await?;
    Ok(success(manifest))
}

pub async fn delete_package(
    State(state): State<AppState>,
    Path((name, version)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    state.broker.packages.delete(&name, &version).await?;
    Ok(ApiResponse::success_empty_with_message(format!(
        "包 {name}/{version} 已删除"
    )))
}

pub async fn list_package_versions(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let versions = state.broker.packages.list_versions(&name).await?;
    Ok(success(versions))
}

pub async fn get_blob(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let content = state.broker.packages.blob(&key).await?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], content))
}
