use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{BrokerError, BrokerResult};

/// 版本化的文件包，以 `(name, version)` 标识，创建后不可变
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Package {
    pub id: i64,
    pub name: String,
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub files: Vec<PackageFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackageFile {
    /// 相对安装路径
    pub destination: String,
    /// 八进制权限位，例如 "755"
    pub file_mode: String,
    pub source: PackageFileSource,
}

/// 文件内容来源：上传到Blob存储，或安装时直接下载的外部URL
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PackageFileSource {
    Blob { key: String },
    Url { url: String },
}

impl PackageFile {
    pub fn blob_key(&self) -> Option<&str> {
        match &self.source {
            PackageFileSource::Blob { key } => Some(key),
            PackageFileSource::Url { .. } => None,
        }
    }
}

/// 创建包时上传的文件
#[derive(Debug, Clone)]
pub struct NewPackageFile {
    pub destination: String,
    pub file_mode: String,
    pub content: Vec<u8>,
}

/// 创建包时引用的外部URL文件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UrlPackageFile {
    pub destination: String,
    pub file_mode: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct NewPackage {
    pub name: String,
    pub version: String,
    pub files: Vec<NewPackageFile>,
    pub url_files: Vec<UrlPackageFile>,
}

impl NewPackage {
    pub fn validate(&self) -> BrokerResult<()> {
        if self.name.trim().is_empty() || self.version.trim().is_empty() {
            return Err(BrokerError::validation_error("包名称和版本不能为空"));
        }
        let mut destinations = std::collections::HashSet::new();
        let all = self
            .files
            .iter()
            .map(|f| (&f.destination, &f.file_mode))
            .chain(self.url_files.iter().map(|f| (&f.destination, &f.file_mode)));
        for (destination, mode) in all {
            validate_destination(destination)?;
            parse_file_mode(mode)?;
            if !destinations.insert(destination.as_str()) {
                return Err(BrokerError::validation_error(format!(
                    "重复的安装路径: {destination}"
                )));
            }
        }
        for url_file in &self.url_files {
            if !(url_file.url.starts_with("http://") || url_file.url.starts_with("https://")) {
                return Err(BrokerError::validation_error(format!(
                    "无效的文件URL: {}",
                    url_file.url
                )));
            }
        }
        Ok(())
    }
}

/// 下发给Worker的包清单，每个文件都解析为可直接下载的URL
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackageManifest {
    pub name: String,
    pub version: String,
    pub files: Vec<ManifestFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManifestFile {
    pub destination: String,
    pub file_mode: String,
    pub url: String,
}

/// 解析八进制权限字符串
pub fn parse_file_mode(mode: &str) -> BrokerResult<u32> {
    if mode.is_empty() || mode.len() > 4 {
        return Err(BrokerError::validation_error(format!("无效的文件权限: {mode}")));
    }
    u32::from_str_radix(mode, 8)
        .map_err(|_| BrokerError::validation_error(format!("无效的文件权限: {mode}")))
}

/// 安装路径必须是相对路径且不能逃逸出安装目录
pub fn validate_destination(destination: &str) -> BrokerResult<()> {
    let path = std::path::Path::new(destination);
    if destination.is_empty() || path.is_absolute() {
        return Err(BrokerError::validation_error(format!(
            "安装路径必须是相对路径: {destination}"
        )));
    }
    if path
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(BrokerError::validation_error(format!(
            "安装路径不能包含 '..': {destination}"
        )));
    }
    Ok(())
}
