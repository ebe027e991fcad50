use std::sync::Arc;

use broker_core::{
    models::{
        ManifestFile, NewPackage, Package, PackageFile, PackageFileSource, PackageManifest,
    },
    traits::{BlobStore, BrokerMetric, MetricsSink, PackageRepository},
    BrokerError, BrokerResult,
};
use tracing::{info, instrument, warn};

/// 包注册表
///
/// 包以 `(name, version)` 标识且创建后不可变。文件内容先写入Blob存储，
/// 元数据提交失败时清理已写入的Blob。
pub struct PackageRegistry {
    packages: Arc<dyn PackageRepository>,
    blobs: Arc<dyn BlobStore>,
    metrics: Arc<dyn MetricsSink>,
    public_url: String,
}

impl PackageRegistry {
    pub fn new(
        packages: Arc<dyn PackageRepository>,
        blobs: Arc<dyn BlobStore>,
        metrics: Arc<dyn MetricsSink>,
        public_url: impl Into<String>,
    ) -> Self {
        Self {
            packages,
            blobs,
            metrics,
            public_url: public_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Blob在清单中的下载地址
    pub fn blob_url(&self, key: &str) -> String {
        format!("{}/blobs/{}", self.public_url, key)
    }

    async fn discard_blobs(&self, keys: &[String]) {
        for key in keys {
            if let Err(e) = self.blobs.delete(key).await {
                warn!("清理Blob {} 失败: {}", key, e);
            }
        }
    }

    #[instrument(skip(self, package), fields(name = %package.name, version = %package.version))]
    pub async fn create(&self, package: NewPackage) -> BrokerResult<Package> {
        package.validate()?;

        // 提前拒绝明显的重复，避免无谓的上传；最终以仓储的唯一约束为准
        if self.packages.get(&package.name, &package.version).await?.is_some() {
            return Err(BrokerError::duplicate_package(&package.name, &package.version));
        }

        let NewPackage {
            name,
            version,
            files,
            url_files,
        } = package;

        let mut uploaded = Vec::with_capacity(files.len());
        let mut records = Vec::with_capacity(files.len() + url_files.len());
        for file in files {
            let key = match self.blobs.put(file.content).await {
                Ok(key) => key,
                Err(e) => {
                    self.discard_blobs(&uploaded).await;
                    return Err(e);
                }
            };
            uploaded.push(key.clone());
            records.push(PackageFile {
                destination: file.destination,
                file_mode: file.file_mode,
                source: PackageFileSource::Blob { key },
            });
        }
        records.extend(url_files.into_iter().map(|file| PackageFile {
            destination: file.destination,
            file_mode: file.file_mode,
            source: PackageFileSource::Url { url: file.url },
        }));

        let created = match self.packages.create(&name, &version, &records).await {
            Ok(created) => created,
            Err(e) => {
                self.discard_blobs(&uploaded).await;
                return Err(e);
            }
        };

        self.metrics.record(BrokerMetric::PackageCreated);
        info!("已创建包 {}/{}，共 {} 个文件", name, version, created.files.len());
        Ok(created)
    }

    pub async fn get(&self, name: &str, version: &str) -> BrokerResult<Package> {
        self.packages
            .get(name, version)
            .await?
            .ok_or_else(|| BrokerError::package_not_found(name, version))
    }

    /// 下发给Worker的清单
    pub async fn manifest(&self, name: &str, version: &str) -> BrokerResult<PackageManifest> {
        let package = self.get(name, version).await?;
        let files = package
            .files
            .into_iter()
            .map(|file| {
                let url = match file.source {
                    PackageFileSource::Blob { key } => self.blob_url(&key),
                    PackageFileSource::Url { url } => url,
                };
                ManifestFile {
                    destination: file.destination,
                    file_mode: file.file_mode,
                    url,
                }
            })
            .collect();
        Ok(PackageManifest {
            name: package.name,
            version: package.version,
            files,
        })
    }

    /// 先删除元数据，再尽力清理Blob
    #[instrument(skip(self))]
    pub async fn delete(&self, name: &str, version: &str) -> BrokerResult<()> {
        let package = self
            .packages
            .delete(name, version)
            .await?
            .ok_or_else(|| BrokerError::package_not_found(name, version))?;

        let keys: Vec<String> = package
            .files
            .iter()
            .filter_map(|file| file.blob_key().map(str::to_string))
            .collect();
        self.discard_blobs(&keys).await;

        self.metrics.record(BrokerMetric::PackageDeleted);
        info!("已删除包 {}/{}", name, version);
        Ok(())
    }

    pub async fn list_versions(&self, name: &str) -> BrokerResult<Vec<String>> {
        self.packages.list_versions(name).await
    }

    /// 读取Blob内容，供清单中的下载地址使用
    pub async fn blob(&self, key: &str) -> BrokerResult<Vec<u8>> {
        self.blobs
            .get(key)
            .await?
            .ok_or_else(|| BrokerError::BlobNotFound {
                key: key.to_string(),
            })
    }
}
