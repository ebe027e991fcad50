use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use broker_core::models::{parse_file_mode, validate_destination, ManifestFile, PackageRef};
use tracing::{debug, info};

use super::{with_retry, BrokerClient};
use crate::error::{WorkerError, WorkerResult};

/// 把任务依赖的包安装到临时目录
pub struct PackageInstaller {
    client: Arc<BrokerClient>,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl PackageInstaller {
    pub fn new(client: Arc<BrokerClient>, retry_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            client,
            retry_attempts,
            retry_delay,
        }
    }

    /// 依次安装所有包，返回安装的文件数
    pub async fn install(&self, packages: &[PackageRef], dir: &Path) -> WorkerResult<usize> {
        let mut installed = 0;
        for package in packages {
            let manifest = with_retry(
                "获取包清单",
                self.retry_attempts,
                self.retry_delay,
                || self.client.package_manifest(&package.name, &package.version),
            )
            .await?;

            for file in &manifest.files {
                self.install_file(file, dir).await?;
                installed += 1;
            }
            info!(
                "包 {}/{} 安装完成，共 {} 个文件",
                package.name,
                package.version,
                manifest.files.len()
            );
        }
        Ok(installed)
    }

    async fn install_file(&self, file: &ManifestFile, dir: &Path) -> WorkerResult<()> {
        validate_destination(&file.destination)
            .map_err(|e| WorkerError::Execution(e.to_string()))?;
        let mode =
            parse_file_mode(&file.file_mode).map_err(|e| WorkerError::Execution(e.to_string()))?;

        let content = with_retry("下载包文件", self.retry_attempts, self.retry_delay, || {
            self.client.download(&file.url)
        })
        .await?;

        let target = dir.join(&file.destination);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, &content).await?;
        set_mode(&target, mode).await?;
        debug!("已安装 {} ({} 字节, 权限 {:o})", file.destination, content.len(), mode);
        Ok(())
    }
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> WorkerResult<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> WorkerResult<()> {
    Ok(())
}
