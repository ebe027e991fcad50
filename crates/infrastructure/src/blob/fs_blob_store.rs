use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use broker_core::{traits::BlobStore, BrokerError, BrokerResult};
use tracing::{debug, instrument};
use uuid::Uuid;

/// 以目录为后端的Blob存储，每个Blob一个文件，键为随机UUID
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub async fn new(root: impl AsRef<Path>) -> BrokerResult<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| BrokerError::BlobStore(format!("创建Blob目录失败 {}: {e}", root.display())))?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> BrokerResult<PathBuf> {
        let valid = !key.is_empty()
            && key.len() <= 64
            && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !valid {
            return Err(BrokerError::validation_error(format!("无效的Blob键: {key}")));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    #[instrument(skip(self, content), fields(size = content.len()))]
    async fn put(&self, content: Vec<u8>) -> BrokerResult<String> {
        let key = Uuid::new_v4().simple().to_string();
        let path = self.path_for(&key)?;
        let staging = self.root.join(format!(".{key}.tmp"));

        tokio::fs::write(&staging, &content)
            .await
            .map_err(|e| BrokerError::BlobStore(format!("写入Blob失败: {e}")))?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|e| BrokerError::BlobStore(format!("提交Blob失败: {e}")))?;

        debug!("Blob已写入: {} ({} 字节)", key, content.len());
        Ok(key)
    }

    async fn get(&self, key: &str) -> BrokerResult<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BrokerError::BlobStore(format!("读取Blob {key} 失败: {e}"))),
        }
    }

    async fn delete(&self, key: &str) -> BrokerResult<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BrokerError::BlobStore(format!("删除Blob {key} 失败: {e}"))),
        }
    }
}
