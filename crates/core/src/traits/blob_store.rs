use async_trait::async_trait;

use crate::errors::BrokerResult;

/// 以键寻址的Blob存储，用于stdout/stderr与包文件内容
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// 写入内容并返回新生成的键
    async fn put(&self, content: Vec<u8>) -> BrokerResult<String>;

    async fn get(&self, key: &str) -> BrokerResult<Option<Vec<u8>>>;

    /// 删除不存在的键不是错误
    async fn delete(&self, key: &str) -> BrokerResult<()>;
}
