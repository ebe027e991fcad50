use async_trait::async_trait;
use broker_core::{
    models::{Package, PackageFile, PackageFileSource},
    traits::PackageRepository,
    BrokerError, BrokerResult,
};
use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row, Sqlite, SqlitePool, Transaction};
use tracing::{debug, instrument};

use crate::{
    database::mapping::MappingHelpers,
    error_handling::{RepositoryErrorHelpers, RepositoryOperation},
};

pub struct SqlitePackageRepository {
    pool: SqlitePool,
}

impl SqlitePackageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_file(row: &SqliteRow) -> BrokerResult<PackageFile> {
        let blob_key: Option<String> = row.try_get("blob_key")?;
        let url: Option<String> = row.try_get("url")?;
        let source = match (blob_key, url) {
            (Some(key), _) => PackageFileSource::Blob { key },
            (None, Some(url)) => PackageFileSource::Url { url },
            (None, None) => {
                return Err(BrokerError::Serialization(
                    "包文件既没有blob_key也没有url".to_string(),
                ))
            }
        };

        Ok(PackageFile {
            destination: row.try_get("destination")?,
            file_mode: row.try_get("file_mode")?,
            source,
        })
    }

    async fn load(
        tx: &mut Transaction<'_, Sqlite>,
        name: &str,
        version: &str,
    ) -> BrokerResult<Option<Package>> {
        let Some(row) =
            sqlx::query("SELECT id, name, version, created_at FROM packages WHERE name = ? AND version = ?")
                .bind(name)
                .bind(version)
                .fetch_optional(&mut **tx)
                .await?
        else {
            return Ok(None);
        };

        let id: i64 = row.try_get("id")?;
        let files = sqlx::query(
            r#"
            SELECT destination, file_mode, blob_key, url FROM package_files
            WHERE package_id = ? ORDER BY position
            "#,
        )
        .bind(id)
        .fetch_all(&mut **tx)
        .await?
        .iter()
        .map(Self::row_to_file)
        .collect::<BrokerResult<Vec<_>>>()?;

        Ok(Some(Package {
            id,
            name: row.try_get("name")?,
            version: row.try_get("version")?,
            created_at: MappingHelpers::time(&row, "created_at")?,
            files,
        }))
    }
}

#[async_trait]
impl PackageRepository for SqlitePackageRepository {
    #[instrument(skip(self, files), fields(package = %name, version = %version, files = files.len()))]
    async fn create(
        &self,
        name: &str,
        version: &str,
        files: &[PackageFile],
    ) -> BrokerResult<Package> {
        let created_at = MappingHelpers::now_millis();
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query("INSERT INTO packages (name, version, created_at) VALUES (?, ?, ?)")
            .bind(name)
            .bind(version)
            .bind(MappingHelpers::to_millis(created_at))
            .execute(&mut *tx)
            .await;

        let package_id = match inserted {
            Ok(result) => result.last_insert_rowid(),
            Err(e) if RepositoryErrorHelpers::is_unique_violation(&e) => {
                return Err(BrokerError::duplicate_package(name, version));
            }
            Err(e) => {
                return Err(RepositoryErrorHelpers::database_error(
                    RepositoryOperation::Create,
                    format!("包 {name}.{version}"),
                    e,
                ))
            }
        };

        for (position, file) in files.iter().enumerate() {
            let (blob_key, url) = match &file.source {
                PackageFileSource::Blob { key } => (Some(key.as_str()), None),
                PackageFileSource::Url { url } => (None, Some(url.as_str())),
            };
            sqlx::query(
                r#"
                INSERT INTO package_files (package_id, position, destination, file_mode, blob_key, url)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(package_id)
            .bind(position as i64)
            .bind(&file.destination)
            .bind(&file.file_mode)
            .bind(blob_key)
            .bind(url)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("创建包成功: {}.{} ({} 个文件)", name, version, files.len());

        Ok(Package {
            id: package_id,
            name: name.to_string(),
            version: version.to_string(),
            created_at,
            files: files.to_vec(),
        })
    }

    #[instrument(skip(self), fields(package = %name, version = %version))]
    async fn get(&self, name: &str, version: &str) -> BrokerResult<Option<Package>> {
        let mut tx = self.pool.begin().await?;
        let package = Self::load(&mut tx, name, version).await?;
        tx.commit().await?;
        Ok(package)
    }

    #[instrument(skip(self), fields(package = %name, version = %version))]
    async fn delete(&self, name: &str, version: &str) -> BrokerResult<Option<Package>> {
        let mut tx = self.pool.begin().await?;

        // 先加写锁，避免读到随后被并发删除的包
        sqlx::query("UPDATE packages SET created_at = created_at WHERE name = ? AND version = ?")
            .bind(name)
            .bind(version)
            .execute(&mut *tx)
            .await?;

        let Some(package) = Self::load(&mut tx, name, version).await? else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query("DELETE FROM packages WHERE id = ?")
            .bind(package.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                RepositoryErrorHelpers::database_error(
                    RepositoryOperation::Delete,
                    format!("包 {name}.{version}"),
                    e,
                )
            })?;

        tx.commit().await?;
        Ok(Some(package))
    }

    #[instrument(skip(self), fields(package = %name))]
    async fn list_versions(&self, name: &str) -> BrokerResult<Vec<String>> {
        let versions =
            sqlx::query_scalar("SELECT version FROM packages WHERE name = ? ORDER BY created_at, id")
                .bind(name)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| {
                    RepositoryErrorHelpers::database_error(
                        RepositoryOperation::Query,
                        format!("包 {name} 的版本"),
                        e,
                    )
                })?;

        Ok(versions)
    }
}
