//! SQLite行与领域模型之间的转换工具
//!
//! 时间统一以Unix毫秒整数存储，保证按列排序与比较的结果和时间顺序一致。

use broker_core::{BrokerError, BrokerResult};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

pub struct MappingHelpers;

impl MappingHelpers {
    pub fn to_millis(time: DateTime<Utc>) -> i64 {
        time.timestamp_millis()
    }

    pub fn from_millis(millis: i64) -> BrokerResult<DateTime<Utc>> {
        DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| BrokerError::Serialization(format!("无效的时间戳: {millis}")))
    }

    /// 截断到毫秒，与落库后的精度一致
    pub fn now_millis() -> DateTime<Utc> {
        let now = Utc::now();
        DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
    }

    pub fn time(row: &SqliteRow, column: &str) -> BrokerResult<DateTime<Utc>> {
        Self::from_millis(row.try_get(column)?)
    }

    pub fn optional_time(row: &SqliteRow, column: &str) -> BrokerResult<Option<DateTime<Utc>>> {
        row.try_get::<Option<i64>, _>(column)?
            .map(Self::from_millis)
            .transpose()
    }

    pub fn json<T: DeserializeOwned>(row: &SqliteRow, column: &str) -> BrokerResult<T> {
        let raw: String = row.try_get(column)?;
        serde_json::from_str(&raw)
            .map_err(|e| BrokerError::Serialization(format!("解析字段 {column} 失败: {e}")))
    }

    pub fn parsed<T>(row: &SqliteRow, column: &str) -> BrokerResult<T>
    where
        T: std::str::FromStr<Err = BrokerError>,
    {
        let raw: String = row.try_get(column)?;
        raw.parse()
    }

    pub fn optional_parsed<T>(row: &SqliteRow, column: &str) -> BrokerResult<Option<T>>
    where
        T: std::str::FromStr<Err = BrokerError>,
    {
        row.try_get::<Option<String>, _>(column)?
            .map(|raw| raw.parse())
            .transpose()
    }
}
