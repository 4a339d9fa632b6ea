use serde::Serialize;
use sqlx::SqlitePool;

use crate::error::{QueueError, Result};

const KEY_MAX_RETRIES: &str = "max_retries";
const KEY_BACKOFF_BASE: &str = "backoff_base";

/// Snapshot of the tunables the retry engine reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Settings {
    pub max_retries: i32,
    pub backoff_base: i64,
}

impl Settings {
    pub const DEFAULT_MAX_RETRIES: i32 = 3;
    pub const DEFAULT_BACKOFF_BASE: i64 = 2;
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_retries: Self::DEFAULT_MAX_RETRIES,
            backoff_base: Self::DEFAULT_BACKOFF_BASE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
    MaxRetries,
    BackoffBase,
}

impl SettingKey {
    /// Accepts both `max-retries` and `max_retries`.
    pub fn parse(key: &str) -> Result<Self> {
        match key.trim().replace('-', "_").as_str() {
            KEY_MAX_RETRIES => Ok(SettingKey::MaxRetries),
            KEY_BACKOFF_BASE => Ok(SettingKey::BackoffBase),
            other => Err(QueueError::InvalidArgument(format!(
                "unknown configuration key '{other}' (valid keys: max-retries, backoff-base)"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SettingKey::MaxRetries => KEY_MAX_RETRIES,
            SettingKey::BackoffBase => KEY_BACKOFF_BASE,
        }
    }
}

#[derive(Clone)]
pub struct SettingsRepo {
    pool: SqlitePool,
}

impl SettingsRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn get_raw(&self, key: SettingKey) -> Result<Option<String>> {
        let values = sqlx::query_scalar::<_, String>("SELECT value FROM config WHERE key = ?1")
            .bind(key.as_str())
            .fetch_all(&self.pool)
            .await?;
        Ok(values.into_iter().next())
    }

    async fn set_raw(&self, key: SettingKey, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO config (key, value)
            VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key.as_str())
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // Unparseable stored values fall back to the defaults.

    pub async fn max_retries(&self) -> Result<i32> {
        Ok(self
            .get_raw(SettingKey::MaxRetries)
            .await?
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(Settings::DEFAULT_MAX_RETRIES))
    }

    pub async fn backoff_base(&self) -> Result<i64> {
        Ok(self
            .get_raw(SettingKey::BackoffBase)
            .await?
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(Settings::DEFAULT_BACKOFF_BASE))
    }

    pub async fn snapshot(&self) -> Result<Settings> {
        Ok(Settings {
            max_retries: self.max_retries().await?,
            backoff_base: self.backoff_base().await?,
        })
    }

    pub async fn get(&self, key: SettingKey) -> Result<i64> {
        match key {
            SettingKey::MaxRetries => self.max_retries().await.map(i64::from),
            SettingKey::BackoffBase => self.backoff_base().await,
        }
    }

    /// Validates and stores a setting given as text, returning the parsed value.
    pub async fn set(&self, key: SettingKey, value: &str) -> Result<i64> {
        let parsed: i64 = value.trim().parse().map_err(|_| {
            QueueError::InvalidArgument(format!(
                "invalid value for {}: '{value}' is not an integer",
                key.as_str()
            ))
        })?;

        match key {
            SettingKey::MaxRetries => {
                let n = i32::try_from(parsed).map_err(|_| {
                    QueueError::InvalidArgument(format!("max_retries out of range: {parsed}"))
                })?;
                self.set_max_retries(n).await?;
            }
            SettingKey::BackoffBase => self.set_backoff_base(parsed).await?,
        }
        Ok(parsed)
    }

    pub async fn set_max_retries(&self, value: i32) -> Result<()> {
        if value < 1 {
            return Err(QueueError::InvalidArgument(format!(
                "max_retries must be at least 1, got {value}"
            )));
        }
        self.set_raw(SettingKey::MaxRetries, &value.to_string()).await
    }

    pub async fn set_backoff_base(&self, value: i64) -> Result<()> {
        if value < 1 {
            return Err(QueueError::InvalidArgument(format!(
                "backoff_base must be at least 1, got {value}"
            )));
        }
        self.set_raw(SettingKey::BackoffBase, &value.to_string()).await
    }
}
