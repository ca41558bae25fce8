use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::protocol::{PlaylistSettings, SettingsPatch};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

const MEMORY_DATABASE_URL: &str = "sqlite::memory:";

/// Durable home of the plugin settings, keyed by plugin identifier.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load_settings(&self, plugin: &str) -> Result<PlaylistSettings>;
    async fn save_settings(&self, plugin: &str, settings: &PlaylistSettings) -> Result<()>;
    async fn apply_patch(&self, plugin: &str, patch: &SettingsPatch) -> Result<PlaylistSettings>;
}

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
    /// Serialises read-merge-write cycles so patches touching different
    /// fields never overwrite each other.
    patch_lock: Arc<Mutex<()>>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every connection to an in-memory database sees its own empty schema.
        let max_connections = if database_url == MEMORY_DATABASE_URL {
            1
        } else {
            5
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await?;
        let storage = Self {
            pool,
            patch_lock: Arc::new(Mutex::new(())),
        };
        storage.ensure_settings_table().await?;
        Ok(storage)
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    async fn ensure_settings_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS plugin_settings (
                plugin     TEXT PRIMARY KEY NOT NULL,
                body       TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to ensure plugin_settings table exists")?;
        Ok(())
    }

    /// When the settings for `plugin` were last written, if ever.
    pub async fn updated_at(&self, plugin: &str) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query("SELECT updated_at FROM plugin_settings WHERE plugin = ?")
            .bind(plugin)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let raw: String = row.try_get("updated_at")?;
        let parsed = DateTime::parse_from_rfc3339(&raw)
            .with_context(|| format!("invalid updated_at timestamp '{raw}'"))?;
        Ok(Some(parsed.with_timezone(&Utc)))
    }

    async fn read_body(&self, plugin: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT body FROM plugin_settings WHERE plugin = ?")
            .bind(plugin)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to read settings for plugin '{plugin}'"))?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    async fn write_settings(&self, plugin: &str, settings: &PlaylistSettings) -> Result<()> {
        let body = serde_json::to_string(settings).context("failed to encode settings")?;
        self.write_body(plugin, &body).await
    }

    async fn write_body(&self, plugin: &str, body: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO plugin_settings (plugin, body, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(plugin) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
        )
        .bind(plugin)
        .bind(body)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to write settings for plugin '{plugin}'"))?;
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for Storage {
    async fn load_settings(&self, plugin: &str) -> Result<PlaylistSettings> {
        let Some(body) = self.read_body(plugin).await? else {
            debug!(plugin, "no stored settings, using defaults");
            return Ok(PlaylistSettings::default());
        };
        match serde_json::from_str(&body) {
            Ok(settings) => Ok(settings),
            Err(error) => {
                warn!(plugin, %error, "stored settings are corrupt, using defaults");
                Ok(PlaylistSettings::default())
            }
        }
    }

    async fn save_settings(&self, plugin: &str, settings: &PlaylistSettings) -> Result<()> {
        let _guard = self.patch_lock.lock().await;
        self.write_settings(plugin, settings).await
    }

    async fn apply_patch(&self, plugin: &str, patch: &SettingsPatch) -> Result<PlaylistSettings> {
        let _guard = self.patch_lock.lock().await;
        let mut settings = self.load_settings(plugin).await?;
        if patch.is_empty() {
            return Ok(settings);
        }
        patch.apply_to(&mut settings);
        self.write_settings(plugin, &settings).await?;
        Ok(settings)
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == MEMORY_DATABASE_URL || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
