use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::Deserialize;

const CONFIG_FILE: &str = "server.toml";

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub server_bind: String,
    pub database_url: String,
    /// Key clients must send in `X-Api-Key` on mutating routes.
    pub api_key: String,
    /// Base url of the printer's REST API. Without one the printer is
    /// treated as offline.
    pub printer_url: Option<String>,
    pub printer_api_key: String,
    pub schedule_tick_seconds: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:5000".into(),
            database_url: "sqlite://./data/playlist.db".into(),
            api_key: "devkey".into(),
            printer_url: None,
            printer_api_key: String::new(),
            schedule_tick_seconds: 30,
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(CONFIG_FILE) {
        apply_file(&mut settings, &raw);
    }

    if let Ok(v) = std::env::var("PLAYLIST_BIND") {
        settings.server_bind = v;
    }
    if let Ok(v) = std::env::var("APP__BIND_ADDR") {
        settings.server_bind = v;
    }

    if let Ok(v) = std::env::var("DATABASE_URL") {
        settings.database_url = v;
    }
    if let Ok(v) = std::env::var("APP__DATABASE_URL") {
        settings.database_url = v;
    }

    if let Ok(v) = std::env::var("PLAYLIST_API_KEY") {
        settings.api_key = v;
    }

    if let Ok(v) = std::env::var("PRINTER_URL") {
        settings.printer_url = Some(v);
    }
    if let Ok(v) = std::env::var("PRINTER_API_KEY") {
        settings.printer_api_key = v;
    }

    if let Ok(v) = std::env::var("APP__SCHEDULE_TICK_SECONDS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.schedule_tick_seconds = parsed;
        }
    }

    settings
}

fn apply_file(settings: &mut Settings, raw: &str) {
    let Ok(file_cfg) = toml::from_str::<HashMap<String, toml::Value>>(raw) else {
        return;
    };
    let text = |key: &str| {
        file_cfg
            .get(key)
            .and_then(toml::Value::as_str)
            .map(str::to_string)
    };

    if let Some(v) = text("bind_addr") {
        settings.server_bind = v;
    }
    if let Some(v) = text("database_url") {
        settings.database_url = v;
    }
    if let Some(v) = text("api_key") {
        settings.api_key = v;
    }
    if let Some(v) = text("printer_url") {
        settings.printer_url = Some(v);
    }
    if let Some(v) = text("printer_api_key") {
        settings.printer_api_key = v;
    }
    if let Some(v) = file_cfg
        .get("schedule_tick_seconds")
        .and_then(toml::Value::as_integer)
        .and_then(|v| u64::try_from(v).ok())
    {
        settings.schedule_tick_seconds = v;
    }
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    ensure_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

fn ensure_parent_dir_exists(database_url: &str) -> anyhow::Result<()> {
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
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
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
#[path = "tests/config_tests.rs"]
mod tests;
