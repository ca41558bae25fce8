use config::{Config, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_url: String,
    pub api_key: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:5000".into(),
            api_key: "devkey".into(),
        }
    }
}

impl ClientConfig {
    /// Reads `playlist.toml` from the working directory when present, then
    /// `PLAYLIST_*` environment variables.
    pub fn load() -> anyhow::Result<Self> {
        let config = Config::builder()
            .add_source(File::with_name("playlist").required(false))
            .add_source(Environment::with_prefix("PLAYLIST"))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    pub fn with_overrides(mut self, server_url: Option<String>, api_key: Option<String>) -> Self {
        if let Some(v) = server_url {
            self.server_url = v;
        }
        if let Some(v) = api_key {
            self.api_key = v;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_wins_over_loaded_values() {
        let config = ClientConfig::default().with_overrides(Some("http://octopi.local".into()), None);
        assert_eq!(config.server_url, "http://octopi.local");
        assert_eq!(config.api_key, "devkey");
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let config: ClientConfig = Config::builder()
            .set_override("api_key", "abc")
            .and_then(|b| b.build())
            .and_then(|c| c.try_deserialize())
            .expect("config");
        assert_eq!(config.api_key, "abc");
        assert_eq!(config.server_url, ClientConfig::default().server_url);
    }
}
