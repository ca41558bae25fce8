use async_trait::async_trait;
use reqwest::Client;
use shared::{
    domain::{FileMetadata, FileOrigin, QueueEntry},
    protocol::{PlaylistSettings, SettingsDocument, SettingsPatch},
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};
use url::Url;

use crate::{FileCatalog, PlaybackTransport, PlaylistError, SettingsSink};

pub const API_KEY_HEADER: &str = "X-Api-Key";

/// HTTP access to the print host: settings API, file metadata and the
/// playlist start endpoint.
#[derive(Clone)]
pub struct HostClient {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl HostClient {
    pub fn new(server_url: &str, api_key: impl Into<String>) -> Result<Self, PlaylistError> {
        Ok(Self {
            http: Client::new(),
            base_url: normalize_base_url(server_url)?,
            api_key: api_key.into(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, PlaylistError> {
        self.base_url
            .join(path)
            .map_err(|_| PlaylistError::InvalidUrl(format!("{}{path}", self.base_url)))
    }

    /// Segment-encoded `api/files/{origin}/{path}`; a raw join would read `#`
    /// and `?` in file names as fragment and query.
    fn file_endpoint(&self, origin: FileOrigin, path: &str) -> Result<Url, PlaylistError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| PlaylistError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["api", "files", origin.as_str()])
            .extend(path.trim_start_matches('/').split('/'));
        Ok(url)
    }

    pub async fn fetch_settings(&self) -> Result<PlaylistSettings, PlaylistError> {
        let url = self.endpoint("api/settings")?;
        let document: SettingsDocument<PlaylistSettings> = self
            .http
            .get(url.clone())
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .and_then(|res| res.error_for_status())
            .map_err(|e| PlaylistError::transport(&url, e))?
            .json()
            .await
            .map_err(|e| PlaylistError::transport(&url, e))?;
        Ok(document.into_inner())
    }

    pub async fn save_settings(&self, patch: &SettingsPatch) -> Result<(), PlaylistError> {
        let url = self.endpoint("api/settings")?;
        self.http
            .post(url.clone())
            .header(API_KEY_HEADER, &self.api_key)
            .json(&SettingsDocument::new(patch))
            .send()
            .await
            .and_then(|res| res.error_for_status())
            .map_err(|e| PlaylistError::transport(&url, e))?;
        Ok(())
    }
}

#[async_trait]
impl PlaybackTransport for HostClient {
    async fn start_queue(&self, queue: &[QueueEntry]) -> Result<(), PlaylistError> {
        let url = self.endpoint("plugin/playlist/start")?;
        self.http
            .post(url.clone())
            .header(API_KEY_HEADER, &self.api_key)
            .json(queue)
            .send()
            .await
            .and_then(|res| res.error_for_status())
            .map_err(|e| PlaylistError::transport(&url, e))?;
        Ok(())
    }
}

#[async_trait]
impl FileCatalog for HostClient {
    async fn file_metadata(
        &self,
        origin: FileOrigin,
        path: &str,
    ) -> Result<FileMetadata, PlaylistError> {
        let url = self.file_endpoint(origin, path)?;
        let response = self
            .http
            .get(url.clone())
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| PlaylistError::transport(&url, e))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(PlaylistError::FileNotFound {
                origin,
                path: path.to_string(),
            });
        }
        let mut metadata: FileMetadata = response
            .error_for_status()
            .map_err(|e| PlaylistError::transport(&url, e))?
            .json()
            .await
            .map_err(|e| PlaylistError::transport(&url, e))?;
        metadata.origin = origin;
        Ok(metadata)
    }
}

/// [`SettingsSink`] that forwards patches to the host settings API from a
/// background task. Patches are delivered one at a time, in the order they
/// were persisted; a failed write is logged and dropped.
pub struct HttpSettingsSink {
    tx: mpsc::UnboundedSender<SettingsPatch>,
}

impl HttpSettingsSink {
    pub fn spawn(client: HostClient) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<SettingsPatch>();
        let task = tokio::spawn(async move {
            while let Some(patch) = rx.recv().await {
                match client.save_settings(&patch).await {
                    Ok(()) => debug!("settings saved"),
                    Err(error) => warn!(%error, "failed to save playlist settings"),
                }
            }
        });
        (Self { tx }, task)
    }
}

impl SettingsSink for HttpSettingsSink {
    fn persist(&self, patch: SettingsPatch) {
        if self.tx.send(patch).is_err() {
            warn!("settings writer stopped; dropping settings update");
        }
    }
}

fn normalize_base_url(server_url: &str) -> Result<Url, PlaylistError> {
    let trimmed = server_url.trim();
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(PlaylistError::InvalidUrl(trimmed.to_string()));
    }
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    Url::parse(&with_slash).map_err(|_| PlaylistError::InvalidUrl(trimmed.to_string()))
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
