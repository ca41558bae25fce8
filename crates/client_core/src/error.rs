use shared::domain::FileOrigin;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlaylistError {
    #[error("invalid host url '{0}'")]
    InvalidUrl(String),
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("host answered {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("file '{path}' not found on {origin}")]
    FileNotFound { origin: FileOrigin, path: String },
    #[error("message bus error: {0}")]
    MessageBus(String),
}

impl PlaylistError {
    pub(crate) fn transport(url: &url::Url, source: reqwest::Error) -> Self {
        match source.status() {
            Some(status) => PlaylistError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            },
            None => PlaylistError::Transport {
                url: url.to_string(),
                source,
            },
        }
    }
}
