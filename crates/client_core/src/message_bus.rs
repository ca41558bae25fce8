use futures::StreamExt;
use shared::{
    protocol::{PluginMessage, PushFrame},
    PLUGIN_IDENTIFIER,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::PlaylistError;

const CHANNEL_CAPACITY: usize = 256;

/// Ordered stream of playlist push messages read from the host socket.
pub struct MessageBus {
    rx: mpsc::Receiver<PluginMessage>,
    reader: JoinHandle<()>,
}

impl MessageBus {
    pub async fn connect(base_url: &Url) -> Result<Self, PlaylistError> {
        let ws_url = push_socket_url(base_url)?;
        let (ws_stream, _) = connect_async(ws_url.as_str())
            .await
            .map_err(|e| PlaylistError::MessageBus(format!("failed to connect {ws_url}: {e}")))?;
        info!(%ws_url, "push socket connected");
        let (_, mut ws_reader) = ws_stream.split();

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let reader = tokio::spawn(async move {
            while let Some(frame) = ws_reader.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        let Some(message) = decode_frame(&text) else {
                            continue;
                        };
                        if tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(error) => {
                        warn!(%error, "push socket read failed");
                        break;
                    }
                }
            }
            debug!("push socket reader finished");
        });

        Ok(Self { rx, reader })
    }

    /// Next message in emission order; `None` once the socket is gone.
    pub async fn next(&mut self) -> Option<PluginMessage> {
        self.rx.recv().await
    }
}

impl Drop for MessageBus {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Extracts a playlist message from a socket frame. Frames addressed to other
/// plugins and frames that do not parse yield `None`.
pub fn decode_frame(text: &str) -> Option<PluginMessage> {
    let frame: PushFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(error) => {
            debug!(%error, "skipping undecodable push frame");
            return None;
        }
    };
    if frame.plugin != PLUGIN_IDENTIFIER {
        return None;
    }
    match serde_json::from_value(frame.data) {
        Ok(message) => Some(message),
        Err(error) => {
            warn!(%error, "malformed playlist push message");
            None
        }
    }
}

fn push_socket_url(base_url: &Url) -> Result<Url, PlaylistError> {
    let scheme = match base_url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => {
            return Err(PlaylistError::InvalidUrl(format!(
                "unsupported scheme '{other}' in {base_url}"
            )))
        }
    };
    let mut ws_url = base_url
        .join("sockjs")
        .map_err(|_| PlaylistError::InvalidUrl(base_url.to_string()))?;
    ws_url
        .set_scheme(scheme)
        .map_err(|_| PlaylistError::InvalidUrl(base_url.to_string()))?;
    Ok(ws_url)
}
