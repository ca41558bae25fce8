use serde::{Deserialize, Serialize};

use crate::domain::{FileOrigin, PrinterStateId, QueueEntry};

/// Persisted plugin settings. Every field falls back to its default so that
/// snapshots written by older versions keep loading.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaylistSettings {
    pub playlist: Vec<QueueEntry>,
    pub auto_start_queue: bool,
    pub auto_queue_files: bool,
    pub auto_repeat_queue: bool,
    pub start_time: String,
    pub blackout_start_time: String,
    pub blackout_stop_time: String,
    pub bed_clear_script: String,
    pub strip_start_marker: String,
    pub strip_end_marker: String,
}

/// Partial settings update; only the fields that are present get written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playlist: Option<Vec<QueueEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_start_queue: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_queue_files: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_repeat_queue: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blackout_start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blackout_stop_time: Option<String>,
}

impl SettingsPatch {
    pub fn playlist(entries: Vec<QueueEntry>) -> Self {
        Self {
            playlist: Some(entries),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply_to(&self, settings: &mut PlaylistSettings) {
        if let Some(playlist) = &self.playlist {
            settings.playlist = playlist.clone();
        }
        if let Some(v) = self.auto_start_queue {
            settings.auto_start_queue = v;
        }
        if let Some(v) = self.auto_queue_files {
            settings.auto_queue_files = v;
        }
        if let Some(v) = self.auto_repeat_queue {
            settings.auto_repeat_queue = v;
        }
        if let Some(v) = &self.start_time {
            settings.start_time = v.clone();
        }
        if let Some(v) = &self.blackout_start_time {
            settings.blackout_start_time = v.clone();
        }
        if let Some(v) = &self.blackout_stop_time {
            settings.blackout_stop_time = v.clone();
        }
    }
}

/// Push messages the plugin backend emits to connected clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PluginMessage {
    SetQueue {
        #[serde(default)]
        current_file: String,
        #[serde(default)]
        playlist: Vec<QueueEntry>,
    },
    FileRemoved {
        #[serde(default)]
        removed_file: String,
        #[serde(default)]
        playlist: Vec<QueueEntry>,
    },
    /// Saved settings after a write, so other clients can mirror them.
    SettingsUpdated {
        #[serde(default)]
        settings: PlaylistSettings,
    },
    #[serde(other)]
    Unknown,
}

/// Frame carried over the push socket. Frames for other plugins share the
/// socket and are skipped by the receiver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushFrame {
    pub plugin: String,
    pub data: serde_json::Value,
}

impl PushFrame {
    pub fn playlist(message: &PluginMessage) -> serde_json::Result<Self> {
        Ok(Self {
            plugin: crate::PLUGIN_IDENTIFIER.to_string(),
            data: serde_json::to_value(message)?,
        })
    }
}

/// Host events forwarded to the plugin backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum PrinterEvent {
    Startup,
    SettingsUpdated,
    ClientOpened,
    FileAdded {
        path: String,
        #[serde(default)]
        origin: FileOrigin,
    },
    FileRemoved {
        path: String,
    },
    PrintStarted {
        path: String,
    },
    PrintDone {
        path: String,
    },
    PrinterStateChanged {
        state_id: PrinterStateId,
    },
}

/// Body of the host settings API: `{"plugins": {"playlist": ...}}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsDocument<T> {
    pub plugins: PluginSection<T>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginSection<T> {
    pub playlist: T,
}

impl<T> SettingsDocument<T> {
    pub fn new(playlist: T) -> Self {
        Self {
            plugins: PluginSection { playlist },
        }
    }

    pub fn into_inner(self) -> T {
        self.plugins.playlist
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueResponse {
    pub playlist: Vec<QueueEntry>,
}
