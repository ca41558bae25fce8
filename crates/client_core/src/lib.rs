//! Client side of the print-job playlist.
//!
//! [`PlaylistController`] owns the ordered queue shown to the user. Every
//! local mutation is pushed to a [`SettingsSink`] and to the registered change
//! hooks; push messages from the print server are folded in through
//! [`PlaylistController::reconcile`], strictly in arrival order.

use std::sync::Arc;

use async_trait::async_trait;
use shared::{
    domain::{entry_id, FileMetadata, FileOrigin, QueueEntry},
    print_time::print_time_for,
    protocol::{PlaylistSettings, PluginMessage, SettingsPatch},
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub mod error;
pub mod message_bus;
pub mod transport;

pub use error::PlaylistError;
pub use message_bus::MessageBus;
pub use transport::{HostClient, HttpSettingsSink};

/// Receives every change the controller makes so it can be stored durably.
/// Implementations must not block; delivery is fire-and-forget.
pub trait SettingsSink: Send + Sync {
    fn persist(&self, patch: SettingsPatch);
}

#[async_trait]
pub trait PlaybackTransport: Send + Sync {
    async fn start_queue(&self, queue: &[QueueEntry]) -> Result<(), PlaylistError>;
}

#[async_trait]
pub trait FileCatalog: Send + Sync {
    async fn file_metadata(
        &self,
        origin: FileOrigin,
        path: &str,
    ) -> Result<FileMetadata, PlaylistError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Queue(Vec<QueueEntry>),
    AutoStartQueue(bool),
    AutoQueueFiles(bool),
    AutoRepeatQueue(bool),
    StartTime(String),
}

impl Mutation {
    pub fn to_patch(&self) -> SettingsPatch {
        let mut patch = SettingsPatch::default();
        match self {
            Mutation::Queue(entries) => patch.playlist = Some(entries.clone()),
            Mutation::AutoStartQueue(v) => patch.auto_start_queue = Some(*v),
            Mutation::AutoQueueFiles(v) => patch.auto_queue_files = Some(*v),
            Mutation::AutoRepeatQueue(v) => patch.auto_repeat_queue = Some(*v),
            Mutation::StartTime(v) => patch.start_time = Some(v.clone()),
        }
        patch
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    PlaylistCompleted,
    CurrentFileChanged(String),
    QueueReplaced { removed_file: String },
    PreferencesChanged(Preferences),
}

/// Two-way mirrored preferences. They do not influence the queue itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Preferences {
    pub auto_start_queue: bool,
    pub auto_queue_files: bool,
    pub auto_repeat_queue: bool,
    pub start_time: String,
}

impl Preferences {
    fn from_settings(settings: &PlaylistSettings) -> Self {
        Self {
            auto_start_queue: settings.auto_start_queue,
            auto_queue_files: settings.auto_queue_files,
            auto_repeat_queue: settings.auto_repeat_queue,
            start_time: settings.start_time.clone(),
        }
    }
}

type ChangeHook = Box<dyn FnMut(&Mutation) + Send>;

pub struct PlaylistController {
    queue: Vec<QueueEntry>,
    current_file: String,
    is_playing: bool,
    preferences: Preferences,
    settings: Arc<dyn SettingsSink>,
    transport: Arc<dyn PlaybackTransport>,
    change_hooks: Vec<ChangeHook>,
    events: broadcast::Sender<ControllerEvent>,
}

impl PlaylistController {
    pub fn new(settings: Arc<dyn SettingsSink>, transport: Arc<dyn PlaybackTransport>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            queue: Vec::new(),
            current_file: String::new(),
            is_playing: false,
            preferences: Preferences::default(),
            settings,
            transport,
            change_hooks: Vec::new(),
            events,
        }
    }

    /// Loads the persisted snapshot. Nothing is written back.
    pub fn hydrate(&mut self, snapshot: &PlaylistSettings) {
        self.queue = snapshot.playlist.clone();
        self.preferences = Preferences::from_settings(snapshot);
        debug!(entries = self.queue.len(), "playlist hydrated");
    }

    /// Registers a hook called synchronously after every mutation.
    pub fn on_change(&mut self, hook: impl FnMut(&Mutation) + Send + 'static) {
        self.change_hooks.push(Box::new(hook));
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    pub fn queue(&self) -> &[QueueEntry] {
        &self.queue
    }

    pub fn file_names(&self) -> Vec<&str> {
        self.queue.iter().map(|e| e.file_name.as_str()).collect()
    }

    pub fn current_file(&self) -> &str {
        &self.current_file
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    /// Appends `file` to the queue. Queuing the same path again is allowed;
    /// the copy gets an id derived from how many copies are already queued.
    pub fn add_entry(&mut self, file: &FileMetadata) -> &QueueEntry {
        let duplicates = self
            .queue
            .iter()
            .filter(|e| e.file_name == file.path)
            .count();
        self.queue.push(QueueEntry {
            id: entry_id(file.origin, &file.path, duplicates),
            file_name: file.path.clone(),
            print_time: print_time_for(file),
        });
        info!(file = %file.path, duplicates, "queued print job");
        self.commit_queue();
        let last = self.queue.len() - 1;
        &self.queue[last]
    }

    pub fn remove_entry(&mut self, entry: &QueueEntry) -> bool {
        match self.position_of(entry) {
            Some(index) => self.remove_at(index),
            None => false,
        }
    }

    pub fn remove_at(&mut self, index: usize) -> bool {
        if index >= self.queue.len() {
            return false;
        }
        let removed = self.queue.remove(index);
        debug!(file = %removed.file_name, index, "removed queue entry");
        self.commit_queue();
        true
    }

    pub fn move_up(&mut self, entry: &QueueEntry) -> bool {
        match self.position_of(entry) {
            Some(index) => self.move_up_at(index),
            None => false,
        }
    }

    pub fn move_down(&mut self, entry: &QueueEntry) -> bool {
        match self.position_of(entry) {
            Some(index) => self.move_down_at(index),
            None => false,
        }
    }

    pub fn move_up_at(&mut self, index: usize) -> bool {
        if index == 0 || index >= self.queue.len() {
            return false;
        }
        self.queue.swap(index - 1, index);
        self.commit_queue();
        true
    }

    pub fn move_down_at(&mut self, index: usize) -> bool {
        if index + 1 >= self.queue.len() {
            return false;
        }
        self.queue.swap(index, index + 1);
        self.commit_queue();
        true
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.commit_queue();
    }

    /// Hands the current queue to the print server.
    ///
    /// `is_playing` flips before the request goes out; if the request fails it
    /// is restored to what it was and the error is returned to the caller.
    pub async fn start_playback(&mut self) -> Result<(), PlaylistError> {
        let was_playing = self.is_playing;
        self.is_playing = true;
        let snapshot = self.queue.clone();
        info!(entries = snapshot.len(), "starting playlist");

        if let Err(error) = self.transport.start_queue(&snapshot).await {
            warn!(%error, "playlist start request failed");
            self.is_playing = was_playing;
            return Err(error);
        }
        Ok(())
    }

    /// Applies one server push message.
    pub fn reconcile(&mut self, message: PluginMessage) {
        match message {
            PluginMessage::SetQueue {
                current_file,
                playlist,
            } => self.apply_queue_state(current_file, playlist.len()),
            PluginMessage::FileRemoved { removed_file, .. } => {
                self.apply_file_removed(removed_file)
            }
            PluginMessage::SettingsUpdated { settings } => {
                if self.apply_remote_settings(&settings) {
                    let _ = self
                        .events
                        .send(ControllerEvent::PreferencesChanged(self.preferences.clone()));
                }
            }
            PluginMessage::Unknown => debug!("ignoring unrecognised playlist message"),
        }
    }

    fn apply_queue_state(&mut self, current_file: String, remaining: usize) {
        if current_file != self.current_file {
            self.current_file = current_file.clone();
            let _ = self
                .events
                .send(ControllerEvent::CurrentFileChanged(current_file.clone()));
        }

        if remaining > 0 {
            self.is_playing = true;
            return;
        }

        if self.is_playing {
            self.is_playing = false;
            if !current_file.is_empty() {
                info!("playlist completed");
                let _ = self.events.send(ControllerEvent::PlaylistCompleted);
            }
        }
    }

    fn apply_file_removed(&mut self, removed_file: String) {
        if removed_file.is_empty() {
            return;
        }
        let filtered: Vec<QueueEntry> = self
            .queue
            .iter()
            .filter(|e| e.file_name != removed_file)
            .cloned()
            .collect();
        if filtered == self.queue {
            return;
        }

        info!(file = %removed_file, "file removed on host, dropping it from the queue");
        self.queue = filtered;
        self.commit_queue();
        let _ = self
            .events
            .send(ControllerEvent::QueueReplaced { removed_file });
    }

    pub fn set_auto_start_queue(&mut self, value: bool) {
        if self.preferences.auto_start_queue != value {
            self.preferences.auto_start_queue = value;
            self.commit(Mutation::AutoStartQueue(value));
        }
    }

    pub fn set_auto_queue_files(&mut self, value: bool) {
        if self.preferences.auto_queue_files != value {
            self.preferences.auto_queue_files = value;
            self.commit(Mutation::AutoQueueFiles(value));
        }
    }

    pub fn set_auto_repeat_queue(&mut self, value: bool) {
        if self.preferences.auto_repeat_queue != value {
            self.preferences.auto_repeat_queue = value;
            self.commit(Mutation::AutoRepeatQueue(value));
        }
    }

    pub fn set_start_time(&mut self, value: impl Into<String>) {
        let value = value.into();
        if self.preferences.start_time != value {
            self.preferences.start_time = value.clone();
            self.commit(Mutation::StartTime(value));
        }
    }

    /// Mirrors preference changes made elsewhere. Only differing values are
    /// taken over and nothing is persisted, so remote edits never echo back.
    pub fn apply_remote_settings(&mut self, settings: &PlaylistSettings) -> bool {
        let remote = Preferences::from_settings(settings);
        if remote == self.preferences {
            return false;
        }
        self.preferences = remote;
        true
    }

    fn position_of(&self, entry: &QueueEntry) -> Option<usize> {
        self.queue.iter().position(|e| e == entry)
    }

    fn commit_queue(&mut self) {
        self.commit(Mutation::Queue(self.queue.clone()));
    }

    fn commit(&mut self, mutation: Mutation) {
        self.settings.persist(mutation.to_patch());
        for hook in &mut self.change_hooks {
            hook(&mutation);
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
