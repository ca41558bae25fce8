use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use shared::{
    domain::{entry_id, FileOrigin, PrinterStateId, QueueEntry},
    error::{ApiError, ErrorCode},
    print_time::format_print_time,
    protocol::{PlaylistSettings, PluginMessage, PrinterEvent, SettingsPatch},
    PLUGIN_IDENTIFIER,
};
use storage::SettingsStore;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

pub mod schedule;

use schedule::{DailySchedule, ScheduledAction};

/// The printer the queue runs on.
#[async_trait]
pub trait PrinterHost: Send + Sync {
    async fn state_id(&self) -> anyhow::Result<PrinterStateId>;
    async fn current_job_path(&self) -> anyhow::Result<Option<String>>;
    async fn select_and_print(&self, path: &str) -> anyhow::Result<()>;
    async fn pause(&self) -> anyhow::Result<()>;
    async fn resume(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
struct RunnerState {
    playlist: Vec<QueueEntry>,
    /// Id of the queue entry currently on the printer; empty when idle.
    current_file: String,
    print_completed: bool,
    schedule: DailySchedule,
}

/// Server half of the playlist: keeps the running queue, feeds jobs to the
/// printer one after another and pushes queue state to connected clients.
pub struct QueueRunner {
    store: Arc<dyn SettingsStore>,
    printer: Arc<dyn PrinterHost>,
    events: broadcast::Sender<PluginMessage>,
    state: Mutex<RunnerState>,
}

impl QueueRunner {
    pub fn new(store: Arc<dyn SettingsStore>, printer: Arc<dyn PrinterHost>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            store,
            printer,
            events,
            state: Mutex::new(RunnerState::default()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PluginMessage> {
        self.events.subscribe()
    }

    pub async fn running_queue(&self) -> (Vec<QueueEntry>, String) {
        let guard = self.state.lock().await;
        (guard.playlist.clone(), guard.current_file.clone())
    }

    pub async fn settings(&self) -> Result<PlaylistSettings, ApiError> {
        self.store
            .load_settings(PLUGIN_IDENTIFIER)
            .await
            .map_err(internal)
    }

    pub async fn update_settings(&self, patch: &SettingsPatch) -> Result<PlaylistSettings, ApiError> {
        validate_slots(patch)?;
        let settings = self
            .store
            .apply_patch(PLUGIN_IDENTIFIER, patch)
            .await
            .map_err(internal)?;
        debug!(?patch, "playlist settings updated");
        Ok(settings)
    }

    /// Queue as last saved by a client.
    pub async fn persisted_queue(&self) -> Result<Vec<QueueEntry>, ApiError> {
        Ok(self.settings().await?.playlist)
    }

    /// Replaces the running queue with the one a client sent.
    pub async fn set_queue(&self, entries: Vec<QueueEntry>) -> Result<(), ApiError> {
        info!(entries = entries.len(), "received print queue from client");
        let mut guard = self.state.lock().await;
        let mut last = std::mem::replace(&mut guard.playlist, entries);

        let printer_state = self.printer_state().await?;
        if printer_state.has_active_job() {
            let active = self.printer.current_job_path().await.map_err(internal)?;
            if let Some(active) = active {
                let on_top = guard
                    .playlist
                    .first()
                    .is_some_and(|e| e.file_name == active);
                if !on_top {
                    keep_active_job_on_top(&mut guard.playlist, &active);
                    if guard.playlist == last {
                        // Forces a correction on the client that sent this queue.
                        last.clear();
                    }
                }
            }
        }

        if guard.playlist != last {
            self.broadcast_queue(&guard);
        }

        if printer_state == PrinterStateId::Operational && self.settings().await?.auto_start_queue {
            self.print_from_queue(&mut guard).await?;
        }
        Ok(())
    }

    /// Replaces the running queue and prints its head right away.
    pub async fn start_queue(&self, entries: Vec<QueueEntry>) -> Result<(), ApiError> {
        let mut guard = self.state.lock().await;
        guard.playlist = entries;
        self.print_from_queue(&mut guard).await
    }

    pub async fn handle_event(&self, event: PrinterEvent) -> Result<(), ApiError> {
        debug!(?event, "printer event");
        let mut guard = self.state.lock().await;
        match event {
            PrinterEvent::Startup => {
                let settings = self.settings().await?;
                trim_running_queue(&mut guard, settings.playlist);
            }
            PrinterEvent::SettingsUpdated => {
                let settings = self.settings().await?;
                trim_running_queue(&mut guard, settings.playlist.clone());
                let _ = self.events.send(PluginMessage::SettingsUpdated { settings });
            }
            PrinterEvent::ClientOpened => self.broadcast_queue(&guard),
            PrinterEvent::FileAdded { path, origin } => {
                if self.settings().await?.auto_queue_files {
                    let entry = new_entry(&guard.playlist, origin, &path);
                    info!(file = %path, "auto-queueing added file");
                    guard.playlist.push(entry);
                    self.broadcast_queue(&guard);
                }
            }
            PrinterEvent::FileRemoved { path } => {
                let settings = self.settings().await?;
                let remaining: Vec<QueueEntry> = settings
                    .playlist
                    .iter()
                    .filter(|e| e.file_name != path)
                    .cloned()
                    .collect();
                if remaining != settings.playlist {
                    self.update_settings(&SettingsPatch::playlist(remaining.clone()))
                        .await?;
                    guard.playlist.retain(|e| e.file_name != path);
                    info!(file = %path, "removed deleted file from playlist");
                    let _ = self.events.send(PluginMessage::FileRemoved {
                        removed_file: path,
                        playlist: remaining,
                    });
                }
            }
            PrinterEvent::PrintStarted { path } => {
                guard.print_completed = false;
                let on_top = guard.playlist.first().is_some_and(|e| e.file_name == path);
                if !on_top {
                    guard.playlist.insert(0, QueueEntry::untracked(path));
                }
                if let Some(id) = guard.playlist.first().map(|e| e.id.clone()) {
                    guard.current_file = id;
                }
                self.broadcast_queue(&guard);
            }
            PrinterEvent::PrintDone { .. } => guard.print_completed = true,
            PrinterEvent::PrinterStateChanged { state_id } => {
                info!(?state_id, "printer state changed");
                if state_id == PrinterStateId::Operational {
                    self.advance(&mut guard).await?;
                }
            }
        }
        Ok(())
    }

    /// Runs whatever daily slot has come due.
    pub async fn tick(&self, now: NaiveDateTime) -> Result<Vec<ScheduledAction>, ApiError> {
        let settings = self.settings().await?;
        let mut guard = self.state.lock().await;
        let due = guard.schedule.due(&settings, now);
        for action in &due {
            match action {
                ScheduledAction::StartQueue => {
                    info!("starting scheduled print queue");
                    guard.playlist = settings.playlist.clone();
                    self.print_from_queue(&mut guard).await?;
                }
                ScheduledAction::PauseQueue => {
                    if !guard.playlist.is_empty()
                        && self.printer_state().await? == PrinterStateId::Printing
                    {
                        info!("pausing print queue");
                        self.printer.pause().await.map_err(internal)?;
                    }
                }
                ScheduledAction::ResumeQueue => {
                    if !guard.playlist.is_empty()
                        && self.printer_state().await? == PrinterStateId::Paused
                    {
                        info!("resuming print queue");
                        self.printer.resume().await.map_err(internal)?;
                    }
                }
            }
        }
        Ok(due)
    }

    /// The printer went idle: drop the finished head and go on with the rest.
    async fn advance(&self, guard: &mut RunnerState) -> Result<(), ApiError> {
        if guard.playlist.is_empty() || guard.current_file.is_empty() {
            return Ok(());
        }
        let finished = guard.playlist.remove(0);
        debug!(file = %finished.file_name, completed = guard.print_completed, "job left the printer");

        if !guard.playlist.is_empty() {
            let printed = self.print_from_queue(guard).await;
            self.broadcast_queue(guard);
            return printed;
        }
        // Clients read an empty queue with a current file as completion.
        self.broadcast_queue(guard);
        guard.current_file.clear();

        let settings = self.settings().await?;
        if settings.auto_repeat_queue && !settings.playlist.is_empty() {
            info!("restarting print queue from beginning");
            guard.playlist = settings.playlist;
            let printed = self.print_from_queue(guard).await;
            self.broadcast_queue(guard);
            return printed;
        }
        Ok(())
    }

    async fn print_from_queue(&self, guard: &mut RunnerState) -> Result<(), ApiError> {
        let Some(head) = guard.playlist.first() else {
            return Ok(());
        };
        guard.current_file = head.id.clone();
        let path = head.file_name.clone();
        info!(file = %path, "selecting file for printing");
        self.printer.select_and_print(&path).await.map_err(|err| {
            warn!(file = %path, error = %err, "printer refused queued file");
            internal(err)
        })
    }

    async fn printer_state(&self) -> Result<PrinterStateId, ApiError> {
        self.printer.state_id().await.map_err(internal)
    }

    fn broadcast_queue(&self, guard: &RunnerState) {
        let _ = self.events.send(PluginMessage::SetQueue {
            current_file: guard.current_file.clone(),
            playlist: guard.playlist.clone(),
        });
    }
}

/// Re-reads a running queue from the saved one, keeping the job in progress
/// and what follows it.
fn trim_running_queue(state: &mut RunnerState, persisted: Vec<QueueEntry>) {
    if !state.playlist.is_empty() {
        info!("updating currently running playlist");
        state.playlist = resume_from(persisted, &state.current_file);
    }
}

fn keep_active_job_on_top(playlist: &mut Vec<QueueEntry>, active: &str) {
    let entry = match playlist.iter().position(|e| e.file_name == active) {
        Some(index) => playlist.remove(index),
        None => QueueEntry::untracked(active),
    };
    playlist.insert(0, entry);
}

/// Drops the entries before the one identified by `current_file`. When that
/// entry is gone the queue comes back empty.
fn resume_from(persisted: Vec<QueueEntry>, current_file: &str) -> Vec<QueueEntry> {
    persisted
        .into_iter()
        .skip_while(|e| e.id != current_file)
        .collect()
}

fn new_entry(playlist: &[QueueEntry], origin: FileOrigin, path: &str) -> QueueEntry {
    let duplicates = playlist.iter().filter(|e| e.file_name == path).count();
    QueueEntry {
        id: entry_id(origin, path, duplicates),
        file_name: path.to_string(),
        print_time: format_print_time(0),
    }
}

/// Slot times are either blank (disabled) or `HH:MM[:SS]`.
fn validate_slots(patch: &SettingsPatch) -> Result<(), ApiError> {
    let slots = [
        ("start_time", &patch.start_time),
        ("blackout_start_time", &patch.blackout_start_time),
        ("blackout_stop_time", &patch.blackout_stop_time),
    ];
    for (field, value) in slots {
        let Some(raw) = value.as_deref() else {
            continue;
        };
        if !raw.trim().is_empty() && schedule::parse_slot(raw).is_none() {
            return Err(ApiError::new(
                ErrorCode::Validation,
                format!("{field} '{raw}' is not a HH:MM time"),
            ));
        }
    }
    Ok(())
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
