use std::fmt::Write as _;

use anyhow::{bail, Result};
use clap::{Subcommand, ValueEnum};
use client_core::{ControllerEvent, FileCatalog, MessageBus, PlaylistController};
use shared::domain::{FileMetadata, FileOrigin, QueueEntry};
use tokio::sync::broadcast::error::TryRecvError;
use tracing::info;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the saved queue and preferences.
    Show,
    /// Append a file to the queue.
    Add {
        path: String,
        #[arg(long, default_value = "local")]
        origin: FileOrigin,
        /// Print time in seconds; looked up on the host when omitted.
        #[arg(long)]
        estimate: Option<f64>,
    },
    /// Remove the entry at a 1-based position.
    Remove { position: usize },
    Up { position: usize },
    Down { position: usize },
    Clear,
    /// Hand the queue to the host and start printing.
    Start,
    /// Follow queue progress pushed by the host.
    Watch,
    Set { preference: Preference, value: String },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Preference {
    AutoStartQueue,
    AutoQueueFiles,
    AutoRepeatQueue,
    StartTime,
}

pub async fn run(
    command: Command,
    controller: &mut PlaylistController,
    catalog: &dyn FileCatalog,
    bus: Option<MessageBus>,
) -> Result<()> {
    match command {
        Command::Show => print!("{}", render(controller)),
        Command::Add {
            path,
            origin,
            estimate,
        } => {
            let metadata = match estimate {
                Some(seconds) => FileMetadata::new(origin, &path).with_estimate(seconds),
                None => catalog.file_metadata(origin, &path).await?,
            };
            let entry = controller.add_entry(&metadata);
            println!("queued {} ({})", entry.file_name, entry.print_time);
        }
        Command::Remove { position } => {
            let index = queue_index(position, controller.queue())?;
            controller.remove_at(index);
        }
        Command::Up { position } => {
            let index = queue_index(position, controller.queue())?;
            if !controller.move_up_at(index) {
                println!("entry {position} is already first");
            }
        }
        Command::Down { position } => {
            let index = queue_index(position, controller.queue())?;
            if !controller.move_down_at(index) {
                println!("entry {position} is already last");
            }
        }
        Command::Clear => controller.clear(),
        Command::Start => {
            if controller.queue().is_empty() {
                bail!("queue is empty");
            }
            controller.start_playback().await?;
            println!("started {} file(s)", controller.queue().len());
        }
        Command::Watch => {
            let Some(bus) = bus else {
                bail!("push socket unavailable");
            };
            watch(controller, bus).await;
        }
        Command::Set { preference, value } => set_preference(controller, preference, &value)?,
    }
    Ok(())
}

async fn watch(controller: &mut PlaylistController, mut bus: MessageBus) {
    let mut events = controller.subscribe_events();
    info!("watching playlist progress");
    while let Some(message) = bus.next().await {
        controller.reconcile(message);
        loop {
            match events.try_recv() {
                Ok(ControllerEvent::PlaylistCompleted) => println!("playlist completed"),
                Ok(ControllerEvent::CurrentFileChanged(id)) if !id.is_empty() => {
                    let name = controller
                        .queue()
                        .iter()
                        .find(|e| e.id == id)
                        .map_or(id.as_str(), |e| e.file_name.as_str());
                    println!("now printing {name}");
                }
                Ok(ControllerEvent::CurrentFileChanged(_)) => {}
                Ok(ControllerEvent::QueueReplaced { removed_file }) => {
                    println!("{removed_file} was deleted and left the queue");
                }
                Ok(ControllerEvent::PreferencesChanged(prefs)) => println!(
                    "settings changed: auto start {}, auto queue {}, auto repeat {}, start time '{}'",
                    prefs.auto_start_queue,
                    prefs.auto_queue_files,
                    prefs.auto_repeat_queue,
                    prefs.start_time
                ),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
    }
    println!("push socket closed");
}

fn set_preference(controller: &mut PlaylistController, preference: Preference, value: &str) -> Result<()> {
    match preference {
        Preference::AutoStartQueue => controller.set_auto_start_queue(parse_flag(value)?),
        Preference::AutoQueueFiles => controller.set_auto_queue_files(parse_flag(value)?),
        Preference::AutoRepeatQueue => controller.set_auto_repeat_queue(parse_flag(value)?),
        Preference::StartTime => controller.set_start_time(value.trim()),
    }
    Ok(())
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        other => bail!("expected on/off, got '{other}'"),
    }
}

/// Converts a 1-based position from the command line into a queue index.
fn queue_index(position: usize, queue: &[QueueEntry]) -> Result<usize> {
    if position == 0 || position > queue.len() {
        bail!("no entry at position {position} (queue has {})", queue.len());
    }
    Ok(position - 1)
}

fn render(controller: &PlaylistController) -> String {
    let mut out = String::new();
    if controller.queue().is_empty() {
        out.push_str("queue is empty\n");
    }
    for (i, entry) in controller.queue().iter().enumerate() {
        let _ = writeln!(out, "{:>3}. {}  {}", i + 1, entry.print_time, entry.file_name);
    }
    let prefs = controller.preferences();
    let _ = writeln!(
        out,
        "auto start: {}  auto queue: {}  auto repeat: {}  start time: {}",
        on_off(prefs.auto_start_queue),
        on_off(prefs.auto_queue_files),
        on_off(prefs.auto_repeat_queue),
        if prefs.start_time.is_empty() {
            "-"
        } else {
            prefs.start_time.as_str()
        },
    );
    out
}

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}
