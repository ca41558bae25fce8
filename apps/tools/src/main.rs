use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use server_api::schedule::parse_slot;
use shared::{protocol::SettingsPatch, PLUGIN_IDENTIFIER};
use storage::{SettingsStore, Storage};

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/playlist.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Show,
    ResetQueue,
    SetStartTime { time: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::Show => {
            let settings = storage.load_settings(PLUGIN_IDENTIFIER).await?;
            let updated = storage
                .updated_at(PLUGIN_IDENTIFIER)
                .await?
                .map_or_else(|| "never".to_string(), |t| t.to_rfc3339());
            println!("last saved: {updated}");
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        Command::ResetQueue => {
            storage
                .apply_patch(PLUGIN_IDENTIFIER, &SettingsPatch::playlist(Vec::new()))
                .await?;
            println!("queue cleared");
        }
        Command::SetStartTime { time } => {
            if !time.trim().is_empty() && parse_slot(&time).is_none() {
                bail!("start time must look like HH:MM, got '{time}'");
            }
            let patch = SettingsPatch {
                start_time: Some(time.trim().to_string()),
                ..SettingsPatch::default()
            };
            storage.apply_patch(PLUGIN_IDENTIFIER, &patch).await?;
            println!("start time set to '{}'", time.trim());
        }
    }

    Ok(())
}

