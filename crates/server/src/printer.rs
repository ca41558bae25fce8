use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use server_api::PrinterHost;
use shared::domain::PrinterStateId;
use tracing::debug;
use url::Url;

const API_KEY_HEADER: &str = "X-Api-Key";

#[derive(Debug, Default, Deserialize)]
struct JobStatus {
    #[serde(default)]
    job: JobInfo,
    #[serde(default)]
    state: String,
}

#[derive(Debug, Default, Deserialize)]
struct JobInfo {
    #[serde(default)]
    file: JobFile,
}

#[derive(Debug, Default, Deserialize)]
struct JobFile {
    path: Option<String>,
}

/// Printer reached through the host's REST job API.
pub struct HttpPrinter {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl HttpPrinter {
    pub fn new(printer_url: &str, api_key: impl Into<String>) -> anyhow::Result<Self> {
        let mut base_url =
            Url::parse(printer_url).with_context(|| format!("invalid printer url '{printer_url}'"))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            http: Client::new(),
            base_url,
            api_key: api_key.into(),
        })
    }

    async fn job_status(&self) -> anyhow::Result<Option<JobStatus>> {
        let url = self.base_url.join("api/job")?;
        let response = self
            .http
            .get(url.clone())
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .with_context(|| format!("printer request to {url} failed"))?;
        // The host answers 409 while no printer is connected.
        if response.status() == StatusCode::CONFLICT {
            return Ok(None);
        }
        let status = response
            .error_for_status()
            .with_context(|| format!("printer rejected {url}"))?
            .json()
            .await
            .with_context(|| format!("unreadable job status from {url}"))?;
        Ok(Some(status))
    }

    async fn job_command(&self, body: serde_json::Value) -> anyhow::Result<()> {
        let url = self.base_url.join("api/job")?;
        self.http
            .post(url.clone())
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await
            .and_then(|res| res.error_for_status())
            .with_context(|| format!("job command to {url} failed"))?;
        Ok(())
    }
}

#[async_trait]
impl PrinterHost for HttpPrinter {
    async fn state_id(&self) -> anyhow::Result<PrinterStateId> {
        Ok(self
            .job_status()
            .await?
            .map_or(PrinterStateId::Offline, |s| state_from_text(&s.state)))
    }

    async fn current_job_path(&self) -> anyhow::Result<Option<String>> {
        Ok(self.job_status().await?.and_then(|s| s.job.file.path))
    }

    async fn select_and_print(&self, path: &str) -> anyhow::Result<()> {
        let url = file_url(&self.base_url, "local", path)?;
        debug!(%url, "selecting file");
        self.http
            .post(url.clone())
            .header(API_KEY_HEADER, &self.api_key)
            .json(&serde_json::json!({ "command": "select", "print": true }))
            .send()
            .await
            .and_then(|res| res.error_for_status())
            .with_context(|| format!("failed to select and print {path}"))?;
        Ok(())
    }

    async fn pause(&self) -> anyhow::Result<()> {
        self.job_command(serde_json::json!({ "command": "pause", "action": "pause" }))
            .await
    }

    async fn resume(&self) -> anyhow::Result<()> {
        self.job_command(serde_json::json!({ "command": "pause", "action": "resume" }))
            .await
    }
}

/// `api/files/{origin}/{path}` with every path segment percent-encoded, so
/// names holding `#` or `?` reach the host intact.
fn file_url(base_url: &Url, origin: &str, path: &str) -> anyhow::Result<Url> {
    let mut url = base_url.clone();
    url.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("printer url '{base_url}' cannot take a path"))?
        .pop_if_empty()
        .extend(["api", "files", origin])
        .extend(path.trim_start_matches('/').split('/'));
    Ok(url)
}

/// Stand-in used when no printer url is configured.
pub struct DisconnectedPrinter;

#[async_trait]
impl PrinterHost for DisconnectedPrinter {
    async fn state_id(&self) -> anyhow::Result<PrinterStateId> {
        Ok(PrinterStateId::Offline)
    }

    async fn current_job_path(&self) -> anyhow::Result<Option<String>> {
        Ok(None)
    }

    async fn select_and_print(&self, path: &str) -> anyhow::Result<()> {
        anyhow::bail!("no printer configured to print {path}")
    }

    async fn pause(&self) -> anyhow::Result<()> {
        anyhow::bail!("no printer configured")
    }

    async fn resume(&self) -> anyhow::Result<()> {
        anyhow::bail!("no printer configured")
    }
}

/// Maps the human readable job state onto a state id.
fn state_from_text(text: &str) -> PrinterStateId {
    let text = text.trim().to_ascii_lowercase();
    match text.as_str() {
        "operational" => PrinterStateId::Operational,
        "printing" | "printing from sd" | "sending file to sd" => PrinterStateId::Printing,
        "paused" => PrinterStateId::Paused,
        "pausing" => PrinterStateId::Pausing,
        "resuming" => PrinterStateId::Resuming,
        "cancelling" => PrinterStateId::Cancelling,
        "finishing" => PrinterStateId::Finishing,
        "offline" | "closed" => PrinterStateId::Offline,
        _ if text.starts_with("error") || text.starts_with("offline after error") => {
            PrinterStateId::Error
        }
        _ => PrinterStateId::Unknown,
    }
}

#[cfg(test)]
#[path = "tests/printer_tests.rs"]
mod tests;
