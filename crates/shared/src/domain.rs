use std::{collections::HashMap, fmt};

use serde::{Deserialize, Serialize};

/// Key under `statistics.averagePrintTime` holding the default printer profile.
const DEFAULT_PROFILE_KEY: &str = "_default";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: String,
    #[serde(rename = "fileName")]
    pub file_name: String,
    #[serde(default)]
    pub print_time: String,
}

impl QueueEntry {
    /// Entry for a job the printer started on its own, outside the queue.
    pub fn untracked(file_name: impl Into<String>) -> Self {
        Self {
            id: "0".into(),
            file_name: file_name.into(),
            print_time: String::new(),
        }
    }
}

/// Derives the stable id of the `duplicate_count`-th copy of `path` in a queue.
pub fn entry_id(origin: FileOrigin, path: &str, duplicate_count: usize) -> String {
    let digest = md5::compute(format!("{origin}:{path}:{duplicate_count}"));
    format!("{digest:x}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOrigin {
    #[default]
    Local,
    Sdcard,
}

impl FileOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            FileOrigin::Local => "local",
            FileOrigin::Sdcard => "sdcard",
        }
    }
}

impl fmt::Display for FileOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FileOrigin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(FileOrigin::Local),
            "sdcard" => Ok(FileOrigin::Sdcard),
            other => Err(format!("unknown file origin '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStatistics {
    #[serde(default)]
    pub average_print_time: HashMap<String, f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcodeAnalysis {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_print_time: Option<f64>,
}

/// Host-side description of a printable file, as returned by the file listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    #[serde(default)]
    pub origin: FileOrigin,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistics: Option<FileStatistics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcode_analysis: Option<GcodeAnalysis>,
}

impl FileMetadata {
    pub fn new(origin: FileOrigin, path: impl Into<String>) -> Self {
        Self {
            origin,
            path: path.into(),
            statistics: None,
            gcode_analysis: None,
        }
    }

    pub fn with_estimate(mut self, seconds: f64) -> Self {
        self.gcode_analysis = Some(GcodeAnalysis {
            estimated_print_time: Some(seconds),
        });
        self
    }

    pub fn with_average(mut self, seconds: f64) -> Self {
        let mut average_print_time = HashMap::new();
        average_print_time.insert(DEFAULT_PROFILE_KEY.to_string(), seconds);
        self.statistics = Some(FileStatistics { average_print_time });
        self
    }

    /// Whole seconds the job is expected to take. Recorded print history wins
    /// over the slicer estimate; fractions are truncated.
    pub fn print_time_seconds(&self) -> Option<u64> {
        let average = self
            .statistics
            .as_ref()
            .and_then(|stats| stats.average_print_time.get(DEFAULT_PROFILE_KEY))
            .copied();
        let estimate = self
            .gcode_analysis
            .as_ref()
            .and_then(|analysis| analysis.estimated_print_time);

        average
            .or(estimate)
            .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
            .map(|seconds| seconds.trunc() as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrinterStateId {
    Operational,
    Printing,
    Paused,
    Pausing,
    Resuming,
    Cancelling,
    Finishing,
    Offline,
    Error,
    #[serde(other)]
    Unknown,
}

impl PrinterStateId {
    pub fn has_active_job(self) -> bool {
        matches!(self, PrinterStateId::Printing | PrinterStateId::Paused)
    }
}
