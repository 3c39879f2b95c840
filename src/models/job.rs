use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use uuid::Uuid;

use crate::models::analysis::AnalysisResult;

/// Lifecycle state of an analysis job.
///
/// `Running` is the only initial state. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobState {
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// Depth of analysis requested by the client.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Mode {
    #[default]
    Basic,
    Extended,
}

impl Mode {
    /// Trim and parse a client-supplied mode. Unknown or missing values fall back to `Basic`.
    pub fn normalize(raw: Option<&str>) -> Self {
        raw.map(str::trim)
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }
}

/// Ordered pipeline stages.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    FetchImage,
    Vision,
    Planning,
    Search,
    Finalize,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// Stage name to elapsed seconds. Entries are only ever added.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct StageTimings(BTreeMap<Stage, f64>);

impl StageTimings {
    /// Record the elapsed time of a stage, rounded to hundredths of a second.
    ///
    /// Returns `false` without touching the existing entry if the stage was already recorded.
    pub fn record(&mut self, stage: Stage, elapsed: Duration) -> bool {
        if self.0.contains_key(&stage) {
            return false;
        }
        let secs = (elapsed.as_secs_f64() * 100.0).round() / 100.0;
        self.0.insert(stage, secs);
        true
    }

    pub fn get(&self, stage: Stage) -> Option<f64> {
        self.0.get(&stage).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Stage, f64)> + '_ {
        self.0.iter().map(|(stage, secs)| (*stage, *secs))
    }
}

/// Partial state visible to pollers while a job runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Progress {
    /// Most recently completed stage.
    pub latest_stage: Option<Stage>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub summaries: BTreeMap<Stage, String>,
    pub timings: StageTimings,
}

/// Classification of a job failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    UpstreamTimeout,
    UpstreamError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// Error detail stored on a failed job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobError {
    pub kind: ErrorKind,
    /// Stage that was active when the job failed, if known.
    pub stage: Option<Stage>,
    pub message: String,
}

/// One tracked analysis job.
///
/// Records are immutable snapshots: the job store replaces a record wholesale on every update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub state: JobState,
    pub mode: Mode,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub progress: Progress,
    pub result: Option<AnalysisResult>,
    pub error: Option<JobError>,
}

impl JobRecord {
    pub fn new(mode: Mode) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            state: JobState::Running,
            mode,
            created_at: now,
            updated_at: now,
            finished_at: None,
            progress: Progress::default(),
            result: None,
            error: None,
        }
    }
}
