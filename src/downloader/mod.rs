pub mod aria2;
pub mod manager;
pub mod resolver;
pub mod strategies;
pub mod task;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use crate::config::AppConfig;
use crate::errors::Result;

pub use resolver::MediaInfo;

/// Per-request choices handed to the media-resolution tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadOptions {
    pub format: String,
    pub extract_audio: bool,
    pub audio_format: String,
    pub embed_thumbnail: bool,
    pub embed_metadata: bool,
}

impl DownloadOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            format: config.download_format.clone(),
            extract_audio: config.extract_audio,
            audio_format: config.audio_format.clone(),
            embed_thumbnail: config.embed_thumbnail,
            embed_metadata: config.embed_metadata,
        }
    }

    /// Format selector passed to yt-dlp `-f`.
    pub fn format_selector(&self) -> String {
        if self.extract_audio {
            "bestaudio/best".to_string()
        } else if self.format.trim().is_empty() {
            "best".to_string()
        } else {
            self.format.clone()
        }
    }
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Immutable description of one "fetch URL X into directory Y" request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    pub directory: PathBuf,
    pub filename_template: String,
    pub options: DownloadOptions,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, directory: impl Into<PathBuf>, config: &AppConfig) -> Self {
        Self {
            url: url.into().trim().to_string(),
            directory: directory.into(),
            filename_template: config.filename_template.clone(),
            options: DownloadOptions::from_config(config),
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.filename_template = template.into();
        self
    }

    pub fn with_options(mut self, options: DownloadOptions) -> Self {
        self.options = options;
        self
    }
}

/// Lifecycle of a [`task::DownloadTask`]. Moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    Created,
    ResolvingInfo,
    ResolvingDirectUrl,
    Transferring,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    fn rank(&self) -> u8 {
        match self {
            TaskState::Created => 0,
            TaskState::ResolvingInfo => 1,
            TaskState::ResolvingDirectUrl => 2,
            TaskState::Transferring => 3,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled => 4,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed | TaskState::Cancelled)
    }

    pub fn can_transition_to(&self, next: TaskState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            TaskState::Failed | TaskState::Cancelled => true,
            TaskState::Completed => *self == TaskState::Transferring,
            _ => next.rank() == self.rank() + 1,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskState::Created => "created",
            TaskState::ResolvingInfo => "resolving info",
            TaskState::ResolvingDirectUrl => "resolving direct url",
            TaskState::Transferring => "transferring",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Which aria2 control path a client is using.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BackendMode {
    Rpc,
    Cli,
}

impl fmt::Display for BackendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendMode::Rpc => f.write_str("RPC"),
            BackendMode::Cli => f.write_str("CLI"),
        }
    }
}

/// Identifier of a dispatched transfer inside the active backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobHandle {
    /// aria2 gid
    Rpc(String),
    /// OS process id of a spawned aria2c
    Process(u32),
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobHandle::Rpc(gid) => write!(f, "gid:{}", gid),
            JobHandle::Process(pid) => write!(f, "pid:{}", pid),
        }
    }
}

/// One raw progress reading from a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressSample {
    /// `None` when the total size is not known yet.
    pub percent: Option<u8>,
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    /// Bytes per second
    pub speed: u64,
    /// Seconds
    pub eta: Option<u64>,
}

impl ProgressSample {
    pub fn percent(percent: u8) -> Self {
        Self {
            percent: Some(percent.min(100)),
            ..Self::default()
        }
    }

    pub fn finished() -> Self {
        Self::percent(100)
    }

    /// Percent from byte counts; `None` unless the total is known and positive.
    pub fn percent_of(completed: u64, total: u64) -> Option<u8> {
        if total == 0 {
            return None;
        }
        let pct = (completed.min(total) as u128 * 100 / total as u128) as u8;
        Some(pct.min(100))
    }
}

/// Normalised progress record exposed to the display layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub percent: u8,
    pub downloaded_bytes: u64,
    /// 0 if unknown
    pub total_bytes: u64,
    pub speed: u64,
    pub eta: Option<u64>,
}

/// Event stream consumed by the display layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    StateChanged {
        task_id: String,
        state: TaskState,
        message: String,
    },
    Info {
        task_id: String,
        info: MediaInfo,
    },
    Progress {
        task_id: String,
        progress: ProgressSnapshot,
    },
    Completed {
        task_id: String,
        directory: PathBuf,
        filename: String,
    },
    Failed {
        task_id: String,
        error: String,
    },
}

impl TaskEvent {
    pub fn task_id(&self) -> &str {
        match self {
            TaskEvent::StateChanged { task_id, .. }
            | TaskEvent::Info { task_id, .. }
            | TaskEvent::Progress { task_id, .. }
            | TaskEvent::Completed { task_id, .. }
            | TaskEvent::Failed { task_id, .. } => task_id,
        }
    }
}

/// Receives progress from a running transfer. Implemented for plain closures.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, sample: ProgressSample);

    /// The backend assigned a job handle to this transfer.
    fn attached(&self, _handle: JobHandle) {}

    /// The transfer restarted from scratch on another backend.
    fn restarted(&self) {}
}

impl<F> ProgressReporter for F
where
    F: Fn(ProgressSample) + Send + Sync,
{
    fn report(&self, sample: ProgressSample) {
        self(sample)
    }
}

/// What a backend needs to perform one transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferJob {
    pub url: String,
    pub directory: PathBuf,
    pub filename: String,
}

/// One aria2 control path (RPC daemon or spawned process).
#[async_trait::async_trait]
pub trait TransferBackend: Send + Sync {
    fn mode(&self) -> BackendMode;

    /// Version string of the backend, or an error if it is unreachable.
    async fn version(&self) -> Result<String>;

    /// Runs the transfer to completion. `Err(Dispatch)` means the job was
    /// never accepted; anything else means it was.
    async fn download(
        &self,
        job: &TransferJob,
        reporter: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<()>;

    async fn pause(&self, handle: &JobHandle) -> bool;
    async fn resume(&self, handle: &JobHandle) -> bool;
    async fn remove(&self, handle: &JobHandle) -> bool;
}
