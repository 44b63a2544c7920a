//! Download orchestration core for a yt-dlp front-end.
//!
//! The [`DownloadManager`] turns `(url, directory)` pairs into
//! [`DownloadTask`]s. Each task resolves the media through yt-dlp, hands
//! the transfer to a shared [`Aria2Client`] (RPC daemon with a one-way
//! fallback to a spawned `aria2c`) and reports its lifecycle to the
//! [`HookBus`] and to the display layer's event channel.

pub mod config;
pub mod downloader;
pub mod errors;
pub mod hooks;
pub mod plugins;
pub mod processing;
pub mod security;
pub mod updater;
pub mod utils;

pub use config::AppConfig;
pub use downloader::aria2::{Aria2Client, ConnectionStatus};
pub use downloader::manager::DownloadManager;
pub use downloader::resolver::{MediaInfo, MediaResolver, YtDlpResolver};
pub use downloader::task::{DownloadTask, TaskSnapshot};
pub use downloader::{
    BackendMode, DownloadOptions, DownloadRequest, JobHandle, ProgressReporter, ProgressSample,
    ProgressSnapshot, TaskEvent, TaskState,
};
pub use errors::{AppError, Result};
pub use hooks::{HookBus, HookEvent, HookKind};
pub use plugins::{MenuAction, Plugin, PluginApi, PluginManager};
pub use processing::{MediaProcessor, ToolStatus};
pub use updater::{compare_versions, UpdateCheck, UpdateManifest, Updater};
