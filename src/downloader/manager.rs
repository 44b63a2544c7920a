use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use crate::config::AppConfig;
use crate::downloader::aria2::Aria2Client;
use crate::downloader::resolver::{MediaResolver, YtDlpResolver};
use crate::downloader::task::{DownloadTask, TaskDeps, TaskSnapshot};
use crate::downloader::{DownloadRequest, TaskEvent};
use crate::errors::{AppError, Result};
use crate::hooks::HookBus;
use crate::processing::MediaProcessor;
use crate::security::InputValidator;

const EVENT_CAPACITY: usize = 1024;

/// Owns every task for its lifetime and wires it to the shared client, the
/// hook bus and the display event channel.
pub struct DownloadManager {
    config: Arc<AppConfig>,
    deps: TaskDeps,
    validator: InputValidator,
    tasks: RwLock<Vec<Arc<DownloadTask>>>,
}

impl DownloadManager {
    pub fn new(
        config: Arc<AppConfig>,
        client: Arc<Aria2Client>,
        resolver: Arc<dyn MediaResolver>,
        hooks: Arc<HookBus>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let deps = TaskDeps {
            client,
            resolver,
            hooks,
            events,
            processor: Some(Arc::new(MediaProcessor::from_config(&config))),
            resolve_timeout: Duration::from_secs(config.resolve_timeout_secs.max(1)),
        };
        Self {
            config,
            deps,
            validator: InputValidator::new(),
            tasks: RwLock::new(Vec::new()),
        }
    }

    /// Wires the real aria2 client and yt-dlp resolver from `config`.
    pub fn from_config(config: Arc<AppConfig>, hooks: Arc<HookBus>) -> Result<Self> {
        let client = Arc::new(Aria2Client::from_config(&config)?);
        let resolver = Arc::new(YtDlpResolver::from_config(&config));
        Ok(Self::new(config, client, resolver, hooks))
    }

    pub fn with_processor(mut self, processor: Arc<MediaProcessor>) -> Self {
        self.deps.processor = Some(processor);
        self
    }

    pub fn config(&self) -> &Arc<AppConfig> {
        &self.config
    }

    pub fn client(&self) -> &Arc<Aria2Client> {
        &self.deps.client
    }

    pub fn hooks(&self) -> &Arc<HookBus> {
        &self.deps.hooks
    }

    /// Display-layer feed of every task's state, progress and outcome.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.deps.events.subscribe()
    }

    /// Creates and starts a task with the configured defaults.
    ///
    /// Returns as soon as the task is running; must be called inside a tokio
    /// runtime.
    pub fn add_download(&self, url: &str, directory: impl AsRef<Path>) -> Result<Arc<DownloadTask>> {
        let request = DownloadRequest::new(url, directory.as_ref(), &self.config);
        self.add_download_with(request)
    }

    pub fn add_download_with(&self, request: DownloadRequest) -> Result<Arc<DownloadTask>> {
        self.validator.validate_url(&request.url)?;
        self.validator.validate_download_path(&request.directory)?;

        let task = {
            let mut tasks = self.tasks.write();
            let limit = self.config.max_concurrent_downloads;
            if limit > 0 && tasks.iter().filter(|t| !t.is_terminal()).count() >= limit {
                log::warn!("Refusing {}: {} downloads already active", request.url, limit);
                return Err(AppError::LimitReached(limit));
            }
            let task = Arc::new(DownloadTask::new(request, self.deps.clone()));
            tasks.push(task.clone());
            task
        };

        task.start()?;
        Ok(task)
    }

    pub fn get_task(&self, task_id: &str) -> Option<Arc<DownloadTask>> {
        self.tasks.read().iter().find(|t| t.id() == task_id).cloned()
    }

    /// All tasks in insertion order.
    pub fn tasks(&self) -> Vec<Arc<DownloadTask>> {
        self.tasks.read().clone()
    }

    pub fn snapshots(&self) -> Vec<TaskSnapshot> {
        self.tasks.read().iter().map(|t| t.snapshot()).collect()
    }

    pub fn active_count(&self) -> usize {
        self.tasks.read().iter().filter(|t| !t.is_terminal()).count()
    }

    /// Detaches a task without cancelling it.
    pub fn remove(&self, task_id: &str) -> Option<Arc<DownloadTask>> {
        let mut tasks = self.tasks.write();
        let index = tasks.iter().position(|t| t.id() == task_id)?;
        Some(tasks.remove(index))
    }

    /// Drops every finished task, keeping running ones in order.
    pub fn clear_completed(&self) -> usize {
        let mut tasks = self.tasks.write();
        let before = tasks.len();
        tasks.retain(|t| !t.is_terminal());
        before - tasks.len()
    }

    pub fn clear_all(&self) -> usize {
        let mut tasks = self.tasks.write();
        let removed = tasks.len();
        tasks.clear();
        removed
    }

    pub fn cancel(&self, task_id: &str) -> Result<bool> {
        let task = self.require(task_id)?;
        Ok(task.cancel())
    }

    pub fn cancel_all(&self) -> usize {
        self.tasks().iter().filter(|t| t.cancel()).count()
    }

    /// Pauses the backend job. Only RPC jobs can be paused.
    pub async fn pause(&self, task_id: &str) -> Result<bool> {
        let task = self.require(task_id)?;
        match task.job_handle() {
            Some(handle) => Ok(self.deps.client.pause(&handle).await),
            None => Ok(false),
        }
    }

    pub async fn resume(&self, task_id: &str) -> Result<bool> {
        let task = self.require(task_id)?;
        match task.job_handle() {
            Some(handle) => Ok(self.deps.client.resume(&handle).await),
            None => Ok(false),
        }
    }

    fn require(&self, task_id: &str) -> Result<Arc<DownloadTask>> {
        self.get_task(task_id)
            .ok_or_else(|| AppError::NotFound(format!("download task {}", task_id)))
    }
}

impl std::fmt::Debug for DownloadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadManager")
            .field("tasks", &self.tasks.read().len())
            .field("client", &self.deps.client)
            .finish()
    }
}
