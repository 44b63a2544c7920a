//! One "fetch URL X into directory Y" unit of work.
//!
//! A task walks `Created -> ResolvingInfo -> ResolvingDirectUrl ->
//! Transferring -> Completed`, or drops into `Failed` / `Cancelled` from any
//! live state. All work after `start()` runs on its own tokio task; callers
//! only observe state through snapshots and the event channel.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use crate::downloader::aria2::Aria2Client;
use crate::downloader::resolver::{MediaInfo, MediaResolver};
use crate::downloader::{
    DownloadRequest, JobHandle, ProgressReporter, ProgressSample, ProgressSnapshot, TaskEvent, TaskState,
};
use crate::errors::{AppError, Result};
use crate::hooks::{HookBus, HookEvent};
use crate::processing::MediaProcessor;
use crate::utils::{ensure_dir_exists, generate_download_id, render_filename_template};

/// Shared collaborators handed to every task by the manager.
#[derive(Clone)]
pub struct TaskDeps {
    pub client: Arc<Aria2Client>,
    pub resolver: Arc<dyn MediaResolver>,
    pub hooks: Arc<HookBus>,
    pub events: broadcast::Sender<TaskEvent>,
    pub processor: Option<Arc<MediaProcessor>>,
    pub resolve_timeout: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub request: DownloadRequest,
    pub state: TaskState,
    pub progress: ProgressSnapshot,
    pub message: String,
    pub error: Option<String>,
    pub title: Option<String>,
    pub filename: Option<String>,
    pub job: Option<JobHandle>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

struct TaskInner {
    state: TaskState,
    progress: ProgressSnapshot,
    message: String,
    error: Option<String>,
    info: Option<MediaInfo>,
    filename: Option<String>,
    job: Option<JobHandle>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    /// Feeds this task's hook dispatcher; set while the worker runs.
    hook_tx: Option<mpsc::UnboundedSender<HookEvent>>,
}

pub struct DownloadTask {
    id: String,
    request: DownloadRequest,
    created_at: DateTime<Utc>,
    deps: TaskDeps,
    cancel: CancellationToken,
    inner: Mutex<TaskInner>,
}

impl DownloadTask {
    pub fn new(request: DownloadRequest, deps: TaskDeps) -> Self {
        Self {
            id: generate_download_id(),
            request,
            created_at: Utc::now(),
            deps,
            cancel: CancellationToken::new(),
            inner: Mutex::new(TaskInner {
                state: TaskState::Created,
                progress: ProgressSnapshot::default(),
                message: "Queued".to_string(),
                error: None,
                info: None,
                filename: None,
                job: None,
                started_at: None,
                finished_at: None,
                hook_tx: None,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn request(&self) -> &DownloadRequest {
        &self.request
    }

    pub fn directory(&self) -> &Path {
        &self.request.directory
    }

    pub fn state(&self) -> TaskState {
        self.inner.lock().state
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn job_handle(&self) -> Option<JobHandle> {
        self.inner.lock().job.clone()
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let inner = self.inner.lock();
        TaskSnapshot {
            id: self.id.clone(),
            request: self.request.clone(),
            state: inner.state,
            progress: inner.progress,
            message: inner.message.clone(),
            error: inner.error.clone(),
            title: inner.info.as_ref().map(|i| i.title.clone()),
            filename: inner.filename.clone(),
            job: inner.job.clone(),
            created_at: self.created_at,
            started_at: inner.started_at,
            finished_at: inner.finished_at,
        }
    }

    /// Moves to `ResolvingInfo`, emits `download-start` and spawns the worker.
    ///
    /// The returned handle resolves once the task is terminal and every hook
    /// it emitted has been delivered.
    pub fn start(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        if !self.transition(TaskState::ResolvingInfo, "Fetching media info".to_string()) {
            return Err(AppError::InvalidTransition {
                from: self.state().to_string(),
                to: TaskState::ResolvingInfo.to_string(),
            });
        }
        let (hook_tx, hook_rx) = mpsc::unbounded_channel();
        self.inner.lock().hook_tx = Some(hook_tx);
        let dispatcher = tokio::spawn(dispatch_hooks(self.deps.hooks.clone(), hook_rx));

        log::info!("Started download {} for {}", self.id, self.request.url);
        self.emit_hook(HookEvent::DownloadStart {
            url: self.request.url.clone(),
            directory: self.request.directory.clone(),
        });

        let task = Arc::clone(self);
        Ok(tokio::spawn(async move {
            Arc::clone(&task).run().await;
            // Closing the channel lets the dispatcher drain and exit.
            task.inner.lock().hook_tx = None;
            if let Err(e) = dispatcher.await {
                log::error!("Hook dispatcher for {} stopped: {}", task.id, e);
            }
        }))
    }

    /// Requests cancellation. Returns false if the task had already finished.
    ///
    /// A task that never started is cancelled on the spot; a running one
    /// notices at its next checkpoint.
    pub fn cancel(&self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.cancel.cancel();
        if self.state() == TaskState::Created {
            self.transition(TaskState::Cancelled, "Cancelled".to_string());
        }
        true
    }

    async fn run(self: Arc<Self>) {
        match self.execute().await {
            Ok(filename) if !self.cancel.is_cancelled() => self.finish_completed(filename),
            Ok(_) => self.finish_cancelled(),
            Err(e) if e.is_cancellation() || self.cancel.is_cancelled() => self.finish_cancelled(),
            Err(e) => self.finish_failed(e),
        }
    }

    async fn execute(&self) -> Result<String> {
        let url = self.request.url.as_str();
        let options = &self.request.options;

        let info = self
            .checkpoint(self.deps.resolver.fetch_info(url, options))
            .await?;
        log::info!("Resolved \"{}\" for {}", info.title, url);
        self.inner.lock().info = Some(info.clone());
        self.publish(TaskEvent::Info {
            task_id: self.id.clone(),
            info: info.clone(),
        });

        self.advance(TaskState::ResolvingDirectUrl, "Resolving media URL".to_string())?;
        let candidates = self
            .checkpoint(self.deps.resolver.resolve_direct_urls(url, options))
            .await?;
        let direct_url = pick_direct_url(url, candidates)?;

        let filename = self.output_filename(&info);
        ensure_dir_exists(&self.request.directory).await?;
        self.inner.lock().filename = Some(filename.clone());

        self.advance(TaskState::Transferring, format!("Downloading {}", filename))?;
        let reporter = TaskReporter { task: self };
        self.deps
            .client
            .download(&direct_url, &self.request.directory, &filename, &reporter, &self.cancel)
            .await?;

        self.post_process(&info, filename).await
    }

    /// Audio conversion when requested and the download is not already in
    /// the target format.
    async fn post_process(&self, info: &MediaInfo, filename: String) -> Result<String> {
        let options = &self.request.options;
        if !options.extract_audio || info.extension().eq_ignore_ascii_case(&options.audio_format) {
            return Ok(filename);
        }
        let Some(processor) = &self.deps.processor else {
            log::warn!("Audio extraction requested but no media processor is configured");
            return Ok(filename);
        };
        if self.cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        self.set_message(format!("Converting to {}", options.audio_format));
        let source = self.request.directory.join(&filename);
        let converted = self
            .cancellable(processor.convert_audio(
                &source,
                &options.audio_format,
                options.embed_metadata,
                options.embed_thumbnail,
            ))
            .await?;

        let name = converted
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or(filename);
        self.inner.lock().filename = Some(name.clone());
        Ok(name)
    }

    /// Runs `fut` until it finishes or the task is cancelled.
    async fn cancellable<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(AppError::Cancelled),
            res = fut => res,
        }
    }

    /// Like [`Self::cancellable`], also bounded by the resolve timeout.
    async fn checkpoint<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let bound = self.deps.resolve_timeout;
        self.cancellable(async move {
            tokio::time::timeout(bound, fut)
                .await
                .unwrap_or(Err(AppError::Timeout(bound.as_secs())))
        })
        .await
    }

    fn output_filename(&self, info: &MediaInfo) -> String {
        let mut fields = HashMap::new();
        fields.insert("title", info.title.clone());
        fields.insert("id", info.id.clone());
        fields.insert("ext", info.extension().to_string());
        if let Some(uploader) = &info.uploader {
            fields.insert("uploader", uploader.clone());
        }

        let template = if self.request.filename_template.trim().is_empty() {
            "%(title)s.%(ext)s"
        } else {
            self.request.filename_template.as_str()
        };
        let rendered = render_filename_template(template, &fields);
        if rendered.trim_matches('.').is_empty() {
            format!("download.{}", info.extension())
        } else {
            rendered
        }
    }

    fn advance(&self, next: TaskState, message: String) -> Result<()> {
        if self.transition(next, message) {
            return Ok(());
        }
        if self.cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        Err(AppError::InvalidTransition {
            from: self.state().to_string(),
            to: next.to_string(),
        })
    }

    /// Applies a state change if the machine allows it and publishes it.
    fn transition(&self, next: TaskState, message: String) -> bool {
        {
            let mut inner = self.inner.lock();
            if !inner.state.can_transition_to(next) {
                return false;
            }
            inner.state = next;
            inner.message = message.clone();
            let now = Utc::now();
            if next == TaskState::ResolvingInfo {
                inner.started_at = Some(now);
            }
            if next.is_terminal() {
                inner.finished_at = Some(now);
                inner.job = None;
            }
        }
        self.publish(TaskEvent::StateChanged {
            task_id: self.id.clone(),
            state: next,
            message,
        });
        true
    }

    fn set_message(&self, message: String) {
        self.inner.lock().message = message;
    }

    fn finish_completed(&self, filename: String) {
        {
            let mut inner = self.inner.lock();
            inner.filename = Some(filename.clone());
            if inner.state == TaskState::Transferring {
                inner.progress.percent = 100;
            }
        }
        if !self.transition(TaskState::Completed, "Completed".to_string()) {
            return;
        }
        log::info!("Completed download: {} -> {:?}", self.request.url, self.request.directory.join(&filename));

        self.publish(TaskEvent::Completed {
            task_id: self.id.clone(),
            directory: self.request.directory.clone(),
            filename: filename.clone(),
        });
        self.deliver_hook(HookEvent::Complete {
            url: self.request.url.clone(),
            directory: self.request.directory.clone(),
            filename,
        });
    }

    fn finish_failed(&self, error: AppError) {
        let message = error.to_string();
        self.inner.lock().error = Some(message.clone());
        if !self.transition(TaskState::Failed, format!("Failed: {}", message)) {
            return;
        }
        log::error!("Download failed for {}: {}", self.request.url, message);

        self.publish(TaskEvent::Failed {
            task_id: self.id.clone(),
            error: message.clone(),
        });
        self.deliver_hook(HookEvent::Error {
            url: self.request.url.clone(),
            error: message,
        });
    }

    fn finish_cancelled(&self) {
        if self.transition(TaskState::Cancelled, "Cancelled".to_string()) {
            log::info!("Download cancelled: {}", self.request.url);
        }
    }

    fn on_progress(&self, sample: ProgressSample) {
        if self.cancel.is_cancelled() {
            return;
        }
        let progress = {
            let mut inner = self.inner.lock();
            if inner.state != TaskState::Transferring {
                return;
            }
            let last = inner.progress.percent;
            // Unknown totals keep the last percent; lower readings never win.
            let percent = sample.percent.map_or(last, |p| p.min(100).max(last));
            inner.progress = ProgressSnapshot {
                percent,
                downloaded_bytes: sample.downloaded_bytes,
                total_bytes: sample.total_bytes,
                speed: sample.speed,
                eta: sample.eta,
            };
            inner.progress
        };

        self.publish(TaskEvent::Progress {
            task_id: self.id.clone(),
            progress,
        });
        self.emit_hook(HookEvent::Progress {
            url: self.request.url.clone(),
            percent: progress.percent,
        });
    }

    fn on_restart(&self) {
        log::info!("Transfer for {} restarting on another backend", self.request.url);
        let mut inner = self.inner.lock();
        inner.progress = ProgressSnapshot::default();
        inner.job = None;
    }

    fn on_attached(&self, handle: JobHandle) {
        log::debug!("Task {} attached to {}", self.id, handle);
        let mut inner = self.inner.lock();
        if !inner.state.is_terminal() {
            inner.job = Some(handle);
        }
    }

    /// Start and progress hooks stop once cancellation was requested.
    fn emit_hook(&self, event: HookEvent) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.deliver_hook(event);
    }

    /// Queues `event` for this task's dispatcher; never waits on handlers.
    fn deliver_hook(&self, event: HookEvent) {
        if let Some(tx) = &self.inner.lock().hook_tx {
            let _ = tx.send(event);
        }
    }

    fn publish(&self, event: TaskEvent) {
        // No subscribers is fine.
        let _ = self.deps.events.send(event);
    }
}

impl std::fmt::Debug for DownloadTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadTask")
            .field("id", &self.id)
            .field("url", &self.request.url)
            .field("state", &self.state())
            .finish()
    }
}

/// Runs hooks one at a time, in emission order, away from the transfer loop.
async fn dispatch_hooks(hooks: Arc<HookBus>, mut rx: mpsc::UnboundedReceiver<HookEvent>) {
    while let Some(event) = rx.recv().await {
        let hooks = hooks.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || hooks.call_hook(&event)).await {
            log::error!("Hook delivery failed: {}", e);
        }
    }
}

/// The first candidate is dispatched. yt-dlp lists one URL per stream, so
/// extra candidates mean a split video/audio format that aria2 cannot merge.
fn pick_direct_url(url: &str, candidates: Vec<String>) -> Result<String> {
    if candidates.len() > 1 {
        log::warn!(
            "yt-dlp returned {} streams for {}; only the first is downloaded. \
             Use a single-file format such as `best` to keep audio and video together",
            candidates.len(),
            url
        );
    }
    candidates
        .into_iter()
        .next()
        .ok_or_else(|| AppError::Resolution(format!("no direct URL for {}", url)))
}

struct TaskReporter<'a> {
    task: &'a DownloadTask,
}

impl ProgressReporter for TaskReporter<'_> {
    fn report(&self, sample: ProgressSample) {
        self.task.on_progress(sample);
    }

    fn attached(&self, handle: JobHandle) {
        self.task.on_attached(handle);
    }

    fn restarted(&self) {
        self.task.on_restart();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::downloader::{BackendMode, TransferBackend, TransferJob};
    use crate::downloader::DownloadOptions;
    use crate::hooks::HookKind;
    use async_trait::async_trait;

    struct StaticResolver {
        fail_info: bool,
    }

    #[async_trait]
    impl MediaResolver for StaticResolver {
        async fn fetch_info(&self, _url: &str, _options: &DownloadOptions) -> Result<MediaInfo> {
            if self.fail_info {
                return Err(AppError::Resolution("Unsupported URL".to_string()));
            }
            Ok(MediaInfo {
                id: "abc".to_string(),
                title: "My Video".to_string(),
                ext: Some("mp4".to_string()),
                ..MediaInfo::default()
            })
        }

        async fn resolve_direct_urls(&self, _url: &str, _options: &DownloadOptions) -> Result<Vec<String>> {
            Ok(vec!["https://cdn.example/v.mp4".to_string()])
        }
    }

    /// Reports a fixed series of percents, optionally hanging until cancelled.
    struct ScriptedBackend {
        percents: Vec<Option<u8>>,
        hang: bool,
    }

    #[async_trait]
    impl TransferBackend for ScriptedBackend {
        fn mode(&self) -> BackendMode {
            BackendMode::Cli
        }

        async fn version(&self) -> Result<String> {
            Ok("test".to_string())
        }

        async fn download(
            &self,
            _job: &TransferJob,
            reporter: &dyn ProgressReporter,
            cancel: &CancellationToken,
        ) -> Result<()> {
            reporter.attached(JobHandle::Process(4242));
            for p in &self.percents {
                reporter.report(ProgressSample {
                    percent: *p,
                    ..ProgressSample::default()
                });
            }
            if self.hang {
                cancel.cancelled().await;
                return Err(AppError::Cancelled);
            }
            reporter.report(ProgressSample::finished());
            Ok(())
        }

        async fn pause(&self, _handle: &JobHandle) -> bool {
            false
        }

        async fn resume(&self, _handle: &JobHandle) -> bool {
            false
        }

        async fn remove(&self, _handle: &JobHandle) -> bool {
            false
        }
    }

    fn recorded_hooks(hooks: &HookBus) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        for kind in HookKind::ALL {
            let seen = seen.clone();
            hooks.register(kind, move |event| {
                let label = match event {
                    HookEvent::Progress { percent, .. } => format!("progress:{}", percent),
                    other => other.kind().name().to_string(),
                };
                seen.lock().push(label);
                Ok(())
            });
        }
        seen
    }

    fn task_with(
        dir: &Path,
        resolver: StaticResolver,
        backend: ScriptedBackend,
    ) -> (Arc<DownloadTask>, Arc<Mutex<Vec<String>>>, broadcast::Receiver<TaskEvent>) {
        let backend: Arc<dyn TransferBackend> = Arc::new(backend);
        let client = Arc::new(Aria2Client::new(backend.clone(), backend, false));
        let hooks = Arc::new(HookBus::new());
        let seen = recorded_hooks(&hooks);
        let (events, rx) = broadcast::channel(64);
        let deps = TaskDeps {
            client,
            resolver: Arc::new(resolver),
            hooks,
            events,
            processor: None,
            resolve_timeout: Duration::from_secs(5),
        };
        let request = DownloadRequest::new("https://example/video", dir, &AppConfig::default());
        (Arc::new(DownloadTask::new(request, deps)), seen, rx)
    }

    #[tokio::test]
    async fn successful_run_reaches_completed() {
        let dir = tempfile::tempdir().unwrap();
        let (task, hooks, mut rx) = task_with(
            dir.path(),
            StaticResolver { fail_info: false },
            ScriptedBackend { percents: vec![Some(10), None, Some(5), Some(60)], hang: false },
        );

        task.start().unwrap().await.unwrap();

        let snap = task.snapshot();
        assert_eq!(snap.state, TaskState::Completed);
        assert_eq!(snap.filename.as_deref(), Some("My Video.mp4"));
        assert_eq!(snap.progress.percent, 100);
        assert!(snap.job.is_none());
        assert_eq!(
            *hooks.lock(),
            vec![
                "download-start", "progress:10", "progress:10", "progress:10", "progress:60",
                "progress:100", "complete",
            ]
        );

        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let TaskEvent::StateChanged { state, .. } = event {
                states.push(state);
            }
        }
        assert_eq!(
            states,
            vec![
                TaskState::ResolvingInfo,
                TaskState::ResolvingDirectUrl,
                TaskState::Transferring,
                TaskState::Completed,
            ]
        );
    }

    #[tokio::test]
    async fn resolution_failure_emits_error_only() {
        let dir = tempfile::tempdir().unwrap();
        let (task, hooks, _rx) = task_with(
            dir.path(),
            StaticResolver { fail_info: true },
            ScriptedBackend { percents: vec![], hang: false },
        );

        task.start().unwrap().await.unwrap();

        let snap = task.snapshot();
        assert_eq!(snap.state, TaskState::Failed);
        assert!(snap.error.unwrap().contains("Unsupported URL"));
        assert_eq!(*hooks.lock(), vec!["download-start", "error"]);
    }

    #[tokio::test]
    async fn cancel_mid_transfer_suppresses_complete() {
        let dir = tempfile::tempdir().unwrap();
        let (task, hooks, _rx) = task_with(
            dir.path(),
            StaticResolver { fail_info: false },
            ScriptedBackend { percents: vec![Some(30)], hang: true },
        );

        let worker = task.start().unwrap();
        while task.state() != TaskState::Transferring || task.job_handle().is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(task.cancel());
        worker.await.unwrap();

        assert_eq!(task.state(), TaskState::Cancelled);
        assert!(task.job_handle().is_none());
        let seen = hooks.lock();
        assert!(!seen.iter().any(|h| h == "complete" || h == "error"));
        assert!(!task.cancel());
    }

    #[tokio::test]
    async fn cancel_before_start_is_immediate() {
        let dir = tempfile::tempdir().unwrap();
        let (task, hooks, _rx) = task_with(
            dir.path(),
            StaticResolver { fail_info: false },
            ScriptedBackend { percents: vec![], hang: false },
        );

        assert!(task.cancel());
        assert_eq!(task.state(), TaskState::Cancelled);
        assert!(matches!(task.start(), Err(AppError::InvalidTransition { .. })));
        assert!(hooks.lock().is_empty());
    }

    #[tokio::test]
    async fn restart_resets_percent() {
        let dir = tempfile::tempdir().unwrap();
        let (task, _hooks, _rx) = task_with(
            dir.path(),
            StaticResolver { fail_info: false },
            ScriptedBackend { percents: vec![], hang: false },
        );
        task.inner.lock().state = TaskState::Transferring;

        task.on_progress(ProgressSample::percent(40));
        task.on_progress(ProgressSample::percent(20));
        assert_eq!(task.snapshot().progress.percent, 40);

        task.on_restart();
        task.on_progress(ProgressSample::percent(5));
        assert_eq!(task.snapshot().progress.percent, 5);
    }

    #[tokio::test]
    async fn slow_hooks_do_not_stall_the_worker() {
        let dir = tempfile::tempdir().unwrap();
        let (task, hooks, _rx) = task_with(
            dir.path(),
            StaticResolver { fail_info: false },
            ScriptedBackend { percents: vec![Some(10), Some(20), Some(30)], hang: false },
        );
        task.deps.hooks.register(HookKind::Progress, |_| {
            std::thread::sleep(Duration::from_millis(150));
            Ok(())
        });

        let started = std::time::Instant::now();
        let worker = task.start().unwrap();
        while !task.is_terminal() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert!(started.elapsed() < Duration::from_millis(400), "{:?}", started.elapsed());
        assert_eq!(task.state(), TaskState::Completed);

        // The worker handle resolves after the last hook was delivered.
        worker.await.unwrap();
        assert_eq!(
            *hooks.lock(),
            vec!["download-start", "progress:10", "progress:20", "progress:30", "progress:100", "complete"]
        );
    }

    #[test]
    fn first_direct_url_is_dispatched() {
        let urls = vec!["https://cdn/v.mp4".to_string(), "https://cdn/a.m4a".to_string()];
        assert_eq!(pick_direct_url("https://example/video", urls).unwrap(), "https://cdn/v.mp4");
        assert!(matches!(
            pick_direct_url("https://example/video", Vec::new()),
            Err(AppError::Resolution(_))
        ));
    }

    #[tokio::test]
    async fn template_fields_are_rendered() {
        let dir = tempfile::tempdir().unwrap();
        let (task, _hooks, _rx) = task_with(
            dir.path(),
            StaticResolver { fail_info: false },
            ScriptedBackend { percents: vec![], hang: false },
        );
        let info = MediaInfo {
            id: "xyz".to_string(),
            title: "A/B".to_string(),
            uploader: Some("Chan".to_string()),
            ext: Some("webm".to_string()),
            ..MediaInfo::default()
        };
        assert_eq!(task.output_filename(&info), "A_B.webm");

        let custom = DownloadTask::new(
            task.request().clone().with_template("%(uploader)s - %(title)s [%(id)s].%(ext)s"),
            task.deps.clone(),
        );
        assert_eq!(custom.output_filename(&info), "Chan - A_B [xyz].webm");
    }
}
