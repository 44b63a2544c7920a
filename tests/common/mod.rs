#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use ytdlp_gui::downloader::strategies::{Aria2Settings, RpcTransport};
use ytdlp_gui::{
    AppConfig, AppError, Aria2Client, DownloadManager, DownloadOptions, DownloadTask, HookBus, HookEvent,
    HookKind, MediaInfo, MediaResolver, Result, TaskState,
};

/// In-memory aria2 daemon.
pub struct FakeDaemon {
    accept: bool,
    statuses: Mutex<VecDeque<Value>>,
    idle_status: Value,
    calls: Mutex<Vec<String>>,
}

impl FakeDaemon {
    /// Accepts jobs and replays `statuses`, then repeats the last one.
    pub fn accepting(statuses: Vec<Value>) -> Arc<Self> {
        let idle_status = statuses
            .last()
            .cloned()
            .unwrap_or_else(|| json!({"status": "active", "completedLength": "0", "totalLength": "0"}));
        Arc::new(Self {
            accept: true,
            statuses: Mutex::new(statuses.into()),
            idle_status,
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Answers add-uri without a gid.
    pub fn refusing() -> Arc<Self> {
        Arc::new(Self {
            accept: false,
            statuses: Mutex::new(VecDeque::new()),
            idle_status: Value::Null,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls_to(&self, method: &str) -> usize {
        self.calls.lock().iter().filter(|m| m.as_str() == method).count()
    }
}

#[async_trait]
impl RpcTransport for FakeDaemon {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        self.calls.lock().push(method.to_string());
        match method {
            "aria2.getVersion" => Ok(json!({"version": "1.37.0"})),
            "aria2.addUri" if self.accept => Ok(json!("2089b05ecca3d829")),
            "aria2.addUri" => Ok(Value::Null),
            "aria2.tellStatus" => Ok(self
                .statuses
                .lock()
                .pop_front()
                .unwrap_or_else(|| self.idle_status.clone())),
            "aria2.pause" | "aria2.unpause" | "aria2.remove" => {
                params.first().cloned().ok_or_else(|| AppError::Rpc("missing gid".to_string()))
            }
            other => Err(AppError::Rpc(format!("unexpected method {}", other))),
        }
    }
}

/// Resolver that answers without running yt-dlp.
pub struct FakeResolver {
    pub title: String,
}

#[async_trait]
impl MediaResolver for FakeResolver {
    async fn fetch_info(&self, _url: &str, _options: &DownloadOptions) -> Result<MediaInfo> {
        Ok(MediaInfo {
            id: "vid123".to_string(),
            title: self.title.clone(),
            ext: Some("mp4".to_string()),
            ..MediaInfo::default()
        })
    }

    async fn resolve_direct_urls(&self, _url: &str, _options: &DownloadOptions) -> Result<Vec<String>> {
        Ok(vec!["https://cdn.example/media/vid123.mp4".to_string()])
    }
}

pub fn settings(aria2c_path: &str) -> Aria2Settings {
    Aria2Settings {
        path: aria2c_path.to_string(),
        use_rpc: true,
        poll_interval: Duration::from_millis(5),
        ..Aria2Settings::default()
    }
}

pub fn manager_with(daemon: Arc<FakeDaemon>, aria2c_path: &str) -> (DownloadManager, Arc<HookBus>) {
    let mut config = AppConfig::default();
    config.max_concurrent_downloads = 0;
    let client = Arc::new(Aria2Client::with_transport(settings(aria2c_path), daemon));
    let hooks = Arc::new(HookBus::new());
    let manager = DownloadManager::new(
        Arc::new(config),
        client,
        Arc::new(FakeResolver {
            title: "Example Video".to_string(),
        }),
        hooks.clone(),
    );
    (manager, hooks)
}

pub fn record_hooks(hooks: &HookBus) -> Arc<Mutex<Vec<HookEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    for kind in HookKind::ALL {
        let seen = seen.clone();
        hooks.register(kind, move |event| {
            seen.lock().push(event.clone());
            Ok(())
        });
    }
    seen
}

pub async fn wait_for_state(task: &DownloadTask, wanted: TaskState) {
    for _ in 0..1000 {
        if task.state() == wanted {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("task stuck in {} waiting for {}", task.state(), wanted);
}

pub async fn wait_until_terminal(task: &DownloadTask) -> TaskState {
    for _ in 0..1000 {
        if task.is_terminal() {
            return task.state();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("task never finished, stuck in {}", task.state());
}

/// Hooks are delivered off the worker, so wait until `done` holds.
pub async fn wait_for_hooks<F>(seen: &Mutex<Vec<HookEvent>>, done: F)
where
    F: Fn(&[HookEvent]) -> bool,
{
    for _ in 0..1000 {
        if done(&seen.lock()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("hooks never arrived: {:?}", seen.lock());
}

pub fn count_kind(events: &[HookEvent], kind: HookKind) -> usize {
    events.iter().filter(|e| e.kind() == kind).count()
}

/// Checks that hook events form a prefix of `start, progress*, (complete | error)`.
pub fn assert_lifecycle_order(events: &[HookEvent]) {
    let mut iter = events.iter().peekable();
    if let Some(first) = iter.next() {
        assert_eq!(first.kind(), HookKind::DownloadStart, "first event must be download-start");
    }
    while let Some(event) = iter.next() {
        match event.kind() {
            HookKind::Progress => {}
            HookKind::Complete | HookKind::Error => {
                assert!(iter.peek().is_none(), "terminal event must be last");
            }
            HookKind::DownloadStart => panic!("download-start repeated"),
        }
    }
}

#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> String {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}
