//! aria2 daemon control over JSON-RPC.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use crate::downloader::{BackendMode, JobHandle, ProgressReporter, ProgressSample, TransferBackend, TransferJob};
use crate::errors::{AppError, Result};
use super::Aria2Settings;

const RPC_ID: &str = "ytdlp-gui";

/// Carries one aria2 method call to the daemon and returns its `result`.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value>;
}

pub struct HttpRpcTransport {
    client: reqwest::Client,
    url: String,
    secret: Option<String>,
}

impl HttpRpcTransport {
    pub fn new(settings: &Aria2Settings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.rpc_timeout)
            .build()?;
        Ok(Self {
            client,
            url: settings.rpc_url.clone(),
            secret: settings.rpc_secret.clone(),
        })
    }

    fn payload(&self, method: &str, params: Vec<Value>) -> Value {
        let mut all = Vec::with_capacity(params.len() + 1);
        if let Some(secret) = &self.secret {
            all.push(Value::String(format!("token:{}", secret)));
        }
        all.extend(params);
        json!({
            "jsonrpc": "2.0",
            "id": RPC_ID,
            "method": method,
            "params": all,
        })
    }
}

#[async_trait]
impl RpcTransport for HttpRpcTransport {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let body = self.payload(method, params);
        let response: Value = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        if let Some(error) = response.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(AppError::Rpc(format!("{} failed: {}", method, message)));
        }

        response
            .get("result")
            .cloned()
            .ok_or_else(|| AppError::Rpc(format!("{} returned no result", method)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusReply {
    status: String,
    #[serde(default)]
    completed_length: Option<String>,
    #[serde(default)]
    total_length: Option<String>,
    #[serde(default)]
    download_speed: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

impl StatusReply {
    fn sample(&self) -> ProgressSample {
        let parse = |v: &Option<String>| v.as_deref().and_then(|s| s.parse::<u64>().ok()).unwrap_or(0);
        let completed = parse(&self.completed_length);
        let total = parse(&self.total_length);
        let speed = parse(&self.download_speed);
        let eta = (speed > 0 && total > completed).then(|| (total - completed) / speed);
        ProgressSample {
            percent: ProgressSample::percent_of(completed, total),
            downloaded_bytes: completed,
            total_bytes: total,
            speed,
            eta,
        }
    }
}

/// Transfers through a running aria2 daemon.
pub struct RpcBackend {
    transport: Arc<dyn RpcTransport>,
    settings: Aria2Settings,
}

impl RpcBackend {
    pub fn new(transport: Arc<dyn RpcTransport>, settings: Aria2Settings) -> Self {
        Self { transport, settings }
    }

    fn add_options(&self, job: &TransferJob) -> Value {
        json!({
            "dir": job.directory.to_string_lossy(),
            "out": job.filename,
            "max-connection-per-server": self.settings.max_connections.to_string(),
            "split": self.settings.split.to_string(),
            "continue": "true",
            "max-tries": self.settings.max_tries.to_string(),
            "retry-wait": self.settings.retry_wait.to_string(),
        })
    }

    async fn add_uri(&self, job: &TransferJob) -> Result<String> {
        let result = self
            .transport
            .call("aria2.addUri", vec![json!([job.url]), self.add_options(job)])
            .await?;
        match result.as_str() {
            Some(gid) if !gid.is_empty() => Ok(gid.to_string()),
            _ => Err(AppError::Rpc(format!("aria2.addUri returned no gid: {}", result))),
        }
    }

    async fn tell_status(&self, gid: &str) -> Result<StatusReply> {
        let result = self
            .transport
            .call("aria2.tellStatus", vec![json!(gid)])
            .await?;
        serde_json::from_value(result)
            .map_err(|e| AppError::Rpc(format!("malformed status for {}: {}", gid, e)))
    }

    /// Sends a gid-only command; aria2 echoes the gid on success.
    async fn gid_command(&self, method: &str, handle: &JobHandle) -> bool {
        let JobHandle::Rpc(gid) = handle else {
            return false;
        };
        match self.transport.call(method, vec![json!(gid)]).await {
            Ok(result) => result.as_str() == Some(gid.as_str()),
            Err(e) => {
                log::warn!("{} failed for {}: {}", method, gid, e);
                false
            }
        }
    }
}

#[async_trait]
impl TransferBackend for RpcBackend {
    fn mode(&self) -> BackendMode {
        BackendMode::Rpc
    }

    async fn version(&self) -> Result<String> {
        let result = self.transport.call("aria2.getVersion", vec![]).await?;
        result
            .get("version")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AppError::Rpc("aria2.getVersion returned no version".to_string()))
    }

    async fn download(
        &self,
        job: &TransferJob,
        reporter: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let gid = self
            .add_uri(job)
            .await
            .map_err(|e| AppError::Dispatch(e.to_string()))?;
        log::info!("📥 [ARIA2] RPC job {} added for {}", gid, job.filename);
        let handle = JobHandle::Rpc(gid.clone());
        reporter.attached(handle.clone());

        loop {
            if cancel.is_cancelled() {
                self.gid_command("aria2.remove", &handle).await;
                return Err(AppError::Cancelled);
            }

            let status = self
                .tell_status(&gid)
                .await
                .map_err(|e| AppError::Transfer(format!("lost track of job {}: {}", gid, e)))?;

            match status.status.as_str() {
                "complete" => {
                    let sample = status.sample();
                    reporter.report(ProgressSample { percent: Some(100), ..sample });
                    log::info!("✅ [ARIA2] RPC job {} complete", gid);
                    return Ok(());
                }
                "error" => {
                    let detail = status.error_message.unwrap_or_else(|| "unknown error".to_string());
                    return Err(AppError::Transfer(format!("aria2 reported an error: {}", detail)));
                }
                "removed" => {
                    return Err(AppError::Transfer(format!("job {} was removed from aria2", gid)));
                }
                _ => reporter.report(status.sample()),
            }

            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }
    }

    async fn pause(&self, handle: &JobHandle) -> bool {
        self.gid_command("aria2.pause", handle).await
    }

    async fn resume(&self, handle: &JobHandle) -> bool {
        self.gid_command("aria2.unpause", handle).await
    }

    async fn remove(&self, handle: &JobHandle) -> bool {
        self.gid_command("aria2.remove", handle).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::time::Duration;

    /// Replays scripted `tellStatus` replies and records every call.
    #[derive(Default)]
    struct ScriptedDaemon {
        add_reply: Mutex<Option<Result<Value>>>,
        statuses: Mutex<VecDeque<Value>>,
        calls: Mutex<Vec<(String, Vec<Value>)>>,
    }

    impl ScriptedDaemon {
        fn accepting(statuses: Vec<Value>) -> Arc<Self> {
            Arc::new(Self {
                add_reply: Mutex::new(Some(Ok(json!("2089b05ecca3d829")))),
                statuses: Mutex::new(statuses.into()),
                ..Self::default()
            })
        }

        fn methods(&self) -> Vec<String> {
            self.calls.lock().iter().map(|(m, _)| m.clone()).collect()
        }
    }

    #[async_trait]
    impl RpcTransport for ScriptedDaemon {
        async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
            self.calls.lock().push((method.to_string(), params.clone()));
            match method {
                "aria2.addUri" => self
                    .add_reply
                    .lock()
                    .take()
                    .unwrap_or_else(|| Err(AppError::Rpc("connection refused".into()))),
                "aria2.tellStatus" => Ok(self
                    .statuses
                    .lock()
                    .pop_front()
                    .unwrap_or_else(|| json!({"status": "active", "completedLength": "0", "totalLength": "0"}))),
                "aria2.getVersion" => Ok(json!({"version": "1.37.0"})),
                _ => Ok(params.first().cloned().unwrap_or(Value::Null)),
            }
        }
    }

    fn settings() -> Aria2Settings {
        Aria2Settings {
            poll_interval: Duration::from_millis(5),
            ..Aria2Settings::default()
        }
    }

    fn job() -> TransferJob {
        TransferJob {
            url: "https://cdn.example/v.mp4".to_string(),
            directory: PathBuf::from("/tmp/out"),
            filename: "Title.mp4".to_string(),
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<Option<u8>>>>, impl Fn(ProgressSample) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |s: ProgressSample| sink.lock().push(s.percent))
    }

    #[test]
    fn secret_is_prepended_as_token() {
        let mut s = settings();
        s.rpc_secret = Some("abc".to_string());
        let transport = HttpRpcTransport::new(&s).unwrap();
        let payload = transport.payload("aria2.tellStatus", vec![json!("gid1")]);
        assert_eq!(payload["params"], json!(["token:abc", "gid1"]));
        assert_eq!(payload["jsonrpc"], "2.0");

        s.rpc_secret = None;
        let transport = HttpRpcTransport::new(&s).unwrap();
        assert_eq!(transport.payload("aria2.getVersion", vec![])["params"], json!([]));
    }

    #[tokio::test]
    async fn polls_until_complete() {
        let daemon = ScriptedDaemon::accepting(vec![
            json!({"status": "active", "completedLength": "0", "totalLength": "0"}),
            json!({"status": "active", "completedLength": "250", "totalLength": "1000", "downloadSpeed": "250"}),
            json!({"status": "complete", "completedLength": "1000", "totalLength": "1000"}),
        ]);
        let backend = RpcBackend::new(daemon.clone(), settings());
        let (seen, reporter) = recorder();

        backend.download(&job(), &reporter, &CancellationToken::new()).await.unwrap();

        assert_eq!(*seen.lock(), vec![None, Some(25), Some(100)]);
        let calls = daemon.calls.lock();
        let options = &calls[0].1[1];
        assert_eq!(options["dir"], "/tmp/out");
        assert_eq!(options["out"], "Title.mp4");
        assert_eq!(options["continue"], "true");
        assert_eq!(options["max-tries"], "5");
        assert_eq!(options["retry-wait"], "3");
        assert_eq!(options["split"], "16");
    }

    #[tokio::test]
    async fn add_failure_is_a_dispatch_error() {
        let daemon = Arc::new(ScriptedDaemon {
            add_reply: Mutex::new(Some(Ok(Value::Null))),
            ..ScriptedDaemon::default()
        });
        let backend = RpcBackend::new(daemon, settings());
        let (_, reporter) = recorder();
        let err = backend.download(&job(), &reporter, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, AppError::Dispatch(_)));
    }

    #[tokio::test]
    async fn error_status_stops_without_forcing_100() {
        let daemon = ScriptedDaemon::accepting(vec![
            json!({"status": "active", "completedLength": "10", "totalLength": "100"}),
            json!({"status": "error", "errorMessage": "404 Not Found"}),
        ]);
        let backend = RpcBackend::new(daemon, settings());
        let (seen, reporter) = recorder();

        let err = backend.download(&job(), &reporter, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, AppError::Transfer(ref m) if m.contains("404")));
        assert_eq!(*seen.lock(), vec![Some(10)]);
    }

    #[tokio::test]
    async fn malformed_status_ends_polling() {
        let daemon = ScriptedDaemon::accepting(vec![json!({"unexpected": true})]);
        let backend = RpcBackend::new(daemon, settings());
        let (_, reporter) = recorder();
        let err = backend.download(&job(), &reporter, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, AppError::Transfer(_)));
    }

    #[tokio::test]
    async fn cancellation_removes_the_job() {
        let daemon = ScriptedDaemon::accepting(vec![]);
        let backend = RpcBackend::new(daemon.clone(), settings());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let (_, reporter) = recorder();
        let err = backend.download(&job(), &reporter, &cancel).await.unwrap_err();
        assert!(err.is_cancellation());
        assert_eq!(daemon.methods().last().map(String::as_str), Some("aria2.remove"));
    }

    #[tokio::test]
    async fn gid_commands_require_an_echo() {
        let daemon = ScriptedDaemon::accepting(vec![]);
        let backend = RpcBackend::new(daemon, settings());
        let handle = JobHandle::Rpc("2089b05ecca3d829".to_string());
        assert!(backend.pause(&handle).await);
        assert!(backend.resume(&handle).await);
        assert!(!backend.pause(&JobHandle::Process(42)).await);
        assert_eq!(backend.version().await.unwrap(), "1.37.0");
    }
}
