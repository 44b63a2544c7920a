use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use crate::config::AppConfig;
use crate::downloader::strategies::{Aria2Settings, CliBackend, HttpRpcTransport, RpcBackend, RpcTransport};
use crate::downloader::{BackendMode, JobHandle, ProgressReporter, TransferBackend, TransferJob};
use crate::errors::{AppError, Result};

/// Outcome of [`Aria2Client::check_connection`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStatus {
    pub success: bool,
    pub mode: BackendMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Accelerated-downloader client shared by every task.
///
/// Prefers the RPC daemon. The first time the daemon refuses a job the client
/// switches to spawning aria2c for the rest of its life; it never switches back.
pub struct Aria2Client {
    rpc: Arc<dyn TransferBackend>,
    cli: Arc<dyn TransferBackend>,
    use_rpc: AtomicBool,
}

impl Aria2Client {
    pub fn new(rpc: Arc<dyn TransferBackend>, cli: Arc<dyn TransferBackend>, use_rpc: bool) -> Self {
        Self {
            rpc,
            cli,
            use_rpc: AtomicBool::new(use_rpc),
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let settings = Aria2Settings::from_config(config);
        let transport = Arc::new(HttpRpcTransport::new(&settings)?);
        Ok(Self::with_transport(settings, transport))
    }

    /// Builds both backends over an explicit RPC transport.
    pub fn with_transport(settings: Aria2Settings, transport: Arc<dyn RpcTransport>) -> Self {
        let use_rpc = settings.use_rpc;
        Self::new(
            Arc::new(RpcBackend::new(transport, settings.clone())),
            Arc::new(CliBackend::new(settings)),
            use_rpc,
        )
    }

    pub fn mode(&self) -> BackendMode {
        if self.uses_rpc() {
            BackendMode::Rpc
        } else {
            BackendMode::Cli
        }
    }

    pub fn uses_rpc(&self) -> bool {
        self.use_rpc.load(Ordering::Acquire)
    }

    /// Returns true only for the call that actually flipped the mode.
    fn downgrade(&self, reason: &str) -> bool {
        let flipped = self
            .use_rpc
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if flipped {
            log::warn!("⚠️ [ARIA2] RPC unavailable ({}); switching to CLI mode", reason);
        }
        flipped
    }

    fn active(&self) -> &Arc<dyn TransferBackend> {
        if self.uses_rpc() {
            &self.rpc
        } else {
            &self.cli
        }
    }

    /// Never fails; problems come back as `success: false`.
    pub async fn check_connection(&self) -> ConnectionStatus {
        let backend = self.active();
        let mode = backend.mode();
        match backend.version().await {
            Ok(version) => ConnectionStatus {
                success: true,
                mode,
                version: Some(version),
                error: None,
            },
            Err(e) => {
                log::warn!("aria2 connection check failed ({}): {}", mode, e);
                ConnectionStatus {
                    success: false,
                    mode,
                    version: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    pub async fn download(
        &self,
        url: &str,
        directory: &Path,
        filename: &str,
        reporter: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let job = TransferJob {
            url: url.to_string(),
            directory: directory.to_path_buf(),
            filename: filename.to_string(),
        };

        if self.uses_rpc() {
            match self.rpc.download(&job, reporter, cancel).await {
                Err(AppError::Dispatch(reason)) => {
                    self.downgrade(&reason);
                    if cancel.is_cancelled() {
                        return Err(AppError::Cancelled);
                    }
                    reporter.restarted();
                }
                other => return other,
            }
        }

        self.cli.download(&job, reporter, cancel).await
    }

    pub async fn pause(&self, handle: &JobHandle) -> bool {
        self.uses_rpc() && self.rpc.pause(handle).await
    }

    pub async fn resume(&self, handle: &JobHandle) -> bool {
        self.uses_rpc() && self.rpc.resume(handle).await
    }

    pub async fn remove(&self, handle: &JobHandle) -> bool {
        self.uses_rpc() && self.rpc.remove(handle).await
    }
}

impl std::fmt::Debug for Aria2Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aria2Client").field("mode", &self.mode()).finish()
    }
}
