//! aria2c as a spawned process, progress scraped from its console output.

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use crate::downloader::{BackendMode, JobHandle, ProgressReporter, ProgressSample, TransferBackend, TransferJob};
use crate::errors::{AppError, Result};
use crate::utils::{first_line, run_output_with_timeout};
use super::Aria2Settings;

lazy_static! {
    static ref PERCENT: Regex = Regex::new(r"\(?(\d+(?:\.\d+)?)%").expect("valid percent regex");
    static ref SIZES: Regex =
        Regex::new(r"(\d+(?:\.\d+)?)([KMGT]i)?B/(\d+(?:\.\d+)?)([KMGT]i)?B").expect("valid size regex");
    static ref SPEED: Regex = Regex::new(r"DL:(\d+(?:\.\d+)?)([KMGT]i)?B").expect("valid speed regex");
    static ref ETA: Regex = Regex::new(r"ETA:((?:\d+[hms])+)").expect("valid eta regex");
    static ref ETA_PART: Regex = Regex::new(r"(\d+)([hms])").expect("valid eta part regex");
}

const VERSION_TIMEOUT_SECS: u64 = 10;

fn unit_bytes(value: &str, unit: Option<&str>) -> u64 {
    let multiplier: f64 = match unit {
        Some("Ki") => 1024.0,
        Some("Mi") => 1024.0 * 1024.0,
        Some("Gi") => 1024.0 * 1024.0 * 1024.0,
        Some("Ti") => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => 1.0,
    };
    value.parse::<f64>().map_or(0, |v| (v * multiplier) as u64)
}

/// Extracts progress from one aria2c summary line such as
/// `[#2089b0 400.0KiB/33.2MiB(1%) CN:1 DL:115.7KiB ETA:4m51s]`.
///
/// Returns `None` for lines without a percentage.
pub fn parse_progress_line(line: &str) -> Option<ProgressSample> {
    let caps = PERCENT.captures(line)?;
    let percent = caps[1].parse::<f64>().ok()?.floor().clamp(0.0, 100.0) as u8;

    let mut sample = ProgressSample::percent(percent);

    if let Some(sizes) = SIZES.captures(line) {
        sample.downloaded_bytes = unit_bytes(&sizes[1], sizes.get(2).map(|m| m.as_str()));
        sample.total_bytes = unit_bytes(&sizes[3], sizes.get(4).map(|m| m.as_str()));
    }
    if let Some(speed) = SPEED.captures(line) {
        sample.speed = unit_bytes(&speed[1], speed.get(2).map(|m| m.as_str()));
    }
    if let Some(eta) = ETA.captures(line) {
        let secs = ETA_PART.captures_iter(&eta[1]).fold(0u64, |acc, part| {
            let n: u64 = part[1].parse().unwrap_or(0);
            acc + match &part[2] {
                "h" => n * 3600,
                "m" => n * 60,
                _ => n,
            }
        });
        sample.eta = Some(secs);
    }

    Some(sample)
}

/// Runs each transfer as its own aria2c process.
pub struct CliBackend {
    settings: Aria2Settings,
}

impl CliBackend {
    pub fn new(settings: Aria2Settings) -> Self {
        Self { settings }
    }

    pub fn build_args(&self, job: &TransferJob) -> Vec<String> {
        let s = &self.settings;
        vec![
            "-x".to_string(),
            s.max_connections.to_string(),
            "-s".to_string(),
            s.split.to_string(),
            "-d".to_string(),
            job.directory.to_string_lossy().into_owned(),
            "-o".to_string(),
            job.filename.clone(),
            "--continue=true".to_string(),
            format!("--max-tries={}", s.max_tries),
            format!("--retry-wait={}", s.retry_wait),
            "--summary-interval=1".to_string(),
            job.url.clone(),
        ]
    }
}

fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
}

#[async_trait]
impl TransferBackend for CliBackend {
    fn mode(&self) -> BackendMode {
        BackendMode::Cli
    }

    async fn version(&self) -> Result<String> {
        let output = run_output_with_timeout(
            &self.settings.path,
            &["--version".to_string()],
            VERSION_TIMEOUT_SECS,
        )
        .await?;
        if !output.status.success() {
            return Err(AppError::Transfer(format!(
                "{} --version exited with {}",
                self.settings.path, output.status
            )));
        }
        first_line(&output.stdout)
            .ok_or_else(|| AppError::Transfer(format!("{} printed no version", self.settings.path)))
    }

    async fn download(
        &self,
        job: &TransferJob,
        reporter: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let args = self.build_args(job);
        log::info!("🚀 [ARIA2] Spawning {} {}", self.settings.path, args.join(" "));

        let mut child = Command::new(&self.settings.path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AppError::from_spawn(&self.settings.path, e))?;

        if let Some(pid) = child.id() {
            reporter.attached(JobHandle::Process(pid));
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, tx);
        }

        let mut last_line = String::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("Killing aria2c for {}", job.filename);
                    let _ = child.kill().await;
                    return Err(AppError::Cancelled);
                }
                line = rx.recv() => match line {
                    Some(line) => {
                        if let Some(sample) = parse_progress_line(&line) {
                            reporter.report(sample);
                        } else if !line.trim().is_empty() {
                            log::debug!("aria2c: {}", line);
                            last_line = line;
                        }
                    }
                    None => break,
                },
            }
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(AppError::Cancelled);
            }
            status = child.wait() => status?,
        };

        if status.success() {
            reporter.report(ProgressSample::finished());
            log::info!("✅ [ARIA2] aria2c finished {}", job.filename);
            return Ok(());
        }

        let code = status
            .code()
            .map_or_else(|| "signal".to_string(), |c| c.to_string());
        let detail = last_line.trim();
        Err(AppError::Transfer(if detail.is_empty() {
            format!("aria2c exited with code {}", code)
        } else {
            format!("aria2c exited with code {}: {}", code, detail)
        }))
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
