use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use lazy_static::lazy_static;
use regex::Regex;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use crate::errors::{AppError, Result};
use log::info;

lazy_static! {
    static ref TEMPLATE_FIELD: Regex = Regex::new(r"%\((\w+)\)s").expect("valid template regex");
}

/// Sanitizes a filename by removing invalid characters
pub fn sanitize_filename(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    cleaned.trim().trim_end_matches('.').to_string()
}

/// Renders a yt-dlp style output template (`%(title)s.%(ext)s`).
///
/// Field values are sanitized; unknown fields render as `NA` like yt-dlp does.
pub fn render_filename_template(template: &str, fields: &HashMap<&str, String>) -> String {
    let rendered = TEMPLATE_FIELD.replace_all(template, |caps: &regex::Captures| {
        let value = fields
            .get(&caps[1])
            .map(|v| sanitize_filename(v))
            .filter(|v| !v.is_empty());
        value.unwrap_or_else(|| "NA".to_string())
    });
    rendered.replace(['/', '\\'], "_")
}

/// Creates a directory if it doesn't exist
pub async fn ensure_dir_exists(path: &std::path::Path) -> Result<()> {
    if !path.exists() {
        tokio::fs::create_dir_all(path).await?;
        info!("Created directory: {:?}", path);
    }
    Ok(())
}

/// Generates a unique ID for downloads
pub fn generate_download_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Runs a program to completion, killing it if it outlives `timeout_secs`.
pub async fn run_output_with_timeout(
    program: &str,
    args: &[String],
    timeout_secs: u64,
) -> Result<std::process::Output> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| AppError::from_spawn(program, e))?;

    let mut stdout_pipe = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Io(std::io::Error::other(format!("no stdout from {}", program))))?;
    let mut stderr_pipe = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Io(std::io::Error::other(format!("no stderr from {}", program))))?;

    let mut stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stdout_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });
    let mut stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stderr_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });

    // Pipes count too: a grandchild can keep them open after the child exits.
    let waited = tokio::time::timeout(Duration::from_secs(timeout_secs), async {
        let status = child.wait().await?;
        let stdout = join_pipe(&mut stdout_task).await?;
        let stderr = join_pipe(&mut stderr_task).await?;
        Ok::<_, AppError>(std::process::Output { status, stdout, stderr })
    })
    .await;

    match waited {
        Ok(output) => output,
        Err(_) => {
            let _ = child.kill().await;
            stdout_task.abort();
            stderr_task.abort();
            Err(AppError::Timeout(timeout_secs))
        }
    }
}

async fn join_pipe(
    handle: &mut tokio::task::JoinHandle<std::io::Result<Vec<u8>>>,
) -> Result<Vec<u8>> {
    handle
        .await
        .map_err(|e| AppError::Io(std::io::Error::other(e.to_string())))?
        .map_err(AppError::from)
}

/// First non-empty line of a process's stdout.
pub fn first_line(bytes: &[u8]) -> Option<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}
