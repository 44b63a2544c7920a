//! Post-download media work, delegated to ffmpeg.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use crate::config::AppConfig;
use crate::errors::{AppError, Result};
use crate::utils::{first_line, run_output_with_timeout};

const PROBE_TIMEOUT_SECS: u64 = 10;

/// Containers that can carry a cover image next to the audio stream.
const COVER_ART_FORMATS: [&str; 3] = ["mp3", "m4a", "flac"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolStatus {
    pub available: bool,
    pub path: String,
    pub version: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MediaProcessor {
    ffmpeg_path: String,
}

impl MediaProcessor {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.ffmpeg_path.clone())
    }

    pub fn ffmpeg_path(&self) -> &str {
        &self.ffmpeg_path
    }

    /// Runs `ffmpeg -version`. Never fails.
    pub async fn check_ffmpeg(&self) -> ToolStatus {
        let probe = run_output_with_timeout(
            &self.ffmpeg_path,
            &["-version".to_string()],
            PROBE_TIMEOUT_SECS,
        )
        .await;

        let (available, version, error) = match probe {
            Ok(output) if output.status.success() => (true, first_line(&output.stdout), None),
            Ok(output) => (false, None, Some(format!("ffmpeg -version exited with {}", output.status))),
            Err(e) => (false, None, Some(e.to_string())),
        };

        ToolStatus {
            available,
            path: self.ffmpeg_path.clone(),
            version,
            error,
        }
    }

    pub fn conversion_args(
        input: &Path,
        output: &Path,
        audio_format: &str,
        embed_metadata: bool,
        embed_thumbnail: bool,
    ) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-i".to_string(),
            input.to_string_lossy().into_owned(),
        ];

        if embed_thumbnail && COVER_ART_FORMATS.contains(&audio_format) {
            // Keep an embedded picture if the source has one.
            args.extend(
                ["-map", "0:a", "-map", "0:v?", "-c:v", "copy", "-disposition:v", "attached_pic"]
                    .iter()
                    .map(|s| s.to_string()),
            );
        } else {
            args.push("-vn".to_string());
        }

        if embed_metadata {
            args.push("-map_metadata".to_string());
            args.push("0".to_string());
        }

        args.push(output.to_string_lossy().into_owned());
        args
    }

    /// Converts `input` to `audio_format` beside it and removes the source.
    ///
    /// Returns the path of the converted file.
    pub async fn convert_audio(
        &self,
        input: &Path,
        audio_format: &str,
        embed_metadata: bool,
        embed_thumbnail: bool,
    ) -> Result<PathBuf> {
        let output_path = input.with_extension(audio_format);
        if output_path == input {
            return Ok(output_path);
        }

        let args = Self::conversion_args(input, &output_path, audio_format, embed_metadata, embed_thumbnail);
        log::info!("🎵 [FFMPEG] Converting {:?} to {}", input, audio_format);

        let output = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AppError::from_spawn(&self.ffmpeg_path, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
            log::error!("❌ [FFMPEG] Conversion failed: {}", tail);
            return Err(AppError::Transfer(format!(
                "ffmpeg exited with {}: {}",
                output.status, tail
            )));
        }

        if let Err(e) = tokio::fs::remove_file(input).await {
            log::warn!("Could not remove {:?} after conversion: {}", input, e);
        }
        Ok(output_path)
    }
}

impl Default for MediaProcessor {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}
