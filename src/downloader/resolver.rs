use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::config::AppConfig;
use crate::downloader::DownloadOptions;
use crate::errors::{AppError, Result};
use crate::utils::run_output_with_timeout;

/// Display metadata reported by the media-resolution tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

impl MediaInfo {
    pub fn extension(&self) -> &str {
        self.ext.as_deref().filter(|e| !e.is_empty()).unwrap_or("mp4")
    }
}

/// Turns a page URL into metadata and concrete media URLs.
#[async_trait]
pub trait MediaResolver: Send + Sync {
    async fn fetch_info(&self, url: &str, options: &DownloadOptions) -> Result<MediaInfo>;

    /// Direct URLs in preference order; never empty on success.
    async fn resolve_direct_urls(&self, url: &str, options: &DownloadOptions) -> Result<Vec<String>>;
}

/// yt-dlp information extractor
#[derive(Debug, Clone)]
pub struct YtDlpResolver {
    ytdlp_path: String,
    ffmpeg_location: Option<String>,
    timeout_secs: u64,
}

impl YtDlpResolver {
    pub fn new() -> Self {
        Self {
            ytdlp_path: "yt-dlp".to_string(),
            ffmpeg_location: None,
            timeout_secs: 30,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            ytdlp_path: config.ytdlp_path.clone(),
            ffmpeg_location: config
                .has_custom_ffmpeg()
                .then(|| config.ffmpeg_path.clone()),
            timeout_secs: config.resolve_timeout_secs,
        }
    }

    pub fn with_ytdlp_path(mut self, path: String) -> Self {
        self.ytdlp_path = path;
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(ffmpeg) = &self.ffmpeg_location {
            args.push("--ffmpeg-location".to_string());
            args.push(ffmpeg.clone());
        }
        args
    }

    /// Metadata for the same format that `-g` will resolve, so `ext` matches
    /// the file that actually lands on disk.
    fn info_args(&self, url: &str, options: &DownloadOptions) -> Vec<String> {
        let mut args = self.base_args();
        args.extend(
            ["--dump-json", "--no-playlist", "--no-warnings", "-f"]
                .iter()
                .map(|s| s.to_string()),
        );
        args.push(options.format_selector());
        args.push(url.to_string());
        args
    }

    fn url_args(&self, url: &str, options: &DownloadOptions) -> Vec<String> {
        let mut args = self.base_args();
        args.extend(["-g", "--no-playlist", "-f"].iter().map(|s| s.to_string()));
        args.push(options.format_selector());
        args.push(url.to_string());
        args
    }

    async fn run(&self, args: &[String]) -> Result<String> {
        let output = run_output_with_timeout(&self.ytdlp_path, args, self.timeout_secs).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr.trim();
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            return Err(AppError::Resolution(if detail.is_empty() {
                format!("yt-dlp exited with code {}", code)
            } else {
                format!("yt-dlp exited with code {}: {}", code, detail)
            }));
        }

        String::from_utf8(output.stdout)
            .map_err(|e| AppError::Resolution(format!("Invalid UTF-8 in yt-dlp output: {}", e)))
    }
}

impl Default for YtDlpResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaResolver for YtDlpResolver {
    async fn fetch_info(&self, url: &str, options: &DownloadOptions) -> Result<MediaInfo> {
        log::info!("🔍 [EXTRACT] Fetching info for URL: {}", url);
        let stdout = self.run(&self.info_args(url, options)).await?;

        // One JSON object per line; --no-playlist keeps it to the first.
        let line = stdout
            .lines()
            .map(str::trim)
            .find(|l| l.starts_with('{'))
            .ok_or_else(|| AppError::Resolution("yt-dlp returned no metadata".to_string()))?;

        let info: MediaInfo = serde_json::from_str(line)
            .map_err(|e| AppError::Resolution(format!("Unparsable yt-dlp metadata: {}", e)))?;
        log::info!("✅ [EXTRACT] Parsed video info: {}", info.title);
        Ok(info)
    }

    async fn resolve_direct_urls(&self, url: &str, options: &DownloadOptions) -> Result<Vec<String>> {
        log::info!("🔗 [RESOLVE] Resolving direct URL for: {}", url);
        let stdout = self.run(&self.url_args(url, options)).await?;

        let urls: Vec<String> = stdout
            .lines()
            .map(str::trim)
            .filter(|l| l.starts_with("http://") || l.starts_with("https://"))
            .map(str::to_string)
            .collect();

        if urls.is_empty() {
            return Err(AppError::Resolution(format!("yt-dlp returned no direct URL for {}", url)));
        }
        log::debug!("Resolved {} candidate URL(s) for {}", urls.len(), url);
        Ok(urls)
    }
}
