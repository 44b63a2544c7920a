use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use crate::config::AppConfig;
use crate::errors::{AppError, Result};
use crate::utils::{ensure_dir_exists, sanitize_filename};

pub const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");
const MANIFEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Compares dot-separated numeric versions; `1.0` equals `1.0.0`.
///
/// A leading `v` is ignored and non-numeric components count as 0.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    fn parts(v: &str) -> Vec<u64> {
        v.trim()
            .trim_start_matches(['v', 'V'])
            .split('.')
            .map(|p| p.trim().parse::<u64>().unwrap_or(0))
            .collect()
    }

    let (a, b) = (parts(a), parts(b));
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| {
            let x = a.get(i).copied().unwrap_or(0);
            let y = b.get(i).copied().unwrap_or(0);
            x.cmp(&y)
        })
        .find(|o| *o != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateManifest {
    pub version: String,
    pub download_url: String,
    #[serde(default)]
    pub changelog: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateCheck {
    pub current_version: String,
    pub latest_version: String,
    pub update_available: bool,
    pub manifest: UpdateManifest,
}

pub struct Updater {
    client: reqwest::Client,
    manifest_url: String,
    current_version: String,
}

impl Updater {
    pub fn new(manifest_url: impl Into<String>, current_version: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("ytdlp-gui/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            manifest_url: manifest_url.into(),
            current_version: current_version.into(),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::new(config.update_manifest_url.clone(), CURRENT_VERSION)
    }

    pub async fn fetch_manifest(&self) -> Result<UpdateManifest> {
        log::info!("Checking for updates at {}", self.manifest_url);
        let response = self
            .client
            .get(&self.manifest_url)
            .timeout(MANIFEST_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::Update(format!("manifest request failed: {}", response.status())));
        }

        let manifest: UpdateManifest = response
            .json()
            .await
            .map_err(|e| AppError::Update(format!("invalid manifest: {}", e)))?;
        if manifest.version.trim().is_empty() || manifest.download_url.trim().is_empty() {
            return Err(AppError::Update("manifest is missing version or download_url".to_string()));
        }
        Ok(manifest)
    }

    pub async fn check(&self) -> Result<UpdateCheck> {
        let manifest = self.fetch_manifest().await?;
        let update_available = compare_versions(&manifest.version, &self.current_version) == Ordering::Greater;
        if update_available {
            log::info!("Update available: {} -> {}", self.current_version, manifest.version);
        }
        Ok(UpdateCheck {
            current_version: self.current_version.clone(),
            latest_version: manifest.version.clone(),
            update_available,
            manifest,
        })
    }

    /// Streams the release archive into `dest_dir`. Unpacking is up to the host.
    pub async fn download_release<F>(
        &self,
        manifest: &UpdateManifest,
        dest_dir: &Path,
        mut on_progress: F,
    ) -> Result<PathBuf>
    where
        F: FnMut(u64, u64),
    {
        ensure_dir_exists(dest_dir).await?;
        let destination = dest_dir.join(archive_name(&manifest.download_url, &manifest.version));
        let partial = destination.with_extension("part");

        let response = self.client.get(&manifest.download_url).send().await?;
        if !response.status().is_success() {
            return Err(AppError::Update(format!("release download failed: {}", response.status())));
        }

        if let Err(e) = write_body(response, &partial, &mut on_progress).await {
            log::warn!("Release download failed, removing {:?}: {}", partial, e);
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }

        tokio::fs::rename(&partial, &destination).await?;
        log::info!("Downloaded release {} to {:?}", manifest.version, destination);
        Ok(destination)
    }
}

async fn write_body<F>(response: reqwest::Response, path: &Path, on_progress: &mut F) -> Result<()>
where
    F: FnMut(u64, u64),
{
    let total_size = response.content_length().unwrap_or(0);
    let mut downloaded = 0u64;
    let mut stream = response.bytes_stream();
    let mut file = tokio::fs::File::create(path).await?;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
        on_progress(downloaded, total_size);
    }
    file.flush().await?;
    Ok(())
}

fn archive_name(download_url: &str, version: &str) -> String {
    let from_url = url::Url::parse(download_url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .map(|name| sanitize_filename(&name))
        .filter(|name| !name.is_empty());
    from_url.unwrap_or_else(|| format!("ytdlp-gui-{}.zip", sanitize_filename(version)))
}
