use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{HumanBytes, MultiProgress, ProgressBar, ProgressStyle};
use log::info;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use ytdlp_gui::{
    AppConfig, DownloadManager, DownloadRequest, HookBus, MediaProcessor, TaskEvent, TaskState, Updater,
};

#[derive(Parser)]
#[command(name = "ytdlp-gui", version, about = "yt-dlp + aria2 download front-end")]
struct Cli {
    /// Use this settings file instead of the per-user one
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download one or more URLs
    Download {
        #[arg(required = true)]
        urls: Vec<String>,
        /// Target directory (defaults to output_dir)
        #[arg(short, long)]
        dir: Option<PathBuf>,
        /// Extract audio only
        #[arg(short, long)]
        audio: bool,
        /// yt-dlp format selector
        #[arg(short, long)]
        format: Option<String>,
        /// Output filename template
        #[arg(short = 'o', long)]
        template: Option<String>,
    },
    /// Report aria2 and ffmpeg availability
    Check,
    /// Compare against the update manifest
    CheckUpdate {
        /// Also download the release archive into this directory
        #[arg(long)]
        download: Option<PathBuf>,
    },
    /// Print the effective configuration
    Config,
}

fn load_config(path: Option<&PathBuf>) -> AppConfig {
    let loaded = match path {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };
    match loaded {
        Ok(config) => {
            info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            log::error!("Failed to load configuration: {}", e);
            AppConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let cli = Cli::parse();
    let config = Arc::new(load_config(cli.config.as_ref()));

    match cli.command {
        Command::Download {
            urls,
            dir,
            audio,
            format,
            template,
        } => download(config, urls, dir, audio, format, template).await,
        Command::Check => check(config).await,
        Command::CheckUpdate { download } => check_update(&config, download).await,
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&*config)?);
            Ok(())
        }
    }
}

async fn download(
    config: Arc<AppConfig>,
    urls: Vec<String>,
    dir: Option<PathBuf>,
    audio: bool,
    format: Option<String>,
    template: Option<String>,
) -> anyhow::Result<()> {
    if config.auto_check_updates {
        let config = config.clone();
        tokio::spawn(async move {
            match Updater::from_config(&config) {
                Ok(updater) => match updater.check().await {
                    Ok(check) if check.update_available => {
                        log::info!("Update available: {} (run `ytdlp-gui check-update`)", check.latest_version)
                    }
                    Ok(_) => {}
                    Err(e) => log::debug!("Update check failed: {}", e),
                },
                Err(e) => log::debug!("Update check unavailable: {}", e),
            }
        });
    }

    let hooks = Arc::new(HookBus::new());
    let manager = DownloadManager::from_config(config.clone(), hooks)
        .context("failed to set up the download manager")?;
    let mut events = manager.subscribe();

    let directory = dir.unwrap_or_else(|| config.output_dir.clone());
    let multi = MultiProgress::new();
    let style = ProgressStyle::with_template("{prefix:.bold} [{bar:30.cyan/blue}] {pos:>3}% {msg}")?
        .progress_chars("=> ");
    let mut bars: HashMap<String, ProgressBar> = HashMap::new();

    for url in urls {
        let mut request = DownloadRequest::new(url.as_str(), directory.as_path(), &config);
        if audio {
            request.options.extract_audio = true;
        }
        if let Some(format) = &format {
            request.options.format = format.clone();
        }
        if let Some(template) = &template {
            request = request.with_template(template.clone());
        }

        match manager.add_download_with(request) {
            Ok(task) => {
                let bar = multi.add(ProgressBar::new(100));
                bar.set_style(style.clone());
                bar.set_prefix(url.clone());
                bars.insert(task.id().to_string(), bar);
            }
            Err(e) => log::error!("Could not start {}: {}", url, e),
        }
    }

    let mut interrupted = false;
    while manager.active_count() > 0 {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => render(&bars, event),
                Err(RecvError::Lagged(n)) => log::warn!("Display fell behind by {} events", n),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                let cancelled = manager.cancel_all();
                log::warn!("Interrupted, cancelling {} download(s)", cancelled);
            }
        }
    }
    while let Ok(event) = events.try_recv() {
        render(&bars, event);
    }

    let failed = manager
        .snapshots()
        .iter()
        .filter(|s| s.state == TaskState::Failed)
        .count();
    if failed > 0 {
        anyhow::bail!("{} download(s) failed", failed);
    }
    Ok(())
}

fn render(bars: &HashMap<String, ProgressBar>, event: TaskEvent) {
    let Some(bar) = bars.get(event.task_id()) else {
        return;
    };
    match event {
        TaskEvent::StateChanged { state, message, .. } => match state {
            TaskState::Cancelled => bar.abandon_with_message("cancelled"),
            TaskState::Completed | TaskState::Failed => {}
            _ => bar.set_message(message),
        },
        TaskEvent::Info { info, .. } => bar.set_prefix(info.title),
        TaskEvent::Progress { progress, .. } => {
            bar.set_position(progress.percent as u64);
            if progress.total_bytes > 0 {
                bar.set_message(format!(
                    "{} / {} ({}/s)",
                    HumanBytes(progress.downloaded_bytes),
                    HumanBytes(progress.total_bytes),
                    HumanBytes(progress.speed)
                ));
            }
        }
        TaskEvent::Completed { directory, filename, .. } => {
            bar.finish_with_message(format!("✅ {}", directory.join(filename).display()));
        }
        TaskEvent::Failed { error, .. } => bar.abandon_with_message(format!("❌ {}", error)),
    }
}

async fn check(config: Arc<AppConfig>) -> anyhow::Result<()> {
    let client = ytdlp_gui::Aria2Client::from_config(&config)?;
    let aria2 = client.check_connection().await;
    let ffmpeg = MediaProcessor::from_config(&config).check_ffmpeg().await;

    let report = serde_json::json!({
        "aria2": aria2,
        "ffmpeg": ffmpeg,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn check_update(config: &AppConfig, download_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let updater = Updater::from_config(config)?;
    let check = updater.check().await?;

    if !check.update_available {
        println!("ytdlp-gui {} is up to date", check.current_version);
        return Ok(());
    }

    println!("Update available: {} -> {}", check.current_version, check.latest_version);
    if !check.manifest.changelog.is_empty() {
        println!("\n{}", check.manifest.changelog);
    }

    if let Some(dir) = download_dir {
        let bar = ProgressBar::new(0);
        bar.set_style(ProgressStyle::with_template("[{bar:30}] {bytes}/{total_bytes}")?);
        let path = updater
            .download_release(&check.manifest, &dir, |done, total| {
                if total > 0 {
                    bar.set_length(total);
                }
                bar.set_position(done);
            })
            .await?;
        bar.finish();
        println!("Saved {}", path.display());
    }
    Ok(())
}
