use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use dirs;
use crate::errors::{AppError, Result};

pub const ENV_PREFIX: &str = "YTDLP_GUI";
pub const DEFAULT_MANIFEST_URL: &str =
    "https://raw.githubusercontent.com/yunfie-twitter/ytdlp-gui/main/manifest.json";

/// Flat settings document shared by the whole application.
///
/// Missing keys fall back to the defaults below; keys this version does not
/// know about are kept in `extra` and written back on save.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    #[serde(alias = "download_path")]
    pub output_dir: PathBuf,
    pub ytdlp_path: String,
    pub ffmpeg_path: String,
    pub aria2c_path: String,
    pub aria2c_rpc_url: String,
    pub aria2c_rpc_secret: String,
    pub aria2c_use_rpc: bool,
    pub aria2c_max_connections: u32,
    pub aria2c_split: u32,
    pub aria2c_max_tries: u32,
    pub aria2c_retry_wait: u32,
    /// Advisory limit on non-terminal tasks; 0 disables it.
    pub max_concurrent_downloads: usize,
    pub auto_check_updates: bool,
    pub auto_update: bool,
    pub update_manifest_url: String,
    pub download_format: String,
    pub extract_audio: bool,
    pub audio_format: String,
    pub embed_thumbnail: bool,
    pub embed_metadata: bool,
    pub filename_template: String,
    pub resolve_timeout_secs: u64,
    pub rpc_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub theme: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_dir: dirs::download_dir()
                .unwrap_or_else(|| PathBuf::from("./downloads")),
            ytdlp_path: "yt-dlp".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            aria2c_path: "aria2c".to_string(),
            aria2c_rpc_url: "http://localhost:6800/jsonrpc".to_string(),
            aria2c_rpc_secret: String::new(),
            aria2c_use_rpc: true,
            aria2c_max_connections: 16,
            aria2c_split: 16,
            aria2c_max_tries: 5,
            aria2c_retry_wait: 3,
            max_concurrent_downloads: 3,
            auto_check_updates: true,
            auto_update: false,
            update_manifest_url: DEFAULT_MANIFEST_URL.to_string(),
            download_format: "best".to_string(),
            extract_audio: false,
            audio_format: "mp3".to_string(),
            embed_thumbnail: true,
            embed_metadata: true,
            filename_template: "%(title)s.%(ext)s".to_string(),
            resolve_timeout_secs: 30,
            rpc_timeout_secs: 10,
            poll_interval_ms: 1000,
            theme: "system".to_string(),
            extra: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    /// Loads from the default location, writing defaults on first run.
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = AppConfig::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config = match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => config,
            Err(e) => {
                log::error!("Failed to load config {:?}: {}; using defaults", path, e);
                let config = AppConfig::default();
                config.save_to(path)?;
                config
            }
        };

        config.with_environment(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
    }

    /// Applies `YTDLP_GUI_*` variables to the fields this version knows.
    ///
    /// The environment layer lowercases keys, so unknown keys are never
    /// taken from it; they only come from the file.
    pub fn with_environment(self, env: config::Environment) -> Result<Self> {
        let layer: Map<String, Value> = config::Config::builder()
            .add_source(env)
            .build()?
            .try_deserialize()?;

        let known = AppConfig::default().to_document();
        let overrides: Map<String, Value> = layer
            .into_iter()
            .filter_map(|(key, value)| {
                let value = match (known.get(&key)?, value) {
                    // try_parsing turns "12345" into a number even for string fields
                    (Value::String(_), Value::Number(n)) => Value::String(n.to_string()),
                    (Value::String(_), Value::Bool(b)) => Value::String(b.to_string()),
                    (_, value) => value,
                };
                Some((key, value))
            })
            .collect();

        if overrides.is_empty() {
            return Ok(self);
        }
        log::debug!("Environment overrides: {:?}", overrides.keys().collect::<Vec<_>>());
        self.with_overrides(&overrides)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::get_config_path()?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(config_dir) = path.parent() {
            if !config_dir.as_os_str().is_empty() && !config_dir.exists() {
                std::fs::create_dir_all(config_dir)?;
            }
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| AppError::Config(config::ConfigError::Message("Could not find config directory".to_string())))?;

        Ok(config_dir.join("ytdlp-gui").join("config.json"))
    }

    /// The whole document as a flat JSON object, unknown keys included.
    pub fn to_document(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.to_document().remove(key)
    }

    /// Returns a copy with `overrides` merged over this document.
    pub fn with_overrides(&self, overrides: &Map<String, Value>) -> Result<Self> {
        let mut document = self.to_document();
        for (key, value) in overrides {
            document.insert(key.clone(), value.clone());
        }
        Ok(serde_json::from_value(Value::Object(document))?)
    }

    /// True when ffmpeg was configured to something other than the PATH lookup.
    pub fn has_custom_ffmpeg(&self) -> bool {
        !self.ffmpeg_path.is_empty() && self.ffmpeg_path != "ffmpeg"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let config: AppConfig = serde_json::from_value(json!({
            "aria2c_split": 4,
        }))
        .unwrap();

        assert_eq!(config.aria2c_split, 4);
        assert_eq!(config.aria2c_max_connections, 16);
        assert!(config.aria2c_use_rpc);
        assert_eq!(config.filename_template, "%(title)s.%(ext)s");
    }

    #[test]
    fn legacy_download_path_key_is_accepted() {
        let config: AppConfig = serde_json::from_value(json!({
            "download_path": "/tmp/legacy",
        }))
        .unwrap();
        assert_eq!(config.output_dir, PathBuf::from("/tmp/legacy"));
    }

    #[test]
    fn unknown_keys_survive_a_save_round() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"language": "ja", "aria2c_split": 8}"#).unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.aria2c_split, 8);
        assert_eq!(config.extra.get("language"), Some(&json!("ja")));

        config.save_to(&path).unwrap();
        let saved: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["language"], json!("ja"));
        assert_eq!(saved["aria2c_split"], json!(8));
    }

    #[test]
    fn first_load_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = AppConfig::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.audio_format, "mp3");
    }

    #[test]
    fn overrides_merge_over_document() {
        let mut overrides = Map::new();
        overrides.insert("extract_audio".to_string(), json!(true));
        overrides.insert("plugin_flag".to_string(), json!(1));

        let merged = AppConfig::default().with_overrides(&overrides).unwrap();
        assert!(merged.extract_audio);
        assert_eq!(merged.get_value("plugin_flag"), Some(json!(1)));
    }

    #[test]
    fn unknown_keys_keep_their_case() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"myPluginKey": 1, "aria2c_split": 8}"#).unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.extra.get("myPluginKey"), Some(&json!(1)));
        assert!(!config.extra.contains_key("mypluginkey"));

        config.save_to(&path).unwrap();
        let saved: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["myPluginKey"], json!(1));
    }

    #[test]
    fn environment_overrides_known_fields_only() {
        let mut vars = std::collections::HashMap::new();
        vars.insert("YTDLP_GUI_ARIA2C_SPLIT".to_string(), "4".to_string());
        vars.insert("YTDLP_GUI_ARIA2C_RPC_SECRET".to_string(), "12345".to_string());
        vars.insert("YTDLP_GUI_SOME_PLUGIN".to_string(), "x".to_string());
        let env = config::Environment::with_prefix(ENV_PREFIX)
            .try_parsing(true)
            .source(Some(vars));

        let config = AppConfig::default().with_environment(env).unwrap();
        assert_eq!(config.aria2c_split, 4);
        assert_eq!(config.aria2c_rpc_secret, "12345");
        assert!(config.extra.is_empty());
    }
}
