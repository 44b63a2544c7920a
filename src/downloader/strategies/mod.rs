pub mod cli;
pub mod rpc;

use std::time::Duration;
use crate::config::AppConfig;

// Re-export backends for easy access
pub use cli::{parse_progress_line, CliBackend};
pub use rpc::{HttpRpcTransport, RpcBackend, RpcTransport};

/// aria2 knobs shared by the RPC and process backends.
#[derive(Debug, Clone, PartialEq)]
pub struct Aria2Settings {
    pub path: String,
    pub rpc_url: String,
    pub rpc_secret: Option<String>,
    pub use_rpc: bool,
    pub max_connections: u32,
    pub split: u32,
    pub max_tries: u32,
    pub retry_wait: u32,
    pub rpc_timeout: Duration,
    pub poll_interval: Duration,
}

impl Aria2Settings {
    pub fn from_config(config: &AppConfig) -> Self {
        let secret = config.aria2c_rpc_secret.trim();
        Self {
            path: config.aria2c_path.clone(),
            rpc_url: config.aria2c_rpc_url.clone(),
            rpc_secret: (!secret.is_empty()).then(|| secret.to_string()),
            use_rpc: config.aria2c_use_rpc,
            max_connections: config.aria2c_max_connections.clamp(1, 16),
            split: config.aria2c_split.max(1),
            max_tries: config.aria2c_max_tries,
            retry_wait: config.aria2c_retry_wait,
            rpc_timeout: Duration::from_secs(config.rpc_timeout_secs.max(1)),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(10)),
        }
    }
}

impl Default for Aria2Settings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}
