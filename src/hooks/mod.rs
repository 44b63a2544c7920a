//! Named lifecycle events that plugins can subscribe to.
//!
//! The vocabulary is closed: `download-start`, `progress`, `complete` and
//! `error`. Every handler call is isolated, so a failing or panicking plugin
//! never reaches the task that emitted the event.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookKind {
    DownloadStart,
    Progress,
    Complete,
    Error,
}

impl HookKind {
    pub const ALL: [HookKind; 4] = [
        HookKind::DownloadStart,
        HookKind::Progress,
        HookKind::Complete,
        HookKind::Error,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            HookKind::DownloadStart => "download-start",
            HookKind::Progress => "progress",
            HookKind::Complete => "complete",
            HookKind::Error => "error",
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HookKind {
    type Err = String;

    /// Accepts the wire names and the older `on_*` spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "download-start" | "on_download_start" => Ok(HookKind::DownloadStart),
            "progress" | "on_progress" => Ok(HookKind::Progress),
            "complete" | "on_complete" => Ok(HookKind::Complete),
            "error" | "on_error" => Ok(HookKind::Error),
            other => Err(format!("unknown hook: {}", other)),
        }
    }
}

/// Payload delivered to hook handlers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum HookEvent {
    DownloadStart {
        url: String,
        directory: PathBuf,
    },
    Progress {
        url: String,
        percent: u8,
    },
    Complete {
        url: String,
        directory: PathBuf,
        filename: String,
    },
    Error {
        url: String,
        error: String,
    },
}

impl HookEvent {
    pub fn kind(&self) -> HookKind {
        match self {
            HookEvent::DownloadStart { .. } => HookKind::DownloadStart,
            HookEvent::Progress { .. } => HookKind::Progress,
            HookEvent::Complete { .. } => HookKind::Complete,
            HookEvent::Error { .. } => HookKind::Error,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            HookEvent::DownloadStart { url, .. }
            | HookEvent::Progress { url, .. }
            | HookEvent::Complete { url, .. }
            | HookEvent::Error { url, .. } => url,
        }
    }

    /// JSON form handed to script-style plugins.
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

pub type HookHandler = Arc<dyn Fn(&HookEvent) -> anyhow::Result<()> + Send + Sync>;

struct Registered {
    owner: String,
    handler: HookHandler,
}

/// Event-kind to ordered handler list. Grows only; handlers run in
/// registration order.
#[derive(Default)]
pub struct HookBus {
    handlers: RwLock<HashMap<HookKind, Vec<Registered>>>,
}

impl HookBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, kind: HookKind, handler: F)
    where
        F: Fn(&HookEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register_owned(kind, "core", Arc::new(handler));
    }

    pub fn register_owned(&self, kind: HookKind, owner: &str, handler: HookHandler) {
        let mut handlers = self.handlers.write();
        handlers.entry(kind).or_default().push(Registered {
            owner: owner.to_string(),
            handler,
        });
        log::debug!("Hook registered: {} (owner: {})", kind, owner);
    }

    /// String-keyed registration used by plugins. Unknown names are logged
    /// and ignored; returns whether the handler was added.
    pub fn register_hook<F>(&self, name: &str, handler: F) -> bool
    where
        F: Fn(&HookEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register_hook_owned(name, "core", Arc::new(handler))
    }

    pub fn register_hook_owned(&self, name: &str, owner: &str, handler: HookHandler) -> bool {
        match name.parse::<HookKind>() {
            Ok(kind) => {
                self.register_owned(kind, owner, handler);
                true
            }
            Err(e) => {
                log::warn!("Ignoring hook registration from {}: {}", owner, e);
                false
            }
        }
    }

    /// Delivers `event` to every handler of its kind.
    ///
    /// Returns how many handlers failed; failures are logged, never raised.
    pub fn call_hook(&self, event: &HookEvent) -> usize {
        let kind = event.kind();
        // Snapshot so handlers may register further hooks without deadlocking.
        let targets: Vec<(String, HookHandler)> = {
            let handlers = self.handlers.read();
            match handlers.get(&kind) {
                Some(list) => list
                    .iter()
                    .map(|r| (r.owner.clone(), r.handler.clone()))
                    .collect(),
                None => return 0,
            }
        };

        let mut failures = 0;
        for (owner, handler) in targets {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    log::warn!("Hook error ({}, {}): {:#}", kind, owner, e);
                }
                Err(panic) => {
                    failures += 1;
                    log::error!("Hook panicked ({}, {}): {}", kind, owner, panic_message(&*panic));
                }
            }
        }
        failures
    }

    pub fn handler_count(&self, kind: HookKind) -> usize {
        self.handlers.read().get(&kind).map_or(0, Vec::len)
    }
}

impl fmt::Debug for HookBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.read();
        let counts: HashMap<&str, usize> = handlers
            .iter()
            .map(|(k, v)| (k.name(), v.len()))
            .collect();
        f.debug_struct("HookBus").field("handlers", &counts).finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
