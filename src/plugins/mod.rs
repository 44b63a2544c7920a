//! Trusted in-process extensions.
//!
//! A plugin gets a [`PluginApi`] during `register` and may subscribe to
//! lifecycle hooks, read the settings, stage setting changes and contribute
//! menu entries. Nothing it stages takes effect unless `register` returns
//! `Ok`.

use serde::Serialize;
use serde_json::{Map, Value};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use crate::config::AppConfig;
use crate::errors::{AppError, Result};
use crate::hooks::{HookBus, HookEvent, HookHandler, HookKind};

pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        "0.1.0"
    }

    fn register(&self, api: &mut PluginApi<'_>) -> anyhow::Result<()>;
}

/// Entry a plugin adds to the host's plugin menu.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MenuAction {
    pub plugin: String,
    pub label: String,
    pub action_id: String,
}

/// The surface a plugin sees while registering.
pub struct PluginApi<'a> {
    plugin: String,
    config: &'a Map<String, Value>,
    hooks: Vec<(HookKind, HookHandler)>,
    overrides: Map<String, Value>,
    menu_actions: Vec<MenuAction>,
}

impl<'a> PluginApi<'a> {
    fn new(plugin: &str, config: &'a Map<String, Value>) -> Self {
        Self {
            plugin: plugin.to_string(),
            config,
            hooks: Vec::new(),
            overrides: Map::new(),
            menu_actions: Vec::new(),
        }
    }

    pub fn plugin_name(&self) -> &str {
        &self.plugin
    }

    /// Subscribes to `download-start`, `progress`, `complete` or `error`.
    /// Unknown names are logged and ignored.
    pub fn register_hook<F>(&mut self, name: &str, handler: F) -> bool
    where
        F: Fn(&HookEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        match name.parse::<HookKind>() {
            Ok(kind) => {
                self.hooks.push((kind, Arc::new(handler)));
                true
            }
            Err(e) => {
                log::warn!("Plugin {} tried to register {}", self.plugin, e);
                false
            }
        }
    }

    pub fn log(&self, message: &str) {
        log::info!(target: "plugin", "[{}] {}", self.plugin, message);
    }

    /// Current value of a setting, including changes staged by this plugin.
    pub fn get_config(&self, key: &str) -> Option<Value> {
        self.overrides
            .get(key)
            .or_else(|| self.config.get(key))
            .cloned()
    }

    pub fn set_config(&mut self, key: &str, value: Value) {
        self.overrides.insert(key.to_string(), value);
    }

    pub fn add_menu_action(&mut self, label: &str, action_id: &str) {
        self.menu_actions.push(MenuAction {
            plugin: self.plugin.clone(),
            label: label.to_string(),
            action_id: action_id.to_string(),
        });
    }
}

pub struct PluginManager {
    hooks: Arc<HookBus>,
    config: Map<String, Value>,
    loaded: Vec<String>,
    menu_actions: Vec<MenuAction>,
    overrides: Map<String, Value>,
}

impl PluginManager {
    pub fn new(hooks: Arc<HookBus>, config: &AppConfig) -> Self {
        Self {
            hooks,
            config: config.to_document(),
            loaded: Vec::new(),
            menu_actions: Vec::new(),
            overrides: Map::new(),
        }
    }

    /// Registers every plugin, skipping the ones that fail. Returns how many loaded.
    pub fn load(&mut self, plugins: Vec<Box<dyn Plugin>>) -> usize {
        let mut count = 0;
        for plugin in plugins {
            match self.load_one(plugin.as_ref()) {
                Ok(()) => {
                    log::info!("Loaded plugin {} v{}", plugin.name(), plugin.version());
                    count += 1;
                }
                Err(e) => log::error!("Failed to load plugin {}: {}", plugin.name(), e),
            }
        }
        count
    }

    fn load_one(&mut self, plugin: &dyn Plugin) -> Result<()> {
        let name = plugin.name().to_string();
        if self.loaded.contains(&name) {
            return Err(AppError::Plugin(format!("{} is already loaded", name)));
        }

        let mut api = PluginApi::new(&name, &self.config);
        match catch_unwind(AssertUnwindSafe(|| plugin.register(&mut api))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(AppError::Plugin(format!("{:#}", e))),
            Err(_) => return Err(AppError::Plugin("panicked during registration".to_string())),
        }

        let PluginApi {
            hooks,
            overrides,
            menu_actions,
            ..
        } = api;
        for (kind, handler) in hooks {
            self.hooks.register_owned(kind, &name, handler);
        }
        self.overrides.extend(overrides);
        self.menu_actions.extend(menu_actions);
        self.loaded.push(name);
        Ok(())
    }

    pub fn loaded(&self) -> &[String] {
        &self.loaded
    }

    pub fn menu_actions(&self) -> &[MenuAction] {
        &self.menu_actions
    }

    /// Settings changes staged by plugins, for the host to merge and persist.
    pub fn config_overrides(&self) -> &Map<String, Value> {
        &self.overrides
    }

    pub fn apply_overrides(&self, config: &AppConfig) -> Result<AppConfig> {
        config.with_overrides(&self.overrides)
    }
}
