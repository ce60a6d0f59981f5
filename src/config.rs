//! Configuration loading for tgmux.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Get the tgmux home directory (~/.tgmux).
pub fn get_home_dir() -> Result<PathBuf> {
    let home = directories::UserDirs::new()
        .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;

    Ok(home.home_dir().join(".tgmux"))
}

/// Get the settings file path.
pub fn get_settings_path() -> Result<PathBuf> {
    Ok(get_home_dir()?.join("settings.json"))
}

/// Load settings from ~/.tgmux/settings.json
pub fn load_settings() -> Result<Settings> {
    load_settings_from(&get_settings_path()?)
}

/// Load and validate settings from a specific file.
pub fn load_settings_from(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Err(Error::Config(format!(
            "Settings file not found at {}. Run 'tgmux config init' first.",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path)?;
    let settings: Settings = serde_json::from_str(&content)?;

    validate_settings(&settings)?;

    tracing::debug!("Loaded settings from {}", path.display());
    Ok(settings)
}

/// Load settings from `path` (or the default location), falling back to
/// defaults when the file is missing or broken.
pub fn load_settings_or_default(path: Option<&Path>) -> Settings {
    let loaded = match path {
        Some(path) => load_settings_from(path),
        None => load_settings(),
    };
    loaded.unwrap_or_else(|e| {
        tracing::warn!("Failed to load settings: {}, using defaults", e);
        Settings::default()
    })
}

/// Write settings as pretty JSON, creating parent directories.
pub fn save_settings_to(settings: &Settings, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(settings)?)?;
    Ok(())
}

fn validate_settings(settings: &Settings) -> Result<()> {
    if settings.queue.capacity == 0 {
        return Err(Error::Config("queue.capacity must be at least 1".to_string()));
    }
    if settings.queue.idle_timeout_secs == 0 {
        return Err(Error::Config(
            "queue.idle_timeout_secs must be at least 1".to_string(),
        ));
    }
    if settings.queue.sweep_interval_secs == 0 {
        return Err(Error::Config(
            "queue.sweep_interval_secs must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Telegram channel configuration.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
}

/// Per-conversation queue configuration.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct QueueSettings {
    /// Pending messages a conversation may buffer before its producer waits.
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,

    /// Seconds without messages before a conversation queue retires.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Seconds between sweeps of retired queues.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_queue_capacity() -> usize {
    5
}

fn default_idle_timeout_secs() -> u64 {
    10
}

fn default_sweep_interval_secs() -> u64 {
    600
}

impl QueueSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
            idle_timeout_secs: default_idle_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// Router policy.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RouterSettings {
    /// Commands an unregistered conversation (empty state) may still run.
    #[serde(default = "default_bootstrap_commands")]
    pub bootstrap_commands: Vec<String>,
}

fn default_bootstrap_commands() -> Vec<String> {
    vec!["start".to_string(), "help".to_string()]
}

impl RouterSettings {
    pub fn is_bootstrap(&self, command: &str) -> bool {
        self.bootstrap_commands.iter().any(|c| c == command)
    }
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            bootstrap_commands: default_bootstrap_commands(),
        }
    }
}

/// User-facing texts the router sends on its own.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Localization {
    #[serde(default = "default_on_error")]
    pub on_error: String,

    #[serde(default = "default_command_not_found")]
    pub command_not_found: String,

    #[serde(default = "default_use_start_to_register")]
    pub use_start_to_register: String,
}

fn default_on_error() -> String {
    "An error occurred on the server. Support has been notified.".to_string()
}

fn default_command_not_found() -> String {
    "Command isn't supported".to_string()
}

fn default_use_start_to_register() -> String {
    "To use the bot, enter /start".to_string()
}

impl Default for Localization {
    fn default() -> Self {
        Self {
            on_error: default_on_error(),
            command_not_found: default_command_not_found(),
            use_start_to_register: default_use_start_to_register(),
        }
    }
}

/// tgmux settings.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Settings {
    #[serde(default)]
    pub telegram: TelegramConfig,

    #[serde(default)]
    pub queue: QueueSettings,

    #[serde(default)]
    pub router: RouterSettings,

    #[serde(default)]
    pub localization: Localization,
}
