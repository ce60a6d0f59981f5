//! CLI commands for tgmux using clap.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::bot::{self, UserStore};
use crate::config::{
    get_settings_path, load_settings_from, load_settings_or_default, save_settings_to, Settings,
};
use crate::core::routing::Router;
use crate::telegram::TelegramTransport;

/// tgmux - per-conversation message router for Telegram bots.
#[derive(Parser)]
#[command(name = "tgmux")]
#[command(version = "0.1.0")]
#[command(about = "tgmux - sequential per-conversation message routing for Telegram bots", long_about = None)]
pub struct Commands {
    /// Settings file (defaults to ~/.tgmux/settings.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the demo bot until Ctrl-C
    Run {
        /// Bot token; overrides telegram.bot_token from settings
        #[arg(long, env = "TGMUX_BOT_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },

    /// Settings commands
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Print the effective settings as JSON
    Show,

    /// Write the default settings file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl Commands {
    pub async fn run(&self) -> Result<()> {
        match &self.command {
            Command::Run { token } => cmd_run(self.config.as_deref(), token.clone()).await,
            Command::Config(ConfigCommand::Show) => cmd_config_show(self.config.as_deref()),
            Command::Config(ConfigCommand::Init { force }) => {
                let path = settings_path(self.config.as_deref())?;
                cmd_config_init(&path, *force)
            }
        }
    }
}

fn settings_path(config: Option<&Path>) -> Result<PathBuf> {
    match config {
        Some(path) => Ok(path.to_path_buf()),
        None => Ok(get_settings_path()?),
    }
}

/// An explicit `--config` must load; the default location may be absent.
fn effective_settings(config: Option<&Path>) -> Result<Settings> {
    match config {
        Some(path) => load_settings_from(path)
            .with_context(|| format!("loading settings from {}", path.display())),
        None => Ok(load_settings_or_default(None)),
    }
}

async fn cmd_run(config: Option<&Path>, token: Option<String>) -> Result<()> {
    let settings = effective_settings(config)?;

    let Some(token) = token.or_else(|| settings.telegram.bot_token.clone()) else {
        bail!("No bot token. Pass --token, set TGMUX_BOT_TOKEN or telegram.bot_token in settings.");
    };

    let transport = Arc::new(TelegramTransport::new(token));
    if let Err(e) = transport.register_commands(bot::COMMANDS).await {
        tracing::warn!("Failed to register bot commands: {}", e);
    }

    let users = UserStore::new();
    let router = bot::register(Router::builder(transport.clone(), users.clone()), &users)
        .settings(settings.router.clone())
        .localization(settings.localization.clone())
        .queue_settings(settings.queue.clone())
        .build();

    tracing::info!("Registered commands: {}", router.command_names().join(", "));

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Ctrl-C received, shutting down"),
            Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
        }
        shutdown.cancel();
    });

    println!("tgmux is running. Press Ctrl-C to stop.");
    router.run(cancel).await?;
    println!("tgmux stopped.");
    Ok(())
}

fn cmd_config_show(config: Option<&Path>) -> Result<()> {
    let mut settings = effective_settings(config)?;
    if settings.telegram.bot_token.is_some() {
        settings.telegram.bot_token = Some("********".to_string());
    }
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

fn cmd_config_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "Settings file already exists at {}. Use --force to overwrite.",
            path.display()
        );
    }
    save_settings_to(&Settings::default(), path)?;
    println!("Wrote default settings to {}", path.display());
    Ok(())
}
