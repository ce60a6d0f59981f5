//! tgmux library root.

pub mod bot;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod telegram;
pub mod transport;

pub use cli::Commands;
pub use config::{load_settings, Settings};
pub use core::{Context, ConversationQueue, Message, QueueManager, Reply, Router, RouterBuilder};
pub use error::{Error, Result};
pub use telegram::TelegramTransport;
pub use transport::{ChannelTransport, Transport};
