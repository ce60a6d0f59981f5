//! Core module - conversation queues and routing.
//!
//! This module contains the heart of tgmux's message processing:
//! - Per-conversation bounded queues, each served by one worker
//! - The queue registry with lazy creation and periodic sweeping
//! - Command and state routing with failure containment

pub mod conversation;
pub mod handler;
pub mod manager;
pub mod queue;
pub mod routing;

pub use conversation::{Command, Context, Message, Reply, Sender};
pub use handler::{CommandHandler, FnStateHandler, HandlerResult, StateHandler, StateProvider};
pub use manager::QueueManager;
pub use queue::{ConversationQueue, MessageProcessor, QueueWorker};
pub use routing::{Router, RouterBuilder};
