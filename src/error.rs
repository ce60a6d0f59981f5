//! Error types for tgmux.

use thiserror::Error;

use crate::core::conversation::Message;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Telegram error: {0}")]
    Telegram(#[from] teloxide::RequestError),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Why a single message could not be answered by its handler.
///
/// Every variant ends in the generic error reply; none of them stops a worker.
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("while getting conversation state: {0:#}")]
    State(#[source] anyhow::Error),

    #[error("state handler `{0}` isn't registered")]
    UnregisteredState(String),

    #[error("while cleaning up state `{state}`: {source:#}")]
    Cleanup {
        state: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("while handling command `{command}`: {source:#}")]
    Command {
        command: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("while using state handler `{state}`: {source:#}")]
    StateHandler {
        state: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("handler panicked: {0}")]
    Panicked(String),
}

/// A conversation queue refused a message. The message is handed back.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("conversation queue is retired")]
    Retired(Message),

    #[error("conversation queue is full")]
    Full(Message),
}

impl QueueError {
    pub fn into_message(self) -> Message {
        match self {
            QueueError::Retired(message) | QueueError::Full(message) => message,
        }
    }
}
