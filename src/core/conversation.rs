//! Conversation data: inbound messages, handler context and replies.
//!
//! A conversation is everything exchanged with one chat id. The chat id
//! rendered as a string is the key the queue registry and the state
//! provider see.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who sent a message.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct Sender {
    /// Platform user id
    pub id: u64,

    /// Username without the leading `@`
    pub username: Option<String>,

    /// Display name
    pub full_name: String,
}

/// A command invocation such as `/start` or `/help topic`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Command {
    /// Name without the slash or `@botname` suffix
    pub name: String,

    /// Everything after the command token, trimmed
    pub args: String,
}

/// Parse a command from message text.
///
/// Returns `None` for plain text and for a bare `/`.
///
/// # Examples
///
/// ```
/// let cmd = tgmux::core::conversation::parse_command("/start@my_bot now").unwrap();
/// assert_eq!(cmd.name, "start");
/// assert_eq!(cmd.args, "now");
/// ```
pub fn parse_command(text: &str) -> Option<Command> {
    let rest = text.strip_prefix('/')?;
    let (token, args) = match rest.find(char::is_whitespace) {
        Some(idx) => (&rest[..idx], rest[idx..].trim()),
        None => (rest, ""),
    };
    let name = token.split('@').next().unwrap_or("");
    if name.is_empty() {
        return None;
    }

    Some(Command {
        name: name.to_string(),
        args: args.to_string(),
    })
}

/// An inbound message. Never mutated once built.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    /// Chat the message arrived in
    pub chat_id: i64,

    /// Platform message id (optional)
    pub message_id: Option<i32>,

    /// Sender identity
    pub sender: Sender,

    /// Raw text, empty for captions-only or empty messages
    pub text: String,

    /// Parsed command, if the text starts with one
    pub command: Option<Command>,

    /// When the transport received it
    pub received_at: DateTime<Utc>,
}

impl Message {
    /// Create a message from raw text, parsing a leading command.
    pub fn new(chat_id: i64, sender: Sender, text: &str) -> Self {
        Self {
            chat_id,
            message_id: None,
            sender,
            text: text.to_string(),
            command: parse_command(text),
            received_at: Utc::now(),
        }
    }

    /// Set the platform message id.
    pub fn with_message_id(mut self, message_id: i32) -> Self {
        self.message_id = Some(message_id);
        self
    }

    /// Registry key for this message's conversation.
    pub fn conversation_id(&self) -> String {
        self.chat_id.to_string()
    }

    /// Command name, if any.
    pub fn command_name(&self) -> Option<&str> {
        self.command.as_ref().map(|c| c.name.as_str())
    }
}

/// An outbound reply.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub chat_id: i64,
    pub text: String,
}

impl Reply {
    pub fn new(chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
        }
    }
}

/// What handlers and the state provider get to look at.
#[derive(Debug, Clone)]
pub struct Context {
    message: Message,
    conversation_id: String,
}

impl Context {
    pub fn new(message: Message) -> Self {
        let conversation_id = message.conversation_id();
        Self {
            message,
            conversation_id,
        }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn chat_id(&self) -> i64 {
        self.message.chat_id
    }

    pub fn text(&self) -> &str {
        &self.message.text
    }

    pub fn command(&self) -> Option<&Command> {
        self.message.command.as_ref()
    }

    pub fn sender(&self) -> &Sender {
        &self.message.sender
    }

    /// Build a reply to this conversation.
    pub fn reply(&self, text: impl Into<String>) -> Reply {
        Reply::new(self.message.chat_id, text)
    }

    pub fn into_message(self) -> Message {
        self.message
    }
}
