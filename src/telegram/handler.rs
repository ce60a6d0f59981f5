//! Conversion of Telegram messages into router messages.

use teloxide::types::Message as TgMessage;

use crate::core::conversation::{Message, Sender};

/// Convert an incoming Telegram message.
///
/// Commands are only recognised in the text. A message without text falls
/// back to its caption (as plain text) and otherwise arrives with empty text,
/// so state handlers still see stickers, photos and the like.
pub fn convert_message(msg: &TgMessage) -> Message {
    let sender = msg
        .from
        .as_ref()
        .map(|u| Sender {
            id: u.id.0,
            username: u.username.clone(),
            full_name: u.full_name(),
        })
        .unwrap_or_default();

    let message = match msg.text() {
        Some(text) => Message::new(msg.chat.id.0, sender, text),
        None => {
            let mut message = Message::new(msg.chat.id.0, sender, msg.caption().unwrap_or(""));
            message.command = None;
            message
        }
    };

    message.with_message_id(msg.id.0)
}
