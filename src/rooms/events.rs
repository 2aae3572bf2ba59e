use serde::{Deserialize, Serialize};

use crate::preview::Preview;

/// Everything sent over a room connection, tagged by kind on the wire:
/// `{"type": "Message", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    Snapshot { messages: Vec<Message>, topic: String },
    Message(Message),
    Preview(Preview),
    Topic(String),
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub user_name: String,
    pub text: String,
    /// Store-assigned id, strictly increasing within a room.
    pub timestamp: u64,
}

/// Inbound frame. Only the text matters; the author is whoever joined the
/// connection, so any `userName` in the payload is dropped here.
#[derive(Debug, Deserialize)]
pub struct Inbound {
    #[serde(default)]
    pub text: String,
}
