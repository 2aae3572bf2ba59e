mod admin;
mod ws;

pub mod events;
pub mod hub;
pub mod namespace;
pub mod presence;
pub mod ranking;

use std::fmt;
use std::time::SystemTime;

use axum::{
    Router,
    routing::{get, post},
};

use crate::{AppState, error::Error};
use events::{Event, Message};

pub fn router() -> Router<AppState> {
    Router::new()
        // Room paths contain slashes, so the capture has to sit last.
        .route("/ws", get(ws::root_ws))
        .route("/ws/{*room}", get(ws::room_ws))
        .route("/rooms/{*room}", post(admin::new_room))
        .route("/topic/{*room}", post(admin::set_topic))
        .route("/active", get(admin::root_active_users))
        .route("/active/{*room}", get(admin::active_users))
        .route("/subrooms", get(admin::root_top_subrooms))
        .route("/subrooms/{*room}", get(admin::top_subrooms))
}

/// A `/`-delimited room path. The root room is the empty path; every other
/// path has non-empty segments only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomPath(String);

impl RoomPath {
    pub fn root() -> Self {
        Self(String::new())
    }

    pub fn parse(raw: &str) -> Result<Self, Error> {
        if raw.is_empty() {
            return Ok(Self::root());
        }
        if raw.split('/').any(str::is_empty) {
            return Err(Error::InvalidRoomPath(raw.to_owned()));
        }
        Ok(Self(raw.to_owned()))
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Path with the last segment removed; `None` for the root.
    pub fn parent(&self) -> Option<RoomPath> {
        if self.is_root() {
            return None;
        }
        Some(match self.0.rsplit_once('/') {
            Some((head, _)) => RoomPath(head.to_owned()),
            None => RoomPath::root(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The message-handling pipeline behind both the websocket loop and the
/// connection-less room-creation endpoint: append (creating the room when
/// this is its first message), record presence, fan out to the room, tell
/// the parent room about a newborn child, then kick off the preview fetch
/// off the critical path.
pub(crate) async fn publish(
    state: &AppState,
    room: &RoomPath,
    author: &str,
    text: &str,
) -> Result<(bool, Message), Error> {
    let (new_room, message) = state.namespace.append_message(room, author, text).await?;

    // Presence is advisory; a failed write must not reject the message.
    if let Err(err) = state
        .presence
        .record_activity(room, author, SystemTime::now())
        .await
    {
        tracing::warn!(room = %room, user = author, %err, "presence record failed");
    }

    if let Some(hub) = state.hubs.get(room) {
        log_dropped(room, hub.broadcast(&Event::Message(message.clone()), &[]));
    }

    if new_room {
        if let Some(parent) = room.parent() {
            if let Err(err) = state.ranking.register_child(&parent, room).await {
                tracing::warn!(room = %room, %err, "sub-room registration failed");
            }
            if let Some(parent_hub) = state.hubs.get(&parent) {
                log_dropped(
                    &parent,
                    parent_hub.broadcast(&Event::Message(message.clone()), &[]),
                );
            }
        }
    }

    state.previews.spawn_maybe_preview(
        state.hubs.clone(),
        room.clone(),
        author.to_owned(),
        text.to_owned(),
    );

    Ok((new_room, message))
}

pub(crate) fn log_dropped(room: &RoomPath, dropped: Vec<String>) {
    if !dropped.is_empty() {
        tracing::warn!(room = %room, ?dropped, "dropped unreachable connections during broadcast");
    }
}
