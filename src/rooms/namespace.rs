use crate::{
    error::Error,
    store::{Entry, Fields, SharedStore, StoreError},
};

use super::RoomPath;
use super::events::Message;

fn log_key(room: &RoomPath) -> String {
    format!("messages:{room}")
}

fn topic_key(room: &RoomPath) -> String {
    format!("topic:{room}")
}

/// The hierarchical room namespace. A room exists exactly when its message
/// log does, so "first message creates the room" falls out of the store's
/// conditional-append semantics rather than any in-process bookkeeping.
#[derive(Clone)]
pub struct Namespace {
    store: SharedStore,
    snapshot_len: usize,
}

impl Namespace {
    pub fn new(store: SharedStore, snapshot_len: usize) -> Self {
        Self { store, snapshot_len }
    }

    /// Appends `text` as `author` to the room's log, creating the room when
    /// the log is absent. Returns whether this call created the room.
    ///
    /// Creation is a two-step protocol: a conditional append that refuses to
    /// create the log, and only on its `NotFound` a parent-existence check
    /// followed by an unconditional append. The store arbitrates concurrent
    /// first messages; both writers end up in one shared log.
    pub async fn append_message(
        &self,
        room: &RoomPath,
        author: &str,
        text: &str,
    ) -> Result<(bool, Message), Error> {
        if text.is_empty() {
            return Err(Error::Malformed("empty message text".to_owned()));
        }

        let fields = Fields::from([
            ("userName".to_owned(), author.to_owned()),
            ("text".to_owned(), text.to_owned()),
        ]);

        let (new_room, id) = match self.store.append_conditional(&log_key(room), fields.clone()).await
        {
            Ok(id) => (false, id),
            Err(StoreError::NotFound) => {
                if let Some(parent) = room.parent() {
                    // The root is exempt; everything else needs a live parent.
                    if !parent.is_root() && !self.store.exists(&log_key(&parent)).await? {
                        return Err(Error::ParentNotFound(room.to_string()));
                    }
                }
                let id = self.store.append_unconditional(&log_key(room), fields).await?;
                (true, id)
            }
            Err(err) => return Err(err.into()),
        };

        Ok((
            new_room,
            Message {
                user_name: author.to_owned(),
                text: text.to_owned(),
                timestamp: id,
            },
        ))
    }

    /// Recent messages in chronological order plus the current topic. An
    /// absent room yields an empty snapshot, not an error.
    pub async fn get_snapshot(&self, room: &RoomPath) -> Result<(Vec<Message>, String), Error> {
        let mut messages = match self.store.read_range(&log_key(room), self.snapshot_len).await {
            Ok(entries) => entries.into_iter().map(to_message).collect::<Vec<_>>(),
            Err(StoreError::NotFound) => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        messages.reverse();

        let topic = match self.store.get(&topic_key(room)).await {
            Ok(topic) => topic,
            Err(StoreError::NotFound) => String::new(),
            Err(err) => return Err(err.into()),
        };

        Ok((messages, topic))
    }

    pub async fn set_topic(&self, room: &RoomPath, topic: &str) -> Result<(), Error> {
        if !self.store.exists(&log_key(room)).await? {
            return Err(Error::RoomNotFound(room.to_string()));
        }
        self.store.set(topic_key(room).as_str(), topic.to_owned()).await?;
        Ok(())
    }
}

fn to_message(entry: Entry) -> Message {
    Message {
        user_name: entry.fields.get("userName").cloned().unwrap_or_default(),
        text: entry.fields.get("text").cloned().unwrap_or_default(),
        timestamp: entry.id,
    }
}
