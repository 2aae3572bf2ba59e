use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::{error::Error, store::SharedStore};

use super::RoomPath;

/// Windowed presence. Activity lands in fixed-width time buckets (half the
/// inactivity timeout wide) whose TTL is claimed by the first writer, so the
/// store forgets a bucket on its own once it can no longer fall inside any
/// query window. No per-user expiry bookkeeping, no background sweep.
#[derive(Clone)]
pub struct Presence {
    store: SharedStore,
    timeout: Duration,
}

/// Buckets overlapping the last `timeout`: the current one plus two before.
const WINDOW_BUCKETS: u64 = 3;

impl Presence {
    pub fn new(store: SharedStore, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub async fn record_activity(
        &self,
        room: &RoomPath,
        user: &str,
        at: SystemTime,
    ) -> Result<(), Error> {
        let width = self.bucket_width_ms();
        let ms = unix_ms(at);
        let key = bucket_key(room, ms - ms % width);

        self.store.set_add(&key, user).await?;
        // A bucket stays relevant for one window past its own width.
        self.store
            .expire_if_unset(&key, self.timeout + self.timeout / 2)
            .await?;
        Ok(())
    }

    /// Users who posted within the inactivity timeout. Boundary users may
    /// linger until their bucket's TTL lapses; that slack is accepted.
    pub async fn active_users(&self, room: &RoomPath) -> Result<Vec<String>, Error> {
        Ok(self.store.set_union(&self.window_keys(room)).await?)
    }

    /// Sum of bucket cardinalities. A user active in two adjacent buckets
    /// counts twice; cheaper than the union and good enough for ranking.
    pub async fn active_count(&self, room: &RoomPath) -> Result<usize, Error> {
        let mut count = 0;
        for key in self.window_keys(room) {
            count += self.store.set_cardinality(&key).await?;
        }
        Ok(count)
    }

    fn bucket_width_ms(&self) -> u64 {
        (self.timeout.as_millis() as u64 / 2).max(1)
    }

    fn window_keys(&self, room: &RoomPath) -> Vec<String> {
        let width = self.bucket_width_ms();
        let now = unix_ms(SystemTime::now());
        let current = now - now % width;
        (0..WINDOW_BUCKETS)
            .filter_map(|i| current.checked_sub(i * width))
            .map(|start| bucket_key(room, start))
            .collect()
    }
}

fn bucket_key(room: &RoomPath, start_ms: u64) -> String {
    format!("active:{room}:{start_ms}")
}

fn unix_ms(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::MemoryStore;

    fn presence(timeout: Duration) -> Presence {
        Presence::new(Arc::new(MemoryStore::new(50)), timeout)
    }

    #[tokio::test]
    async fn recorded_user_is_active() {
        let presence = presence(Duration::from_secs(600));
        let room = RoomPath::parse("general").unwrap();

        presence
            .record_activity(&room, "alice", SystemTime::now())
            .await
            .unwrap();
        let users = presence.active_users(&room).await.unwrap();
        assert_eq!(users, ["alice"]);
        assert_eq!(presence.active_count(&room).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn fresh_room_is_empty_not_an_error() {
        let presence = presence(Duration::from_secs(600));
        let room = RoomPath::parse("ghost-town").unwrap();
        assert!(presence.active_users(&room).await.unwrap().is_empty());
        assert_eq!(presence.active_count(&room).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn users_are_deduplicated_across_buckets() {
        let presence = presence(Duration::from_secs(600));
        let room = RoomPath::parse("general").unwrap();
        let now = SystemTime::now();

        // Same user in the current and the previous bucket.
        presence.record_activity(&room, "alice", now).await.unwrap();
        presence
            .record_activity(&room, "alice", now - Duration::from_secs(301))
            .await
            .unwrap();

        assert_eq!(presence.active_users(&room).await.unwrap(), ["alice"]);
        // The count is allowed to see her twice.
        assert_eq!(presence.active_count(&room).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn activity_expires_once_buckets_lapse() {
        let presence = presence(Duration::from_millis(100));
        let room = RoomPath::parse("general").unwrap();

        presence
            .record_activity(&room, "alice", SystemTime::now())
            .await
            .unwrap();
        assert_eq!(presence.active_users(&room).await.unwrap(), ["alice"]);

        // Past timeout + bucket width, every covering bucket has expired.
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(presence.active_users(&room).await.unwrap().is_empty());
    }
}
