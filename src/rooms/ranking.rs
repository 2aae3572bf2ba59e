use serde::Serialize;

use crate::{error::Error, store::SharedStore};

use super::{RoomPath, presence::Presence};

fn rank_key(parent: &RoomPath) -> String {
    format!("subrooms:{parent}")
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedRoom {
    pub room: String,
    pub score: f64,
}

/// Activity ranking of a room's children. Scores are refreshed on demand by
/// recomputing each child's active count, so ranking stays eventually
/// consistent at a cost proportional to the number of children.
#[derive(Clone)]
pub struct Ranking {
    store: SharedStore,
    presence: Presence,
}

impl Ranking {
    pub fn new(store: SharedStore, presence: Presence) -> Self {
        Self { store, presence }
    }

    /// Called once when a child room is created. The initial score of 1
    /// separates "exists" from "never saw activity".
    pub async fn register_child(&self, parent: &RoomPath, child: &RoomPath) -> Result<(), Error> {
        self.store
            .ranked_upsert(&rank_key(parent), child.as_str(), 1.0)
            .await?;
        Ok(())
    }

    /// Recomputes every known child's score, then returns the top `limit`
    /// by score descending. Ties keep registration order (the order the
    /// ranked structure gives natively). A room with no children yields an
    /// empty list.
    pub async fn refresh_and_rank(
        &self,
        parent: &RoomPath,
        limit: usize,
    ) -> Result<Vec<RankedRoom>, Error> {
        let key = rank_key(parent);
        let children = self.store.ranked_top(&key, usize::MAX).await?;
        for (child, _) in &children {
            let Ok(child_path) = RoomPath::parse(child) else {
                continue;
            };
            let count = self.presence.active_count(&child_path).await?;
            self.store.ranked_upsert(&key, child, count as f64).await?;
        }

        let top = self.store.ranked_top(&key, limit).await?;
        Ok(top
            .into_iter()
            .map(|(room, score)| RankedRoom { room, score })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::Arc,
        time::{Duration, SystemTime},
    };

    use super::*;
    use crate::store::MemoryStore;

    fn setup() -> (Ranking, Presence) {
        let store: SharedStore = Arc::new(MemoryStore::new(50));
        let presence = Presence::new(store.clone(), Duration::from_secs(600));
        (Ranking::new(store, presence.clone()), presence)
    }

    #[tokio::test]
    async fn childless_room_ranks_empty() {
        let (ranking, _) = setup();
        let top = ranking
            .refresh_and_rank(&RoomPath::parse("general").unwrap(), 10)
            .await
            .unwrap();
        assert!(top.is_empty());
    }

    #[tokio::test]
    async fn ranks_children_by_recomputed_activity() {
        let (ranking, presence) = setup();
        let parent = RoomPath::parse("general").unwrap();
        let busy = RoomPath::parse("general/busy").unwrap();
        let quiet = RoomPath::parse("general/quiet").unwrap();

        ranking.register_child(&parent, &quiet).await.unwrap();
        ranking.register_child(&parent, &busy).await.unwrap();

        for user in ["alice", "bob", "carol"] {
            presence
                .record_activity(&busy, user, SystemTime::now())
                .await
                .unwrap();
        }

        let top = ranking.refresh_and_rank(&parent, 10).await.unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].room, "general/busy");
        assert_eq!(top[0].score, 3.0);
        assert_eq!(top[1].room, "general/quiet");
        // Refresh found no activity, overwriting the registration score.
        assert_eq!(top[1].score, 0.0);
    }

    #[tokio::test]
    async fn limit_caps_the_result() {
        let (ranking, _) = setup();
        let parent = RoomPath::parse("general").unwrap();
        for name in ["a", "b", "c", "d"] {
            let child = RoomPath::parse(&format!("general/{name}")).unwrap();
            ranking.register_child(&parent, &child).await.unwrap();
        }
        let top = ranking.refresh_and_rank(&parent, 2).await.unwrap();
        assert_eq!(top.len(), 2);
        // All scores equal, so registration order breaks the tie.
        assert_eq!(top[0].room, "general/a");
        assert_eq!(top[1].room, "general/b");
    }
}
