use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Mutex,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;

use super::{Entry, Fields, Store, StoreError, StoreResult};

/// How far past the cap a log may grow before it gets cut back. Trimming in
/// batches keeps appends cheap; the cap is approximate on purpose.
const TRIM_SLACK: usize = 16;

/// Process-local [`Store`]. Conditional appends, TTLs and ranked sets carry
/// the same semantics a networked store would provide; every operation is
/// atomic under one mutex, and expiry is lazy (dead keys are dropped when
/// next touched, not by a sweeper).
pub struct MemoryStore {
    log_cap: usize,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    logs: HashMap<String, Log>,
    kv: HashMap<String, Expiring<String>>,
    sets: HashMap<String, Expiring<HashSet<String>>>,
    ranks: HashMap<String, Vec<(String, f64)>>,
}

#[derive(Default)]
struct Log {
    last_id: u64,
    entries: VecDeque<Entry>,
}

struct Expiring<T> {
    value: T,
    deadline: Option<Instant>,
}

impl<T> Expiring<T> {
    fn fresh(value: T) -> Self {
        Self { value, deadline: None }
    }

    fn live(&self) -> bool {
        self.deadline.is_none_or(|deadline| Instant::now() < deadline)
    }
}

impl MemoryStore {
    pub fn new(log_cap: usize) -> Self {
        Self {
            log_cap,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("store mutex poisoned")
    }
}

impl Log {
    fn append(&mut self, fields: Fields, cap: usize) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let id = now.max(self.last_id + 1);
        self.last_id = id;
        self.entries.push_back(Entry { id, fields });
        if self.entries.len() > cap + TRIM_SLACK {
            while self.entries.len() > cap {
                self.entries.pop_front();
            }
        }
        id
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn append_conditional(&self, log_key: &str, fields: Fields) -> StoreResult<u64> {
        let mut inner = self.lock();
        match inner.logs.get_mut(log_key) {
            Some(log) => Ok(log.append(fields, self.log_cap)),
            None => Err(StoreError::NotFound),
        }
    }

    async fn append_unconditional(&self, log_key: &str, fields: Fields) -> StoreResult<u64> {
        let mut inner = self.lock();
        let log = inner.logs.entry(log_key.to_owned()).or_default();
        Ok(log.append(fields, self.log_cap))
    }

    async fn read_range(&self, log_key: &str, limit: usize) -> StoreResult<Vec<Entry>> {
        let inner = self.lock();
        let log = inner.logs.get(log_key).ok_or(StoreError::NotFound)?;
        Ok(log.entries.iter().rev().take(limit).cloned().collect())
    }

    async fn get(&self, key: &str) -> StoreResult<String> {
        let mut inner = self.lock();
        match inner.kv.get(key) {
            Some(entry) if entry.live() => Ok(entry.value.clone()),
            Some(_) => {
                inner.kv.remove(key);
                Err(StoreError::NotFound)
            }
            None => Err(StoreError::NotFound),
        }
    }

    async fn set(&self, key: &str, value: String) -> StoreResult<()> {
        self.lock().kv.insert(key.to_owned(), Expiring::fresh(value));
        Ok(())
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let inner = self.lock();
        Ok(inner.logs.contains_key(key)
            || inner.kv.get(key).is_some_and(Expiring::live)
            || inner.sets.get(key).is_some_and(Expiring::live))
    }

    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> StoreResult<()> {
        self.lock().kv.insert(
            key.to_owned(),
            Expiring {
                value,
                deadline: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn set_add(&self, bucket_key: &str, member: &str) -> StoreResult<()> {
        let mut inner = self.lock();
        let bucket = inner
            .sets
            .entry(bucket_key.to_owned())
            .or_insert_with(|| Expiring::fresh(HashSet::new()));
        if !bucket.live() {
            *bucket = Expiring::fresh(HashSet::new());
        }
        bucket.value.insert(member.to_owned());
        Ok(())
    }

    async fn expire_if_unset(&self, bucket_key: &str, ttl: Duration) -> StoreResult<()> {
        let mut inner = self.lock();
        if let Some(bucket) = inner.sets.get_mut(bucket_key) {
            if bucket.live() && bucket.deadline.is_none() {
                bucket.deadline = Some(Instant::now() + ttl);
            }
        }
        Ok(())
    }

    async fn set_union(&self, bucket_keys: &[String]) -> StoreResult<Vec<String>> {
        let inner = self.lock();
        let mut seen = HashSet::new();
        let mut members = Vec::new();
        for key in bucket_keys {
            let Some(bucket) = inner.sets.get(key).filter(|bucket| bucket.live()) else {
                continue;
            };
            for member in &bucket.value {
                if seen.insert(member.clone()) {
                    members.push(member.clone());
                }
            }
        }
        Ok(members)
    }

    async fn set_cardinality(&self, bucket_key: &str) -> StoreResult<usize> {
        let inner = self.lock();
        Ok(inner
            .sets
            .get(bucket_key)
            .filter(|bucket| bucket.live())
            .map_or(0, |bucket| bucket.value.len()))
    }

    async fn ranked_upsert(&self, rank_key: &str, member: &str, score: f64) -> StoreResult<()> {
        let mut inner = self.lock();
        let rank = inner.ranks.entry(rank_key.to_owned()).or_default();
        match rank.iter_mut().find(|(name, _)| name == member) {
            Some(slot) => slot.1 = score,
            None => rank.push((member.to_owned(), score)),
        }
        Ok(())
    }

    async fn ranked_top(&self, rank_key: &str, limit: usize) -> StoreResult<Vec<(String, f64)>> {
        let inner = self.lock();
        let Some(rank) = inner.ranks.get(rank_key) else {
            return Ok(Vec::new());
        };
        let mut sorted = rank.clone();
        // Stable sort: equal scores keep insertion order.
        sorted.sort_by(|a, b| b.1.total_cmp(&a.1));
        sorted.truncate(limit);
        Ok(sorted)
    }
}
