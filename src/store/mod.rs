mod memory;

pub use memory::MemoryStore;

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;

pub type Fields = HashMap<String, String>;

/// One entry of an append-only log. The id is store-assigned and strictly
/// increasing within a log.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub id: u64,
    pub fields: Fields,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key not found")]
    NotFound,

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub type SharedStore = Arc<dyn Store>;

/// Boundary to the durable store. Multiple process instances may share one
/// store, so room-creation races and message ordering are settled here, never
/// by in-process locks. `append_conditional` must refuse to create the log
/// (that refusal is how callers learn a room does not exist yet), and
/// `append_unconditional` must create it when absent.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Appends only if `log_key` already exists; `NotFound` otherwise.
    async fn append_conditional(&self, log_key: &str, fields: Fields) -> StoreResult<u64>;

    /// Appends, creating the log when absent.
    async fn append_unconditional(&self, log_key: &str, fields: Fields) -> StoreResult<u64>;

    /// Up to `limit` entries, most recent first. Absent log is `NotFound`.
    async fn read_range(&self, log_key: &str, limit: usize) -> StoreResult<Vec<Entry>>;

    async fn get(&self, key: &str) -> StoreResult<String>;
    async fn set(&self, key: &str, value: String) -> StoreResult<()>;
    async fn exists(&self, key: &str) -> StoreResult<bool>;
    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> StoreResult<()>;

    async fn set_add(&self, bucket_key: &str, member: &str) -> StoreResult<()>;
    /// Sets a TTL on `bucket_key` only if none is set yet.
    async fn expire_if_unset(&self, bucket_key: &str, ttl: Duration) -> StoreResult<()>;
    /// De-duplicated union; absent buckets contribute nothing.
    async fn set_union(&self, bucket_keys: &[String]) -> StoreResult<Vec<String>>;
    /// Cardinality of one bucket; 0 when absent.
    async fn set_cardinality(&self, bucket_key: &str) -> StoreResult<usize>;

    async fn ranked_upsert(&self, rank_key: &str, member: &str, score: f64) -> StoreResult<()>;
    /// Top `limit` members by score descending.
    async fn ranked_top(&self, rank_key: &str, limit: usize) -> StoreResult<Vec<(String, f64)>>;
}
