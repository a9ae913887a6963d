pub mod memory;
pub mod readiness;
pub mod redis;

pub use memory::MemoryStore;
pub use readiness::{Readiness, ReadyToken};
pub use redis::RedisStore;

use crate::edge::warrant::WarrantSet;
use crate::errors::EdgeError;
use crate::settings::{self, DatastoreKind};

/// The warrant cache, backed by one of two stores chosen once at startup.
///
/// The synchronizer is the only writer; checks only read.
#[derive(Debug)]
pub enum Datastore {
    Memory(MemoryStore),
    Redis(RedisStore),
}

impl Datastore {
    pub async fn from_settings(cfg: &settings::Datastore) -> Result<Self, EdgeError> {
        match cfg.kind {
            DatastoreKind::Memory => {
                tracing::info!("Using in-memory warrant cache");
                Ok(Datastore::Memory(MemoryStore::new()))
            }
            DatastoreKind::Redis => Ok(Datastore::Redis(RedisStore::connect(&cfg.redis).await?)),
        }
    }

    pub fn memory() -> Self {
        Datastore::Memory(MemoryStore::new())
    }

    /// Presence is the authorization signal; the count itself is not exposed.
    pub async fn get(&self, key: &str) -> Result<bool, EdgeError> {
        match self {
            Datastore::Memory(store) => Ok(store.contains(key)),
            Datastore::Redis(store) => store.contains(key).await,
        }
    }

    pub async fn count(&self, key: &str) -> Result<u32, EdgeError> {
        match self {
            Datastore::Memory(store) => Ok(store.count(key)),
            Datastore::Redis(store) => store.count(key).await,
        }
    }

    pub async fn set(&self, key: &str, count: u32) -> Result<(), EdgeError> {
        match self {
            Datastore::Memory(store) => {
                store.set(key, count);
                Ok(())
            }
            Datastore::Redis(store) => store.set(key, count).await,
        }
    }

    pub async fn incr(&self, key: &str) -> Result<(), EdgeError> {
        match self {
            Datastore::Memory(store) => {
                store.incr(key);
                Ok(())
            }
            Datastore::Redis(store) => store.incr(key).await,
        }
    }

    pub async fn decr(&self, key: &str) -> Result<(), EdgeError> {
        match self {
            Datastore::Memory(store) => {
                store.decr(key);
                Ok(())
            }
            Datastore::Redis(store) => store.decr(key).await,
        }
    }

    pub async fn clear(&self) -> Result<(), EdgeError> {
        match self {
            Datastore::Memory(store) => {
                store.clear();
                Ok(())
            }
            Datastore::Redis(store) => store.clear().await,
        }
    }

    pub async fn reconcile(&self, warrants: &WarrantSet) -> Result<(), EdgeError> {
        match self {
            Datastore::Memory(store) => {
                store.reconcile(warrants);
                Ok(())
            }
            Datastore::Redis(store) => store.reconcile(warrants).await,
        }
    }

    pub fn set_ready(&self, ready: bool) {
        match self {
            Datastore::Memory(store) => store.set_ready(ready),
            Datastore::Redis(store) => store.set_ready(ready),
        }
    }

    pub fn is_ready(&self) -> bool {
        match self {
            Datastore::Memory(store) => store.is_ready(),
            Datastore::Redis(store) => store.is_ready(),
        }
    }

    /// Token for the current ready period; changes whenever a reload starts.
    pub fn ready_token(&self) -> Option<ReadyToken> {
        match self {
            Datastore::Memory(store) => store.ready_token(),
            Datastore::Redis(store) => store.ready_token(),
        }
    }
}

/// Read side of the cache as seen by the check evaluator.
#[allow(async_fn_in_trait)]
pub trait WarrantLookup {
    /// `None` while the cache is not ready. Lookups made between two equal
    /// tokens saw no reload.
    fn ready_token(&self) -> Option<ReadyToken>;

    async fn contains(&self, key: &str) -> Result<bool, EdgeError>;
}

impl WarrantLookup for Datastore {
    fn ready_token(&self) -> Option<ReadyToken> {
        Datastore::ready_token(self)
    }

    async fn contains(&self, key: &str) -> Result<bool, EdgeError> {
        self.get(key).await
    }
}
