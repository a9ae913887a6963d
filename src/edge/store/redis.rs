use std::future::Future;

use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::Mutex;

use crate::edge::store::readiness::{Readiness, ReadyToken};
use crate::edge::warrant::WarrantSet;
use crate::errors::EdgeError;
use crate::settings;

/// Every cache key lives under `warrant:` so the keyspace can be shared.
const NAMESPACE: &str = "warrant";

/// Attempts at the WATCH/MULTI/EXEC decrement before reporting a conflict.
const DECR_MAX_ATTEMPTS: u32 = 10;

const SCAN_BATCH: usize = 500;

enum Commit {
    Applied,
    Conflict,
}

/// Reference counts kept in Redis.
///
/// Plain commands share one multiplexed connection. Optimistic transactions
/// need WATCH state that no other command can disturb, so they run on a second
/// connection held behind a mutex. Readiness is local to this process.
pub struct RedisStore {
    conn: MultiplexedConnection,
    tx_conn: Mutex<MultiplexedConnection>,
    ready: Readiness,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

fn with_namespace(key: &str) -> String {
    format!("{NAMESPACE}:{key}")
}

fn without_namespace(key: &str) -> &str {
    key.strip_prefix(NAMESPACE)
        .and_then(|k| k.strip_prefix(':'))
        .unwrap_or(key)
}

impl RedisStore {
    /// Connects and pings; an unreachable server is a construction error.
    pub async fn connect(cfg: &settings::Redis) -> Result<Self, EdgeError> {
        let connect_err = |source| EdgeError::RedisConnect {
            host: cfg.hostname.clone(),
            port: cfg.port,
            source,
        };

        let client = redis::Client::open(cfg.connection_url().as_str()).map_err(connect_err)?;
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(connect_err)?;
        let tx_conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(connect_err)?;

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(connect_err)?;

        tracing::info!(host = %cfg.hostname, port = cfg.port, db = cfg.database, "Connected to redis");

        Ok(Self {
            conn,
            tx_conn: Mutex::new(tx_conn),
            ready: Readiness::new(),
        })
    }

    pub async fn contains(&self, key: &str) -> Result<bool, EdgeError> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(with_namespace(key)).await?;
        Ok(exists)
    }

    pub async fn count(&self, key: &str) -> Result<u32, EdgeError> {
        let mut conn = self.conn.clone();
        let count: Option<u32> = conn.get(with_namespace(key)).await?;
        Ok(count.unwrap_or(0))
    }

    pub async fn set(&self, key: &str, count: u32) -> Result<(), EdgeError> {
        let mut conn = self.conn.clone();
        if count == 0 {
            let _: () = conn.del(with_namespace(key)).await?;
        } else {
            let _: () = conn.set(with_namespace(key), count).await?;
        }
        Ok(())
    }

    pub async fn incr(&self, key: &str) -> Result<(), EdgeError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.incr(with_namespace(key), 1).await?;
        Ok(())
    }

    /// Decrements, deleting the key once it would reach zero. Retried under
    /// WATCH until a commit lands or the attempt budget runs out.
    pub async fn decr(&self, key: &str) -> Result<(), EdgeError> {
        let namespaced = with_namespace(key);
        let conn = self.tx_conn.lock().await;

        // clones share the guarded connection, so WATCH state is preserved
        retry_on_conflict(key, DECR_MAX_ATTEMPTS, || {
            let mut conn = conn.clone();
            let namespaced = namespaced.clone();
            async move { try_decr(&mut conn, &namespaced).await }
        })
        .await
    }

    /// Makes the namespace hold exactly `warrants`. The key scan is not a
    /// point-in-time snapshot; concurrent changes are corrected by the next
    /// poll or event.
    pub async fn reconcile(&self, warrants: &WarrantSet) -> Result<(), EdgeError> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();

        for namespaced in self.scan_namespace().await? {
            if !warrants.has(without_namespace(&namespaced)) {
                pipe.del(&namespaced).ignore();
            }
        }

        for (key, count) in warrants.iter() {
            if count == 0 {
                pipe.del(with_namespace(key)).ignore();
            } else {
                pipe.set(with_namespace(key), count).ignore();
            }
        }

        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), EdgeError> {
        let keys = self.scan_namespace().await?;
        if keys.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for key in &keys {
            pipe.del(key).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;
        tracing::debug!(removed = keys.len(), "Cleared redis cache");
        Ok(())
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.set(ready);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.is_ready()
    }

    pub fn ready_token(&self) -> Option<ReadyToken> {
        self.ready.token()
    }

    async fn scan_namespace(&self) -> Result<Vec<String>, EdgeError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{NAMESPACE}:*");
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(keys)
    }
}

/// Runs `attempt` until it commits, at most `max_attempts` times.
async fn retry_on_conflict<F, Fut>(
    key: &str,
    max_attempts: u32,
    mut attempt: F,
) -> Result<(), EdgeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Commit, EdgeError>>,
{
    for n in 1..=max_attempts {
        match attempt().await? {
            Commit::Applied => return Ok(()),
            Commit::Conflict => tracing::debug!(key, attempt = n, "Write conflict, retrying"),
        }
    }

    Err(EdgeError::WriteConflict {
        key: key.to_string(),
    })
}

async fn try_decr(conn: &mut MultiplexedConnection, key: &str) -> Result<Commit, EdgeError> {
    match watch_count(conn, key).await? {
        Some(current) => commit_decr(conn, key, current).await,
        None => {
            let _: () = redis::cmd("UNWATCH").query_async(&mut *conn).await?;
            Ok(Commit::Applied)
        }
    }
}

/// WATCHes `key` and reads it. `None` when absent.
async fn watch_count(conn: &mut MultiplexedConnection, key: &str) -> Result<Option<i64>, EdgeError> {
    let _: () = redis::cmd("WATCH").arg(key).query_async(&mut *conn).await?;
    let current: Option<i64> = conn.get(key).await?;
    Ok(current)
}

async fn commit_decr(
    conn: &mut MultiplexedConnection,
    key: &str,
    current: i64,
) -> Result<Commit, EdgeError> {
    let mut pipe = redis::pipe();
    pipe.atomic();
    if current <= 1 {
        pipe.del(key).ignore();
    } else {
        pipe.decr(key, 1).ignore();
    }

    // EXEC replies nil when a watched key changed underneath us
    let committed: Option<()> = pipe.query_async(&mut *conn).await?;
    Ok(match committed {
        Some(()) => Commit::Applied,
        None => Commit::Conflict,
    })
}
