use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::edge::backoff::Backoff;
use crate::edge::events::SyncEvent;
use crate::edge::sse::ServerSentEvent;
use crate::edge::store::Datastore;
use crate::edge::upstream::UpstreamClient;
use crate::errors::EdgeError;
use crate::settings::{self, Reconnect, UpdateStrategy};

/// Shortest accepted polling interval, in seconds.
pub const MIN_POLLING_FREQUENCY: u64 = 10;

/// Whether event processing should keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Shutdown,
}

enum SessionEnd {
    Disconnected,
    Shutdown,
}

/// Keeps the warrant cache in step with upstream. Sole writer of the cache.
#[derive(Debug)]
pub struct Synchronizer {
    upstream: UpstreamClient,
    store: Arc<Datastore>,
    strategy: UpdateStrategy,
    polling_interval: Duration,
    reconnect: Reconnect,
}

impl Synchronizer {
    pub fn new(cfg: &settings::Upstream, store: Arc<Datastore>) -> Result<Self, EdgeError> {
        let upstream = UpstreamClient::new(cfg)?;

        if cfg.update_strategy == UpdateStrategy::Polling
            && cfg.polling_frequency < MIN_POLLING_FREQUENCY
        {
            return Err(EdgeError::InvalidPollingFrequency {
                seconds: cfg.polling_frequency,
                minimum: MIN_POLLING_FREQUENCY,
            });
        }

        Ok(Self {
            upstream,
            store,
            strategy: cfg.update_strategy,
            polling_interval: Duration::from_secs(cfg.polling_frequency),
            reconnect: cfg.reconnect.clone(),
        })
    }

    pub fn strategy(&self) -> UpdateStrategy {
        self.strategy
    }

    /// Loads once, then keeps the cache current until a terminal error or a
    /// shutdown event. Returns `Ok(())` only for shutdown.
    pub async fn run(&self) -> Result<(), EdgeError> {
        info!(strategy = ?self.strategy, "Starting edge synchronizer");
        self.initialize().await?;
        info!("Edge synchronizer initialized");

        match self.strategy {
            UpdateStrategy::Polling => self.poll().await,
            UpdateStrategy::Streaming => self.stream().await,
        }
    }

    /// Full reload. The cache is marked not ready and emptied before the
    /// fetch, so a failure leaves it empty and not ready rather than partial.
    pub async fn initialize(&self) -> Result<(), EdgeError> {
        self.store.set_ready(false);
        self.store.clear().await?;

        let warrants = self.upstream.fetch_warrants().await?;
        for (key, &count) in &warrants {
            self.store.set(key, count).await?;
        }

        self.store.set_ready(true);
        info!(warrants = warrants.len(), "Loaded warrants into cache");
        Ok(())
    }

    /// One fetch-and-reconcile cycle.
    pub async fn poll_once(&self) -> Result<(), EdgeError> {
        debug!("Fetching latest warrants");
        let warrants = self.upstream.fetch_warrants().await?;
        self.store.reconcile(&warrants).await?;
        debug!(warrants = warrants.len(), "Reconciled cache with upstream");
        Ok(())
    }

    async fn poll(&self) -> Result<(), EdgeError> {
        loop {
            tokio::time::sleep(self.polling_interval).await;
            self.poll_once().await?;
        }
    }

    async fn stream(&self) -> Result<(), EdgeError> {
        let mut backoff = Backoff::new(&self.reconnect);
        let mut reload = false;

        loop {
            match self.session(reload, &mut backoff).await {
                Ok(SessionEnd::Shutdown) => {
                    warn!("Shutdown event received. Shutting down.");
                    return Ok(());
                }
                Ok(SessionEnd::Disconnected) => {
                    warn!(endpoint = %self.upstream.streaming_endpoint(), "Disconnected from event stream")
                }
                Err(err) => warn!(error = %err, "Unable to connect to event stream"),
            }

            self.store.set_ready(false);
            reload = true;

            let Some(delay) = backoff.next_delay() else {
                return Err(EdgeError::ReconnectExhausted {
                    attempts: backoff.attempts(),
                });
            };
            info!(attempt = backoff.attempts(), ?delay, "Attempting to reconnect");
            tokio::time::sleep(delay).await;
        }
    }

    /// One connection's worth of events, processed strictly in arrival order.
    async fn session(&self, reload: bool, backoff: &mut Backoff) -> Result<SessionEnd, EdgeError> {
        if reload {
            self.initialize().await?;
        }

        let mut subscription = self.upstream.subscribe().await?;
        info!("Subscribed to warrant events");

        // a stream that closes before delivering anything still spends an attempt
        let mut delivered = false;
        while let Some(frame) = subscription.next().await {
            if !delivered {
                backoff.reset();
                delivered = true;
            }
            if self.handle(frame).await? == Flow::Shutdown {
                return Ok(SessionEnd::Shutdown);
            }
        }
        Ok(SessionEnd::Disconnected)
    }

    /// Decodes and applies one frame. Bad payloads and per-key store failures
    /// are logged and skipped; a failed reset ends the session.
    pub async fn handle(&self, frame: ServerSentEvent) -> Result<Flow, EdgeError> {
        let event = match SyncEvent::decode(&frame) {
            Ok(Some(event)) => event,
            Ok(None) => {
                debug!(kind = %frame.event, "Ignoring unknown event");
                return Ok(Flow::Continue);
            }
            Err(err) => {
                warn!(error = %err, data = %frame.data, "Skipping malformed event");
                return Ok(Flow::Continue);
            }
        };

        let kind = event.kind();
        let reset = matches!(event, SyncEvent::ResetWarrants);
        match self.apply(event).await {
            Ok(flow) => Ok(flow),
            Err(err) if reset => Err(err),
            Err(err) => {
                warn!(kind, error = %err, "Error processing event");
                Ok(Flow::Continue)
            }
        }
    }

    /// Applies a decoded event. Counts are applied as that many single
    /// increments or decrements, not written directly.
    pub async fn apply(&self, event: SyncEvent) -> Result<Flow, EdgeError> {
        debug!(kind = event.kind(), "Applying event");
        match event {
            SyncEvent::SetWarrants(warrants) => {
                for (key, &count) in &warrants {
                    for _ in 0..count {
                        self.store.incr(key).await?;
                    }
                }
            }
            SyncEvent::DeleteWarrants(warrants) => {
                for (key, &count) in &warrants {
                    for _ in 0..count {
                        self.store.decr(key).await?;
                    }
                }
            }
            SyncEvent::ResetWarrants => {
                info!("Reset event received, reloading warrants");
                self.initialize().await?;
            }
            SyncEvent::Shutdown => return Ok(Flow::Shutdown),
        }
        Ok(Flow::Continue)
    }
}
