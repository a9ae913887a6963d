use std::sync::atomic::{AtomicU64, Ordering};

/// Readiness flag plus a generation that advances on every transition.
///
/// The low bit is the flag, the remaining bits count transitions. A reader
/// holding the token from before a batch of lookups can tell whether a
/// reload started (or started and finished) while it was reading.
#[derive(Debug, Default)]
pub struct Readiness(AtomicU64);

/// Snapshot of a ready cache, compared with a later [`Readiness::token`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyToken(u64);

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, ready: bool) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                if (state & 1 == 1) == ready {
                    return None;
                }
                let generation = (state >> 1).wrapping_add(1);
                Some((generation << 1) | u64::from(ready))
            });
    }

    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::Acquire) & 1 == 1
    }

    /// `None` while not ready.
    pub fn token(&self) -> Option<ReadyToken> {
        let state = self.0.load(Ordering::Acquire);
        (state & 1 == 1).then_some(ReadyToken(state))
    }
}
