use crate::edge::sse::ServerSentEvent;
use crate::edge::warrant::WarrantSet;
use crate::errors::EdgeError;

pub const EVENT_SET_WARRANTS: &str = "set_warrants";
pub const EVENT_DELETE_WARRANTS: &str = "del_warrants";
pub const EVENT_RESET_WARRANTS: &str = "reset_warrants";
pub const EVENT_SHUTDOWN: &str = "shutdown";

/// An upstream change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Each count is that many additional references.
    SetWarrants(WarrantSet),
    /// Each count is that many references to drop.
    DeleteWarrants(WarrantSet),
    /// The incremental feed can no longer be trusted; reload everything.
    ResetWarrants,
    /// Operator-directed stop.
    Shutdown,
}

impl SyncEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SyncEvent::SetWarrants(_) => EVENT_SET_WARRANTS,
            SyncEvent::DeleteWarrants(_) => EVENT_DELETE_WARRANTS,
            SyncEvent::ResetWarrants => EVENT_RESET_WARRANTS,
            SyncEvent::Shutdown => EVENT_SHUTDOWN,
        }
    }

    /// `Ok(None)` for event kinds the agent does not handle.
    pub fn decode(frame: &ServerSentEvent) -> Result<Option<Self>, EdgeError> {
        let payload = || {
            serde_json::from_str::<WarrantSet>(&frame.data).map_err(|source| {
                EdgeError::InvalidEvent {
                    kind: frame.event.clone(),
                    source,
                }
            })
        };

        let event = match frame.event.as_str() {
            EVENT_SET_WARRANTS => SyncEvent::SetWarrants(payload()?),
            EVENT_DELETE_WARRANTS => SyncEvent::DeleteWarrants(payload()?),
            EVENT_RESET_WARRANTS => SyncEvent::ResetWarrants,
            EVENT_SHUTDOWN => SyncEvent::Shutdown,
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}
