//! Outbound hub events.
//!
//! The [`HubService`](super::service::HubService) emits these through the
//! [`EventSink`](super::ports::EventSink) port. Adapters on the other side
//! decide what to do with them (serial log, test recorder, ...).

use crate::app::ports::StorageError;
use crate::error::SlotError;
use crate::rpc::router::Answer;

/// Structured events emitted by the hub core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    /// The hub is ready; carries the initial state mask.
    Started { mask: u32 },

    /// An inbound block was refused by the transfer slot.
    BlockRejected(SlotError),

    /// A response was published for a request.
    Answered { id: Option<u32>, answer: Answer },

    /// An invocation parked on a storage job.
    Suspended { id: u32 },

    /// The storage job of an invocation finished.
    StorageCompleted {
        id: u32,
        result: Result<(), StorageError>,
    },

    /// A pending invocation was discarded by the watchdog.
    Aborted { id: u32 },

    /// No response could be published.
    ResponseDropped(SlotError),

    /// The state mask changed.
    StateChanged { from: u32, to: u32 },

    /// The peer was told a response is ready.
    PeerNotified { len: usize },

    /// The peer finished reading; the slot accepts writes again.
    SlotReopened,

    PeerConnected,

    /// Carries the id of an invocation dropped with the link, if any.
    PeerDisconnected { dropped: Option<u32> },
}
