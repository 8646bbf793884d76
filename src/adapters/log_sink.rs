//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing hub events to the ESP-IDF logger
//! (UART / USB-CDC in production, the test harness's logger on the host).

use log::{info, warn};

use crate::app::events::HubEvent;
use crate::app::ports::EventSink;
use crate::app::state;
use crate::rpc::router::Answer;

/// Adapter that logs every [`HubEvent`] to the serial console.
#[derive(Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &HubEvent) {
        match event {
            HubEvent::Started { mask } => {
                info!("START | state={}", state::describe(*mask));
            }
            HubEvent::BlockRejected(e) => {
                warn!("SLOT  | block rejected: {}", e);
            }
            HubEvent::Answered { id, answer } => match answer {
                Answer::Intents { count } => {
                    info!("RPC   | id={:?} listed {} intent(s)", id, count);
                }
                Answer::Coda { success } => {
                    info!("RPC   | id={:?} coda success={}", id, success);
                }
                Answer::Error(kind) => {
                    warn!("RPC   | id={:?} error {}", id, kind.as_str());
                }
            },
            HubEvent::Suspended { id } => {
                info!("RPC   | id={} suspended on storage", id);
            }
            HubEvent::StorageCompleted { id, result } => match result {
                Ok(()) => info!("STORE | id={} done", id),
                Err(e) => warn!("STORE | id={} failed: {}", id, e),
            },
            HubEvent::Aborted { id } => {
                warn!("RPC   | id={} aborted by watchdog", id);
            }
            HubEvent::ResponseDropped(e) => {
                warn!("SLOT  | response dropped: {}", e);
            }
            HubEvent::StateChanged { from, to } => {
                info!("STATE | {} -> {}", state::describe(*from), state::describe(*to));
            }
            HubEvent::PeerNotified { len } => {
                info!("LINK  | response ready ({} bytes)", len);
            }
            HubEvent::SlotReopened => {
                info!("SLOT  | accepting");
            }
            HubEvent::PeerConnected => {
                info!("LINK  | peer connected");
            }
            HubEvent::PeerDisconnected { dropped } => match dropped {
                Some(id) => warn!("LINK  | peer disconnected, invocation {} dropped", id),
                None => info!("LINK  | peer disconnected"),
            },
        }
    }
}
