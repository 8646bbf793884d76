//! Hub service: the hexagonal core.
//!
//! [`HubService`] owns the transfer slot, the deferred signal, the router
//! and the queued storage job. It exposes the transport, lifecycle and
//! scheduling boundaries; all I/O flows through port traits injected at
//! call sites, so the whole transaction flow is testable with mocks.
//!
//! ```text
//!  transport ──▶ ┌──────────────────────────┐ ──▶ EventSink
//!                │        HubService         │
//! StoragePort ◀──│ Slot · Router · Signal    │──▶ PeerNotifier
//!                └──────────────────────────┘
//! ```
//!
//! Every method runs on the scheduling context. Radio callbacks only
//! queue platform events (see [`crate::events`]).

use log::{info, warn};

use crate::config::HubConfig;
use crate::error::{RouterError, SlotError};
use crate::rpc::envelope::Response;
use crate::rpc::router::{Disposition, ResponseSink, Router};
use crate::rpc::signal::DeferredSignal;
use crate::rpc::slot::{ResponseWriter, TransferSlot};
use crate::rpc::step::CommandDescriptor;

use super::events::HubEvent;
use super::ports::{EventSink, PeerNotifier, StorageJob, StoragePort};
use super::state;

/// Namespace and key whose presence means "provisioned".
pub const CREDENTIALS_NAMESPACE: &str = "wifi";
pub const SSID_KEY: &str = "ssid";
pub const PASSKEY_KEY: &str = "key";

// ───────────────────────────────────────────────────────────────
// Outbound: slot writer + signal
// ───────────────────────────────────────────────────────────────

/// Publishes into the slot's read buffer, then arms the signal.
struct Outbound<'a> {
    writer: ResponseWriter<'a>,
    signal: &'a DeferredSignal,
}

impl ResponseSink for Outbound<'_> {
    fn publish(&mut self, response: &[u8]) -> Result<(), SlotError> {
        self.writer.publish(response)?;
        self.signal.arm();
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// HubService
// ───────────────────────────────────────────────────────────────

pub struct HubService {
    config: HubConfig,
    slot: TransferSlot,
    signal: DeferredSignal,
    router: Router,
    job: Option<StorageJob>,
    /// Milliseconds the current invocation has been pending.
    pending_age_ms: u32,
}

impl HubService {
    /// A read capacity too small for an error response is raised to fit
    /// one, so every request that reaches the router can be answered.
    pub fn new(config: HubConfig) -> Self {
        let min_read = Response::max_error_len();
        let mut read_capacity = usize::from(config.read_capacity);
        if read_capacity < min_read {
            warn!(
                "HubService: read capacity {} below {}, raising it",
                read_capacity, min_read
            );
            read_capacity = min_read;
        }
        let slot = TransferSlot::new(usize::from(config.write_capacity), read_capacity);
        let router = Router::new(config.initial_state_mask);
        Self {
            config,
            slot,
            signal: DeferredSignal::new(),
            router,
            job: None,
            pending_age_ms: 0,
        }
    }

    pub fn register(&mut self, descriptor: CommandDescriptor) -> Result<(), RouterError> {
        self.router.register_command(descriptor)
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Restore the provisioning pair from whether credentials are stored.
    pub fn restore_provisioning(&mut self, storage: &impl StoragePort, sink: &mut impl EventSink) {
        let provisioned = storage.exists(CREDENTIALS_NAMESPACE, SSID_KEY);
        info!("HubService: credentials stored = {}", provisioned);
        let mask = state::with_provisioning(self.router.state_mask(), provisioned);
        self.set_state_mask(mask, sink);
        sink.emit(&HubEvent::Started { mask });
    }

    pub fn on_connected(&mut self, sink: &mut impl EventSink) {
        info!("HubService: peer connected");
        sink.emit(&HubEvent::PeerConnected);
        self.set_state_mask(self.router.state_mask() | state::CONNECTED, sink);
    }

    /// The peer that owned any in-flight transaction is gone: drop it and
    /// make the slot writable for the next peer.
    pub fn on_disconnected(&mut self, sink: &mut impl EventSink) {
        let dropped = self.router.forget_pending();
        self.job = None;
        self.pending_age_ms = 0;
        self.slot.reopen();
        // A response armed but not yet notified has nobody to go to.
        self.signal.drain(|| ());
        info!("HubService: peer disconnected (dropped={:?})", dropped);
        sink.emit(&HubEvent::PeerDisconnected { dropped });
        self.set_state_mask(self.router.state_mask() & !state::CONNECTED, sink);
    }

    // ── Transport boundary ────────────────────────────────────

    /// A complete inbound block arrived.
    ///
    /// Errors mean the slot refused the block; no response is published.
    pub fn on_incoming_block(
        &mut self,
        bytes: &[u8],
        sink: &mut impl EventSink,
    ) -> Result<(), SlotError> {
        if let Err(e) = self.slot.accept_write(bytes) {
            warn!("HubService: block of {} bytes refused ({})", bytes.len(), e);
            sink.emit(&HubEvent::BlockRejected(e));
            return Err(e);
        }

        let before = self.router.state_mask();
        let (request, writer) = self.slot.split();
        let mut out = Outbound {
            writer,
            signal: &self.signal,
        };
        let disposition = self.router.handle_incoming(request, &mut out);
        self.settle(disposition, before, sink);
        Ok(())
    }

    /// Serve up to `max_len` response bytes from `offset`.
    ///
    /// Reading through the end of the response counts as consumption and
    /// reopens the slot.
    pub fn on_read_requested(
        &mut self,
        offset: usize,
        max_len: usize,
        sink: &mut impl EventSink,
    ) -> Vec<u8> {
        let available = self.slot.serve_read(offset);
        let chunk = available[..available.len().min(max_len)].to_vec();
        let total = self.slot.response().len();
        if self.slot.has_response() && offset <= total && offset.saturating_add(chunk.len()) >= total {
            self.reopen(sink);
        }
        chunk
    }

    /// The transport reports the peer has consumed the whole response.
    pub fn on_read_complete(&mut self, sink: &mut impl EventSink) {
        if self.slot.has_response() {
            self.reopen(sink);
        }
    }

    // ── Scheduling boundary ───────────────────────────────────

    /// Watchdog: abort an invocation that has been pending too long.
    pub fn tick(&mut self, elapsed_ms: u32, sink: &mut impl EventSink) {
        let Some(id) = self.router.pending_id() else {
            self.pending_age_ms = 0;
            return;
        };
        self.pending_age_ms = self.pending_age_ms.saturating_add(elapsed_ms);
        if self.pending_age_ms < self.config.pending_timeout_ms {
            return;
        }

        warn!(
            "HubService: invocation {} pending for {} ms, aborting",
            id, self.pending_age_ms
        );
        self.job = None;
        self.pending_age_ms = 0;
        let before = self.router.state_mask();
        let (_, writer) = self.slot.split();
        let mut out = Outbound {
            writer,
            signal: &self.signal,
        };
        if let Some(disposition) = self.router.discard_pending("timeout", &mut out) {
            sink.emit(&HubEvent::Aborted { id });
            self.settle(disposition, before, sink);
        }
    }

    /// One pass of deferred work: run a queued storage job and resume its
    /// invocation, then drain the signal and notify the peer.
    ///
    /// Returns whether the peer was notified.
    pub fn pump_once(
        &mut self,
        storage: &mut impl StoragePort,
        notifier: &mut impl PeerNotifier,
        sink: &mut impl EventSink,
    ) -> bool {
        if let Some(job) = self.job.take() {
            let result = job.run(storage);
            if let Err(e) = result {
                warn!("HubService: storage job for {} failed ({})", job.invocation, e);
            }
            sink.emit(&HubEvent::StorageCompleted {
                id: job.invocation,
                result,
            });

            let before = self.router.state_mask();
            let (_, writer) = self.slot.split();
            let mut out = Outbound {
                writer,
                signal: &self.signal,
            };
            match self.router.resume_invocation(job.invocation, result, &mut out) {
                Ok(disposition) => self.settle(disposition, before, sink),
                Err(e) => warn!("HubService: resume failed ({})", e),
            }
        }

        // The peer may already have read the response and reopened the slot.
        let slot = &self.slot;
        let mut notified = false;
        self.signal.drain(|| {
            if slot.has_response() {
                notifier.notify_peer(slot.response());
                notified = true;
            }
        });
        if notified {
            sink.emit(&HubEvent::PeerNotified {
                len: self.slot.response().len(),
            });
        }
        notified
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn state_mask(&self) -> u32 {
        self.router.state_mask()
    }

    pub fn is_accepting(&self) -> bool {
        self.slot.is_accepting()
    }

    pub fn pending_id(&self) -> Option<u32> {
        self.router.pending_id()
    }

    pub fn has_queued_job(&self) -> bool {
        self.job.is_some()
    }

    pub fn is_notify_armed(&self) -> bool {
        self.signal.is_armed()
    }

    /// The held response, for transports that push it unprompted.
    pub fn response(&self) -> &[u8] {
        self.slot.response()
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    // ── Internal ──────────────────────────────────────────────

    fn set_state_mask(&mut self, mask: u32, sink: &mut impl EventSink) {
        let from = self.router.state_mask();
        if from != mask {
            self.router.set_state_mask(mask);
            info!(
                "HubService: state {} -> {}",
                state::describe(from),
                state::describe(mask)
            );
            sink.emit(&HubEvent::StateChanged { from, to: mask });
        }
    }

    fn reopen(&mut self, sink: &mut impl EventSink) {
        self.slot.reopen();
        sink.emit(&HubEvent::SlotReopened);
    }

    /// Record the outcome of a router call.
    fn settle(&mut self, disposition: Disposition, mask_before: u32, sink: &mut impl EventSink) {
        match disposition {
            Disposition::Answered { id, answer } => {
                sink.emit(&HubEvent::Answered { id, answer });
            }
            Disposition::Suspended { id, job } => {
                self.job = Some(job);
                self.pending_age_ms = 0;
                sink.emit(&HubEvent::Suspended { id });
            }
            Disposition::Dropped(e) => {
                // Nothing was published, so nobody will read: reopen now.
                warn!("HubService: no response published ({}), reopening", e);
                sink.emit(&HubEvent::ResponseDropped(e));
                self.slot.reopen();
            }
        }

        let to = self.router.state_mask();
        if to != mask_before {
            info!(
                "HubService: state {} -> {}",
                state::describe(mask_before),
                state::describe(to)
            );
            sink.emit(&HubEvent::StateChanged {
                from: mask_before,
                to,
            });
        }
    }
}
