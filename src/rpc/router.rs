//! State-gated command router.
//!
//! Decodes a request block, checks the command against the current state
//! mask, runs its step chain and publishes exactly one response per
//! request. A chain that suspends publishes nothing until
//! [`Router::resume_invocation`] (or [`Router::discard_pending`]) is called.
//!
//! ```text
//!  request ──▶ decode ──▶ lookup + gate ──▶ decode params ──▶ steps
//!                │              │                 │             │
//!                ▼              ▼                 ▼             ▼
//!             "decode"  "capability-denied"    "decode"   coda / suspend
//! ```

use log::{debug, info, warn};

use super::envelope::{Coda, ErrorKind, IntentEntry, Request, Response};
use super::step::{CommandDescriptor, Invocation, StepOutcome};
use crate::app::ports::{StorageError, StorageJob};
use crate::error::{RouterError, SlotError};

/// Destination for encoded responses.
pub trait ResponseSink {
    fn publish(&mut self, response: &[u8]) -> Result<(), SlotError>;
}

/// A chain parked on asynchronous work.
#[derive(Debug)]
pub struct PendingInvocation {
    pub id: u32,
    pub tag: String,
    /// Index of the step to run on resume.
    pub next_step: usize,
    pub invocation: Invocation,
}

/// What the router published for a request, for the caller's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    Intents { count: usize },
    Coda { success: bool },
    Error(ErrorKind),
}

#[derive(Debug)]
pub enum Disposition {
    /// A response was published.
    Answered { id: Option<u32>, answer: Answer },
    /// The chain is parked until `job` completes.
    Suspended { id: u32, job: StorageJob },
    /// The sink refused the response; nothing was published.
    Dropped(SlotError),
}

enum ChainEnd {
    Complete(Coda),
    Suspend(usize, StorageJob),
    Exhausted,
}

pub struct Router {
    registry: Vec<CommandDescriptor>,
    mask: u32,
    pending: Option<PendingInvocation>,
}

impl Router {
    pub fn new(initial_mask: u32) -> Self {
        Self {
            registry: Vec::new(),
            mask: initial_mask,
            pending: None,
        }
    }

    // ── Registry ──────────────────────────────────────────────

    pub fn register_command(&mut self, descriptor: CommandDescriptor) -> Result<(), RouterError> {
        if self.registry.iter().any(|d| d.tag() == descriptor.tag()) {
            warn!("router: duplicate tag '{}' rejected", descriptor.tag());
            return Err(RouterError::DuplicateTag);
        }
        debug!("router: registered {:?}", descriptor);
        self.registry.push(descriptor);
        Ok(())
    }

    pub fn set_state_mask(&mut self, mask: u32) {
        self.mask = mask;
    }

    pub fn state_mask(&self) -> u32 {
        self.mask
    }

    /// Commands visible under the current mask, in registration order.
    pub fn list_visible_commands(&self) -> impl Iterator<Item = &CommandDescriptor> {
        self.registry.iter().filter(|d| d.is_visible(self.mask))
    }

    pub fn pending_id(&self) -> Option<u32> {
        self.pending.as_ref().map(|p| p.id)
    }

    // ── Dispatch ──────────────────────────────────────────────

    pub fn handle_incoming(&mut self, bytes: &[u8], sink: &mut impl ResponseSink) -> Disposition {
        let request = match Request::decode(bytes) {
            Ok(request) => request,
            Err(e) => {
                warn!("router: undecodable request ({})", e);
                return self.publish_error(e.id, ErrorKind::Decode, sink);
            }
        };

        if let Some(pending) = &self.pending {
            warn!(
                "router: request {} while invocation {} is pending",
                request.id(),
                pending.id
            );
            return self.publish_error(Some(request.id()), ErrorKind::Busy, sink);
        }

        match request {
            Request::List { id } => {
                let intents: Vec<IntentEntry> = self
                    .list_visible_commands()
                    .map(|d| IntentEntry {
                        intent: d.tag().to_owned(),
                        schema: d.schema_value().cloned(),
                    })
                    .collect();
                let count = intents.len();
                info!("router: list {} -> {} intents", id, count);
                self.publish(
                    &Response::Intents { id, intents },
                    Some(id),
                    Answer::Intents { count },
                    sink,
                )
            }
            Request::Invoke {
                id,
                intent,
                parameters,
            } => self.invoke(id, &intent, parameters, sink),
        }
    }

    fn invoke(
        &mut self,
        id: u32,
        tag: &str,
        parameters: super::value::Value,
        sink: &mut impl ResponseSink,
    ) -> Disposition {
        let Some(index) = self
            .registry
            .iter()
            .position(|d| d.tag() == tag && d.is_visible(self.mask))
        else {
            warn!(
                "router: '{}' denied (unknown or gated, mask=0b{:b})",
                tag, self.mask
            );
            return self.publish_error(Some(id), ErrorKind::CapabilityDenied, sink);
        };

        info!("router: invoke {} '{}'", id, tag);
        debug!("router: parameters {}", parameters.to_json());

        let mut invocation = Invocation::new(id, parameters);
        if let Err(e) = self.registry[index].decode_parameters(&mut invocation) {
            warn!("router: '{}' rejected parameters ({})", tag, e);
            return self.publish_error(Some(id), ErrorKind::Decode, sink);
        }

        self.run_chain(index, 0, invocation, sink)
    }

    fn run_chain(
        &mut self,
        index: usize,
        start: usize,
        mut invocation: Invocation,
        sink: &mut impl ResponseSink,
    ) -> Disposition {
        let id = invocation.id();
        let end = {
            let steps = self.registry[index].steps();
            let mut next = start;
            loop {
                let Some(step) = steps.get(next) else {
                    break ChainEnd::Exhausted;
                };
                next += 1;
                match step.run(&mut invocation) {
                    StepOutcome::Continue => {}
                    StepOutcome::Suspend(job) => break ChainEnd::Suspend(next, job),
                    StepOutcome::Complete(coda) => break ChainEnd::Complete(coda),
                }
            }
        };

        match end {
            ChainEnd::Complete(coda) => {
                if let Some(change) = invocation.state_change() {
                    let before = self.mask;
                    self.mask = change.apply(self.mask);
                    info!("router: state 0b{:b} -> 0b{:b}", before, self.mask);
                }
                let success = coda.success;
                self.publish(
                    &Response::Coda { id, coda },
                    Some(id),
                    Answer::Coda { success },
                    sink,
                )
            }
            ChainEnd::Suspend(next_step, job) => {
                info!("router: invocation {} suspended at step {}", id, next_step);
                self.pending = Some(PendingInvocation {
                    id,
                    tag: self.registry[index].tag().to_owned(),
                    next_step,
                    invocation,
                });
                Disposition::Suspended { id, job }
            }
            ChainEnd::Exhausted => {
                warn!(
                    "router: '{}' chain ended without a coda",
                    self.registry[index].tag()
                );
                self.publish_error(Some(id), ErrorKind::Internal, sink)
            }
        }
    }

    // ── Asynchronous completion ───────────────────────────────

    /// Continue the parked chain with the result of its storage job.
    ///
    /// An unknown id is reported and leaves the pending invocation as is.
    pub fn resume_invocation(
        &mut self,
        id: u32,
        completion: Result<(), StorageError>,
        sink: &mut impl ResponseSink,
    ) -> Result<Disposition, RouterError> {
        if self.pending_id() != Some(id) {
            warn!("router: resume for unknown invocation {}", id);
            return Err(RouterError::UnknownInvocation(id));
        }
        let Some(mut pending) = self.pending.take() else {
            return Err(RouterError::UnknownInvocation(id));
        };

        let Some(index) = self.registry.iter().position(|d| d.tag() == pending.tag) else {
            warn!("router: pending tag '{}' vanished", pending.tag);
            return Ok(self.publish_error(Some(id), ErrorKind::Internal, sink));
        };

        info!("router: resuming invocation {} ({:?})", id, completion);
        pending.invocation.complete_with(completion);
        Ok(self.run_chain(index, pending.next_step, pending.invocation, sink))
    }

    /// Drop the parked chain and tell the peer it was aborted.
    pub fn discard_pending(&mut self, reason: &str, sink: &mut impl ResponseSink) -> Option<Disposition> {
        let pending = self.pending.take()?;
        warn!("router: discarding invocation {} ({})", pending.id, reason);
        Some(self.publish_error(Some(pending.id), ErrorKind::Aborted, sink))
    }

    /// Drop the parked chain without answering (the peer is gone).
    pub fn forget_pending(&mut self) -> Option<u32> {
        let pending = self.pending.take()?;
        info!("router: forgetting invocation {}", pending.id);
        Some(pending.id)
    }

    // ── Publishing ────────────────────────────────────────────

    fn publish_error(
        &self,
        id: Option<u32>,
        kind: ErrorKind,
        sink: &mut impl ResponseSink,
    ) -> Disposition {
        self.publish(&Response::error(id, kind), id, Answer::Error(kind), sink)
    }

    fn publish(
        &self,
        response: &Response,
        id: Option<u32>,
        answer: Answer,
        sink: &mut impl ResponseSink,
    ) -> Disposition {
        match sink.publish(&response.encode()) {
            Ok(()) => Disposition::Answered { id, answer },
            Err(SlotError::Overflow) if answer != Answer::Error(ErrorKind::Internal) => {
                warn!("router: response to {:?} does not fit, sending internal error", id);
                self.publish_error(id, ErrorKind::Internal, sink)
            }
            Err(e) => {
                warn!("router: response to {:?} dropped ({})", id, e);
                Disposition::Dropped(e)
            }
        }
    }
}
