//! Platform event queue.
//!
//! Radio callbacks run on the Bluetooth stack's task and must not touch
//! the hub. They copy any payload into a bounded bridge buffer (see
//! [`crate::adapters::ble`]) and push a one-byte event here. The main
//! loop drains the queue and drives [`HubService`](crate::app::service::HubService).
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ GATTS write │────▶│              │     │              │
//! │ connect     │────▶│  Event Queue │────▶│  Main Loop   │
//! │ disconnect  │────▶│  (lock-free) │     │  (consumer)  │
//! │ confirm     │────▶│              │     │              │
//! └─────────────┘     └──────────────┘     └──────────────┘
//! ```

use core::sync::atomic::{AtomicU8, Ordering};

/// Maximum number of pending events.
/// Power of 2 for efficient ring buffer modulo.
const EVENT_QUEUE_CAP: usize = 32;

/// Platform event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Event {
    // ── Link lifecycle ────────────────────────────────────
    /// A central connected.
    PeerConnected          = 0,
    /// The central went away.
    PeerDisconnected       = 1,

    // ── Block transfer ────────────────────────────────────
    /// A fragment was written to the request characteristic.
    FragmentReceived       = 10,
    /// The peer confirmed the last response indication or read it out.
    ResponseConsumed       = 11,
    /// The ATT MTU was renegotiated.
    MtuChanged             = 12,
}

// ── Lock-free SPSC ring buffer ────────────────────────────────
//
// The Bluetooth task writes (produces), the main loop reads (consumes).
// Uses atomic head/tail indices; slots are atomics too so no unsafe
// access is needed.

static EVENT_HEAD: AtomicU8 = AtomicU8::new(0);
static EVENT_TAIL: AtomicU8 = AtomicU8::new(0);
static EVENT_BUFFER: [AtomicU8; EVENT_QUEUE_CAP] = [const { AtomicU8::new(0) }; EVENT_QUEUE_CAP];

/// Push an event into the queue.
/// Returns `false` if the queue is full (event dropped).
pub fn push_event(event: Event) -> bool {
    let head = EVENT_HEAD.load(Ordering::Relaxed);
    let tail = EVENT_TAIL.load(Ordering::Acquire);
    let next_head = (head + 1) % EVENT_QUEUE_CAP as u8;

    if next_head == tail {
        return false; // Queue full, drop the event.
    }

    EVENT_BUFFER[head as usize].store(event as u8, Ordering::Relaxed);
    EVENT_HEAD.store(next_head, Ordering::Release);
    true
}

/// Pop the next event from the queue.
/// Called from the main loop (single consumer).
pub fn pop_event() -> Option<Event> {
    let tail = EVENT_TAIL.load(Ordering::Relaxed);
    let head = EVENT_HEAD.load(Ordering::Acquire);

    if tail == head {
        return None;
    }

    let raw = EVENT_BUFFER[tail as usize].load(Ordering::Relaxed);
    EVENT_TAIL.store((tail + 1) % EVENT_QUEUE_CAP as u8, Ordering::Release);

    event_from_u8(raw)
}

/// Drain all pending events into a callback, in FIFO order.
pub fn drain_events(mut handler: impl FnMut(Event)) {
    while let Some(event) = pop_event() {
        handler(event);
    }
}

pub fn queue_is_empty() -> bool {
    let tail = EVENT_TAIL.load(Ordering::Relaxed);
    let head = EVENT_HEAD.load(Ordering::Acquire);
    tail == head
}

/// Number of pending events.
pub fn queue_len() -> usize {
    let head = EVENT_HEAD.load(Ordering::Relaxed) as usize;
    let tail = EVENT_TAIL.load(Ordering::Relaxed) as usize;
    (head + EVENT_QUEUE_CAP - tail) % EVENT_QUEUE_CAP
}

// ── Internal ──────────────────────────────────────────────────

fn event_from_u8(raw: u8) -> Option<Event> {
    match raw {
        0  => Some(Event::PeerConnected),
        1  => Some(Event::PeerDisconnected),
        10 => Some(Event::FragmentReceived),
        11 => Some(Event::ResponseConsumed),
        12 => Some(Event::MtuChanged),
        _  => None,
    }
}
