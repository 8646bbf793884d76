//! Deferred, idempotent cross-context signal.
//!
//! Transport callbacks may only `arm()`; the scheduling loop `drain`s and
//! performs the transport-mutating effect (notifying the peer). Two arms
//! before one drain collapse into a single effect.
//!
//! Backed by an `embassy-sync` [`Signal`], so arming is lock-free from the
//! caller's point of view and allocation-free.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

pub struct DeferredSignal {
    inner: Signal<CriticalSectionRawMutex, ()>,
}

impl DeferredSignal {
    pub const fn new() -> Self {
        Self {
            inner: Signal::new(),
        }
    }

    /// Mark work pending. Safe from any context; never blocks.
    pub fn arm(&self) {
        self.inner.signal(());
    }

    /// If armed, clear and run `effect` once. Returns whether it ran.
    pub fn drain(&self, effect: impl FnOnce()) -> bool {
        if self.inner.try_take().is_some() {
            effect();
            true
        } else {
            false
        }
    }

    pub fn is_armed(&self) -> bool {
        self.inner.signaled()
    }

    /// Wait until armed, then clear and run `effect`.
    ///
    /// For hosts that drive the scheduling loop from an executor instead of
    /// polling [`drain`](Self::drain).
    pub async fn drain_when_armed(&self, effect: impl FnOnce()) {
        self.inner.wait().await;
        effect();
    }
}

impl Default for DeferredSignal {
    fn default() -> Self {
        Self::new()
    }
}
