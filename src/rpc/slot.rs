//! Half-duplex transfer slot.
//!
//! The slot owns one write buffer (inbound request) and one read buffer
//! (outbound response) and enforces the single-outstanding-request rule:
//!
//! ```text
//!            accept_write                 publish_response
//! Accepting ─────────────▶ Disabled ───────────────────────▶ Disabled
//!     ▲                    (request held)                    (response held)
//!     └───────────────────────────── reopen ──────────────────────┘
//! ```
//!
//! A write is only taken while `Accepting`; the read buffer is non-empty
//! only while `Disabled`. `reopen` is the sole way back to `Accepting`.

use log::debug;

use crate::error::SlotError;

/// Write-acceptance state of a [`TransferSlot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptState {
    Accepting,
    Disabled,
}

pub struct TransferSlot {
    write_buf: Box<[u8]>,
    write_len: usize,
    read_buf: Box<[u8]>,
    read_len: usize,
    state: AcceptState,
}

impl TransferSlot {
    /// Allocate both buffers once; capacities never change afterwards.
    pub fn new(write_capacity: usize, read_capacity: usize) -> Self {
        Self {
            write_buf: vec![0; write_capacity].into_boxed_slice(),
            write_len: 0,
            read_buf: vec![0; read_capacity].into_boxed_slice(),
            read_len: 0,
            state: AcceptState::Accepting,
        }
    }

    pub fn state(&self) -> AcceptState {
        self.state
    }

    pub fn is_accepting(&self) -> bool {
        self.state == AcceptState::Accepting
    }

    /// Take an inbound block.
    ///
    /// Fails with [`SlotError::Rejected`] while a transaction is in flight
    /// and with [`SlotError::Overflow`] if `bytes` exceeds the write
    /// capacity. Neither failure touches the buffers or the state.
    pub fn accept_write(&mut self, bytes: &[u8]) -> Result<(), SlotError> {
        if self.state != AcceptState::Accepting {
            return Err(SlotError::Rejected);
        }
        if bytes.len() > self.write_buf.len() {
            return Err(SlotError::Overflow);
        }
        self.write_buf[..bytes.len()].copy_from_slice(bytes);
        self.write_len = bytes.len();
        self.state = AcceptState::Disabled;
        debug!("slot: accepted {} byte block", bytes.len());
        Ok(())
    }

    /// The most recently accepted request.
    pub fn request(&self) -> &[u8] {
        &self.write_buf[..self.write_len]
    }

    /// Response bytes from `offset` onwards. Empty when nothing is held or
    /// `offset` is past the end.
    pub fn serve_read(&self, offset: usize) -> &[u8] {
        self.read_buf
            .get(offset..self.read_len)
            .unwrap_or_default()
    }

    /// The full held response (empty when none).
    pub fn response(&self) -> &[u8] {
        &self.read_buf[..self.read_len]
    }

    pub fn has_response(&self) -> bool {
        self.read_len != 0
    }

    pub fn publish_response(&mut self, bytes: &[u8]) -> Result<(), SlotError> {
        self.split().1.publish(bytes)
    }

    /// Drop any held response and accept writes again.
    pub fn reopen(&mut self) {
        self.read_len = 0;
        self.state = AcceptState::Accepting;
        debug!("slot: reopened");
    }

    /// Borrow the current request together with a writer for the response,
    /// so a handler can answer without copying the request out first.
    pub fn split(&mut self) -> (&[u8], ResponseWriter<'_>) {
        let Self {
            write_buf,
            write_len,
            read_buf,
            read_len,
            state,
        } = self;
        (
            &write_buf[..*write_len],
            ResponseWriter {
                buf: read_buf,
                len: read_len,
                state,
            },
        )
    }
}

/// Write half of a [`TransferSlot::split`].
pub struct ResponseWriter<'a> {
    buf: &'a mut [u8],
    len: &'a mut usize,
    state: &'a mut AcceptState,
}

impl ResponseWriter<'_> {
    /// Store `bytes` as the pending response and force `Disabled`.
    ///
    /// Fails with [`SlotError::Overflow`] if the response does not fit and
    /// with [`SlotError::ResponsePending`] if an unconsumed response is
    /// still held. The buffer is untouched on failure.
    pub fn publish(&mut self, bytes: &[u8]) -> Result<(), SlotError> {
        if bytes.len() > self.buf.len() {
            return Err(SlotError::Overflow);
        }
        if *self.len != 0 {
            return Err(SlotError::ResponsePending);
        }
        self.buf[..bytes.len()].copy_from_slice(bytes);
        *self.len = bytes.len();
        *self.state = AcceptState::Disabled;
        Ok(())
    }
}
