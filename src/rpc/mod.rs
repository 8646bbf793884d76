//! Transaction core: one request in flight, one response out.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       Transaction core                       │
//! │                                                              │
//! │  block ──▶ ┌──────────────┐    ┌──────────┐    ┌──────────┐  │
//! │            │ TransferSlot │──▶ │  Router  │──▶ │  Steps   │  │
//! │  read  ◀── │ (write/read) │◀── │ (gate)   │◀── │ (chain)  │  │
//! │            └──────────────┘    └──────────┘    └──────────┘  │
//! │                   │                                          │
//! │                   ▼ publish                                  │
//! │            ┌──────────────┐                                  │
//! │            │DeferredSignal│ ──▶ scheduling loop ──▶ notify   │
//! │            └──────────────┘                                  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Wire format is a CBOR map per block (see [`envelope`]).

pub mod codec;
pub mod envelope;
pub mod router;
pub mod signal;
pub mod slot;
pub mod step;
pub mod value;
