//! Application core: hub logic, zero I/O.
//!
//! Owns the transaction lifecycle around the [`crate::rpc`] core: device
//! state, the built-in commands and the scheduling boundary. All
//! interaction with the radio and flash happens through **port traits**
//! defined in [`ports`], keeping this layer fully testable without real
//! peripherals.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
pub mod state;
