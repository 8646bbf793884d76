//! Hub configuration parameters
//!
//! All tunable parameters for the Nesvoy hub. Values can be overridden via
//! NVS (non-volatile storage).

use serde::{Deserialize, Serialize};

use crate::app::state;

/// Core hub configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubConfig {
    // --- Identity ---
    /// Advertised device name
    pub device_name: heapless::String<24>,

    // --- Transfer slot ---
    /// Largest request block accepted (bytes)
    pub write_capacity: u16,
    /// Largest response block published (bytes)
    pub read_capacity: u16,

    // --- Router ---
    /// State mask at boot, before provisioning is restored from storage
    pub initial_state_mask: u32,
    /// A suspended invocation older than this is aborted (milliseconds)
    pub pending_timeout_ms: u32,

    // --- Timing ---
    /// Scheduling loop interval (milliseconds)
    pub loop_interval_ms: u32,

    // --- BLE ---
    /// Advertising interval, in 0.625 ms units
    pub adv_interval: u16,
    /// Preferred minimum connection interval, in 1.25 ms units
    pub min_conn_interval: u16,
    /// Preferred maximum connection interval, in 1.25 ms units
    pub max_conn_interval: u16,
    /// Preferred slave latency (connection events)
    pub slave_latency: u16,
}

impl Default for HubConfig {
    fn default() -> Self {
        let mut device_name = heapless::String::new();
        let _ = device_name.push_str("Nesvoy");
        Self {
            device_name,

            // Transfer slot
            write_capacity: 200,
            read_capacity: 200,

            // Router
            initial_state_mask: state::UNPROVISIONED,
            pending_timeout_ms: 10_000,

            // Timing
            loop_interval_ms: 20,

            // BLE
            adv_interval: 1600,     // 1 s
            min_conn_interval: 16,  // 20 ms
            max_conn_interval: 32,  // 40 ms
            slave_latency: 0,
        }
    }
}
