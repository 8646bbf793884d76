//! Device lifecycle flags used to gate commands.
//!
//! `UNPROVISIONED` is the explicit complement of `PROVISIONED` so an
//! any-of gate can say "only while not provisioned".

use crate::rpc::step::StateChange;

pub const CONNECTED: u32 = 0b001;
pub const PROVISIONED: u32 = 0b010;
pub const UNPROVISIONED: u32 = 0b100;

const PROVISIONING: u32 = PROVISIONED | UNPROVISIONED;

/// The state change that marks the device provisioned.
pub const fn mark_provisioned() -> StateChange {
    StateChange {
        set: PROVISIONED,
        clear: UNPROVISIONED,
    }
}

pub const fn mark_unprovisioned() -> StateChange {
    StateChange {
        set: UNPROVISIONED,
        clear: PROVISIONED,
    }
}

/// Replace the provisioning pair in `mask` according to `provisioned`.
pub fn with_provisioning(mask: u32, provisioned: bool) -> u32 {
    let flag = if provisioned { PROVISIONED } else { UNPROVISIONED };
    (mask & !PROVISIONING) | flag
}

pub fn is_provisioned(mask: u32) -> bool {
    mask & PROVISIONED != 0
}

pub fn is_connected(mask: u32) -> bool {
    mask & CONNECTED != 0
}

/// Short human-readable rendering, e.g. `connected|provisioned`.
pub fn describe(mask: u32) -> heapless::String<48> {
    let mut out = heapless::String::new();
    for (flag, name) in [
        (CONNECTED, "connected"),
        (PROVISIONED, "provisioned"),
        (UNPROVISIONED, "unprovisioned"),
    ] {
        if mask & flag != 0 {
            if !out.is_empty() {
                let _ = out.push('|');
            }
            let _ = out.push_str(name);
        }
    }
    if out.is_empty() {
        let _ = out.push_str("none");
    }
    out
}
