//! Built-in commands exposed to the peer.
//!
//! | Tag                         | Gate                           |
//! |-----------------------------|--------------------------------|
//! | `com.arm.connectivity.wifi` | any of unprovisioned/provisioned |
//! | `com.arm.reset`             | any of provisioned             |
//! | `com.arm.examples.complex`  | all of connected + provisioned |

use log::{debug, info, warn};

use crate::error::{CodecError, RouterError};
use crate::rpc::envelope::Coda;
use crate::rpc::step::{CommandDescriptor, Invocation, StepOutcome};
use crate::rpc::value::Value;
use crate::utils::is_printable_name;

use super::ports::StorageJob;
use super::service::{CREDENTIALS_NAMESPACE, HubService, PASSKEY_KEY, SSID_KEY};
use super::state;

pub const WIFI_TAG: &str = "com.arm.connectivity.wifi";
pub const RESET_TAG: &str = "com.arm.reset";
pub const COMPLEX_TAG: &str = "com.arm.examples.complex";

const MAX_SSID_LEN: usize = 32;
const MAX_PASSKEY_LEN: usize = 64;

/// Register every built-in command, in listing order.
pub fn register_builtin(hub: &mut HubService) -> Result<(), RouterError> {
    hub.register(wifi_command())?;
    hub.register(reset_command())?;
    hub.register(complex_command())?;
    Ok(())
}

// ───────────────────────────────────────────────────────────────
// Wi-Fi provisioning
// ───────────────────────────────────────────────────────────────

pub fn wifi_command() -> CommandDescriptor {
    CommandDescriptor::new(WIFI_TAG, state::UNPROVISIONED | state::PROVISIONED)
        .schema(Value::from_entries([
            ("ssid", Value::from("string")),
            ("key", Value::from("string")),
        ]))
        .decode(decode_credentials)
        .step(persist_credentials)
        .step(conclude_provisioning)
}

fn decode_credentials(params: &Value, inv: &mut Invocation) -> Result<(), CodecError> {
    let ssid = params.require("ssid")?.as_str()?;
    if !is_printable_name(ssid, MAX_SSID_LEN) {
        return Err(CodecError::Invalid("ssid must be 1-32 printable ASCII bytes"));
    }
    let mut checked_ssid = heapless::String::<MAX_SSID_LEN>::new();
    checked_ssid
        .push_str(ssid)
        .map_err(|_| CodecError::Invalid("ssid must be 1-32 printable ASCII bytes"))?;

    let key = params.require("key")?.as_str()?;
    let mut checked_key = heapless::String::<MAX_PASSKEY_LEN>::new();
    checked_key
        .push_str(key)
        .map_err(|_| CodecError::Invalid("key must be at most 64 bytes"))?;

    info!("wifi: credentials for '{}' (key len={})", checked_ssid, checked_key.len());
    inv.stash.insert("ssid", Value::from(checked_ssid.as_str()))?;
    inv.stash.insert("key", Value::from(checked_key.as_str()))
}

fn persist_credentials(inv: &mut Invocation) -> StepOutcome {
    let ssid = inv.stash.get("ssid").and_then(|v| v.as_str().ok());
    let key = inv.stash.get("key").and_then(|v| v.as_str().ok());
    let (Some(ssid), Some(key)) = (ssid, key) else {
        warn!("wifi: decoded credentials missing from stash");
        return StepOutcome::Complete(Coda::failure());
    };
    StepOutcome::Suspend(
        StorageJob::new(inv.id())
            .put(CREDENTIALS_NAMESPACE, SSID_KEY, ssid.as_bytes())
            .put(CREDENTIALS_NAMESPACE, PASSKEY_KEY, key.as_bytes()),
    )
}

fn conclude_provisioning(inv: &mut Invocation) -> StepOutcome {
    match inv.completion() {
        Some(Ok(())) => {
            info!("wifi: credentials stored");
            inv.change_state(state::mark_provisioned());
            StepOutcome::Complete(Coda::success())
        }
        Some(Err(e)) => {
            warn!("wifi: storing credentials failed ({})", e);
            StepOutcome::Complete(Coda::failure().with("reason", Value::from("storage")))
        }
        None => StepOutcome::Complete(Coda::failure()),
    }
}

// ───────────────────────────────────────────────────────────────
// Reset
// ───────────────────────────────────────────────────────────────

pub fn reset_command() -> CommandDescriptor {
    CommandDescriptor::new(RESET_TAG, state::PROVISIONED)
        .step(erase_credentials)
        .step(conclude_reset)
}

fn erase_credentials(inv: &mut Invocation) -> StepOutcome {
    info!("reset: erasing stored credentials");
    StepOutcome::Suspend(
        StorageJob::new(inv.id())
            .erase(CREDENTIALS_NAMESPACE, SSID_KEY)
            .erase(CREDENTIALS_NAMESPACE, PASSKEY_KEY),
    )
}

fn conclude_reset(inv: &mut Invocation) -> StepOutcome {
    match inv.completion() {
        Some(Ok(())) => {
            inv.change_state(state::mark_unprovisioned());
            StepOutcome::Complete(Coda::success())
        }
        Some(Err(e)) => {
            warn!("reset: erase failed ({})", e);
            StepOutcome::Complete(Coda::failure().with("reason", Value::from("storage")))
        }
        None => StepOutcome::Complete(Coda::failure()),
    }
}

// ───────────────────────────────────────────────────────────────
// Complex example
// ───────────────────────────────────────────────────────────────

pub fn complex_command() -> CommandDescriptor {
    CommandDescriptor::new(COMPLEX_TAG, state::CONNECTED | state::PROVISIONED)
        .match_all()
        .step(|inv: &mut Invocation| {
            debug!("complex: {}", inv.parameters().to_json());
            StepOutcome::Complete(Coda::success())
        })
}
