//! Fuzz target: `HubService::on_incoming_block`
//!
//! Drives arbitrary request blocks through the slot, the router and the
//! built-in commands, then runs the deferred work. The hub must never
//! panic, must answer or park every accepted block, and must accept the
//! next block once the response is consumed.
//!
//! cargo fuzz run fuzz_hub_request

#![no_main]

use libfuzzer_sys::fuzz_target;
use nesvoy::app::commands::register_builtin;
use nesvoy::app::events::HubEvent;
use nesvoy::app::ports::{EventSink, PeerNotifier, StorageError, StoragePort};
use nesvoy::app::service::HubService;
use nesvoy::config::HubConfig;
use nesvoy::rpc::envelope::Response;

struct Discard;

impl EventSink for Discard {
    fn emit(&mut self, _: &HubEvent) {}
}

impl PeerNotifier for Discard {
    fn notify_peer(&mut self, response: &[u8]) {
        // Whatever the hub sends must be a well-formed response.
        assert!(Response::decode(response).is_ok(), "hub sent an undecodable response");
    }
}

impl StoragePort for Discard {
    fn read(&self, _: &str, _: &str, _: &mut [u8]) -> Result<usize, StorageError> {
        Err(StorageError::NotFound)
    }

    fn write(&mut self, _: &str, _: &str, _: &[u8]) -> Result<(), StorageError> {
        Ok(())
    }

    fn delete(&mut self, _: &str, _: &str) -> Result<(), StorageError> {
        Ok(())
    }

    fn exists(&self, _: &str, _: &str) -> bool {
        false
    }
}

fuzz_target!(|data: &[u8]| {
    let mut hub = HubService::new(HubConfig::default());
    if register_builtin(&mut hub).is_err() {
        return;
    }
    let mut sink = Discard;
    let mut peer = Discard;
    let mut storage = Discard;

    if hub.on_incoming_block(data, &mut sink).is_err() {
        assert!(hub.is_accepting(), "a refused block must leave the slot open");
        return;
    }
    assert!(hub.is_notify_armed() || hub.pending_id().is_some());

    while hub.has_queued_job() {
        hub.pump_once(&mut storage, &mut peer, &mut sink);
    }
    hub.pump_once(&mut storage, &mut peer, &mut sink);
    hub.on_read_complete(&mut sink);
    assert!(hub.is_accepting(), "slot must reopen after the response is read");
});
