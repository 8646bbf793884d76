//! Provisioning lifecycle: restore, store, reset, failure and recovery.

use crate::mock::{MemStorage, RecordingNotifier, RecordingSink, invoke, wifi_params};

use nesvoy::app::commands::{RESET_TAG, WIFI_TAG, register_builtin};
use nesvoy::app::events::HubEvent;
use nesvoy::app::ports::{StorageError, StoragePort};
use nesvoy::app::service::{CREDENTIALS_NAMESPACE, HubService, PASSKEY_KEY, SSID_KEY};
use nesvoy::app::state;
use nesvoy::config::HubConfig;
use nesvoy::rpc::envelope::{ErrorKind, Response};
use nesvoy::rpc::value::Value;

fn make_hub() -> (HubService, RecordingSink, RecordingNotifier) {
    let mut hub = HubService::new(HubConfig::default());
    register_builtin(&mut hub).unwrap();
    (hub, RecordingSink::new(), RecordingNotifier::new())
}

/// Send one request and run deferred work until the peer is notified,
/// then consume the response.
fn transact(
    hub: &mut HubService,
    block: &[u8],
    storage: &mut MemStorage,
    peer: &mut RecordingNotifier,
    sink: &mut RecordingSink,
) -> Response {
    hub.on_incoming_block(block, sink).unwrap();
    assert!(hub.pump_once(storage, peer, sink), "peer was not notified");
    hub.on_read_complete(sink);
    assert!(hub.is_accepting());
    peer.last_response().unwrap()
}

fn coda_success(response: &Response) -> bool {
    match response {
        Response::Coda { coda, .. } => coda.success,
        other => panic!("expected a coda, got {other:?}"),
    }
}

#[test]
fn restore_marks_provisioned_when_credentials_exist() {
    let (mut hub, mut sink, _) = make_hub();
    let mut storage = MemStorage::new();
    storage.seed(CREDENTIALS_NAMESPACE, SSID_KEY, b"HomeNet");

    hub.restore_provisioning(&storage, &mut sink);
    assert_eq!(hub.state_mask(), state::PROVISIONED);
    assert!(sink.contains(&HubEvent::Started {
        mask: state::PROVISIONED
    }));
}

#[test]
fn restore_keeps_unprovisioned_on_empty_storage() {
    let (mut hub, mut sink, _) = make_hub();
    hub.restore_provisioning(&MemStorage::new(), &mut sink);
    assert_eq!(hub.state_mask(), state::UNPROVISIONED);
    assert_eq!(sink.count(|e| matches!(e, HubEvent::StateChanged { .. })), 0);
}

#[test]
fn provision_then_reset_round_trip() {
    let (mut hub, mut sink, mut peer) = make_hub();
    let mut storage = MemStorage::new();
    hub.restore_provisioning(&storage, &mut sink);
    hub.on_connected(&mut sink);

    let stored = transact(
        &mut hub,
        &invoke(1, WIFI_TAG, wifi_params("HomeNet", "password1")),
        &mut storage,
        &mut peer,
        &mut sink,
    );
    assert!(coda_success(&stored));
    assert!(state::is_provisioned(hub.state_mask()));
    assert!(sink.contains(&HubEvent::StateChanged {
        from: state::CONNECTED | state::UNPROVISIONED,
        to: state::CONNECTED | state::PROVISIONED,
    }));

    let reset = transact(&mut hub, &invoke(2, RESET_TAG, Value::map()), &mut storage, &mut peer, &mut sink);
    assert!(coda_success(&reset));
    assert_eq!(hub.state_mask(), state::CONNECTED | state::UNPROVISIONED);
    assert!(!storage.exists(CREDENTIALS_NAMESPACE, SSID_KEY));
    assert!(!storage.exists(CREDENTIALS_NAMESPACE, PASSKEY_KEY));
}

#[test]
fn open_network_is_stored_with_empty_key() {
    let (mut hub, mut sink, mut peer) = make_hub();
    let mut storage = MemStorage::new();

    let response = transact(
        &mut hub,
        &invoke(5, WIFI_TAG, wifi_params("Cafe", "")),
        &mut storage,
        &mut peer,
        &mut sink,
    );
    assert!(coda_success(&response));
    assert_eq!(storage.get(CREDENTIALS_NAMESPACE, PASSKEY_KEY), Some(&b""[..]));
}

#[test]
fn storage_failure_answers_failure_with_reason() {
    let (mut hub, mut sink, mut peer) = make_hub();
    let mut storage = MemStorage::failing(StorageError::Full);

    let response = transact(
        &mut hub,
        &invoke(9, WIFI_TAG, wifi_params("HomeNet", "password1")),
        &mut storage,
        &mut peer,
        &mut sink,
    );
    match response {
        Response::Coda { id, coda } => {
            assert_eq!(id, 9);
            assert!(!coda.success);
            assert_eq!(coda.field("reason"), Some(&Value::from("storage")));
        }
        other => panic!("expected a coda, got {other:?}"),
    }
    assert_eq!(hub.state_mask(), state::UNPROVISIONED, "state must not change on failure");
    assert!(sink.contains(&HubEvent::StorageCompleted {
        id: 9,
        result: Err(StorageError::Full),
    }));
}

#[test]
fn watchdog_aborts_a_stuck_invocation() {
    let (mut hub, mut sink, mut peer) = make_hub();
    let timeout = hub.config().pending_timeout_ms;

    hub.on_incoming_block(&invoke(12, WIFI_TAG, wifi_params("HomeNet", "password1")), &mut sink)
        .unwrap();
    assert_eq!(hub.pending_id(), Some(12));

    hub.tick(timeout - 1, &mut sink);
    assert_eq!(hub.pending_id(), Some(12), "aborted too early");

    hub.tick(1, &mut sink);
    assert_eq!(hub.pending_id(), None);
    assert!(!hub.has_queued_job(), "an aborted invocation must not touch storage");
    assert!(sink.contains(&HubEvent::Aborted { id: 12 }));

    let mut storage = MemStorage::new();
    assert!(hub.pump_once(&mut storage, &mut peer, &mut sink));
    assert_eq!(storage.writes, 0);
    assert_eq!(
        peer.last_response(),
        Some(Response::error(Some(12), ErrorKind::Aborted))
    );

    assert!(!hub.is_accepting());
    hub.on_read_complete(&mut sink);
    assert!(hub.is_accepting());
}

#[test]
fn tick_without_pending_invocation_is_idle() {
    let (mut hub, mut sink, _) = make_hub();
    hub.tick(u32::MAX, &mut sink);
    assert!(sink.events.is_empty());
    assert!(hub.is_accepting());
}

#[test]
fn disconnect_while_suspended_drops_the_invocation() {
    let (mut hub, mut sink, mut peer) = make_hub();
    let mut storage = MemStorage::new();
    hub.on_connected(&mut sink);

    hub.on_incoming_block(&invoke(30, WIFI_TAG, wifi_params("HomeNet", "password1")), &mut sink)
        .unwrap();
    assert!(!hub.is_accepting());

    hub.on_disconnected(&mut sink);
    assert!(hub.is_accepting());
    assert_eq!(hub.pending_id(), None);
    assert!(!hub.has_queued_job());
    assert!(sink.contains(&HubEvent::PeerDisconnected { dropped: Some(30) }));
    assert!(!state::is_connected(hub.state_mask()));

    assert!(!hub.pump_once(&mut storage, &mut peer, &mut sink));
    assert!(peer.notified.is_empty());
    assert!(storage.data.is_empty());
}

#[test]
fn disconnect_discards_an_unread_response() {
    let (mut hub, mut sink, mut peer) = make_hub();
    hub.on_connected(&mut sink);
    hub.on_incoming_block(&invoke(4, RESET_TAG, Value::map()), &mut sink)
        .unwrap();
    assert!(hub.is_notify_armed());

    hub.on_disconnected(&mut sink);
    assert!(hub.is_accepting());
    assert!(!hub.is_notify_armed());
    assert!(!hub.pump_once(&mut MemStorage::new(), &mut peer, &mut sink));
}
