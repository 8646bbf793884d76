//! End-to-end request scenarios through the hub and the router.
//!
//! Each test feeds complete request blocks in, runs the deferred work the
//! scheduling loop would run, and decodes what the peer would receive.

use crate::mock::{MemStorage, RecordingNotifier, RecordingSink, invoke, list, wifi_params};

use nesvoy::app::commands::{COMPLEX_TAG, RESET_TAG, WIFI_TAG, register_builtin};
use nesvoy::app::events::HubEvent;
use nesvoy::app::ports::StorageJob;
use nesvoy::app::service::{CREDENTIALS_NAMESPACE, HubService, PASSKEY_KEY, SSID_KEY};
use nesvoy::app::state;
use nesvoy::config::HubConfig;
use nesvoy::error::{RouterError, SlotError};
use nesvoy::rpc::envelope::{Coda, ErrorKind, Response};
use nesvoy::rpc::router::{Answer, Disposition, ResponseSink, Router};
use nesvoy::rpc::step::{CommandDescriptor, Invocation, StepOutcome};
use nesvoy::rpc::value::Value;

fn make_hub(initial_state_mask: u32) -> (HubService, RecordingSink) {
    let mut hub = HubService::new(HubConfig {
        initial_state_mask,
        ..HubConfig::default()
    });
    register_builtin(&mut hub).unwrap();
    (hub, RecordingSink::new())
}

/// Captures published responses for router-level tests.
#[derive(Default)]
struct Capture(Vec<Vec<u8>>);

impl ResponseSink for Capture {
    fn publish(&mut self, response: &[u8]) -> Result<(), SlotError> {
        self.0.push(response.to_vec());
        Ok(())
    }
}

impl Capture {
    fn last(&self) -> Response {
        Response::decode(self.0.last().expect("nothing published")).expect("undecodable response")
    }
}

// ── Scenario A: gated command is denied ──────────────────────

#[test]
fn gated_wifi_is_capability_denied() {
    let (mut hub, mut sink) = make_hub(state::CONNECTED);
    let mut storage = MemStorage::new();
    let mut peer = RecordingNotifier::new();

    hub.on_incoming_block(&invoke(3, WIFI_TAG, wifi_params("HomeNet", "password1")), &mut sink)
        .unwrap();

    assert!(sink.contains(&HubEvent::Answered {
        id: Some(3),
        answer: Answer::Error(ErrorKind::CapabilityDenied),
    }));
    assert!(!hub.has_queued_job(), "a denied command must not reach storage");

    assert!(hub.pump_once(&mut storage, &mut peer, &mut sink));
    assert_eq!(
        peer.last_response(),
        Some(Response::error(Some(3), ErrorKind::CapabilityDenied))
    );
    assert!(storage.data.is_empty());
}

#[test]
fn match_all_gate_denies_a_partial_mask() {
    let mut router = Router::new(state::CONNECTED);
    router
        .register_command(
            CommandDescriptor::new(WIFI_TAG, state::CONNECTED | state::PROVISIONED)
                .match_all()
                .step(|_: &mut Invocation| StepOutcome::Complete(Coda::success())),
        )
        .unwrap();
    let mut out = Capture::default();

    let disposition = router.handle_incoming(&invoke(5, WIFI_TAG, wifi_params("net", "pw")), &mut out);
    assert_eq!(
        disposition_answer(&disposition),
        Some((Some(5), Answer::Error(ErrorKind::CapabilityDenied)))
    );
    assert_eq!(out.last(), Response::error(Some(5), ErrorKind::CapabilityDenied));
    assert_eq!(router.list_visible_commands().count(), 0);

    router.set_state_mask(state::CONNECTED | state::PROVISIONED);
    let _ = router.handle_incoming(&invoke(6, WIFI_TAG, Value::map()), &mut out);
    assert!(matches!(out.last(), Response::Coda { id: 6, .. }));
}

#[test]
fn unknown_tag_gets_the_same_answer_as_gated() {
    let (mut hub, mut sink) = make_hub(state::UNPROVISIONED);
    let mut peer = RecordingNotifier::new();

    hub.on_incoming_block(&invoke(1, "com.example.missing", Value::map()), &mut sink)
        .unwrap();
    hub.pump_once(&mut MemStorage::new(), &mut peer, &mut sink);
    let unknown = peer.notified.last().cloned().unwrap();
    hub.on_read_complete(&mut sink);

    hub.on_incoming_block(&invoke(1, RESET_TAG, Value::map()), &mut sink)
        .unwrap();
    hub.pump_once(&mut MemStorage::new(), &mut peer, &mut sink);
    let gated = peer.notified.last().cloned().unwrap();

    assert_eq!(unknown, gated, "gated and unknown must be indistinguishable");
}

// ── Scenario B: wifi stores credentials ──────────────────────

#[test]
fn wifi_stores_credentials_and_answers_with_id() {
    let (mut hub, mut sink) = make_hub(state::UNPROVISIONED);
    let mut storage = MemStorage::new();
    let mut peer = RecordingNotifier::new();
    hub.on_connected(&mut sink);

    hub.on_incoming_block(&invoke(7, WIFI_TAG, wifi_params("net", "pw")), &mut sink)
        .unwrap();
    assert_eq!(hub.pending_id(), Some(7));
    assert!(hub.has_queued_job());
    assert!(!hub.is_notify_armed(), "nothing to notify while suspended");

    assert!(hub.pump_once(&mut storage, &mut peer, &mut sink));
    assert_eq!(storage.get(CREDENTIALS_NAMESPACE, SSID_KEY), Some(&b"net"[..]));
    assert_eq!(storage.get(CREDENTIALS_NAMESPACE, PASSKEY_KEY), Some(&b"pw"[..]));

    match peer.last_response() {
        Some(Response::Coda { id, coda }) => {
            assert_eq!(id, 7);
            assert!(coda.success);
        }
        other => panic!("expected a coda, got {other:?}"),
    }
    assert_eq!(hub.state_mask(), state::CONNECTED | state::PROVISIONED);
    assert_eq!(hub.pending_id(), None);
}

#[test]
fn synchronous_answer_arms_the_signal() {
    let (mut hub, mut sink) = make_hub(state::UNPROVISIONED);
    hub.on_incoming_block(&list(11), &mut sink).unwrap();

    assert!(hub.is_notify_armed());
    assert!(!hub.is_accepting());
    match Response::decode(hub.response()).unwrap() {
        Response::Intents { id, intents } => {
            assert_eq!(id, 11);
            let tags: Vec<&str> = intents.iter().map(|e| e.intent.as_str()).collect();
            assert_eq!(tags, [WIFI_TAG]);
        }
        other => panic!("expected a listing, got {other:?}"),
    }
}

#[test]
fn listing_follows_the_state_mask() {
    let (mut hub, mut sink) = make_hub(state::CONNECTED | state::PROVISIONED);
    let connected: Vec<String> = visible_tags(&hub);
    assert_eq!(connected, [WIFI_TAG, RESET_TAG, COMPLEX_TAG]);

    hub.on_disconnected(&mut sink);
    let offline = visible_tags(&hub);
    assert_eq!(offline, [WIFI_TAG, RESET_TAG], "complex needs every flag it names");
}

fn visible_tags(hub: &HubService) -> Vec<String> {
    hub.router()
        .list_visible_commands()
        .map(|d| d.tag().to_owned())
        .collect()
}

// ── Scenario C: oversize block ───────────────────────────────

#[test]
fn oversize_block_is_refused_and_slot_stays_open() {
    let (mut hub, mut sink) = make_hub(state::UNPROVISIONED);
    let mut peer = RecordingNotifier::new();
    let capacity = usize::from(hub.config().write_capacity);

    let block = vec![0xA5; capacity + 1];
    assert_eq!(hub.on_incoming_block(&block, &mut sink), Err(SlotError::Overflow));

    assert!(hub.is_accepting());
    assert!(hub.response().is_empty());
    assert!(!hub.is_notify_armed());
    assert!(sink.contains(&HubEvent::BlockRejected(SlotError::Overflow)));
    assert!(!hub.pump_once(&mut MemStorage::new(), &mut peer, &mut sink));
    assert!(peer.notified.is_empty());

    // The next well-formed request goes through.
    hub.on_incoming_block(&list(2), &mut sink).unwrap();
    assert!(!hub.is_accepting());
}

#[test]
fn garbage_block_gets_a_decode_error() {
    let (mut hub, mut sink) = make_hub(state::UNPROVISIONED);
    hub.on_incoming_block(&[0xFF, 0x00, 0x13], &mut sink).unwrap();
    assert_eq!(
        Response::decode(hub.response()).unwrap(),
        Response::error(None, ErrorKind::Decode)
    );
}

#[test]
fn invalid_parameters_are_a_decode_error() {
    let (mut hub, mut sink) = make_hub(state::UNPROVISIONED);
    hub.on_incoming_block(&invoke(4, WIFI_TAG, wifi_params("tab\there", "password1")), &mut sink)
        .unwrap();
    assert_eq!(
        Response::decode(hub.response()).unwrap(),
        Response::error(Some(4), ErrorKind::Decode)
    );
    assert!(!hub.has_queued_job());
}

// ── Scenario D: suspended chain resumes by id only ───────────

fn parking_command() -> CommandDescriptor {
    CommandDescriptor::new("com.example.park", state::CONNECTED)
        .step(|inv: &mut Invocation| StepOutcome::Suspend(StorageJob::new(inv.id()).erase("ns", "k")))
        .step(|inv: &mut Invocation| {
            let stored = matches!(inv.completion(), Some(Ok(())));
            StepOutcome::Complete(Coda::success().with("stored", Value::from(stored)))
        })
}

#[test]
fn resume_with_wrong_id_is_a_no_op() {
    let mut router = Router::new(state::CONNECTED);
    router.register_command(parking_command()).unwrap();
    let mut out = Capture::default();

    let disposition = router.handle_incoming(&invoke(21, "com.example.park", Value::map()), &mut out);
    assert!(matches!(disposition, Disposition::Suspended { id: 21, .. }));
    assert!(out.0.is_empty());

    assert_eq!(
        router.resume_invocation(99, Ok(()), &mut out).unwrap_err(),
        RouterError::UnknownInvocation(99)
    );
    assert!(out.0.is_empty());
    assert_eq!(router.pending_id(), Some(21));

    let disposition = router.resume_invocation(21, Ok(()), &mut out).unwrap();
    assert_eq!(
        disposition_answer(&disposition),
        Some((Some(21), Answer::Coda { success: true }))
    );
    match out.last() {
        Response::Coda { id, coda } => {
            assert_eq!(id, 21);
            assert_eq!(coda.field("stored"), Some(&Value::from(true)));
        }
        other => panic!("expected a coda, got {other:?}"),
    }
    assert_eq!(router.pending_id(), None);
}

#[test]
fn second_request_while_suspended_is_busy() {
    let mut router = Router::new(state::CONNECTED);
    router.register_command(parking_command()).unwrap();
    let mut out = Capture::default();

    let _ = router.handle_incoming(&invoke(1, "com.example.park", Value::map()), &mut out);
    let _ = router.handle_incoming(&list(2), &mut out);
    assert_eq!(out.last(), Response::error(Some(2), ErrorKind::Busy));
    assert_eq!(router.pending_id(), Some(1));
}

fn disposition_answer(d: &Disposition) -> Option<(Option<u32>, Answer)> {
    match d {
        Disposition::Answered { id, answer } => Some((*id, *answer)),
        _ => None,
    }
}
