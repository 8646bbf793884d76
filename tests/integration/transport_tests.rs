//! Block transfer through the hub: peer fragments in, indications out.

use crate::mock::{MemStorage, RecordingSink, invoke, list, wifi_params};

use nesvoy::adapters::block_transfer::{
    BlockTransferError, BlockTransport, DEFAULT_MTU, GattLink, Reassembler, send_fragmented,
};
use nesvoy::app::commands::{WIFI_TAG, register_builtin};
use nesvoy::app::service::HubService;
use nesvoy::app::state;
use nesvoy::config::HubConfig;
use nesvoy::rpc::envelope::Response;

// ── Mock link ─────────────────────────────────────────────────

struct MockLink {
    mtu: usize,
    indications: Vec<Vec<u8>>,
    readable: Vec<u8>,
}

impl MockLink {
    fn new(mtu: usize) -> Self {
        Self {
            mtu,
            indications: Vec::new(),
            readable: Vec::new(),
        }
    }
}

impl GattLink for MockLink {
    fn mtu(&self) -> usize {
        self.mtu
    }

    fn indicate(&mut self, fragment: &[u8]) -> Result<(), BlockTransferError> {
        self.indications.push(fragment.to_vec());
        Ok(())
    }

    fn set_readable(&mut self, response: &[u8]) {
        self.readable = response.to_vec();
    }
}

// ── Harness ───────────────────────────────────────────────────

struct Rig {
    hub: HubService,
    transport: BlockTransport<MockLink>,
    storage: MemStorage,
    sink: RecordingSink,
}

impl Rig {
    fn new(mtu: usize) -> Self {
        let config = HubConfig::default();
        let capacity = usize::from(config.write_capacity);
        let mut hub = HubService::new(config);
        register_builtin(&mut hub).unwrap();
        let mut sink = RecordingSink::new();
        hub.on_connected(&mut sink);
        Self {
            hub,
            transport: BlockTransport::new(MockLink::new(mtu), capacity),
            storage: MemStorage::new(),
            sink,
        }
    }

    /// Write `block` the way a peer would: fragmented for the current MTU.
    fn peer_write(&mut self, block: &[u8]) {
        let mut fragments = Vec::new();
        send_fragmented(block, self.transport.link().mtu(), |f| {
            fragments.push(f.to_vec());
            Ok(())
        })
        .unwrap();

        for fragment in &fragments {
            if let Some(request) = self.transport.on_fragment(fragment) {
                let _ = self.hub.on_incoming_block(request, &mut self.sink);
            }
        }
    }

    /// Run the scheduling pass and reassemble what the peer received.
    fn peer_receive(&mut self) -> Option<Response> {
        self.transport.link_mut().indications.clear();
        if !self
            .hub
            .pump_once(&mut self.storage, &mut self.transport, &mut self.sink)
        {
            return None;
        }
        let mut reassembler = Reassembler::new(usize::from(self.hub.config().read_capacity));
        let mut block = None;
        for fragment in &self.transport.link().indications {
            if let Some(done) = reassembler.push(fragment).unwrap() {
                block = Some(done.to_vec());
            }
        }
        self.hub.on_read_complete(&mut self.sink);
        Response::decode(&block?).ok()
    }
}

// ── Tests ─────────────────────────────────────────────────────

#[test]
fn listing_round_trips_at_minimum_mtu() {
    let mut rig = Rig::new(DEFAULT_MTU);
    rig.peer_write(&list(1));

    match rig.peer_receive() {
        Some(Response::Intents { id, intents }) => {
            assert_eq!(id, 1);
            assert_eq!(intents.len(), 1);
            assert_eq!(intents[0].intent, WIFI_TAG);
            assert!(intents[0].schema.is_some());
        }
        other => panic!("expected a listing, got {other:?}"),
    }
    assert!(
        rig.transport.link().indications.len() > 1,
        "a listing does not fit one 23-byte MTU"
    );
    assert!(rig.hub.is_accepting());
}

#[test]
fn provisioning_over_fragments_reaches_storage() {
    let mut rig = Rig::new(64);
    let request = invoke(2, WIFI_TAG, wifi_params("HomeNet", "password1"));
    rig.peer_write(&request);
    assert_eq!(rig.hub.pending_id(), Some(2));

    match rig.peer_receive() {
        Some(Response::Coda { id, coda }) => {
            assert_eq!(id, 2);
            assert!(coda.success);
        }
        other => panic!("expected a coda, got {other:?}"),
    }
    assert!(state::is_provisioned(rig.hub.state_mask()));
    assert!(!rig.transport.link().readable.is_empty(), "response stays readable");
}

#[test]
fn oversize_block_is_dropped_before_the_hub() {
    let mut rig = Rig::new(DEFAULT_MTU);
    let capacity = usize::from(rig.hub.config().write_capacity);
    rig.peer_write(&vec![0x5A; capacity + 40]);

    assert!(rig.hub.is_accepting());
    assert!(rig.sink.events.iter().all(|e| !matches!(
        e,
        nesvoy::app::events::HubEvent::Answered { .. }
    )));
    assert_eq!(rig.peer_receive(), None);

    // The transport recovers for the next block.
    rig.peer_write(&list(3));
    assert!(matches!(rig.peer_receive(), Some(Response::Intents { id: 3, .. })));
}

#[test]
fn reset_discards_a_partial_block() {
    let mut rig = Rig::new(DEFAULT_MTU);
    let request = list(4);
    let mut fragments = Vec::new();
    send_fragmented(&request, 4 + 3 + 2, |f| {
        fragments.push(f.to_vec());
        Ok(())
    })
    .unwrap();
    assert!(fragments.len() > 1);

    assert!(rig.transport.on_fragment(&fragments[0]).is_none());
    rig.transport.reset();
    // The tail alone is out of sequence and never completes.
    for fragment in &fragments[1..] {
        assert!(rig.transport.on_fragment(fragment).is_none());
    }
    assert!(rig.hub.is_accepting());
}
