//! Block transfer over GATT write/indicate.
//!
//! The peer writes request blocks to the "Request" characteristic and the
//! hub answers on the "Response" characteristic, by indication and by
//! plain read. Blocks larger than one ATT payload travel as fragments
//! with a small sequence header:
//!
//! ```text
//! ┌──────┬──────┬─────────────────────┐
//! │ Seq  │ Flags│  Fragment payload    │
//! │ (1B) │ (1B) │  (mtu - 5 bytes)    │
//! └──────┴──────┴─────────────────────┘
//! ```
//!
//! Flags: bit 0 = "more fragments", bit 1 = "first fragment".
//!
//! Reassembly is capped at the hub's write capacity; anything longer is
//! discarded here and never reaches the transfer slot.

use core::fmt;

use log::{debug, info, warn};

use crate::app::ports::PeerNotifier;

// ── Constants ────────────────────────────────────────────────

pub const DEFAULT_MTU: usize = 23;
/// Largest ATT MTU Bluedroid negotiates.
pub const MAX_MTU: usize = 517;
pub const FRAG_HEADER_SIZE: usize = 2;
/// ATT opcode + handle.
const ATT_OVERHEAD: usize = 3;

/// Fragment flag: more fragments follow.
pub const FRAG_MORE: u8 = 0x01;
/// Fragment flag: this is the first fragment.
pub const FRAG_FIRST: u8 = 0x02;

// ── Error type ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTransferError {
    /// Fragment shorter than its header.
    Truncated,
    ReassemblyOverflow,
    SequenceError,
    /// The MTU leaves no room for payload.
    MtuTooSmall,
    /// No peer subscribed, or the stack refused the indication.
    Link,
}

impl fmt::Display for BlockTransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "block transfer: fragment shorter than header"),
            Self::ReassemblyOverflow => write!(f, "block transfer: block exceeds write capacity"),
            Self::SequenceError => write!(f, "block transfer: fragment sequence error"),
            Self::MtuTooSmall => write!(f, "block transfer: MTU too small"),
            Self::Link => write!(f, "block transfer: GATT link error"),
        }
    }
}

/// Payload bytes that fit in one fragment at `mtu`.
pub fn max_fragment_payload(mtu: usize) -> usize {
    mtu.saturating_sub(ATT_OVERHEAD + FRAG_HEADER_SIZE)
}

// ── Reassembly ───────────────────────────────────────────────

/// Reassembles one inbound block from fragments.
pub struct Reassembler {
    data: Vec<u8>,
    capacity: usize,
    expected_seq: u8,
    active: bool,
}

impl Reassembler {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            expected_seq: 0,
            active: false,
        }
    }

    pub fn reset(&mut self) {
        self.data.clear();
        self.expected_seq = 0;
        self.active = false;
    }

    /// A block is partially received.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Append one raw fragment (header included). Returns the whole block
    /// once the last fragment arrives.
    pub fn push(&mut self, fragment: &[u8]) -> Result<Option<&[u8]>, BlockTransferError> {
        let [seq, flags, payload @ ..] = fragment else {
            return Err(BlockTransferError::Truncated);
        };
        let is_first = flags & FRAG_FIRST != 0;
        let has_more = flags & FRAG_MORE != 0;

        if is_first {
            self.reset();
            self.active = true;
        }

        if !self.active {
            return Err(BlockTransferError::SequenceError);
        }

        if *seq != self.expected_seq {
            self.reset();
            return Err(BlockTransferError::SequenceError);
        }

        if self.data.len() + payload.len() > self.capacity {
            self.reset();
            return Err(BlockTransferError::ReassemblyOverflow);
        }

        self.data.extend_from_slice(payload);
        self.expected_seq = seq.wrapping_add(1);

        if has_more {
            Ok(None)
        } else {
            self.active = false;
            Ok(Some(&self.data))
        }
    }
}

// ── Fragmentation ────────────────────────────────────────────

/// Split `data` into fragments for `mtu` and hand each to `emit`.
///
/// An empty block still goes out as one header-only fragment.
/// Returns the number of fragments sent.
pub fn send_fragmented<F>(data: &[u8], mtu: usize, mut emit: F) -> Result<usize, BlockTransferError>
where
    F: FnMut(&[u8]) -> Result<(), BlockTransferError>,
{
    let total = fragment_count(data.len(), mtu)?;
    let max_payload = max_fragment_payload(mtu.min(MAX_MTU));
    let mut frag: Vec<u8> = Vec::with_capacity(FRAG_HEADER_SIZE + max_payload);

    for i in 0..total {
        let start = i * max_payload;
        let chunk = &data[start..data.len().min(start + max_payload)];

        let mut flags = 0u8;
        if i == 0 {
            flags |= FRAG_FIRST;
        }
        if i + 1 < total {
            flags |= FRAG_MORE;
        }

        frag.clear();
        frag.push(i as u8);
        frag.push(flags);
        frag.extend_from_slice(chunk);
        emit(&frag)?;
    }

    Ok(total)
}

/// Number of fragments `send_fragmented` emits for `len` bytes. An empty
/// block still takes one header-only fragment.
pub fn fragment_count(len: usize, mtu: usize) -> Result<usize, BlockTransferError> {
    let max_payload = max_fragment_payload(mtu.min(MAX_MTU));
    if max_payload == 0 {
        return Err(BlockTransferError::MtuTooSmall);
    }
    Ok(len.div_ceil(max_payload).max(1))
}

// ── GATT link ────────────────────────────────────────────────

/// The radio side of the block transport.
pub trait GattLink {
    /// Current ATT MTU.
    fn mtu(&self) -> usize;

    /// Send one fragment on the response characteristic.
    fn indicate(&mut self, fragment: &[u8]) -> Result<(), BlockTransferError>;

    /// Make `response` the value served to plain GATT reads.
    fn set_readable(&mut self, response: &[u8]);

    /// Called before the first fragment of a response goes out with the
    /// number of indications that will follow. Zero means none are owed.
    fn expect_confirms(&mut self, _fragments: usize) {}
}

// ── Transport ────────────────────────────────────────────────

/// Bridges the GATT link to the hub: reassembles requests and pushes
/// responses out as fragmented indications.
pub struct BlockTransport<L> {
    link: L,
    reassembly: Reassembler,
}

impl<L: GattLink> BlockTransport<L> {
    pub fn new(link: L, write_capacity: usize) -> Self {
        Self {
            link,
            reassembly: Reassembler::new(write_capacity),
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Feed one written fragment. Returns a complete block when one is ready.
    ///
    /// A bad fragment drops the partial block; the peer starts over.
    pub fn on_fragment(&mut self, fragment: &[u8]) -> Option<&[u8]> {
        match self.reassembly.push(fragment) {
            Ok(Some(block)) => {
                debug!("block transfer: request block of {} bytes", block.len());
                Some(block)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("{}", e);
                None
            }
        }
    }

    /// Drop any partial block (link lost).
    pub fn reset(&mut self) {
        if self.reassembly.is_active() {
            info!("block transfer: partial block discarded");
        }
        self.reassembly.reset();
    }
}

impl<L: GattLink> PeerNotifier for BlockTransport<L> {
    fn notify_peer(&mut self, response: &[u8]) {
        self.link.set_readable(response);
        let mtu = self.link.mtu();
        let total = match fragment_count(response.len(), mtu) {
            Ok(n) => n,
            Err(e) => {
                warn!("{} (response stays readable)", e);
                return;
            }
        };
        // The whole count is owed before any confirm can come back.
        self.link.expect_confirms(total);
        let link = &mut self.link;
        match send_fragmented(response, mtu, |frag| link.indicate(frag)) {
            Ok(n) => debug!(
                "block transfer: response of {} bytes in {} fragment(s)",
                response.len(),
                n
            ),
            Err(e) => {
                self.link.expect_confirms(0);
                warn!("{} (response stays readable)", e);
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────
