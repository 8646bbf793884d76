//! Unified error types for the Nesvoy firmware.
//!
//! A single `Error` enum that every subsystem can convert into, keeping the
//! scheduling loop's error handling uniform. All variants are `Copy` so they
//! can be returned from transport callbacks and logged without allocation.

use core::fmt;

use crate::app::ports::{ConfigError, StorageError};

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible operation in the firmware funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The transfer slot refused a block.
    Slot(SlotError),
    /// A block or value could not be decoded.
    Codec(CodecError),
    /// Command registration or invocation bookkeeping failed.
    Router(RouterError),
    /// The durable key-value sink failed.
    Storage(StorageError),
    /// Configuration is invalid or could not be loaded.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Slot(e) => write!(f, "slot: {e}"),
            Self::Codec(e) => write!(f, "codec: {e}"),
            Self::Router(e) => write!(f, "router: {e}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Transfer slot errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotError {
    /// A response is still waiting for the peer; writes are disabled.
    Rejected,
    /// The block does not fit the slot's buffer.
    Overflow,
    /// A response was published while an unconsumed one is still held.
    ResponsePending,
}

impl fmt::Display for SlotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected => write!(f, "write rejected, response pending"),
            Self::Overflow => write!(f, "block exceeds buffer capacity"),
            Self::ResponsePending => write!(f, "unconsumed response still held"),
        }
    }
}

impl From<SlotError> for Error {
    fn from(e: SlotError) -> Self {
        Self::Slot(e)
    }
}

// ---------------------------------------------------------------------------
// Codec errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// Input is not well-formed CBOR.
    Malformed,
    /// Well-formed CBOR using an item the value model does not carry
    /// (floats, tags, byte strings, indefinite lengths, ...).
    Unsupported,
    /// Containers nested deeper than the decoder allows.
    TooDeep,
    /// Bytes left over after the top-level item.
    TrailingBytes,
    /// A map key that is not a text string.
    NonStringKey,
    /// A value accessor found a different variant.
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    /// A required map key is absent.
    MissingKey(&'static str),
    /// An integer does not fit the requested width.
    OutOfRange,
    /// Structurally valid but rejected by a field validator.
    Invalid(&'static str),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed CBOR"),
            Self::Unsupported => write!(f, "unsupported CBOR item"),
            Self::TooDeep => write!(f, "nesting too deep"),
            Self::TrailingBytes => write!(f, "trailing bytes after value"),
            Self::NonStringKey => write!(f, "map key is not a string"),
            Self::TypeMismatch { expected, found } => {
                write!(f, "expected {expected}, found {found}")
            }
            Self::MissingKey(key) => write!(f, "missing key '{key}'"),
            Self::OutOfRange => write!(f, "integer out of range"),
            Self::Invalid(msg) => write!(f, "invalid: {msg}"),
        }
    }
}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

impl From<minicbor::decode::Error> for CodecError {
    fn from(_: minicbor::decode::Error) -> Self {
        Self::Malformed
    }
}

// ---------------------------------------------------------------------------
// Router errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterError {
    /// A command with the same tag is already registered.
    DuplicateTag,
    /// No pending invocation carries this id.
    UnknownInvocation(u32),
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateTag => write!(f, "duplicate command tag"),
            Self::UnknownInvocation(id) => write!(f, "no pending invocation with id {id}"),
        }
    }
}

impl From<RouterError> for Error {
    fn from(e: RouterError) -> Self {
        Self::Router(e)
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::ValidationFailed(msg) => Self::Config(msg),
            ConfigError::Corrupted => Self::Config("stored config corrupted"),
            ConfigError::IoError => Self::Config("config storage I/O failed"),
        }
    }
}

impl std::error::Error for Error {}
