//! Port traits: the hexagonal boundary between the hub and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ HubService (domain)
//! ```
//!
//! Driven adapters (storage, radio, event sinks) implement these traits.
//! The [`HubService`](super::service::HubService) consumes them via
//! generics, so the transaction core never touches the radio or flash
//! directly.
//!
//! ## Security notes
//!
//! - **ConfigPort** implementations MUST validate before persisting.
//! - **StoragePort** implementations SHOULD encrypt the credential namespace.

use core::fmt;

use crate::config::HubConfig;

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The hub emits structured [`HubEvent`](super::events::HubEvent)s through
/// this port. Adapters decide where they go.
pub trait EventSink {
    fn emit(&mut self, event: &super::events::HubEvent);
}

// ───────────────────────────────────────────────────────────────
// Peer notifier port (driven adapter: domain → radio)
// ───────────────────────────────────────────────────────────────

/// Tells the connected peer that a response is ready.
///
/// Only ever called from the scheduling loop, after the deferred signal
/// has been drained. `response` is the full held response; a transport
/// that cannot push data may ignore it and let the peer read instead.
pub trait PeerNotifier {
    fn notify_peer(&mut self, response: &[u8]);
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists hub configuration.
///
/// Implementations MUST validate config values before persisting and
/// reject bad ranges with [`ConfigError::ValidationFailed`].
pub trait ConfigPort {
    /// Returns [`HubConfig::default()`] if no stored config exists.
    fn load(&self) -> Result<HubConfig, ConfigError>;

    fn save(&self, config: &HubConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage.
///
/// Keys are namespaced so subsystems cannot collide. Writes MUST be atomic
/// per key; the ESP-IDF NVS API guarantees this natively.
pub trait StoragePort {
    /// Read a value. Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key. Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    fn exists(&self, namespace: &str, key: &str) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Deferred storage work
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageOp {
    Put {
        namespace: &'static str,
        key: &'static str,
        value: Vec<u8>,
    },
    Erase {
        namespace: &'static str,
        key: &'static str,
    },
}

/// The storage work a suspended invocation waits on.
///
/// Queued by [`HubService`](super::service::HubService) and executed on
/// the next `pump_once`; the result is handed back to the invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageJob {
    pub invocation: u32,
    pub ops: Vec<StorageOp>,
}

impl StorageJob {
    pub fn new(invocation: u32) -> Self {
        Self {
            invocation,
            ops: Vec::new(),
        }
    }

    #[must_use]
    pub fn put(mut self, namespace: &'static str, key: &'static str, value: &[u8]) -> Self {
        self.ops.push(StorageOp::Put {
            namespace,
            key,
            value: value.to_vec(),
        });
        self
    }

    #[must_use]
    pub fn erase(mut self, namespace: &'static str, key: &'static str) -> Self {
        self.ops.push(StorageOp::Erase { namespace, key });
        self
    }

    /// Apply every op in order, stopping at the first failure.
    pub fn run(&self, storage: &mut impl StoragePort) -> Result<(), StorageError> {
        for op in &self.ops {
            match op {
                StorageOp::Put {
                    namespace,
                    key,
                    value,
                } => storage.write(namespace, key, value)?,
                StorageOp::Erase { namespace, key } => storage.delete(namespace, key)?,
            }
        }
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Stored config failed deserialization.
    Corrupted,
    /// A config field failed range validation.
    ValidationFailed(&'static str),
    /// Generic I/O error from the storage backend.
    IoError,
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    NotFound,
    Full,
    IoError,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}
