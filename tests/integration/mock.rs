//! Mock adapters for integration tests.
//!
//! Records every event and notification so tests can assert on the full
//! history without a radio or flash partition.

use std::collections::HashMap;

use nesvoy::app::events::HubEvent;
use nesvoy::app::ports::{EventSink, PeerNotifier, StorageError, StoragePort};
use nesvoy::rpc::envelope::{Request, Response};
use nesvoy::rpc::value::Value;

// ── RecordingSink ─────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<HubEvent>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, event: &HubEvent) -> bool {
        self.events.contains(event)
    }

    pub fn count(&self, pred: impl Fn(&HubEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &HubEvent) {
        self.events.push(event.clone());
    }
}

// ── MemStorage ────────────────────────────────────────────────

/// In-memory key-value store keyed by `namespace::key`.
#[derive(Default)]
pub struct MemStorage {
    pub data: HashMap<String, Vec<u8>>,
    /// When set, every write and delete fails with this error.
    pub fail_with: Option<StorageError>,
    pub writes: usize,
}

#[allow(dead_code)]
impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(error: StorageError) -> Self {
        Self {
            fail_with: Some(error),
            ..Self::default()
        }
    }

    pub fn get(&self, ns: &str, key: &str) -> Option<&[u8]> {
        self.data.get(&format!("{}::{}", ns, key)).map(Vec::as_slice)
    }

    pub fn seed(&mut self, ns: &str, key: &str, value: &[u8]) {
        self.data.insert(format!("{}::{}", ns, key), value.to_vec());
    }
}

impl StoragePort for MemStorage {
    fn read(&self, ns: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let value = self.get(ns, key).ok_or(StorageError::NotFound)?;
        let n = value.len().min(buf.len());
        buf[..n].copy_from_slice(&value[..n]);
        Ok(n)
    }

    fn write(&mut self, ns: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        if let Some(e) = self.fail_with {
            return Err(e);
        }
        self.writes += 1;
        self.seed(ns, key, data);
        Ok(())
    }

    fn delete(&mut self, ns: &str, key: &str) -> Result<(), StorageError> {
        if let Some(e) = self.fail_with {
            return Err(e);
        }
        self.data.remove(&format!("{}::{}", ns, key));
        Ok(())
    }

    fn exists(&self, ns: &str, key: &str) -> bool {
        self.data.contains_key(&format!("{}::{}", ns, key))
    }
}

// ── RecordingNotifier ─────────────────────────────────────────

#[derive(Default)]
pub struct RecordingNotifier {
    pub notified: Vec<Vec<u8>>,
}

#[allow(dead_code)]
impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the most recent notification.
    pub fn last_response(&self) -> Option<Response> {
        self.notified.last().and_then(|b| Response::decode(b).ok())
    }
}

impl PeerNotifier for RecordingNotifier {
    fn notify_peer(&mut self, response: &[u8]) {
        self.notified.push(response.to_vec());
    }
}

// ── Request builders ──────────────────────────────────────────

#[allow(dead_code)]
pub fn list(id: u32) -> Vec<u8> {
    Request::List { id }.encode()
}

#[allow(dead_code)]
pub fn invoke(id: u32, intent: &str, parameters: Value) -> Vec<u8> {
    Request::Invoke {
        id,
        intent: intent.to_owned(),
        parameters,
    }
    .encode()
}

#[allow(dead_code)]
pub fn wifi_params(ssid: &str, key: &str) -> Value {
    Value::from_entries([("ssid", Value::from(ssid)), ("key", Value::from(key))])
}
