//! Request/response envelope carried inside one transfer block.
//!
//! Requests:
//!
//! ```text
//! { "method": "list",   "id": u32 }
//! { "method": "invoke", "id": u32, "intent": str, "parameters"?: value }
//! ```
//!
//! Responses:
//!
//! ```text
//! { "type": "intents", "id": u32, "intents": [ { "intent": str, "schema"?: value } ] }
//! { "type": "coda",    "id": u32, "success": bool, ...fields }
//! { "type": "error",   "id"?: u32, "kind": str }
//! ```

use core::fmt;

use super::codec;
use super::value::Value;
use crate::error::CodecError;

// ── Requests ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Ask for every command visible in the current state.
    List { id: u32 },
    /// Run one command.
    Invoke {
        id: u32,
        intent: String,
        parameters: Value,
    },
}

/// Why a request block could not be turned into a [`Request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestError {
    /// The invocation id, when it could still be recovered.
    pub id: Option<u32>,
    pub cause: CodecError,
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "request {id}: {}", self.cause),
            None => write!(f, "request: {}", self.cause),
        }
    }
}

impl Request {
    pub fn id(&self) -> u32 {
        match self {
            Self::List { id } | Self::Invoke { id, .. } => *id,
        }
    }

    /// Decode a request block.
    pub fn decode(bytes: &[u8]) -> Result<Self, RequestError> {
        let value = codec::decode(bytes).map_err(|cause| RequestError { id: None, cause })?;
        let id = value.get("id").and_then(|v| v.as_u32().ok());
        Self::from_value(&value).map_err(|cause| RequestError { id, cause })
    }

    pub fn from_value(value: &Value) -> Result<Self, CodecError> {
        let id = value.require("id")?.as_u32()?;
        match value.require("method")?.as_str()? {
            "list" => Ok(Self::List { id }),
            "invoke" => {
                let intent = value.require("intent")?.as_str()?.to_owned();
                let parameters = value.get("parameters").cloned().unwrap_or(Value::map());
                Ok(Self::Invoke {
                    id,
                    intent,
                    parameters,
                })
            }
            _ => Err(CodecError::Invalid("unknown method")),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::List { id } => {
                Value::from_entries([("method", Value::from("list")), ("id", Value::from(*id))])
            }
            Self::Invoke {
                id,
                intent,
                parameters,
            } => Value::from_entries([
                ("method", Value::from("invoke")),
                ("id", Value::from(*id)),
                ("intent", Value::from(intent.as_str())),
                ("parameters", parameters.clone()),
            ]),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        codec::encode(&self.to_value())
    }
}

// ── Responses ─────────────────────────────────────────────────

/// Error kinds reported to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Decode,
    /// Unknown tag or gated out by the state mask. Deliberately the same
    /// answer for both.
    CapabilityDenied,
    Busy,
    Aborted,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Decode => "decode",
            Self::CapabilityDenied => "capability-denied",
            Self::Busy => "busy",
            Self::Aborted => "aborted",
            Self::Internal => "internal",
        }
    }

    fn parse(s: &str) -> Result<Self, CodecError> {
        match s {
            "decode" => Ok(Self::Decode),
            "capability-denied" => Ok(Self::CapabilityDenied),
            "busy" => Ok(Self::Busy),
            "aborted" => Ok(Self::Aborted),
            "internal" => Ok(Self::Internal),
            _ => Err(CodecError::Invalid("unknown error kind")),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal answer to an invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coda {
    pub success: bool,
    /// Extra response fields, in insertion order.
    pub fields: Vec<(String, Value)>,
}

impl Coda {
    pub fn success() -> Self {
        Self {
            success: true,
            fields: Vec::new(),
        }
    }

    pub fn failure() -> Self {
        Self {
            success: false,
            fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.fields.push((key.to_owned(), value));
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

/// One entry of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentEntry {
    pub intent: String,
    pub schema: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Intents { id: u32, intents: Vec<IntentEntry> },
    Coda { id: u32, coda: Coda },
    Error { id: Option<u32>, kind: ErrorKind },
}

const RESERVED_KEYS: [&str; 3] = ["type", "id", "success"];

impl Response {
    pub fn error(id: Option<u32>, kind: ErrorKind) -> Self {
        Self::Error { id, kind }
    }

    /// Encoded size of the largest error response. A read buffer at least
    /// this big can always carry the router's answer.
    pub fn max_error_len() -> usize {
        Self::error(Some(u32::MAX), ErrorKind::CapabilityDenied)
            .encode()
            .len()
    }

    pub fn id(&self) -> Option<u32> {
        match self {
            Self::Intents { id, .. } | Self::Coda { id, .. } => Some(*id),
            Self::Error { id, .. } => *id,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Intents { id, intents } => {
                let list = intents
                    .iter()
                    .map(|entry| {
                        let item = Value::map().with("intent", Value::from(entry.intent.as_str()));
                        match &entry.schema {
                            Some(schema) => item.with("schema", schema.clone()),
                            None => item,
                        }
                    })
                    .collect::<Vec<_>>();
                Value::from_entries([
                    ("type", Value::from("intents")),
                    ("id", Value::from(*id)),
                    ("intents", Value::List(list)),
                ])
            }
            Self::Coda { id, coda } => {
                let mut map = Value::from_entries([
                    ("type", Value::from("coda")),
                    ("id", Value::from(*id)),
                    ("success", Value::from(coda.success)),
                ]);
                for (k, v) in &coda.fields {
                    if !RESERVED_KEYS.contains(&k.as_str()) {
                        map = map.with(k.as_str(), v.clone());
                    }
                }
                map
            }
            Self::Error { id, kind } => {
                let mut map = Value::map().with("type", Value::from("error"));
                if let Some(id) = id {
                    map = map.with("id", Value::from(*id));
                }
                map.with("kind", Value::from(kind.as_str()))
            }
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        codec::encode(&self.to_value())
    }

    /// Peer-side decoding, used by host tools and tests.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Self::from_value(&codec::decode(bytes)?)
    }

    pub fn from_value(value: &Value) -> Result<Self, CodecError> {
        match value.require("type")?.as_str()? {
            "intents" => {
                let id = value.require("id")?.as_u32()?;
                let intents = value
                    .require("intents")?
                    .as_list()?
                    .iter()
                    .map(|item| {
                        Ok(IntentEntry {
                            intent: item.require("intent")?.as_str()?.to_owned(),
                            schema: item.get("schema").cloned(),
                        })
                    })
                    .collect::<Result<Vec<_>, CodecError>>()?;
                Ok(Self::Intents { id, intents })
            }
            "coda" => {
                let id = value.require("id")?.as_u32()?;
                let success = value.require("success")?.as_bool()?;
                let fields = value
                    .as_map()?
                    .iter()
                    .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
                    .cloned()
                    .collect();
                Ok(Self::Coda {
                    id,
                    coda: Coda { success, fields },
                })
            }
            "error" => {
                let id = match value.get("id") {
                    Some(v) => Some(v.as_u32()?),
                    None => None,
                };
                let kind = ErrorKind::parse(value.require("kind")?.as_str()?)?;
                Ok(Self::Error { id, kind })
            }
            _ => Err(CodecError::Invalid("unknown response type")),
        }
    }
}
