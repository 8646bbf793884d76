//! Structured values carried by the intent envelope.
//!
//! A closed sum type replaces runtime down-casting of decoded trees: every
//! accessor states the variant it expects and fails with
//! [`CodecError::TypeMismatch`] otherwise.
//!
//! Maps keep insertion order and only allow text keys. Lookups are linear,
//! which is the right trade-off for the handful of keys an intent carries.

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use crate::error::CodecError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<Value>),
    Map(Vec<(String, Value)>),
}

impl Value {
    /// An empty map.
    pub const fn map() -> Self {
        Self::Map(Vec::new())
    }

    /// Build a map from `(key, value)` pairs. Later duplicates replace earlier ones.
    pub fn from_entries<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let mut map = Self::map();
        for (k, v) in entries {
            map = map.with(k, v);
        }
        map
    }

    /// Variant name, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    fn mismatch(&self, expected: &'static str) -> CodecError {
        CodecError::TypeMismatch {
            expected,
            found: self.kind(),
        }
    }

    pub fn as_bool(&self) -> Result<bool, CodecError> {
        match self {
            Self::Bool(b) => Ok(*b),
            other => Err(other.mismatch("bool")),
        }
    }

    pub fn as_int(&self) -> Result<i64, CodecError> {
        match self {
            Self::Int(i) => Ok(*i),
            other => Err(other.mismatch("int")),
        }
    }

    /// Integer narrowed to `u32` (invocation ids travel as `u32`).
    pub fn as_u32(&self) -> Result<u32, CodecError> {
        u32::try_from(self.as_int()?).map_err(|_| CodecError::OutOfRange)
    }

    pub fn as_str(&self) -> Result<&str, CodecError> {
        match self {
            Self::Str(s) => Ok(s),
            other => Err(other.mismatch("string")),
        }
    }

    pub fn as_list(&self) -> Result<&[Value], CodecError> {
        match self {
            Self::List(items) => Ok(items),
            other => Err(other.mismatch("list")),
        }
    }

    pub fn as_map(&self) -> Result<&[(String, Value)], CodecError> {
        match self {
            Self::Map(entries) => Ok(entries),
            other => Err(other.mismatch("map")),
        }
    }

    /// Named-key lookup. `None` when absent or when `self` is not a map.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Named-key lookup that fails explicitly.
    pub fn require(&self, key: &'static str) -> Result<&Value, CodecError> {
        self.as_map()?;
        self.get(key).ok_or(CodecError::MissingKey(key))
    }

    /// Insert or replace `key`. Fails if `self` is not a map.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Result<(), CodecError> {
        let Self::Map(entries) = self else {
            return Err(self.mismatch("map"));
        };
        let key = key.into();
        match entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => entries.push((key, value)),
        }
        Ok(())
    }

    /// Builder form of [`insert`](Self::insert); a no-op on non-map values.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        let _ = self.insert(key, value);
        self
    }

    /// Render as compact JSON for log output.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from("<unprintable>"))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::Str(s) => serializer.serialize_str(s),
            Self::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}
