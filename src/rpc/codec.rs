//! CBOR codec for [`Value`] trees.
//!
//! Only the subset the value model can represent is accepted:
//!
//! | CBOR major type          | Value            |
//! |--------------------------|------------------|
//! | 0 / 1 (integers)         | `Int` (i64 range)|
//! | 3 (text, definite)       | `Str`            |
//! | 4 (array, definite)      | `List`           |
//! | 5 (map, definite, text keys) | `Map`        |
//! | 7 (true / false)         | `Bool`           |
//!
//! Everything else (byte strings, floats, tags, null, indefinite lengths)
//! is rejected with [`CodecError::Unsupported`]. Nesting is capped so a
//! hostile block cannot exhaust the callback stack.

use core::convert::Infallible;

use log::warn;
use minicbor::data::Type;
use minicbor::{Decoder, Encoder};

use super::value::Value;
use crate::error::CodecError;

/// Maximum container nesting accepted by [`decode`].
pub const MAX_DEPTH: usize = 8;

/// Decode exactly one value from `bytes`.
pub fn decode(bytes: &[u8]) -> Result<Value, CodecError> {
    let mut dec = Decoder::new(bytes);
    let value = read_value(&mut dec, 0)?;
    if dec.position() != bytes.len() {
        return Err(CodecError::TrailingBytes);
    }
    Ok(value)
}

/// Encode `value` into a fresh buffer.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut enc = Encoder::new(Vec::new());
    // The writer error is `Infallible`; only a minicbor bug lands here.
    if let Err(e) = write_value(&mut enc, value) {
        warn!("codec: encode failed ({})", e);
    }
    enc.into_writer()
}

fn read_value(dec: &mut Decoder<'_>, depth: usize) -> Result<Value, CodecError> {
    if depth > MAX_DEPTH {
        return Err(CodecError::TooDeep);
    }

    match dec.datatype()? {
        Type::Bool => Ok(Value::Bool(dec.bool()?)),
        Type::U8 | Type::U16 | Type::U32 | Type::U64 | Type::I8 | Type::I16 | Type::I32
        | Type::I64 => dec.i64().map(Value::Int).map_err(|_| CodecError::OutOfRange),
        Type::String => Ok(Value::Str(dec.str()?.to_owned())),
        Type::Array => {
            let len = dec.array()?.ok_or(CodecError::Unsupported)?;
            let mut items = Vec::new();
            for _ in 0..len {
                items.push(read_value(dec, depth + 1)?);
            }
            Ok(Value::List(items))
        }
        Type::Map => {
            let len = dec.map()?.ok_or(CodecError::Unsupported)?;
            let mut entries: Vec<(String, Value)> = Vec::new();
            for _ in 0..len {
                if dec.datatype()? != Type::String {
                    return Err(CodecError::NonStringKey);
                }
                let key = dec.str()?.to_owned();
                let value = read_value(dec, depth + 1)?;
                // Duplicate keys: last one wins, matching Value::insert.
                match entries.iter_mut().find(|(k, _)| *k == key) {
                    Some((_, slot)) => *slot = value,
                    None => entries.push((key, value)),
                }
            }
            Ok(Value::Map(entries))
        }
        _ => Err(CodecError::Unsupported),
    }
}

fn write_value(
    enc: &mut Encoder<Vec<u8>>,
    value: &Value,
) -> Result<(), minicbor::encode::Error<Infallible>> {
    match value {
        Value::Bool(b) => {
            enc.bool(*b)?;
        }
        Value::Int(i) => {
            enc.i64(*i)?;
        }
        Value::Str(s) => {
            enc.str(s)?;
        }
        Value::List(items) => {
            enc.array(items.len() as u64)?;
            for item in items {
                write_value(enc, item)?;
            }
        }
        Value::Map(entries) => {
            enc.map(entries.len() as u64)?;
            for (k, v) in entries {
                enc.str(k)?;
                write_value(enc, v)?;
            }
        }
    }
    Ok(())
}
