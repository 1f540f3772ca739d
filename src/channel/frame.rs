//! Msgpack framing of samples.
//!
//! A frame is one msgpack map from field name to value. Byte fields travel as `bin`,
//! text as `str`, scalars as their msgpack counterparts. Keys are accepted as either
//! `str` or `bin` on receipt. A map with a truthy `__EOF__` entry marks end of stream.

use crate::error::ChannelError;
use crate::sample::{EOF_FIELD, KEY_FIELD, Sample, Value};
use bytes::Bytes;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One decoded message.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
  /// A data sample.
  Sample(Sample),
  /// End-of-stream marker.
  Eof,
}

impl Frame {
  /// Encodes the frame as a msgpack map.
  pub fn encode(&self) -> Result<Bytes, ChannelError> {
    match self {
      Frame::Sample(sample) => Self::encode_sample(sample),
      Frame::Eof => Self::encode_eof(),
    }
  }

  /// Encodes a sample without wrapping it in a frame.
  pub fn encode_sample(sample: &Sample) -> Result<Bytes, ChannelError> {
    Ok(Bytes::from(rmp_serde::to_vec(&WireSample(sample))?))
  }

  /// Encodes the end-of-stream marker.
  pub fn encode_eof() -> Result<Bytes, ChannelError> {
    Ok(Bytes::from(rmp_serde::to_vec(&WireEof)?))
  }

  /// Decodes a msgpack map.
  pub fn decode(frame: &[u8]) -> Result<Self, ChannelError> {
    let WireMap(pairs) =
      rmp_serde::from_slice(frame).map_err(|e| ChannelError::Decode(e.to_string()))?;
    if pairs
      .iter()
      .any(|(name, value)| name == EOF_FIELD && truthy(value))
    {
      return Ok(Frame::Eof);
    }
    let sample = Sample::from_fields(pairs.into_iter().filter(|(name, _)| name != EOF_FIELD))
      .map_err(|e| ChannelError::Decode(e.to_string()))?;
    Ok(Frame::Sample(sample))
  }
}

fn truthy(value: &Value) -> bool {
  match value {
    Value::Bytes(bytes) => !bytes.is_empty(),
    Value::Text(text) => !text.is_empty(),
    Value::Int(n) => *n != 0,
    Value::Float(x) => *x != 0.0,
    Value::Bool(b) => *b,
  }
}

struct WireSample<'a>(&'a Sample);

impl Serialize for WireSample<'_> {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(self.0.len() + 1))?;
    map.serialize_entry(KEY_FIELD, self.0.key())?;
    for (name, value) in self.0.fields() {
      map.serialize_entry(name, &WireValue(value))?;
    }
    map.end()
  }
}

struct WireEof;

impl Serialize for WireEof {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(1))?;
    map.serialize_entry(EOF_FIELD, &true)?;
    map.end()
  }
}

struct WireValue<'a>(&'a Value);

impl Serialize for WireValue<'_> {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    match self.0 {
      Value::Bytes(bytes) => serializer.serialize_bytes(bytes),
      Value::Text(text) => serializer.serialize_str(text),
      Value::Int(n) => serializer.serialize_i64(*n),
      Value::Float(x) => serializer.serialize_f64(*x),
      Value::Bool(b) => serializer.serialize_bool(*b),
    }
  }
}

struct WireMap(Vec<(String, Value)>);

impl<'de> Deserialize<'de> for WireMap {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    struct MapVisitor;

    impl<'de> Visitor<'de> for MapVisitor {
      type Value = WireMap;

      fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of field names to values")
      }

      fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<WireMap, A::Error> {
        let mut pairs = Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((WireKey(name), OwnedValue(value))) = access.next_entry()? {
          pairs.push((name, value));
        }
        Ok(WireMap(pairs))
      }
    }

    deserializer.deserialize_map(MapVisitor)
  }
}

struct WireKey(String);

impl<'de> Deserialize<'de> for WireKey {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    struct KeyVisitor;

    impl Visitor<'_> for KeyVisitor {
      type Value = WireKey;

      fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a string or byte string field name")
      }

      fn visit_str<E: de::Error>(self, v: &str) -> Result<WireKey, E> {
        Ok(WireKey(v.to_string()))
      }

      fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<WireKey, E> {
        Ok(WireKey(String::from_utf8_lossy(v).into_owned()))
      }
    }

    deserializer.deserialize_any(KeyVisitor)
  }
}

struct OwnedValue(Value);

impl<'de> Deserialize<'de> for OwnedValue {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    struct ValueVisitor;

    impl Visitor<'_> for ValueVisitor {
      type Value = OwnedValue;

      fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("bytes, text, a number or a boolean")
      }

      fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<OwnedValue, E> {
        Ok(OwnedValue(Value::Bytes(Bytes::copy_from_slice(v))))
      }

      fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<OwnedValue, E> {
        Ok(OwnedValue(Value::Bytes(Bytes::from(v))))
      }

      fn visit_str<E: de::Error>(self, v: &str) -> Result<OwnedValue, E> {
        Ok(OwnedValue(Value::Text(v.to_string())))
      }

      fn visit_string<E: de::Error>(self, v: String) -> Result<OwnedValue, E> {
        Ok(OwnedValue(Value::Text(v)))
      }

      fn visit_i64<E: de::Error>(self, v: i64) -> Result<OwnedValue, E> {
        Ok(OwnedValue(Value::Int(v)))
      }

      fn visit_u64<E: de::Error>(self, v: u64) -> Result<OwnedValue, E> {
        i64::try_from(v)
          .map(|n| OwnedValue(Value::Int(n)))
          .map_err(|_| E::custom(format!("integer {v} out of range")))
      }

      fn visit_f64<E: de::Error>(self, v: f64) -> Result<OwnedValue, E> {
        Ok(OwnedValue(Value::Float(v)))
      }

      fn visit_bool<E: de::Error>(self, v: bool) -> Result<OwnedValue, E> {
        Ok(OwnedValue(Value::Bool(v)))
      }
    }

    deserializer.deserialize_any(ValueVisitor)
  }
}
