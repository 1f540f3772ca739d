//! # Samples
//!
//! A [`Sample`] is one logical record of a dataset: a key plus an ordered list of named
//! fields. On disk every field becomes one archive entry named `<key>.<field>`; on the
//! wire a sample is one msgpack map.
//!
//! Field names starting with `_` are *meta* fields. `__key__` is held separately and is
//! validated at construction, so a `Sample` value can never be keyless.

use crate::error::{Error, ValidationError};
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

/// Reserved field holding the sample key.
pub const KEY_FIELD: &str = "__key__";
/// Reserved field holding the locator of the shard a sample was read from.
pub const SOURCE_FIELD: &str = "__source__";
/// Reserved wire-only field marking end of stream.
pub const EOF_FIELD: &str = "__EOF__";

/// Item type flowing through every pipeline stage.
pub type SampleResult = Result<Sample, Error>;

/// Boxed lazy stream of samples.
pub type SampleStream = Pin<Box<dyn Stream<Item = SampleResult> + Send>>;

/// Sample rewriting hook, used for decoding after reads and encoding before writes.
pub type SampleMapper = Arc<dyn Fn(Sample) -> Result<Sample, Error> + Send + Sync>;

/// Returns true for field names treated as metadata.
pub fn is_meta(name: &str) -> bool {
  name.starts_with('_')
}

/// A field value.
///
/// Archives only ever produce [`Value::Bytes`]; the other variants exist because peers on
/// a message channel may send scalar values.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
  /// Raw bytes.
  Bytes(Bytes),
  /// UTF-8 text, written to archives as its UTF-8 encoding.
  Text(String),
  /// Integer scalar.
  Int(i64),
  /// Floating point scalar.
  Float(f64),
  /// Boolean scalar.
  Bool(bool),
}

impl Value {
  /// Byte view of the value, when it has one.
  pub fn as_bytes(&self) -> Option<&[u8]> {
    match self {
      Value::Bytes(bytes) => Some(bytes),
      Value::Text(text) => Some(text.as_bytes()),
      _ => None,
    }
  }

  /// Text view of the value, when it is text.
  pub fn as_str(&self) -> Option<&str> {
    match self {
      Value::Text(text) => Some(text),
      _ => None,
    }
  }

  /// Short name of the variant, used in error messages.
  pub fn kind(&self) -> &'static str {
    match self {
      Value::Bytes(_) => "bytes",
      Value::Text(_) => "text",
      Value::Int(_) => "int",
      Value::Float(_) => "float",
      Value::Bool(_) => "bool",
    }
  }
}

impl From<Bytes> for Value {
  fn from(value: Bytes) -> Self {
    Value::Bytes(value)
  }
}

impl From<Vec<u8>> for Value {
  fn from(value: Vec<u8>) -> Self {
    Value::Bytes(Bytes::from(value))
  }
}

impl From<&[u8]> for Value {
  fn from(value: &[u8]) -> Self {
    Value::Bytes(Bytes::copy_from_slice(value))
  }
}

impl<const N: usize> From<&[u8; N]> for Value {
  fn from(value: &[u8; N]) -> Self {
    Value::Bytes(Bytes::copy_from_slice(value))
  }
}

impl From<String> for Value {
  fn from(value: String) -> Self {
    Value::Text(value)
  }
}

impl From<&str> for Value {
  fn from(value: &str) -> Self {
    Value::Text(value.to_string())
  }
}

impl From<i64> for Value {
  fn from(value: i64) -> Self {
    Value::Int(value)
  }
}

impl From<f64> for Value {
  fn from(value: f64) -> Self {
    Value::Float(value)
  }
}

impl From<bool> for Value {
  fn from(value: bool) -> Self {
    Value::Bool(value)
  }
}

/// One record of a dataset.
///
/// ```rust
/// use shardweave::Sample;
///
/// let sample = Sample::new("000001")?
///   .with_field("txt", "hello")?
///   .with_field("cls", b"3".to_vec())?;
/// assert_eq!(sample.key(), "000001");
/// assert_eq!(sample.get("txt").and_then(|v| v.as_bytes()), Some(&b"hello"[..]));
/// # Ok::<(), shardweave::error::ValidationError>(())
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
  key: String,
  fields: Vec<(String, Value)>,
}

impl Sample {
  /// Creates a sample with the given key and no fields.
  pub fn new(key: impl Into<String>) -> Result<Self, ValidationError> {
    let key = key.into();
    if key.is_empty() {
      return Err(ValidationError::MissingKey);
    }
    Ok(Self {
      key,
      fields: Vec::new(),
    })
  }

  /// Builds a sample from `(name, value)` pairs; one of them must be a textual
  /// `__key__`.
  pub fn from_fields<I, K, V>(fields: I) -> Result<Self, ValidationError>
  where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
  {
    let mut key = None;
    let mut rest = Vec::new();
    for (name, value) in fields {
      let name = name.into();
      let value = value.into();
      if name == KEY_FIELD {
        match value {
          Value::Text(text) => key = Some(text),
          Value::Bytes(bytes) => key = Some(String::from_utf8_lossy(&bytes).into_owned()),
          _ => return Err(ValidationError::MissingKey),
        }
      } else {
        rest.push((name, value));
      }
    }
    let mut sample = Sample::new(key.ok_or(ValidationError::MissingKey)?)?;
    for (name, value) in rest {
      sample.insert(name, value)?;
    }
    Ok(sample)
  }

  /// The sample key.
  pub fn key(&self) -> &str {
    &self.key
  }

  /// Inserts or replaces a field, keeping the position of an existing field.
  ///
  /// `__key__` cannot be set this way.
  pub fn insert(
    &mut self,
    name: impl Into<String>,
    value: impl Into<Value>,
  ) -> Result<Option<Value>, ValidationError> {
    let name = name.into();
    if name == KEY_FIELD {
      return Err(ValidationError::ReservedField(name));
    }
    let value = value.into();
    match self.fields.iter_mut().find(|(existing, _)| *existing == name) {
      Some((_, slot)) => Ok(Some(std::mem::replace(slot, value))),
      None => {
        self.fields.push((name, value));
        Ok(None)
      }
    }
  }

  /// Builder form of [`Sample::insert`].
  pub fn with_field(
    mut self,
    name: impl Into<String>,
    value: impl Into<Value>,
  ) -> Result<Self, ValidationError> {
    self.insert(name, value)?;
    Ok(self)
  }

  /// Looks up a field by name.
  pub fn get(&self, name: &str) -> Option<&Value> {
    self
      .fields
      .iter()
      .find(|(existing, _)| existing == name)
      .map(|(_, value)| value)
  }

  /// Returns true if a field with this name exists.
  pub fn contains(&self, name: &str) -> bool {
    self.get(name).is_some()
  }

  /// Removes a field, returning its value.
  pub fn remove(&mut self, name: &str) -> Option<Value> {
    let index = self.fields.iter().position(|(existing, _)| existing == name)?;
    Some(self.fields.remove(index).1)
  }

  /// The `__source__` field, when present and textual.
  pub fn source(&self) -> Option<&str> {
    self.get(SOURCE_FIELD).and_then(Value::as_str)
  }

  /// Sets `__source__` unless the sample already carries one.
  pub fn ensure_source(&mut self, locator: &str) {
    if !self.contains(SOURCE_FIELD) {
      self
        .fields
        .push((SOURCE_FIELD.to_string(), Value::Text(locator.to_string())));
    }
  }

  /// Fields in insertion order, excluding the key.
  pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
    self.fields.iter().map(|(name, value)| (name.as_str(), value))
  }

  /// Number of fields, excluding the key.
  pub fn len(&self) -> usize {
    self.fields.len()
  }

  /// True when the sample has no fields besides its key.
  pub fn is_empty(&self) -> bool {
    self.fields.is_empty()
  }
}
