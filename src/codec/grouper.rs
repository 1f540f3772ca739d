//! Grouping a flat sequence of `(name, bytes)` entries into samples.

use super::keys::KeySplitter;
use crate::error::ValidationError;
use crate::sample::{KEY_FIELD, Sample, Value, is_meta};
use bytes::Bytes;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Entry names matching this are dropped before grouping.
pub const DEFAULT_SKIP_META: &str = r"__[^/]*__($|/)";

/// How entries are turned into samples.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
  /// Entry name splitting policy.
  pub keys: KeySplitter,
  /// Lower-case field names.
  pub lowercase: bool,
  /// When set, only these field names are kept.
  pub suffixes: Option<BTreeSet<String>>,
  /// Entries whose name matches at the start are skipped. `None` disables the check.
  pub skip_meta: Option<String>,
  /// Keep fields whose name starts with `_`.
  pub keep_meta: bool,
}

impl Default for CodecConfig {
  fn default() -> Self {
    Self {
      keys: KeySplitter::default(),
      lowercase: true,
      suffixes: None,
      skip_meta: Some(DEFAULT_SKIP_META.to_string()),
      keep_meta: false,
    }
  }
}

impl CodecConfig {
  /// Sets the key splitting policy.
  #[must_use]
  pub fn with_keys(mut self, keys: KeySplitter) -> Self {
    self.keys = keys;
    self
  }

  /// Restricts samples to the given field names.
  #[must_use]
  pub fn with_suffixes<I, S>(mut self, suffixes: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.suffixes = Some(suffixes.into_iter().map(Into::into).collect());
    self
  }

  /// Enables or disables lower-casing of field names.
  #[must_use]
  pub fn with_lowercase(mut self, lowercase: bool) -> Self {
    self.lowercase = lowercase;
    self
  }

  /// Keeps meta fields on read.
  #[must_use]
  pub fn with_keep_meta(mut self, keep_meta: bool) -> Self {
    self.keep_meta = keep_meta;
    self
  }
}

fn compile(pattern: &str) -> Result<Regex, ValidationError> {
  Regex::new(pattern).map_err(|source| ValidationError::InvalidPattern {
    pattern: pattern.to_string(),
    source,
  })
}

/// Single-pass grouping state machine.
///
/// Consecutive entries sharing a key become one sample. A key that reappears after a
/// different key starts a new sample.
#[derive(Debug)]
pub struct Grouper {
  splitter: Regex,
  skip_meta: Option<Regex>,
  lowercase: bool,
  suffixes: Option<BTreeSet<String>>,
  keep_meta: bool,
  current: Option<Sample>,
}

impl Grouper {
  /// Compiles the configured patterns.
  pub fn new(config: &CodecConfig) -> Result<Self, ValidationError> {
    let skip_meta = match &config.skip_meta {
      Some(pattern) => Some(compile(&format!("^(?:{pattern})"))?),
      None => None,
    };
    Ok(Self {
      splitter: compile(config.keys.pattern())?,
      skip_meta,
      lowercase: config.lowercase,
      suffixes: config.suffixes.clone(),
      keep_meta: config.keep_meta,
      current: None,
    })
  }

  fn skipped(&self, name: &str) -> bool {
    let top_level_meta =
      !name.contains('/') && name.len() >= 4 && name.starts_with("__") && name.ends_with("__");
    top_level_meta
      || self
        .skip_meta
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(name))
  }

  fn wanted(&self, field: &str) -> bool {
    field != KEY_FIELD
      && (self.keep_meta || !is_meta(field))
      && self
        .suffixes
        .as_ref()
        .is_none_or(|suffixes| suffixes.contains(field))
  }

  /// Feeds one entry; returns the previous sample once its key run has ended.
  pub fn push(&mut self, name: &str, data: Bytes) -> Option<Sample> {
    if self.skipped(name) {
      return None;
    }
    let captures = self.splitter.captures(name)?;
    let (prefix, field) = (captures.get(1)?.as_str(), captures.get(2)?.as_str());
    let field = if self.lowercase {
      field.to_lowercase()
    } else {
      field.to_string()
    };
    let wanted = self.wanted(&field);

    if let Some(current) = self.current.as_mut() {
      if current.key() == prefix {
        if wanted {
          current.insert(field, Value::Bytes(data)).ok();
        }
        return None;
      }
    }

    let finished = self.current.take();
    self.current = Sample::new(prefix).ok();
    if let (Some(current), true) = (self.current.as_mut(), wanted) {
      current.insert(field, Value::Bytes(data)).ok();
    }
    finished
  }

  /// Ends the input, returning the sample still being assembled.
  pub fn finish(&mut self) -> Option<Sample> {
    self.current.take()
  }
}

/// Groups an in-memory entry list.
pub fn group_by_keys<I, N>(entries: I, config: &CodecConfig) -> Result<Vec<Sample>, ValidationError>
where
  I: IntoIterator<Item = (N, Bytes)>,
  N: AsRef<str>,
{
  let mut grouper = Grouper::new(config)?;
  let mut samples: Vec<Sample> = entries
    .into_iter()
    .filter_map(|(name, data)| grouper.push(name.as_ref(), data))
    .collect();
  samples.extend(grouper.finish());
  Ok(samples)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn entries(list: &[(&'static str, &'static str)]) -> Vec<(&'static str, Bytes)> {
    list
      .iter()
      .map(|(name, data)| (*name, Bytes::from_static(data.as_bytes())))
      .collect()
  }

  fn field<'a>(sample: &'a Sample, name: &str) -> Option<&'a [u8]> {
    sample.get(name).and_then(Value::as_bytes)
  }

  #[test]
  fn test_consecutive_entries_group() {
    let samples = group_by_keys(
      entries(&[("a.txt", "1"), ("a.json", "2"), ("b.txt", "3")]),
      &CodecConfig::default(),
    )
    .unwrap();

    assert_eq!(samples.len(), 2);
    assert_eq!(samples[0].key(), "a");
    assert_eq!(field(&samples[0], "txt"), Some(&b"1"[..]));
    assert_eq!(field(&samples[0], "json"), Some(&b"2"[..]));
    assert_eq!(samples[1].key(), "b");
    assert_eq!(samples[1].len(), 1);
  }

  #[test]
  fn test_non_contiguous_keys_split() {
    let samples = group_by_keys(
      entries(&[("a.txt", "1"), ("b.txt", "2"), ("a.json", "3")]),
      &CodecConfig::default(),
    )
    .unwrap();
    let keys: Vec<&str> = samples.iter().map(Sample::key).collect();
    assert_eq!(keys, vec!["a", "b", "a"]);
  }

  #[test]
  fn test_meta_entries_and_unsplittable_names_are_dropped() {
    let samples = group_by_keys(
      entries(&[
        ("__index__", "x"),
        ("__meta__/info.json", "x"),
        ("README", "x"),
        ("a.txt", "1"),
        ("a._private", "2"),
      ]),
      &CodecConfig::default(),
    )
    .unwrap();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].key(), "a");
    assert!(!samples[0].contains("_private"));

    let kept = group_by_keys(
      entries(&[("a.txt", "1"), ("a._private", "2")]),
      &CodecConfig::default().with_keep_meta(true),
    )
    .unwrap();
    assert!(kept[0].contains("_private"));
  }

  #[test]
  fn test_lowercase_and_suffix_filter() {
    let config = CodecConfig::default().with_suffixes(["jpg"]);
    let samples = group_by_keys(
      entries(&[("a.JPG", "img"), ("a.txt", "t"), ("b.txt", "t")]),
      &config,
    )
    .unwrap();

    assert_eq!(samples.len(), 2);
    assert_eq!(field(&samples[0], "jpg"), Some(&b"img"[..]));
    assert!(!samples[0].contains("txt"));
    assert!(samples[1].is_empty());

    let raw = group_by_keys(
      entries(&[("a.JPG", "img")]),
      &CodecConfig::default().with_lowercase(false),
    )
    .unwrap();
    assert!(raw[0].contains("JPG"));
  }

  #[test]
  fn test_dir_plus_file_grouping() {
    let config = CodecConfig::default().with_keys(KeySplitter::DirPlusFile);
    let samples = group_by_keys(
      entries(&[("s1/img.png", "p"), ("s1/label", "3"), ("s2/img.png", "q")]),
      &config,
    )
    .unwrap();
    assert_eq!(samples.len(), 2);
    assert_eq!(field(&samples[0], "label"), Some(&b"3"[..]));
    assert_eq!(samples[1].key(), "s2");
  }

  #[test]
  fn test_invalid_skip_pattern() {
    let config = CodecConfig {
      skip_meta: Some("(".to_string()),
      ..CodecConfig::default()
    };
    assert!(matches!(
      Grouper::new(&config),
      Err(ValidationError::InvalidPattern { .. })
    ));
  }
}
