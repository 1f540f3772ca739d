//! Shard locators with an optional `#start,end` sample window.

use super::braces::brace_expand;
use crate::error::ValidationError;
use std::fmt;
use std::str::FromStr;

/// Window of global sample indices, `end` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleRange {
  /// First index yielded.
  pub start: u64,
  /// First index not yielded; `None` for no upper bound.
  pub end: Option<u64>,
}

impl Default for SampleRange {
  fn default() -> Self {
    Self::all()
  }
}

impl SampleRange {
  /// Every sample.
  pub fn all() -> Self {
    Self {
      start: 0,
      end: None,
    }
  }

  /// Samples `start..=last`.
  pub fn inclusive(start: u64, last: u64) -> Self {
    Self {
      start,
      end: Some(last.saturating_add(1)),
    }
  }

  /// True if index `index` is inside the window.
  pub fn contains(&self, index: u64) -> bool {
    index >= self.start && self.end.is_none_or(|end| index < end)
  }

  /// True once `seen` samples have been counted and nothing more can be inside.
  pub fn is_done(&self, seen: u64) -> bool {
    self.end.is_some_and(|end| seen >= end)
  }
}

impl FromStr for SampleRange {
  type Err = ValidationError;

  /// Parses `start,last` or a single `index`, both inclusive.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let invalid = || ValidationError::InvalidRange(s.to_string());
    let parse = |text: &str| text.trim().parse::<u64>().map_err(|_| invalid());
    match s.split_once(',') {
      Some((start, last)) => {
        let (start, last) = (parse(start)?, parse(last)?);
        if last < start {
          return Err(invalid());
        }
        Ok(Self::inclusive(start, last))
      }
      None => {
        let index = parse(s)?;
        Ok(Self::inclusive(index, index))
      }
    }
  }
}

impl fmt::Display for SampleRange {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.end {
      Some(end) => write!(f, "{}..{}", self.start, end),
      None => write!(f, "{}..", self.start),
    }
  }
}

/// A shard locator pattern split from its sample window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardSpec {
  /// Locator pattern, possibly with brace groups.
  pub base: String,
  /// Global sample window.
  pub range: SampleRange,
}

impl ShardSpec {
  /// Splits a trailing `#start,end` or `#index` fragment off `url`.
  pub fn parse(url: &str) -> Result<Self, ValidationError> {
    match url.rsplit_once('#') {
      Some((base, fragment)) => Ok(Self {
        base: base.to_string(),
        range: fragment.parse()?,
      }),
      None => Ok(Self {
        base: url.to_string(),
        range: SampleRange::all(),
      }),
    }
  }

  /// Shard locators in order.
  pub fn locators(&self, braceexpand: bool) -> Vec<String> {
    if braceexpand {
      brace_expand(&self.base)
    } else {
      vec![self.base.clone()]
    }
  }
}
