//! Shell-style brace expansion for shard lists.
//!
//! - `{a,b,c}` alternatives, nestable: `x{a,b{1,2}}`
//! - `{000..099}` integer ranges, zero padded when either bound has a leading zero
//! - `{0..10..2}` ranges with a step, `{5..1}` descending ranges
//! - `{a..e}` character ranges
//! - `\{` and friends escape the next character
//!
//! A brace group with neither a comma nor a range is kept literally, and so are
//! unbalanced braces.

/// Expands every brace group in `pattern`, leftmost group varying slowest.
pub fn brace_expand(pattern: &str) -> Vec<String> {
  let Some((open, close)) = find_group(pattern) else {
    return vec![unescape(pattern)];
  };
  let prefix = unescape(&pattern[..open]);
  let inner = &pattern[open + 1..close];
  let rest = brace_expand(&pattern[close + 1..]);

  let items = match sequence(inner) {
    Some(items) => items,
    None => {
      let parts = split_top_level(inner);
      if parts.len() > 1 {
        parts.into_iter().flat_map(brace_expand).collect()
      } else {
        brace_expand(inner)
          .into_iter()
          .map(|item| format!("{{{item}}}"))
          .collect()
      }
    }
  };

  let mut out = Vec::with_capacity(items.len() * rest.len());
  for item in &items {
    for tail in &rest {
      out.push(format!("{prefix}{item}{tail}"));
    }
  }
  out
}

/// Byte offsets of the first balanced top-level `{ ... }`.
fn find_group(pattern: &str) -> Option<(usize, usize)> {
  let bytes = pattern.as_bytes();
  let mut i = 0;
  while i < bytes.len() {
    match bytes[i] {
      b'\\' => i += 2,
      b'{' => {
        if let Some(close) = matching_close(bytes, i) {
          return Some((i, close));
        }
        i += 1;
      }
      _ => i += 1,
    }
  }
  None
}

fn matching_close(bytes: &[u8], open: usize) -> Option<usize> {
  let mut depth = 0usize;
  let mut i = open;
  while i < bytes.len() {
    match bytes[i] {
      b'\\' => {
        i += 2;
        continue;
      }
      b'{' => depth += 1,
      b'}' => {
        depth -= 1;
        if depth == 0 {
          return Some(i);
        }
      }
      _ => {}
    }
    i += 1;
  }
  None
}

fn split_top_level(inner: &str) -> Vec<&str> {
  let bytes = inner.as_bytes();
  let mut parts = Vec::new();
  let mut depth = 0usize;
  let mut start = 0;
  let mut i = 0;
  while i < bytes.len() {
    match bytes[i] {
      b'\\' => {
        i += 2;
        continue;
      }
      b'{' => depth += 1,
      b'}' => depth = depth.saturating_sub(1),
      b',' if depth == 0 => {
        parts.push(&inner[start..i]);
        start = i + 1;
      }
      _ => {}
    }
    i += 1;
  }
  parts.push(&inner[start..]);
  parts
}

fn unescape(text: &str) -> String {
  let mut out = String::with_capacity(text.len());
  let mut chars = text.chars();
  while let Some(c) = chars.next() {
    if c == '\\' {
      if let Some(next) = chars.next() {
        out.push(next);
      }
    } else {
      out.push(c);
    }
  }
  out
}

fn parse_step(step: Option<&str>) -> Option<u64> {
  match step {
    None => Some(1),
    Some(text) => {
      let digits = text.strip_prefix('-').unwrap_or(text);
      if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
      }
      let step: u64 = digits.parse().ok()?;
      Some(step.max(1))
    }
  }
}

fn is_int(text: &str) -> bool {
  let digits = text.strip_prefix('-').unwrap_or(text);
  !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

fn has_leading_zero(text: &str) -> bool {
  text != "0" && text != "-0" && (text.starts_with('0') || text.starts_with("-0"))
}

/// Expands `a..b` or `a..b..step`, returning `None` when `inner` is not a range.
///
/// A bound written with a leading zero pads every number to the wider bound's
/// length. The width counts the sign and zeros go after it, so `{-1..001}` gives
/// `-01`, `000` and `001`.
fn sequence(inner: &str) -> Option<Vec<String>> {
  let mut bounds = inner.split("..");
  let left = bounds.next()?;
  let right = bounds.next()?;
  let step = parse_step(bounds.next())?;
  if bounds.next().is_some() {
    return None;
  }

  if is_int(left) && is_int(right) {
    let start: i64 = left.parse().ok()?;
    let end: i64 = right.parse().ok()?;
    let width = if has_leading_zero(left) || has_leading_zero(right) {
      left.len().max(right.len())
    } else {
      0
    };
    return Some(
      stepped(start, end, step)
        .into_iter()
        .map(|n| format!("{n:0width$}"))
        .collect(),
    );
  }

  let (mut l, mut r) = (left.chars(), right.chars());
  match (l.next(), l.next(), r.next(), r.next()) {
    (Some(a), None, Some(b), None) if a.is_ascii_alphabetic() && b.is_ascii_alphabetic() => Some(
      stepped(i64::from(a as u8), i64::from(b as u8), step)
        .into_iter()
        .filter_map(|n| u8::try_from(n).ok().map(|b| char::from(b).to_string()))
        .collect(),
    ),
    _ => None,
  }
}

fn stepped(start: i64, end: i64, step: u64) -> Vec<i64> {
  let step = i64::try_from(step).unwrap_or(i64::MAX);
  let mut out = Vec::new();
  let mut n = start;
  if start <= end {
    while n <= end {
      out.push(n);
      n = match n.checked_add(step) {
        Some(next) => next,
        None => break,
      };
    }
  } else {
    while n >= end {
      out.push(n);
      n = match n.checked_sub(step) {
        Some(next) => next,
        None => break,
      };
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;

  #[test]
  fn test_alternatives_and_products() {
    assert_eq!(brace_expand("a{b,c}d"), vec!["abd", "acd"]);
    assert_eq!(
      brace_expand("{x,y}{1,2}"),
      vec!["x1", "x2", "y1", "y2"]
    );
    assert_eq!(brace_expand("a{b,c{1,2}}"), vec!["ab", "ac1", "ac2"]);
    assert_eq!(brace_expand("{a,}b"), vec!["ab", "b"]);
  }

  #[test]
  fn test_numeric_ranges() {
    assert_eq!(
      brace_expand("shard-{000..003}.tar"),
      vec!["shard-000.tar", "shard-001.tar", "shard-002.tar", "shard-003.tar"]
    );
    assert_eq!(brace_expand("{8..11}"), vec!["8", "9", "10", "11"]);
    assert_eq!(brace_expand("{3..1}"), vec!["3", "2", "1"]);
    assert_eq!(brace_expand("{0..10..5}"), vec!["0", "5", "10"]);
    assert_eq!(brace_expand("{-1..1}"), vec!["-1", "0", "1"]);
  }

  #[test]
  fn test_padding_goes_after_the_sign() {
    assert_eq!(brace_expand("{-1..001}"), vec!["-01", "000", "001"]);
    assert_eq!(brace_expand("{-01..1}"), vec!["-01", "000", "001"]);
    assert_eq!(brace_expand("{-1..01}"), vec!["-1", "00", "01"]);
    assert_eq!(brace_expand("{-10..-08}"), vec!["-10", "-09", "-08"]);
  }

  #[test]
  fn test_character_ranges() {
    assert_eq!(brace_expand("{a..c}"), vec!["a", "b", "c"]);
    assert_eq!(brace_expand("{e..a..2}"), vec!["e", "c", "a"]);
  }

  #[test]
  fn test_literals_and_escapes() {
    assert_eq!(brace_expand("plain.tar"), vec!["plain.tar"]);
    assert_eq!(brace_expand("{abc}"), vec!["{abc}"]);
    assert_eq!(brace_expand("a{b"), vec!["a{b"]);
    assert_eq!(brace_expand(r"\{a,b\}"), vec!["{a,b}"]);
    assert_eq!(brace_expand(r"{a\,b,c}"), vec!["a,b", "c"]);
  }

  proptest! {
    #[test]
    fn padded_ranges_have_one_width(lo in 0u32..500, len in 0u32..200) {
      let hi = lo + len;
      let expanded = brace_expand(&format!("s{{{lo:04}..{hi:04}}}"));
      prop_assert_eq!(expanded.len() as u32, len + 1);
      for (offset, item) in expanded.iter().enumerate() {
        prop_assert_eq!(item, &format!("s{:04}", lo + offset as u32));
      }
    }

    #[test]
    fn alternatives_keep_order(words in proptest::collection::vec("[a-z]{1,6}", 2..8)) {
      let expanded = brace_expand(&format!("<{{{}}}>", words.join(",")));
      let expected: Vec<String> = words.iter().map(|w| format!("<{w}>")).collect();
      prop_assert_eq!(expanded, expected);
    }
  }
}
