//! Splitting archive entry names into a sample key and a field name.

use serde::{Deserialize, Serialize};

/// How an entry name is split into `(key, field)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySplitter {
  /// `dir/base.ext.gz` → (`dir/base`, `ext.gz`): the key ends at the first dot of the
  /// last path component.
  #[default]
  BasePlusExt,
  /// `dir/file` → (`dir`, `file`): every file in a directory belongs to one sample.
  DirPlusFile,
}

impl KeySplitter {
  /// The anchored pattern whose two groups are the key and the field.
  pub fn pattern(self) -> &'static str {
    match self {
      KeySplitter::BasePlusExt => r"^((?:.*/|)[^.]+)[.]([^/]*)$",
      KeySplitter::DirPlusFile => r"^(.*)/([^/]*)$",
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use regex::Regex;

  fn split(splitter: KeySplitter, name: &str) -> Option<(String, String)> {
    let re = Regex::new(splitter.pattern()).unwrap();
    re.captures(name)
      .map(|caps| (caps[1].to_string(), caps[2].to_string()))
  }

  #[test]
  fn test_base_plus_ext() {
    let s = KeySplitter::BasePlusExt;
    assert_eq!(split(s, "a.txt"), Some(("a".into(), "txt".into())));
    assert_eq!(split(s, "dir/x.seg.png"), Some(("dir/x".into(), "seg.png".into())));
    assert_eq!(split(s, "v1.0/img.jpg"), Some(("v1.0/img".into(), "jpg".into())));
    assert_eq!(split(s, "README"), None);
    assert_eq!(split(s, "a.b/c"), None);
  }

  #[test]
  fn test_dir_plus_file() {
    let s = KeySplitter::DirPlusFile;
    assert_eq!(split(s, "s1/img.png"), Some(("s1".into(), "img.png".into())));
    assert_eq!(split(s, "a/b/c"), Some(("a/b".into(), "c".into())));
    assert_eq!(split(s, "flat.txt"), None);
  }
}
