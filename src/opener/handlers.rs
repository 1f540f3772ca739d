//! Scheme → command template registry.
//!
//! Locators with a scheme other than `file:` and `pipe:` are opened by running a
//! helper command. Every registered template carries exactly one `{}` placeholder,
//! which is replaced by the full locator text.
//!
//! The locator is substituted verbatim into a shell command line. Locators that come
//! from untrusted input can therefore inject shell syntax; restrict the registered
//! schemes accordingly.

use crate::error::StreamOpenError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Read and write command templates for one scheme.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandTemplate {
  /// Command whose stdout yields the resource bytes.
  pub read: Option<String>,
  /// Command whose stdin receives the resource bytes.
  pub write: Option<String>,
}

impl CommandTemplate {
  /// Template pair with both directions set.
  pub fn new(read: impl Into<String>, write: impl Into<String>) -> Self {
    Self {
      read: Some(read.into()),
      write: Some(write.into()),
    }
  }

  /// Template pair that can only read.
  pub fn read_only(read: impl Into<String>) -> Self {
    Self {
      read: Some(read.into()),
      write: None,
    }
  }
}

/// Explicit allow-list of schemes that may be opened through helper commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerRegistry {
  templates: BTreeMap<String, CommandTemplate>,
}

impl Default for HandlerRegistry {
  /// Registry with handlers for `http`, `https`, `gs` and `s3`.
  fn default() -> Self {
    let mut templates = BTreeMap::new();
    let curl = CommandTemplate::read_only("curl --fail --silent --location {}");
    templates.insert("http".to_string(), curl.clone());
    templates.insert("https".to_string(), curl);
    templates.insert(
      "gs".to_string(),
      CommandTemplate::new("gsutil cat {}", "gsutil cp - {}"),
    );
    templates.insert(
      "s3".to_string(),
      CommandTemplate::new("aws s3 cp {} -", "aws s3 cp - {}"),
    );
    Self { templates }
  }
}

fn check_template(scheme: &str, template: &str) -> Result<(), StreamOpenError> {
  if template.matches("{}").count() == 1 {
    Ok(())
  } else {
    Err(StreamOpenError::BadTemplate {
      scheme: scheme.to_string(),
      template: template.to_string(),
    })
  }
}

impl HandlerRegistry {
  /// Registry with no schemes at all.
  pub fn empty() -> Self {
    Self {
      templates: BTreeMap::new(),
    }
  }

  /// Builds a registry from the given templates, validating each one.
  pub fn from_templates(
    templates: impl IntoIterator<Item = (String, CommandTemplate)>,
  ) -> Result<Self, StreamOpenError> {
    let mut registry = Self::empty();
    for (scheme, template) in templates {
      registry.register(scheme, template)?;
    }
    Ok(registry)
  }

  /// Adds or replaces the templates for `scheme`.
  pub fn register(
    &mut self,
    scheme: impl Into<String>,
    template: CommandTemplate,
  ) -> Result<(), StreamOpenError> {
    let scheme = scheme.into().to_ascii_lowercase();
    for text in template.read.iter().chain(template.write.iter()) {
      check_template(&scheme, text)?;
    }
    self.templates.insert(scheme, template);
    Ok(())
  }

  /// Removes a scheme from the allow-list.
  pub fn unregister(&mut self, scheme: &str) -> Option<CommandTemplate> {
    self.templates.remove(&scheme.to_ascii_lowercase())
  }

  /// Registered schemes, sorted.
  pub fn schemes(&self) -> impl Iterator<Item = &str> {
    self.templates.keys().map(String::as_str)
  }

  /// Templates registered for `scheme`.
  pub fn get(&self, scheme: &str) -> Option<&CommandTemplate> {
    self.templates.get(&scheme.to_ascii_lowercase())
  }

  /// Renders the command line that opens `locator` in the given direction.
  pub fn command(&self, scheme: &str, locator: &str, write: bool) -> Result<String, StreamOpenError> {
    let template = self.get(scheme).and_then(|template| {
      if write {
        template.write.as_deref()
      } else {
        template.read.as_deref()
      }
    });
    match template {
      Some(template) => Ok(template.replacen("{}", locator, 1)),
      None => Err(StreamOpenError::MissingHandler {
        scheme: scheme.to_string(),
        locator: locator.to_string(),
      }),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_handlers() {
    let registry = HandlerRegistry::default();
    let schemes: Vec<&str> = registry.schemes().collect();
    assert_eq!(schemes, vec!["gs", "http", "https", "s3"]);
    assert_eq!(
      registry.command("s3", "s3://bucket/a.tar", false).unwrap(),
      "aws s3 cp s3://bucket/a.tar -"
    );
    assert_eq!(
      registry.command("gs", "gs://bucket/a.tar", true).unwrap(),
      "gsutil cp - gs://bucket/a.tar"
    );
  }

  #[test]
  fn test_missing_handler_names_scheme() {
    let registry = HandlerRegistry::default();
    let err = registry.command("ftp", "ftp://host/a.tar", false).unwrap_err();
    assert!(matches!(
      &err,
      StreamOpenError::MissingHandler { scheme, .. } if scheme == "ftp"
    ));
    // http has no write template
    assert!(registry.command("http", "http://host/a.tar", true).is_err());
  }

  #[test]
  fn test_template_needs_one_placeholder() {
    let mut registry = HandlerRegistry::empty();
    assert!(matches!(
      registry.register("x", CommandTemplate::read_only("cat")),
      Err(StreamOpenError::BadTemplate { .. })
    ));
    assert!(matches!(
      registry.register("x", CommandTemplate::read_only("cat {} {}")),
      Err(StreamOpenError::BadTemplate { .. })
    ));
    registry
      .register("X", CommandTemplate::read_only("cat {}"))
      .unwrap();
    assert_eq!(registry.command("x", "x:y", false).unwrap(), "cat x:y");
  }
}
