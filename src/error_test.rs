//! # Error Handling Test Suite
//!
//! Covers error strategies and actions, the `StreamError` report and its conversion
//! back into the crate [`Error`](crate::error::Error), and the display of the typed
//! errors that reach users.

use crate::Sample;
use crate::channel::SocketKind;
use crate::error::{
  ChannelConfigError, ChannelError, ComponentInfo, Error, ErrorAction, ErrorContext,
  ErrorStrategy, ShardMissingError, StreamError, StreamOpenError, ValidationError,
};
use std::fmt;

fn report(source: Box<dyn std::error::Error + Send + Sync>) -> StreamError<Sample> {
  StreamError::new(
    source,
    ErrorContext::default(),
    ComponentInfo::new("shards".to_string(), "ShardProducer".to_string()),
  )
}

#[derive(Debug)]
struct Opaque;

impl fmt::Display for Opaque {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "opaque failure")
  }
}

impl std::error::Error for Opaque {}

#[test]
fn test_builtin_strategies_resolve_actions() {
  let error = report(Box::new(Opaque));
  assert_eq!(ErrorStrategy::<Sample>::Stop.action(&error), ErrorAction::Stop);
  assert_eq!(ErrorStrategy::<Sample>::Skip.action(&error), ErrorAction::Skip);
}

#[test]
fn test_custom_strategy_sees_component() {
  let strategy = ErrorStrategy::<Sample>::new_custom(|error| {
    if error.component.name == "shards" {
      ErrorAction::Skip
    } else {
      ErrorAction::Stop
    }
  });
  assert_eq!(strategy.action(&report(Box::new(Opaque))), ErrorAction::Skip);

  let other = StreamError::<Sample>::new(
    Box::new(Opaque),
    ErrorContext::default(),
    ComponentInfo::new("writer".to_string(), "TarWriter".to_string()),
  );
  assert_eq!(strategy.action(&other), ErrorAction::Stop);
}

#[test]
fn test_strategy_clone_and_equality() {
  let custom = ErrorStrategy::<Sample>::new_custom(|_| ErrorAction::Skip);
  assert_eq!(custom.clone(), custom);
  assert_ne!(ErrorStrategy::<Sample>::Stop, ErrorStrategy::Skip);
  assert_eq!(format!("{:?}", custom), "ErrorStrategy::Custom");
}

#[test]
fn test_into_error_recovers_typed_errors() {
  let error = report(Box::new(Error::Validation(ValidationError::MissingKey)));
  assert!(matches!(
    error.into_error(),
    Error::Validation(ValidationError::MissingKey)
  ));

  let missing = ShardMissingError {
    locator: "a.tar".to_string(),
    source: Box::new(Error::Channel(ChannelError::Closed)),
  };
  assert!(matches!(
    report(Box::new(missing)).into_error(),
    Error::ShardMissing(ShardMissingError { ref locator, .. }) if locator == "a.tar"
  ));

  assert!(matches!(
    report(Box::new(Opaque)).into_error(),
    Error::Component(ref message) if message == "shards: opaque failure"
  ));
}

#[test]
fn test_stream_error_display_names_component() {
  let error = report(Box::new(Opaque));
  assert_eq!(
    error.to_string(),
    "Error in shards (ShardProducer): opaque failure"
  );
  assert!(std::error::Error::source(&error).is_some());
}

#[test]
fn test_error_context_default() {
  let context = ErrorContext::<Sample>::default();
  assert!(context.item.is_none());
  assert_eq!(context.component_name, "default");
  assert_eq!(ComponentInfo::default().type_name, "default");
}

#[test]
fn test_typed_error_messages() {
  let open = StreamOpenError::MissingHandler {
    scheme: "ftp".to_string(),
    locator: "ftp://host/a.tar".to_string(),
  };
  assert_eq!(
    Error::from(open).to_string(),
    "no handler registered for scheme 'ftp' (locator 'ftp://host/a.tar')"
  );
  assert_eq!(
    Error::from(ChannelConfigError::UnknownScheme("zfoo".to_string())).to_string(),
    "unknown messaging scheme 'zfoo'"
  );
  assert_eq!(
    ChannelError::Unsupported {
      kind: SocketKind::Pull,
      operation: "send",
    }
    .to_string(),
    "pull socket does not support send"
  );
  assert_eq!(
    ValidationError::NotBytes {
      key: "k".to_string(),
      field: "cls".to_string(),
      kind: "int",
    }
    .to_string(),
    "field 'cls' of sample 'k' does not map to bytes (int)"
  );
}
