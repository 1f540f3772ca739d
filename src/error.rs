//! # Error Handling
//!
//! Error types for shardweave pipelines, plus the strategy machinery components use
//! to decide what happens when one of their inputs fails.
//!
//! ## Overview
//!
//! - **Typed errors**: [`StreamOpenError`], [`ValidationError`], [`ChannelConfigError`],
//!   [`ChannelError`] and [`ShardMissingError`], all wrapped by the crate [`Error`].
//! - **Error Actions**: Stop or Skip when a component hits a failure
//! - **Error Strategies**: Stop (default), Skip, or a custom handler
//! - **Rich Error Context**: timestamp, component info and the item being processed
//!
//! ## Error Strategies
//!
//! - **Stop**: propagate the failure and end the stream (default)
//! - **Skip**: log the failure and continue with the next unit of work
//! - **Custom**: user-defined handler deciding per error
//!
//! Nothing in the core retries. A shard producer configured with `Skip` is what the
//! dataset tooling calls `allow_missing`.

use crate::channel::SocketKind;
use std::error::Error as StdError;
use std::fmt;
use std::process::ExitStatus;
use std::sync::Arc;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failure to obtain a byte stream for a locator.
#[derive(Debug, Error)]
pub enum StreamOpenError {
  /// The locator names a scheme with no registered command template.
  #[error("no handler registered for scheme '{scheme}' (locator '{locator}')")]
  MissingHandler {
    /// Scheme that has no handler.
    scheme: String,
    /// Locator that was being opened.
    locator: String,
  },
  /// `pipe:` locators were disabled in the opener configuration.
  #[error("pipe locators are disabled (locator '{locator}')")]
  PipeDisabled {
    /// Locator that was being opened.
    locator: String,
  },
  /// A command template does not contain exactly one `{}` placeholder.
  #[error("template for scheme '{scheme}' must contain exactly one '{{}}' placeholder: '{template}'")]
  BadTemplate {
    /// Scheme the template was registered for.
    scheme: String,
    /// Offending template.
    template: String,
  },
  /// Unknown open mode string.
  #[error("invalid open mode '{0}' (expected r, w, rb or wb)")]
  BadMode(String),
  /// A local file or standard stream could not be opened.
  #[error("failed to open '{locator}': {source}")]
  Io {
    /// Locator that was being opened.
    locator: String,
    /// Underlying I/O error.
    #[source]
    source: std::io::Error,
  },
  /// The helper command could not be started.
  #[error("failed to spawn '{command}': {source}")]
  Spawn {
    /// Shell command line.
    command: String,
    /// Underlying I/O error.
    #[source]
    source: std::io::Error,
  },
  /// The helper command exited unsuccessfully.
  #[error("command '{command}' exited with {status}")]
  CommandFailed {
    /// Shell command line.
    command: String,
    /// Exit status reported by the process.
    status: ExitStatus,
  },
  /// Waiting on the helper command failed.
  #[error("failed to reap '{command}': {source}")]
  Reap {
    /// Shell command line.
    command: String,
    /// Underlying I/O error.
    #[source]
    source: std::io::Error,
  },
}

/// Caller-side mistakes: malformed samples or malformed configuration values.
#[derive(Debug, Error)]
pub enum ValidationError {
  /// A sample key was empty or missing.
  #[error("sample must contain a non-empty __key__")]
  MissingKey,
  /// A non-meta field holds a value that has no byte representation.
  #[error("field '{field}' of sample '{key}' does not map to bytes ({kind})")]
  NotBytes {
    /// Sample key.
    key: String,
    /// Field name.
    field: String,
    /// Kind of value found instead.
    kind: &'static str,
  },
  /// Attempt to set a reserved field through the generic field API.
  #[error("field name '{0}' is reserved")]
  ReservedField(String),
  /// The `#start,end` fragment of a shard locator could not be parsed.
  #[error("invalid range fragment '{0}'")]
  InvalidRange(String),
  /// A configured regular expression failed to compile.
  #[error("invalid pattern '{pattern}': {source}")]
  InvalidPattern {
    /// The pattern text.
    pattern: String,
    /// Compilation error.
    #[source]
    source: regex::Error,
  },
}

/// Messaging setup errors, raised before any network call.
#[derive(Debug, Error)]
pub enum ChannelConfigError {
  /// The URL scheme is not one of the eight socket topologies.
  #[error("unknown messaging scheme '{0}'")]
  UnknownScheme(String),
  /// The `+transport` suffix is not supported.
  #[error("unknown transport '{0}'")]
  UnknownTransport(String),
  /// The URL could not be split into scheme and location.
  #[error("malformed messaging url '{0}'")]
  MalformedUrl(String),
  /// Fan-out policy name not recognised.
  #[error("unknown fan-out policy '{0}'")]
  UnknownPolicy(String),
  /// A connection or distributor was given no URLs.
  #[error("no messaging urls given")]
  NoUrls,
  /// URLs of one connection resolve to different socket topologies.
  #[error("urls '{first}' and '{other}' use different socket topologies")]
  MixedTopology {
    /// First URL of the list.
    first: String,
    /// URL that disagrees with it.
    other: String,
  },
}

/// Runtime socket errors.
#[derive(Debug, Error)]
pub enum ChannelError {
  /// Binding a listener failed.
  #[error("failed to bind {location}: {source}")]
  Bind {
    /// Network location.
    location: String,
    /// Underlying I/O error.
    #[source]
    source: std::io::Error,
  },
  /// The socket kind does not support the operation.
  #[error("{kind} socket does not support {operation}")]
  Unsupported {
    /// Socket kind.
    kind: SocketKind,
    /// Attempted operation.
    operation: &'static str,
  },
  /// The socket has been closed.
  #[error("socket closed")]
  Closed,
  /// Encoding a frame failed.
  #[error("failed to encode frame: {0}")]
  Encode(#[from] rmp_serde::encode::Error),
  /// A received frame was not a valid sample map.
  #[error("failed to decode frame: {0}")]
  Decode(String),
  /// Timed out waiting for peers.
  #[error("timed out waiting for {expected} peer(s), have {connected}")]
  PeerTimeout {
    /// Number of peers requested.
    expected: usize,
    /// Number of peers attached when the wait ended.
    connected: usize,
  },
}

/// A shard that could not be opened or read to completion.
#[derive(Debug, Error)]
#[error("shard '{locator}' unavailable: {source}")]
pub struct ShardMissingError {
  /// Locator of the failed shard.
  pub locator: String,
  /// What went wrong.
  #[source]
  pub source: Box<Error>,
}

/// Crate-wide error.
#[derive(Debug, Error)]
pub enum Error {
  /// See [`StreamOpenError`].
  #[error(transparent)]
  Open(#[from] StreamOpenError),
  /// See [`ValidationError`].
  #[error(transparent)]
  Validation(#[from] ValidationError),
  /// See [`ChannelConfigError`].
  #[error(transparent)]
  ChannelConfig(#[from] ChannelConfigError),
  /// See [`ChannelError`].
  #[error(transparent)]
  Channel(#[from] ChannelError),
  /// See [`ShardMissingError`].
  #[error(transparent)]
  ShardMissing(#[from] ShardMissingError),
  /// Reading archive entries failed.
  #[error("archive read failed for '{locator}': {source}")]
  Archive {
    /// Locator being read.
    locator: String,
    /// Underlying I/O error.
    #[source]
    source: std::io::Error,
  },
  /// Writing archive bytes failed.
  #[error("write to '{locator}' failed during {operation}: {source}")]
  Write {
    /// Locator being written.
    locator: String,
    /// Operation that failed.
    operation: &'static str,
    /// Underlying I/O error.
    #[source]
    source: std::io::Error,
  },
  /// Loading settings failed.
  #[error("invalid settings: {0}")]
  Settings(String),
  /// A component failure that did not carry a crate error.
  #[error("{0}")]
  Component(String),
}

/// Action to take when an error occurs in a pipeline component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
  /// Stop processing and propagate the error.
  Stop,
  /// Log the error and continue with the next unit of work.
  Skip,
}

type CustomErrorHandler<T> = Arc<dyn Fn(&StreamError<T>) -> ErrorAction + Send + Sync>;

/// Strategy for handling errors in pipeline components.
///
/// # Example
///
/// ```rust
/// use shardweave::error::{ErrorAction, ErrorStrategy};
/// use shardweave::Sample;
///
/// let strategy = ErrorStrategy::<Sample>::new_custom(|error| {
///   if error.component.name == "optional-shards" {
///     ErrorAction::Skip
///   } else {
///     ErrorAction::Stop
///   }
/// });
/// # let _ = strategy;
/// ```
pub enum ErrorStrategy<T> {
  /// Stop processing immediately when an error occurs.
  Stop,
  /// Skip the failed unit and continue.
  Skip,
  /// Custom error handling logic.
  Custom(CustomErrorHandler<T>),
}

impl<T> Clone for ErrorStrategy<T> {
  fn clone(&self) -> Self {
    match self {
      ErrorStrategy::Stop => ErrorStrategy::Stop,
      ErrorStrategy::Skip => ErrorStrategy::Skip,
      ErrorStrategy::Custom(handler) => ErrorStrategy::Custom(handler.clone()),
    }
  }
}

impl<T> fmt::Debug for ErrorStrategy<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ErrorStrategy::Stop => write!(f, "ErrorStrategy::Stop"),
      ErrorStrategy::Skip => write!(f, "ErrorStrategy::Skip"),
      ErrorStrategy::Custom(_) => write!(f, "ErrorStrategy::Custom"),
    }
  }
}

impl<T> PartialEq for ErrorStrategy<T> {
  fn eq(&self, other: &Self) -> bool {
    matches!(
      (self, other),
      (ErrorStrategy::Stop, ErrorStrategy::Stop)
        | (ErrorStrategy::Skip, ErrorStrategy::Skip)
        | (ErrorStrategy::Custom(_), ErrorStrategy::Custom(_))
    )
  }
}

impl<T> ErrorStrategy<T> {
  /// Creates a custom error handling strategy.
  pub fn new_custom<F>(f: F) -> Self
  where
    F: Fn(&StreamError<T>) -> ErrorAction + Send + Sync + 'static,
  {
    Self::Custom(Arc::new(f))
  }

  /// Resolves the action for `error` under this strategy.
  pub fn action(&self, error: &StreamError<T>) -> ErrorAction {
    match self {
      ErrorStrategy::Stop => ErrorAction::Stop,
      ErrorStrategy::Skip => ErrorAction::Skip,
      ErrorStrategy::Custom(handler) => handler(error),
    }
  }
}

/// Error that occurred inside a component, with the context it happened in.
#[derive(Debug)]
pub struct StreamError<T> {
  /// The original error that occurred.
  pub source: Box<dyn StdError + Send + Sync>,
  /// When and on what item it happened.
  pub context: ErrorContext<T>,
  /// The component that encountered the error.
  pub component: ComponentInfo,
}

impl<T> StreamError<T> {
  /// Creates a new `StreamError`.
  pub fn new(
    source: Box<dyn StdError + Send + Sync>,
    context: ErrorContext<T>,
    component: ComponentInfo,
  ) -> Self {
    Self {
      source,
      context,
      component,
    }
  }

  /// Converts the report back into a crate [`Error`], recovering the typed error when
  /// the source was one.
  pub fn into_error(self) -> Error {
    match self.source.downcast::<Error>() {
      Ok(error) => *error,
      Err(source) => match source.downcast::<ShardMissingError>() {
        Ok(missing) => Error::ShardMissing(*missing),
        Err(other) => Error::Component(format!("{}: {}", self.component.name, other)),
      },
    }
  }
}

impl<T> fmt::Display for StreamError<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "Error in {} ({}): {}",
      self.component.name, self.component.type_name, self.source
    )
  }
}

impl<T: fmt::Debug> StdError for StreamError<T> {
  fn source(&self) -> Option<&(dyn StdError + 'static)> {
    Some(self.source.as_ref())
  }
}

/// Context information about when and where an error occurred.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorContext<T> {
  /// The timestamp when the error occurred.
  pub timestamp: chrono::DateTime<chrono::Utc>,
  /// The item being processed when the error occurred, if available.
  pub item: Option<T>,
  /// The name of the component that encountered the error.
  pub component_name: String,
  /// The type of the component that encountered the error.
  pub component_type: String,
}

impl<T> Default for ErrorContext<T> {
  fn default() -> Self {
    Self {
      timestamp: chrono::Utc::now(),
      item: None,
      component_name: "default".to_string(),
      component_type: "default".to_string(),
    }
  }
}

/// Information about a pipeline component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentInfo {
  /// The name of the component.
  pub name: String,
  /// The type name of the component.
  pub type_name: String,
}

impl Default for ComponentInfo {
  fn default() -> Self {
    Self {
      name: "default".to_string(),
      type_name: "default".to_string(),
    }
  }
}

impl ComponentInfo {
  /// Creates a new `ComponentInfo`.
  pub fn new(name: String, type_name: String) -> Self {
    Self { name, type_name }
  }
}
