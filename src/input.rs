//! Input trait for components that consume sample streams.
//!
//! The [`Input`] trait is implemented by transformers and consumers. Together with
//! [`crate::output::Output`] it lets the pipeline builder check at compile time that
//! the stream handed to a stage is the stream that stage expects.

use futures::Stream;
// Import for rustdoc link
#[allow(unused_imports)]
use crate::output::Output;

/// Trait for components that receive input streams.
pub trait Input
where
  Self::Input: Send + 'static,
{
  /// The type of items consumed by this component.
  type Input;
  /// The input stream type that yields items of type `Self::Input`.
  type InputStream: Stream<Item = Self::Input> + Send + 'static;
}
