//! Output trait for components that produce sample streams.
//!
//! The [`Output`] trait is implemented by producers and transformers. It names the item
//! type a component emits and the concrete stream type it returns, so stages can only
//! be chained when their item types agree.
//!
//! # Quick Start
//!
//! ```rust
//! use shardweave::output::Output;
//! use shardweave::{SampleResult, SampleStream};
//!
//! struct MyProducer;
//!
//! impl Output for MyProducer {
//!   type Output = SampleResult;
//!   type OutputStream = SampleStream;
//! }
//! ```

// Import for rustdoc links
#[allow(unused_imports)]
use crate::input::Input;

use futures::Stream;

/// Trait for components that can produce output streams.
pub trait Output
where
  Self::Output: Send + 'static,
{
  /// The type of items produced by this component.
  type Output;
  /// The output stream type that yields items of type `Self::Output`.
  type OutputStream: Stream<Item = Self::Output> + Send + 'static;
}
