//! # Producer Trait
//!
//! Producers start a pipeline. In shardweave they are the places samples come from:
//! shard archives ([`crate::shards::ShardProducer`]) and message channels
//! ([`crate::channel::ChannelProducer`]).

use crate::Sample;
use crate::error::{ComponentInfo, ErrorAction, ErrorContext, ErrorStrategy, StreamError};
use crate::output::Output;

/// Configuration for a producer component.
#[derive(Debug)]
pub struct ProducerConfig<T = Sample> {
  /// The error handling strategy to use when producing items.
  pub error_strategy: ErrorStrategy<T>,
  /// Optional name for identifying this producer in logs.
  pub name: Option<String>,
}

impl<T> Clone for ProducerConfig<T> {
  fn clone(&self) -> Self {
    Self {
      error_strategy: self.error_strategy.clone(),
      name: self.name.clone(),
    }
  }
}

impl<T> Default for ProducerConfig<T> {
  fn default() -> Self {
    Self {
      error_strategy: ErrorStrategy::Stop,
      name: None,
    }
  }
}

impl<T> ProducerConfig<T> {
  /// Sets the error handling strategy for this producer configuration.
  #[must_use]
  pub fn with_error_strategy(mut self, strategy: ErrorStrategy<T>) -> Self {
    self.error_strategy = strategy;
    self
  }

  /// Sets the name for this producer configuration.
  #[must_use]
  pub fn with_name(mut self, name: String) -> Self {
    self.name = Some(name);
    self
  }

  /// Returns the current error handling strategy.
  pub fn error_strategy(&self) -> ErrorStrategy<T> {
    self.error_strategy.clone()
  }

  /// Returns the current name, if set.
  pub fn name(&self) -> Option<String> {
    self.name.clone()
  }
}

/// Trait for components that produce sample streams.
///
/// The returned stream is lazy: nothing is opened or read until it is polled, and it
/// cannot be restarted once exhausted.
pub trait Producer: Output {
  /// Produces the stream of items.
  fn produce(&mut self) -> Self::OutputStream;

  /// Creates a copy of this producer with the given configuration.
  #[must_use]
  fn with_config(&self, config: ProducerConfig) -> Self
  where
    Self: Sized + Clone,
  {
    let mut this = self.clone();
    this.set_config(config);
    this
  }

  /// Sets the configuration for this producer.
  fn set_config(&mut self, config: ProducerConfig) {
    self.set_config_impl(config);
  }

  /// Returns a reference to the producer's configuration.
  fn config(&self) -> &ProducerConfig {
    self.get_config_impl()
  }

  /// Returns a mutable reference to the producer's configuration.
  fn config_mut(&mut self) -> &mut ProducerConfig {
    self.get_config_mut_impl()
  }

  /// Sets the name for this producer.
  #[must_use]
  fn with_name(mut self, name: String) -> Self
  where
    Self: Sized,
  {
    self.config_mut().name = Some(name);
    self
  }

  /// Resolves the `ErrorAction` for an error under the configured strategy.
  fn handle_error(&self, error: &StreamError<Sample>) -> ErrorAction {
    self.config().error_strategy.action(error)
  }

  /// Creates an error context for error reporting.
  fn create_error_context(&self, item: Option<Sample>) -> ErrorContext<Sample> {
    let info = self.component_info();
    ErrorContext {
      timestamp: chrono::Utc::now(),
      item,
      component_name: info.name,
      component_type: info.type_name,
    }
  }

  /// Returns information about the component for error reporting.
  fn component_info(&self) -> ComponentInfo {
    ComponentInfo {
      name: self
        .config()
        .name()
        .unwrap_or_else(|| "producer".to_string()),
      type_name: std::any::type_name::<Self>().to_string(),
    }
  }

  /// Stores the configuration.
  fn set_config_impl(&mut self, config: ProducerConfig);

  /// Returns the stored configuration.
  fn get_config_impl(&self) -> &ProducerConfig;

  /// Returns the stored configuration mutably.
  fn get_config_mut_impl(&mut self) -> &mut ProducerConfig;
}
