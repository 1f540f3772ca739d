//! # Consumer Trait
//!
//! Consumers end a pipeline: they pull every sample from their input and write it
//! somewhere, e.g. a tar archive or a set of message channels
//! ([`crate::consumers::SinkConsumer`]).
//!
//! Unlike producers and transformers, a consumer reports the outcome of the whole run:
//! `consume` resolves to an error when the input yielded one or the destination failed,
//! after the destination has been released.

use crate::Sample;
use crate::error::{ComponentInfo, ErrorAction, ErrorContext, ErrorStrategy, Result, StreamError};
use crate::input::Input;
use async_trait::async_trait;

/// Configuration for a consumer component.
#[derive(Debug)]
pub struct ConsumerConfig<T = Sample> {
  /// The error handling strategy to use when processing items.
  pub error_strategy: ErrorStrategy<T>,
  /// The name of this consumer component.
  pub name: String,
}

impl<T> Clone for ConsumerConfig<T> {
  fn clone(&self) -> Self {
    Self {
      error_strategy: self.error_strategy.clone(),
      name: self.name.clone(),
    }
  }
}

impl<T> Default for ConsumerConfig<T> {
  fn default() -> Self {
    Self {
      error_strategy: ErrorStrategy::Stop,
      name: String::new(),
    }
  }
}

impl<T> ConsumerConfig<T> {
  /// Sets the error handling strategy for this consumer configuration.
  #[must_use]
  pub fn with_error_strategy(mut self, strategy: ErrorStrategy<T>) -> Self {
    self.error_strategy = strategy;
    self
  }

  /// Sets the name for this consumer configuration.
  #[must_use]
  pub fn with_name(mut self, name: String) -> Self {
    self.name = name;
    self
  }

  /// Returns the current error handling strategy.
  pub fn error_strategy(&self) -> ErrorStrategy<T> {
    self.error_strategy.clone()
  }

  /// Returns the current name.
  pub fn name(&self) -> &str {
    &self.name
  }
}

/// Trait for components that consume streams.
#[async_trait]
pub trait Consumer: Input {
  /// Consumes the stream to completion.
  async fn consume(&mut self, input: Self::InputStream) -> Result<()>;

  /// Sets the configuration for this consumer.
  fn set_config(&mut self, config: ConsumerConfig) {
    self.set_config_impl(config);
  }

  /// Returns a reference to the consumer's configuration.
  fn config(&self) -> &ConsumerConfig {
    self.get_config_impl()
  }

  /// Returns a mutable reference to the consumer's configuration.
  fn config_mut(&mut self) -> &mut ConsumerConfig {
    self.get_config_mut_impl()
  }

  /// Sets the name for this consumer.
  #[must_use]
  fn with_name(mut self, name: String) -> Self
  where
    Self: Sized,
  {
    self.config_mut().name = name;
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
    let name = self.config().name();
    ComponentInfo {
      name: if name.is_empty() {
        "consumer".to_string()
      } else {
        name.to_string()
      },
      type_name: std::any::type_name::<Self>().to_string(),
    }
  }

  /// Stores the configuration.
  fn set_config_impl(&mut self, config: ConsumerConfig);

  /// Returns the stored configuration.
  fn get_config_impl(&self) -> &ConsumerConfig;

  /// Returns the stored configuration mutably.
  fn get_config_mut_impl(&mut self) -> &mut ConsumerConfig;
}
