//! # Transformer Trait
//!
//! Transformers sit between a producer and a consumer and rewrite the sample stream,
//! e.g. [`crate::transformers::ShuffleTransformer`]. A transformer must stay lazy: it
//! pulls from its input only as fast as its own output is pulled.

use crate::Sample;
use crate::error::{ComponentInfo, ErrorAction, ErrorContext, ErrorStrategy, StreamError};
use crate::input::Input;
use crate::output::Output;

/// Configuration for a transformer component.
#[derive(Debug)]
pub struct TransformerConfig<T = Sample> {
  /// The error handling strategy to use when transforming items.
  pub error_strategy: ErrorStrategy<T>,
  /// Optional name for identifying this transformer in logs.
  pub name: Option<String>,
}

impl<T> Clone for TransformerConfig<T> {
  fn clone(&self) -> Self {
    Self {
      error_strategy: self.error_strategy.clone(),
      name: self.name.clone(),
    }
  }
}

impl<T> Default for TransformerConfig<T> {
  fn default() -> Self {
    Self {
      error_strategy: ErrorStrategy::Stop,
      name: None,
    }
  }
}

impl<T> TransformerConfig<T> {
  /// Sets the error handling strategy for this transformer configuration.
  #[must_use]
  pub fn with_error_strategy(mut self, strategy: ErrorStrategy<T>) -> Self {
    self.error_strategy = strategy;
    self
  }

  /// Sets the name for this transformer configuration.
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

/// Trait for components that transform streams.
pub trait Transformer: Input + Output {
  /// Transforms a stream of input items into a stream of output items.
  fn transform(&mut self, input: Self::InputStream) -> Self::OutputStream;

  /// Sets the configuration for this transformer.
  fn set_config(&mut self, config: TransformerConfig) {
    self.set_config_impl(config);
  }

  /// Returns a reference to the transformer's configuration.
  fn config(&self) -> &TransformerConfig {
    self.get_config_impl()
  }

  /// Returns a mutable reference to the transformer's configuration.
  fn config_mut(&mut self) -> &mut TransformerConfig {
    self.get_config_mut_impl()
  }

  /// Sets the name for this transformer.
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
        .unwrap_or_else(|| "transformer".to_string()),
      type_name: std::any::type_name::<Self>().to_string(),
    }
  }

  /// Stores the configuration.
  fn set_config_impl(&mut self, config: TransformerConfig);

  /// Returns the stored configuration.
  fn get_config_impl(&self) -> &TransformerConfig;

  /// Returns the stored configuration mutably.
  fn get_config_mut_impl(&mut self) -> &mut TransformerConfig;
}
