use super::connection::Connection;
use crate::error::{ChannelError, Error, ErrorAction, ErrorContext, ErrorStrategy, StreamError};
use crate::output::Output;
use crate::producer::{Producer, ProducerConfig};
use crate::sample::{Sample, SampleResult, SampleStream};
use futures::StreamExt;
use tracing::{error, warn};

/// Producer reading samples from a receiving [`Connection`] until end of stream.
///
/// The connection is consumed by the first call to `produce`; later calls yield a
/// single [`ChannelError::Closed`]. Undecodable frames go through the error strategy.
#[derive(Debug)]
pub struct ChannelProducer {
  connection: Option<Connection>,
  /// Configuration for the producer, including error strategy.
  pub config: ProducerConfig,
}

impl ChannelProducer {
  /// Wraps an open connection.
  pub fn new(connection: Connection) -> Self {
    Self {
      connection: Some(connection),
      config: ProducerConfig::default(),
    }
  }

  /// Sets the error strategy for undecodable frames.
  #[must_use]
  pub fn with_error_strategy(mut self, strategy: ErrorStrategy<Sample>) -> Self {
    self.config.error_strategy = strategy;
    self
  }
}

impl Output for ChannelProducer {
  type Output = SampleResult;
  type OutputStream = SampleStream;
}

impl Producer for ChannelProducer {
  fn produce(&mut self) -> SampleStream {
    let Some(connection) = self.connection.take() else {
      return Box::pin(futures::stream::once(async {
        Err(Error::Channel(ChannelError::Closed))
      }));
    };
    let strategy = self.config.error_strategy.clone();
    let info = self.component_info();
    let context = self.create_error_context(None);

    let mut frames = connection.into_stream();
    Box::pin(async_stream::stream! {
      while let Some(item) = frames.next().await {
        match item {
          Ok(sample) => yield Ok(sample),
          Err(e @ Error::Channel(ChannelError::Decode(_))) => {
            let context = ErrorContext {
              timestamp: chrono::Utc::now(),
              ..context.clone()
            };
            let stream_error = StreamError::new(Box::new(e), context, info.clone());
            match strategy.action(&stream_error) {
              ErrorAction::Skip => {
                warn!(component = %info.name, error = %stream_error, "dropping undecodable frame");
              }
              ErrorAction::Stop => {
                error!(component = %info.name, error = %stream_error, "undecodable frame");
                yield Err(stream_error.into_error());
                return;
              }
            }
          }
          Err(e) => {
            error!(component = %info.name, error = %e, "channel failed");
            yield Err(e);
            return;
          }
        }
      }
    })
  }

  fn set_config_impl(&mut self, config: ProducerConfig) {
    self.config = config;
  }

  fn get_config_impl(&self) -> &ProducerConfig {
    &self.config
  }

  fn get_config_mut_impl(&mut self) -> &mut ProducerConfig {
    &mut self.config
  }
}
