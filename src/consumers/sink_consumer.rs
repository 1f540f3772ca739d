use super::sink::SampleSink;
use crate::consumer::{Consumer, ConsumerConfig};
use crate::error::{ErrorAction, ErrorStrategy, Result, StreamError};
use crate::input::Input;
use crate::sample::{Sample, SampleResult, SampleStream};
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{error, info, warn};

/// Consumer writing every sample of its input to a [`SampleSink`].
///
/// Failed input items and failed writes go through the error strategy. The sink is
/// finished on every exit path; when both a write and the finish fail, the write
/// error is reported.
#[derive(Debug)]
pub struct SinkConsumer<S> {
  sink: S,
  written: u64,
  /// Configuration for the consumer, including error strategy.
  pub config: ConsumerConfig,
}

impl<S: SampleSink> SinkConsumer<S> {
  /// Wraps `sink`.
  pub fn new(sink: S) -> Self {
    Self {
      sink,
      written: 0,
      config: ConsumerConfig::default(),
    }
  }

  /// Sets the error strategy.
  #[must_use]
  pub fn with_error_strategy(mut self, strategy: ErrorStrategy<Sample>) -> Self {
    self.config.error_strategy = strategy;
    self
  }

  /// The wrapped sink.
  pub fn sink(&self) -> &S {
    &self.sink
  }

  /// Samples written so far.
  pub fn written(&self) -> u64 {
    self.written
  }

  /// Unwraps the sink.
  pub fn into_inner(self) -> S {
    self.sink
  }
}

impl<S> Input for SinkConsumer<S> {
  type Input = SampleResult;
  type InputStream = SampleStream;
}

#[async_trait]
impl<S: SampleSink> Consumer for SinkConsumer<S> {
  async fn consume(&mut self, mut input: SampleStream) -> Result<()> {
    let info = self.component_info();
    let mut outcome = Ok(());

    while let Some(item) = input.next().await {
      let (written, item) = match item {
        Ok(sample) => {
          let kept = sample.clone();
          (self.sink.write(sample).await, Some(kept))
        }
        Err(e) => (Err(e), None),
      };
      let Err(e) = written else {
        self.written += 1;
        continue;
      };
      let stream_error = StreamError::new(Box::new(e), self.create_error_context(item), info.clone());
      match self.handle_error(&stream_error) {
        ErrorAction::Skip => {
          warn!(component = %info.name, error = %stream_error, "skipping sample");
        }
        ErrorAction::Stop => {
          error!(component = %info.name, error = %stream_error, "stopping");
          outcome = Err(stream_error.into_error());
          break;
        }
      }
    }

    let finished = self.sink.finish().await;
    info!(component = %info.name, written = self.written, "sink finished");
    outcome.and(finished)
  }

  fn set_config_impl(&mut self, config: ConsumerConfig) {
    self.config = config;
  }

  fn get_config_impl(&self) -> &ConsumerConfig {
    &self.config
  }

  fn get_config_mut_impl(&mut self) -> &mut ConsumerConfig {
    &mut self.config
  }
}
