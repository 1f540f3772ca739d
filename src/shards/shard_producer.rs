use super::spec::{SampleRange, ShardSpec};
use crate::codec::{CodecConfig, read_samples};
use crate::error::{
  Error, ErrorAction, ErrorContext, ErrorStrategy, Result, ShardMissingError, StreamError,
};
use crate::opener::Opener;
use crate::output::Output;
use crate::producer::{Producer, ProducerConfig};
use crate::sample::{Sample, SampleMapper, SampleResult, SampleStream};
use futures::StreamExt;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Settings for reading a shard set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardConfig {
  /// Expand brace groups in the locator.
  pub braceexpand: bool,
  /// Shuffle the shard list once, before reading.
  pub shuffle: bool,
  /// Seed for the shard shuffle.
  pub seed: Option<u64>,
  /// Log and skip shards that cannot be opened or read.
  pub allow_missing: bool,
  /// Entry grouping settings.
  pub codec: CodecConfig,
}

impl Default for ShardConfig {
  fn default() -> Self {
    Self {
      braceexpand: true,
      shuffle: false,
      seed: None,
      allow_missing: false,
      codec: CodecConfig::default(),
    }
  }
}

impl ShardConfig {
  /// Enables or disables brace expansion.
  #[must_use]
  pub fn with_braceexpand(mut self, braceexpand: bool) -> Self {
    self.braceexpand = braceexpand;
    self
  }

  /// Shuffles the shard list, optionally with a fixed seed.
  #[must_use]
  pub fn with_shuffle(mut self, shuffle: bool, seed: Option<u64>) -> Self {
    self.shuffle = shuffle;
    self.seed = seed;
    self
  }

  /// Skips unavailable shards instead of failing.
  #[must_use]
  pub fn with_allow_missing(mut self, allow_missing: bool) -> Self {
    self.allow_missing = allow_missing;
    self
  }

  /// Sets the grouping settings.
  #[must_use]
  pub fn with_codec(mut self, codec: CodecConfig) -> Self {
    self.codec = codec;
    self
  }
}

/// Producer streaming the samples of a shard set.
///
/// Shards are read one after another; at most one shard is open at a time. A global
/// counter over all samples, including those outside the window, selects the
/// `#start,end` window and ends the stream as soon as it is exhausted.
///
/// Unavailable shards are reported as [`ShardMissingError`] and resolved by the error
/// strategy: `Stop` (the default) fails the stream, `Skip` logs and moves on.
#[derive(Clone)]
pub struct ShardProducer {
  spec: ShardSpec,
  locators: Vec<String>,
  codec: CodecConfig,
  opener: Opener,
  decoder: Option<SampleMapper>,
  /// Configuration for the producer, including error strategy.
  pub config: ProducerConfig,
}

impl std::fmt::Debug for ShardProducer {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ShardProducer")
      .field("spec", &self.spec)
      .field("locators", &self.locators)
      .field("decoder", &self.decoder.is_some())
      .finish()
  }
}

impl ShardProducer {
  /// Parses `url` and resolves its shard list.
  pub fn new(url: impl AsRef<str>, config: ShardConfig) -> Result<Self> {
    let spec = ShardSpec::parse(url.as_ref())?;
    let mut locators = spec.locators(config.braceexpand);
    if config.shuffle {
      let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
      };
      locators.shuffle(&mut rng);
    }
    let error_strategy = if config.allow_missing {
      ErrorStrategy::Skip
    } else {
      ErrorStrategy::Stop
    };
    Ok(Self {
      spec,
      locators,
      codec: config.codec,
      opener: Opener::default(),
      decoder: None,
      config: ProducerConfig::default().with_error_strategy(error_strategy),
    })
  }

  /// Opens shards with `opener`.
  #[must_use]
  pub fn with_opener(mut self, opener: Opener) -> Self {
    self.opener = opener;
    self
  }

  /// Applies `decoder` to every sample after grouping. Decoder failures end the stream.
  #[must_use]
  pub fn with_decoder<F>(mut self, decoder: F) -> Self
  where
    F: Fn(Sample) -> Result<Sample> + Send + Sync + 'static,
  {
    self.decoder = Some(Arc::new(decoder));
    self
  }

  /// Sets the error strategy for unavailable shards.
  #[must_use]
  pub fn with_error_strategy(mut self, strategy: ErrorStrategy<Sample>) -> Self {
    self.config.error_strategy = strategy;
    self
  }

  /// Shard locators in read order.
  pub fn locators(&self) -> &[String] {
    &self.locators
  }

  /// The sample window.
  pub fn range(&self) -> SampleRange {
    self.spec.range
  }
}

impl Output for ShardProducer {
  type Output = SampleResult;
  type OutputStream = SampleStream;
}

impl Producer for ShardProducer {
  fn produce(&mut self) -> SampleStream {
    let locators = self.locators.clone();
    let range = self.spec.range;
    let codec = self.codec.clone();
    let opener = self.opener.clone();
    let decoder = self.decoder.clone();
    let strategy = self.config.error_strategy.clone();
    let info = self.component_info();

    Box::pin(async_stream::stream! {
      let mut seen: u64 = 0;
      for locator in locators {
        if range.is_done(seen) {
          break;
        }
        info!(component = %info.name, locator = %locator, "opening shard");

        let mut failure: Option<Error> = None;
        match opener.open_read(&locator).await {
          Err(e) => failure = Some(e.into()),
          Ok(source) => {
            let mut samples = read_samples(source, codec.clone());
            while let Some(item) = samples.next().await {
              let mut sample = match item {
                Ok(sample) => sample,
                Err(e) => {
                  failure = Some(e);
                  break;
                }
              };
              let index = seen;
              seen += 1;
              if !range.contains(index) {
                continue;
              }
              sample.ensure_source(&locator);
              if let Some(decoder) = &decoder {
                sample = match decoder(sample) {
                  Ok(sample) => sample,
                  Err(e) => {
                    error!(component = %info.name, locator = %locator, error = %e, "decoder failed");
                    yield Err(e);
                    return;
                  }
                };
              }
              yield Ok(sample);
              if range.is_done(seen) {
                break;
              }
            }
          }
        }

        let Some(failure) = failure else {
          continue;
        };
        if matches!(failure, Error::Validation(_)) {
          yield Err(failure);
          return;
        }
        let missing = ShardMissingError {
          locator: locator.clone(),
          source: Box::new(failure),
        };
        let stream_error = StreamError::new(
          Box::new(missing),
          ErrorContext {
            timestamp: chrono::Utc::now(),
            item: None,
            component_name: info.name.clone(),
            component_type: info.type_name.clone(),
          },
          info.clone(),
        );
        match strategy.action(&stream_error) {
          ErrorAction::Skip => {
            warn!(component = %info.name, error = %stream_error, "skipping unavailable shard");
          }
          ErrorAction::Stop => {
            error!(component = %info.name, error = %stream_error, "shard unavailable");
            yield Err(stream_error.into_error());
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
