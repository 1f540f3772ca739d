use crate::error::{ErrorAction, ErrorStrategy, StreamError};
use crate::input::Input;
use crate::output::Output;
use crate::sample::{Sample, SampleResult, SampleStream};
use crate::transformer::{Transformer, TransformerConfig};
use futures::StreamExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

/// Reservoir settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShuffleConfig {
  /// Reservoir capacity. Below 2 the stream passes through unchanged.
  pub bufsize: usize,
  /// Samples buffered before the first one is emitted; clamped to `bufsize`.
  pub initial: usize,
  /// Seed for reproducible output.
  pub seed: Option<u64>,
}

impl Default for ShuffleConfig {
  fn default() -> Self {
    Self {
      bufsize: 1000,
      initial: 100,
      seed: None,
    }
  }
}

impl ShuffleConfig {
  /// Reservoir of `bufsize` samples emitting after `initial`.
  pub fn new(bufsize: usize, initial: usize) -> Self {
    Self {
      bufsize,
      initial,
      seed: None,
    }
  }

  /// Fixes the random seed.
  #[must_use]
  pub fn with_seed(mut self, seed: u64) -> Self {
    self.seed = Some(seed);
    self
  }
}

/// Bounded-memory approximate shuffle.
///
/// While the buffer is below capacity, every input fills one more slot and the input
/// before it is exchanged against a random slot. Once full, each input is exchanged
/// directly. Nothing is emitted until `initial` samples are buffered. The output is a
/// permutation of the input, biased toward keeping early items early.
#[derive(Debug)]
pub struct Reservoir<T, R = StdRng> {
  buf: Vec<T>,
  held: Option<T>,
  bufsize: usize,
  initial: usize,
  startup: bool,
  rng: R,
}

impl<T> Reservoir<T, StdRng> {
  /// Reservoir with a generator seeded from `seed`, or from entropy.
  pub fn from_config(config: &ShuffleConfig) -> Self {
    let rng = match config.seed {
      Some(seed) => StdRng::seed_from_u64(seed),
      None => StdRng::from_entropy(),
    };
    Self::new(config.bufsize, config.initial, rng)
  }
}

impl<T, R: Rng> Reservoir<T, R> {
  /// Creates an empty reservoir drawing from `rng`.
  pub fn new(bufsize: usize, initial: usize, rng: R) -> Self {
    Self {
      buf: Vec::with_capacity(bufsize.min(4096)),
      held: None,
      bufsize,
      initial: initial.min(bufsize),
      startup: true,
      rng,
    }
  }

  /// Number of items currently retained.
  pub fn len(&self) -> usize {
    self.buf.len() + usize::from(self.held.is_some())
  }

  /// True when nothing is retained.
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Feeds one item, returning an item to emit, if any.
  pub fn push(&mut self, item: T) -> Option<T> {
    if self.bufsize < 2 {
      return Some(item);
    }
    match self.held.take() {
      Some(previous) => {
        self.buf.push(item);
        self.exchange(previous)
      }
      None if self.buf.len() < self.bufsize => {
        self.held = Some(item);
        None
      }
      None => self.exchange(item),
    }
  }

  fn exchange(&mut self, item: T) -> Option<T> {
    let k = self.rng.gen_range(0..self.buf.len());
    let out = std::mem::replace(&mut self.buf[k], item);
    if self.startup && self.buf.len() < self.initial {
      self.buf.push(out);
      return None;
    }
    self.startup = false;
    Some(out)
  }

  /// Ends the input and returns everything retained.
  pub fn finish(&mut self) -> Vec<T> {
    let mut rest = std::mem::take(&mut self.buf);
    rest.extend(self.held.take());
    rest
  }
}

/// Transformer shuffling samples through a [`Reservoir`].
///
/// Errors from upstream never enter the reservoir; they go through the error strategy.
/// `Skip` drops them. `Stop` (the default) flushes the reservoir, yields the error and
/// ends the stream.
#[derive(Debug, Clone)]
pub struct ShuffleTransformer {
  shuffle: ShuffleConfig,
  /// Transformer configuration.
  pub config: TransformerConfig,
}

impl ShuffleTransformer {
  /// Creates a shuffle stage.
  pub fn new(shuffle: ShuffleConfig) -> Self {
    Self {
      shuffle,
      config: TransformerConfig::default(),
    }
  }

  /// Sets the error strategy.
  #[must_use]
  pub fn with_error_strategy(mut self, strategy: ErrorStrategy<Sample>) -> Self {
    self.config.error_strategy = strategy;
    self
  }

  /// Reservoir settings.
  pub fn shuffle_config(&self) -> &ShuffleConfig {
    &self.shuffle
  }
}

impl Input for ShuffleTransformer {
  type Input = SampleResult;
  type InputStream = SampleStream;
}

impl Output for ShuffleTransformer {
  type Output = SampleResult;
  type OutputStream = SampleStream;
}

impl Transformer for ShuffleTransformer {
  fn transform(&mut self, input: SampleStream) -> SampleStream {
    let mut reservoir = Reservoir::from_config(&self.shuffle);
    let strategy = self.config.error_strategy.clone();
    let info = self.component_info();
    let context = self.create_error_context(None);
    let mut input = input;
    Box::pin(async_stream::stream! {
      let mut stopped = None;
      while let Some(item) = input.next().await {
        let e = match item {
          Ok(sample) => {
            if let Some(out) = reservoir.push(sample) {
              yield Ok(out);
            }
            continue;
          }
          Err(e) => e,
        };
        let stream_error = StreamError::new(Box::new(e), context.clone(), info.clone());
        match strategy.action(&stream_error) {
          ErrorAction::Skip => {
            warn!(component = %info.name, error = %stream_error, "skipping failed sample");
          }
          ErrorAction::Stop => {
            error!(component = %info.name, error = %stream_error, "stopping");
            stopped = Some(stream_error.into_error());
            break;
          }
        }
      }
      for sample in reservoir.finish() {
        yield Ok(sample);
      }
      if let Some(e) = stopped {
        yield Err(e);
      }
    })
  }

  fn set_config_impl(&mut self, config: TransformerConfig) {
    self.config = config;
  }

  fn get_config_impl(&self) -> &TransformerConfig {
    &self.config
  }

  fn get_config_mut_impl(&mut self) -> &mut TransformerConfig {
    &mut self.config
  }
}
