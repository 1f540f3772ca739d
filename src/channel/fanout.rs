use super::connection::{Connection, ConnectionOptions, expand_urls};
use super::socket::Context;
use crate::error::{ChannelConfigError, Result};
use crate::sample::Sample;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// How the distributor picks a destination for each sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum FanoutPolicy {
  /// Cycle through the destinations in order.
  RoundRobin,
  /// Pick a destination uniformly at random.
  #[default]
  Random,
}

impl FromStr for FanoutPolicy {
  type Err = ChannelConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "round_robin" | "roundrobin" => Ok(FanoutPolicy::RoundRobin),
      "random" => Ok(FanoutPolicy::Random),
      other => Err(ChannelConfigError::UnknownPolicy(other.to_string())),
    }
  }
}

impl TryFrom<String> for FanoutPolicy {
  type Error = ChannelConfigError;

  fn try_from(s: String) -> Result<Self, Self::Error> {
    s.parse()
  }
}

impl fmt::Display for FanoutPolicy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      FanoutPolicy::RoundRobin => f.write_str("round_robin"),
      FanoutPolicy::Random => f.write_str("random"),
    }
  }
}

/// Distributor settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FanoutOptions {
  /// Destination selection.
  pub policy: FanoutPolicy,
  /// Seed for the random policy.
  pub seed: Option<u64>,
}

impl FanoutOptions {
  /// Options with the given policy.
  pub fn new(policy: FanoutPolicy) -> Self {
    Self { policy, seed: None }
  }

  /// Fixes the random seed.
  #[must_use]
  pub fn with_seed(mut self, seed: u64) -> Self {
    self.seed = Some(seed);
    self
  }
}

/// Spreads samples over several destinations, one [`Connection`] per URL.
///
/// There is no acknowledgement or retry; a destination that never attaches blocks
/// the sends routed to it.
#[derive(Debug)]
pub struct FanoutDistributor {
  context: Context,
  channels: Vec<Connection>,
  policy: FanoutPolicy,
  rng: StdRng,
  cursor: usize,
  counts: Vec<u64>,
  eof_delay: Duration,
}

impl FanoutDistributor {
  /// Opens one connection per (brace-expanded) URL.
  pub async fn open<I, S>(
    urls: I,
    options: FanoutOptions,
    connection: ConnectionOptions,
  ) -> Result<Self>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let urls = expand_urls(urls, connection.noexpand);
    if urls.is_empty() {
      return Err(ChannelConfigError::NoUrls.into());
    }
    let context = Context::new(connection.socket.clone());
    let eof_delay = connection.eof_delay();
    let single = connection.with_noexpand(true);
    let mut channels = Vec::with_capacity(urls.len());
    for url in &urls {
      channels.push(Connection::open_with_context([url], single.clone(), &context).await?);
    }
    let rng = match options.seed {
      Some(seed) => StdRng::seed_from_u64(seed),
      None => StdRng::from_entropy(),
    };
    debug!(policy = %options.policy, destinations = channels.len(), "fan-out opened");
    Ok(Self {
      context,
      counts: vec![0; channels.len()],
      channels,
      policy: options.policy,
      rng,
      cursor: 0,
      eof_delay,
    })
  }

  /// The selection policy.
  pub fn policy(&self) -> FanoutPolicy {
    self.policy
  }

  /// Per-destination connections, in URL order.
  pub fn channels(&self) -> &[Connection] {
    &self.channels
  }

  /// Samples sent to each destination, in URL order.
  pub fn counts(&self) -> &[u64] {
    &self.counts
  }

  /// Sends `sample` to one destination and returns its index.
  pub async fn send(&mut self, sample: &Sample) -> Result<usize> {
    let index = match self.policy {
      FanoutPolicy::RoundRobin => {
        let index = self.cursor % self.channels.len();
        self.cursor = self.cursor.wrapping_add(1);
        index
      }
      FanoutPolicy::Random => self.rng.gen_range(0..self.channels.len()),
    };
    self.channels[index].send(sample).await?;
    self.counts[index] += 1;
    Ok(index)
  }

  /// Sends the end-of-stream marker to every destination, then pauses once.
  pub async fn send_eof(&mut self) -> Result<()> {
    for channel in &mut self.channels {
      channel.send_eof_now().await?;
    }
    tokio::time::sleep(self.eof_delay).await;
    Ok(())
  }

  /// True once every destination has been closed.
  pub fn is_closed(&self) -> bool {
    self.channels.iter().all(Connection::is_closed)
  }

  /// Closes every destination. Idempotent.
  pub async fn close(&mut self) {
    for channel in &mut self.channels {
      channel.close().await;
    }
    self.context.shutdown();
  }
}
