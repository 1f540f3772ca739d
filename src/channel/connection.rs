use super::frame::Frame;
use super::scheme::{Endpoint, SocketKind, Topology};
use super::socket::{Context, Socket, SocketOptions};
use crate::error::{ChannelConfigError, ChannelError, Error, Result};
use crate::sample::{Sample, SampleStream};
use crate::shards::brace_expand;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const LOG_EVERY: u64 = 10_000;

/// Settings for a [`Connection`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionOptions {
  /// Use URLs verbatim instead of brace-expanding them.
  pub noexpand: bool,
  /// Topic prefix for subscribers; empty receives everything.
  pub topic: String,
  /// Pause after the end-of-stream marker so queued frames can reach peers.
  pub eof_delay_ms: u64,
  /// Socket tuning.
  pub socket: SocketOptions,
}

impl Default for ConnectionOptions {
  fn default() -> Self {
    Self {
      noexpand: false,
      topic: String::new(),
      eof_delay_ms: 1000,
      socket: SocketOptions::default(),
    }
  }
}

impl ConnectionOptions {
  /// Sets the subscriber topic.
  #[must_use]
  pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
    self.topic = topic.into();
    self
  }

  /// Sets the end-of-stream pause.
  #[must_use]
  pub fn with_eof_delay(mut self, delay: Duration) -> Self {
    self.eof_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    self
  }

  /// Disables brace expansion of URLs.
  #[must_use]
  pub fn with_noexpand(mut self, noexpand: bool) -> Self {
    self.noexpand = noexpand;
    self
  }

  /// Sets the socket options.
  #[must_use]
  pub fn with_socket(mut self, socket: SocketOptions) -> Self {
    self.socket = socket;
    self
  }

  pub(crate) fn eof_delay(&self) -> Duration {
    Duration::from_millis(self.eof_delay_ms)
  }
}

/// Brace-expands every URL unless `noexpand` is set.
pub fn expand_urls<I, S>(urls: I, noexpand: bool) -> Vec<String>
where
  I: IntoIterator<Item = S>,
  S: AsRef<str>,
{
  urls
    .into_iter()
    .flat_map(|url| {
      if noexpand {
        vec![url.as_ref().to_string()]
      } else {
        brace_expand(url.as_ref())
      }
    })
    .collect()
}

/// A sample channel: one socket bound or connected to every given URL.
///
/// All URLs must resolve to the same socket topology.
///
/// ```rust,no_run
/// use shardweave::channel::{Connection, ConnectionOptions};
///
/// # async fn run() -> shardweave::Result<()> {
/// let mut feed = Connection::open(["zsub://trainer-0:7880"], ConnectionOptions::default()).await?;
/// while let Some(sample) = feed.recv_sample().await? {
///   println!("{}", sample.key());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Connection {
  urls: Vec<String>,
  topology: Topology,
  socket: Socket,
  eof_delay: Duration,
  sent: u64,
  received: u64,
}

impl Connection {
  /// Opens a connection in a fresh [`Context`].
  ///
  /// A `zsub`/`zrsub` socket with a non-empty topic drops every frame whose bytes do
  /// not start with the topic, and the end-of-stream marker is such a frame. Its
  /// [`recv_sample`](Self::recv_sample) never reports end of stream, so callers
  /// must stop reading on their own.
  pub async fn open<I, S>(urls: I, options: ConnectionOptions) -> Result<Self>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let context = Context::new(options.socket.clone());
    Self::open_with_context(urls, options, &context).await
  }

  /// Opens a connection whose socket belongs to `context`.
  pub async fn open_with_context<I, S>(
    urls: I,
    options: ConnectionOptions,
    context: &Context,
  ) -> Result<Self>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let urls = expand_urls(urls, options.noexpand);
    let endpoints = urls
      .iter()
      .map(|url| Endpoint::parse(url))
      .collect::<Result<Vec<_>, _>>()?;
    let first = endpoints.first().ok_or(ChannelConfigError::NoUrls)?;
    let topology = first.topology();
    if let Some(other) = endpoints.iter().find(|e| e.topology() != topology) {
      return Err(
        ChannelConfigError::MixedTopology {
          first: first.url().to_string(),
          other: other.url().to_string(),
        }
        .into(),
      );
    }

    let mut socket = context.socket(topology.kind);
    if topology.kind == SocketKind::Sub {
      socket.subscribe(Bytes::from(options.topic.clone().into_bytes()))?;
    }
    for endpoint in &endpoints {
      if topology.bind {
        socket.bind(endpoint).await?;
      } else {
        socket.connect(endpoint)?;
      }
    }
    debug!(kind = %topology.kind, bind = topology.bind, urls = ?urls, "connection opened");

    Ok(Self {
      urls,
      topology,
      socket,
      eof_delay: options.eof_delay(),
      sent: 0,
      received: 0,
    })
  }

  /// Expanded URLs.
  pub fn urls(&self) -> &[String] {
    &self.urls
  }

  /// Socket kind and side.
  pub fn topology(&self) -> Topology {
    self.topology
  }

  /// Bound locations with OS-assigned ports resolved.
  pub fn local_addrs(&self) -> &[String] {
    self.socket.local_addrs()
  }

  /// Number of attached peers.
  pub fn peer_count(&self) -> usize {
    self.socket.peer_count()
  }

  /// Frames sent so far.
  pub fn sent(&self) -> u64 {
    self.sent
  }

  /// Frames received so far.
  pub fn received(&self) -> u64 {
    self.received
  }

  /// Waits until `count` peers are attached.
  pub async fn wait_for_peers(&self, count: usize, timeout: Duration) -> Result<()> {
    Ok(self.socket.wait_for_peers(count, timeout).await?)
  }

  /// Encodes and sends one sample.
  pub async fn send(&mut self, sample: &Sample) -> Result<()> {
    let frame = Frame::encode_sample(sample)?;
    self.socket.send(frame).await?;
    self.sent += 1;
    if self.sent % LOG_EVERY == 0 {
      debug!(kind = %self.topology.kind, sent = self.sent, "frames sent");
    }
    Ok(())
  }

  /// Sends the end-of-stream marker to every peer, then pauses for the EOF delay.
  pub async fn send_eof(&mut self) -> Result<()> {
    self.send_eof_now().await?;
    tokio::time::sleep(self.eof_delay).await;
    Ok(())
  }

  pub(crate) async fn send_eof_now(&mut self) -> Result<()> {
    let reached = self.socket.send_all(Frame::encode_eof()?).await?;
    debug!(kind = %self.topology.kind, peers = reached, "end of stream sent");
    Ok(())
  }

  /// Receives and decodes the next frame.
  pub async fn recv(&mut self) -> Result<Frame> {
    let bytes = self.socket.recv().await?;
    self.received += 1;
    if self.received % LOG_EVERY == 0 {
      debug!(kind = %self.topology.kind, received = self.received, "frames received");
    }
    Ok(Frame::decode(&bytes)?)
  }

  /// Receives the next sample, or `None` at the end-of-stream marker.
  pub async fn recv_sample(&mut self) -> Result<Option<Sample>> {
    match self.recv().await? {
      Frame::Sample(sample) => Ok(Some(sample)),
      Frame::Eof => Ok(None),
    }
  }

  /// Streams samples until the end-of-stream marker, then closes the connection.
  ///
  /// Undecodable frames are yielded as errors and the stream continues; any other
  /// failure ends it.
  pub fn into_stream(mut self) -> SampleStream {
    Box::pin(async_stream::stream! {
      loop {
        match self.recv().await {
          Ok(Frame::Sample(sample)) => yield Ok(sample),
          Ok(Frame::Eof) => break,
          Err(e @ Error::Channel(ChannelError::Decode(_))) => yield Err(e),
          Err(e) => {
            yield Err(e);
            break;
          }
        }
      }
      self.close().await;
    })
  }

  /// True once the connection has been closed.
  pub fn is_closed(&self) -> bool {
    self.socket.is_closed()
  }

  /// Closes the socket. Idempotent.
  pub async fn close(&mut self) {
    self.socket.close().await;
  }
}
