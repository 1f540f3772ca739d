//! Message sockets over TCP and Unix domain streams.
//!
//! Each peer connection carries length-delimited frames. A socket may bind and connect
//! to any number of locations at once; connecting sides retry until the peer shows up.
//!
//! - `push` hands each frame to one connected peer, round-robin, waiting while there
//!   are none.
//! - `pub` offers each frame to every peer and drops it for peers whose queue is full.
//! - `pull` and `sub` merge frames from all peers into one inbox; `sub` keeps only
//!   frames starting with a subscribed topic.

use super::scheme::{Address, Endpoint, SocketKind};
use crate::error::ChannelError;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// Socket tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketOptions {
  /// Delay between connection attempts.
  pub reconnect_interval_ms: u64,
  /// Frames queued per peer before `push` waits and `pub` drops.
  pub send_queue: usize,
  /// Frames queued in the inbox of a receiving socket.
  pub recv_queue: usize,
  /// How long `close` waits for queued frames to go out. `None` waits until they do.
  pub linger_ms: Option<u64>,
  /// Largest accepted frame.
  pub max_frame_bytes: usize,
}

impl Default for SocketOptions {
  fn default() -> Self {
    Self {
      reconnect_interval_ms: 100,
      send_queue: 1000,
      recv_queue: 1000,
      linger_ms: None,
      max_frame_bytes: 256 * 1024 * 1024,
    }
  }
}

impl SocketOptions {
  /// Sets the linger period.
  #[must_use]
  pub fn with_linger(mut self, linger: Option<Duration>) -> Self {
    self.linger_ms = linger.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
    self
  }
}

/// Shared parent of a group of sockets; shutting it down stops all of them.
#[derive(Debug, Clone, Default)]
pub struct Context {
  token: CancellationToken,
  options: SocketOptions,
}

impl Context {
  /// Context creating sockets with `options`.
  pub fn new(options: SocketOptions) -> Self {
    Self {
      token: CancellationToken::new(),
      options,
    }
  }

  /// Options given to new sockets.
  pub fn options(&self) -> &SocketOptions {
    &self.options
  }

  /// Creates an unconnected socket.
  pub fn socket(&self, kind: SocketKind) -> Socket {
    Socket::new(kind, self.options.clone(), &self.token)
  }

  /// Stops every socket created from this context without lingering.
  pub fn shutdown(&self) {
    self.token.cancel();
  }
}

trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

type BoxedStream = Box<dyn AsyncStream>;

#[derive(Default)]
struct PeerTable {
  next_id: u64,
  peers: Vec<(u64, Option<mpsc::Sender<Bytes>>)>,
}

struct Shared {
  kind: SocketKind,
  options: SocketOptions,
  table: Mutex<PeerTable>,
  peer_count: watch::Sender<usize>,
  topics: RwLock<Vec<Bytes>>,
  inbox: mpsc::Sender<Bytes>,
}

impl Shared {
  fn table(&self) -> MutexGuard<'_, PeerTable> {
    self.table.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn register(&self, queue: Option<mpsc::Sender<Bytes>>) -> u64 {
    let mut table = self.table();
    let id = table.next_id;
    table.next_id += 1;
    table.peers.push((id, queue));
    self.peer_count.send_replace(table.peers.len());
    id
  }

  fn unregister(&self, id: u64) {
    let mut table = self.table();
    table.peers.retain(|(peer, _)| *peer != id);
    self.peer_count.send_replace(table.peers.len());
  }

  /// Queue of the next peer in round-robin order.
  fn next_queue(&self, cursor: &mut usize) -> Option<mpsc::Sender<Bytes>> {
    let table = self.table();
    let live: Vec<&mpsc::Sender<Bytes>> = table.peers.iter().filter_map(|(_, q)| q.as_ref()).collect();
    if live.is_empty() {
      return None;
    }
    let queue = live[*cursor % live.len()].clone();
    *cursor = cursor.wrapping_add(1);
    Some(queue)
  }

  fn queues(&self) -> Vec<mpsc::Sender<Bytes>> {
    self
      .table()
      .peers
      .iter()
      .filter_map(|(_, q)| q.clone())
      .collect()
  }

  /// Drops every peer queue so connection tasks finish once their queue is drained.
  fn release_queues(&self) {
    for (_, queue) in self.table().peers.iter_mut() {
      *queue = None;
    }
  }

  fn subscribed(&self, frame: &[u8]) -> bool {
    if self.kind != SocketKind::Sub {
      return true;
    }
    self
      .topics
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .iter()
      .any(|topic| frame.starts_with(topic))
  }

  fn codec(&self) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
      .max_frame_length(self.options.max_frame_bytes)
      .new_codec()
  }
}

/// A message socket.
pub struct Socket {
  kind: SocketKind,
  shared: Arc<Shared>,
  inbox: mpsc::Receiver<Bytes>,
  peers: watch::Receiver<usize>,
  listeners: CancellationToken,
  connections: CancellationToken,
  tasks: TaskTracker,
  local_addrs: Vec<String>,
  ipc_paths: Vec<PathBuf>,
  cursor: usize,
  closed: bool,
}

impl std::fmt::Debug for Socket {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Socket")
      .field("kind", &self.kind)
      .field("peers", &*self.peers.borrow())
      .field("local_addrs", &self.local_addrs)
      .field("closed", &self.closed)
      .finish()
  }
}

impl Socket {
  fn new(kind: SocketKind, options: SocketOptions, parent: &CancellationToken) -> Self {
    let (inbox_tx, inbox) = mpsc::channel(options.recv_queue.max(1));
    let (peer_count, peers) = watch::channel(0);
    let shared = Arc::new(Shared {
      kind,
      options,
      table: Mutex::new(PeerTable::default()),
      peer_count,
      topics: RwLock::new(Vec::new()),
      inbox: inbox_tx,
    });
    Self {
      kind,
      shared,
      inbox,
      peers,
      listeners: parent.child_token(),
      connections: parent.child_token(),
      tasks: TaskTracker::new(),
      local_addrs: Vec::new(),
      ipc_paths: Vec::new(),
      cursor: 0,
      closed: false,
    }
  }

  /// Socket kind.
  pub fn kind(&self) -> SocketKind {
    self.kind
  }

  /// Locations this socket listens on, with OS-assigned ports filled in.
  pub fn local_addrs(&self) -> &[String] {
    &self.local_addrs
  }

  /// Number of currently attached peers.
  pub fn peer_count(&self) -> usize {
    *self.peers.borrow()
  }

  /// True once `close` has run.
  pub fn is_closed(&self) -> bool {
    self.closed
  }

  fn ensure_open(&self) -> Result<(), ChannelError> {
    if self.closed || self.listeners.is_cancelled() {
      return Err(ChannelError::Closed);
    }
    Ok(())
  }

  /// Listens on the endpoint's address and accepts peers in the background.
  pub async fn bind(&mut self, endpoint: &Endpoint) -> Result<(), ChannelError> {
    self.ensure_open()?;
    let location = endpoint.address().to_string();
    let bind_error = |source| ChannelError::Bind {
      location: location.clone(),
      source,
    };
    let listener = match endpoint.address() {
      Address::Tcp { host, port } => {
        let host = if host == "*" { "0.0.0.0" } else { host.as_str() };
        let listener = TcpListener::bind((host, *port)).await.map_err(bind_error)?;
        let local = listener.local_addr().map_err(bind_error)?;
        self.local_addrs.push(format!("tcp://{local}"));
        Listener::Tcp(listener)
      }
      Address::Ipc(path) => {
        let listener = bind_ipc(path).map_err(bind_error)?;
        self.local_addrs.push(location.clone());
        self.ipc_paths.push(path.clone());
        listener
      }
    };
    debug!(kind = %self.kind, location = %location, "socket bound");

    let shared = self.shared.clone();
    let listeners = self.listeners.clone();
    let connections = self.connections.clone();
    let tracker = self.tasks.clone();
    let interval = Duration::from_millis(shared.options.reconnect_interval_ms.max(1));
    self.tasks.spawn(async move {
      loop {
        let accepted = tokio::select! {
          _ = listeners.cancelled() => break,
          accepted = listener.accept() => accepted,
        };
        match accepted {
          Ok((stream, peer)) => {
            debug!(kind = %shared.kind, peer = %peer, "peer attached");
            tracker.spawn(serve(shared.clone(), stream, connections.clone()));
          }
          Err(e) => {
            warn!(kind = %shared.kind, error = %e, "accept failed");
            tokio::time::sleep(interval).await;
          }
        }
      }
    });
    Ok(())
  }

  /// Connects to the endpoint's address in the background, reconnecting whenever the
  /// peer goes away.
  pub fn connect(&mut self, endpoint: &Endpoint) -> Result<(), ChannelError> {
    self.ensure_open()?;
    let address = endpoint.address().clone();
    let shared = self.shared.clone();
    let listeners = self.listeners.clone();
    let connections = self.connections.clone();
    let interval = Duration::from_millis(shared.options.reconnect_interval_ms.max(1));
    self.tasks.spawn(async move {
      loop {
        let dialed = tokio::select! {
          _ = listeners.cancelled() => break,
          dialed = dial(&address) => dialed,
        };
        match dialed {
          Ok(stream) => {
            debug!(kind = %shared.kind, address = %address, "connected");
            serve(shared.clone(), stream, connections.clone()).await;
            debug!(kind = %shared.kind, address = %address, "disconnected");
          }
          Err(e) => debug!(kind = %shared.kind, address = %address, error = %e, "connect failed, retrying"),
        }
        tokio::select! {
          _ = listeners.cancelled() => break,
          _ = tokio::time::sleep(interval) => {}
        }
      }
    });
    Ok(())
  }

  /// Adds a topic prefix; `sub` sockets receive nothing until subscribed. An empty
  /// topic matches every frame.
  pub fn subscribe(&mut self, topic: impl Into<Bytes>) -> Result<(), ChannelError> {
    if self.kind != SocketKind::Sub {
      return Err(ChannelError::Unsupported {
        kind: self.kind,
        operation: "subscribe",
      });
    }
    self
      .shared
      .topics
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .push(topic.into());
    Ok(())
  }

  /// Sends one frame.
  pub async fn send(&mut self, frame: Bytes) -> Result<(), ChannelError> {
    self.ensure_open()?;
    match self.kind {
      SocketKind::Push => loop {
        match self.shared.next_queue(&mut self.cursor) {
          Some(queue) => {
            if queue.send(frame.clone()).await.is_ok() {
              return Ok(());
            }
            tokio::task::yield_now().await;
          }
          None => self.wait_for_first_peer().await?,
        }
      },
      SocketKind::Pub => {
        let mut dropped = 0usize;
        for queue in self.shared.queues() {
          if let Err(TrySendError::Full(_)) = queue.try_send(frame.clone()) {
            dropped += 1;
          }
        }
        if dropped > 0 {
          debug!(kind = %self.kind, dropped, "slow subscribers missed a frame");
        }
        Ok(())
      }
      kind => Err(ChannelError::Unsupported {
        kind,
        operation: "send",
      }),
    }
  }

  async fn wait_for_first_peer(&mut self) -> Result<(), ChannelError> {
    let attached = tokio::select! {
      _ = self.listeners.cancelled() => false,
      changed = self.peers.wait_for(|&n| n > 0) => changed.is_ok(),
    };
    if attached {
      Ok(())
    } else {
      Err(ChannelError::Closed)
    }
  }

  /// Sends one frame to every attached peer, whatever the socket's distribution rule.
  /// A `push` socket first waits for a peer. Returns the number of peers reached.
  pub async fn send_all(&mut self, frame: Bytes) -> Result<usize, ChannelError> {
    self.ensure_open()?;
    if self.kind.is_receiver() {
      return Err(ChannelError::Unsupported {
        kind: self.kind,
        operation: "send",
      });
    }
    if self.kind == SocketKind::Push {
      self.wait_for_first_peer().await?;
    }
    let mut reached = 0;
    for queue in self.shared.queues() {
      if queue.send(frame.clone()).await.is_ok() {
        reached += 1;
      }
    }
    Ok(reached)
  }

  /// Receives the next frame from any peer.
  pub async fn recv(&mut self) -> Result<Bytes, ChannelError> {
    if self.kind.is_sender() {
      return Err(ChannelError::Unsupported {
        kind: self.kind,
        operation: "recv",
      });
    }
    tokio::select! {
      biased;
      frame = self.inbox.recv() => frame.ok_or(ChannelError::Closed),
      _ = self.connections.cancelled() => Err(ChannelError::Closed),
    }
  }

  /// Waits until at least `count` peers are attached.
  pub async fn wait_for_peers(&self, count: usize, timeout: Duration) -> Result<(), ChannelError> {
    let mut peers = self.peers.clone();
    match tokio::time::timeout(timeout, peers.wait_for(|&n| n >= count)).await {
      Ok(Ok(_)) => Ok(()),
      Ok(Err(_)) => Err(ChannelError::Closed),
      Err(_) => Err(ChannelError::PeerTimeout {
        expected: count,
        connected: self.peer_count(),
      }),
    }
  }

  /// Stops listening and reconnecting, lets queued frames drain for the linger period,
  /// then drops every connection. Idempotent.
  pub async fn close(&mut self) {
    if self.closed {
      return;
    }
    self.closed = true;
    self.listeners.cancel();
    self.shared.release_queues();
    if self.kind.is_receiver() {
      self.connections.cancel();
    }
    self.tasks.close();

    let drained = match self.shared.options.linger_ms {
      Some(ms) => tokio::time::timeout(Duration::from_millis(ms), self.tasks.wait())
        .await
        .is_ok(),
      None => {
        self.tasks.wait().await;
        true
      }
    };
    if !drained {
      warn!(kind = %self.kind, "linger period expired, dropping queued frames");
    }
    self.connections.cancel();
    self.tasks.wait().await;
    self.remove_ipc_files();
    debug!(kind = %self.kind, "socket closed");
  }

  fn remove_ipc_files(&mut self) {
    for path in self.ipc_paths.drain(..) {
      if let Err(e) = std::fs::remove_file(&path) {
        if e.kind() != io::ErrorKind::NotFound {
          debug!(path = %path.display(), error = %e, "failed to remove socket file");
        }
      }
    }
  }
}

impl Drop for Socket {
  fn drop(&mut self) {
    if !self.closed {
      self.listeners.cancel();
      self.connections.cancel();
      self.remove_ipc_files();
    }
  }
}

enum Listener {
  Tcp(TcpListener),
  #[cfg(unix)]
  Unix(tokio::net::UnixListener),
}

impl Listener {
  async fn accept(&self) -> io::Result<(BoxedStream, String)> {
    match self {
      Listener::Tcp(listener) => {
        let (stream, peer) = listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok((Box::new(stream), peer.to_string()))
      }
      #[cfg(unix)]
      Listener::Unix(listener) => {
        let (stream, _) = listener.accept().await?;
        Ok((Box::new(stream), "unix".to_string()))
      }
    }
  }
}

#[cfg(unix)]
fn bind_ipc(path: &std::path::Path) -> io::Result<Listener> {
  if path.exists() {
    std::fs::remove_file(path)?;
  }
  Ok(Listener::Unix(tokio::net::UnixListener::bind(path)?))
}

#[cfg(not(unix))]
fn bind_ipc(_path: &std::path::Path) -> io::Result<Listener> {
  Err(io::Error::new(
    io::ErrorKind::Unsupported,
    "ipc transport requires Unix domain sockets",
  ))
}

async fn dial(address: &Address) -> io::Result<BoxedStream> {
  match address {
    Address::Tcp { host, port } => {
      let stream = TcpStream::connect((host.as_str(), *port)).await?;
      stream.set_nodelay(true)?;
      Ok(Box::new(stream))
    }
    #[cfg(unix)]
    Address::Ipc(path) => Ok(Box::new(tokio::net::UnixStream::connect(path).await?)),
    #[cfg(not(unix))]
    Address::Ipc(_) => Err(io::Error::new(
      io::ErrorKind::Unsupported,
      "ipc transport requires Unix domain sockets",
    )),
  }
}

/// Runs one peer connection until it closes or `token` fires.
async fn serve(shared: Arc<Shared>, stream: BoxedStream, token: CancellationToken) {
  let (read, write) = tokio::io::split(stream);
  let mut reader = FramedRead::new(read, shared.codec());
  let mut writer = FramedWrite::new(write, shared.codec());

  if shared.kind.is_sender() {
    let (queue, mut pending) = mpsc::channel(shared.options.send_queue.max(1));
    let id = shared.register(Some(queue));
    loop {
      tokio::select! {
        _ = token.cancelled() => break,
        frame = pending.recv() => match frame {
          Some(frame) => {
            if let Err(e) = writer.send(frame).await {
              debug!(kind = %shared.kind, error = %e, "peer write failed");
              break;
            }
          }
          None => break,
        },
        incoming = reader.next() => {
          if !matches!(incoming, Some(Ok(_))) {
            break;
          }
        }
      }
    }
    shared.unregister(id);
    if let Err(e) = SinkExt::<Bytes>::close(&mut writer).await {
      debug!(kind = %shared.kind, error = %e, "peer shutdown failed");
    }
  } else {
    let id = shared.register(None);
    loop {
      let frame = tokio::select! {
        _ = token.cancelled() => break,
        incoming = reader.next() => match incoming {
          Some(Ok(frame)) => frame.freeze(),
          Some(Err(e)) => {
            debug!(kind = %shared.kind, error = %e, "peer read failed");
            break;
          }
          None => break,
        },
      };
      if !shared.subscribed(&frame) {
        continue;
      }
      let delivered = tokio::select! {
        _ = token.cancelled() => false,
        sent = shared.inbox.send(frame) => sent.is_ok(),
      };
      if !delivered {
        break;
      }
    }
    shared.unregister(id);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn endpoint(url: &str) -> Endpoint {
    Endpoint::parse(url).unwrap()
  }

  #[tokio::test]
  async fn test_push_pull_over_tcp() {
    let context = Context::default();
    let mut pull = context.socket(SocketKind::Pull);
    pull.bind(&endpoint("zpull://127.0.0.1:0")).await.unwrap();
    let bound = pull.local_addrs()[0].replace("tcp://", "zpush://");

    let mut push = context.socket(SocketKind::Push);
    push.connect(&endpoint(&bound)).unwrap();
    for i in 0..5u8 {
      push.send(Bytes::from(vec![i])).await.unwrap();
    }
    for i in 0..5u8 {
      assert_eq!(pull.recv().await.unwrap(), Bytes::from(vec![i]));
    }
    push.close().await;
    pull.close().await;
  }

  #[tokio::test]
  async fn test_sub_filters_by_topic() {
    let context = Context::default();
    let mut publisher = context.socket(SocketKind::Pub);
    publisher.bind(&endpoint("zpub://127.0.0.1:0")).await.unwrap();
    let bound = publisher.local_addrs()[0].replace("tcp://", "zsub://");

    let mut subscriber = context.socket(SocketKind::Sub);
    subscriber.subscribe(Bytes::from_static(b"keep")).unwrap();
    subscriber.connect(&endpoint(&bound)).unwrap();
    publisher
      .wait_for_peers(1, Duration::from_secs(5))
      .await
      .unwrap();

    publisher.send(Bytes::from_static(b"drop-1")).await.unwrap();
    publisher.send(Bytes::from_static(b"keep-2")).await.unwrap();
    assert_eq!(subscriber.recv().await.unwrap(), Bytes::from_static(b"keep-2"));
    publisher.close().await;
    subscriber.close().await;
  }

  #[tokio::test]
  async fn test_unsupported_operations() {
    let context = Context::default();
    let mut pull = context.socket(SocketKind::Pull);
    assert!(matches!(
      pull.send(Bytes::new()).await,
      Err(ChannelError::Unsupported { kind: SocketKind::Pull, .. })
    ));
    assert!(matches!(
      pull.subscribe(Bytes::new()),
      Err(ChannelError::Unsupported { .. })
    ));
    let mut push = context.socket(SocketKind::Push);
    assert!(matches!(
      push.recv().await,
      Err(ChannelError::Unsupported { .. })
    ));
  }

  #[tokio::test]
  async fn test_wait_for_peers_times_out() {
    let context = Context::default();
    let mut pull = context.socket(SocketKind::Pull);
    pull.bind(&endpoint("zpull://127.0.0.1:0")).await.unwrap();
    let result = pull.wait_for_peers(1, Duration::from_millis(50)).await;
    assert!(matches!(
      result,
      Err(ChannelError::PeerTimeout {
        expected: 1,
        connected: 0
      })
    ));
  }

  #[tokio::test]
  async fn test_closed_socket_rejects_sends() {
    let context = Context::default();
    let mut push = context.socket(SocketKind::Push);
    push.close().await;
    push.close().await;
    assert!(matches!(
      push.send(Bytes::new()).await,
      Err(ChannelError::Closed)
    ));
  }

  #[tokio::test]
  async fn test_context_shutdown_unblocks_push() {
    let context = Context::default();
    let mut push = context.socket(SocketKind::Push);
    let stopper = context.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(20)).await;
      stopper.shutdown();
    });
    assert!(matches!(
      push.send(Bytes::from_static(b"x")).await,
      Err(ChannelError::Closed)
    ));
  }
}
