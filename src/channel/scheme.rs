//! Messaging URLs: `scheme[+transport]://location`.
//!
//! | scheme  | socket | side    |
//! |---------|--------|---------|
//! | zpush   | push   | connect |
//! | zpull   | pull   | bind    |
//! | zpub    | pub    | bind    |
//! | zsub    | sub    | connect |
//! | zrpush  | push   | bind    |
//! | zrpull  | pull   | connect |
//! | zrpub   | pub    | connect |
//! | zrsub   | sub    | bind    |
//!
//! The transport defaults to `tcp`; `+ipc` selects a Unix domain socket at the path
//! following `://`.

use crate::error::ChannelConfigError;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Socket roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketKind {
  /// Load-balances frames over connected pull peers.
  Push,
  /// Receives frames from push peers.
  Pull,
  /// Broadcasts frames to every subscriber.
  Pub,
  /// Receives broadcast frames matching its subscriptions.
  Sub,
}

impl SocketKind {
  /// True for kinds that send frames.
  pub fn is_sender(self) -> bool {
    matches!(self, SocketKind::Push | SocketKind::Pub)
  }

  /// True for kinds that receive frames.
  pub fn is_receiver(self) -> bool {
    !self.is_sender()
  }
}

impl fmt::Display for SocketKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      SocketKind::Push => "push",
      SocketKind::Pull => "pull",
      SocketKind::Pub => "pub",
      SocketKind::Sub => "sub",
    };
    f.write_str(name)
  }
}

/// Socket kind plus which side binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Topology {
  /// Socket kind.
  pub kind: SocketKind,
  /// True if the socket binds, false if it connects.
  pub bind: bool,
}

/// The eight messaging schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
  /// `zpush`
  ZPush,
  /// `zpull`
  ZPull,
  /// `zpub`
  ZPub,
  /// `zsub`
  ZSub,
  /// `zrpush`
  ZrPush,
  /// `zrpull`
  ZrPull,
  /// `zrpub`
  ZrPub,
  /// `zrsub`
  ZrSub,
}

impl Scheme {
  /// Every scheme, in table order.
  pub const ALL: [Scheme; 8] = [
    Scheme::ZPush,
    Scheme::ZPull,
    Scheme::ZPub,
    Scheme::ZSub,
    Scheme::ZrPush,
    Scheme::ZrPull,
    Scheme::ZrPub,
    Scheme::ZrSub,
  ];

  /// Scheme token as written in URLs.
  pub fn as_str(self) -> &'static str {
    match self {
      Scheme::ZPush => "zpush",
      Scheme::ZPull => "zpull",
      Scheme::ZPub => "zpub",
      Scheme::ZSub => "zsub",
      Scheme::ZrPush => "zrpush",
      Scheme::ZrPull => "zrpull",
      Scheme::ZrPub => "zrpub",
      Scheme::ZrSub => "zrsub",
    }
  }

  /// Socket kind and side for this scheme.
  pub fn topology(self) -> Topology {
    let (kind, bind) = match self {
      Scheme::ZPush => (SocketKind::Push, false),
      Scheme::ZPull => (SocketKind::Pull, true),
      Scheme::ZPub => (SocketKind::Pub, true),
      Scheme::ZSub => (SocketKind::Sub, false),
      Scheme::ZrPush => (SocketKind::Push, true),
      Scheme::ZrPull => (SocketKind::Pull, false),
      Scheme::ZrPub => (SocketKind::Pub, false),
      Scheme::ZrSub => (SocketKind::Sub, true),
    };
    Topology { kind, bind }
  }

  /// True for schemes whose sockets send.
  pub fn is_sink(self) -> bool {
    self.topology().kind.is_sender()
  }
}

impl FromStr for Scheme {
  type Err = ChannelConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Scheme::ALL
      .into_iter()
      .find(|scheme| scheme.as_str() == s)
      .ok_or_else(|| ChannelConfigError::UnknownScheme(s.to_string()))
  }
}

impl fmt::Display for Scheme {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Byte transport under a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
  /// TCP, `host:port`.
  Tcp,
  /// Unix domain socket, a filesystem path.
  Ipc,
}

impl FromStr for Transport {
  type Err = ChannelConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "tcp" => Ok(Transport::Tcp),
      "ipc" => Ok(Transport::Ipc),
      other => Err(ChannelConfigError::UnknownTransport(other.to_string())),
    }
  }
}

/// Where a socket binds or connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
  /// TCP host and port. A host of `*` binds every interface.
  Tcp {
    /// Host name or address, without IPv6 brackets.
    host: String,
    /// Port; 0 lets the OS choose when binding.
    port: u16,
  },
  /// Unix domain socket path.
  Ipc(PathBuf),
}

impl fmt::Display for Address {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Address::Tcp { host, port } if host.contains(':') => write!(f, "tcp://[{host}]:{port}"),
      Address::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
      Address::Ipc(path) => write!(f, "ipc://{}", path.display()),
    }
  }
}

/// A parsed messaging URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
  url: String,
  scheme: Scheme,
  transport: Transport,
  address: Address,
}

impl Endpoint {
  /// Parses `scheme[+transport]://location`.
  ///
  /// ```rust
  /// use shardweave::channel::{Endpoint, SocketKind};
  ///
  /// let endpoint = Endpoint::parse("zrsub+tcp://127.0.0.1:7880")?;
  /// assert_eq!(endpoint.topology().kind, SocketKind::Sub);
  /// assert!(endpoint.topology().bind);
  /// # Ok::<(), shardweave::error::ChannelConfigError>(())
  /// ```
  pub fn parse(url: &str) -> Result<Self, ChannelConfigError> {
    let malformed = || ChannelConfigError::MalformedUrl(url.to_string());
    let (head, location) = url.split_once("://").ok_or_else(malformed)?;
    let (scheme, transport) = match head.split_once('+') {
      Some((scheme, transport)) => (scheme.parse::<Scheme>()?, transport.parse::<Transport>()?),
      None => (head.parse::<Scheme>()?, Transport::Tcp),
    };
    let address = match transport {
      Transport::Ipc if location.is_empty() => return Err(malformed()),
      Transport::Ipc => Address::Ipc(PathBuf::from(location)),
      Transport::Tcp => {
        let netloc = location.split('/').next().unwrap_or_default();
        let (host, port) = split_host_port(netloc).ok_or_else(malformed)?;
        Address::Tcp { host, port }
      }
    };
    Ok(Self {
      url: url.to_string(),
      scheme,
      transport,
      address,
    })
  }

  /// The URL as given.
  pub fn url(&self) -> &str {
    &self.url
  }

  /// URL scheme.
  pub fn scheme(&self) -> Scheme {
    self.scheme
  }

  /// Byte transport.
  pub fn transport(&self) -> Transport {
    self.transport
  }

  /// Bind or connect address.
  pub fn address(&self) -> &Address {
    &self.address
  }

  /// Socket kind and side.
  pub fn topology(&self) -> Topology {
    self.scheme.topology()
  }
}

fn split_host_port(netloc: &str) -> Option<(String, u16)> {
  let (host, port) = match netloc.strip_prefix('[') {
    Some(rest) => {
      let (host, port) = rest.split_once("]:")?;
      (host, port)
    }
    None => netloc.rsplit_once(':')?,
  };
  if host.is_empty() {
    return None;
  }
  Some((host.to_string(), port.parse().ok()?))
}

/// Returns true if `url` starts with one of the messaging schemes.
pub fn is_channel_url(url: &str) -> bool {
  url
    .split_once("://")
    .map(|(head, _)| head.split('+').next().unwrap_or(head))
    .is_some_and(|scheme| scheme.parse::<Scheme>().is_ok())
}
