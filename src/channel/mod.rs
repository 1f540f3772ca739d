//! # Message Channels
//!
//! Samples travel between processes as msgpack frames over lightweight message sockets.
//! A URL such as `zpush://trainer-0:7880` or `zrsub+ipc:///tmp/feed.sock` selects the
//! socket kind, whether this end binds or connects, and the transport.
//!
//! - [`Connection`]: one socket attached to one or more URLs of the same topology
//! - [`FanoutDistributor`]: one connection per destination with a selection policy
//! - [`ChannelProducer`]: a pipeline source reading from a connection until EOF

mod channel_producer;
mod connection;
mod fanout;
mod frame;
mod scheme;
mod socket;

pub use channel_producer::ChannelProducer;
pub use connection::{Connection, ConnectionOptions, expand_urls};
pub use fanout::{FanoutDistributor, FanoutOptions, FanoutPolicy};
pub use frame::Frame;
pub use scheme::{Address, Endpoint, Scheme, SocketKind, Topology, Transport, is_channel_url};
pub use socket::{Context, Socket, SocketOptions};

#[cfg(test)]
mod connection_test;
