//! # Byte Stream Opener
//!
//! Turns a locator into an async byte stream.
//!
//! | Locator | Opened as |
//! |---|---|
//! | `-` | stdin / stdout |
//! | `file:<path>`, `file://<path>`, `<path>` | local file |
//! | `pipe:<command>` | stdout / stdin of `sh -c <command>` |
//! | `<scheme>:...` | command from the [`HandlerRegistry`] |
//!
//! Reads detect gzip by its magic bytes and decompress transparently. Writes compress
//! when the locator ends in `gz` unless told otherwise.
//!
//! Helper processes are owned by the opener's [`PipeManager`]. Closing a
//! [`ByteSource`] or [`ByteSink`] waits on its helper and surfaces a nonzero exit as a
//! [`StreamOpenError::CommandFailed`] for that locator.

mod handlers;
mod pipes;

pub use handlers::{CommandTemplate, HandlerRegistry};
pub use pipes::{PipeManager, PipeTicket};

use crate::error::StreamOpenError;
use async_compression::tokio::bufread::GzipDecoder;
use async_compression::tokio::write::GzipEncoder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter, ReadBuf};
use tracing::{debug, warn};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

type BoxReader = Pin<Box<dyn AsyncRead + Send>>;
type BoxWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// How a locator is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
  /// `r`
  Read,
  /// `w`
  Write,
  /// `rb`
  ReadBinary,
  /// `wb`
  WriteBinary,
}

impl OpenMode {
  /// True for the read modes.
  pub fn is_read(self) -> bool {
    matches!(self, OpenMode::Read | OpenMode::ReadBinary)
  }
}

impl FromStr for OpenMode {
  type Err = StreamOpenError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "r" => Ok(OpenMode::Read),
      "w" => Ok(OpenMode::Write),
      "rb" => Ok(OpenMode::ReadBinary),
      "wb" => Ok(OpenMode::WriteBinary),
      other => Err(StreamOpenError::BadMode(other.to_string())),
    }
  }
}

/// Serializable opener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenerConfig {
  /// Accept `pipe:` locators.
  pub allow_pipe: bool,
  /// Start from the built-in `http`/`https`/`gs`/`s3` handlers.
  pub default_handlers: bool,
  /// Additional or overriding handlers, keyed by scheme.
  pub handlers: BTreeMap<String, CommandTemplate>,
}

impl Default for OpenerConfig {
  fn default() -> Self {
    Self {
      allow_pipe: true,
      default_handlers: true,
      handlers: BTreeMap::new(),
    }
  }
}

impl OpenerConfig {
  /// Enables or disables `pipe:` locators.
  #[must_use]
  pub fn with_allow_pipe(mut self, allow: bool) -> Self {
    self.allow_pipe = allow;
    self
  }

  /// Registers a handler for `scheme`.
  #[must_use]
  pub fn with_handler(mut self, scheme: impl Into<String>, template: CommandTemplate) -> Self {
    self.handlers.insert(scheme.into(), template);
    self
  }
}

/// Opens locators as async byte streams.
///
/// Cloning shares the handler registry and the pipe manager.
#[derive(Debug, Clone)]
pub struct Opener {
  handlers: Arc<HandlerRegistry>,
  pipes: PipeManager,
  allow_pipe: bool,
}

impl Default for Opener {
  fn default() -> Self {
    Self {
      handlers: Arc::new(HandlerRegistry::default()),
      pipes: PipeManager::new(),
      allow_pipe: true,
    }
  }
}

enum Target<'a> {
  Stdio,
  File(&'a str),
  Pipe(&'a str),
  Handler(&'a str),
}

/// Scheme prefix of a locator. Single letters are not schemes, so `C:\data` stays a path.
fn scheme_of(locator: &str) -> Option<&str> {
  let (scheme, _) = locator.split_once(':')?;
  let mut chars = scheme.chars();
  let first = chars.next()?;
  let valid = first.is_ascii_alphabetic()
    && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '.' | '-'));
  (valid && scheme.len() > 1).then_some(scheme)
}

fn classify(locator: &str) -> Target<'_> {
  if locator == "-" {
    return Target::Stdio;
  }
  match scheme_of(locator) {
    Some("file") => {
      let rest = &locator["file:".len()..];
      Target::File(rest.strip_prefix("//").unwrap_or(rest))
    }
    Some("pipe") => Target::Pipe(&locator["pipe:".len()..]),
    Some(scheme) => Target::Handler(scheme),
    None => Target::File(locator),
  }
}

impl Opener {
  /// Builds an opener from settings, validating every handler template.
  pub fn new(config: OpenerConfig) -> Result<Self, StreamOpenError> {
    let mut handlers = if config.default_handlers {
      HandlerRegistry::default()
    } else {
      HandlerRegistry::empty()
    };
    for (scheme, template) in config.handlers {
      handlers.register(scheme, template)?;
    }
    Ok(Self {
      handlers: Arc::new(handlers),
      pipes: PipeManager::new(),
      allow_pipe: config.allow_pipe,
    })
  }

  /// Replaces the handler registry.
  #[must_use]
  pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
    self.handlers = Arc::new(handlers);
    self
  }

  /// Uses a caller-owned pipe manager.
  #[must_use]
  pub fn with_pipe_manager(mut self, pipes: PipeManager) -> Self {
    self.pipes = pipes;
    self
  }

  /// The pipe manager tracking this opener's helper processes.
  pub fn pipes(&self) -> &PipeManager {
    &self.pipes
  }

  /// The handler registry.
  pub fn handlers(&self) -> &HandlerRegistry {
    &self.handlers
  }

  /// Opens `locator` in the given mode.
  pub async fn open(&self, locator: &str, mode: OpenMode) -> Result<Opened, StreamOpenError> {
    if mode.is_read() {
      self.open_read(locator).await.map(Opened::Read)
    } else {
      self.open_write(locator, None).await.map(Opened::Write)
    }
  }

  /// Opens `locator` for reading.
  pub async fn open_read(&self, locator: &str) -> Result<ByteSource, StreamOpenError> {
    let io_err = |source| StreamOpenError::Io {
      locator: locator.to_string(),
      source,
    };
    let (raw, ticket): (BoxReader, Option<PipeTicket>) = match classify(locator) {
      Target::Stdio => (Box::pin(tokio::io::stdin()), None),
      Target::File(path) => {
        let file = tokio::fs::File::open(path).await.map_err(io_err)?;
        (Box::pin(file), None)
      }
      Target::Pipe(command) => {
        if !self.allow_pipe {
          return Err(StreamOpenError::PipeDisabled {
            locator: locator.to_string(),
          });
        }
        self.reap();
        let (stdout, ticket) = self.pipes.spawn_reader(command)?;
        (Box::pin(stdout), Some(ticket))
      }
      Target::Handler(scheme) => {
        let command = self.handlers.command(scheme, locator, false)?;
        self.reap();
        let (stdout, ticket) = self.pipes.spawn_reader(&command)?;
        (Box::pin(stdout), Some(ticket))
      }
    };
    debug!(locator = %locator, "opened for reading");

    let mut buffered = BufReader::new(raw);
    let peeked = buffered
      .fill_buf()
      .await
      .map(|head| head.starts_with(&GZIP_MAGIC));
    let gzipped = match peeked {
      Ok(gzipped) => gzipped,
      Err(source) => {
        drop(buffered);
        if let Some(ticket) = ticket {
          ticket.wait().await?;
        }
        return Err(io_err(source));
      }
    };
    let reader: BoxReader = if gzipped {
      let mut decoder = GzipDecoder::new(buffered);
      decoder.multiple_members(true);
      Box::pin(decoder)
    } else {
      Box::pin(buffered)
    };

    Ok(ByteSource {
      locator: locator.to_string(),
      reader,
      ticket,
    })
  }

  /// Opens `locator` for writing.
  ///
  /// `compress` forces gzip on or off; by default locators ending in `gz` are
  /// compressed.
  pub async fn open_write(
    &self,
    locator: &str,
    compress: Option<bool>,
  ) -> Result<ByteSink, StreamOpenError> {
    let (raw, ticket): (BoxWriter, Option<PipeTicket>) = match classify(locator) {
      Target::Stdio => (Box::pin(tokio::io::stdout()), None),
      Target::File(path) => {
        let file = tokio::fs::File::create(path)
          .await
          .map_err(|source| StreamOpenError::Io {
            locator: locator.to_string(),
            source,
          })?;
        (Box::pin(BufWriter::new(file)), None)
      }
      Target::Pipe(command) => {
        if !self.allow_pipe {
          return Err(StreamOpenError::PipeDisabled {
            locator: locator.to_string(),
          });
        }
        self.reap();
        let (stdin, ticket) = self.pipes.spawn_writer(command)?;
        (Box::pin(stdin), Some(ticket))
      }
      Target::Handler(scheme) => {
        let command = self.handlers.command(scheme, locator, true)?;
        self.reap();
        let (stdin, ticket) = self.pipes.spawn_writer(&command)?;
        (Box::pin(stdin), Some(ticket))
      }
    };

    let compress = compress.unwrap_or_else(|| locator.ends_with("gz"));
    debug!(locator = %locator, compress, "opened for writing");
    let writer: BoxWriter = if compress {
      Box::pin(GzipEncoder::new(raw))
    } else {
      raw
    };

    Ok(ByteSink {
      locator: locator.to_string(),
      writer,
      ticket,
    })
  }

  fn reap(&self) {
    for failure in self.pipes.reap() {
      warn!(error = %failure, "helper process of an abandoned stream failed");
    }
  }
}

/// Result of [`Opener::open`].
pub enum Opened {
  /// Opened in a read mode.
  Read(ByteSource),
  /// Opened in a write mode.
  Write(ByteSink),
}

/// Readable byte stream for one locator.
pub struct ByteSource {
  locator: String,
  reader: BoxReader,
  ticket: Option<PipeTicket>,
}

impl ByteSource {
  /// The locator this stream was opened from.
  pub fn locator(&self) -> &str {
    &self.locator
  }

  /// Splits into the reader and the helper ticket, for callers that read on a
  /// blocking thread and wait on the helper afterwards.
  pub fn into_parts(self) -> (Pin<Box<dyn AsyncRead + Send>>, Option<PipeTicket>) {
    (self.reader, self.ticket)
  }

  /// Releases the stream and waits on its helper process, if any.
  pub async fn close(self) -> Result<(), StreamOpenError> {
    drop(self.reader);
    match self.ticket {
      Some(ticket) => ticket.wait().await,
      None => Ok(()),
    }
  }
}

impl AsyncRead for ByteSource {
  fn poll_read(
    mut self: Pin<&mut Self>,
    cx: &mut Context<'_>,
    buf: &mut ReadBuf<'_>,
  ) -> Poll<std::io::Result<()>> {
    self.reader.as_mut().poll_read(cx, buf)
  }
}

/// Writable byte stream for one locator.
pub struct ByteSink {
  locator: String,
  writer: BoxWriter,
  ticket: Option<PipeTicket>,
}

impl ByteSink {
  /// The locator this stream was opened for.
  pub fn locator(&self) -> &str {
    &self.locator
  }

  /// Flushes, finishes compression, releases the stream and waits on its helper.
  ///
  /// A failing helper takes precedence over the flush error it usually causes.
  pub async fn close(self) -> Result<(), StreamOpenError> {
    let ByteSink {
      locator,
      mut writer,
      ticket,
    } = self;
    let flushed = writer.shutdown().await;
    drop(writer);
    if let Some(ticket) = ticket {
      ticket.wait().await?;
    }
    flushed.map_err(|source| StreamOpenError::Io { locator, source })
  }
}

impl AsyncWrite for ByteSink {
  fn poll_write(
    mut self: Pin<&mut Self>,
    cx: &mut Context<'_>,
    buf: &[u8],
  ) -> Poll<std::io::Result<usize>> {
    self.writer.as_mut().poll_write(cx, buf)
  }

  fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
    self.writer.as_mut().poll_flush(cx)
  }

  fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
    self.writer.as_mut().poll_shutdown(cx)
  }
}
