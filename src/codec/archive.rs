//! Reading tar archives as entry and sample streams.
//!
//! The `tar` crate is synchronous, so the archive is decoded on a blocking thread that
//! reads the async [`ByteSource`] through a [`SyncIoBridge`] and forwards each regular
//! file through a bounded channel.

use super::grouper::{CodecConfig, Grouper};
use crate::error::Error;
use crate::opener::ByteSource;
use crate::sample::SampleStream;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::io::Read;
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_util::io::SyncIoBridge;
use tracing::error;

const ENTRY_BUFFER: usize = 16;

/// One regular file of an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
  /// Path inside the archive.
  pub name: String,
  /// File contents.
  pub data: Bytes,
}

/// Stream of archive entries.
pub type EntryStream = Pin<Box<dyn Stream<Item = Result<Entry, Error>> + Send>>;

fn decode_entries<R: Read>(reader: R, tx: &mpsc::Sender<std::io::Result<Entry>>) -> std::io::Result<()> {
  let mut archive = tar::Archive::new(reader);
  for entry in archive.entries()? {
    let mut entry = entry?;
    if !entry.header().entry_type().is_file() {
      continue;
    }
    let name = entry.path()?.to_string_lossy().into_owned();
    let mut data = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
    entry.read_to_end(&mut data)?;
    let entry = Entry {
      name,
      data: Bytes::from(data),
    };
    if tx.blocking_send(Ok(entry)).is_err() {
      // receiver went away
      return Ok(());
    }
  }
  // drain trailing padding
  std::io::copy(&mut archive.into_inner(), &mut std::io::sink())?;
  Ok(())
}

/// Streams the regular files of the archive in `source`, in archive order.
///
/// Directories, links and other special entries are skipped. When the source has a
/// helper process, its exit status is checked after the last entry.
pub fn read_entries(source: ByteSource) -> EntryStream {
  let locator = source.locator().to_string();
  let (reader, ticket) = source.into_parts();

  Box::pin(async_stream::stream! {
    let (tx, mut rx) = mpsc::channel::<std::io::Result<Entry>>(ENTRY_BUFFER);
    let bridge = SyncIoBridge::new(reader);
    let handle = tokio::task::spawn_blocking(move || {
      if let Err(e) = decode_entries(bridge, &tx) {
        let _ = tx.blocking_send(Err(e));
      }
    });

    let mut failed = false;
    while let Some(item) = rx.recv().await {
      match item {
        Ok(entry) => yield Ok(entry),
        Err(source) => {
          failed = true;
          error!(locator = %locator, error = %source, "failed to read archive");
          yield Err(Error::Archive { locator: locator.clone(), source });
          break;
        }
      }
    }
    drop(rx);

    if let Err(join) = handle.await {
      failed = true;
      yield Err(Error::Component(format!("archive reader for '{locator}' panicked: {join}")));
    }
    if let Some(ticket) = ticket {
      let waited = ticket.wait().await;
      if let (Err(e), false) = (waited, failed) {
        yield Err(e.into());
      }
    }
  })
}

/// Streams the samples stored in the archive in `source`.
pub fn read_samples(source: ByteSource, config: CodecConfig) -> SampleStream {
  Box::pin(async_stream::stream! {
    let mut grouper = match Grouper::new(&config) {
      Ok(grouper) => grouper,
      Err(e) => {
        yield Err(e.into());
        return;
      }
    };
    let mut entries = read_entries(source);
    while let Some(entry) = entries.next().await {
      match entry {
        Ok(Entry { name, data }) => {
          if let Some(sample) = grouper.push(&name, data) {
            yield Ok(sample);
          }
        }
        Err(e) => {
          // entries were complete when only the helper's exit status failed
          if !matches!(e, Error::Archive { .. }) {
            if let Some(sample) = grouper.finish() {
              yield Ok(sample);
            }
          }
          yield Err(e);
          return;
        }
      }
    }
    if let Some(sample) = grouper.finish() {
      yield Ok(sample);
    }
  })
}
