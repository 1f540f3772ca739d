use super::sink::SampleSink;
use crate::error::{Error, Result, ValidationError};
use crate::opener::{ByteSink, Opener};
use crate::sample::{Sample, SampleMapper, is_meta};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Entry metadata and output settings for a [`TarWriter`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
  /// Also write meta fields other than `__key__`.
  pub keep_meta: bool,
  /// Owner name of every entry.
  pub user: String,
  /// Group name of every entry.
  pub group: String,
  /// Permission bits of every entry.
  pub mode: u32,
  /// Modification time of every entry, seconds since the epoch.
  pub mtime: u64,
  /// Forces gzip on or off; by default locators ending in `gz` are compressed.
  pub compress: Option<bool>,
}

impl Default for WriterConfig {
  fn default() -> Self {
    Self {
      keep_meta: false,
      user: "bigdata".to_string(),
      group: "bigdata".to_string(),
      mode: 0o444,
      mtime: 0,
      compress: None,
    }
  }
}

impl WriterConfig {
  /// Writes meta fields too.
  #[must_use]
  pub fn with_keep_meta(mut self, keep_meta: bool) -> Self {
    self.keep_meta = keep_meta;
    self
  }

  /// Sets the entry owner and group.
  #[must_use]
  pub fn with_owner(mut self, user: impl Into<String>, group: impl Into<String>) -> Self {
    self.user = user.into();
    self.group = group.into();
    self
  }

  /// Sets the entry modification time.
  #[must_use]
  pub fn with_mtime(mut self, mtime: u64) -> Self {
    self.mtime = mtime;
    self
  }

  /// Forces compression on or off.
  #[must_use]
  pub fn with_compress(mut self, compress: bool) -> Self {
    self.compress = Some(compress);
    self
  }
}

/// Counters reported by [`TarWriter::finish`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
  /// Samples written.
  pub samples: u64,
  /// Payload bytes written, excluding headers and padding.
  pub bytes: u64,
}

/// Writes samples as consecutive tar entries named `<key>.<field>`.
///
/// Fields are written in sorted name order so identical samples produce identical
/// archives. Entries are staged in memory one sample at a time and then written to
/// the underlying [`ByteSink`].
pub struct TarWriter {
  locator: String,
  config: WriterConfig,
  encoder: Option<SampleMapper>,
  builder: tar::Builder<Vec<u8>>,
  sink: Option<ByteSink>,
  stats: WriterStats,
}

impl std::fmt::Debug for TarWriter {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TarWriter")
      .field("locator", &self.locator)
      .field("config", &self.config)
      .field("encoder", &self.encoder.is_some())
      .field("stats", &self.stats)
      .field("finished", &self.sink.is_none())
      .finish()
  }
}

impl TarWriter {
  /// Opens `locator` for writing through `opener`.
  pub async fn create(locator: &str, config: WriterConfig, opener: &Opener) -> Result<Self> {
    let sink = opener.open_write(locator, config.compress).await?;
    Ok(Self::from_sink(sink, config))
  }

  /// Writes into an already opened sink.
  pub fn from_sink(sink: ByteSink, config: WriterConfig) -> Self {
    Self {
      locator: sink.locator().to_string(),
      config,
      encoder: None,
      builder: tar::Builder::new(Vec::new()),
      sink: Some(sink),
      stats: WriterStats::default(),
    }
  }

  /// Applies `encoder` to every sample before it is validated and written.
  #[must_use]
  pub fn with_encoder<F>(mut self, encoder: F) -> Self
  where
    F: Fn(Sample) -> Result<Sample> + Send + Sync + 'static,
  {
    self.encoder = Some(Arc::new(encoder));
    self
  }

  /// The locator being written.
  pub fn locator(&self) -> &str {
    &self.locator
  }

  /// Counters so far.
  pub fn stats(&self) -> WriterStats {
    self.stats
  }

  /// Writes one sample and returns the number of payload bytes written.
  ///
  /// Fails with [`ValidationError::NotBytes`] before writing anything if a field that
  /// would be written has no byte representation.
  pub async fn write_sample(&mut self, sample: &Sample) -> Result<u64> {
    let sample = match &self.encoder {
      Some(encoder) => Cow::Owned(encoder(sample.clone())?),
      None => Cow::Borrowed(sample),
    };
    let entries = self.entries(&sample)?;

    let mut total = 0u64;
    for (field, data) in entries {
      let mut header = self.header(data.len() as u64)?;
      let path = format!("{}.{}", sample.key(), field);
      self
        .builder
        .append_data(&mut header, &path, data)
        .map_err(|source| self.write_error("append", source))?;
      total += data.len() as u64;
    }
    self.drain().await?;

    self.stats.samples += 1;
    self.stats.bytes += total;
    Ok(total)
  }

  /// Fields to write, sorted by name, after checking they all map to bytes.
  fn entries<'a>(&self, sample: &'a Sample) -> Result<Vec<(&'a str, &'a [u8])>> {
    let mut entries = Vec::with_capacity(sample.len());
    for (name, value) in sample.fields() {
      if is_meta(name) && !self.config.keep_meta {
        continue;
      }
      let Some(bytes) = value.as_bytes() else {
        return Err(
          ValidationError::NotBytes {
            key: sample.key().to_string(),
            field: name.to_string(),
            kind: value.kind(),
          }
          .into(),
        );
      };
      entries.push((name, bytes));
    }
    entries.sort_by(|a, b| a.0.cmp(b.0));
    Ok(entries)
  }

  fn header(&self, size: u64) -> Result<tar::Header> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(size);
    header.set_mode(self.config.mode);
    header.set_mtime(self.config.mtime);
    header.set_uid(0);
    header.set_gid(0);
    header
      .set_username(&self.config.user)
      .map_err(|source| self.write_error("header", source))?;
    header
      .set_groupname(&self.config.group)
      .map_err(|source| self.write_error("header", source))?;
    Ok(header)
  }

  /// Moves staged archive bytes to the sink.
  async fn drain(&mut self) -> Result<()> {
    let staged = std::mem::take(self.builder.get_mut());
    if staged.is_empty() {
      return Ok(());
    }
    let Some(sink) = self.sink.as_mut() else {
      return Err(self.write_error("write", closed()));
    };
    let written = sink.write_all(&staged).await;
    written.map_err(|source| self.write_error("write", source))
  }

  /// Writes the archive trailer, closes the sink and returns the counters.
  /// Later calls return the same counters without writing.
  pub async fn finish(&mut self) -> Result<WriterStats> {
    if self.sink.is_none() {
      return Ok(self.stats);
    }
    self
      .builder
      .finish()
      .map_err(|source| self.write_error("finish", source))?;
    self.drain().await?;
    if let Some(sink) = self.sink.take() {
      sink.close().await?;
    }
    debug!(
      locator = %self.locator,
      samples = self.stats.samples,
      bytes = self.stats.bytes,
      "archive written"
    );
    Ok(self.stats)
  }

  fn write_error(&self, operation: &'static str, source: std::io::Error) -> Error {
    Error::Write {
      locator: self.locator.clone(),
      operation,
      source,
    }
  }
}

fn closed() -> std::io::Error {
  std::io::Error::new(std::io::ErrorKind::BrokenPipe, "writer already finished")
}

#[async_trait]
impl SampleSink for TarWriter {
  async fn write(&mut self, sample: Sample) -> Result<()> {
    self.write_sample(&sample).await.map(|_| ())
  }

  async fn finish(&mut self) -> Result<()> {
    TarWriter::finish(self).await.map(|_| ())
  }
}
