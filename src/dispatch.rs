//! # URL Dispatch
//!
//! Opens a sample source or sink from a single URL. Messaging URLs (`zpull://`,
//! `zsub+ipc://`, ...) become channel connections; everything else is a shard
//! locator read through the [`Opener`].
//!
//! ```rust,no_run
//! use shardweave::config::Settings;
//! use shardweave::consumers::SinkConsumer;
//! use shardweave::dispatch::{open_sink, open_source};
//! use shardweave::opener::Opener;
//! use shardweave::consumer::Consumer;
//!
//! # async fn run() -> shardweave::Result<()> {
//! let settings = Settings::default();
//! let opener = Opener::new(settings.opener.clone())?;
//! let source = open_source("data/train-{000..009}.tar", &settings, &opener).await?;
//! let sink = open_sink("zpush://worker-{0..3}:7880", &settings, &opener).await?;
//! SinkConsumer::new(sink).consume(source).await?;
//! # Ok(())
//! # }
//! ```

use crate::channel::{
  ChannelProducer, Connection, Endpoint, FanoutDistributor, SocketKind, expand_urls,
  is_channel_url,
};
use crate::config::Settings;
use crate::consumers::{SampleSink, TarWriter};
use crate::error::{ChannelConfigError, ChannelError, Result};
use crate::opener::Opener;
use crate::pipeline::PipelineBuilder;
use crate::sample::{Sample, SampleStream};
use crate::shards::ShardProducer;
use crate::transformers::ShuffleTransformer;
use async_trait::async_trait;
use tracing::info;

/// Socket kind the URL (after brace expansion) resolves to.
fn channel_kind(url: &str, settings: &Settings) -> Result<SocketKind> {
  let urls = expand_urls([url], settings.connection.noexpand);
  let first = urls.first().ok_or(ChannelConfigError::NoUrls)?;
  Ok(Endpoint::parse(first)?.topology().kind)
}

/// Opens `url` as a stream of samples.
///
/// Shard locators are read with `settings.shards`; messaging URLs must name a
/// receiving scheme. When `settings.shuffle` is set, samples pass through a
/// [`ShuffleTransformer`].
pub async fn open_source(url: &str, settings: &Settings, opener: &Opener) -> Result<SampleStream> {
  let builder = if is_channel_url(url) {
    let kind = channel_kind(url, settings)?;
    if !kind.is_receiver() {
      return Err(
        ChannelError::Unsupported {
          kind,
          operation: "reading samples",
        }
        .into(),
      );
    }
    let connection = Connection::open([url], settings.connection.clone()).await?;
    info!(url = %url, kind = %kind, "reading from channel");
    PipelineBuilder::new().producer(ChannelProducer::new(connection))
  } else {
    let producer = ShardProducer::new(url, settings.shards.clone())?.with_opener(opener.clone());
    info!(url = %url, shards = producer.locators().len(), "reading shards");
    PipelineBuilder::new().producer(producer)
  };

  let builder = match settings.shuffle {
    Some(shuffle) => builder.transformer(ShuffleTransformer::new(shuffle)),
    None => builder,
  };
  Ok(builder.into_stream())
}

/// Destination returned by [`open_sink`].
#[derive(Debug)]
pub enum Sink {
  /// A tar archive.
  Archive(TarWriter),
  /// One or more sending channels.
  Channels(FanoutDistributor),
}

/// Opens `url` as a sample destination.
///
/// Messaging URLs must name a sending scheme and are distributed per
/// `settings.fanout`; anything else is written as one archive.
pub async fn open_sink(url: &str, settings: &Settings, opener: &Opener) -> Result<Sink> {
  if is_channel_url(url) {
    let kind = channel_kind(url, settings)?;
    if !kind.is_sender() {
      return Err(
        ChannelError::Unsupported {
          kind,
          operation: "writing samples",
        }
        .into(),
      );
    }
    let distributor = FanoutDistributor::open(
      [url],
      settings.fanout.clone(),
      settings.connection.clone(),
    )
    .await?;
    info!(
      url = %url,
      destinations = distributor.channels().len(),
      policy = %distributor.policy(),
      "writing to channels"
    );
    return Ok(Sink::Channels(distributor));
  }
  let writer = TarWriter::create(url, settings.writer.clone(), opener).await?;
  info!(url = %url, "writing archive");
  Ok(Sink::Archive(writer))
}

#[async_trait]
impl SampleSink for Sink {
  async fn write(&mut self, sample: Sample) -> Result<()> {
    match self {
      Sink::Archive(writer) => SampleSink::write(writer, sample).await,
      Sink::Channels(distributor) => SampleSink::write(distributor, sample).await,
    }
  }

  async fn finish(&mut self) -> Result<()> {
    match self {
      Sink::Archive(writer) => SampleSink::finish(writer).await,
      Sink::Channels(distributor) => SampleSink::finish(distributor).await,
    }
  }
}
