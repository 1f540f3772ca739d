//! # shardweave
//!
//! Async streaming of sharded tar datasets.
//!
//! A dataset is a set of POSIX tar archives ("shards") whose entries are grouped by key
//! into samples. shardweave reads shard sets from local paths, helper commands and
//! `pipe:` locators, shuffles them with a bounded reservoir, writes them back as
//! archives, and moves them between processes over push/pull and pub/sub sockets.
//!
//! Every stage is a [`Producer`], [`Transformer`] or [`Consumer`] over a
//! [`SampleStream`], connected with the typestate [`PipelineBuilder`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use shardweave::PipelineBuilder;
//! use shardweave::consumers::{SinkConsumer, TarWriter, WriterConfig};
//! use shardweave::opener::Opener;
//! use shardweave::shards::{ShardConfig, ShardProducer};
//! use shardweave::transformers::{ShuffleConfig, ShuffleTransformer};
//!
//! # async fn run() -> shardweave::Result<()> {
//! let opener = Opener::default();
//! let shards = ShardProducer::new(
//!   "data/train-{000000..000009}.tar",
//!   ShardConfig::default().with_shuffle(true, Some(0)),
//! )?;
//! let out = TarWriter::create("mixed.tar.gz", WriterConfig::default(), &opener).await?;
//!
//! PipelineBuilder::new()
//!   .producer(shards)
//!   .transformer(ShuffleTransformer::new(ShuffleConfig::new(5000, 500)))
//!   .consumer(SinkConsumer::new(out))
//!   .run()
//!   .await?;
//! # Ok(())
//! # }
//! ```
//!
//! The library logs through `tracing` and never installs a subscriber.

#![deny(missing_docs)]

/// Error types and component error strategies.
pub mod error;
/// Samples and field values.
pub mod sample;

/// Input side of pipeline components.
pub mod input;
/// Output side of pipeline components.
pub mod output;
/// Producer trait.
pub mod producer;
/// Transformer trait.
pub mod transformer;
/// Consumer trait.
pub mod consumer;
/// Typestate pipeline builder.
pub mod pipeline;

/// Settings bundle loadable from JSON.
pub mod config;
/// Locator resolution to byte streams.
pub mod opener;
/// Tar entry decoding and key grouping.
pub mod codec;
/// Shard set patterns and the shard producer.
pub mod shards;
/// Sample transformers.
pub mod transformers;
/// Message sockets, connections and fan-out.
pub mod channel;
/// Sample sinks and the sink consumer.
pub mod consumers;
/// Opening sources and sinks by URL.
pub mod dispatch;

#[cfg(test)]
mod error_test;

pub use consumer::{Consumer, ConsumerConfig};
pub use error::{Error, ErrorAction, ErrorStrategy, Result};
pub use input::Input;
pub use output::Output;
pub use pipeline::{Pipeline, PipelineBuilder};
pub use producer::{Producer, ProducerConfig};
pub use sample::{Sample, SampleResult, SampleStream, Value};
pub use transformer::{Transformer, TransformerConfig};
