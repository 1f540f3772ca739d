//! # Sinks
//!
//! Destinations at the end of a pipeline: tar archives ([`TarWriter`]) and message
//! channels, both behind the [`SampleSink`] trait, and [`SinkConsumer`] which drives
//! any sink from a sample stream.

mod sink;
mod sink_consumer;
mod tar_writer;

pub use sink::SampleSink;
pub use sink_consumer::SinkConsumer;
pub use tar_writer::{TarWriter, WriterConfig, WriterStats};
