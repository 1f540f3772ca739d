//! # Shard Sets
//!
//! A dataset is a list of shard archives named by one locator pattern, e.g.
//! `gs://bucket/train-{000000..000146}.tar#1000,1999`. The pattern is brace expanded
//! into the shard list, which may be shuffled once; the optional fragment selects a
//! window of global sample indices so that a reader can resume part way through.

mod braces;
mod shard_producer;
mod spec;

pub use braces::brace_expand;
pub use shard_producer::{ShardConfig, ShardProducer};
pub use spec::{SampleRange, ShardSpec};

#[cfg(test)]
mod shard_producer_test;
