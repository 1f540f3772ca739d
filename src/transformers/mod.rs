//! # Transformers
//!
//! Stream stages between a producer and a consumer.

mod shuffle;

pub use shuffle::{Reservoir, ShuffleConfig, ShuffleTransformer};
