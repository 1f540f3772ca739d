//! # Sample Codec
//!
//! Archives store a sample as consecutive entries sharing a key: `000001.jpg`,
//! `000001.cls`, `000002.jpg`, ... This module turns such entry streams into
//! [`Sample`](crate::Sample) streams.

mod archive;
mod grouper;
mod keys;

pub use archive::{Entry, EntryStream, read_entries, read_samples};
pub use grouper::{CodecConfig, DEFAULT_SKIP_META, Grouper, group_by_keys};
pub use keys::KeySplitter;
