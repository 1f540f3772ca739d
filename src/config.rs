//! # Settings
//!
//! One serializable bundle of every stage's configuration, loadable from JSON. Absent
//! fields take their defaults, so `{}` is a complete settings document.
//!
//! ```rust
//! use shardweave::config::Settings;
//!
//! let settings = Settings::from_json_str(r#"{
//!   "shards": { "shuffle": true, "seed": 7 },
//!   "shuffle": { "bufsize": 500, "initial": 50 },
//!   "fanout": { "policy": "round_robin" }
//! }"#)?;
//! assert_eq!(settings.shuffle.map(|s| s.bufsize), Some(500));
//! # Ok::<(), shardweave::Error>(())
//! ```

use crate::channel::{ConnectionOptions, FanoutOptions, FanoutPolicy};
use crate::consumers::WriterConfig;
use crate::error::{Error, Result};
use crate::opener::OpenerConfig;
use crate::shards::ShardConfig;
use crate::transformers::ShuffleConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for reading and writing sample streams.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
  /// Locator handling for archives.
  pub opener: OpenerConfig,
  /// Shard list and grouping settings for archive sources.
  pub shards: ShardConfig,
  /// Sample-level shuffle applied to sources; `None` disables it.
  pub shuffle: Option<ShuffleConfig>,
  /// Archive output settings.
  pub writer: WriterConfig,
  /// Messaging channel settings.
  pub connection: ConnectionOptions,
  /// Distribution settings for messaging sinks.
  pub fanout: FanoutOptions,
}

impl Settings {
  /// Parses settings from a JSON document and validates them.
  ///
  /// An unknown fan-out policy fails with
  /// [`ChannelConfigError::UnknownPolicy`](crate::error::ChannelConfigError::UnknownPolicy);
  /// other problems fail with [`Error::Settings`].
  pub fn from_json_str(json: &str) -> Result<Self> {
    let document: serde_json::Value =
      serde_json::from_str(json).map_err(|e| Error::Settings(e.to_string()))?;
    if let Some(policy) = document
      .pointer("/fanout/policy")
      .and_then(serde_json::Value::as_str)
    {
      policy.parse::<FanoutPolicy>()?;
    }
    let settings: Settings =
      serde_json::from_value(document).map_err(|e| Error::Settings(e.to_string()))?;
    settings.validate()?;
    Ok(settings)
  }

  /// Reads settings from a JSON file.
  pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    let json = tokio::fs::read_to_string(path)
      .await
      .map_err(|e| Error::Settings(format!("{}: {e}", path.display())))?;
    Self::from_json_str(&json)
  }

  /// Serializes the settings as pretty-printed JSON.
  pub fn to_json_string(&self) -> Result<String> {
    serde_json::to_string_pretty(self).map_err(|e| Error::Settings(e.to_string()))
  }

  /// Sets the sample shuffle.
  #[must_use]
  pub fn with_shuffle(mut self, shuffle: ShuffleConfig) -> Self {
    self.shuffle = Some(shuffle);
    self
  }

  /// Checks values that deserialize fine but cannot work.
  pub fn validate(&self) -> Result<()> {
    let socket = &self.connection.socket;
    if socket.send_queue == 0 || socket.recv_queue == 0 {
      return Err(Error::Settings(
        "socket send_queue and recv_queue must be > 0".to_string(),
      ));
    }
    if socket.max_frame_bytes == 0 {
      return Err(Error::Settings("socket max_frame_bytes must be > 0".to_string()));
    }
    if self.writer.mode > 0o7777 {
      return Err(Error::Settings(format!(
        "writer mode {:o} is not a permission mode",
        self.writer.mode
      )));
    }
    Ok(())
  }
}
