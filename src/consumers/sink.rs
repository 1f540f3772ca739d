use crate::channel::{Connection, FanoutDistributor};
use crate::error::Result;
use crate::sample::Sample;
use async_trait::async_trait;

/// A destination for samples.
///
/// `finish` flushes and releases the destination; after it, further writes fail or are
/// lost. Calling it twice is harmless.
#[async_trait]
pub trait SampleSink: Send {
  /// Writes one sample.
  async fn write(&mut self, sample: Sample) -> Result<()>;

  /// Flushes and releases the destination.
  async fn finish(&mut self) -> Result<()>;
}

#[async_trait]
impl<S: SampleSink + ?Sized> SampleSink for Box<S> {
  async fn write(&mut self, sample: Sample) -> Result<()> {
    (**self).write(sample).await
  }

  async fn finish(&mut self) -> Result<()> {
    (**self).finish().await
  }
}

/// Sends every sample over the connection; `finish` sends the end-of-stream marker
/// and closes.
#[async_trait]
impl SampleSink for Connection {
  async fn write(&mut self, sample: Sample) -> Result<()> {
    self.send(&sample).await
  }

  async fn finish(&mut self) -> Result<()> {
    if self.is_closed() {
      return Ok(());
    }
    let eof = self.send_eof().await;
    self.close().await;
    eof
  }
}

/// Routes every sample to one destination; `finish` broadcasts the end-of-stream
/// marker and closes all destinations.
#[async_trait]
impl SampleSink for FanoutDistributor {
  async fn write(&mut self, sample: Sample) -> Result<()> {
    self.send(&sample).await.map(|_| ())
  }

  async fn finish(&mut self) -> Result<()> {
    if self.is_closed() {
      return Ok(());
    }
    let eof = self.send_eof().await;
    self.close().await;
    eof
  }
}
