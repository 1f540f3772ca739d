//! # Pipeline Builder
//!
//! Typestate builder that wires one producer, any number of transformers and one
//! consumer into a single lazy chain. Nothing runs until [`Pipeline::run`] is awaited;
//! from then on the consumer pulls samples through every stage one at a time.
//!
//! ```rust,no_run
//! use shardweave::pipeline::PipelineBuilder;
//! use shardweave::shards::{ShardConfig, ShardProducer};
//! use shardweave::transformers::{ShuffleConfig, ShuffleTransformer};
//! use shardweave::consumers::{SinkConsumer, TarWriter, WriterConfig};
//! use shardweave::opener::Opener;
//!
//! # async fn example() -> shardweave::Result<()> {
//! let opener = Opener::default();
//! let producer = ShardProducer::new("data/train-{000..009}.tar", ShardConfig::default())?;
//! let writer = TarWriter::create("shuffled.tar", WriterConfig::default(), &opener).await?;
//!
//! PipelineBuilder::new()
//!   .producer(producer)
//!   .transformer(ShuffleTransformer::new(ShuffleConfig::default()))
//!   .consumer(SinkConsumer::new(writer))
//!   .run()
//!   .await?;
//! # Ok(())
//! # }
//! ```

use crate::consumer::Consumer;
use crate::error::Result;
use crate::producer::Producer;
use crate::transformer::Transformer;
use crate::{SampleResult, SampleStream};
use tracing::debug;

/// Builder state before a producer has been added.
pub struct Empty;

/// Builder state once a stream source exists.
pub struct HasStream(SampleStream);

/// Pipeline builder with typestate.
pub struct PipelineBuilder<State> {
  state: State,
  stages: Vec<String>,
}

/// A fully wired pipeline, ready to run.
pub struct Pipeline<C> {
  stream: SampleStream,
  consumer: C,
  stages: Vec<String>,
}

impl PipelineBuilder<Empty> {
  /// Creates an empty builder.
  pub fn new() -> Self {
    PipelineBuilder {
      state: Empty,
      stages: Vec::new(),
    }
  }

  /// Adds the producer that starts the pipeline.
  pub fn producer<P>(self, mut producer: P) -> PipelineBuilder<HasStream>
  where
    P: Producer<Output = SampleResult, OutputStream = SampleStream>,
  {
    let mut stages = self.stages;
    stages.push(producer.component_info().name);
    PipelineBuilder {
      state: HasStream(producer.produce()),
      stages,
    }
  }
}

impl Default for PipelineBuilder<Empty> {
  fn default() -> Self {
    Self::new()
  }
}

impl PipelineBuilder<HasStream> {
  /// Appends a transformer.
  pub fn transformer<T>(self, mut transformer: T) -> PipelineBuilder<HasStream>
  where
    T: Transformer<
        Input = SampleResult,
        InputStream = SampleStream,
        Output = SampleResult,
        OutputStream = SampleStream,
      >,
  {
    let mut stages = self.stages;
    stages.push(transformer.component_info().name);
    PipelineBuilder {
      state: HasStream(transformer.transform(self.state.0)),
      stages,
    }
  }

  /// Adds the consumer that ends the pipeline.
  pub fn consumer<C>(self, consumer: C) -> Pipeline<C>
  where
    C: Consumer<Input = SampleResult, InputStream = SampleStream>,
  {
    let mut stages = self.stages;
    stages.push(consumer.component_info().name);
    Pipeline {
      stream: self.state.0,
      consumer,
      stages,
    }
  }

  /// Returns the composed stream without a consumer.
  pub fn into_stream(self) -> SampleStream {
    self.state.0
  }
}

impl<C> Pipeline<C>
where
  C: Consumer<Input = SampleResult, InputStream = SampleStream>,
{
  /// Names of the stages in order, for logging.
  pub fn stages(&self) -> &[String] {
    &self.stages
  }

  /// Runs the pipeline to completion and hands back the consumer.
  pub async fn run(self) -> Result<C> {
    let Pipeline {
      stream,
      mut consumer,
      stages,
    } = self;
    debug!(stages = %stages.join(" -> "), "running pipeline");
    consumer.consume(stream).await?;
    Ok(consumer)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::consumer::ConsumerConfig;
  use crate::input::Input;
  use crate::output::Output;
  use crate::producer::ProducerConfig;
  use crate::transformer::TransformerConfig;
  use crate::{Error, Sample};
  use async_trait::async_trait;
  use futures::StreamExt;

  struct KeysProducer {
    keys: Vec<&'static str>,
    config: ProducerConfig,
  }

  impl Output for KeysProducer {
    type Output = SampleResult;
    type OutputStream = SampleStream;
  }

  impl Producer for KeysProducer {
    fn produce(&mut self) -> SampleStream {
      let samples: Vec<SampleResult> = self
        .keys
        .iter()
        .map(|key| Sample::new(*key).map_err(Error::from))
        .collect();
      Box::pin(futures::stream::iter(samples))
    }

    fn set_config_impl(&mut self, config: ProducerConfig) {
      self.config = config;
    }

    fn get_config_impl(&self) -> &ProducerConfig {
      &self.config
    }

    fn get_config_mut_impl(&mut self) -> &mut ProducerConfig {
      &mut self.config
    }
  }

  struct TagTransformer {
    config: TransformerConfig,
  }

  impl Input for TagTransformer {
    type Input = SampleResult;
    type InputStream = SampleStream;
  }

  impl Output for TagTransformer {
    type Output = SampleResult;
    type OutputStream = SampleStream;
  }

  impl Transformer for TagTransformer {
    fn transform(&mut self, input: SampleStream) -> SampleStream {
      Box::pin(input.map(|item| -> SampleResult {
        let mut sample = item?;
        sample.insert("tag", "x")?;
        Ok(sample)
      }))
    }

    fn set_config_impl(&mut self, config: TransformerConfig) {
      self.config = config;
    }

    fn get_config_impl(&self) -> &TransformerConfig {
      &self.config
    }

    fn get_config_mut_impl(&mut self) -> &mut TransformerConfig {
      &mut self.config
    }
  }

  #[derive(Default)]
  struct CollectConsumer {
    keys: Vec<String>,
    config: ConsumerConfig,
  }

  impl Input for CollectConsumer {
    type Input = SampleResult;
    type InputStream = SampleStream;
  }

  #[async_trait]
  impl Consumer for CollectConsumer {
    async fn consume(&mut self, mut input: SampleStream) -> Result<()> {
      while let Some(item) = input.next().await {
        let sample = item?;
        assert!(sample.contains("tag"));
        self.keys.push(sample.key().to_string());
      }
      Ok(())
    }

    fn set_config_impl(&mut self, config: ConsumerConfig) {
      self.config = config;
    }

    fn get_config_impl(&self) -> &ConsumerConfig {
      &self.config
    }

    fn get_config_mut_impl(&mut self) -> &mut ConsumerConfig {
      &mut self.config
    }
  }

  #[tokio::test]
  async fn test_pipeline_runs_all_stages() {
    let producer = KeysProducer {
      keys: vec!["a", "b", "c"],
      config: ProducerConfig::default(),
    }
    .with_name("keys".to_string());

    let pipeline = PipelineBuilder::new()
      .producer(producer)
      .transformer(TagTransformer {
        config: TransformerConfig::default(),
      })
      .consumer(CollectConsumer::default().with_name("collect".to_string()));

    assert_eq!(pipeline.stages(), &["keys", "transformer", "collect"]);
    let consumer = pipeline.run().await.unwrap();
    assert_eq!(consumer.keys, vec!["a", "b", "c"]);
  }

  #[tokio::test]
  async fn test_pipeline_propagates_errors() {
    let producer = KeysProducer {
      keys: vec!["a", ""],
      config: ProducerConfig::default(),
    };

    let result = PipelineBuilder::new()
      .producer(producer)
      .transformer(TagTransformer {
        config: TransformerConfig::default(),
      })
      .consumer(CollectConsumer::default())
      .run()
      .await;

    assert!(matches!(result, Err(Error::Validation(_))));
  }
}
