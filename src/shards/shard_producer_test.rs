use super::*;
use crate::error::{Error, ErrorStrategy};
use crate::producer::Producer;
use crate::sample::{SOURCE_FIELD, Sample, Value};
use futures::StreamExt;
use std::path::Path;

fn write_shard(path: &Path, keys: std::ops::Range<usize>) {
  let mut builder = tar::Builder::new(std::fs::File::create(path).unwrap());
  for i in keys {
    let data = format!("sample {i}");
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o444);
    header.set_cksum();
    builder
      .append_data(&mut header, format!("{i:06}.txt"), data.as_bytes())
      .unwrap();
  }
  builder.finish().unwrap();
}

async fn collect(mut producer: ShardProducer) -> Vec<crate::SampleResult> {
  producer.produce().collect().await
}

fn keys(results: &[crate::SampleResult]) -> Vec<String> {
  results
    .iter()
    .filter_map(|r| r.as_ref().ok())
    .map(|s| s.key().to_string())
    .collect()
}

#[tokio::test]
async fn test_range_selects_global_window() {
  let dir = tempfile::tempdir().unwrap();
  let shard = dir.path().join("ten.tar");
  write_shard(&shard, 0..10);

  let url = format!("{}#3,5", shard.display());
  let producer = ShardProducer::new(&url, ShardConfig::default()).unwrap();
  let results = collect(producer).await;

  assert_eq!(keys(&results), vec!["000003", "000004", "000005"]);
  let first = results[0].as_ref().unwrap();
  assert_eq!(first.source(), Some(shard.to_str().unwrap()));
  assert_eq!(
    first.get("txt").and_then(Value::as_bytes),
    Some(&b"sample 3"[..])
  );
}

#[tokio::test]
async fn test_range_spans_shards() {
  let dir = tempfile::tempdir().unwrap();
  write_shard(&dir.path().join("s-0.tar"), 0..4);
  write_shard(&dir.path().join("s-1.tar"), 4..8);
  write_shard(&dir.path().join("s-2.tar"), 8..12);

  let url = format!("{}/s-{{0..2}}.tar#2,5", dir.path().display());
  let producer = ShardProducer::new(&url, ShardConfig::default()).unwrap();
  assert_eq!(producer.locators().len(), 3);

  let results = collect(producer).await;
  assert_eq!(keys(&results), vec!["000002", "000003", "000004", "000005"]);
}

#[tokio::test]
async fn test_single_index_fragment() {
  let dir = tempfile::tempdir().unwrap();
  let shard = dir.path().join("s.tar");
  write_shard(&shard, 0..5);

  let url = format!("{}#4", shard.display());
  let results = collect(ShardProducer::new(&url, ShardConfig::default()).unwrap()).await;
  assert_eq!(keys(&results), vec!["000004"]);
}

#[tokio::test]
async fn test_allow_missing_skips_failed_shard() {
  let dir = tempfile::tempdir().unwrap();
  write_shard(&dir.path().join("a.tar"), 0..2);
  write_shard(&dir.path().join("c.tar"), 2..4);

  let url = format!("{}/{{a,b,c}}.tar", dir.path().display());
  let config = ShardConfig::default().with_allow_missing(true);
  let results = collect(ShardProducer::new(&url, config).unwrap()).await;

  assert!(results.iter().all(Result::is_ok));
  assert_eq!(keys(&results), vec!["000000", "000001", "000002", "000003"]);
}

#[tokio::test]
async fn test_missing_shard_stops_by_default() {
  let dir = tempfile::tempdir().unwrap();
  write_shard(&dir.path().join("a.tar"), 0..2);
  write_shard(&dir.path().join("c.tar"), 2..4);

  let url = format!("{}/{{a,b,c}}.tar", dir.path().display());
  let results = collect(ShardProducer::new(&url, ShardConfig::default()).unwrap()).await;

  assert_eq!(results.len(), 3);
  assert_eq!(keys(&results), vec!["000000", "000001"]);
  match &results[2] {
    Err(Error::ShardMissing(missing)) => assert!(missing.locator.ends_with("b.tar")),
    other => panic!("expected ShardMissing, got {other:?}"),
  }
}

#[tokio::test]
async fn test_failing_helper_counts_as_missing() {
  let dir = tempfile::tempdir().unwrap();
  write_shard(&dir.path().join("ok.tar"), 0..2);

  let url = format!(
    "{{pipe:exit 1,{}}}",
    dir.path().join("ok.tar").display()
  );
  let producer = ShardProducer::new(&url, ShardConfig::default())
    .unwrap()
    .with_error_strategy(ErrorStrategy::Skip);
  let results = collect(producer).await;
  assert_eq!(keys(&results), vec!["000000", "000001"]);
}

#[tokio::test]
async fn test_seeded_shard_shuffle_is_a_permutation() {
  let url = "s-{00..19}.tar";
  let config = ShardConfig::default().with_shuffle(true, Some(7));
  let a = ShardProducer::new(url, config.clone()).unwrap();
  let b = ShardProducer::new(url, config).unwrap();
  assert_eq!(a.locators(), b.locators());

  let mut sorted = a.locators().to_vec();
  sorted.sort();
  assert_eq!(sorted, ShardSpec::parse(url).unwrap().locators(true));
}

#[tokio::test]
async fn test_decoder_runs_after_source_injection() {
  let dir = tempfile::tempdir().unwrap();
  let shard = dir.path().join("s.tar");
  write_shard(&shard, 0..2);

  let producer = ShardProducer::new(shard.to_str().unwrap(), ShardConfig::default())
    .unwrap()
    .with_decoder(|mut sample: Sample| {
      assert!(sample.contains(SOURCE_FIELD));
      sample.insert("seen", true)?;
      Ok(sample)
    });
  let results = collect(producer).await;
  assert_eq!(results.len(), 2);
  assert!(
    results
      .iter()
      .all(|r| r.as_ref().unwrap().get("seen") == Some(&Value::Bool(true)))
  );
}

#[tokio::test]
async fn test_invalid_fragment_rejected() {
  assert!(matches!(
    ShardProducer::new("a.tar#x", ShardConfig::default()),
    Err(Error::Validation(_))
  ));
}
