use super::*;
use crate::error::{ChannelConfigError, ChannelError, Error, ErrorStrategy};
use crate::producer::Producer;
use crate::sample::Sample;
use bytes::Bytes;
use futures::StreamExt;
use std::time::Duration;

fn quick() -> ConnectionOptions {
  ConnectionOptions::default().with_eof_delay(Duration::ZERO)
}

fn sample(key: &str) -> Sample {
  Sample::new(key)
    .unwrap()
    .with_field("txt", key.as_bytes().to_vec())
    .unwrap()
}

async fn bound_pull() -> (Connection, String) {
  let pull = Connection::open(["zpull://127.0.0.1:0"], quick()).await.unwrap();
  let url = pull.local_addrs()[0].replace("tcp://", "zpush://");
  (pull, url)
}

#[tokio::test]
async fn test_push_pull_preserves_order_until_eof() {
  let (pull, url) = bound_pull().await;
  let mut push = Connection::open([url], quick()).await.unwrap();

  let sender = tokio::spawn(async move {
    for i in 0..20 {
      push.send(&sample(&format!("{i:03}"))).await.unwrap();
    }
    push.send_eof().await.unwrap();
    push.close().await;
    push.sent()
  });

  let keys: Vec<String> = pull
    .into_stream()
    .map(|item| item.unwrap().key().to_string())
    .collect()
    .await;
  let expected: Vec<String> = (0..20).map(|i| format!("{i:03}")).collect();
  assert_eq!(keys, expected);
  assert_eq!(sender.await.unwrap(), 20);
}

#[tokio::test]
async fn test_recv_sample_reports_eof() {
  let (mut pull, url) = bound_pull().await;
  let mut push = Connection::open([url], quick()).await.unwrap();
  push.send(&sample("a")).await.unwrap();
  push.send_eof().await.unwrap();

  assert_eq!(pull.recv_sample().await.unwrap().unwrap().key(), "a");
  assert!(pull.recv_sample().await.unwrap().is_none());
  assert_eq!(pull.received(), 2);
  push.close().await;
  pull.close().await;
}

#[tokio::test]
async fn test_mixed_topologies_rejected() {
  let result = Connection::open(["zpull://127.0.0.1:0", "zpush://127.0.0.1:1"], quick()).await;
  assert!(matches!(
    result,
    Err(Error::ChannelConfig(ChannelConfigError::MixedTopology { .. }))
  ));

  let empty: [&str; 0] = [];
  assert!(matches!(
    Connection::open(empty, quick()).await,
    Err(Error::ChannelConfig(ChannelConfigError::NoUrls))
  ));
}

#[tokio::test]
async fn test_unknown_scheme_fails_before_network() {
  let result = Connection::open(["zbogus://127.0.0.1:1"], quick()).await;
  assert!(matches!(
    result,
    Err(Error::ChannelConfig(ChannelConfigError::UnknownScheme(_)))
  ));
}

#[test]
fn test_url_expansion() {
  assert_eq!(
    expand_urls(["zpush://h:{5000..5002}"], false),
    vec!["zpush://h:5000", "zpush://h:5001", "zpush://h:5002"]
  );
  assert_eq!(
    expand_urls(["zpush://h:{5000..5002}"], true),
    vec!["zpush://h:{5000..5002}"]
  );
}

#[tokio::test]
async fn test_channel_producer_skips_undecodable_frames() {
  let (pull, url) = bound_pull().await;
  let context = Context::default();
  let mut raw = context.socket(SocketKind::Push);
  raw.connect(&Endpoint::parse(&url).unwrap()).unwrap();
  raw.send(Bytes::from_static(b"\xc1garbage")).await.unwrap();
  raw
    .send(Frame::encode_sample(&sample("ok")).unwrap())
    .await
    .unwrap();
  raw.send(Frame::encode_eof().unwrap()).await.unwrap();

  let mut producer = ChannelProducer::new(pull).with_error_strategy(ErrorStrategy::Skip);
  let items: Vec<_> = producer.produce().collect().await;
  assert_eq!(items.len(), 1);
  assert_eq!(items[0].as_ref().unwrap().key(), "ok");

  let again: Vec<_> = producer.produce().collect().await;
  assert!(matches!(
    again.as_slice(),
    [Err(Error::Channel(ChannelError::Closed))]
  ));
  raw.close().await;
}

#[tokio::test]
async fn test_channel_producer_stops_on_undecodable_frame_by_default() {
  let (pull, url) = bound_pull().await;
  let context = Context::default();
  let mut raw = context.socket(SocketKind::Push);
  raw.connect(&Endpoint::parse(&url).unwrap()).unwrap();
  raw.send(Bytes::from_static(b"\xc1")).await.unwrap();
  raw
    .send(Frame::encode_sample(&sample("late")).unwrap())
    .await
    .unwrap();

  let items: Vec<_> = ChannelProducer::new(pull).produce().collect().await;
  assert!(matches!(
    items.as_slice(),
    [Err(Error::Channel(ChannelError::Decode(_)))]
  ));
  raw.close().await;
}

#[tokio::test]
async fn test_fanout_round_robin_is_balanced() {
  let mut receivers = Vec::new();
  let mut urls = Vec::new();
  for _ in 0..3 {
    let (pull, url) = bound_pull().await;
    receivers.push(pull);
    urls.push(url);
  }

  let mut fanout = FanoutDistributor::open(
    urls,
    FanoutOptions::new(FanoutPolicy::RoundRobin),
    quick(),
  )
  .await
  .unwrap();
  let mut picks = Vec::new();
  for i in 0..10 {
    picks.push(fanout.send(&sample(&i.to_string())).await.unwrap());
  }
  fanout.send_eof().await.unwrap();
  assert_eq!(picks, vec![0, 1, 2, 0, 1, 2, 0, 1, 2, 0]);
  assert_eq!(fanout.counts(), &[4, 3, 3]);

  let mut totals = Vec::new();
  for pull in receivers {
    totals.push(pull.into_stream().count().await);
  }
  assert_eq!(totals, vec![4, 3, 3]);
  fanout.close().await;
}

#[tokio::test]
async fn test_fanout_random_is_seeded() {
  let mut receivers = Vec::new();
  let mut urls = Vec::new();
  for _ in 0..2 {
    let (pull, url) = bound_pull().await;
    receivers.push(pull);
    urls.push(url);
  }
  let options = FanoutOptions::new(FanoutPolicy::Random).with_seed(11);
  let mut fanout = FanoutDistributor::open(urls, options, quick()).await.unwrap();
  for i in 0..50 {
    fanout.send(&sample(&i.to_string())).await.unwrap();
  }
  fanout.send_eof().await.unwrap();
  assert_eq!(fanout.counts().iter().sum::<u64>(), 50);
  assert!(fanout.counts().iter().all(|&count| count > 0));
  for pull in receivers {
    pull.into_stream().count().await;
  }
  fanout.close().await;
}

#[test]
fn test_policy_names() {
  assert_eq!("round_robin".parse::<FanoutPolicy>().unwrap(), FanoutPolicy::RoundRobin);
  assert_eq!("random".parse::<FanoutPolicy>().unwrap(), FanoutPolicy::Random);
  assert!(matches!(
    "sticky".parse::<FanoutPolicy>(),
    Err(ChannelConfigError::UnknownPolicy(_))
  ));
  assert_eq!(FanoutPolicy::default(), FanoutPolicy::Random);
}
