//! Socket topologies over loopback TCP and Unix domain sockets.

use futures::StreamExt;
use shardweave::channel::{
  Connection, ConnectionOptions, FanoutPolicy, Scheme, SocketOptions,
};
use shardweave::config::Settings;
use shardweave::consumers::SinkConsumer;
use shardweave::dispatch::{Sink, open_sink, open_source};
use shardweave::error::ChannelConfigError;
use shardweave::opener::Opener;
use shardweave::{Consumer, Error, Sample, SampleResult, Value};
use std::time::Duration;

const PEER_TIMEOUT: Duration = Duration::from_secs(5);

fn options() -> ConnectionOptions {
  ConnectionOptions::default()
    .with_eof_delay(Duration::ZERO)
    .with_socket(SocketOptions::default().with_linger(Some(Duration::from_secs(2))))
}

fn sample(index: usize) -> Sample {
  Sample::new(format!("{index:06}"))
    .unwrap()
    .with_field("txt", format!("payload {index}"))
    .unwrap()
    .with_field("cls", index as i64)
    .unwrap()
}

/// Binds `bind_scheme` on an ephemeral port, connects `connect_scheme` to it, sends
/// `count` samples from whichever side sends and returns the received keys.
async fn exchange(bind_scheme: &str, connect_scheme: &str, count: usize) -> Vec<String> {
  let bound = Connection::open([format!("{bind_scheme}://127.0.0.1:0")], options())
    .await
    .unwrap();
  let addr = bound.local_addrs()[0].trim_start_matches("tcp://").to_string();
  let connected = Connection::open([format!("{connect_scheme}://{addr}")], options())
    .await
    .unwrap();

  let (mut sender, mut receiver) = if bound.topology().kind.is_sender() {
    (bound, connected)
  } else {
    (connected, bound)
  };
  sender.wait_for_peers(1, PEER_TIMEOUT).await.unwrap();

  let sending = tokio::spawn(async move {
    for i in 0..count {
      sender.send(&sample(i)).await.unwrap();
    }
    sender.send_eof().await.unwrap();
    sender.close().await;
  });

  let mut keys = Vec::new();
  while let Some(sample) = receiver.recv_sample().await.unwrap() {
    keys.push(sample.key().to_string());
  }
  sending.await.unwrap();
  receiver.close().await;
  keys
}

fn expected(count: usize) -> Vec<String> {
  (0..count).map(|i| format!("{i:06}")).collect()
}

#[tokio::test]
async fn test_every_scheme_pairs_with_its_counterpart() {
  let pairs = [
    ("zpull", "zpush"),
    ("zrpush", "zrpull"),
    ("zpub", "zsub"),
    ("zrsub", "zrpub"),
  ];
  for (bind, connect) in pairs {
    assert_eq!(exchange(bind, connect, 25).await, expected(25), "{bind} <- {connect}");
  }

  let used: Vec<&str> = pairs.iter().flat_map(|(a, b)| [*a, *b]).collect();
  for scheme in Scheme::ALL {
    assert!(used.contains(&scheme.as_str()), "{scheme} not exercised");
  }
}

#[tokio::test]
async fn test_values_survive_the_wire() {
  let bound = Connection::open(["zpull://127.0.0.1:0"], options())
    .await
    .unwrap();
  let addr = bound.local_addrs()[0].trim_start_matches("tcp://").to_string();
  let mut receiver = bound;
  let mut sender = Connection::open([format!("zpush://{addr}")], options())
    .await
    .unwrap();

  let original = sample(7).with_field("ok", true).unwrap();
  sender.send(&original).await.unwrap();
  let received = receiver.recv_sample().await.unwrap().unwrap();
  assert_eq!(received.key(), "000007");
  assert_eq!(received.get("cls"), Some(&Value::Int(7)));
  assert_eq!(received.get("ok"), Some(&Value::Bool(true)));
  assert_eq!(
    received.get("txt").and_then(Value::as_bytes),
    Some(&b"payload 7"[..])
  );
  sender.close().await;
  receiver.close().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_push_pull_over_ipc() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("feed.sock");
  let mut receiver = Connection::open(
    [format!("zpull+ipc://{}", path.display())],
    options(),
  )
  .await
  .unwrap();
  assert!(path.exists());

  let mut sender = Connection::open(
    [format!("zpush+ipc://{}", path.display())],
    options(),
  )
  .await
  .unwrap();
  let sending = tokio::spawn(async move {
    for i in 0..10 {
      sender.send(&sample(i)).await.unwrap();
    }
    sender.send_eof().await.unwrap();
    sender.close().await;
  });

  let mut keys = Vec::new();
  while let Some(sample) = receiver.recv_sample().await.unwrap() {
    keys.push(sample.key().to_string());
  }
  sending.await.unwrap();
  assert_eq!(keys, expected(10));

  receiver.close().await;
  assert!(!path.exists());
}

#[tokio::test]
async fn test_subscriber_topic_filters_frames() {
  let publisher = Connection::open(["zpub://127.0.0.1:0"], options())
    .await
    .unwrap();
  let addr = publisher.local_addrs()[0].trim_start_matches("tcp://").to_string();
  let mut publisher = publisher;
  // frames are msgpack maps; a topic that no frame starts with filters everything
  let mut filtered = Connection::open(
    [format!("zsub://{addr}")],
    options().with_topic("nothing-starts-with-this"),
  )
  .await
  .unwrap();
  let mut everything = Connection::open([format!("zsub://{addr}")], options())
    .await
    .unwrap();
  publisher.wait_for_peers(2, PEER_TIMEOUT).await.unwrap();

  publisher.send(&sample(1)).await.unwrap();
  let got = everything.recv_sample().await.unwrap().unwrap();
  assert_eq!(got.key(), "000001");

  let nothing = tokio::time::timeout(Duration::from_millis(200), filtered.recv()).await;
  assert!(nothing.is_err());

  publisher.send_eof().await.unwrap();
  assert!(everything.recv_sample().await.unwrap().is_none());
  let no_eof = tokio::time::timeout(Duration::from_millis(200), filtered.recv_sample()).await;
  assert!(no_eof.is_err());

  publisher.close().await;
  filtered.close().await;
  everything.close().await;
}

#[tokio::test]
async fn test_dispatch_streams_between_sink_and_source() {
  let mut settings = Settings::default();
  settings.connection = options();
  let opener = Opener::default();

  let sink = open_sink("zrpush://127.0.0.1:0", &settings, &opener)
    .await
    .unwrap();
  let Sink::Channels(distributor) = &sink else {
    panic!("expected a channel sink");
  };
  let addr = distributor.channels()[0].local_addrs()[0]
    .trim_start_matches("tcp://")
    .to_string();

  let source = open_source(&format!("zrpull://{addr}"), &settings, &opener)
    .await
    .unwrap();

  let writing = tokio::spawn(async move {
    let samples: Vec<SampleResult> = (0..40).map(|i| Ok(sample(i))).collect();
    let mut consumer = SinkConsumer::new(sink);
    consumer
      .consume(Box::pin(futures::stream::iter(samples)))
      .await
      .unwrap();
    consumer.written()
  });

  let received: Vec<SampleResult> = source.collect().await;
  assert_eq!(writing.await.unwrap(), 40);
  let keys: Vec<String> = received
    .iter()
    .map(|r| r.as_ref().unwrap().key().to_string())
    .collect();
  assert_eq!(keys, expected(40));
}

#[tokio::test]
async fn test_fanout_through_brace_expanded_sink() {
  let first = Connection::open(["zpull://127.0.0.1:0"], options())
    .await
    .unwrap();
  let second = Connection::open(["zpull://127.0.0.1:0"], options())
    .await
    .unwrap();
  let port = |c: &Connection| c.local_addrs()[0].rsplit(':').next().unwrap().to_string();
  let url = format!("zpush://127.0.0.1:{{{},{}}}", port(&first), port(&second));

  let mut settings = Settings::default();
  settings.connection = options();
  settings.fanout.policy = FanoutPolicy::RoundRobin;
  let sink = open_sink(&url, &settings, &Opener::default()).await.unwrap();

  let writing = tokio::spawn(async move {
    let samples: Vec<SampleResult> = (0..10).map(|i| Ok(sample(i))).collect();
    SinkConsumer::new(sink)
      .consume(Box::pin(futures::stream::iter(samples)))
      .await
      .unwrap();
  });

  let mut counts = Vec::new();
  for mut receiver in [first, second] {
    let mut keys = Vec::new();
    while let Some(sample) = receiver.recv_sample().await.unwrap() {
      keys.push(sample.key().to_string());
    }
    receiver.close().await;
    counts.push(keys.len());
  }
  writing.await.unwrap();
  assert_eq!(counts, vec![5, 5]);
}

#[tokio::test]
async fn test_unknown_scheme_rejected() {
  let result = Connection::open(["zfoo://127.0.0.1:1"], options()).await;
  assert!(matches!(
    result,
    Err(Error::ChannelConfig(ChannelConfigError::UnknownScheme(ref s))) if s == "zfoo"
  ));
}
