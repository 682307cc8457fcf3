use datapipes_core::{
    CollectingSink, Error, MemorySource, Pipeline, Processing, Record, RunContext, Sink, Source,
};
use std::time::Duration;

use datapipes_endpoints::{Endpoint, Frame, MessageChannel, MessagingSink, MessagingSource};
use tokio::net::TcpListener;

fn records(prefix: &str, n: usize) -> Vec<Record> {
    (0..n)
        .map(|i| Record::new(format!("{prefix}{i:03}")).with_field("txt", format!("payload {i}")))
        .collect()
}

async fn listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    (listener, address)
}

fn send(records: Vec<Record>, endpoint: Endpoint, eof: bool) -> Processing {
    Processing::new(
        move |_: &RunContext| Ok(Box::new(MemorySource::new(records)) as Box<dyn Source>),
        Pipeline::identity(),
        move |_: &RunContext| Ok(Box::new(MessagingSink::new(endpoint, eof)) as Box<dyn Sink>),
    )
}

fn receive(endpoint: Endpoint, eof: bool, sink: CollectingSink) -> Processing {
    Processing::new(
        move |_: &RunContext| Ok(Box::new(MessagingSource::new(endpoint, eof)) as Box<dyn Source>),
        Pipeline::identity(),
        move |_: &RunContext| Ok(Box::new(sink) as Box<dyn Sink>),
    )
}

/// Frames a messaging sink puts on the wire for `records`
async fn frames_sent(records: Vec<Record>, eof: bool) -> Vec<Frame> {
    let (listener, address) = listener().await;
    let sender = send(records, Endpoint::connect(address), eof);
    let receiving = async {
        let mut channel = MessageChannel::accept(&listener).await.unwrap();
        let mut frames = Vec::new();
        while let Some(frame) = channel.receive().await.unwrap() {
            frames.push(frame);
        }
        frames
    };

    let (sent, frames) = tokio::join!(sender.run(), receiving);
    sent.unwrap();
    frames
}

#[tokio::test]
async fn sink_sends_records_then_one_eof_frame() {
    let frames = frames_sent(records("k", 9), true).await;

    let mut expected: Vec<Frame> = records("k", 9).into_iter().map(Frame::Record).collect();
    expected.push(Frame::Eof);
    assert_eq!(frames, expected);
}

#[tokio::test]
async fn sink_without_eof_sends_only_records() {
    let frames = frames_sent(records("k", 4), false).await;

    assert_eq!(frames.len(), 4);
    assert!(frames.iter().all(|frame| matches!(frame, Frame::Record(_))));
}

#[tokio::test]
async fn sink_started_before_its_peer_listens() {
    let address = listener().await.1;
    let sender = send(records("late", 6), Endpoint::connect(address.clone()), true);
    let sending = tokio::spawn(sender.run());

    tokio::time::sleep(Duration::from_millis(200)).await;
    let listener = TcpListener::bind(address.as_str()).await.unwrap();
    let sink = CollectingSink::new();
    let collected = sink.handle();
    let stats = receive(Endpoint::from_listener(listener).unwrap(), true, sink)
        .run()
        .await
        .unwrap();

    assert_eq!(sending.await.unwrap().unwrap().records_written, 6);
    assert_eq!(stats.records_read, 6);
    assert_eq!(*collected.lock().unwrap(), records("late", 6));
}

#[tokio::test]
async fn eof_frame_closes_the_receiving_stream() {
    let (listener, address) = listener().await;
    let sink = CollectingSink::new();
    let collected = sink.handle();

    let receiver = receive(Endpoint::from_listener(listener).unwrap(), true, sink);
    let sender = send(records("a", 17), Endpoint::connect(address), true);
    let (received, sent) = tokio::join!(receiver.run(), sender.run());

    assert_eq!(sent.unwrap().records_written, 17);
    assert_eq!(received.unwrap().records_read, 17);
    assert_eq!(*collected.lock().unwrap(), records("a", 17));
}

#[tokio::test]
async fn reversed_direction_connects_the_source() {
    let (listener, address) = listener().await;
    let sink = CollectingSink::new();
    let collected = sink.handle();

    let sender = send(records("r", 4), Endpoint::from_listener(listener).unwrap(), true);
    let receiver = receive(Endpoint::connect(address), true, sink);
    let (sent, received) = tokio::join!(sender.run(), receiver.run());

    sent.unwrap();
    received.unwrap();
    assert_eq!(collected.lock().unwrap().len(), 4);
}

#[tokio::test]
async fn without_eof_a_listening_source_accepts_successive_peers() {
    let (listener, address) = listener().await;
    let sink = CollectingSink::with_max_records(5);
    let collected = sink.handle();
    let receiver = receive(Endpoint::from_listener(listener).unwrap(), false, sink);

    let senders = tokio::spawn(async move {
        send(records("first", 3), Endpoint::connect(address.clone()), false)
            .run()
            .await
            .unwrap();
        send(records("second", 2), Endpoint::connect(address), false)
            .run()
            .await
            .unwrap();
    });

    let stats = receiver.run().await.unwrap();
    senders.await.unwrap();

    assert_eq!(stats.records_written, 5);
    let keys: Vec<_> = collected.lock().unwrap().iter().map(|r| r.key().to_owned()).collect();
    assert_eq!(keys, vec!["first000", "first001", "first002", "second000", "second001"]);
}

#[tokio::test]
async fn disconnect_before_eof_is_a_transport_fault() {
    let (listener, address) = listener().await;
    let receiver = receive(Endpoint::from_listener(listener).unwrap(), true, CollectingSink::new());
    let sender = send(records("x", 3), Endpoint::connect(address), false);

    let (received, sent) = tokio::join!(receiver.run(), sender.run());
    sent.unwrap();
    match received.unwrap_err() {
        Error::Component { component, source } => {
            assert!(component.starts_with("source messaging"), "{component}");
            assert!(matches!(*source, Error::Transport(_)), "{source}");
        }
        other => panic!("unexpected {other:?}"),
    }
}
