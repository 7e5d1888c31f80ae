//! ---
//! wq_section: "04-runtime"
//! wq_subsection: "integration-tests"
//! wq_type: "source"
//! wq_scope: "code"
//! wq_description: "Node runtime against a bare loopback listener."
//! wq_version: "v0.1.0"
//! wq_owner: "tbd"
//! ---
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use wq_common::ReconnectMode;
use wq_core::{LinkEvent, NodeRuntime};
use wq_msg::{DecodeEvent, FrameDecoder, ReadingUpdate};
use wq_testharness::{loopback_config, RecordingSink, ScriptedProducer};

const PERIOD: Duration = Duration::from_millis(20);

async fn read_updates(peer: &mut TcpStream, want: usize) -> Vec<ReadingUpdate> {
    let mut decoder = FrameDecoder::new();
    let mut updates = Vec::new();
    let mut buf = [0u8; 256];
    while updates.len() < want {
        let n = peer.read(&mut buf).await.unwrap();
        assert!(n > 0, "node closed the link early");
        for event in decoder.feed(&buf[..n]) {
            match event {
                DecodeEvent::Reading(update) => updates.push(update),
                other => panic!("unexpected event {:?}", other),
            }
        }
    }
    updates
}

fn close_to(update: &ReadingUpdate, turbidity: f64, temperature: f64, ph: f64) -> bool {
    let near = |value: Option<f64>, expected: f64| value.is_some_and(|v| (v - expected).abs() < 0.006);
    near(update.turbidity, turbidity) && near(update.temperature, temperature) && near(update.ph, ph)
}

#[tokio::test]
async fn node_publishes_sampled_readings() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = loopback_config(listener.local_addr().unwrap(), PERIOD);
    let producer = ScriptedProducer::new()
        .turbidity([Ok(0)])
        .ph([Ok(255)])
        .temperature([Ok(18.5)]);
    let sink = RecordingSink::new();

    let runtime = NodeRuntime::start(&config, Box::new(producer), Box::new(sink.clone()))
        .await
        .unwrap();
    assert!(runtime.is_connected());
    let (mut peer, _) = listener.accept().await.unwrap();
    let handle = runtime.shutdown_handle();

    let (summary, updates) = tokio::join!(runtime.run(), async move {
        let updates = read_updates(&mut peer, 3).await;
        handle.stop();
        updates
    });
    let summary = summary.unwrap();

    assert!(close_to(&updates[0], 100.0, 18.5, 0.0), "{:?}", updates[0]);
    assert!(close_to(&updates[2], 49.80, 25.0, 6.97), "{:?}", updates[2]);
    assert_eq!(summary.startup_attempts, 1);
    assert!(summary.frames_sent >= 3);
    assert!(summary.sampling_ticks >= 3);
    assert_eq!(summary.reconnects, 0);
    assert_eq!(
        sink.count_events(|event| matches!(event, LinkEvent::Connected { .. })),
        1
    );
}

#[tokio::test]
async fn unreachable_monitor_fails_after_bounded_attempts() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let config = loopback_config(addr, Duration::from_millis(10));
    let err = NodeRuntime::start(
        &config,
        Box::new(ScriptedProducer::new()),
        Box::new(RecordingSink::new()),
    )
    .await
    .err()
    .expect("startup must fail");
    let chain = format!("{:#}", err);
    assert!(chain.contains("monitor unreachable"), "{}", chain);
    assert!(chain.contains("after 3 attempts"), "{}", chain);
}

#[tokio::test]
async fn malformed_or_disallowed_address_is_a_setup_error() {
    let mut config = loopback_config("127.0.0.1:9".parse().unwrap(), PERIOD);
    config.node.monitor_address = Some("127.0.0.01".into());
    let err = NodeRuntime::start(
        &config,
        Box::new(ScriptedProducer::new()),
        Box::new(RecordingSink::new()),
    )
    .await
    .err()
    .expect("address must be rejected");
    assert!(format!("{:#}", err).contains("leading zero"));

    let mut config = loopback_config("127.0.0.1:9".parse().unwrap(), PERIOD);
    config.node.permitted_range = Some(wq_common::PermittedRange {
        start: "192.168.1.1".parse().unwrap(),
        end: "192.168.1.100".parse().unwrap(),
    });
    let err = NodeRuntime::start(
        &config,
        Box::new(ScriptedProducer::new()),
        Box::new(RecordingSink::new()),
    )
    .await
    .err()
    .expect("address outside the range must be rejected");
    assert!(format!("{:#}", err).contains("outside the permitted range"));
}

#[tokio::test]
async fn lost_link_is_restored_in_the_background() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = loopback_config(listener.local_addr().unwrap(), PERIOD);
    assert_eq!(config.connect.reconnect, ReconnectMode::Background);
    let sink = RecordingSink::new();

    let runtime = NodeRuntime::start(
        &config,
        Box::new(ScriptedProducer::new()),
        Box::new(sink.clone()),
    )
    .await
    .unwrap();
    let handle = runtime.shutdown_handle();

    let (summary, ()) = tokio::join!(runtime.run(), async move {
        let (mut first, _) = listener.accept().await.unwrap();
        read_updates(&mut first, 1).await;
        drop(first);

        let (mut second, _) = listener.accept().await.unwrap();
        read_updates(&mut second, 2).await;
        handle.stop();
    });
    let summary = summary.unwrap();

    assert!(summary.link_losses >= 1);
    assert!(summary.reconnects >= 1);
    assert!(summary.reconnect_attempts >= summary.reconnects);
    assert_eq!(
        sink.count_events(|event| matches!(event, LinkEvent::Connected { .. })),
        1 + summary.reconnects as usize
    );
    assert!(sink.count_events(|event| matches!(event, LinkEvent::Disconnected { .. })) >= 1);
}

#[tokio::test]
async fn startup_only_mode_stays_down_after_losing_the_link() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut config = loopback_config(listener.local_addr().unwrap(), PERIOD);
    config.connect.reconnect = ReconnectMode::StartupOnly;

    let runtime = NodeRuntime::start(
        &config,
        Box::new(ScriptedProducer::new()),
        Box::new(RecordingSink::new()),
    )
    .await
    .unwrap();
    let handle = runtime.shutdown_handle();

    let (summary, ()) = tokio::join!(runtime.run(), async move {
        let (mut peer, _) = listener.accept().await.unwrap();
        read_updates(&mut peer, 1).await;
        drop(peer);
        tokio::time::sleep(PERIOD * 10).await;
        handle.stop();
    });
    let summary = summary.unwrap();

    assert_eq!(summary.link_losses, 1);
    assert_eq!(summary.reconnect_attempts, 0);
    assert!(summary.frames_skipped > 0);
}
