//! ---
//! wq_section: "03-networking"
//! wq_subsection: "integration-tests"
//! wq_type: "source"
//! wq_scope: "code"
//! wq_description: "Single-session admission and socket I/O over loopback."
//! wq_version: "v0.1.0"
//! wq_owner: "tbd"
//! ---
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use wq_msg::{DecodeEvent, ReadingUpdate};
use wq_net::{
    Admission, CloseReason, Connection, ConnectionManager, ConnectionState, NetError, SkipReason,
    WriteOutcome,
};

async fn pair(listener: &TcpListener) -> (TcpStream, TcpStream, std::net::SocketAddr) {
    let addr = listener.local_addr().unwrap();
    let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    let (server, peer) = accepted.unwrap();
    (client.unwrap(), server, peer)
}

async fn drain_until(connection: &mut Connection, want: usize) -> Vec<DecodeEvent> {
    let mut events = Vec::new();
    for _ in 0..200 {
        let outcome = connection.drain();
        events.extend(outcome.events);
        if events.len() >= want || outcome.closed.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    events
}

#[tokio::test]
async fn second_client_is_rejected_and_first_keeps_streaming() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let manager = ConnectionManager::default();
    let mut active = Connection::new(4096);

    let (mut first, server_side, peer) = pair(&listener).await;
    assert!(matches!(
        manager.admit(&mut active, server_side, peer),
        Admission::Accepted(_)
    ));
    assert_eq!(active.state(), ConnectionState::Connected);

    let (mut second, server_side, peer) = pair(&listener).await;
    match manager.admit(&mut active, server_side, peer) {
        Admission::Rejected { peer: rejected } => assert_eq!(rejected, peer),
        Admission::Accepted(_) => panic!("second client must be rejected"),
    }
    let mut notice = String::new();
    second.read_to_string(&mut notice).await.unwrap();
    assert_eq!(notice, "Another client is already connected!");

    first
        .write_all(br#"{"tur":"10.00", "tmp":"20.00", "pH":"7.00"}"#)
        .await
        .unwrap();
    let events = drain_until(&mut active, 1).await;
    assert_eq!(
        events,
        vec![DecodeEvent::Reading(ReadingUpdate {
            turbidity: Some(10.0),
            temperature: Some(20.0),
            ph: Some(7.0),
        })]
    );
    assert_eq!(active.stats().sessions, 1);
}

#[tokio::test]
async fn peer_close_is_reported_and_disconnect_clears_the_buffer() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let manager = ConnectionManager::default();
    let mut active = Connection::new(4096);

    let (mut client, server_side, peer) = pair(&listener).await;
    manager.admit(&mut active, server_side, peer);
    client.write_all(br#"{"tur":1.0}{"tmp":"#).await.unwrap();
    client.shutdown().await.unwrap();
    drop(client);

    let mut closed = None;
    let mut events = Vec::new();
    for _ in 0..200 {
        let outcome = active.drain();
        events.extend(outcome.events);
        if let Some(reason) = outcome.closed {
            closed = Some(reason);
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(closed, Some(CloseReason::PeerClosed));
    assert_eq!(events.len(), 1);
    assert_eq!(active.decoder().pending(), br#"{"tmp":"#);

    assert_eq!(active.disconnect(CloseReason::PeerClosed), Some(peer));
    assert_eq!(active.state(), ConnectionState::Disconnected);
    assert!(active.decoder().pending().is_empty());
    assert_eq!(
        active.write(b"{}").unwrap(),
        WriteOutcome::Skipped(SkipReason::NotConnected)
    );
}

#[tokio::test]
async fn full_send_buffer_never_queues_frames() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut writer = Connection::new(4096);

    // The peer never reads, so the kernel buffers eventually fill up.
    let (client, _server_side, peer) = pair(&listener).await;
    writer.attach(client, peer);
    let frame = vec![b'x'; 1500];
    let mut sent = 0u64;
    let stalled = loop {
        match writer.write(&frame) {
            Ok(WriteOutcome::Sent(n)) => {
                assert_eq!(n, frame.len());
                sent += 1;
            }
            other => break other,
        }
        assert!(sent < 1_000_000, "send buffer never filled");
    };
    match stalled {
        Ok(WriteOutcome::Skipped(SkipReason::Backpressure)) => {}
        Err(NetError::PartialWrite { written, expected }) => {
            assert!(written > 0 && written < expected);
            writer.disconnect(CloseReason::PartialWrite);
        }
        other => panic!("unexpected write outcome {:?}", other),
    }
    assert_eq!(writer.stats().frames_sent, sent);
}
