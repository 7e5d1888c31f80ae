//! ---
//! wq_section: "01-core-functionality"
//! wq_subsection: "integration-tests"
//! wq_type: "source"
//! wq_scope: "code"
//! wq_description: "Listener, stream and connect sources over loopback sockets."
//! wq_version: "v0.1.0"
//! wq_owner: "tbd"
//! ---
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::rc::Rc;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use wq_rt::{Reactor, ReactorError, Wake};

#[derive(Default)]
struct Session {
    accepted: Vec<SocketAddr>,
    received: Vec<u8>,
    second_stream_rejected: bool,
    eof: bool,
}

#[tokio::test]
async fn accepted_peer_is_read_until_eof() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut reactor = Reactor::<Session>::new();
    reactor.add_listener("listener", listener, |session, d, wake| {
        let Wake::Accepted { stream, peer } = wake else {
            panic!("listener woke without a peer");
        };
        session.accepted.push(peer);
        let stream = Rc::new(stream);
        let reader = Rc::clone(&stream);
        d.registry()
            .add_stream("peer", reader.clone(), move |session, d, _| {
                let mut buf = [0u8; 8];
                loop {
                    match reader.try_read(&mut buf) {
                        Ok(0) => {
                            session.eof = true;
                            d.remove_self();
                            d.stop();
                            break;
                        }
                        Ok(n) => session.received.extend_from_slice(&buf[..n]),
                        Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                        Err(err) => panic!("read failed: {}", err),
                    }
                }
            })
            .unwrap();
        let second = d.registry().add_stream("duplicate", stream, |_, _, _| {});
        session.second_stream_rejected =
            matches!(second, Err(ReactorError::Registration { .. }));
    });

    let client = tokio::spawn(async move {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"hello ").await.unwrap();
        stream.write_all(b"reactor, this exceeds one buffer").await.unwrap();
        stream.shutdown().await.unwrap();
    });

    let mut session = Session::default();
    reactor.run(&mut session).await.unwrap();
    client.await.unwrap();

    assert_eq!(session.accepted.len(), 1);
    assert!(session.eof);
    assert!(session.second_stream_rejected);
    assert_eq!(
        session.received,
        b"hello reactor, this exceeds one buffer".to_vec()
    );
}

#[tokio::test]
async fn pending_connect_fires_once_and_is_removed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut reactor = Reactor::<Option<SocketAddr>>::new();
    reactor.add_connect("dial", TcpStream::connect(addr), |peer, _, wake| {
        if let Wake::Connected(Ok(stream)) = wake {
            *peer = stream.peer_addr().ok();
        }
    });
    assert_eq!(reactor.len(), 1);

    let mut peer = None;
    assert_eq!(reactor.turn(&mut peer).await.unwrap(), 1);
    assert_eq!(peer, Some(addr));
    assert!(reactor.is_empty());
}

#[tokio::test]
async fn refused_connect_reports_the_error() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let mut reactor = Reactor::<Option<ErrorKind>>::new();
    reactor.add_connect("dial", TcpStream::connect(addr), |kind, _, wake| {
        if let Wake::Connected(Err(err)) = wake {
            *kind = Some(err.kind());
        }
    });

    let mut kind = None;
    assert_eq!(reactor.turn(&mut kind).await.unwrap(), 1);
    assert_eq!(kind, Some(ErrorKind::ConnectionRefused));
    assert!(reactor.is_empty());
}
