//! Integration tests against an in-process mock switch.
//!
//! Each test binds a local listener, scripts one side of the protocol,
//! and drives the real client over a real TCP socket — including split
//! writes that land mid-line, to exercise the framer's buffering.

use eventsock::{
    connect_with_retry, ConnectOptions, Connection, DisconnectReason, Error, EventDocument,
    RetryOptions,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

const PASSWORD: &str = "ClueCon";

/// One scripted peer connection.
struct Peer {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl Peer {
    /// Read one `\n\n`-terminated command block from the client.
    async fn expect_block(&mut self) -> String {
        loop {
            if let Some(pos) = self
                .buf
                .windows(2)
                .position(|w| w == b"\n\n")
            {
                let block: Vec<u8> = self.buf.drain(..pos + 2).collect();
                return String::from_utf8(block).expect("client sent valid UTF-8");
            }
            let mut chunk = [0u8; 4096];
            let n = self
                .stream
                .read(&mut chunk)
                .await
                .expect("read from client");
            assert!(n > 0, "client closed while a block was expected");
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    async fn send(&mut self, data: &str) {
        self.stream
            .write_all(data.as_bytes())
            .await
            .expect("write to client");
    }

    /// Send in deliberately awkward chunks so lines split mid-byte-stream.
    async fn send_fragmented(&mut self, data: &str, chunk_size: usize) {
        for chunk in data.as_bytes().chunks(chunk_size) {
            self.stream.write_all(chunk).await.expect("write chunk");
            self.stream.flush().await.expect("flush chunk");
            tokio::task::yield_now().await;
        }
    }

    /// Standard login exchange: challenge, auth command, +OK.
    async fn accept_login(&mut self) {
        self.send("Content-Type: auth/request\n\n").await;
        let block = self.expect_block().await;
        assert!(block.starts_with("auth "), "unexpected block: {:?}", block);
        self.send("Content-Type: command/reply\nReply-Text: +OK accepted\n\n")
            .await;
    }
}

/// Bind a listener and hand the accepted connection to the script.
async fn with_peer<F, Fut>(script: F) -> u16
where
    F: FnOnce(Peer) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        script(Peer {
            stream,
            buf: Vec::new(),
        })
        .await;
    });
    port
}

#[tokio::test]
async fn login_handshake_succeeds() {
    let port = with_peer(|mut peer| async move {
        peer.accept_login().await;
        // Keep the socket open until the client is done.
        let _ = peer.expect_block().await;
    })
    .await;

    let conn = Connection::connect("127.0.0.1", port, PASSWORD)
        .await
        .expect("connect should succeed");
    assert!(conn.is_connected());
    let _ = conn.exit().await.unwrap();
}

#[tokio::test]
async fn login_rejected_reports_bad_credentials() {
    let port = with_peer(|mut peer| async move {
        peer.send("Content-Type: auth/request\n\n").await;
        let _ = peer.expect_block().await;
        peer.send("Content-Type: command/reply\nReply-Text: -ERR invalid\n\n")
            .await;
    })
    .await;

    let err = Connection::connect("127.0.0.1", port, "wrong")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AuthFailed { .. }), "got {:?}", err);
}

#[tokio::test]
async fn responses_resolve_in_issue_order_despite_event_interleaving() {
    let event_body = "Event-Name: DTMF\nDTMF-Digit: 7\n\n";
    let api_body = "UP 0 years, 0 days, 1 hour\n";
    let wire = format!(
        "Content-Length: {}\nContent-Type: text/event-plain\n\n{}\
         Content-Type: api/response\nContent-Length: {}\n\n{}\
         Content-Type: command/reply\nReply-Text: +OK Job-UUID: abc-123\nJob-UUID: abc-123\n\n",
        event_body.len(),
        event_body,
        api_body.len(),
        api_body
    );

    let port = with_peer(move |mut peer| async move {
        peer.accept_login().await;
        let first = peer.expect_block().await;
        assert_eq!(first, "api status\n\n");
        let second = peer.expect_block().await;
        assert_eq!(second, "bgapi originate user/1000 9664\n\n");
        // Event block, then both replies, delivered in 5-byte fragments.
        peer.send_fragmented(&wire, 5).await;
        // Hold the socket open so nothing gets a disconnect error.
        let _ = peer.expect_block().await;
    })
    .await;

    let conn = Connection::connect("127.0.0.1", port, PASSWORD)
        .await
        .unwrap();

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    conn.on_event(
        "DTMF",
        Arc::new(move |_: &str, doc: &EventDocument| {
            let _ = event_tx.send(doc.header("DTMF-Digit").map(|d| d.to_string()));
        }),
    );

    let api_reply = conn.api("status").await.unwrap();
    let bg_reply = conn.bgapi("originate user/1000 9664").await.unwrap();

    // FIFO: the api body resolves first, the bgapi acknowledgement second,
    // and the event sandwiched between them reaches its listener.
    assert_eq!(api_reply.result().await.unwrap(), api_body);
    assert_eq!(
        bg_reply.result().await.unwrap(),
        " +OK Job-UUID: abc-123"
    );
    let digit = tokio::time::timeout(Duration::from_secs(5), event_rx.recv())
        .await
        .expect("event should arrive")
        .expect("channel open");
    assert_eq!(digit.as_deref(), Some("7"));

    let _ = conn.exit().await.unwrap();
}

#[tokio::test]
async fn disconnect_fails_all_pending_requests() {
    let port = with_peer(|mut peer| async move {
        peer.accept_login().await;
        let _ = peer.expect_block().await;
        let _ = peer.expect_block().await;
        // Close without answering either command.
    })
    .await;

    let conn = Connection::connect("127.0.0.1", port, PASSWORD)
        .await
        .unwrap();
    let first = conn.bgapi("originate user/1000 9664").await.unwrap();
    let second = conn.bgapi("originate user/1001 9664").await.unwrap();

    assert!(matches!(
        first.result().await.unwrap_err(),
        Error::Disconnected
    ));
    assert!(matches!(
        second.result().await.unwrap_err(),
        Error::Disconnected
    ));

    let reason = conn.closed().await;
    assert_eq!(reason, DisconnectReason::ConnectionClosed);
    assert!(!conn.is_connected());
}

#[tokio::test]
async fn unsolicited_garbage_is_a_protocol_violation() {
    let port = with_peer(|mut peer| async move {
        peer.accept_login().await;
        peer.send("complete nonsense outside any block\n").await;
        // Give the client a moment to observe it before we hang up.
        tokio::time::sleep(Duration::from_millis(200)).await;
    })
    .await;

    let conn = Connection::connect("127.0.0.1", port, PASSWORD)
        .await
        .unwrap();
    let reason = conn.closed().await;
    assert_eq!(reason, DisconnectReason::ProtocolViolation);

    // Further commands are refused locally.
    assert!(matches!(
        conn.api("status").await.unwrap_err(),
        Error::Disconnected
    ));
}

#[tokio::test]
async fn subscribed_xml_events_reach_listeners_in_order() {
    let speech_xml = "<event>\n<headers>\n<Event-Name>DETECTED_SPEECH</Event-Name>\n\
                      <Speech-Type>detected-speech</Speech-Type>\n</headers>\n\
                      <body>&lt;result&gt;&lt;input&gt;four five six&lt;/input&gt;&lt;/result&gt;</body>\n\
                      </event>\n";
    let wire = format!(
        "Content-Type: command/reply\nReply-Text: +OK event listener enabled xml\n\n\
         Content-Length: {}\nContent-Type: text/event-xml\n\n{}",
        speech_xml.len(),
        speech_xml
    );

    let port = with_peer(move |mut peer| async move {
        peer.accept_login().await;
        let block = peer.expect_block().await;
        assert_eq!(block, "event xml ALL\n\n");
        peer.send_fragmented(&wire, 9).await;
        let _ = peer.expect_block().await;
    })
    .await;

    let conn = Connection::connect("127.0.0.1", port, PASSWORD)
        .await
        .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let order = Arc::new(Mutex::new(Vec::new()));
    for tag in ["first", "second"] {
        let order = order.clone();
        let tx = tx.clone();
        conn.on_event(
            "DETECTED_SPEECH",
            Arc::new(move |_: &str, doc: &EventDocument| {
                order.lock().unwrap().push(tag);
                let _ = tx.send(doc.xml_body_text("input"));
            }),
        );
    }

    conn.subscribe_events("xml", "ALL")
        .await
        .unwrap()
        .result()
        .await
        .unwrap();

    let heard = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event should arrive")
        .expect("channel open");
    assert_eq!(heard.as_deref(), Some("four five six"));
    let _ = rx.recv().await;
    assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);

    let _ = conn.exit().await.unwrap();
}

#[tokio::test]
async fn conference_list_parses_member_records() {
    let body = "1;sofia/d.com/u@b.com;uuid1;FS;000;hear|speak;0;0;300\n\
                2;sofia/d.com/admin@b.com;uuid2;Admin;001;hear|speak|floor;0;0;300\n";
    let wire = format!(
        "Content-Type: api/response\nContent-Length: {}\n\n{}",
        body.len(),
        body
    );

    let port = with_peer(move |mut peer| async move {
        peer.accept_login().await;
        let block = peer.expect_block().await;
        assert_eq!(block, "api conference main list\n\n");
        peer.send(&wire).await;
        let _ = peer.expect_block().await;
    })
    .await;

    let conn = Connection::connect("127.0.0.1", port, PASSWORD)
        .await
        .unwrap();
    let members = conn
        .conference_list("main")
        .await
        .unwrap()
        .result()
        .await
        .unwrap();

    assert_eq!(members.len(), 2);
    assert_eq!(members[0].id, "1");
    assert_eq!(members[0].short_uri(), "u@b.com");
    assert!(members[1].has_flag("floor"));

    let _ = conn.exit().await.unwrap();
}

#[tokio::test]
async fn retry_factory_gives_up_with_bounded_attempts() {
    // A listener that is bound and immediately dropped leaves a port that
    // refuses connections.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let retry = RetryOptions {
        max_attempts: 2,
        initial_backoff: Duration::from_millis(20),
        max_backoff: Duration::from_millis(50),
    };
    let err = connect_with_retry("127.0.0.1", port, PASSWORD, ConnectOptions::default(), retry)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::RetriesExhausted { attempts: 2, .. }
    ));
}

#[tokio::test]
async fn dropped_reply_handle_keeps_fifo_alignment() {
    let wire = "Content-Type: command/reply\nReply-Text: +OK one\n\n\
                Content-Type: command/reply\nReply-Text: +OK two\n\n";

    let port = with_peer(move |mut peer| async move {
        peer.accept_login().await;
        let _ = peer.expect_block().await;
        let _ = peer.expect_block().await;
        peer.send(wire).await;
        let _ = peer.expect_block().await;
    })
    .await;

    let conn = Connection::connect("127.0.0.1", port, PASSWORD)
        .await
        .unwrap();

    // Abandon the first reply; the queue must still drain it so the
    // second command gets the *second* reply, not the first.
    let abandoned = conn.bgapi("originate user/1000 9664").await.unwrap();
    drop(abandoned);
    let kept = conn.bgapi("originate user/1001 9664").await.unwrap();
    assert_eq!(kept.result().await.unwrap(), " +OK two");

    let _ = conn.exit().await.unwrap();
}
