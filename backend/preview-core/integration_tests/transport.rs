// Integration tests for the loopback transport
// Drives a real listener and real sockets from the previewer's side

use crate::helpers::{
    init_test_logger, wait_until, write_garbage_frame, write_message, write_truncated_frame,
};

use preview_core::error::transport::TransportError;
use preview_core::transport::codec;
use preview_core::transport::{Connection, ConnectionEvent, TransportListener, free_tcp_port};

use models::{InputModifier, Message};

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
const RECV_LIMIT: Duration = Duration::from_secs(5);

type Accepted = (Arc<Connection>, mpsc::Receiver<ConnectionEvent>);

/// Start a listener whose callback hands every accepted connection to the
/// test body.
async fn listen_collect() -> (TransportListener, u16, mpsc::UnboundedReceiver<Accepted>) {
    init_test_logger();

    let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
    let port = free_tcp_port(LOOPBACK).await.expect("pick free port");

    let listener = TransportListener::listen(LOOPBACK, port, move |connection, events| {
        let accepted_tx = accepted_tx.clone();
        async move {
            let _ = accepted_tx.send((connection, events));
            Ok(())
        }
    })
    .await
    .expect("listener should bind a free loopback port");

    (listener, port, accepted_rx)
}

async fn connect(port: u16) -> TcpStream {
    TcpStream::connect((LOOPBACK, port))
        .await
        .expect("connect to test listener")
}

async fn next_accepted(accepted: &mut mpsc::UnboundedReceiver<Accepted>) -> Accepted {
    timeout(RECV_LIMIT, accepted.recv())
        .await
        .expect("timed out waiting for an accepted connection")
        .expect("listener dropped the accept channel")
}

async fn next_event(events: &mut mpsc::Receiver<ConnectionEvent>) -> ConnectionEvent {
    timeout(RECV_LIMIT, events.recv())
        .await
        .expect("timed out waiting for a connection event")
        .expect("connection closed its event stream")
}

/// **VALUE**: Verifies a real TCP connect is accepted and surfaced through
/// the listener callback as an established connection.
///
/// **WHY THIS MATTERS**: This is the previewer's connect-back moment; if
/// the accept path breaks, `start` hangs until its timeout on every
/// launch.
///
/// **BUG THIS CATCHES**: A listener that binds but never accepts, or
/// accepts without wiring up the connection.
#[tokio::test]
async fn given_client_connects_when_accepted_then_connection_established() {
    // GIVEN: a listener on a free loopback port
    let (_listener, port, mut accepted) = listen_collect().await;

    // WHEN: a client connects
    let _client = connect(port).await;

    // THEN: the callback receives an established connection from loopback
    let (connection, _events) = next_accepted(&mut accepted).await;
    assert_eq!(connection.peer().ip(), LOOPBACK);
    assert!(!connection.is_faulted());
}

/// **VALUE**: Verifies an inbound frame arrives as a decoded message
/// event.
///
/// **WHY THIS MATTERS**: Every result and preview frame from the
/// previewer travels this exact path.
///
/// **BUG THIS CATCHES**: A receive loop that reads frames but never
/// forwards them, or forwards them out of order.
#[tokio::test]
async fn given_inbound_frame_when_received_then_message_event() {
    let (_listener, port, mut accepted) = listen_collect().await;
    let mut client = connect(port).await;
    let (_connection, mut events) = next_accepted(&mut accepted).await;

    let sent = Message::UpdateXamlResult {
        error: None,
        exception: None,
    };
    write_message(&mut client, &sent).await;

    match next_event(&mut events).await {
        ConnectionEvent::Message(received) => assert_eq!(received, sent),
        other => panic!("expected a message event, got {other:?}"),
    }
}

/// **VALUE**: Verifies an outbound send produces one complete frame the
/// remote can decode.
///
/// **WHY THIS MATTERS**: Handshake, updates and input all go out through
/// `Connection::send`; the remote parses them with the same codec.
///
/// **BUG THIS CATCHES**: A send path that writes the payload without the
/// prefix, or flushes half a frame.
#[tokio::test]
async fn given_send_when_client_reads_then_frame_decodes() {
    let (_listener, port, mut accepted) = listen_collect().await;
    let mut client = connect(port).await;
    let (connection, _events) = next_accepted(&mut accepted).await;

    let sent = Message::ClientRenderInfo {
        dpi_x: 96.0,
        dpi_y: 96.0,
    };
    connection.send(&sent).await.expect("send over live socket");

    let received = timeout(RECV_LIMIT, codec::read_frame(&mut client))
        .await
        .expect("timed out reading the frame")
        .expect("decode the frame")
        .expect("stream should not be at EOF");
    assert_eq!(received, sent);
}

/// **VALUE**: Verifies one undecodable frame is reported and the channel
/// keeps working.
///
/// **WHY THIS MATTERS**: A newer previewer may send message shapes this
/// build cannot decode; the session must degrade to a warning, not a
/// teardown.
///
/// **BUG THIS CATCHES**: Treating a decode failure as fatal would
/// disconnect on the first unknown-shaped frame.
#[tokio::test]
async fn given_garbage_frame_when_received_then_exception_then_channel_survives() {
    let (_listener, port, mut accepted) = listen_collect().await;
    let mut client = connect(port).await;
    let (connection, mut events) = next_accepted(&mut accepted).await;

    // WHEN: a well-framed but undecodable payload arrives
    write_garbage_frame(&mut client).await;

    // THEN: one recoverable exception event, no fault
    match next_event(&mut events).await {
        ConnectionEvent::Exception(error) => assert!(error.is_recoverable()),
        other => panic!("expected an exception event, got {other:?}"),
    }
    assert!(!connection.is_faulted());

    // AND: the next good frame still arrives
    let sent = Message::PreviewData {
        sequence_id: 7,
        image_file_name: "preview-7.png".to_string(),
    };
    write_message(&mut client, &sent).await;

    match next_event(&mut events).await {
        ConnectionEvent::Message(received) => assert_eq!(received, sent),
        other => panic!("expected a message event, got {other:?}"),
    }
}

/// **VALUE**: Verifies a stream cut mid-frame faults the connection and
/// later sends fail fast.
///
/// **WHY THIS MATTERS**: After a fault nothing on this socket can be
/// trusted; callers must get an immediate error instead of writing into
/// a dead stream.
///
/// **BUG THIS CATCHES**: A connection that reports the fault but still
/// accepts sends as if nothing happened.
#[tokio::test]
async fn given_truncated_stream_when_cut_then_faulted_and_sends_fail() {
    let (_listener, port, mut accepted) = listen_collect().await;
    let mut client = connect(port).await;
    let (connection, mut events) = next_accepted(&mut accepted).await;

    // WHEN: the client promises a payload and dies before sending it
    write_truncated_frame(&mut client).await;
    drop(client);

    // THEN: a framing exception is the stream's last event
    match next_event(&mut events).await {
        ConnectionEvent::Exception(error) => {
            assert!(matches!(error, TransportError::Framing { .. }));
        }
        other => panic!("expected an exception event, got {other:?}"),
    }

    wait_until(RECV_LIMIT, "connection to fault", || connection.is_faulted()).await;

    let error = connection
        .send(&Message::ClientRenderInfo {
            dpi_x: 96.0,
            dpi_y: 96.0,
        })
        .await
        .unwrap_err();
    assert!(matches!(error, TransportError::Faulted { .. }));
}

/// **VALUE**: Verifies frames from concurrent senders never interleave on
/// the wire.
///
/// **WHY THIS MATTERS**: Scaling changes, updates and input events are
/// sent from independent tasks; one torn frame desynchronizes the whole
/// stream.
///
/// **BUG THIS CATCHES**: Writing prefix and payload as separate
/// unsynchronized writes.
#[tokio::test]
async fn given_concurrent_senders_when_sending_then_frames_never_interleave() {
    const SENDERS: usize = 16;

    let (_listener, port, mut accepted) = listen_collect().await;
    let mut client = connect(port).await;
    let (connection, _events) = next_accepted(&mut accepted).await;

    let mut tasks = Vec::new();
    for index in 0..SENDERS {
        let connection = Arc::clone(&connection);
        tasks.push(tokio::spawn(async move {
            connection
                .send(&Message::Scroll {
                    modifiers: vec![InputModifier::Control],
                    x: index as f64,
                    y: 0.0,
                    delta_x: 0.0,
                    delta_y: 1.0,
                })
                .await
                .expect("concurrent send");
        }));
    }
    for task in tasks {
        task.await.expect("sender task");
    }

    let mut seen = Vec::new();
    for _ in 0..SENDERS {
        let message = timeout(RECV_LIMIT, codec::read_frame(&mut client))
            .await
            .expect("timed out reading a frame")
            .expect("every frame should decode")
            .expect("stream should not be at EOF");
        match message {
            Message::Scroll { x, .. } => seen.push(x as usize),
            other => panic!("expected a scroll event, got {other:?}"),
        }
    }

    seen.sort_unstable();
    assert_eq!(seen, (0..SENDERS).collect::<Vec<_>>());
}

/// **VALUE**: Verifies a picked free port is actually bindable right
/// after.
///
/// **WHY THIS MATTERS**: The picked port goes straight onto the
/// previewer's command line; a port that cannot be bound means the
/// listener fails before the previewer even launches.
///
/// **BUG THIS CATCHES**: Returning the port while still holding the
/// probe socket open.
#[tokio::test]
async fn given_free_tcp_port_when_bound_then_bind_succeeds() {
    init_test_logger();

    let port = free_tcp_port(LOOPBACK).await.expect("pick free port");

    TcpListener::bind((LOOPBACK, port))
        .await
        .expect("picked port should be bindable");
}

/// **VALUE**: Verifies dispose releases the listening port.
///
/// **WHY THIS MATTERS**: `stop` disposes the listener; a port held after
/// stop leaks one ephemeral port per previewer session.
///
/// **BUG THIS CATCHES**: A dispose that marks the listener closed without
/// ending the accept task that owns the socket.
#[tokio::test]
async fn given_disposed_listener_when_binding_port_then_port_released() {
    let (listener, port, _accepted) = listen_collect().await;

    listener.dispose();

    wait_until_bindable(port).await;
}

async fn wait_until_bindable(port: u16) {
    let deadline = std::time::Instant::now() + RECV_LIMIT;
    loop {
        match TcpListener::bind((LOOPBACK, port)).await {
            Ok(_) => return,
            Err(_) if std::time::Instant::now() < deadline => {
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
            Err(e) => panic!("port {port} never released after dispose: {e}"),
        }
    }
}
