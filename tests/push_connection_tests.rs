//! Integration tests for the push connection: state machine contract,
//! reconnect/backoff behavior, keepalive round trips and explicit
//! shutdown, driven against in-process websocket servers.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use url::Url;

use openevse_rs::connection::{ConnectionState, PushEvent, PushOptions, PushSocket};

async fn next_event(receiver: &mut mpsc::UnboundedReceiver<PushEvent>) -> PushEvent {
    timeout(Duration::from_secs(5), receiver.recv())
        .await
        .expect("timed out waiting for a push event")
        .expect("event channel closed")
}

fn socket_for(
    port: u16,
    credentials: Option<(String, String)>,
) -> (std::sync::Arc<PushSocket>, mpsc::UnboundedReceiver<PushEvent>) {
    let (events, receiver) = mpsc::unbounded_channel();
    let uri = Url::parse(&format!("ws://127.0.0.1:{port}/ws")).unwrap();
    let socket = std::sync::Arc::new(PushSocket::new(
        uri,
        credentials,
        events,
        PushOptions::fast(),
    ));
    (socket, receiver)
}

/// A port with nothing listening on it.
async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn test_data_frame_is_delivered_while_connected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let Ok(mut websocket) = tokio_tungstenite::accept_async(stream).await else {
            return;
        };
        let frame = r#"{"key":"value"}"#;
        let _ = websocket
            .send(tokio_tungstenite::tungstenite::Message::Text(frame.into()))
            .await;
        // Keep polling so the close handshake completes.
        while let Some(message) = websocket.next().await {
            if message.is_err() {
                break;
            }
        }
    });

    let (socket, mut receiver) = socket_for(port, None);
    let listen_socket = socket.clone();
    let listen_task = tokio::spawn(async move { listen_socket.listen().await });

    assert!(matches!(
        next_event(&mut receiver).await,
        PushEvent::ConnectionState {
            state: ConnectionState::Starting,
            reason: None,
        }
    ));
    assert!(matches!(
        next_event(&mut receiver).await,
        PushEvent::ConnectionState {
            state: ConnectionState::Connected,
            reason: None,
        }
    ));

    match next_event(&mut receiver).await {
        PushEvent::Data(payload) => {
            assert_eq!(payload.get("key"), Some(&Value::String("value".into())));
        }
        other => panic!("expected a data event, got {other:?}"),
    }

    // Explicit close: the receive loop observes Stopped at its next check
    // and exits without further callback noise.
    socket.close().await;
    assert!(matches!(
        next_event(&mut receiver).await,
        PushEvent::ConnectionState {
            state: ConnectionState::Stopped,
            reason: None,
        }
    ));

    timeout(Duration::from_secs(5), listen_task)
        .await
        .expect("listen task did not exit after close")
        .unwrap();
    assert!(receiver.try_recv().is_err());
}

#[tokio::test]
async fn test_handshake_401_stops_with_auth_reason() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };
        let mut buffer = [0u8; 2048];
        let _ = stream.read(&mut buffer).await;
        let _ = stream
            .write_all(b"HTTP/1.1 401 Unauthorized\r\ncontent-length: 0\r\n\r\n")
            .await;
    });

    let (socket, mut receiver) = socket_for(
        port,
        Some(("admin".to_string(), "wrong-password".to_string())),
    );
    let listen_socket = socket.clone();
    let listen_task = tokio::spawn(async move { listen_socket.listen().await });

    assert!(matches!(
        next_event(&mut receiver).await,
        PushEvent::ConnectionState {
            state: ConnectionState::Starting,
            ..
        }
    ));
    match next_event(&mut receiver).await {
        PushEvent::ConnectionState { state, reason } => {
            assert_eq!(state, ConnectionState::Stopped);
            assert_eq!(reason.as_deref(), Some("Authorization failure"));
        }
        other => panic!("expected a state event, got {other:?}"),
    }

    timeout(Duration::from_secs(5), listen_task)
        .await
        .expect("listen task did not exit after auth failure")
        .unwrap();
    assert_eq!(socket.state(), ConnectionState::Stopped);
}

#[tokio::test]
async fn test_transport_failures_back_off_then_stop() {
    let port = unused_port().await;
    let (socket, mut receiver) = socket_for(port, None);

    let listen_socket = socket.clone();
    let listen_task = tokio::spawn(async move { listen_socket.listen().await });

    // PushOptions::fast tolerates 3 failures: each cycles
    // Starting -> Disconnected, then the 4th attempt stops for good.
    let mut disconnects = 0;
    let reason = loop {
        match next_event(&mut receiver).await {
            PushEvent::ConnectionState {
                state: ConnectionState::Disconnected,
                ..
            } => disconnects += 1,
            PushEvent::ConnectionState {
                state: ConnectionState::Stopped,
                reason,
            } => break reason,
            PushEvent::ConnectionState {
                state: ConnectionState::Starting,
                ..
            } => {}
            other => panic!("unexpected event: {other:?}"),
        }
    };

    assert_eq!(disconnects, 3);
    assert_eq!(reason.as_deref(), Some("Too many retries"));

    timeout(Duration::from_secs(5), listen_task)
        .await
        .expect("listen task did not exit after the retry ceiling")
        .unwrap();
}

#[tokio::test]
async fn test_keepalive_ping_pong_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let Ok(mut websocket) = tokio_tungstenite::accept_async(stream).await else {
            return;
        };
        while let Some(Ok(message)) = websocket.next().await {
            if let tokio_tungstenite::tungstenite::Message::Text(text) = message {
                if text.as_str().contains("ping") {
                    let _ = websocket
                        .send(tokio_tungstenite::tungstenite::Message::Text(
                            r#"{"pong":1}"#.into(),
                        ))
                        .await;
                }
            }
        }
    });

    let (socket, mut receiver) = socket_for(port, None);
    let listen_socket = socket.clone();
    tokio::spawn(async move { listen_socket.listen().await });

    loop {
        if matches!(
            next_event(&mut receiver).await,
            PushEvent::ConnectionState {
                state: ConnectionState::Connected,
                ..
            }
        ) {
            break;
        }
    }

    socket.keepalive().await;

    // The charger's pong comes back as a data frame and refreshes the
    // liveness timestamp.
    match next_event(&mut receiver).await {
        PushEvent::Data(payload) => assert!(payload.contains_key("pong")),
        other => panic!("expected the pong payload, got {other:?}"),
    }

    // With a fresh pong the next keepalive sends another ping without any
    // state change.
    socket.keepalive().await;
    assert_eq!(socket.state(), ConnectionState::Connected);
    match next_event(&mut receiver).await {
        PushEvent::Data(payload) => assert!(payload.contains_key("pong")),
        other => panic!("expected the second pong, got {other:?}"),
    }

    socket.close().await;
}

#[tokio::test]
async fn test_server_close_disconnects_then_retries() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        // Accept a single connection and close it straight away; later
        // dials are refused once the listener is dropped.
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        if let Ok(mut websocket) = tokio_tungstenite::accept_async(stream).await {
            let _ = websocket.close(None).await;
        }
    });

    let (socket, mut receiver) = socket_for(port, None);
    let listen_socket = socket.clone();
    tokio::spawn(async move { listen_socket.listen().await });

    loop {
        if matches!(
            next_event(&mut receiver).await,
            PushEvent::ConnectionState {
                state: ConnectionState::Connected,
                ..
            }
        ) {
            break;
        }
    }

    // The server closed without an error frame: recoverable.
    match next_event(&mut receiver).await {
        PushEvent::ConnectionState { state, reason } => {
            assert_eq!(state, ConnectionState::Disconnected);
            assert!(reason.is_none());
        }
        other => panic!("expected a disconnect, got {other:?}"),
    }

    // After the idle grace the loop dials again.
    assert!(matches!(
        next_event(&mut receiver).await,
        PushEvent::ConnectionState {
            state: ConnectionState::Starting,
            ..
        }
    ));

    socket.close().await;
}
