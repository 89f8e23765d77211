//! Integration tests: run the connection driver against a local tokio-tungstenite server.
//! Reconnect delays are shortened so each test finishes in well under a second.

use futures_util::{SinkExt, StreamExt};
use joshua::config::{EndpointConfig, ReconnectConfig};
use joshua::connection::{self, ConnectionEvent};
use joshua::{ChatClient, Role};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_tungstenite::tungstenite::Message;

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

fn endpoint(port: u16) -> EndpointConfig {
    EndpointConfig {
        host: "127.0.0.1".to_string(),
        port,
        secure: false,
    }
}

fn fast_reconnect() -> ReconnectConfig {
    ReconnectConfig {
        initial_delay_ms: 50,
        max_delay_ms: 200,
        multiplier: 2,
    }
}

async fn bind() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
    let port = listener.local_addr().expect("local_addr").port();
    (listener, port)
}

async fn next_event(rx: &mut UnboundedReceiver<ConnectionEvent>) -> ConnectionEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for connection event")
        .expect("connection task stopped")
}

/// Skip events until one matches `pred`; returns the skipped events and the match.
async fn wait_for(
    rx: &mut UnboundedReceiver<ConnectionEvent>,
    pred: impl Fn(&ConnectionEvent) -> bool,
) -> (Vec<ConnectionEvent>, ConnectionEvent) {
    let mut skipped = Vec::new();
    loop {
        let ev = next_event(rx).await;
        if pred(&ev) {
            return (skipped, ev);
        }
        skipped.push(ev);
    }
}

#[tokio::test]
async fn streamed_response_reaches_the_client() {
    let (listener, port) = bind().await;
    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.expect("accept");
        let mut ws = tokio_tungstenite::accept_async(tcp).await.expect("handshake");
        ws.send(Message::Text(
            r#"{"type":"connection_established","capabilities":{"modalities":{"input":["text"],"output":["text"]},"features":["vision"]}}"#.to_string(),
        ))
        .await
        .expect("send caps");
        let received = loop {
            match ws.next().await {
                Some(Ok(Message::Text(t))) => break t,
                Some(Ok(_)) => continue,
                other => panic!("client went away: {:?}", other),
            }
        };
        for frame in [
            r#"{"type":"chat_response","text":"Hel"}"#,
            r#"{"type":"chat_response","text":"lo"}"#,
            r#"{"type":"chat_finished"}"#,
        ] {
            ws.send(Message::Text(frame.to_string())).await.expect("send chunk");
        }
        // Keep the socket open until the client shuts down.
        while let Some(Ok(_)) = ws.next().await {}
        received
    });

    let (handle, mut events, task) = connection::spawn(endpoint(port), fast_reconnect());
    let mut client = ChatClient::new();

    loop {
        let ev = next_event(&mut events).await;
        client.apply(&ev);
        if client.capabilities().is_some() {
            break;
        }
    }
    let payload = client.submit("  hello  ").expect("submit");
    handle.send_text(payload).expect("queue send");

    while client.is_generating() {
        let ev = next_event(&mut events).await;
        client.apply(&ev);
    }

    let reply = client.messages().last().expect("reply");
    assert_eq!(reply.role, Role::Assistant);
    assert_eq!(reply.text(), Some("Hello"));
    assert_eq!(
        client.messages().iter().filter(|m| m.role == Role::Assistant).count(),
        1
    );

    handle.shutdown();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("driver did not stop")
        .expect("driver panicked");
    let received = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not finish")
        .expect("server panicked");
    assert_eq!(received, "hello");
}

#[tokio::test]
async fn close_schedules_exactly_one_reconnect() {
    let (listener, port) = bind().await;
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    tokio::spawn(async move {
        loop {
            let Ok((tcp, _)) = listener.accept().await else { return };
            let n = counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(tcp).await else { return };
                if n == 0 {
                    // First connection: drop it right away.
                    let _ = ws.close(None).await;
                    while let Some(Ok(_)) = ws.next().await {}
                } else {
                    while let Some(Ok(_)) = ws.next().await {}
                }
            });
        }
    });

    let (handle, mut events, _task) = connection::spawn(endpoint(port), fast_reconnect());

    wait_for(&mut events, |e| *e == ConnectionEvent::Opened).await;
    wait_for(&mut events, |e| matches!(e, ConnectionEvent::Closed { .. })).await;
    let (_, scheduled) =
        wait_for(&mut events, |e| matches!(e, ConnectionEvent::ReconnectScheduled { .. })).await;
    assert_eq!(
        scheduled,
        ConnectionEvent::ReconnectScheduled {
            delay: Duration::from_millis(50),
            attempt: 1
        }
    );
    let (skipped, _) = wait_for(&mut events, |e| *e == ConnectionEvent::Opened).await;
    assert_eq!(
        skipped
            .iter()
            .filter(|e| matches!(e, ConnectionEvent::Connecting { .. }))
            .count(),
        1
    );

    // Well past several backoff periods: no further dials happen while connected.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(accepted.load(Ordering::SeqCst), 2);
    while let Ok(ev) = events.try_recv() {
        assert!(
            !matches!(ev, ConnectionEvent::Connecting { .. } | ConnectionEvent::Opened),
            "unexpected extra connection: {:?}",
            ev
        );
    }

    handle.shutdown();
}

#[tokio::test]
async fn set_endpoint_moves_to_the_new_server() {
    let (first, first_port) = bind().await;
    let (second, second_port) = bind().await;
    for listener in [first, second] {
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(tcp).await else { return };
                    while let Some(Ok(_)) = ws.next().await {}
                });
            }
        });
    }

    let (handle, mut events, _task) = connection::spawn(endpoint(first_port), fast_reconnect());
    wait_for(&mut events, |e| *e == ConnectionEvent::Opened).await;

    handle.set_endpoint(endpoint(second_port)).expect("set endpoint");
    let (_, closed) =
        wait_for(&mut events, |e| matches!(e, ConnectionEvent::Closed { .. })).await;
    assert_eq!(
        closed,
        ConnectionEvent::Closed {
            reason: Some("endpoint changed".to_string())
        }
    );
    let (skipped, _) = wait_for(&mut events, |e| *e == ConnectionEvent::Opened).await;
    assert!(skipped.contains(&ConnectionEvent::Connecting {
        url: format!("ws://127.0.0.1:{}", second_port)
    }));
    assert!(!skipped
        .iter()
        .any(|e| matches!(e, ConnectionEvent::ReconnectScheduled { .. })));

    handle.shutdown();
}

#[tokio::test]
async fn unreachable_server_backs_off_and_rejects_sends() {
    let port = free_port();
    let (handle, mut events, task) = connection::spawn(endpoint(port), fast_reconnect());

    wait_for(&mut events, |e| matches!(e, ConnectionEvent::Error(_))).await;
    let (_, first) =
        wait_for(&mut events, |e| matches!(e, ConnectionEvent::ReconnectScheduled { .. })).await;
    let (_, second) =
        wait_for(&mut events, |e| matches!(e, ConnectionEvent::ReconnectScheduled { .. })).await;
    assert_eq!(
        first,
        ConnectionEvent::ReconnectScheduled {
            delay: Duration::from_millis(50),
            attempt: 1
        }
    );
    assert_eq!(
        second,
        ConnectionEvent::ReconnectScheduled {
            delay: Duration::from_millis(100),
            attempt: 2
        }
    );

    handle.send_text("anyone there?").expect("driver running");
    let (_, failed) =
        wait_for(&mut events, |e| matches!(e, ConnectionEvent::SendFailed { .. })).await;
    assert_eq!(
        failed,
        ConnectionEvent::SendFailed {
            reason: "not connected".to_string()
        }
    );

    handle.shutdown();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("driver did not stop")
        .expect("driver panicked");
    assert!(handle.send_text("late").is_err());
}
