//! WebSocket connection driver.
//!
//! One tokio task per client owns the socket and the reconnect timer. The owner talks to
//! it through a [`ConnectionHandle`] (outgoing text, endpoint changes, shutdown) and
//! receives [`ConnectionEvent`]s. After a close or a failed connect the task sleeps for
//! the next backoff delay and tries again; because that sleep is the only timer and it
//! lives inside the task, reconnect attempts can never overlap.

use crate::backoff::Backoff;
use crate::config::{EndpointConfig, ReconnectConfig};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What the driver reports to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connecting { url: String },
    Opened,
    /// One inbound text frame, unparsed.
    Frame(String),
    Closed { reason: Option<String> },
    Error(String),
    ReconnectScheduled { delay: Duration, attempt: u32 },
    /// An outgoing message could not be written.
    SendFailed { reason: String },
}

#[derive(Debug)]
enum Command {
    Send(String),
    SetEndpoint(EndpointConfig),
    Shutdown,
}

/// Cloneable sender side of a running driver.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    tx: mpsc::UnboundedSender<Command>,
}

const DRIVER_STOPPED: &str = "connection task stopped";

impl ConnectionHandle {
    /// Queue one raw text frame. Fails only when the driver has stopped; a closed socket is
    /// reported asynchronously as [`ConnectionEvent::SendFailed`].
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), String> {
        self.tx
            .send(Command::Send(text.into()))
            .map_err(|_| DRIVER_STOPPED.to_string())
    }

    /// Point the driver at a new endpoint. Any open socket is closed and any pending
    /// reconnect timer is cancelled; the new endpoint is dialled immediately.
    pub fn set_endpoint(&self, endpoint: EndpointConfig) -> Result<(), String> {
        self.tx
            .send(Command::SetEndpoint(endpoint))
            .map_err(|_| DRIVER_STOPPED.to_string())
    }

    /// Close the socket and stop the driver. No reconnect follows.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }
}

/// Spawn the driver on the current tokio runtime.
pub fn spawn(
    endpoint: EndpointConfig,
    reconnect: ReconnectConfig,
) -> (
    ConnectionHandle,
    mpsc::UnboundedReceiver<ConnectionEvent>,
    JoinHandle<()>,
) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(endpoint, reconnect, cmd_rx, event_tx));
    (ConnectionHandle { tx: cmd_tx }, event_rx, task)
}

/// How one connected session ended.
enum SessionEnd {
    Closed(Option<String>),
    Reconfigure(EndpointConfig),
    Shutdown,
}

/// How a connect attempt or a backoff wait ended early (or not).
enum Interrupt<T> {
    Done(T),
    Reconfigure(EndpointConfig),
    Shutdown,
}

async fn run(
    mut endpoint: EndpointConfig,
    reconnect: ReconnectConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
) {
    let mut backoff = Backoff::new(&reconnect);
    loop {
        if events.is_closed() {
            log::debug!("event receiver dropped, stopping connection task");
            return;
        }
        let url = endpoint.url();
        log::info!("connecting to {}", url);
        let _ = events.send(ConnectionEvent::Connecting { url: url.clone() });

        match connect(&url, &mut cmd_rx, &events).await {
            Interrupt::Done(Ok(ws)) => {
                backoff.reset();
                log::info!("connected to {}", url);
                let _ = events.send(ConnectionEvent::Opened);
                match session(ws, &mut cmd_rx, &events).await {
                    SessionEnd::Shutdown => {
                        let _ = events.send(ConnectionEvent::Closed { reason: None });
                        return;
                    }
                    SessionEnd::Reconfigure(next) => {
                        let _ = events.send(ConnectionEvent::Closed {
                            reason: Some("endpoint changed".to_string()),
                        });
                        endpoint = next;
                        continue;
                    }
                    SessionEnd::Closed(reason) => {
                        log::info!(
                            "connection to {} closed{}",
                            url,
                            reason.as_deref().map(|r| format!(": {}", r)).unwrap_or_default()
                        );
                        let _ = events.send(ConnectionEvent::Closed { reason });
                    }
                }
            }
            Interrupt::Done(Err(e)) => {
                log::warn!("connect to {} failed: {}", url, e);
                let _ = events.send(ConnectionEvent::Error(e));
            }
            Interrupt::Reconfigure(next) => {
                endpoint = next;
                backoff.reset();
                continue;
            }
            Interrupt::Shutdown => return,
        }

        let delay = backoff.next_delay();
        log::info!("reconnecting in {:?} (attempt {})", delay, backoff.attempt());
        let _ = events.send(ConnectionEvent::ReconnectScheduled {
            delay,
            attempt: backoff.attempt(),
        });
        match wait(delay, &mut cmd_rx, &events).await {
            Interrupt::Done(()) => {}
            Interrupt::Reconfigure(next) => {
                endpoint = next;
                backoff.reset();
            }
            Interrupt::Shutdown => return,
        }
    }
}

/// Handle a command that arrives while no socket is open.
fn offline_command(
    cmd: Option<Command>,
    events: &mpsc::UnboundedSender<ConnectionEvent>,
) -> Option<Interrupt<()>> {
    match cmd {
        Some(Command::Send(_)) => {
            let _ = events.send(ConnectionEvent::SendFailed {
                reason: "not connected".to_string(),
            });
            None
        }
        Some(Command::SetEndpoint(next)) => Some(Interrupt::Reconfigure(next)),
        Some(Command::Shutdown) | None => Some(Interrupt::Shutdown),
    }
}

async fn connect(
    url: &str,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    events: &mpsc::UnboundedSender<ConnectionEvent>,
) -> Interrupt<Result<Socket, String>> {
    let attempt = tokio_tungstenite::connect_async(url);
    tokio::pin!(attempt);
    loop {
        tokio::select! {
            res = &mut attempt => {
                return Interrupt::Done(res.map(|(ws, _)| ws).map_err(|e| e.to_string()));
            }
            cmd = cmd_rx.recv() => {
                match offline_command(cmd, events) {
                    Some(Interrupt::Reconfigure(next)) => return Interrupt::Reconfigure(next),
                    Some(_) => return Interrupt::Shutdown,
                    None => {}
                }
            }
        }
    }
}

async fn wait(
    delay: Duration,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    events: &mpsc::UnboundedSender<ConnectionEvent>,
) -> Interrupt<()> {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return Interrupt::Done(()),
            cmd = cmd_rx.recv() => {
                if let Some(interrupt) = offline_command(cmd, events) {
                    return interrupt;
                }
            }
        }
    }
}

async fn session(
    ws: Socket,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    events: &mpsc::UnboundedSender<ConnectionEvent>,
) -> SessionEnd {
    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let _ = events.send(ConnectionEvent::Frame(text));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .filter(|r| !r.is_empty());
                        return SessionEnd::Closed(reason);
                    }
                    // Binary frames are not part of the protocol; tungstenite answers pings.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::error!("websocket error: {}", e);
                        let _ = events.send(ConnectionEvent::Error(e.to_string()));
                        return SessionEnd::Closed(Some(e.to_string()));
                    }
                    None => return SessionEnd::Closed(None),
                }
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Send(text)) => {
                        log::debug!("sending {} bytes", text.len());
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            let _ = events.send(ConnectionEvent::SendFailed {
                                reason: e.to_string(),
                            });
                            return SessionEnd::Closed(Some(e.to_string()));
                        }
                    }
                    Some(Command::SetEndpoint(next)) => {
                        let _ = sink.send(Message::Close(None)).await;
                        return SessionEnd::Reconfigure(next);
                    }
                    Some(Command::Shutdown) | None => {
                        let _ = sink.send(Message::Close(None)).await;
                        return SessionEnd::Shutdown;
                    }
                }
            }
        }
    }
}
