//! Chat client state: transcript, connection flag, in-flight response and send gating.
//!
//! `ChatClient` does no I/O. The owner feeds it connection events and inbound frames
//! (see [`crate::connection`]) and transmits whatever [`ChatClient::submit`] returns.
//! Views render from [`ChatClient::messages`] and may drain [`ClientEvent`]s to react
//! to incremental changes (e.g. the terminal prints each chunk as it arrives).

use crate::connection::ConnectionEvent;
use crate::protocol::{Capabilities, ChatChunk, ServerFrame};
use crate::upload::Attachment;
use chrono::{DateTime, Local};

/// Sequential message id, unique within one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
    /// Client notices such as the capability summary.
    System,
    /// Visible error bubbles.
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Text(String),
    Image {
        name: String,
        mime: &'static str,
        data: String,
    },
    File {
        name: String,
    },
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub id: MessageId,
    pub role: Role,
    pub body: MessageBody,
    pub sent_at: DateTime<Local>,
}

impl ChatMessage {
    /// Text content, if this is a text message.
    pub fn text(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Text(t) => Some(t),
            _ => None,
        }
    }
}

/// Incremental changes since the last [`ChatClient::drain_events`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    MessageAdded(MessageId),
    MessageRemoved(MessageId),
    ResponseChunk { id: MessageId, delta: String },
    /// The in-flight response ended; `None` when the turn produced no message.
    ResponseFinished { id: Option<MessageId> },
    ConnectionChanged(bool),
}

/// Why a submission was not sent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("message is empty")]
    Empty,
    #[error("a response is still being generated")]
    Generating,
    #[error("not connected to the server")]
    NotConnected,
}

#[derive(Debug, Default)]
pub struct ChatClient {
    connected: bool,
    generating: bool,
    capabilities: Option<Capabilities>,
    messages: Vec<ChatMessage>,
    /// The single assistant message receiving chunks.
    in_flight: Option<MessageId>,
    next_id: u64,
    events: Vec<ClientEvent>,
}

impl ChatClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_generating(&self) -> bool {
        self.generating
    }

    pub fn capabilities(&self) -> Option<&Capabilities> {
        self.capabilities.as_ref()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn message(&self, id: MessageId) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Id of the assistant message currently receiving chunks.
    pub fn in_flight_id(&self) -> Option<MessageId> {
        self.in_flight
    }

    /// Send control and input are enabled only when connected, idle, and the input is not blank.
    pub fn can_send(&self, input: &str) -> bool {
        self.connected && !self.generating && !input.trim().is_empty()
    }

    /// Whether the text input accepts typing.
    pub fn input_enabled(&self) -> bool {
        !self.generating
    }

    /// Tooltip for the send control.
    pub fn send_title(&self) -> &'static str {
        if !self.connected {
            "Not connected"
        } else if self.generating {
            "Waiting for response"
        } else {
            "Send message"
        }
    }

    pub fn drain_events(&mut self) -> Vec<ClientEvent> {
        std::mem::take(&mut self.events)
    }

    fn push(&mut self, role: Role, body: MessageBody) -> MessageId {
        let id = MessageId(self.next_id);
        self.next_id += 1;
        self.messages.push(ChatMessage {
            id,
            role,
            body,
            sent_at: Local::now(),
        });
        self.events.push(ClientEvent::MessageAdded(id));
        id
    }

    fn remove(&mut self, id: MessageId) {
        let before = self.messages.len();
        self.messages.retain(|m| m.id != id);
        if self.messages.len() != before {
            self.events.push(ClientEvent::MessageRemoved(id));
        }
    }

    /// Append a visible error bubble.
    pub fn push_error(&mut self, text: impl Into<String>) -> MessageId {
        self.push(Role::Error, MessageBody::Text(text.into()))
    }

    /// Append a client notice.
    pub fn push_notice(&mut self, text: impl Into<String>) -> MessageId {
        self.push(Role::System, MessageBody::Text(text.into()))
    }

    // ---- connection lifecycle ----

    pub fn on_open(&mut self) {
        log::info!("connected");
        self.connected = true;
        self.events.push(ClientEvent::ConnectionChanged(true));
    }

    /// The socket closed. A response that was still streaming is abandoned: partial text
    /// is kept, an empty placeholder is removed, and sending is unblocked.
    pub fn on_close(&mut self) {
        if self.connected {
            log::info!("disconnected");
        }
        self.connected = false;
        if self.generating {
            log::warn!("connection closed while a response was streaming");
            self.end_turn();
        }
        self.events.push(ClientEvent::ConnectionChanged(false));
    }

    /// Connection-level error. Shown to the user; recovery is left to the reconnect loop.
    pub fn on_error(&mut self, error: &str) {
        log::error!("connection error: {}", error);
        self.push_error(format!("Connection error: {}", error));
    }

    /// Feed one driver event into the client.
    pub fn apply(&mut self, event: &ConnectionEvent) {
        match event {
            ConnectionEvent::Opened => self.on_open(),
            ConnectionEvent::Frame(text) => self.handle_frame(text),
            ConnectionEvent::Closed { .. } => self.on_close(),
            ConnectionEvent::Error(e) => self.on_error(e),
            ConnectionEvent::SendFailed { reason } => self.on_send_failed(reason),
            ConnectionEvent::Connecting { .. } | ConnectionEvent::ReconnectScheduled { .. } => {}
        }
    }

    // ---- inbound ----

    /// Parse and dispatch one inbound text frame. Malformed frames are logged and dropped.
    pub fn handle_frame(&mut self, text: &str) {
        match ServerFrame::parse(text) {
            Ok(frame) => {
                log::debug!("inbound {}", frame.tag());
                self.dispatch(frame)
            }
            Err(e) => log::error!("dropping inbound frame: {}", e),
        }
    }

    pub fn dispatch(&mut self, frame: ServerFrame) {
        match frame {
            ServerFrame::ConnectionEstablished { capabilities } => {
                log::info!("server capabilities: {:?}", capabilities);
                let summary = capability_summary(&capabilities);
                self.capabilities = Some(capabilities);
                self.push_notice(summary);
            }
            ServerFrame::ChatResponse(chunk) => self.on_chunk(chunk),
            ServerFrame::Transcription { text } => {
                log::info!("transcription: {}", text.as_deref().unwrap_or(""));
            }
            ServerFrame::AudioChunk(_) => log::debug!("audio chunk received"),
            ServerFrame::AudioFinished => log::debug!("audio finished"),
            ServerFrame::ChatFinished => {
                if self.generating || self.in_flight.is_some() {
                    self.end_turn();
                } else {
                    log::debug!("chat_finished with no response in flight");
                }
            }
            ServerFrame::Unknown { typ } => log::warn!("unknown message type: {}", typ),
        }
    }

    fn on_chunk(&mut self, chunk: ChatChunk) {
        let id = match self.in_flight {
            Some(id) => id,
            None => {
                // Server-initiated response: no placeholder from the send path.
                let id = self.push(Role::Assistant, MessageBody::Text(String::new()));
                self.in_flight = Some(id);
                self.generating = true;
                id
            }
        };
        let delta = chunk.delta();
        match self.messages.iter_mut().rev().find(|m| m.id == id) {
            Some(ChatMessage {
                body: MessageBody::Text(text),
                ..
            }) => text.push_str(delta),
            _ => {
                log::warn!("in-flight message {:?} is gone, dropping chunk", id);
                return;
            }
        }
        if chunk.is_finish_marker() {
            log::debug!("chunk marked finish; turn ends on chat_finished");
        }
        if !delta.is_empty() {
            self.events.push(ClientEvent::ResponseChunk {
                id,
                delta: delta.to_string(),
            });
        }
    }

    fn end_turn(&mut self) {
        let finished = self.in_flight.take().and_then(|id| {
            let empty = self.message(id).and_then(ChatMessage::text) == Some("");
            if empty {
                self.remove(id);
                None
            } else {
                Some(id)
            }
        });
        self.generating = false;
        self.events.push(ClientEvent::ResponseFinished { id: finished });
    }

    // ---- outbound ----

    /// Validate and record a user message. On success returns the trimmed text to transmit
    /// as one raw text frame; the user bubble and the assistant placeholder are already in
    /// the transcript and the client is generating.
    pub fn submit(&mut self, input: &str) -> Result<String, SubmitError> {
        let text = input.trim();
        if text.is_empty() {
            return Err(SubmitError::Empty);
        }
        if self.generating {
            return Err(SubmitError::Generating);
        }
        if !self.connected {
            self.push_error("Not connected to the server. Waiting to reconnect...");
            return Err(SubmitError::NotConnected);
        }
        self.push(Role::User, MessageBody::Text(text.to_string()));
        self.generating = true;
        let id = self.push(Role::Assistant, MessageBody::Text(String::new()));
        self.in_flight = Some(id);
        Ok(text.to_string())
    }

    /// The transport could not deliver a submitted message.
    pub fn on_send_failed(&mut self, reason: &str) {
        log::error!("failed to send message: {}", reason);
        self.push_error(format!("Failed to send message: {}", reason));
        if self.generating {
            self.end_turn();
        }
    }

    /// Show an attachment in the transcript as a user message. Nothing is transmitted.
    pub fn attach(&mut self, attachment: Attachment) -> MessageId {
        let body = match attachment {
            Attachment::Image { name, mime, data } => MessageBody::Image { name, mime, data },
            Attachment::File { name } => MessageBody::File { name },
        };
        self.push(Role::User, body)
    }
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

/// Human-readable summary shown once per connection.
pub fn capability_summary(caps: &Capabilities) -> String {
    format!(
        "Connected. Input: {}. Output: {}. Features: {}.",
        join_or_none(&caps.modalities.input),
        join_or_none(&caps.modalities.output),
        join_or_none(&caps.features)
    )
}

/// Standalone HTML page of a conversation, one `div.message.<role>` per message.
/// Text goes through the escaping markup renderer; images are inlined as data URLs.
pub fn transcript_html(messages: &[ChatMessage]) -> String {
    let mut out = String::from(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Joshua transcript</title></head>\n<body>\n",
    );
    for m in messages {
        let role = match m.role {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Error => "error",
        };
        let body = match &m.body {
            MessageBody::Text(t) => crate::markup::render_html(t),
            MessageBody::Image { name, mime, data } => format!(
                "<img src=\"data:{};base64,{}\" alt=\"{}\">",
                mime,
                data,
                crate::markup::escape_html(name)
            ),
            MessageBody::File { name } => {
                format!("&#128206; {}", crate::markup::escape_html(name))
            }
        };
        out.push_str(&format!(
            "<div class=\"message {}\"><time>{}</time> {}</div>\n",
            role,
            m.sent_at.format("%H:%M"),
            body
        ));
    }
    out.push_str("</body></html>\n");
    out
}
