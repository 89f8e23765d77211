//! Backend WebSocket protocol types.
//!
//! Client → server frames are raw UTF-8 text (the user's message, no envelope).
//! Server → client frames are JSON objects with a mandatory `type` tag.

use serde::{Deserialize, Serialize};

/// Modalities and features advertised once per connection. Display only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub modalities: Modalities,
    #[serde(default)]
    pub features: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modalities {
    #[serde(default)]
    pub input: Vec<String>,
    #[serde(default)]
    pub output: Vec<String>,
}

/// One streamed piece of an assistant response (`chat_response`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatChunk {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub metadata: Option<ChunkMetadata>,
}

/// Optional per-chunk metadata. A value of `"finish"` in either field marks a finish chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default)]
    pub chunk_type: Option<String>,
    #[serde(default)]
    pub response_type: Option<String>,
}

impl ChatChunk {
    /// Chunk text: `text`, falling back to `content`, else empty.
    pub fn delta(&self) -> &str {
        self.text
            .as_deref()
            .or(self.content.as_deref())
            .unwrap_or("")
    }

    /// True when metadata flags this chunk as the end of the response.
    pub fn is_finish_marker(&self) -> bool {
        self.metadata.as_ref().is_some_and(|m| {
            m.chunk_type.as_deref() == Some("finish") || m.response_type.as_deref() == Some("finish")
        })
    }
}

/// Parsed server → client frame, one variant per `type` tag.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    ConnectionEstablished { capabilities: Capabilities },
    ChatResponse(ChatChunk),
    Transcription { text: Option<String> },
    AudioChunk(serde_json::Value),
    AudioFinished,
    ChatFinished,
    /// A well-formed frame with a tag this client does not handle.
    Unknown { typ: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid JSON frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame has no string \"type\" field")]
    MissingType,
    #[error("invalid {typ} payload: {source}")]
    Payload {
        typ: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
struct ConnectionEstablishedPayload {
    #[serde(default)]
    capabilities: Capabilities,
}

#[derive(Deserialize)]
struct TranscriptionPayload {
    #[serde(default)]
    text: Option<String>,
}

impl ServerFrame {
    /// Parse one text frame. The `type` tag is read first so unknown tags are reported by name.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let typ = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or(ProtocolError::MissingType)?
            .to_string();
        let payload_err = |source| ProtocolError::Payload {
            typ: typ.clone(),
            source,
        };
        let frame = match typ.as_str() {
            "connection_established" => {
                let p: ConnectionEstablishedPayload =
                    serde_json::from_value(value).map_err(payload_err)?;
                ServerFrame::ConnectionEstablished {
                    capabilities: p.capabilities,
                }
            }
            "chat_response" => {
                ServerFrame::ChatResponse(serde_json::from_value(value).map_err(payload_err)?)
            }
            "transcription" => {
                let p: TranscriptionPayload = serde_json::from_value(value).map_err(payload_err)?;
                ServerFrame::Transcription { text: p.text }
            }
            "audio_chunk" => ServerFrame::AudioChunk(value),
            "audio_finished" => ServerFrame::AudioFinished,
            "chat_finished" => ServerFrame::ChatFinished,
            _ => ServerFrame::Unknown { typ: typ.clone() },
        };
        Ok(frame)
    }

    /// The wire `type` tag of this frame.
    pub fn tag(&self) -> &str {
        match self {
            ServerFrame::ConnectionEstablished { .. } => "connection_established",
            ServerFrame::ChatResponse(_) => "chat_response",
            ServerFrame::Transcription { .. } => "transcription",
            ServerFrame::AudioChunk(_) => "audio_chunk",
            ServerFrame::AudioFinished => "audio_finished",
            ServerFrame::ChatFinished => "chat_finished",
            ServerFrame::Unknown { typ } => typ,
        }
    }
}
