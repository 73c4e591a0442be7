//! Wire protocol between the host and a render boundary.
//!
//! Frames are length-delimited JSON: a 4-byte big-endian length prefix
//! followed by the payload. Each payload is an envelope
//! `{"boundary": "<id>", "kind": "<Kind>", "payload": {...}}`.
//!
//! Decoding is strict. An envelope whose kind is unknown, or whose payload
//! carries keys the kind does not allow, decodes to `None` and is dropped
//! by the caller.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

/// Default maximum frame size: 4 MB.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Identity of one boundary instance. A fresh id is minted per render.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoundaryId(String);

impl BoundaryId {
    /// Mint an unguessable id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// The id as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BoundaryId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for BoundaryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The four message kinds of the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    /// Boundary to host: bootstrap finished.
    Ready,
    /// Host to boundary: render this.
    ExecuteRequest,
    /// Boundary to host: render finished.
    ExecuteSuccess,
    /// Boundary to host: render threw.
    ExecuteFailure,
}

impl MessageKind {
    fn parse(kind: &str) -> Option<Self> {
        match kind {
            "Ready" => Some(Self::Ready),
            "ExecuteRequest" => Some(Self::ExecuteRequest),
            "ExecuteSuccess" => Some(Self::ExecuteSuccess),
            "ExecuteFailure" => Some(Self::ExecuteFailure),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "Ready",
            Self::ExecuteRequest => "ExecuteRequest",
            Self::ExecuteSuccess => "ExecuteSuccess",
            Self::ExecuteFailure => "ExecuteFailure",
        }
    }
}

/// A handshake message with a payload matching its kind.
#[derive(Debug, Clone, PartialEq)]
pub enum SandboxMessage {
    /// Bootstrap finished; the boundary is listening.
    Ready,
    /// Render `code` against `data`.
    ExecuteRequest {
        /// Validated component source.
        code: String,
        /// Sample data passed to the component.
        data: Value,
    },
    /// The component rendered.
    ExecuteSuccess {
        /// Optional render output (markup, summary, etc.).
        data: Option<Value>,
    },
    /// The component threw; reported by the boundary's own error handler.
    ExecuteFailure {
        /// Error text from inside the boundary.
        error: String,
    },
}

impl SandboxMessage {
    /// Kind tag of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Ready => MessageKind::Ready,
            Self::ExecuteRequest { .. } => MessageKind::ExecuteRequest,
            Self::ExecuteSuccess { .. } => MessageKind::ExecuteSuccess,
            Self::ExecuteFailure { .. } => MessageKind::ExecuteFailure,
        }
    }

    fn payload(&self) -> Value {
        let mut payload = Map::new();
        match self {
            Self::Ready => {}
            Self::ExecuteRequest { code, data } => {
                payload.insert("code".into(), Value::String(code.clone()));
                payload.insert("data".into(), data.clone());
            }
            Self::ExecuteSuccess { data } => {
                if let Some(data) = data {
                    payload.insert("data".into(), data.clone());
                }
            }
            Self::ExecuteFailure { error } => {
                payload.insert("error".into(), Value::String(error.clone()));
            }
        }
        Value::Object(payload)
    }

    fn from_payload(kind: MessageKind, mut payload: Map<String, Value>) -> Option<Self> {
        let allowed: &[&str] = match kind {
            MessageKind::Ready => &[],
            MessageKind::ExecuteRequest => &["code", "data"],
            MessageKind::ExecuteSuccess => &["data"],
            MessageKind::ExecuteFailure => &["error"],
        };
        if payload.keys().any(|k| !allowed.contains(&k.as_str())) {
            return None;
        }

        match kind {
            MessageKind::Ready => Some(Self::Ready),
            MessageKind::ExecuteRequest => {
                let code = match payload.remove("code")? {
                    Value::String(code) => code,
                    _ => return None,
                };
                let data = payload.remove("data")?;
                Some(Self::ExecuteRequest { code, data })
            }
            MessageKind::ExecuteSuccess => Some(Self::ExecuteSuccess {
                data: payload.remove("data"),
            }),
            MessageKind::ExecuteFailure => match payload.remove("error")? {
                Value::String(error) => Some(Self::ExecuteFailure { error }),
                _ => None,
            },
        }
    }
}

/// A message addressed to (or from) one boundary instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Instance the message belongs to.
    pub boundary: BoundaryId,
    /// The message.
    pub message: SandboxMessage,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEnvelope {
    boundary: String,
    kind: String,
    #[serde(default)]
    payload: Map<String, Value>,
}

impl Envelope {
    /// Address `message` to `boundary`.
    pub fn new(boundary: BoundaryId, message: SandboxMessage) -> Self {
        Self { boundary, message }
    }

    /// Encode as the JSON wire shape.
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "boundary": self.boundary.as_str(),
            "kind": self.message.kind().as_str(),
            "payload": self.message.payload(),
        })
    }

    /// Strictly decode a JSON value. Anything that is not a well-formed
    /// envelope of a known kind yields `None`.
    pub fn from_value(value: Value) -> Option<Self> {
        let raw: RawEnvelope = serde_json::from_value(value).ok()?;
        let kind = MessageKind::parse(&raw.kind)?;
        let message = SandboxMessage::from_payload(kind, raw.payload)?;
        Some(Self {
            boundary: BoundaryId(raw.boundary),
            message,
        })
    }

    /// Decode frame bytes. Invalid JSON yields `None`.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let value: Value = serde_json::from_slice(bytes).ok()?;
        Self::from_value(value)
    }
}

/// Write one envelope as a length-delimited frame.
pub async fn write_envelope<W: AsyncWrite + Unpin>(
    writer: &mut W,
    envelope: &Envelope,
) -> Result<(), std::io::Error> {
    let payload = serde_json::to_vec(&envelope.to_value())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len()).map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame too large: {} bytes (max {} bytes)", payload.len(), u32::MAX),
        )
    })?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one raw frame with a size limit.
///
/// Returns `None` at a clean EOF. The payload is returned undecoded so that
/// a malformed message can be dropped without tearing down the stream.
pub async fn read_frame_with_limit<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_size: usize,
) -> Result<Option<Vec<u8>>, std::io::Error> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_size {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame too large: {len} bytes (limit: {max_size} bytes)"),
        ));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}
