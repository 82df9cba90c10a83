use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::models::{IngestReport, RetrievalResults};
use crate::qa::SystemStatus;

/// Frames larger than this are rejected.
pub const MAX_MESSAGE_LEN: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Ping,
    Shutdown,
    Status,
    Ask(AskRequest),
    Retrieve(RetrieveRequest),
    Ingest(IngestRequest),
    Clear,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskRequest {
    pub question: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveRequest {
    pub question: String,
    #[serde(default)]
    pub top_k: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    /// Absolute path on the daemon's filesystem
    pub path: String,
    #[serde(default)]
    pub file_types: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Pong,
    ShutdownAck,
    Status(StatusResponse),
    Answer(AnswerResponse),
    Documents(RetrievalResults),
    Ingested(IngestReport),
    Cleared { removed: u64 },
    Refreshed { dropped: bool },
    Error(ErrorResponse),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub running: bool,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub idle_secs: u64,
    pub requests_served: u64,
    pub system: SystemStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResponse {
    pub answer: String,
    /// False when `answer` is guidance, a fallback, or an apology
    pub answered: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Response::Error(ErrorResponse {
            message: message.into(),
        })
    }
}

fn oversized(len: usize) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("frame of {} bytes exceeds limit", len),
    )
}

/// Serialize `msg` behind a big-endian length prefix.
pub fn encode_message(msg: &impl Serialize) -> std::io::Result<Vec<u8>> {
    let json = serde_json::to_vec(msg)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    if json.len() > MAX_MESSAGE_LEN {
        return Err(oversized(json.len()));
    }
    let len = u32::try_from(json.len()).map_err(|_| oversized(json.len()))?;

    let mut buf = Vec::with_capacity(4 + json.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&json);
    Ok(buf)
}

pub fn decode_length(buf: &[u8; 4]) -> usize {
    u32::from_be_bytes(*buf) as usize
}

/// Read one length-prefixed frame. `Ok(None)` on a clean end of stream.
pub async fn read_frame<R>(reader: &mut R) -> std::io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = decode_length(&len_buf);
    if len > MAX_MESSAGE_LEN {
        return Err(oversized(len));
    }

    let mut msg_buf = vec![0u8; len];
    reader.read_exact(&mut msg_buf).await?;
    Ok(Some(msg_buf))
}

pub async fn write_message<W>(writer: &mut W, msg: &impl Serialize) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let encoded = encode_message(msg)?;
    writer.write_all(&encoded).await
}
