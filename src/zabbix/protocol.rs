//! Zabbix trapper framing.
//!
//! Request and response share one layout:
//!
//! ```text
//! "ZBXD" | 0x01 | u32 LE body length | 4 reserved bytes | JSON body
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Magic marker plus protocol version.
pub const HEADER: &[u8; 5] = b"ZBXD\x01";

/// Header plus the 8-byte length field.
pub const FRAME_PREFIX_LEN: usize = 13;

/// Bodies larger than this are refused instead of allocated.
pub const MAX_BODY_LEN: usize = 128 * 1024 * 1024;

/// Sender error types.
#[derive(Error, Debug)]
pub enum SenderError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("exchange with {addr} timed out after {timeout:?}")]
    Timeout { addr: String, timeout: Duration },
    #[error("invalid response header {0:?}")]
    BadHeader(Vec<u8>),
    #[error("frame body of {0} bytes exceeds the limit")]
    TooLarge(usize),
    #[error("malformed JSON body: {0}")]
    Json(#[from] serde_json::Error),
    #[error("server rejected data: {0}")]
    Rejected(String),
}

/// One value sent to Zabbix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderItem {
    pub host: String,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SenderRequest<'a> {
    pub request: &'a str,
    pub data: Vec<SenderItem>,
}

/// Acknowledgement returned by the trapper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderResponse {
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
}

/// Counters reported in the `info` field of a response.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProcessedInfo {
    pub processed: u64,
    pub failed: u64,
    pub total: u64,
    pub seconds_spent: f64,
}

impl SenderResponse {
    pub fn is_success(&self) -> bool {
        self.response == "success"
    }

    /// Parse `processed: 2; failed: 0; total: 2; seconds spent: 0.000055`.
    pub fn processed_info(&self) -> Option<ProcessedInfo> {
        let info = self.info.as_deref()?;
        let mut out = ProcessedInfo::default();
        let mut matched = false;
        for part in info.split(';') {
            let Some((key, value)) = part.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "processed" => out.processed = value.parse().ok()?,
                "failed" => out.failed = value.parse().ok()?,
                "total" => out.total = value.parse().ok()?,
                "seconds spent" => out.seconds_spent = value.parse().ok()?,
                _ => continue,
            }
            matched = true;
        }
        matched.then_some(out)
    }
}

/// Serialize a batch into a complete request frame.
///
/// The batch always travels as a list, a single item becomes a one-element list.
pub fn encode_request(items: &[SenderItem]) -> Result<Vec<u8>, SenderError> {
    let body = serde_json::to_vec(&SenderRequest {
        request: "sender data",
        data: items.to_vec(),
    })?;
    encode_frame(&body)
}

/// Prefix `body` with the trapper header.
///
/// Bodies over [`MAX_BODY_LEN`] are refused, the peer would reject them.
pub fn encode_frame(body: &[u8]) -> Result<Vec<u8>, SenderError> {
    let len = u32::try_from(body.len())
        .ok()
        .filter(|&len| len as usize <= MAX_BODY_LEN)
        .ok_or(SenderError::TooLarge(body.len()))?;

    let mut frame = Vec::with_capacity(FRAME_PREFIX_LEN + body.len());
    frame.extend_from_slice(HEADER);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&[0u8; 4]);
    frame.extend_from_slice(body);
    Ok(frame)
}

/// Read one frame and return its body.
///
/// Blocks until the whole declared length has arrived; a short stream is an
/// `UnexpectedEof` I/O error.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, SenderError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 5];
    reader.read_exact(&mut header).await?;
    if &header != HEADER {
        return Err(SenderError::BadHeader(header.to_vec()));
    }

    let mut len_field = [0u8; 8];
    reader.read_exact(&mut len_field).await?;
    let len = u32::from_le_bytes([len_field[0], len_field[1], len_field[2], len_field[3]]) as usize;
    if len > MAX_BODY_LEN {
        return Err(SenderError::TooLarge(len));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> Result<(), SenderError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_frame(body)?).await?;
    writer.flush().await?;
    Ok(())
}

/// Read and decode a trapper acknowledgement.
pub async fn read_response<R>(reader: &mut R) -> Result<SenderResponse, SenderError>
where
    R: AsyncRead + Unpin,
{
    let body = read_frame(reader).await?;
    Ok(serde_json::from_slice(&body)?)
}
