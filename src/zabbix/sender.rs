//! Trapper client: one TCP connection per batch.

use super::protocol::{encode_request, read_response, SenderError, SenderItem, SenderResponse};

use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// Delivers batches to the Zabbix trapper port.
#[derive(Debug, Clone)]
pub struct Sender {
    addr: String,
    timeout: Duration,
}

impl Sender {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Self {
        Self {
            addr: format!("{}:{}", host, port),
            timeout,
        }
    }

    /// Send a whole batch in one request and wait for the acknowledgement.
    ///
    /// The exchange is bounded by the sender timeout; a response other than
    /// `success` is returned as [`SenderError::Rejected`].
    pub async fn send(&self, items: &[SenderItem]) -> Result<SenderResponse, SenderError> {
        let frame = encode_request(items)?;

        let response = tokio::time::timeout(self.timeout, self.exchange(&frame))
            .await
            .map_err(|_| SenderError::Timeout {
                addr: self.addr.clone(),
                timeout: self.timeout,
            })??;

        if !response.is_success() {
            return Err(SenderError::Rejected(
                response.info.unwrap_or(response.response),
            ));
        }

        match response.processed_info() {
            Some(info) if info.failed > 0 => tracing::warn!(
                "Zabbix processed {} of {} items, {} failed",
                info.processed,
                info.total,
                info.failed
            ),
            _ => tracing::debug!("Zabbix response: {:?}", response),
        }

        Ok(response)
    }

    /// Send a single item, wrapped as a one-element batch.
    pub async fn send_one(&self, item: SenderItem) -> Result<SenderResponse, SenderError> {
        self.send(std::slice::from_ref(&item)).await
    }

    async fn exchange(&self, frame: &[u8]) -> Result<SenderResponse, SenderError> {
        let mut stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|source| SenderError::Connect {
                addr: self.addr.clone(),
                source,
            })?;

        stream.write_all(frame).await?;
        stream.flush().await?;

        let response = read_response(&mut stream).await?;
        let _ = stream.shutdown().await;
        Ok(response)
    }
}
