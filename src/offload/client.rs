use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::{debug, info, instrument};

use super::protocol::{message_stream, recv_message, send_message, MessageStream};
use super::{OffloadError, OffloadRequest, OffloadResponse, OffloadTransport};

/// Offload transport over a single reused TCP connection.
///
/// The connection is checked out for the duration of a round trip and only
/// returned after a matching response arrived, so a failed or abandoned round
/// trip closes it and the next request reconnects.
pub struct TcpOffloadClient {
    addr: String,
    connect_timeout: Duration,
    conn: Mutex<Option<MessageStream>>,
}

impl TcpOffloadClient {
    pub fn new(addr: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout,
            conn: Mutex::new(None),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    #[instrument(skip(self), fields(addr = %self.addr))]
    async fn connect(&self) -> Result<MessageStream, OffloadError> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| OffloadError::Timeout(self.connect_timeout))?
            .map_err(|source| OffloadError::Connect {
                addr: self.addr.clone(),
                source,
            })?;
        stream.set_nodelay(true)?;
        info!("Connected to offload server");
        Ok(message_stream(stream))
    }

    fn checkout(&self) -> Option<MessageStream> {
        self.conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn checkin(&self, stream: MessageStream) {
        *self.conn.lock().unwrap_or_else(PoisonError::into_inner) = Some(stream);
    }
}

#[async_trait]
impl OffloadTransport for TcpOffloadClient {
    async fn round_trip(&self, request: OffloadRequest) -> Result<OffloadResponse, OffloadError> {
        let mut stream = match self.checkout() {
            Some(stream) => stream,
            None => self.connect().await?,
        };

        let frame_id = request.frame_id;
        send_message(&mut stream, &request).await?;

        loop {
            let response: OffloadResponse = recv_message(&mut stream).await?;
            if response.frame_id == frame_id {
                self.checkin(stream);
                return Ok(response);
            }
            debug!(
                expected = frame_id,
                got = response.frame_id,
                "Discarding stale offload response"
            );
        }
    }
}
