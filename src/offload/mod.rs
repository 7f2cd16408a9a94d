//! Remote inference: wire protocol, transport seam and outcomes.

pub mod client;
pub mod protocol;

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::convert::ConvertError;

pub use client::TcpOffloadClient;
pub use protocol::{Detection, OffloadRequest, OffloadResponse, PayloadFormat};

#[derive(Debug, Error)]
pub enum OffloadError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed message: {0}")]
    Codec(#[from] bincode::Error),
    #[error("server closed the connection")]
    Closed,
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("frame is {width}x{height}, pipeline expects {expected_width}x{expected_height}")]
    UnexpectedSize {
        width: u32,
        height: u32,
        expected_width: u32,
        expected_height: u32,
    },
    #[error("conversion failed: {0}")]
    Convert(#[from] ConvertError),
    #[error("payload encoding failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("preparation task aborted: {0}")]
    Aborted(String),
}

impl OffloadError {
    /// Whether the failure happened before anything was sent
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            OffloadError::UnexpectedSize { .. }
                | OffloadError::Convert(_)
                | OffloadError::Encode(_)
                | OffloadError::Aborted(_)
        )
    }
}

/// Result of one frame's trip through the worker
#[derive(Debug)]
pub enum OffloadOutcome {
    /// Round-trip latency and the detections, mapped to frame space
    Success {
        latency: Duration,
        detections: Vec<Detection>,
    },
    Failure(OffloadError),
}

impl OffloadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, OffloadOutcome::Success { .. })
    }
}

/// Carries one request to the inference server and waits for its response.
///
/// Dropping the returned future abandons the request; implementations must not
/// reuse connection state left behind by an abandoned request.
#[async_trait]
pub trait OffloadTransport: Send + Sync {
    async fn round_trip(&self, request: OffloadRequest) -> Result<OffloadResponse, OffloadError>;
}
