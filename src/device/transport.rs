use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("device not connected")]
    NotConnected,
    #[error("write failed: {0}")]
    Write(String),
}

/// Byte sink towards the subwoofer.
///
/// `write` returns once the device acknowledged the bytes (write-with-response)
/// or the write failed. The transport does no framing, pacing or queueing;
/// the dispatcher that owns it does.
#[async_trait]
pub trait Transport: Send {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;
}
