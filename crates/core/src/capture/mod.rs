//! Boundary with the packet capture facility.
//!
//! The monitor never decodes packets itself. A capture source hands over the
//! already-extracted TCP fields as raw text, exactly as the dissector printed
//! them, and the ingestor decides what is usable.

use std::pin::Pin;

use futures::Stream;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod tshark;

pub use tshark::TsharkCapture;

/// TCP metadata of one captured packet. Each field is independently optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PacketMetadata {
    /// Raw window size value (`tcp.window_size_value`).
    pub window_size: Option<String>,
    /// Raw ACK round-trip time annotation in seconds (`tcp.analysis.ack_rtt`).
    pub ack_rtt: Option<String>,
}

impl PacketMetadata {
    pub fn new(window_size: Option<&str>, ack_rtt: Option<&str>) -> Self {
        Self {
            window_size: window_size.map(ToOwned::to_owned),
            ack_rtt: ack_rtt.map(ToOwned::to_owned),
        }
    }
}

/// Failures of the capture facility as a whole. Any of these ends ingestion.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture tool not found: {0}")]
    ToolNotFound(String),

    #[error("failed to start capture: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("capture i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("capture process exited: {0}")]
    Exited(String),
}

/// The receiving side of an in-process capture source went away.
#[derive(Debug, Error)]
#[error("capture stream closed")]
pub struct CaptureClosed;

/// Stream of packet events produced by a capture facility.
pub type CaptureStream = Pin<Box<dyn Stream<Item = Result<PacketMetadata, CaptureError>> + Send>>;

/// Sending half of an in-process capture source.
///
/// Lets embedders (and tests) feed packet metadata from their own capture
/// machinery. Dropping every sender ends the stream.
#[derive(Debug, Clone)]
pub struct CaptureSender {
    tx: mpsc::Sender<Result<PacketMetadata, CaptureError>>,
}

impl CaptureSender {
    pub async fn send(&self, packet: PacketMetadata) -> Result<(), CaptureClosed> {
        self.tx.send(Ok(packet)).await.map_err(|_| CaptureClosed)
    }

    /// Reports a fatal capture failure; the ingestor stops once it reads it.
    pub async fn fail(&self, error: CaptureError) {
        if self.tx.send(Err(error)).await.is_err() {
            tracing::debug!("capture stream already closed, dropping failure report");
        }
    }
}

/// Creates an in-process capture source with the given buffer size.
pub fn channel(buffer: usize) -> (CaptureSender, CaptureStream) {
    let (tx, mut rx) = mpsc::channel(buffer);
    let stream = futures::stream::poll_fn(move |cx| rx.poll_recv(cx));
    (CaptureSender { tx }, Box::pin(stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn channel_delivers_in_order_and_ends_on_drop() -> testresult::TestResult {
        let (tx, mut stream) = channel(8);
        tx.send(PacketMetadata::new(Some("100"), None)).await?;
        tx.send(PacketMetadata::new(None, Some("0.01"))).await?;
        drop(tx);

        let first = stream.next().await.ok_or("missing")??;
        assert_eq!(first.window_size.as_deref(), Some("100"));
        let second = stream.next().await.ok_or("missing")??;
        assert_eq!(second.ack_rtt.as_deref(), Some("0.01"));
        assert!(stream.next().await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn failure_is_forwarded() {
        let (tx, mut stream) = channel(1);
        tx.fail(CaptureError::Exited("session ended".into())).await;
        assert!(matches!(
            stream.next().await,
            Some(Err(CaptureError::Exited(_)))
        ));
    }
}
