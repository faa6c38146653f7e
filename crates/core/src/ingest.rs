//! Ingest flow: capture events in, latest observations out.

use std::sync::Arc;

use futures::StreamExt;
use thiserror::Error;
use tokio::sync::watch;

use crate::capture::{CaptureError, CaptureStream, PacketMetadata};
use crate::observation::{Observation, SharedObservationState};

/// A metric on a single packet that could not be used. Never fatal.
#[derive(Debug, Error, PartialEq)]
pub enum FieldError {
    #[error("window size {0:?} is not a non-negative integer")]
    InvalidWindowSize(String),

    #[error("ack rtt {0:?} is not a non-negative number of seconds")]
    InvalidAckRtt(String),
}

/// Why the ingest flow stopped.
#[derive(Debug)]
pub enum IngestExit {
    /// The capture facility reported a fatal failure.
    CaptureFailed(CaptureError),
    /// The capture stream ended without an error.
    StreamEnded,
    /// Stopped on request.
    Shutdown,
}

/// Outcome of a finished ingest run.
#[derive(Debug)]
pub struct IngestReport {
    pub exit: IngestExit,
    pub packets: u64,
    pub field_errors: u64,
}

pub(crate) fn parse_window_size(raw: &str) -> Result<u64, FieldError> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| FieldError::InvalidWindowSize(raw.to_owned()))
}

/// Parses an RTT annotation in seconds and converts it to milliseconds.
pub(crate) fn parse_ack_rtt_ms(raw: &str) -> Result<f64, FieldError> {
    match raw.trim().parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs >= 0.0 => Ok(secs * 1000.0),
        _ => Err(FieldError::InvalidAckRtt(raw.to_owned())),
    }
}

/// Consumes packet metadata and keeps [`SharedObservationState`] current.
pub struct ObservationIngestor {
    state: Arc<SharedObservationState>,
    packets: u64,
    field_errors: u64,
}

impl ObservationIngestor {
    pub fn new(state: Arc<SharedObservationState>) -> Self {
        Self {
            state,
            packets: 0,
            field_errors: 0,
        }
    }

    /// Applies one packet to the shared state.
    ///
    /// The packet is always counted. Unusable fields are skipped and reported
    /// back so the caller can log them; the previous value of that metric is
    /// kept.
    pub fn ingest(&mut self, packet: &PacketMetadata) -> Vec<FieldError> {
        let mut errors = Vec::new();
        let window_size = packet
            .window_size
            .as_deref()
            .and_then(|raw| parse_window_size(raw).map_err(|e| errors.push(e)).ok());
        let rtt_ms = packet
            .ack_rtt
            .as_deref()
            .and_then(|raw| parse_ack_rtt_ms(raw).map_err(|e| errors.push(e)).ok());

        self.state.record_packet(Observation {
            window_size,
            rtt_ms,
        });
        self.packets += 1;
        self.field_errors += errors.len() as u64;
        errors
    }

    /// Drains `capture` until it fails, ends, or `shutdown` flips to `true`.
    pub async fn run(
        mut self,
        mut capture: CaptureStream,
        mut shutdown: watch::Receiver<bool>,
    ) -> IngestReport {
        let exit = loop {
            if *shutdown.borrow() {
                break IngestExit::Shutdown;
            }
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    // a dropped sender also means nobody can ask us to keep going
                    if changed.is_err() || *shutdown.borrow() {
                        break IngestExit::Shutdown;
                    }
                }
                event = capture.next() => match event {
                    Some(Ok(packet)) => {
                        for err in self.ingest(&packet) {
                            tracing::debug!(error = %err, "Skipping unusable packet field");
                        }
                    }
                    Some(Err(err)) => {
                        tracing::error!(error = %err, "Packet capture failed, ingestion stopped");
                        break IngestExit::CaptureFailed(err);
                    }
                    None => {
                        tracing::warn!("Packet capture stream ended, ingestion stopped");
                        break IngestExit::StreamEnded;
                    }
                },
            }
        };
        tracing::info!(
            packets = self.packets,
            field_errors = self.field_errors,
            "Ingest flow finished"
        );
        IngestReport {
            exit,
            packets: self.packets,
            field_errors: self.field_errors,
        }
    }
}
