//! Runs the ingest flow and the sampling flow side by side.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::capture::CaptureStream;
use crate::config::{ConfigError, SamplerConfig};
use crate::ingest::{IngestReport, ObservationIngestor};
use crate::observation::SharedObservationState;
use crate::render::FrameReceiver;
use crate::sampler::{SamplerReport, SamplingScheduler};

/// Stops the two flows of a [`Monitor`], together or independently.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    ingest: Arc<watch::Sender<bool>>,
    sampling: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    fn new() -> (Self, watch::Receiver<bool>, watch::Receiver<bool>) {
        let (ingest, ingest_rx) = watch::channel(false);
        let (sampling, sampling_rx) = watch::channel(false);
        let handle = Self {
            ingest: Arc::new(ingest),
            sampling: Arc::new(sampling),
        };
        (handle, ingest_rx, sampling_rx)
    }

    /// Stops consuming capture events. Sampling keeps going with the last
    /// known values.
    pub fn stop_ingest(&self) {
        self.ingest.send_replace(true);
    }

    pub fn stop_sampling(&self) {
        self.sampling.send_replace(true);
    }

    pub fn shutdown(&self) {
        self.stop_ingest();
        self.stop_sampling();
    }
}

/// Whatever the two flows returned. A flow that panicked reports `None`.
#[derive(Debug)]
pub struct MonitorReport {
    pub ingest: Option<IngestReport>,
    pub sampler: Option<SamplerReport>,
}

/// A running monitor: one ingest task and one sampling task sharing a single
/// [`SharedObservationState`].
pub struct Monitor {
    frames: FrameReceiver,
    shutdown: ShutdownHandle,
    ingest_task: JoinHandle<IngestReport>,
    sampler_task: JoinHandle<SamplerReport>,
}

impl Monitor {
    /// Spawns both flows on the current tokio runtime.
    ///
    /// Nothing is spawned when `config` is invalid.
    pub fn start(config: SamplerConfig, capture: CaptureStream) -> Result<Self, ConfigError> {
        let state = Arc::new(SharedObservationState::new(config.initial_max_window_size));
        let sampler = SamplingScheduler::new(config, state.clone())?;
        let (shutdown, ingest_rx, sampling_rx) = ShutdownHandle::new();

        let frames = sampler.subscribe();
        let sampler_task = tokio::spawn(sampler.run(sampling_rx));
        let ingest_task = tokio::spawn(ObservationIngestor::new(state).run(capture, ingest_rx));

        Ok(Self {
            frames,
            shutdown,
            ingest_task,
            sampler_task,
        })
    }

    /// New subscription to the per-tick frames.
    pub fn frames(&self) -> FrameReceiver {
        self.frames.clone()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn is_ingesting(&self) -> bool {
        !self.ingest_task.is_finished()
    }

    /// Stops both flows and waits for them. In-flight state is discarded.
    pub async fn stop(self) -> MonitorReport {
        self.shutdown.shutdown();
        let ingest = self
            .ingest_task
            .await
            .map_err(|err| tracing::error!(error = %err, "Ingest task failed"))
            .ok();
        let sampler = self
            .sampler_task
            .await
            .map_err(|err| tracing::error!(error = %err, "Sampler task failed"))
            .ok();
        MonitorReport { ingest, sampler }
    }
}
