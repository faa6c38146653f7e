/// Boundary with the packet capture facility and the tshark-backed source.
pub mod capture;

/// Monitor configuration: defaults, config files and command line.
pub mod config;

/// Congestion scoring.
pub mod score;

/// Bounded, aligned sample history.
pub mod history;

/// Capture events to latest observations.
pub mod ingest;

/// Wiring of the ingest and sampling flows.
pub mod monitor;
pub use monitor::{Monitor, MonitorReport, ShutdownHandle};

/// State shared between the ingest flow and the sampler.
pub mod observation;

/// Render frames and the terminal renderer.
pub mod render;

/// Fixed-cadence sampler.
pub mod sampler;

/// Logging infrastructure.
#[cfg_attr(test, allow(dead_code))]
pub mod tracing;

pub mod util;
