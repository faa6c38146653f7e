use std::time::Instant;

/// Source of "now" for the sampler.
///
/// Abstracted so tick arithmetic (elapsed time, throughput) can be driven
/// deterministically in tests.
pub trait TimeSource {
    fn now(&self) -> Instant;
}

/// A simple time source that returns the current time using `Instant::now()`.
#[derive(Clone, Copy, Debug, Default)]
pub struct InstantTimeSrc(());

impl InstantTimeSrc {
    pub fn new() -> Self {
        InstantTimeSrc(())
    }
}

impl TimeSource for InstantTimeSrc {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock. Clones share the same instant, so a test can keep
/// one handle while the sampler owns another.
#[cfg(test)]
#[derive(Clone, Debug)]
pub struct MockTimeSource {
    current_instant: std::sync::Arc<parking_lot::Mutex<Instant>>,
}

#[cfg(test)]
impl MockTimeSource {
    pub fn new(start_instant: Instant) -> Self {
        MockTimeSource {
            current_instant: std::sync::Arc::new(parking_lot::Mutex::new(start_instant)),
        }
    }

    pub fn advance_time(&self, duration: std::time::Duration) {
        *self.current_instant.lock() += duration;
    }
}

#[cfg(test)]
impl TimeSource for MockTimeSource {
    fn now(&self) -> Instant {
        *self.current_instant.lock()
    }
}
