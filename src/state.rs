use std::sync::Arc;

use parking_lot::RwLock;

/// Where the service is in its life. Transitions only move forward:
/// Running -> Draining -> Stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    Draining,
    Stopped,
}

/// Shared, injectable service phase. The dispatcher checks `is_accepting`
/// before touching the engine; the flag is advisory and never interrupts a
/// generation already in flight.
#[derive(Clone)]
pub struct ServiceState {
    inner: Arc<RwLock<Phase>>,
}

impl ServiceState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Phase::Running)),
        }
    }

    pub fn phase(&self) -> Phase {
        *self.inner.read()
    }

    pub fn is_accepting(&self) -> bool {
        self.phase() == Phase::Running
    }

    pub fn begin_drain(&self) {
        let mut phase = self.inner.write();
        if *phase == Phase::Running {
            *phase = Phase::Draining;
        }
    }

    pub fn stop(&self) {
        *self.inner.write() = Phase::Stopped;
    }
}

impl Default for ServiceState {
    fn default() -> Self {
        Self::new()
    }
}
