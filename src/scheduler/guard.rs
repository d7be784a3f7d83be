//! Single-flight guard for periodic sweeps

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// At most one holder at a time; a second caller is turned away, not queued
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    busy: Arc<AtomicBool>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the guard, or `None` while another run still holds it
    pub fn try_acquire(&self) -> Option<SingleFlightPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SingleFlightPermit {
                busy: self.busy.clone(),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases the guard when dropped, including on panic
#[derive(Debug)]
pub struct SingleFlightPermit {
    busy: Arc<AtomicBool>,
}

impl Drop for SingleFlightPermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
