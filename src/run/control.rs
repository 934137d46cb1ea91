use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct ControlFlags {
    pause: AtomicBool,
    stop: AtomicBool,
    evicted: AtomicBool,
    reason: Mutex<Option<String>>,
}

/// Cooperative cancellation handle shared between a running executor and
/// whoever may want to pause or stop it. Flags are only observed between
/// steps.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    flags: Arc<ControlFlags>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_pause(&self) {
        self.flags.pause.store(true, Ordering::Relaxed);
    }

    pub fn clear_pause(&self) {
        self.flags.pause.store(false, Ordering::Relaxed);
    }

    pub fn request_stop(&self, reason: impl Into<String>) {
        self.set_reason(reason.into());
        self.flags.stop.store(true, Ordering::Relaxed);
    }

    /// Marks the run as removed by admission control.
    pub fn evict(&self, reason: impl Into<String>) {
        self.set_reason(reason.into());
        self.flags.evicted.store(true, Ordering::Relaxed);
    }

    pub fn is_pause_requested(&self) -> bool {
        self.flags.pause.load(Ordering::Relaxed)
    }

    pub fn is_stop_requested(&self) -> bool {
        self.flags.stop.load(Ordering::Relaxed)
    }

    pub fn is_evicted(&self) -> bool {
        self.flags.evicted.load(Ordering::Relaxed)
    }

    pub fn reason(&self) -> Option<String> {
        self.flags
            .reason
            .lock()
            .ok()
            .and_then(|reason| reason.clone())
    }

    fn set_reason(&self, reason: String) {
        if let Ok(mut slot) = self.flags.reason.lock() {
            slot.get_or_insert(reason);
        }
    }
}
