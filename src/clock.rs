use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Wall clock plus a signed offset approximating the controller's clock.
///
/// The offset is a one-shot estimate: each SYNC replaces it outright, and the
/// network round-trip at sync time goes uncorrected. No smoothing or repeated
/// sampling.
#[derive(Debug, Default)]
pub struct AdjustedClock {
    offset_ms: AtomicI64,
}

impl AdjustedClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopts the remote clock: offset = remote now - local now.
    pub fn sync_to(&self, remote_ms: i64) {
        let offset = remote_ms - Utc::now().timestamp_millis();
        self.offset_ms.store(offset, Ordering::Relaxed);
        log::info!(" clock offset now {offset}ms");
    }

    /// Local wall clock shifted into the remote clock space.
    pub fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis() + self.offset_ms.load(Ordering::Relaxed)
    }

    pub fn offset_ms(&self) -> i64 {
        self.offset_ms.load(Ordering::Relaxed)
    }
}
