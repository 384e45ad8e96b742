//! Offset-adjusted wall clock
//!
//! The offset is refreshed from a network time API by [`sync`]; a stale
//! offset is fine, alarm checking never waits for it.

pub mod sync;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

pub use sync::{parse_server_time, SyncStatus, TimeSyncService};

/// Supplies "now", shifted by a signed millisecond offset
#[derive(Debug, Clone, Default)]
pub struct TimeSource {
    offset_ms: Arc<AtomicI64>,
}

impl TimeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a source with a fixed initial offset
    pub fn with_offset_ms(offset_ms: i64) -> Self {
        let source = Self::new();
        source.set_offset_ms(offset_ms);
        source
    }

    /// Current adjusted time
    pub fn now(&self) -> DateTime<Utc> {
        self.adjust(Utc::now())
    }

    /// Apply the offset to a system timestamp
    pub fn adjust(&self, system: DateTime<Utc>) -> DateTime<Utc> {
        system + Duration::milliseconds(self.offset_ms())
    }

    pub fn offset_ms(&self) -> i64 {
        self.offset_ms.load(Ordering::Relaxed)
    }

    pub fn set_offset_ms(&self, offset_ms: i64) {
        self.offset_ms.store(offset_ms, Ordering::Relaxed);
    }
}
