//! Audit sink that records events for assertions.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use boxoffice_core::{AuditEvent, AuditSink};
use std::sync::{Arc, Mutex};

/// Collects every recorded [`AuditEvent`] in order.
///
/// Clones share the same buffer.
#[derive(Clone, Debug, Default)]
pub struct RecordingAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl RecordingAuditSink {
    /// Create an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded events
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Number of `TicketFlagged` events
    #[must_use]
    pub fn flagged_count(&self) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, AuditEvent::TicketFlagged { .. }))
            .count()
    }

    /// Number of `ScanRejected` events
    #[must_use]
    pub fn scan_rejection_count(&self) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, AuditEvent::ScanRejected { .. }))
            .count()
    }

    /// Drop everything recorded so far
    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl AuditSink for RecordingAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events.lock().unwrap().push(event);
    }
}
