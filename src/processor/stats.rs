use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every worker of one processor
#[derive(Debug, Default)]
pub struct ProcessorStats {
    pub(crate) received: AtomicU64,
    pub(crate) processed: AtomicU64,
    pub(crate) decode_failures: AtomicU64,
    pub(crate) detection_failures: AtomicU64,
    pub(crate) index_failures: AtomicU64,
    pub(crate) alerts: AtomicU64,
    pub(crate) acked: AtomicU64,
    pub(crate) requeued: AtomicU64,
    pub(crate) settle_failures: AtomicU64,
}

/// Point-in-time copy of [`ProcessorStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub processed: u64,
    pub decode_failures: u64,
    pub detection_failures: u64,
    pub index_failures: u64,
    pub alerts: u64,
    pub acked: u64,
    pub requeued: u64,
    pub settle_failures: u64,
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl ProcessorStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            detection_failures: self.detection_failures.load(Ordering::Relaxed),
            index_failures: self.index_failures.load(Ordering::Relaxed),
            alerts: self.alerts.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            settle_failures: self.settle_failures.load(Ordering::Relaxed),
        }
    }
}
