use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters kept by one capture worker
#[derive(Default, Debug)]
pub struct WorkerStats {
    pub frames_seen: AtomicU64,
    pub enqueued: AtomicU64,
    pub dropped_queue_full: AtomicU64,
    pub malformed: AtomicU64,
    pub skipped_non_ip: AtomicU64,
    pub read_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSnapshot {
    pub frames_seen: u64,
    pub enqueued: u64,
    pub dropped_queue_full: u64,
    pub malformed: u64,
    pub skipped_non_ip: u64,
    pub read_errors: u64,
}

impl WorkerStats {
    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            frames_seen: self.frames_seen.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped_queue_full: self.dropped_queue_full.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            skipped_non_ip: self.skipped_non_ip.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
        }
    }
}

/// Counters kept by the persistence consumer
#[derive(Default, Debug)]
pub struct ConsumerStats {
    pub persisted: AtomicU64,
    pub evicted: AtomicU64,
    pub failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerSnapshot {
    pub persisted: u64,
    pub evicted: u64,
    pub failed: u64,
}

impl ConsumerStats {
    pub fn snapshot(&self) -> ConsumerSnapshot {
        ConsumerSnapshot {
            persisted: self.persisted.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Shared counters for a whole capture run
#[derive(Default)]
pub struct PipelineStats {
    interfaces: DashMap<String, Arc<WorkerStats>>,
    pub consumer: Arc<ConsumerStats>,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters for `interface`, created on first use
    pub fn worker(&self, interface: &str) -> Arc<WorkerStats> {
        self.interfaces
            .entry(interface.to_string())
            .or_insert_with(|| Arc::new(WorkerStats::default()))
            .clone()
    }

    /// Per-interface snapshots sorted by interface name
    pub fn worker_snapshots(&self) -> Vec<(String, WorkerSnapshot)> {
        let mut snapshots: Vec<(String, WorkerSnapshot)> = self
            .interfaces
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect();
        snapshots.sort_by(|a, b| a.0.cmp(&b.0));
        snapshots
    }

    /// Sum over all interfaces
    pub fn totals(&self) -> WorkerSnapshot {
        self.worker_snapshots()
            .into_iter()
            .fold(WorkerSnapshot::default(), |acc, (_, s)| WorkerSnapshot {
                frames_seen: acc.frames_seen + s.frames_seen,
                enqueued: acc.enqueued + s.enqueued,
                dropped_queue_full: acc.dropped_queue_full + s.dropped_queue_full,
                malformed: acc.malformed + s.malformed,
                skipped_non_ip: acc.skipped_non_ip + s.skipped_non_ip,
                read_errors: acc.read_errors + s.read_errors,
            })
    }
}
