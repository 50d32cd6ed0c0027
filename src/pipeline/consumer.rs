use anyhow::{Context, Result};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use super::queue::PacketQueue;
use super::stats::ConsumerStats;
use super::{PipelineUnit, StopSignal};
use crate::packet::PacketRecord;
use crate::storage::{make_room, PacketStore};

/// Single reader draining the queue into the store under a row cap
pub struct PersistenceConsumer {
    queue: PacketQueue,
    store: Arc<dyn PacketStore>,
    max_stored: usize,
    poll_interval: Duration,
    stats: Arc<ConsumerStats>,
}

impl PersistenceConsumer {
    pub fn new(
        queue: PacketQueue,
        store: Arc<dyn PacketStore>,
        max_stored: usize,
        poll_interval: Duration,
        stats: Arc<ConsumerStats>,
    ) -> Self {
        Self {
            queue,
            store,
            max_stored,
            poll_interval,
            stats,
        }
    }

    pub fn consume(&self, stop: &StopSignal) {
        info!("Persistence consumer started (cap {} packets)", self.max_stored);
        while !stop.is_set() {
            let Some(record) = self.queue.pop(self.poll_interval) else {
                continue;
            };
            if let Err(e) = self.persist(record) {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                error!("Failed to persist packet: {:#}", e);
            }
        }
        info!(
            "Persistence consumer stopped, {} packets left in queue",
            self.queue.len()
        );
    }

    /// Evict down to cap - 1 rows, then insert
    pub fn persist(&self, record: PacketRecord) -> Result<()> {
        let evicted = make_room(self.store.as_ref(), self.max_stored)?;
        if evicted > 0 {
            self.stats.evicted.fetch_add(evicted as u64, Ordering::Relaxed);
        }
        self.store
            .insert(record)
            .context("Failed to insert packet")?;
        self.stats.persisted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl PipelineUnit for PersistenceConsumer {
    fn name(&self) -> String {
        "packet-consumer".to_string()
    }

    fn run(self: Box<Self>, stop: StopSignal) {
        self.consume(&stop);
    }
}
