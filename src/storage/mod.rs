//! Packet storage
//!
//! The capture pipeline writes through the `PacketStore` trait; readers
//! (dashboards, detectors) query the same store. Only the persistence
//! consumer mutates it during a capture run.

pub mod memory;
pub mod retention;

pub use memory::MemoryStore;
pub use retention::{cleanup, make_room, CleanupReport};

use anyhow::Result;

use crate::packet::PacketRecord;

/// Identifier assigned to a row on insert
pub type PacketId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPacket {
    pub id: PacketId,
    pub record: PacketRecord,
}

pub trait PacketStore: Send + Sync {
    fn insert(&self, record: PacketRecord) -> Result<PacketId>;

    fn count(&self) -> Result<usize>;

    /// Up to `n` rows, oldest first; equal timestamps in insertion order
    fn oldest(&self, n: usize) -> Result<Vec<StoredPacket>>;

    /// Remove the given rows, returning how many existed
    fn delete(&self, ids: &[PacketId]) -> Result<usize>;

    /// Up to `limit` rows, newest first
    fn recent(&self, limit: usize) -> Result<Vec<StoredPacket>>;

    fn clear(&self) -> Result<()>;
}
