use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

use super::{PacketId, PacketStore, StoredPacket};
use crate::packet::PacketRecord;

/// In-process packet table ordered by capture time
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    next_id: PacketId,
    rows: BTreeMap<(DateTime<Utc>, PacketId), PacketRecord>,
    index: HashMap<PacketId, DateTime<Utc>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PacketStore for MemoryStore {
    fn insert(&self, record: PacketRecord) -> Result<PacketId> {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        let timestamp = record.timestamp();
        inner.index.insert(id, timestamp);
        inner.rows.insert((timestamp, id), record);
        Ok(id)
    }

    fn count(&self) -> Result<usize> {
        Ok(self.inner.lock().rows.len())
    }

    fn oldest(&self, n: usize) -> Result<Vec<StoredPacket>> {
        let inner = self.inner.lock();
        Ok(inner
            .rows
            .iter()
            .take(n)
            .map(|(&(_, id), record)| StoredPacket { id, record: record.clone() })
            .collect())
    }

    fn delete(&self, ids: &[PacketId]) -> Result<usize> {
        let mut inner = self.inner.lock();
        let mut removed = 0;
        for id in ids {
            if let Some(timestamp) = inner.index.remove(id) {
                inner.rows.remove(&(timestamp, *id));
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn recent(&self, limit: usize) -> Result<Vec<StoredPacket>> {
        let inner = self.inner.lock();
        Ok(inner
            .rows
            .iter()
            .rev()
            .take(limit)
            .map(|(&(_, id), record)| StoredPacket { id, record: record.clone() })
            .collect())
    }

    fn clear(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.rows.clear();
        inner.index.clear();
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::net::{IpAddr, Ipv4Addr};

    /// ICMP record stamped `secs` seconds after the epoch
    pub(crate) fn record_at(secs: i64) -> PacketRecord {
        let ts = Utc.timestamp_opt(secs, 0).unwrap();
        PacketRecord::icmp(
            ts,
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            8,
            64,
        )
    }

    #[test]
    fn test_oldest_and_recent_ordering() {
        let store = MemoryStore::new();
        for secs in [3, 1, 2] {
            store.insert(record_at(secs)).unwrap();
        }

        let oldest: Vec<i64> = store
            .oldest(2)
            .unwrap()
            .iter()
            .map(|row| row.record.timestamp().timestamp())
            .collect();
        assert_eq!(oldest, vec![1, 2]);

        let recent: Vec<i64> = store
            .recent(10)
            .unwrap()
            .iter()
            .map(|row| row.record.timestamp().timestamp())
            .collect();
        assert_eq!(recent, vec![3, 2, 1]);
    }

    #[test]
    fn test_equal_timestamps_keep_insertion_order() {
        let store = MemoryStore::new();
        let first = store.insert(record_at(5)).unwrap();
        let second = store.insert(record_at(5)).unwrap();

        let ids: Vec<PacketId> = store.oldest(2).unwrap().iter().map(|row| row.id).collect();
        assert_eq!(ids, vec![first, second]);
    }

    #[test]
    fn test_delete_ignores_unknown_ids() {
        let store = MemoryStore::new();
        let id = store.insert(record_at(1)).unwrap();

        assert_eq!(store.delete(&[id, 999]).unwrap(), 1);
        assert_eq!(store.count().unwrap(), 0);
        assert_eq!(store.delete(&[id]).unwrap(), 0);
    }

    #[test]
    fn test_clear() {
        let store = MemoryStore::new();
        store.insert(record_at(1)).unwrap();
        store.clear().unwrap();
        assert_eq!(store.count().unwrap(), 0);
        assert!(store.recent(5).unwrap().is_empty());
    }
}
