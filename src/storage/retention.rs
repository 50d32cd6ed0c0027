//! Row-count retention for the packet store.
//!
//! Eviction happens before the insert it makes room for, so the table
//! never holds more than the cap, not even transiently.

use anyhow::{Context, Result};
use tracing::{debug, info};

use super::{PacketId, PacketStore};

/// Delete the oldest rows so one more insert stays within `cap`.
///
/// Returns the number of rows evicted.
pub fn make_room(store: &dyn PacketStore, cap: usize) -> Result<usize> {
    let count = store.count().context("Failed to count stored packets")?;
    if count < cap {
        return Ok(0);
    }
    let excess = count + 1 - cap;
    let evicted = evict_oldest(store, excess)?;
    debug!("Evicted {} oldest packets (count {} at cap {})", evicted, count, cap);
    Ok(evicted)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub deleted: usize,
    pub remaining: usize,
}

/// Trim the store down to its newest `keep` rows
pub fn cleanup(store: &dyn PacketStore, keep: usize) -> Result<CleanupReport> {
    let count = store.count().context("Failed to count stored packets")?;
    let deleted = if count > keep {
        evict_oldest(store, count - keep)?
    } else {
        0
    };
    let remaining = store.count().context("Failed to count stored packets")?;
    info!(
        "Cleaned up packets: deleted {} old packets, {} remaining",
        deleted, remaining
    );
    Ok(CleanupReport { deleted, remaining })
}

fn evict_oldest(store: &dyn PacketStore, n: usize) -> Result<usize> {
    let ids: Vec<PacketId> = store
        .oldest(n)
        .context("Failed to query oldest packets")?
        .into_iter()
        .map(|row| row.id)
        .collect();
    store.delete(&ids).context("Failed to delete oldest packets")
}
