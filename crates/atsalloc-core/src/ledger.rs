//! Pointer-to-backend ledger.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Which backend physically holds a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    Device,
    Host,
}

impl Placement {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Device => "device",
            Self::Host => "host",
        }
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the router remembers about a live block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerEntry {
    pub placement: Placement,
    /// Bytes requested by the caller.
    pub size: usize,
}

const NUM_SHARDS: usize = 16;

/// Concurrent map from block base address to its placement and size,
/// sharded by address.
#[derive(Debug)]
pub struct AllocationLedger {
    shards: Box<[RwLock<HashMap<usize, LedgerEntry>>]>,
}

impl Default for AllocationLedger {
    fn default() -> Self {
        let shards: Vec<RwLock<HashMap<usize, LedgerEntry>>> = (0..NUM_SHARDS)
            .map(|_| RwLock::new(HashMap::new()))
            .collect();
        Self {
            shards: shards.into_boxed_slice(),
        }
    }
}

impl AllocationLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Low bits of an aligned block base are zero and are skipped.
    fn shard_for(&self, addr: usize) -> &RwLock<HashMap<usize, LedgerEntry>> {
        &self.shards[(addr >> 4) % NUM_SHARDS]
    }

    /// Record a freshly allocated block. A stale entry at the same address is replaced.
    pub fn record(&self, addr: usize, placement: Placement, size: usize) {
        self.shard_for(addr)
            .write()
            .insert(addr, LedgerEntry { placement, size });
    }

    /// Remove and return the entry for `addr`.
    pub fn take(&self, addr: usize) -> Option<LedgerEntry> {
        self.shard_for(addr).write().remove(&addr)
    }

    #[must_use]
    pub fn lookup(&self, addr: usize) -> Option<LedgerEntry> {
        self.shard_for(addr).read().get(&addr).copied()
    }

    /// Live entries. Not a point-in-time count while other threads mutate.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.read().is_empty())
    }

    /// Total requested bytes still outstanding, per placement.
    #[must_use]
    pub fn outstanding_bytes(&self, placement: Placement) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                shard
                    .read()
                    .values()
                    .filter(|entry| entry.placement == placement)
                    .map(|entry| entry.size)
                    .sum::<usize>()
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_removes_entry() {
        let ledger = AllocationLedger::new();
        ledger.record(0x1000, Placement::Device, 64);
        assert_eq!(
            ledger.lookup(0x1000),
            Some(LedgerEntry {
                placement: Placement::Device,
                size: 64
            })
        );
        assert_eq!(ledger.take(0x1000).map(|e| e.size), Some(64));
        assert!(ledger.take(0x1000).is_none());
        assert!(ledger.is_empty());
    }

    #[test]
    fn outstanding_bytes_split_by_placement() {
        let ledger = AllocationLedger::new();
        ledger.record(0x1000, Placement::Device, 100);
        ledger.record(0x2000, Placement::Host, 5000);
        ledger.record(0x3000, Placement::Device, 28);
        assert_eq!(ledger.len(), 3);
        assert_eq!(ledger.outstanding_bytes(Placement::Device), 128);
        assert_eq!(ledger.outstanding_bytes(Placement::Host), 5000);
    }

    #[test]
    fn entries_spread_across_shards() {
        let ledger = AllocationLedger::new();
        for i in 0..NUM_SHARDS {
            ledger.record(0x10_0000 + i * 16, Placement::Host, 1);
        }
        assert!(ledger.shards.iter().all(|shard| shard.read().len() == 1));
        assert_eq!(ledger.len(), NUM_SHARDS);
        assert_eq!(ledger.outstanding_bytes(Placement::Host), NUM_SHARDS);
    }

    #[test]
    fn concurrent_record_and_take_balance() {
        let ledger = AllocationLedger::new();
        std::thread::scope(|s| {
            for t in 0..8usize {
                let ledger = &ledger;
                s.spawn(move || {
                    for i in 0..500usize {
                        let addr = (t << 20) | (i << 6);
                        ledger.record(addr, Placement::Device, 8);
                        assert_eq!(ledger.take(addr).map(|e| e.size), Some(8));
                    }
                });
            }
        });
        assert!(ledger.is_empty());
    }

    #[test]
    fn placement_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Placement::Host).expect("serialize"),
            "\"host\""
        );
        assert_eq!(Placement::Device.to_string(), "device");
    }
}
