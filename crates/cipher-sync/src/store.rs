//! Per-token tree cache
//!
//! One [`TreeCacheItem`] per token, behind an async mutex inside a
//! concurrent map. A sync pass holds the token's lock end to end, which is
//! what serializes concurrent syncs of the same token; different tokens
//! proceed independently. Consumers get [`TreeSnapshot`] copies rather than
//! references into the cache.

use crate::rpc::CommitmentEvent;
use alloy_primitives::Address;
use cipher_core::{CipherTree, TreeError};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Which source a running sync is currently draining.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncSource {
    Indexer,
    ChainScan,
}

/// Lifecycle of a token's cached tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncStatus {
    /// Fresh, or a cancelled sync left it resumable
    Idle,
    Syncing(SyncSource),
    /// Local state agreed with the chain at the end of the last sync
    Reconciled,
    /// The last sync gave up; already-merged events are kept
    Failed,
}

impl SyncStatus {
    pub fn is_syncing(&self) -> bool {
        matches!(self, SyncStatus::Syncing(_))
    }
}

/// Durable per-token sync state.
#[derive(Clone)]
pub struct TreeCacheItem {
    pub tree: CipherTree,
    /// Merged events in leaf-index order, exactly mirroring the tree
    pub events: Vec<CommitmentEvent>,
    pub from_block: u64,
    pub end_block: u64,
    pub status: SyncStatus,
}

impl TreeCacheItem {
    pub fn new(token: Address, depth: usize, start_block: u64) -> Result<Self, TreeError> {
        Ok(Self {
            tree: CipherTree::new(token, depth)?,
            events: Vec::new(),
            from_block: start_block,
            end_block: start_block,
            status: SyncStatus::Idle,
        })
    }

    pub fn snapshot(&self) -> TreeSnapshot {
        TreeSnapshot {
            tree: self.tree.clone(),
            status: self.status,
            from_block: self.from_block,
            end_block: self.end_block,
            event_count: self.events.len(),
        }
    }
}

/// Point-in-time copy of a token's state, safe to hand out.
#[derive(Clone, Debug)]
pub struct TreeSnapshot {
    pub tree: CipherTree,
    pub status: SyncStatus,
    pub from_block: u64,
    pub end_block: u64,
    pub event_count: usize,
}

/// All cached trees, keyed by token.
pub struct TreeStore {
    entries: DashMap<Address, Arc<Mutex<TreeCacheItem>>>,
    depth: usize,
    start_block: u64,
}

impl TreeStore {
    pub fn new(depth: usize, start_block: u64) -> Self {
        Self {
            entries: DashMap::new(),
            depth,
            start_block,
        }
    }

    /// The entry for `token`, created on first use.
    pub fn entry(&self, token: Address) -> Result<Arc<Mutex<TreeCacheItem>>, TreeError> {
        use dashmap::mapref::entry::Entry;
        match self.entries.entry(token) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let item = TreeCacheItem::new(token, self.depth, self.start_block)?;
                let arc = Arc::new(Mutex::new(item));
                entry.insert(arc.clone());
                Ok(arc)
            }
        }
    }

    /// Copy of a token's current state, or None if it was never synced.
    /// Taking one mid-sync waits for the lock, so the copy is always
    /// internally consistent.
    pub async fn snapshot(&self, token: Address) -> Option<TreeSnapshot> {
        let entry = self.entries.get(&token).map(|e| e.clone())?;
        let item = entry.lock().await;
        Some(item.snapshot())
    }

    /// Drop a token's cached state. The next sync rebuilds from the
    /// configured start block. A sync already holding the old entry finishes
    /// against the detached state and is discarded with it.
    pub fn reset(&self, token: Address) -> bool {
        self.entries.remove(&token).is_some()
    }

    /// Drop every token's cached state.
    pub fn reset_all(&self) {
        self.entries.clear();
    }

    pub fn tokens(&self) -> Vec<Address> {
        self.entries.iter().map(|e| *e.key()).collect()
    }
}
