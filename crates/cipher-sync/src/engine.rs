//! Sync engine
//!
//! Reconciles a token's local tree with the chain. The cheap path asks the
//! indexer for everything and accepts the result only if the local root then
//! equals the contract's. Any indexer problem (failure, bad data, root
//! mismatch) falls through to the authoritative path: scanning the chain for
//! NewCommitment logs window by window under a retry budget, then merging.
//!
//! Merging is where the safety lives: events are unioned by leaf index,
//! checked for contiguity (exactly 0..n) and only then appended to the tree.
//! Overlapping windows and replays are idempotent, and a gap can never
//! half-apply.

use crate::config::ChainConfig;
use crate::indexer::{IndexerClient, IndexerError};
use crate::retry::{retry, RetryPolicy};
use crate::rpc::{ChainReader, CommitmentEvent, RpcError};
use crate::store::{SyncSource, SyncStatus, TreeCacheItem, TreeSnapshot, TreeStore};
use alloy_primitives::Address;
use cipher_core::algebra::{field_to_u256, u256_to_field};
use cipher_core::{TreeError, DEFAULT_TREE_DEPTH};
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Retry budget for one commitment-log window
const LOG_FETCH_RETRY: RetryPolicy = RetryPolicy::new(5, Duration::from_millis(5000));
/// Retry budget for block-number reads
const BLOCK_NUMBER_RETRY: RetryPolicy = RetryPolicy::new(5, Duration::from_millis(2000));
/// Jitter between chain-scan windows, keeps hosted providers from rate
/// limiting the scan
const SCAN_DELAY_MIN_MS: u64 = 300;
const SCAN_DELAY_MAX_MS: u64 = 800;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Leaf index {index} breaks contiguity (expected {expected})")]
    NonContiguousLeafIndex { index: u64, expected: u64 },
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// Why the indexer path was abandoned. Never escapes the engine: every
/// fault here falls back to the chain scan.
#[derive(Debug, Error)]
enum IndexerFault {
    #[error(transparent)]
    Client(#[from] IndexerError),
    #[error(transparent)]
    Data(#[from] SyncError),
}

/// Cooperative cancellation handle, checked between scan windows.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Cursor state for one chain-scan pass.
struct ScanWindow {
    current_start_block: u64,
    current_end_block: u64,
    latest_block_number: u64,
    batch_size: u64,
}

/// Per-chain sync engine over pluggable chain and indexer transports.
pub struct SyncEngine {
    config: ChainConfig,
    chain: Arc<dyn ChainReader>,
    indexer: Option<Arc<dyn IndexerClient>>,
    store: TreeStore,
}

impl SyncEngine {
    pub fn new(
        config: ChainConfig,
        chain: Arc<dyn ChainReader>,
        indexer: Option<Arc<dyn IndexerClient>>,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        let store = TreeStore::new(DEFAULT_TREE_DEPTH, config.start_block);
        Ok(Self {
            config,
            chain,
            indexer,
            store,
        })
    }

    pub fn store(&self) -> &TreeStore {
        &self.store
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Bring `token`'s tree up to date and return a snapshot of the result.
    pub async fn sync_tree(&self, token: Address) -> Result<TreeSnapshot, SyncError> {
        self.sync_tree_with(token, CancelFlag::new()).await
    }

    /// Like [`SyncEngine::sync_tree`], with a cancellation handle.
    ///
    /// Cancellation stops further network calls; events already fetched are
    /// still merged and the entry stays resumable (`Idle`). Holding the
    /// token's lock for the whole pass is what guarantees at most one sync
    /// per token at a time; a second caller simply waits, then runs its own
    /// incremental pass.
    pub async fn sync_tree_with(
        &self,
        token: Address,
        cancel: CancelFlag,
    ) -> Result<TreeSnapshot, SyncError> {
        let entry = self.store.entry(token)?;
        let mut item = entry.lock().await;
        match self.run_sync(&mut item, cancel).await {
            Ok(()) => Ok(item.snapshot()),
            Err(err) => {
                item.status = SyncStatus::Failed;
                Err(err)
            }
        }
    }

    async fn run_sync(&self, item: &mut TreeCacheItem, cancel: CancelFlag) -> Result<(), SyncError> {
        let token = item.tree.token();
        let latest = self.latest_block_number().await?;

        let start = item.end_block.max(self.config.start_block);
        let mut window = ScanWindow {
            current_start_block: start,
            current_end_block: (start + self.config.sync_block_batch_size).min(latest),
            latest_block_number: latest,
            batch_size: self.config.sync_block_batch_size,
        };

        if let Some(indexer) = self.indexer.clone() {
            match self.sync_from_indexer(item, &window, indexer.as_ref()).await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(fault) => {
                    tracing::warn!(
                        "Indexer sync for {:?} failed, falling back to chain scan: {}",
                        token,
                        fault
                    );
                }
            }
            // the indexer pass may have taken a while; rescan against a
            // fresh chain head
            window.latest_block_number = self.latest_block_number().await?;
            window.current_end_block = (window.current_start_block + window.batch_size)
                .min(window.latest_block_number);
        }

        self.sync_from_chain(item, &mut window, cancel).await
    }

    /// Indexer fast path. Returns true when the result was accepted.
    ///
    /// The merge happens on a scratch copy: only a root match against the
    /// contract commits it, so a stale or corrupt indexer can cost time but
    /// never local state.
    async fn sync_from_indexer(
        &self,
        item: &mut TreeCacheItem,
        window: &ScanWindow,
        indexer: &dyn IndexerClient,
    ) -> Result<bool, IndexerFault> {
        let token = item.tree.token();
        item.status = SyncStatus::Syncing(SyncSource::Indexer);
        tracing::info!(
            "Syncing {:?} commitments from indexer (from block {})",
            token,
            window.current_start_block
        );

        let events = indexer
            .fetch_commitment_events(token, window.current_start_block)
            .await?;

        let mut scratch = item.clone();
        merge_events(&mut scratch, &events).map_err(IndexerFault::Data)?;

        let contract_root = self
            .chain
            .tree_root(token)
            .await
            .map_err(|err| IndexerFault::Data(SyncError::Rpc(err)))?;
        let local_root = field_to_u256(scratch.tree.root());

        if local_root == contract_root {
            *item = scratch;
            item.status = SyncStatus::Reconciled;
            tracing::info!("Indexer sync for {:?} reconciled ({} events)", token, item.events.len());
            Ok(true)
        } else {
            tracing::warn!(
                "Root mismatch after indexer sync for {:?} (local {:#x}, contract {:#x})",
                token,
                local_root,
                contract_root
            );
            Ok(false)
        }
    }

    /// Authoritative path: scan the chain window by window and merge.
    ///
    /// A window that exhausts its retry budget still merges everything
    /// fetched so far before surfacing the failure; cancellation does the
    /// same but leaves the entry resumable. Only a completed scan records
    /// the chain head as the synced end block.
    async fn sync_from_chain(
        &self,
        item: &mut TreeCacheItem,
        window: &mut ScanWindow,
        cancel: CancelFlag,
    ) -> Result<(), SyncError> {
        let token = item.tree.token();
        item.status = SyncStatus::Syncing(SyncSource::ChainScan);

        let mut pending: Vec<CommitmentEvent> = Vec::new();
        let mut completed = true;

        while window.current_end_block <= window.latest_block_number
            && window.current_start_block <= window.current_end_block
        {
            if cancel.is_cancelled() {
                tracing::info!(
                    "Sync for {:?} cancelled, keeping {} fetched events",
                    token,
                    pending.len()
                );
                completed = false;
                break;
            }

            tracing::info!(
                "Scanning blocks {} to {} for {:?} (latest {})",
                window.current_start_block,
                window.current_end_block,
                token,
                window.latest_block_number
            );

            let (from, to) = (window.current_start_block, window.current_end_block);
            let chain = self.chain.clone();
            let fetched = match retry(
                LOG_FETCH_RETRY,
                || chain.fetch_commitment_logs(token, from, to),
                |err, attempt| {
                    tracing::error!(
                        "Fetching commitment logs {}..={} failed (attempt {}): {}",
                        from,
                        to,
                        attempt,
                        err
                    );
                },
            )
            .await
            {
                Ok(logs) => logs,
                Err(err) => {
                    // budget spent: keep what we have, then surface the failure
                    item.status = SyncStatus::Failed;
                    merge_events(item, &pending)?;
                    return Err(err.into());
                }
            };
            pending.extend(fetched);

            window.current_start_block = window.current_end_block + 1;
            window.current_end_block =
                (window.current_end_block + window.batch_size).min(window.latest_block_number);
            if window.current_start_block > window.latest_block_number {
                break;
            }

            let jitter = rand::thread_rng().gen_range(SCAN_DELAY_MIN_MS..=SCAN_DELAY_MAX_MS);
            tokio::time::sleep(Duration::from_millis(jitter)).await;
        }

        if let Err(err) = merge_events(item, &pending) {
            item.status = SyncStatus::Failed;
            return Err(err);
        }

        if completed {
            item.end_block = window.current_end_block;
            item.status = SyncStatus::Reconciled;
            tracing::info!(
                "Chain scan for {:?} reconciled at block {} ({} events)",
                token,
                item.end_block,
                item.events.len()
            );
        } else {
            item.status = SyncStatus::Idle;
        }
        Ok(())
    }

    async fn latest_block_number(&self) -> Result<u64, SyncError> {
        let chain = self.chain.clone();
        let latest = retry(
            BLOCK_NUMBER_RETRY,
            || chain.block_number(),
            |err, attempt| {
                tracing::error!("Fetching block number failed (attempt {}): {}", attempt, err);
            },
        )
        .await?;
        Ok(latest)
    }
}

/// Merge newly fetched events into a cache item.
///
/// Union by leaf index (new wins), verify the union is exactly 0..n, then
/// append the tail beyond the tree's next index. The tree is untouched when
/// the contiguity check fails.
fn merge_events(item: &mut TreeCacheItem, new_events: &[CommitmentEvent]) -> Result<(), SyncError> {
    let mut by_index: BTreeMap<u64, CommitmentEvent> = BTreeMap::new();
    for event in item.events.iter().chain(new_events) {
        by_index.insert(event.leaf_index, event.clone());
    }

    for (expected, index) in by_index.keys().enumerate() {
        if *index != expected as u64 {
            return Err(SyncError::NonContiguousLeafIndex {
                index: *index,
                expected: expected as u64,
            });
        }
    }

    let merged: Vec<CommitmentEvent> = by_index.into_values().collect();
    let new_leaves: Vec<_> = merged
        .iter()
        .skip(item.tree.next_index() as usize)
        .map(|event| u256_to_field(event.commitment))
        .collect();
    if !new_leaves.is_empty() {
        item.tree.batch_insert(&new_leaves)?;
    }

    if let (Some(first), Some(last)) = (merged.first(), merged.last()) {
        item.from_block = first.block_number;
        item.end_block = last.block_number;
    }
    item.events = merged;
    Ok(())
}
